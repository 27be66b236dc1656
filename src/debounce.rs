use crate::config::DebounceConfig;
use serde::Deserialize;

/// One detection reported by the inference path
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionEvent {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorTransition {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceCounter {
    pub consecutive_positive: u32,
    pub consecutive_negative: u32,
    pub active: bool,
}

/// Turns a noisy per-frame "object present" signal into activate/deactivate edges
///
/// A frame is positive when any of its detections carries the watched label
/// with confidence strictly above the threshold. Each frame resets the
/// opposite counter. `Activate` fires once when the positive run first
/// reaches the activation threshold while inactive; `Deactivate` fires once
/// when the negative run first reaches the deactivation threshold while
/// active.
#[derive(Debug, Clone)]
pub struct Debouncer {
    activation_threshold: u32,
    deactivation_threshold: u32,
    confidence_threshold: f32,
    watched_label: String,
    counter: DebounceCounter,
}

impl Debouncer {
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            activation_threshold: config.activation_threshold,
            deactivation_threshold: config.deactivation_threshold,
            confidence_threshold: config.confidence_threshold,
            watched_label: config.watched_label.clone(),
            counter: DebounceCounter::default(),
        }
    }

    pub fn counter(&self) -> DebounceCounter {
        self.counter
    }

    pub fn is_active(&self) -> bool {
        self.counter.active
    }

    pub fn matches(&self, event: &DetectionEvent) -> bool {
        event.label == self.watched_label && event.confidence > self.confidence_threshold
    }

    /// Feed one frame's detections (an empty frame is negative)
    pub fn observe_frame(&mut self, detections: &[DetectionEvent]) -> Option<ActuatorTransition> {
        let present = detections.iter().any(|d| self.matches(d));
        self.observe_present(present)
    }

    /// Feed a frame that produced a single detection
    pub fn observe(&mut self, event: &DetectionEvent) -> Option<ActuatorTransition> {
        let present = self.matches(event);
        self.observe_present(present)
    }

    pub fn observe_present(&mut self, present: bool) -> Option<ActuatorTransition> {
        let c = &mut self.counter;

        if present {
            c.consecutive_positive = c.consecutive_positive.saturating_add(1);
            c.consecutive_negative = 0;

            if c.consecutive_positive >= self.activation_threshold && !c.active {
                c.active = true;
                return Some(ActuatorTransition::Activate);
            }
        } else {
            c.consecutive_negative = c.consecutive_negative.saturating_add(1);
            c.consecutive_positive = 0;

            if c.consecutive_negative >= self.deactivation_threshold && c.active {
                c.active = false;
                return Some(ActuatorTransition::Deactivate);
            }
        }

        None
    }
}
