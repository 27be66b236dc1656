pub mod pump;

pub use pump::{FramePump, PumpEvent, PumpSettings};
