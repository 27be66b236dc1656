//! Camera arbitration and worker orchestration for a single capture device
//!
//! The local preview loop and external inference/recording workers take turns
//! on the camera. [`app::App`] owns the mode and sequences every handoff.

pub mod actuator;
pub mod app;
pub mod camera;
pub mod config;
pub mod controls;
pub mod debounce;
pub mod error;
pub mod hooks;
pub mod messages;
pub mod mode;
pub mod services;
pub mod signals;
pub mod supervisor;
pub mod video;

pub use error::{Error, Result};
