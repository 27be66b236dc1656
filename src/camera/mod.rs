pub mod arbiter;
pub mod backend;
pub mod test_pattern;
#[cfg(feature = "v4l")]
pub mod v4l;

pub use arbiter::{CameraArbiter, DeviceHolder};
pub use backend::{CameraBackend, FrameSource, Resolution};
pub use test_pattern::TestPatternBackend;
#[cfg(feature = "v4l")]
pub use self::v4l::V4lBackend;

use crate::config::{CameraBackendKind, CameraConfig};
use std::sync::Arc;

/// Build the backend selected in the configuration
pub fn backend_from_config(config: &CameraConfig) -> crate::Result<Arc<dyn CameraBackend>> {
    match config.backend {
        CameraBackendKind::TestPattern => Ok(Arc::new(TestPatternBackend::new())),
        #[cfg(feature = "v4l")]
        CameraBackendKind::V4l => Ok(Arc::new(V4lBackend::new(&config.device_path))),
        #[cfg(not(feature = "v4l"))]
        CameraBackendKind::V4l => Err(crate::Error::DeviceUnavailable(
            "built without the v4l feature".to_string(),
        )),
    }
}
