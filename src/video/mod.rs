pub mod mjpeg_sink;
pub mod overlay;
pub mod sink;

pub use mjpeg_sink::MjpegSink;
pub use overlay::draw_overlay;
pub use sink::VideoSink;
