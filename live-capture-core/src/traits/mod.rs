pub mod audio_device;
pub mod camera_source;
pub mod encoder;
pub mod gpu;
pub mod renderer;
pub mod sinks;
