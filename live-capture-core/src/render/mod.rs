pub mod fps_limiter;
pub mod frame_signal;
pub mod render_thread;
