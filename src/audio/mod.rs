pub mod buffer;
pub mod frame;
pub mod stream;

pub use buffer::{AudioCapture, RingBuffer};
pub use frame::{AudioClip, AudioFrame};
pub use stream::spawn_frame_pump;
