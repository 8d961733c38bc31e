pub mod audio;
pub mod video;

pub use audio::AudioCaptureUnit;
pub use video::{DrainOutcome, VideoCaptureEncodeUnit};
