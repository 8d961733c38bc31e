pub mod coordinator;
pub mod state;

pub use coordinator::{
    ControlCommand, Recorder, RecorderHandle, RecordingStatus, SessionEvent, SessionInfo,
};
pub use state::{RecordingState, StopKind};
