//! Pure state machine for the recording session lifecycle.
//!
//! Implemented as a pure function `(State, Event) -> (NewState, Vec<SideEffect>)`.
//! The coordinator executes the side effects; the state machine itself never
//! performs I/O. Invalid transitions return the current state with no
//! effects, which is what makes stray control commands silent no-ops.

use std::time::{Duration, Instant};

/// Why a session is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Manual,
    AutoStop,
}

/// Recording session states. Each variant carries only the data that state
/// needs, so e.g. a `pausedAt` cannot exist outside `Paused`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingState {
    /// No session; ready to start.
    Idle,
    /// Start accepted, hardware setup in progress.
    Starting { started_at: Instant },
    /// Actively capturing.
    Recording {
        started_at: Instant,
        total_paused: Duration,
    },
    /// Capture suspended; elapsed-time accounting frozen.
    Paused {
        started_at: Instant,
        paused_at: Instant,
        total_paused: Duration,
    },
    /// Stop accepted, quiescing capture loops and tearing down hardware.
    Stopping {
        started_at: Instant,
        kind: StopKind,
    },
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// True in any non-Idle state. At most one session may be active
    /// system-wide; a start request while active is rejected.
    pub fn is_active(&self) -> bool {
        !matches!(self, RecordingState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, RecordingState::Paused { .. })
    }

    /// Recorded time so far: wall time since start minus paused time.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            RecordingState::Starting { started_at } => Some(started_at.elapsed()),
            RecordingState::Recording {
                started_at,
                total_paused,
            } => Some(started_at.elapsed().saturating_sub(*total_paused)),
            RecordingState::Paused {
                started_at,
                paused_at,
                total_paused,
            } => Some(
                paused_at
                    .duration_since(*started_at)
                    .saturating_sub(*total_paused),
            ),
            RecordingState::Stopping { started_at, .. } => Some(started_at.elapsed()),
            RecordingState::Idle => None,
        }
    }

    /// Accumulated paused time, excluding an open pause span.
    pub fn total_paused(&self) -> Duration {
        match self {
            RecordingState::Recording { total_paused, .. }
            | RecordingState::Paused { total_paused, .. } => *total_paused,
            _ => Duration::ZERO,
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self {
            RecordingState::Starting { started_at }
            | RecordingState::Recording { started_at, .. }
            | RecordingState::Paused { started_at, .. }
            | RecordingState::Stopping { started_at, .. } => Some(*started_at),
            RecordingState::Idle => None,
        }
    }
}

/// Events driving the state machine.
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    StartRequested,
    /// Hardware setup finished; capture loops are running.
    SetupComplete,
    /// Hardware setup failed; partially acquired resources were released.
    SetupFailed { error: String },
    PauseRequested,
    ResumeRequested,
    StopRequested { kind: StopKind },
    /// Capture loops quiesced and hardware released.
    TeardownComplete,
}

/// Side effects returned by `transition()` for the coordinator to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Allocate output paths, start capture units, schedule auto-stop.
    BeginSetup,
    /// Report the setup failure and reset.
    NotifySetupFailed { error: String },
    /// Freeze capture: pause flags, clock, suspend the auto-stop countdown.
    PauseUnits,
    /// Unfreeze capture and reschedule the remaining auto-stop time.
    ResumeUnits,
    /// Cancel timers, stop capture units, join loops, release hardware.
    QuiesceUnits { kind: StopKind },
    /// Hand the finished session to the post-processing pipeline.
    LaunchPostProcessing { kind: StopKind },
    /// Publish a state snapshot to observers.
    EmitState,
}

/// Pure state transition function. Invalid transitions return the current
/// state with no effects.
pub fn transition(
    state: RecordingState,
    event: RecordingEvent,
) -> (RecordingState, Vec<SideEffect>) {
    match (&state, event) {
        (RecordingState::Idle, RecordingEvent::StartRequested) => {
            let new_state = RecordingState::Starting {
                started_at: Instant::now(),
            };
            (new_state, vec![SideEffect::BeginSetup, SideEffect::EmitState])
        }

        (RecordingState::Starting { .. }, RecordingEvent::SetupComplete) => {
            let new_state = RecordingState::Recording {
                started_at: Instant::now(),
                total_paused: Duration::ZERO,
            };
            (new_state, vec![SideEffect::EmitState])
        }

        (RecordingState::Starting { .. }, RecordingEvent::SetupFailed { error }) => (
            RecordingState::Idle,
            vec![
                SideEffect::NotifySetupFailed { error },
                SideEffect::EmitState,
            ],
        ),

        (
            RecordingState::Recording {
                started_at,
                total_paused,
            },
            RecordingEvent::PauseRequested,
        ) => {
            let new_state = RecordingState::Paused {
                started_at: *started_at,
                paused_at: Instant::now(),
                total_paused: *total_paused,
            };
            (new_state, vec![SideEffect::PauseUnits, SideEffect::EmitState])
        }

        (
            RecordingState::Paused {
                started_at,
                paused_at,
                total_paused,
            },
            RecordingEvent::ResumeRequested,
        ) => {
            let new_state = RecordingState::Recording {
                started_at: *started_at,
                total_paused: *total_paused + paused_at.elapsed(),
            };
            (
                new_state,
                vec![SideEffect::ResumeUnits, SideEffect::EmitState],
            )
        }

        (
            RecordingState::Recording { started_at, .. }
            | RecordingState::Paused { started_at, .. },
            RecordingEvent::StopRequested { kind },
        ) => {
            let new_state = RecordingState::Stopping {
                started_at: *started_at,
                kind,
            };
            (
                new_state,
                vec![
                    SideEffect::QuiesceUnits { kind },
                    SideEffect::EmitState,
                ],
            )
        }

        (RecordingState::Stopping { kind, .. }, RecordingEvent::TeardownComplete) => {
            let kind = *kind;
            (
                RecordingState::Idle,
                vec![
                    SideEffect::LaunchPostProcessing { kind },
                    SideEffect::EmitState,
                ],
            )
        }

        // Everything else is a silent no-op: double pause, resume while
        // recording, stop while idle, stray control messages.
        _ => (state, vec![]),
    }
}
