pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod mock;
pub mod protocol;
pub mod recovery;
pub mod remote;
pub mod session;
pub mod wait;

pub use capture::{shared_source, CaptureSource, SharedSource};
pub use config::StbtConfig;
pub use engine::{ImageEngine, MatchReference, NullEngine};
pub use error::{Result, StbtError, TransportError, UiTestFailure};
pub use events::{
    DetectionBus, DetectionEvent, EventFilter, EventReceiver, HealthReceiver, MatchEvent,
    MotionEvent, Received, TransportHealthEvent,
};
pub use frame::{Frame, FrameFormat, Position};
pub use recovery::{RecoveryAction, RecoveryController, RecoveryState};
pub use remote::{uri_to_remote, uri_to_remote_recorder, KeyStream, RemoteControl};
pub use session::{BlockingSession, Session, SessionBuilder};
pub use wait::{MatchParameters, MotionParameters, WaitClock, WaitEngine, WaitResult};
