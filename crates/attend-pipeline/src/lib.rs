//! attend-pipeline — Frame attendance sessions.
//!
//! Routes each detection through the matcher, marks recognized people in
//! the ledger, and hands unrecognized faces to the review sink.

pub mod config;
pub mod engine;
pub mod session;

pub use config::{Config, ConfigError};
pub use engine::{run_session, spawn_video_session, SessionHandle};
pub use session::{
    AttendanceSession, DetectionOutcome, DurationBounds, MarkedPerson, SamplingPolicy,
    SessionError, SessionOptions, SessionState, SessionSummary,
};
