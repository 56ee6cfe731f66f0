//! attend-store — Persistence for the attendance pipeline.
//!
//! A single [`Database`] service owns both SQLite stores (face gallery and
//! attendance ledger). Each logical operation opens its own connection and
//! releases it on return, success or failure. Review-sink artifacts live
//! on the filesystem.

pub mod db;
pub mod gallery;
pub mod ledger;
pub mod review;

pub use db::{Database, StoreError};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{AttendanceEvent, AttendanceSummary, Ledger, MarkMode, MarkOutcome};
pub use review::{ReviewArtifact, ReviewError, ReviewSink};
