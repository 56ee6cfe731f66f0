use attend_core::crop::extract_face_crop;
use attend_core::{
    Detection, EnrollmentRecord, EuclideanMatcher, Identification, Matcher, DEFAULT_TOLERANCE,
};
use attend_media::{Frame, SourceError, SourceMetadata};
use attend_store::{Ledger, MarkMode, MarkOutcome, ReviewArtifact, ReviewSink, StoreError};
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Finished,
}

/// Which decoded frames get analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// Live camera: every frame.
    EveryFrame,
    /// Video: frame `i` iff `i % round(fps) == 0`, about one per second.
    OncePerSecond,
}

/// Accepted video length, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationBounds {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DurationBounds {
    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.min_secs && secs <= self.max_secs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub tolerance: f64,
    pub mode: MarkMode,
    pub sampling: SamplingPolicy,
    /// Checked against the source duration at start; `None` skips the check.
    pub duration: Option<DurationBounds>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            mode: MarkMode::OncePerDay,
            sampling: SamplingPolicy::EveryFrame,
            duration: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no faces enrolled; enroll at least one person before starting a session")]
    EmptyGallery,
    #[error("cannot open frame source: {0}")]
    Source(#[from] SourceError),
    #[error("video is {duration:.1}s long; allowed range is {min:.1}s to {max:.1}s")]
    DurationOutOfRange { duration: f64, min: f64, max: f64 },
    #[error("storage unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("session is {actual:?}, expected {expected:?}")]
    WrongState {
        expected: SessionState,
        actual: SessionState,
    },
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
    #[error("session thread exited without a result")]
    ChannelClosed,
}

/// What happened to a single detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Marked { identity: String },
    /// Marked earlier in this session or already present in the ledger.
    AlreadyMarked { identity: String },
    /// Recognized, but the ledger could not record the mark.
    MarkFailed { identity: String },
    /// No gallery entry within tolerance. `artifact` is `None` when the
    /// crop was empty or could not be written.
    Unknown { artifact: Option<ReviewArtifact> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkedPerson {
    pub identity: String,
    pub time: NaiveTime,
    /// Source index of the frame the mark came from.
    pub frame: usize,
}

/// Totals accumulated over one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub frames_processed: usize,
    pub faces_detected: usize,
    pub newly_marked: Vec<MarkedPerson>,
    pub unrecognized_faces: usize,
    pub mark_failures: usize,
    pub artifacts: Vec<ReviewArtifact>,
    /// The session stopped before its source was exhausted.
    pub cancelled: bool,
    /// Set when a frame read failed and the run ended early on it.
    pub source_error: Option<String>,
}

impl SessionSummary {
    pub fn people_marked(&self) -> usize {
        self.newly_marked.len()
    }

    pub fn artifacts_saved(&self) -> usize {
        self.artifacts.len()
    }
}

/// One attendance run over a live camera or a single video.
///
/// `Idle` → [`start`](Self::start) → `Running` → [`finish`](Self::finish) →
/// `Finished`. Marks written while running are never rolled back.
///
/// Dedup happens in two layers: a session-local set of identities marked
/// by this run, consulted first, and the ledger's persisted check.
pub struct AttendanceSession {
    state: SessionState,
    options: SessionOptions,
    matcher: Box<dyn Matcher + Send>,
    ledger: Ledger,
    sink: ReviewSink,
    gallery: Vec<EnrollmentRecord>,
    recognized: HashSet<String>,
    summary: SessionSummary,
    date: NaiveDate,
    frame_interval: usize,
}

impl AttendanceSession {
    pub fn new(ledger: Ledger, sink: ReviewSink, options: SessionOptions) -> Self {
        Self {
            state: SessionState::Idle,
            options,
            matcher: Box::new(EuclideanMatcher),
            ledger,
            sink,
            gallery: Vec::new(),
            recognized: HashSet::new(),
            summary: SessionSummary::default(),
            date: Local::now().date_naive(),
            frame_interval: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Takes effect from the next detection; the gallery is not reloaded.
    pub fn set_tolerance(&mut self, tolerance: f64) {
        tracing::info!(old = self.options.tolerance, new = tolerance, "tolerance changed");
        self.options.tolerance = tolerance;
    }

    /// Start marking attendance for today.
    pub fn start(
        &mut self,
        gallery: Vec<EnrollmentRecord>,
        metadata: &SourceMetadata,
    ) -> Result<(), SessionError> {
        self.start_on(gallery, metadata, Local::now().date_naive())
    }

    /// Start marking attendance for `date`.
    ///
    /// Nothing changes on failure: the session stays `Idle`.
    pub fn start_on(
        &mut self,
        gallery: Vec<EnrollmentRecord>,
        metadata: &SourceMetadata,
        date: NaiveDate,
    ) -> Result<(), SessionError> {
        self.expect_state(SessionState::Idle)?;

        if gallery.is_empty() {
            return Err(SessionError::EmptyGallery);
        }

        if let Some(bounds) = self.options.duration {
            let duration = metadata.duration_secs();
            if !bounds.contains(duration) {
                return Err(SessionError::DurationOutOfRange {
                    duration,
                    min: bounds.min_secs,
                    max: bounds.max_secs,
                });
            }
        }

        self.frame_interval = match self.options.sampling {
            SamplingPolicy::EveryFrame => 1,
            SamplingPolicy::OncePerSecond => metadata.one_per_second_interval(),
        };
        self.gallery = gallery;
        self.date = date;
        self.state = SessionState::Running;

        tracing::info!(
            gallery = self.gallery.len(),
            %date,
            mode = %self.options.mode,
            tolerance = self.options.tolerance,
            frame_interval = self.frame_interval,
            "session started"
        );
        Ok(())
    }

    /// Whether the frame at `index` should be analyzed under the sampling policy.
    pub fn wants_frame(&self, index: usize) -> bool {
        index % self.frame_interval == 0
    }

    /// Resolve every detection in one frame. Each detection is handled on
    /// its own: a failed mark or unwritable crop does not affect the rest.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<Vec<DetectionOutcome>, SessionError> {
        self.expect_state(SessionState::Running)?;

        self.summary.frames_processed += 1;
        self.summary.faces_detected += detections.len();

        let mut outcomes = Vec::with_capacity(detections.len());
        for detection in detections {
            let identification =
                self.matcher
                    .identify(&detection.embedding, &self.gallery, self.options.tolerance);
            let outcome = match identification {
                Identification::Known {
                    identity, distance, ..
                } => {
                    tracing::debug!(identity = %identity, distance, frame = frame.index, "face recognized");
                    self.record_known(identity, frame.index)
                }
                Identification::Unknown { best_distance } => {
                    tracing::debug!(?best_distance, frame = frame.index, "face not recognized");
                    self.record_unknown(frame, detection)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Flag the run as stopped early. Already-applied marks stay.
    pub fn mark_cancelled(&mut self) {
        self.summary.cancelled = true;
    }

    /// Record why the source stopped delivering frames before its end.
    pub fn mark_source_failed(&mut self, reason: impl Into<String>) {
        self.summary.source_error = Some(reason.into());
    }

    pub fn finish(&mut self) -> Result<SessionSummary, SessionError> {
        self.expect_state(SessionState::Running)?;
        self.state = SessionState::Finished;

        let summary = std::mem::take(&mut self.summary);
        tracing::info!(
            frames = summary.frames_processed,
            faces = summary.faces_detected,
            marked = summary.people_marked(),
            unrecognized = summary.unrecognized_faces,
            artifacts = summary.artifacts_saved(),
            cancelled = summary.cancelled,
            source_error = ?summary.source_error,
            "session finished"
        );
        Ok(summary)
    }

    fn record_known(&mut self, identity: String, frame_index: usize) -> DetectionOutcome {
        if self.recognized.contains(&identity) {
            return DetectionOutcome::AlreadyMarked { identity };
        }

        let now = Local::now().time();
        match self.ledger.mark_at(&identity, self.date, now, self.options.mode) {
            MarkOutcome::Marked => {
                self.recognized.insert(identity.clone());
                self.summary.newly_marked.push(MarkedPerson {
                    identity: identity.clone(),
                    time: now.with_nanosecond(0).unwrap_or(now),
                    frame: frame_index,
                });
                DetectionOutcome::Marked { identity }
            }
            MarkOutcome::AlreadyMarked => DetectionOutcome::AlreadyMarked { identity },
            MarkOutcome::Failed => {
                self.summary.mark_failures += 1;
                DetectionOutcome::MarkFailed { identity }
            }
        }
    }

    fn record_unknown(&mut self, frame: &Frame, detection: &Detection) -> DetectionOutcome {
        self.summary.unrecognized_faces += 1;

        let Some(crop) = extract_face_crop(&frame.image, &detection.bbox) else {
            return DetectionOutcome::Unknown { artifact: None };
        };

        match self.sink.store(&crop, frame.index) {
            Ok(artifact) => {
                self.summary.artifacts.push(artifact.clone());
                DetectionOutcome::Unknown {
                    artifact: Some(artifact),
                }
            }
            Err(e) => {
                tracing::warn!(frame = frame.index, error = %e, "failed to store review artifact");
                DetectionOutcome::Unknown { artifact: None }
            }
        }
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::WrongState {
                expected,
                actual: self.state,
            })
        }
    }
}
