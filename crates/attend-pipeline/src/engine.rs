use crate::session::{AttendanceSession, SessionError, SessionOptions, SessionSummary};
use attend_media::{FaceAnalyzer, FrameSource};
use attend_store::{Database, ReviewSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Handle to a session running on its own thread.
pub struct SessionHandle {
    cancel: Arc<AtomicBool>,
    result: oneshot::Receiver<Result<SessionSummary, SessionError>>,
}

impl SessionHandle {
    /// Ask the session to stop after the frame it is on. Marks already
    /// written stay in the ledger.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn wait(self) -> Result<SessionSummary, SessionError> {
        self.result.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Must not be called from inside an async runtime.
    pub fn blocking_wait(self) -> Result<SessionSummary, SessionError> {
        self.result
            .blocking_recv()
            .map_err(|_| SessionError::ChannelClosed)?
    }
}

/// Run a whole session on the calling thread.
///
/// `should_stop` is polled before every frame; returning `true` ends the
/// session with `cancelled` set in the summary.
pub fn run_session(
    db: &Database,
    options: SessionOptions,
    sink: ReviewSink,
    source: &mut dyn FrameSource,
    analyzer: &mut dyn FaceAnalyzer,
    should_stop: &dyn Fn() -> bool,
) -> Result<SessionSummary, SessionError> {
    let mut session = AttendanceSession::new(db.ledger(), sink, options);
    start_session(db, &mut session, source)?;
    drive(&mut session, source, analyzer, should_stop)
}

/// Spawn a video session on a dedicated OS thread.
///
/// Loads the gallery, opens the source and validates its duration
/// synchronously, so an empty gallery, unreadable source, or out-of-range
/// video fails here before any thread exists.
pub fn spawn_video_session(
    db: &Database,
    options: SessionOptions,
    sink: ReviewSink,
    mut source: Box<dyn FrameSource>,
    mut analyzer: Box<dyn FaceAnalyzer>,
) -> Result<SessionHandle, SessionError> {
    let mut session = AttendanceSession::new(db.ledger(), sink, options);
    start_session(db, &mut session, source.as_mut())?;

    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();

    let flag = Arc::clone(&cancel);
    std::thread::Builder::new()
        .name("attend-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            let should_stop = || flag.load(Ordering::Relaxed);
            let result = drive(&mut session, source.as_mut(), analyzer.as_mut(), &should_stop);
            let _ = tx.send(result);
            tracing::info!("session thread exiting");
        })
        .map_err(SessionError::Spawn)?;

    Ok(SessionHandle { cancel, result: rx })
}

fn start_session(
    db: &Database,
    session: &mut AttendanceSession,
    source: &mut dyn FrameSource,
) -> Result<(), SessionError> {
    let gallery = db.gallery().load()?;
    if gallery.is_empty() {
        return Err(SessionError::EmptyGallery);
    }

    let metadata = source.open()?;
    tracing::info!(
        fps = metadata.fps,
        frames = metadata.frame_count,
        width = metadata.width,
        height = metadata.height,
        "frame source opened"
    );
    session.start(gallery, &metadata)
}

fn drive(
    session: &mut AttendanceSession,
    source: &mut dyn FrameSource,
    analyzer: &mut dyn FaceAnalyzer,
    should_stop: &dyn Fn() -> bool,
) -> Result<SessionSummary, SessionError> {
    loop {
        if should_stop() {
            tracing::info!("session cancelled");
            session.mark_cancelled();
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed; ending session");
                session.mark_source_failed(e.to_string());
                break;
            }
        };

        if !session.wants_frame(frame.index) {
            continue;
        }

        let detections = match analyzer.detect_and_embed(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(frame = frame.index, error = %e, "face analysis failed; skipping frame");
                Vec::new()
            }
        };
        session.process_frame(&frame, &detections)?;
    }

    session.finish()
}
