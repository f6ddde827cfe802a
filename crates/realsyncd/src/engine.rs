use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use realsync_core::{AnalyzeError, FrameResponse, TrustPipeline};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
    #[error("frame analysis panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// True when the request itself was unusable, as opposed to an engine fault.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, EngineError::Analyze(_))
    }
}

/// Messages sent from D-Bus handlers to the worker threads.
enum EngineRequest {
    Analyze {
        request_id: Uuid,
        session_id: String,
        payload: Vec<u8>,
        captured_at: Option<String>,
        reply: oneshot::Sender<Result<FrameResponse, EngineError>>,
    },
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue one frame for analysis and wait for its response.
    ///
    /// Waits for queue capacity when all workers are busy.
    pub async fn analyze(
        &self,
        session_id: String,
        payload: Vec<u8>,
        captured_at: Option<String>,
    ) -> Result<FrameResponse, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                request_id: Uuid::new_v4(),
                session_id,
                payload,
                captured_at,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn `workers` OS threads that pull frames from one bounded queue.
///
/// Model inference is CPU-bound and blocking, so it never runs on the
/// async runtime. All workers share the same pipeline; its identity
/// tracker serialises updates per session.
pub fn spawn_engine(
    pipeline: Arc<TrustPipeline>,
    workers: usize,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for index in 0..workers.max(1) {
        let rx = Arc::clone(&rx);
        let pipeline = Arc::clone(&pipeline);
        std::thread::Builder::new()
            .name(format!("realsync-worker-{index}"))
            .spawn(move || worker_loop(index, &rx, &pipeline))?;
    }
    tracing::info!(workers, queue_depth, "engine workers started");

    Ok(EngineHandle { tx })
}

fn worker_loop(
    index: usize,
    rx: &Mutex<mpsc::Receiver<EngineRequest>>,
    pipeline: &TrustPipeline,
) {
    tracing::debug!(worker = index, "worker thread started");
    loop {
        // Only one idle worker waits on the channel at a time.
        let next = rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocking_recv();
        let Some(req) = next else { break };

        match req {
            EngineRequest::Analyze {
                request_id,
                session_id,
                payload,
                captured_at,
                reply,
            } => {
                let span = tracing::info_span!(
                    "analyze",
                    worker = index,
                    request_id = %request_id,
                    session_id = %session_id
                );
                let _guard = span.enter();
                // A panic must not take the worker down with it.
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.analyze_frame(&session_id, &payload, captured_at.as_deref())
                }))
                .map_err(|cause| EngineError::Panicked(panic_message(cause.as_ref())))
                .and_then(|r| r.map_err(EngineError::from));
                match &result {
                    Err(e @ EngineError::Panicked(_)) => {
                        tracing::error!(error = %e, "frame analysis panicked")
                    }
                    Err(e) => tracing::warn!(error = %e, "rejected frame"),
                    Ok(_) => {}
                }
                if reply.send(result).is_err() {
                    tracing::debug!("caller went away before the reply");
                }
            }
        }
    }
    tracing::debug!(worker = index, "worker thread exiting");
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    cause
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| cause.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
