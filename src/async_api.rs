use crate::pipeline::{self, CaptureResult, PipelineSettings};
use crate::session::SessionFactory;
use crate::{CaptureRequest, Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};

/// Extra time the async side waits past a request's own budget before giving
/// up on its worker.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// An async-friendly capture facade backed by one worker thread per request.
///
/// Each capture runs the blocking pipeline on a dedicated thread that owns its
/// browser session end-to-end and reports back through a oneshot channel, so
/// async callers never block the runtime and no session is shared between
/// requests. A semaphore bounds how many sessions are open at once.
#[derive(Clone)]
pub struct CaptureService {
    factory: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
    settings: PipelineSettings,
}

impl CaptureService {
    pub fn new(factory: Arc<dyn SessionFactory>, max_sessions: usize, settings: PipelineSettings) -> Self {
        Self {
            factory,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            settings,
        }
    }

    /// Number of sessions that could be opened right now without waiting.
    pub fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    /// Capture one page. Waits for a free session slot first.
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult> {
        let budget = request.timeout;
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Capture service closed: {}", e)))?;

        let (tx, rx) = oneshot::channel::<Result<CaptureResult>>();
        let factory = self.factory.clone();
        let settings = self.settings.clone();

        thread::Builder::new()
            .name("rfshot-capture".to_string())
            .spawn(move || {
                let res = pipeline::capture(factory.as_ref(), &request, &settings);
                // The slot frees only once the session is closed
                drop(permit);
                let _ = tx.send(res);
            })
            .map_err(|e| Error::Other(format!("Failed to spawn capture worker: {}", e)))?;

        match tokio::time::timeout(budget + TIMEOUT_GRACE, rx).await {
            Ok(res) => res.map_err(|e| Error::Other(format!("Capture canceled: {}", e)))?,
            Err(_) => Err(Error::Timeout(budget.as_millis() as u64)),
        }
    }
}
