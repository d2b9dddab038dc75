//! Session lifecycle and frame loop.
//!
//! A session owns exactly one driver. Status moves one way only:
//! connecting → connected → {disconnected, error}; once a terminal state is
//! reached the session is done and a new one must be created. All
//! driver-touching operations go through one async mutex, so concurrent
//! callers are serialized per session and the driver's protocol state stays
//! single-writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::driver::{self, Driver};
use crate::error::{Error, Result};
use crate::input::InputEvent;
use crate::ocr::{self, FindOptions, OcrEngine, OcrResult, TextMatch};
use crate::types::{BackendKind, Frame, SessionStatus, Viewport};
use crate::vision::{VisionPlan, VisionPlanner};

/// Events emitted to subscribers: a frame on every successful loop tick, a
/// status value on every transition.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame(Frame),
    Status(SessionStatus),
}

pub struct Session {
    id: Uuid,
    kind: BackendKind,
    label: Option<String>,
    read_only: bool,
    status: StdMutex<SessionStatus>,
    viewport: StdMutex<Viewport>,
    driver: Mutex<Box<dyn Driver>>,
    ocr: OcrEngine,
    planner: VisionPlanner,
    events: broadcast::Sender<SessionEvent>,
    shutdown: Notify,
    closed: AtomicBool,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create the driver, connect, and start the frame loop.
    ///
    /// A failed connect moves the session to the error state, emits the
    /// status, and re-raises the error; no frame is ever emitted.
    pub async fn start(config: SessionConfig) -> Result<Arc<Self>> {
        let driver = driver::create_driver(&config)?;
        Self::start_with(config, driver).await
    }

    async fn start_with(config: SessionConfig, driver: Box<dyn Driver>) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(32);
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            kind: config.kind,
            label: config.label.clone(),
            read_only: config.read_only,
            status: StdMutex::new(SessionStatus::Connecting),
            viewport: StdMutex::new(config.viewport.unwrap_or_default()),
            driver: Mutex::new(driver),
            ocr: OcrEngine::new(config.ocr_command.clone()),
            planner: VisionPlanner::new(&config.vision),
            events,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            loop_handle: StdMutex::new(None),
        });

        let connect_result = { session.driver.lock().await.connect().await };
        match connect_result {
            Ok(()) => {
                info!("session {} connected ({})", session.id, session.kind);
                session.set_status(SessionStatus::Connected);
                session.spawn_frame_loop(config.frame_interval_ms.max(1));
                Ok(session)
            }
            Err(e) => {
                warn!("session {} failed to connect: {}", session.id, e);
                session.set_status(SessionStatus::Error);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock().unwrap()
    }

    /// Subscribe to frame/status events. Slow receivers may miss frames.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status;
        let _ = self.events.send(SessionEvent::Status(status));
    }

    /// Adopt the driver-reported size whenever it disagrees with ours.
    fn adopt_viewport(&self, frame: &Frame) {
        let reported = frame.viewport();
        let mut current = self.viewport.lock().unwrap();
        if *current != reported {
            debug!(
                "session {} viewport {}x{} -> {}x{}",
                self.id, current.width, current.height, reported.width, reported.height
            );
            *current = reported;
        }
    }

    fn spawn_frame_loop(self: &Arc<Self>, interval_ms: u64) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            // Skip rather than queue when a capture overruns the interval.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = session.shutdown.notified() => break,
                    _ = ticker.tick() => {
                        if session.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        let hint = session.viewport();
                        let captured = {
                            session.driver.lock().await.capture_frame(Some(hint)).await
                        };
                        match captured {
                            Ok(frame) => {
                                session.adopt_viewport(&frame);
                                let _ = session.events.send(SessionEvent::Frame(frame));
                            }
                            // Capture failures never change session status.
                            Err(e) => warn!("session {} capture failed: {}", session.id, e),
                        }
                    }
                }
            }
            debug!("session {} frame loop stopped", session.id);
        });
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    /// One capture outside the loop's cadence. Updates the recorded
    /// viewport exactly like the loop path.
    pub async fn snapshot(&self) -> Result<Frame> {
        if self.status() != SessionStatus::Connected {
            return Err(Error::Capture(format!("session is {}", self.status())));
        }
        let hint = self.viewport();
        let frame = self.driver.lock().await.capture_frame(Some(hint)).await?;
        self.adopt_viewport(&frame);
        Ok(frame)
    }

    /// Fresh capture plus OCR aggregation.
    pub async fn ocr_snapshot(&self) -> Result<OcrResult> {
        let frame = self.snapshot().await?;
        self.ocr.recognize(&frame).await
    }

    /// Fresh capture, OCR, then search over the aggregated result.
    pub async fn find_text(&self, query: &str, options: &FindOptions) -> Result<Vec<TextMatch>> {
        let result = self.ocr_snapshot().await?;
        ocr::find_text(&result, query, options)
    }

    /// Fresh capture handed to the vision planner with the given goal.
    pub async fn vision_plan(&self, goal: &str) -> Result<VisionPlan> {
        let frame = self.snapshot().await?;
        self.planner.plan(&frame, goal).await
    }

    /// Route one input event to the driver. Read-only sessions drop the
    /// event with a warning and still resolve successfully.
    pub async fn send_input(&self, event: &InputEvent) -> Result<()> {
        if self.read_only {
            warn!(
                "read-only session {} dropping {} event",
                self.id,
                event.label()
            );
            return Ok(());
        }
        if self.status() != SessionStatus::Connected {
            return Err(Error::Input(format!("session is {}", self.status())));
        }
        self.driver.lock().await.send_input(event).await
    }

    pub async fn set_clipboard(&self, text: &str) -> Result<()> {
        if self.read_only {
            warn!("read-only session {} dropping clipboard update", self.id);
            return Ok(());
        }
        if self.status() != SessionStatus::Connected {
            return Err(Error::Input(format!("session is {}", self.status())));
        }
        self.driver.lock().await.set_clipboard(text).await
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.driver.lock().await.set_viewport(viewport).await?;
        *self.viewport.lock().unwrap() = viewport;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        self.driver.lock().await.health_check().await
    }

    /// Stop the frame loop, disconnect the driver, and emit the
    /// disconnected status. Idempotent: the second call is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.notify_one();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(e) = self.driver.lock().await.disconnect().await {
            warn!("session {} disconnect failed: {}", self.id, e);
        }
        self.set_status(SessionStatus::Disconnected);
        info!("session {} closed", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn mock_config() -> SessionConfig {
        SessionConfig::new(BackendKind::Mock)
    }

    /// Test driver that fails every capture and counts input calls.
    struct FlakyDriver {
        input_calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Driver for FlakyDriver {
        fn kind(&self) -> BackendKind {
            BackendKind::Mock
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn capture_frame(&mut self, _hint: Option<Viewport>) -> Result<Frame> {
            Err(Error::Capture("simulated failure".into()))
        }

        async fn send_input(&mut self, _event: &InputEvent) -> Result<()> {
            self.input_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn set_clipboard(&mut self, _text: &str) -> Result<()> {
            self.input_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
            Ok(())
        }

        async fn health_check(&mut self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn capture_failures_never_change_status() {
        let mut config = mock_config();
        config.frame_interval_ms = 10;
        let driver = Box::new(FlakyDriver { input_calls: Arc::new(AtomicU32::new(0)) });
        let session = Session::start_with(config, driver).await.unwrap();

        let mut events = session.subscribe();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.status(), SessionStatus::Connected);
        // failed ticks emit nothing: no frames, no status transitions
        assert!(events.try_recv().is_err());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn read_only_session_never_touches_the_driver() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = mock_config();
        config.read_only = true;
        let driver = Box::new(FlakyDriver { input_calls: Arc::clone(&calls) });
        let session = Session::start_with(config, driver).await.unwrap();

        session
            .send_input(&InputEvent::Text { text: "blocked".into() })
            .await
            .unwrap();
        session.set_clipboard("blocked").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn mock_session_connects_and_closes() {
        let session = Session::start(mock_config()).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Connected);
        session.close().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn snapshot_adopts_driver_viewport() {
        let mut config = mock_config();
        config.viewport = Some(Viewport::new(320, 200));
        let session = Session::start(config).await.unwrap();
        let frame = session.snapshot().await.unwrap();
        assert_eq!(frame.width, 320);
        assert_eq!(session.viewport(), Viewport::new(320, 200));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_after_close_is_a_capture_error() {
        let session = Session::start(mock_config()).await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(
            session.snapshot().await,
            Err(Error::Capture(_))
        ));
    }
}
