use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::controller::RunHandle;
use crate::core::reporter::ProgressEvent;
use crate::core::{FormatMode, RunOutcome, Stage, VolumeRequest};
use crate::platform::linux::{LinuxVolumeProbe, VolumeStatus};

/// What the progress dialog currently shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Starting,
    InProgress(Stage),
    Error(String),
    Success(String),
}

/// Main application state
pub struct App {
    pub volumes: Vec<VolumeStatus>,
    pub target: String,
    pub state: AppState,
    pub privileged: bool,
    /// Whether Esc may cancel the run
    pub cancellable: bool,
    pub outcome: Option<RunOutcome>,
    pub should_quit: bool,
    pub tick: u64,
    mode: FormatMode,
    probe: Arc<LinuxVolumeProbe>,
    progress_rx: UnboundedReceiver<ProgressEvent>,
    handle: Option<RunHandle>,
}

impl App {
    pub fn new(
        request: &VolumeRequest,
        privileged: bool,
        probe: Arc<LinuxVolumeProbe>,
        progress_rx: UnboundedReceiver<ProgressEvent>,
    ) -> Self {
        Self {
            volumes: Vec::new(),
            target: request.target_path.clone(),
            state: AppState::Starting,
            privileged,
            cancellable: !request.always_reset,
            outcome: None,
            should_quit: false,
            tick: 0,
            mode: request.mode,
            probe,
            progress_rx,
            handle: None,
        }
    }

    pub fn attach(&mut self, handle: RunHandle) {
        self.handle = Some(handle);
    }

    pub async fn refresh_volumes(&mut self) {
        self.volumes = self.probe.status().await;
    }

    /// Applies every pending progress event
    pub fn drain_progress(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.progress_rx.try_recv() {
            self.apply(event);
            changed = true;
        }
        changed
    }

    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage(stage) => {
                // Erasing can no longer be interrupted
                if stage == Stage::Erasing {
                    self.cancellable = false;
                }
                self.state = AppState::InProgress(stage);
            }
            ProgressEvent::Failure(reason) => {
                self.state = AppState::Error(reason.message().to_string());
            }
            ProgressEvent::Finished(outcome) => {
                self.outcome = Some(outcome);
                self.cancellable = false;
                match outcome {
                    RunOutcome::Success => {
                        let msg = match self.mode {
                            FormatMode::FormatOnly => format!("Erased {}", self.target),
                            FormatMode::FormatAndFactoryReset => {
                                format!("Erased {}. Factory reset requested.", self.target)
                            }
                        };
                        self.state = AppState::Success(msg);
                    }
                    RunOutcome::Cancelled => {
                        self.state = AppState::Success("Cancelled. Nothing was erased.".to_string());
                    }
                    RunOutcome::Failed => {
                        // Keep the reason reported earlier, if any
                        if !matches!(self.state, AppState::Error(_)) {
                            self.state = AppState::Error("The run failed.".to_string());
                        }
                    }
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn cancel(&mut self) {
        if !self.cancellable {
            return;
        }
        if let Some(handle) = &self.handle {
            tracing::info!("Cancel requested for {}", handle.target());
            handle.cancel();
            self.cancellable = false;
        }
    }

    /// Stops the run when the dialog cannot go on. Cancels it if formatting
    /// has not started, then waits until its resources are released.
    pub async fn abandon(&mut self) -> Option<RunOutcome> {
        let handle = self.handle.take()?;
        tracing::warn!("Dialog closed early, stopping run for {}", handle.target());
        handle.cancel();
        Some(handle.wait().await)
    }

    /// Joins the run task once it has reported its outcome
    pub async fn finish(&mut self) -> RunOutcome {
        match self.handle.take() {
            Some(handle) => handle.wait().await,
            None => self.outcome.unwrap_or(RunOutcome::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::controller::VolumeLifecycleController;
    use crate::core::coupling::CouplingTable;
    use crate::core::probe::{Subscribers, Subscription, VolumeStateProbe};
    use crate::core::reporter::ChannelReporter;
    use crate::core::signals::{KeepAlive, KeepAliveGuard, WipeSignal};
    use crate::core::volume_ops::VolumeService;
    use crate::core::{FailureReason, ServiceError, VolumeState};

    /// Storage whose calls succeed without the volume ever changing state
    struct StuckStorage {
        subscribers: Subscribers,
    }

    #[async_trait]
    impl VolumeService for StuckStorage {
        async fn mount(&self, _path: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn unmount(&self, _path: &str, _force: bool) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn format(&self, _path: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        fn has_privileges(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl VolumeStateProbe for StuckStorage {
        async fn state(&self, _path: &str) -> VolumeState {
            VolumeState::Mounted
        }

        fn subscribe(&self) -> Subscription {
            self.subscribers.subscribe()
        }
    }

    struct NoWipe;

    impl WipeSignal for NoWipe {
        fn request_factory_reset(&self) {}
    }

    struct CountingKeepAlive {
        released: Arc<AtomicUsize>,
    }

    impl KeepAlive for CountingKeepAlive {
        fn acquire(&self, _reason: &str) -> KeepAliveGuard {
            let released = self.released.clone();
            KeepAliveGuard::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn app(mode: FormatMode, always_reset: bool) -> App {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let probe = Arc::new(LinuxVolumeProbe::new(
            Arc::new(Vec::new()),
            std::time::Duration::from_millis(100),
        ));
        App::new(
            &VolumeRequest::new("/mnt/sdcard", mode, always_reset),
            true,
            probe,
            rx,
        )
    }

    #[test]
    fn erasing_disables_cancel() {
        let mut app = app(FormatMode::FormatOnly, false);
        assert!(app.cancellable);

        app.apply(ProgressEvent::Stage(Stage::Unmounting));
        assert!(app.cancellable);

        app.apply(ProgressEvent::Stage(Stage::Erasing));
        assert!(!app.cancellable);
        assert_eq!(app.state, AppState::InProgress(Stage::Erasing));
    }

    #[test]
    fn always_reset_never_offers_cancel() {
        let app = app(FormatMode::FormatAndFactoryReset, true);
        assert!(!app.cancellable);
    }

    #[test]
    fn failure_reason_survives_finish() {
        let mut app = app(FormatMode::FormatOnly, false);
        app.apply(ProgressEvent::Failure(FailureReason::Shared));
        app.apply(ProgressEvent::Finished(RunOutcome::Failed));

        assert_eq!(
            app.state,
            AppState::Error(FailureReason::Shared.message().to_string())
        );
        assert_eq!(app.outcome, Some(RunOutcome::Failed));
        assert!(app.is_finished());
    }

    #[test]
    fn success_message_mentions_factory_reset() {
        let mut app = app(FormatMode::FormatAndFactoryReset, false);
        app.apply(ProgressEvent::Finished(RunOutcome::Success));

        match &app.state {
            AppState::Success(msg) => assert!(msg.contains("Factory reset")),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abandon_stops_a_waiting_run_and_releases_keep_alive() {
        let storage = Arc::new(StuckStorage {
            subscribers: Subscribers::default(),
        });
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let controller = VolumeLifecycleController::new(
            storage.clone(),
            storage,
            Arc::new(ChannelReporter::new(tx)),
            Arc::new(NoWipe),
            Arc::new(CountingKeepAlive {
                released: released.clone(),
            }),
            CouplingTable::default(),
        );

        let request = VolumeRequest::new("/mnt/sdcard", FormatMode::FormatOnly, true);
        let volumes = Arc::new(LinuxVolumeProbe::new(
            Arc::new(Vec::new()),
            std::time::Duration::from_millis(100),
        ));
        let mut app = App::new(&request, true, volumes, rx);
        app.attach(controller.start(request).unwrap());

        // Cancel is not offered to the user, but a dead dialog still stops the run
        assert!(!app.cancellable);
        assert_eq!(app.abandon().await, Some(RunOutcome::Cancelled));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Nothing left to join
        assert_eq!(app.abandon().await, None);
    }
}
