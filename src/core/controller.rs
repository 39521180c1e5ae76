//! Volume lifecycle state machine.
//!
//! A run moves a removable volume through unmount -> format -> remount (or
//! factory reset). Decisions are re-derived from observed volume state every
//! time the storage subsystem reports a change, so the run copes with
//! volumes that change underneath it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::coupling::CouplingTable;
use super::probe::{Subscription, VolumeStateChange, VolumeStateProbe};
use super::reporter::ProgressReporter;
use super::signals::{KeepAlive, KeepAliveGuard, WipeSignal};
use super::volume_ops::VolumeService;
use super::{
    ControllerError, FailureReason, FormatMode, RunOutcome, ServiceError, Stage, VolumeRequest,
    VolumeState,
};

const KEEP_ALIVE_REASON: &str = "Formatting removable storage";

/// Accepts requests and drives at most one lifecycle run at a time
pub struct VolumeLifecycleController {
    service: Arc<dyn VolumeService>,
    probe: Arc<dyn VolumeStateProbe>,
    reporter: Arc<dyn ProgressReporter>,
    wipe: Arc<dyn WipeSignal>,
    keep_alive: Arc<dyn KeepAlive>,
    couplings: CouplingTable,
    active: Arc<Mutex<Option<String>>>,
}

impl VolumeLifecycleController {
    pub fn new(
        service: Arc<dyn VolumeService>,
        probe: Arc<dyn VolumeStateProbe>,
        reporter: Arc<dyn ProgressReporter>,
        wipe: Arc<dyn WipeSignal>,
        keep_alive: Arc<dyn KeepAlive>,
        couplings: CouplingTable,
    ) -> Self {
        Self {
            service,
            probe,
            reporter,
            wipe,
            keep_alive,
            couplings,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a run for `request` on the current tokio runtime.
    ///
    /// Fails without side effects if the request is malformed or another run
    /// is still active.
    pub fn start(&self, request: VolumeRequest) -> Result<RunHandle, ControllerError> {
        validate_request(&request)?;

        let slot = ActiveSlot::claim(&self.active, &request.target_path)?;
        let lease = self.keep_alive.acquire(KEEP_ALIVE_REASON);
        let finish = FinishGuard::new(self.reporter.clone());
        // Subscribe before the first snapshot so no transition is missed
        let subscription = self.probe.subscribe();

        tracing::info!(
            "Starting run for {} ({:?}, always_reset={})",
            request.target_path,
            request.mode,
            request.always_reset
        );

        let target = request.target_path.clone();
        let run = self.new_run(request);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run.drive(
            subscription,
            command_rx,
            RunResources {
                _lease: lease,
                _slot: slot,
            },
            finish,
        ));

        Ok(RunHandle {
            target,
            commands,
            task,
        })
    }

    fn new_run(&self, request: VolumeRequest) -> LifecycleRun {
        let coupled = self.couplings.coupled_with(&request.target_path).to_vec();
        LifecycleRun {
            request,
            coupled,
            service: self.service.clone(),
            probe: self.probe.clone(),
            reporter: self.reporter.clone(),
            wipe: self.wipe.clone(),
            snapshot: HashMap::new(),
            unmounted_coupled: Vec::new(),
            dispatched: HashMap::new(),
            phase: Phase::Preparing,
            wiped: false,
        }
    }
}

fn validate_request(request: &VolumeRequest) -> Result<(), ControllerError> {
    let path = request.target_path.trim();
    if path.is_empty() {
        return Err(ControllerError::InvalidRequest(
            "target path is empty".to_string(),
        ));
    }
    if !path.starts_with('/') {
        return Err(ControllerError::InvalidRequest(format!(
            "target path must be absolute: {}",
            request.target_path
        )));
    }
    Ok(())
}

/// Caller's view of a running lifecycle run
pub struct RunHandle {
    target: String,
    commands: UnboundedSender<RunCommand>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Requests cancellation. Only effective before formatting starts.
    pub fn cancel(&self) {
        // The run may already have finished; nothing to cancel then
        let _ = self.commands.send(RunCommand::Cancel);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to terminate
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Run for {} aborted: {}", self.target, e);
                RunOutcome::Failed
            }
        }
    }
}

#[derive(Debug)]
enum RunCommand {
    Cancel,
}

/// Holds the single run slot; frees it on drop
struct ActiveSlot {
    active: Arc<Mutex<Option<String>>>,
}

impl ActiveSlot {
    fn claim(active: &Arc<Mutex<Option<String>>>, path: &str) -> Result<Self, ControllerError> {
        let mut current = active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = current.as_ref() {
            return Err(ControllerError::RunActive {
                active: running.clone(),
            });
        }
        *current = Some(path.to_string());
        Ok(Self {
            active: active.clone(),
        })
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Run-scoped resources, released in field order when the run ends
struct RunResources {
    _lease: KeepAliveGuard,
    _slot: ActiveSlot,
}

/// Reports the outcome exactly once, `Failed` if the run unwinds early
struct FinishGuard {
    reporter: Arc<dyn ProgressReporter>,
    outcome: Option<RunOutcome>,
}

impl FinishGuard {
    fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            outcome: None,
        }
    }

    fn complete(mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.reporter
            .finished(self.outcome.unwrap_or(RunOutcome::Failed));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Formatting,
}

/// What the driver should do after an evaluation
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Wait,
    StartFormat,
    Finish(RunOutcome),
}

/// Live context of one run
struct LifecycleRun {
    request: VolumeRequest,
    coupled: Vec<String>,
    service: Arc<dyn VolumeService>,
    probe: Arc<dyn VolumeStateProbe>,
    reporter: Arc<dyn ProgressReporter>,
    wipe: Arc<dyn WipeSignal>,
    /// State of every tracked volume when the run started
    snapshot: HashMap<String, VolumeState>,
    /// Coupled volumes this run unmounted, in unmount order
    unmounted_coupled: Vec<String>,
    /// State each path was in when we last sent it an unmount
    dispatched: HashMap<String, VolumeState>,
    phase: Phase,
    wiped: bool,
}

impl LifecycleRun {
    async fn drive(
        mut self,
        mut subscription: Subscription,
        mut commands: UnboundedReceiver<RunCommand>,
        resources: RunResources,
        finish: FinishGuard,
    ) -> RunOutcome {
        self.capture_snapshot().await;

        let mut format_task: Option<JoinHandle<Result<(), ServiceError>>> = None;
        let step = self.evaluate().await;
        let mut outcome = self.advance(step, &mut format_task);

        let mut commands_open = true;
        let mut notifications_open = true;

        while outcome.is_none() {
            tokio::select! {
                joined = async {
                    match format_task.as_mut() {
                        Some(task) => task.await,
                        None => std::future::pending().await,
                    }
                }, if format_task.is_some() => {
                    format_task = None;
                    let result = joined.unwrap_or_else(|e| {
                        Err(ServiceError::Rejected(format!("format task failed: {e}")))
                    });
                    outcome = Some(self.complete_format(result).await);
                }
                command = commands.recv(), if commands_open => match command {
                    Some(RunCommand::Cancel) => outcome = self.cancel().await,
                    None => commands_open = false,
                },
                change = subscription.recv(), if notifications_open => match change {
                    Some(change) => {
                        let step = self.on_volume_state_changed(change).await;
                        outcome = self.advance(step, &mut format_task);
                    }
                    None => {
                        tracing::warn!("Volume state notifications closed");
                        notifications_open = false;
                    }
                },
                else => {
                    tracing::error!(
                        "Run for {} can no longer make progress",
                        self.request.target_path
                    );
                    outcome = Some(RunOutcome::Failed);
                }
            }
        }

        let outcome = outcome.unwrap_or(RunOutcome::Failed);
        tracing::info!("Run for {} finished: {:?}", self.request.target_path, outcome);

        drop(subscription);
        drop(resources);
        finish.complete(outcome);
        outcome
    }

    fn advance(
        &mut self,
        step: Step,
        format_task: &mut Option<JoinHandle<Result<(), ServiceError>>>,
    ) -> Option<RunOutcome> {
        match step {
            Step::Wait => None,
            Step::StartFormat => {
                *format_task = Some(self.spawn_format());
                None
            }
            Step::Finish(outcome) => Some(outcome),
        }
    }

    async fn capture_snapshot(&mut self) {
        let mut paths = vec![self.request.target_path.clone()];
        paths.extend(self.coupled.iter().cloned());

        for path in paths {
            let state = self.probe.state(&path).await;
            tracing::info!("Initial state of {}: {}", path, state);
            self.snapshot.insert(path, state);
        }
    }

    async fn on_volume_state_changed(&mut self, change: VolumeStateChange) -> Step {
        tracing::info!(
            "{} changed state from {} to {}",
            change.path,
            change.old_state,
            change.new_state
        );
        self.evaluate().await
    }

    async fn evaluate(&mut self) -> Step {
        if self.phase == Phase::Formatting {
            tracing::debug!("Format in flight, ignoring re-evaluation");
            return Step::Wait;
        }

        for path in self.coupled.clone() {
            let state = self.probe.state(&path).await;
            if !state.is_mounted() {
                self.dispatched.remove(&path);
                continue;
            }
            if !self.should_dispatch(&path, state) {
                continue;
            }
            self.reporter.stage(Stage::Unmounting);
            tracing::info!("Unmounting coupled volume {}", path);
            match self.service.unmount(&path, true).await {
                Ok(()) => {
                    if !self.unmounted_coupled.contains(&path) {
                        self.unmounted_coupled.push(path);
                    }
                }
                Err(e) => tracing::warn!("Failed to unmount coupled volume {}: {}", path, e),
            }
        }

        let target = self.request.target_path.clone();
        let state = self.probe.state(&target).await;
        match state {
            VolumeState::Mounted | VolumeState::MountedReadOnly => {
                if self.should_dispatch(&target, state) {
                    self.reporter.stage(Stage::Unmounting);
                    tracing::info!("Unmounting {}", target);
                    if let Err(e) = self.service.unmount(&target, true).await {
                        tracing::warn!("Failed to unmount {}: {}", target, e);
                    }
                }
                Step::Wait
            }
            VolumeState::NoFilesystem | VolumeState::Unmounted | VolumeState::Unmountable => {
                self.phase = Phase::Formatting;
                self.reporter.stage(Stage::Erasing);
                Step::StartFormat
            }
            VolumeState::BadRemoval => Step::Finish(self.fail(FailureReason::BadRemoval).await),
            VolumeState::Checking => Step::Finish(self.fail(FailureReason::Checking).await),
            VolumeState::Removed => Step::Finish(self.fail(FailureReason::Removed).await),
            VolumeState::Shared => Step::Finish(self.fail(FailureReason::Shared).await),
            VolumeState::Unknown => {
                tracing::warn!("Unknown storage state for {}", target);
                Step::Finish(self.fail(FailureReason::UnknownState).await)
            }
        }
    }

    /// True unless an unmount was already sent to `path` in this same state
    fn should_dispatch(&mut self, path: &str, state: VolumeState) -> bool {
        if self.dispatched.get(path) == Some(&state) {
            tracing::debug!("Unmount of {} already dispatched while {}", path, state);
            return false;
        }
        self.dispatched.insert(path.to_string(), state);
        true
    }

    fn spawn_format(&self) -> JoinHandle<Result<(), ServiceError>> {
        let service = self.service.clone();
        let path = self.request.target_path.clone();
        tracing::info!("Formatting {}", path);
        tokio::spawn(async move { service.format(&path).await })
    }

    async fn complete_format(&mut self, result: Result<(), ServiceError>) -> RunOutcome {
        match result {
            Ok(()) => {
                tracing::info!("Formatted {}", self.request.target_path);
                if self.request.mode == FormatMode::FormatAndFactoryReset {
                    // Remounting is moot once the device wipes itself
                    self.wipe_once();
                } else {
                    self.remount_all().await;
                }
                RunOutcome::Success
            }
            Err(e) => {
                tracing::warn!("Failed to format {}: {}", self.request.target_path, e);
                if self.request.always_reset {
                    self.wipe_once();
                } else {
                    self.reporter.failure(FailureReason::FormatError);
                    self.remount_all().await;
                }
                RunOutcome::Failed
            }
        }
    }

    async fn cancel(&mut self) -> Option<RunOutcome> {
        if self.phase == Phase::Formatting {
            tracing::info!("Cancel ignored, format of {} already running", self.request.target_path);
            return None;
        }

        tracing::info!("Run for {} cancelled", self.request.target_path);
        self.mount_logged(&self.request.target_path).await;
        self.remount_coupled().await;
        Some(RunOutcome::Cancelled)
    }

    async fn fail(&mut self, reason: FailureReason) -> RunOutcome {
        tracing::warn!(
            "Cannot format {}: {:?}",
            self.request.target_path,
            reason
        );
        self.reporter.failure(reason);
        if self.request.always_reset {
            self.wipe_once();
        } else {
            // Only volumes we took down ourselves are owed a remount
            self.remount_coupled().await;
        }
        RunOutcome::Failed
    }

    async fn remount_all(&mut self) {
        self.mount_logged(&self.request.target_path).await;
        self.remount_coupled().await;
    }

    async fn remount_coupled(&mut self) {
        for path in std::mem::take(&mut self.unmounted_coupled) {
            let state = self.probe.state(&path).await;
            match state {
                VolumeState::Removed | VolumeState::BadRemoval => {
                    tracing::info!("Not remounting {}, it is now {}", path, state);
                }
                state if state.is_mounted() => {
                    tracing::debug!("{} is already mounted", path);
                }
                _ => {
                    let before = self.snapshot.get(&path).copied().unwrap_or(VolumeState::Unknown);
                    tracing::debug!("Restoring {} (was {} before the run)", path, before);
                    self.mount_logged(&path).await;
                }
            }
        }
    }

    async fn mount_logged(&self, path: &str) {
        tracing::info!("Mounting {}", path);
        if let Err(e) = self.service.mount(path).await {
            tracing::warn!("Failed to mount {}: {}", path, e);
        }
    }

    fn wipe_once(&mut self) {
        if self.wiped {
            return;
        }
        self.wiped = true;
        tracing::info!("Requesting factory reset");
        self.wipe.request_factory_reset();
    }
}
