//! Workflow staging -- the connect -> permissions -> test sequence.
//!
//! Each card owns one [`StagingSequencer`].  Its state is three
//! [`StageStatus`] values plus a 1-based step pointer, published through a
//! [`tokio::sync::watch`] channel and mirrored onto the event bus.
//!
//! # Transitions
//!
//! ```text
//! connect:      Pending --> Loading --> Completed
//! permissions:                          Pending --> Loading --> Completed
//! test:                                                         Pending --> Loading --> Completed
//! ```
//!
//! Every `Loading -> Completed` edge is a delayed task on the shared
//! [`Scheduler`], so transitions from all cards share one timeline and each
//! one can be cancelled or awaited.  A cancelled transition puts its stage
//! back to `Pending`; there is no failed status.  [`StagingSequencer::reset`]
//! (the card's "edit workflow" action) returns every stage to `Pending` and
//! the step pointer to 1.
//!
//! The connect stage only completes once every required tool is connected.
//! In [`ConnectMode::Auto`] the stage connects missing tools itself, one at a
//! time; in [`ConnectMode::Manual`] it refuses to start while any are missing.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowmate_kernel::{Event, IpcBus, KernelError, Scheduler, TaskId, TaskStatus};

use crate::error::{IntentError, Result};
use crate::tools::{ToolConnections, ToolConnector};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One of the three staging steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    Permissions,
    Test,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Connect, Stage::Permissions, Stage::Test];

    /// 1-based position of this stage.
    pub fn step(self) -> u8 {
        match self {
            Self::Connect => 1,
            Self::Permissions => 2,
            Self::Test => 3,
        }
    }

    /// Lowercase name used in logs and events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Permissions => "permissions",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Loading,
    Completed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Loading => f.write_str("loading"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Snapshot of a card's staging progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingState {
    pub connect: StageStatus,
    pub permissions: StageStatus,
    pub test: StageStatus,
    /// 1-based pointer to the stage currently in focus.
    pub current_step: u8,
}

impl Default for StagingState {
    fn default() -> Self {
        Self {
            connect: StageStatus::Pending,
            permissions: StageStatus::Pending,
            test: StageStatus::Pending,
            current_step: 1,
        }
    }
}

impl StagingState {
    /// Status of `stage`.
    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Connect => self.connect,
            Stage::Permissions => self.permissions,
            Stage::Test => self.test,
        }
    }

    fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Connect => self.connect = status,
            Stage::Permissions => self.permissions = status,
            Stage::Test => self.test = status,
        }
    }

    /// Whether every stage has completed.
    pub fn is_active(&self) -> bool {
        Stage::ALL
            .iter()
            .all(|s| self.status(*s) == StageStatus::Completed)
    }

    /// The stage currently loading, if any.
    pub fn in_flight(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::Loading)
    }

    /// The first stage that has not completed.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| self.status(*s) != StageStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the connect stage treats tools that are not yet connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Connect missing tools one by one inside the connect stage.
    #[default]
    Auto,
    /// Refuse to stage until the user has connected every tool.
    Manual,
}

impl FromStr for ConnectMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown connect mode `{other}` (expected auto or manual)")),
        }
    }
}

/// Delays and policy for a staging run.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Delay of the connect stage once every tool is connected.
    ///
    /// Default: **1 500 ms**.
    pub connect_delay: Duration,

    /// Delay of the permissions stage.
    ///
    /// Default: **1 500 ms**.
    pub permissions_delay: Duration,

    /// Delay of the test stage.
    ///
    /// Default: **2 000 ms**.
    pub test_delay: Duration,

    /// Delay of each simulated tool connection.
    ///
    /// Default: **1 000 ms**.
    pub tool_connect_delay: Duration,

    /// Default: [`ConnectMode::Auto`].
    pub connect_mode: ConnectMode,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(1500),
            permissions_delay: Duration::from_millis(1500),
            test_delay: Duration::from_millis(2000),
            tool_connect_delay: Duration::from_millis(1000),
            connect_mode: ConnectMode::Auto,
        }
    }
}

impl StagingConfig {
    /// Delay of the `Loading -> Completed` edge for `stage`.
    pub fn delay_for(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Connect => self.connect_delay,
            Stage::Permissions => self.permissions_delay,
            Stage::Test => self.test_delay,
        }
    }

    /// Sum of the three stage delays, excluding tool connections.
    pub fn total_delay(&self) -> Duration {
        Stage::ALL.iter().map(|s| self.delay_for(*s)).sum()
    }

    /// Use the same delay for every stage and tool connection.
    pub fn with_uniform_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self.permissions_delay = delay;
        self.test_delay = delay;
        self.tool_connect_delay = delay;
        self
    }

    /// Set the connect mode.
    pub fn with_connect_mode(mut self, mode: ConnectMode) -> Self {
        self.connect_mode = mode;
        self
    }
}

// ---------------------------------------------------------------------------
// Stage board
// ---------------------------------------------------------------------------

/// Shared state written by the sequencer and by its scheduled tasks.
struct StageBoard {
    card_id: Uuid,
    state: watch::Sender<StagingState>,
    bus: IpcBus,
    /// Bumped on every reset; writes tagged with an older value are dropped.
    generation: AtomicU64,
}

impl StageBoard {
    fn snapshot(&self) -> StagingState {
        *self.state.borrow()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Apply `status` to `stage` unless a reset happened since `generation`.
    fn transition(&self, generation: u64, stage: Stage, status: StageStatus) {
        let mut current_step = 1;
        // The generation is checked under the watch lock, which `reset` also
        // holds while it bumps the generation.
        let applied = self.state.send_if_modified(|s| {
            if self.generation() != generation {
                return false;
            }
            s.set(stage, status);
            s.current_step = match (stage, status) {
                (Stage::Test, _) => stage.step(),
                (_, StageStatus::Completed) => stage.step() + 1,
                _ => stage.step(),
            };
            current_step = s.current_step;
            true
        });
        if !applied {
            debug!(card_id = %self.card_id, %stage, %status, "dropping stale transition");
            return;
        }

        debug!(card_id = %self.card_id, %stage, %status, current_step, "stage changed");
        self.bus.publish(Event::StageChanged {
            card_id: self.card_id,
            stage: stage.name().to_string(),
            status: status.to_string(),
            current_step,
        });
    }
}

/// The scheduled task a run is waiting on, plus a cancel request that
/// arrived while no task was tracked.
#[derive(Debug, Default)]
struct InFlight {
    task: Option<TaskId>,
    cancel_requested: bool,
}

/// Marks a sequencer as running for the lifetime of one `run` call.
struct RunGuard<'a>(&'a StagingSequencer);

impl<'a> RunGuard<'a> {
    fn acquire(seq: &'a StagingSequencer) -> Option<Self> {
        seq.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(seq))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        // Under the lock so `cancel` never queues a request for a finished run.
        let mut slot = self.0.lock_in_flight();
        slot.task = None;
        slot.cancel_requested = false;
        self.0.running.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Drives one card through the staging stages.
pub struct StagingSequencer {
    board: Arc<StageBoard>,
    config: StagingConfig,
    scheduler: Scheduler,
    connector: ToolConnector,
    running: AtomicBool,
    in_flight: Mutex<InFlight>,
}

impl StagingSequencer {
    /// Create a sequencer for `card_id` with every stage pending.
    pub fn new(card_id: Uuid, scheduler: Scheduler, bus: IpcBus, config: StagingConfig) -> Self {
        let connector = ToolConnector::new(scheduler.clone(), bus.clone(), config.tool_connect_delay);
        let (state, _) = watch::channel(StagingState::default());
        Self {
            board: Arc::new(StageBoard {
                card_id,
                state,
                bus,
                generation: AtomicU64::new(0),
            }),
            config,
            scheduler,
            connector,
            running: AtomicBool::new(false),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    /// The card this sequencer belongs to.
    pub fn card_id(&self) -> Uuid {
        self.board.card_id
    }

    /// Current staging snapshot.
    pub fn state(&self) -> StagingState {
        self.board.snapshot()
    }

    /// Receive every future state change.
    pub fn subscribe(&self) -> watch::Receiver<StagingState> {
        self.board.state.subscribe()
    }

    /// The configuration this sequencer runs with.
    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Run the remaining stages to completion.
    ///
    /// Stages that already completed are skipped, so a run interrupted by
    /// cancellation can be resumed by calling this again.  Returns once the
    /// workflow is active.
    pub async fn run(&self, required_tools: &[String], tools: &mut ToolConnections) -> Result<()> {
        let Some(_guard) = RunGuard::acquire(self) else {
            let stage = self
                .state()
                .in_flight()
                .map_or("staging", Stage::name)
                .to_string();
            return Err(IntentError::StagingBusy { stage });
        };

        if self.state().is_active() {
            debug!(card_id = %self.card_id(), "workflow already active");
            return Ok(());
        }

        let generation = self.board.generation();
        info!(
            card_id = %self.card_id(),
            tools = ?required_tools,
            mode = ?self.config.connect_mode,
            "staging started"
        );

        if self.state().connect != StageStatus::Completed {
            self.connect_stage(generation, required_tools, tools).await?;
        }

        for stage in [Stage::Permissions, Stage::Test] {
            if self.state().status(stage) == StageStatus::Completed {
                continue;
            }
            self.ensure_current(generation, stage)?;
            self.board.transition(generation, stage, StageStatus::Loading);
            self.timed_transition(generation, stage).await?;
        }

        self.ensure_current(generation, Stage::Test)?;
        info!(card_id = %self.card_id(), "workflow active");
        self.board.bus.publish(Event::WorkflowActivated {
            card_id: self.card_id(),
        });
        Ok(())
    }

    /// Cancel the in-flight transition of a running [`run`](Self::run).
    ///
    /// Returns `true` if a transition was cancelled, or if the run was
    /// between transitions, in which case the next one it schedules is
    /// cancelled as soon as it is submitted.  Returns `false` when nothing
    /// is running or the transition has already started executing.  The
    /// affected stage goes back to `Pending` once the run observes the
    /// cancellation.
    pub fn cancel(&self) -> Result<bool> {
        let mut slot = self.lock_in_flight();
        if !self.running.load(Ordering::Acquire) {
            return Ok(false);
        }

        let Some(task_id) = slot.task.take() else {
            slot.cancel_requested = true;
            debug!(card_id = %self.card_id(), "cancel queued for the next transition");
            return Ok(true);
        };

        match self.scheduler.cancel(task_id) {
            Ok(()) => {
                info!(card_id = %self.card_id(), task_id = %task_id, "staging transition cancelled");
                Ok(true)
            }
            Err(KernelError::InvalidTaskState { .. }) => {
                debug!(card_id = %self.card_id(), task_id = %task_id, "transition already executing");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return every stage to `Pending` and the step pointer to 1.
    ///
    /// Any in-flight transition is cancelled and writes from an interrupted
    /// run are discarded.
    pub fn reset(&self) {
        self.board.state.send_modify(|s| {
            self.board.generation.fetch_add(1, Ordering::AcqRel);
            *s = StagingState::default();
        });
        let in_flight = {
            let mut slot = self.lock_in_flight();
            slot.cancel_requested = false;
            slot.task.take()
        };
        if let Some(task_id) = in_flight
            && let Err(e) = self.scheduler.cancel(task_id)
        {
            debug!(card_id = %self.card_id(), error = %e, "in-flight task already finished");
        }
        self.board.bus.publish(Event::StagingReset {
            card_id: self.card_id(),
        });
        info!(card_id = %self.card_id(), "staging reset");
    }

    // -- Internals -----------------------------------------------------------

    async fn connect_stage(
        &self,
        generation: u64,
        required_tools: &[String],
        tools: &mut ToolConnections,
    ) -> Result<()> {
        let missing: Vec<String> = tools
            .missing(required_tools)
            .into_iter()
            .map(str::to_string)
            .collect();

        if !missing.is_empty() && self.config.connect_mode == ConnectMode::Manual {
            debug!(card_id = %self.card_id(), ?missing, "connect stage waiting on tools");
            return Err(IntentError::ToolsNotConnected { missing });
        }

        self.board
            .transition(generation, Stage::Connect, StageStatus::Loading);

        for tool in &missing {
            if let Err(e) = self.connect_tool(tools, tool).await {
                warn!(
                    card_id = %self.card_id(),
                    tool = %tool,
                    error = %e,
                    "tool connection failed, connect stage back to pending"
                );
                self.board
                    .transition(generation, Stage::Connect, StageStatus::Pending);
                return Err(match e {
                    IntentError::ConnectionCancelled { .. } => IntentError::StagingCancelled {
                        stage: Stage::Connect.name().to_string(),
                    },
                    other => other,
                });
            }
            self.ensure_current(generation, Stage::Connect)?;
        }

        let still_missing: Vec<String> = tools
            .missing(required_tools)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !still_missing.is_empty() {
            self.board
                .transition(generation, Stage::Connect, StageStatus::Pending);
            return Err(IntentError::ToolsNotConnected {
                missing: still_missing,
            });
        }

        self.timed_transition(generation, Stage::Connect).await
    }

    async fn connect_tool(&self, tools: &mut ToolConnections, tool: &str) -> Result<()> {
        let Some(task_id) = self.connector.submit(tools, tool)? else {
            return Ok(());
        };
        self.track(task_id);
        let result = self.connector.complete(tools, tool, task_id).await;
        self.untrack();
        result
    }

    /// Schedule `stage`'s `Loading -> Completed` edge and wait for it.
    async fn timed_transition(&self, generation: u64, stage: Stage) -> Result<()> {
        let board = Arc::clone(&self.board);
        let submitted = self.scheduler.submit_delayed(
            format!("{}:{stage}", self.card_id()),
            self.config.delay_for(stage),
            Box::new(move || {
                Box::pin(async move {
                    board.transition(generation, stage, StageStatus::Completed);
                    Ok(())
                })
            }),
        );
        let task_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                self.board
                    .transition(generation, stage, StageStatus::Pending);
                return Err(e.into());
            }
        };

        self.track(task_id);
        let outcome = self.scheduler.wait(task_id).await;
        self.untrack();

        match outcome? {
            TaskStatus::Completed => self.ensure_current(generation, stage),
            TaskStatus::Cancelled => {
                self.board
                    .transition(generation, stage, StageStatus::Pending);
                Err(IntentError::StagingCancelled {
                    stage: stage.name().to_string(),
                })
            }
            other => {
                self.board
                    .transition(generation, stage, StageStatus::Pending);
                Err(IntentError::Internal(format!(
                    "{stage} transition ended as {other:?}"
                )))
            }
        }
    }

    /// Fail with `StagingCancelled` if a reset happened during this run.
    fn ensure_current(&self, generation: u64, stage: Stage) -> Result<()> {
        if self.board.generation() == generation {
            Ok(())
        } else {
            Err(IntentError::StagingCancelled {
                stage: stage.name().to_string(),
            })
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `task_id` as the task this run waits on, applying a cancel
    /// that was requested before it was submitted.
    fn track(&self, task_id: TaskId) {
        let mut slot = self.lock_in_flight();
        if !slot.cancel_requested {
            slot.task = Some(task_id);
            return;
        }

        slot.cancel_requested = false;
        match self.scheduler.cancel(task_id) {
            Ok(()) => info!(card_id = %self.card_id(), task_id = %task_id, "queued cancel applied"),
            Err(e) => debug!(card_id = %self.card_id(), error = %e, "queued cancel came too late"),
        }
    }

    fn untrack(&self) {
        self.lock_in_flight().task = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> StagingConfig {
        StagingConfig::default().with_uniform_delay(Duration::from_millis(15))
    }

    fn tools_of(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_state_is_pending_at_step_one() {
        let state = StagingState::default();
        assert_eq!(state.current_step, 1);
        assert!(!state.is_active());
        assert_eq!(state.next_stage(), Some(Stage::Connect));
        assert_eq!(state.in_flight(), None);
    }

    #[test]
    fn default_delays() {
        let config = StagingConfig::default();
        assert_eq!(config.total_delay(), Duration::from_millis(5000));
        assert_eq!(config.connect_mode, ConnectMode::Auto);
    }

    #[test]
    fn connect_mode_parses() {
        assert_eq!("Manual".parse::<ConnectMode>().unwrap(), ConnectMode::Manual);
        assert_eq!(" auto ".parse::<ConnectMode>().unwrap(), ConnectMode::Auto);
        assert!("sometimes".parse::<ConnectMode>().is_err());
    }

    #[tokio::test]
    async fn connected_tools_reach_active() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), IpcBus::new(64), fast_config());

        let required = tools_of(&["Slack"]);
        let mut tools = ToolConnections::new();
        tools.mark_connected("Slack");

        let started = tokio::time::Instant::now();
        seq.run(&required, &mut tools).await.unwrap();
        assert!(started.elapsed() >= seq.config().total_delay());

        let state = seq.state();
        assert!(state.is_active());
        assert_eq!(state.current_step, 3);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn auto_mode_connects_missing_tools_first() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), IpcBus::new(64), fast_config());

        let required = tools_of(&["Gmail", "WhatsApp"]);
        let mut tools = ToolConnections::new();
        seq.run(&required, &mut tools).await.unwrap();

        assert!(tools.all_connected(&required));
        assert!(seq.state().is_active());

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn manual_mode_blocks_until_tools_connected() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let config = fast_config().with_connect_mode(ConnectMode::Manual);
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), IpcBus::new(64), config);

        let required = tools_of(&["Slack"]);
        let mut tools = ToolConnections::new();

        let err = seq.run(&required, &mut tools).await.unwrap_err();
        assert!(matches!(err, IntentError::ToolsNotConnected { ref missing } if missing == &["Slack"]));
        assert_eq!(seq.state().connect, StageStatus::Pending);

        tools.mark_connected("Slack");
        seq.run(&required, &mut tools).await.unwrap();
        assert!(seq.state().is_active());

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unresolved_tool_resets_connect_stage() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), IpcBus::new(64), fast_config());

        let required = tools_of(&[crate::UNRESOLVED_TOOL]);
        let mut tools = ToolConnections::new();
        let err = seq.run(&required, &mut tools).await.unwrap_err();

        assert!(matches!(err, IntentError::ConnectionRejected { .. }));
        assert_eq!(seq.state(), StagingState::default());

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reset_returns_to_step_one() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), IpcBus::new(64), fast_config());

        let mut tools = ToolConnections::new();
        seq.run(&[], &mut tools).await.unwrap();
        assert!(seq.state().is_active());

        seq.reset();
        assert_eq!(seq.state(), StagingState::default());

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reset_during_run_drops_stale_writes() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let config = StagingConfig {
            permissions_delay: Duration::from_millis(300),
            ..fast_config()
        };
        let seq = Arc::new(StagingSequencer::new(
            Uuid::now_v7(),
            scheduler.clone(),
            IpcBus::new(64),
            config,
        ));

        let runner = {
            let seq = Arc::clone(&seq);
            tokio::spawn(async move {
                let mut tools = ToolConnections::new();
                seq.run(&[], &mut tools).await
            })
        };

        seq.subscribe()
            .wait_for(|s| s.permissions == StageStatus::Loading)
            .await
            .unwrap();
        seq.reset();

        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(err, IntentError::StagingCancelled { .. }));
        assert_eq!(seq.state(), StagingState::default());

        // Nothing from the interrupted run lands afterwards.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(seq.state(), StagingState::default());
        assert_eq!(seq.state().current_step, 1);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_during_tool_connection_leaves_tool_disconnected() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let config = StagingConfig {
            tool_connect_delay: Duration::from_millis(300),
            ..fast_config()
        };
        let seq = Arc::new(StagingSequencer::new(
            Uuid::now_v7(),
            scheduler.clone(),
            IpcBus::new(64),
            config,
        ));

        let runner = {
            let seq = Arc::clone(&seq);
            tokio::spawn(async move {
                let mut tools = ToolConnections::new();
                let result = seq.run(&tools_of(&["Slack"]), &mut tools).await;
                (result, tools)
            })
        };

        seq.subscribe()
            .wait_for(|s| s.connect == StageStatus::Loading)
            .await
            .unwrap();
        assert!(seq.cancel().unwrap());

        let (result, tools) = runner.await.unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, IntentError::StagingCancelled { ref stage } if stage == "connect"));
        assert_eq!(seq.state().connect, StageStatus::Pending);
        assert!(!tools.is_connected("Slack"));

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_right_after_loading_always_lands() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let config = StagingConfig {
            permissions_delay: Duration::from_millis(200),
            ..StagingConfig::default().with_uniform_delay(Duration::from_millis(1))
        };

        for _ in 0..25 {
            let seq = Arc::new(StagingSequencer::new(
                Uuid::now_v7(),
                scheduler.clone(),
                IpcBus::new(64),
                config.clone(),
            ));
            let runner = {
                let seq = Arc::clone(&seq);
                tokio::spawn(async move {
                    let mut tools = ToolConnections::new();
                    seq.run(&[], &mut tools).await
                })
            };

            seq.subscribe()
                .wait_for(|s| s.permissions == StageStatus::Loading)
                .await
                .unwrap();
            assert!(seq.cancel().unwrap());

            let err = runner.await.unwrap().unwrap_err();
            assert!(matches!(err, IntentError::StagingCancelled { ref stage } if stage == "permissions"));
            assert_eq!(seq.state().permissions, StageStatus::Pending);
            assert_eq!(seq.state().connect, StageStatus::Completed);
        }

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_without_in_flight_is_noop() {
        let scheduler = Scheduler::new();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler, IpcBus::new(4), fast_config());
        assert!(!seq.cancel().unwrap());
    }

    #[tokio::test]
    async fn stage_events_are_published_in_order() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let bus = IpcBus::new(64);
        let mut rx = bus.subscribe();
        let seq = StagingSequencer::new(Uuid::now_v7(), scheduler.clone(), bus, fast_config());

        let mut tools = ToolConnections::new();
        seq.run(&[], &mut tools).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::StageChanged { stage, status, .. } = event.as_ref() {
                seen.push(format!("{stage}:{status}"));
            }
        }
        assert_eq!(
            seen,
            vec![
                "connect:loading",
                "connect:completed",
                "permissions:loading",
                "permissions:completed",
                "test:loading",
                "test:completed",
            ]
        );

        scheduler.shutdown();
        handle.await.unwrap();
    }
}
