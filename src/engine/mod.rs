//! Route engine - one task owns the selection state.
//!
//! Operator intents arrive as `EngineCommand`s over an mpsc channel; the
//! reconciliation timer is another branch of the same `select!` loop. Only
//! this task writes `SelectionState`, so an intent and a tick can never
//! interleave and no late network result can land on top of a newer write.
//!
//! ```text
//!  EngineHandle ──cmd──► RouteEngine::run ──► ActivationController
//!                           │      ▲                 │
//!                        interval  └──── SelectionState
//!                           ▼                        │
//!                    ReconciliationLoop ─────────────┘
//!                           │
//!                  watch::Sender<EngineSnapshot> ──► presentation
//! ```

pub mod controller;
pub mod reconcile;
pub mod state;

pub use controller::{
    ActivationController, ActivationOutcome, ClearReport, DeactivationOutcome, RouteSource,
};
pub use reconcile::{ReconciliationLoop, TickOutcome};
pub use state::{ActiveRoute, ControllerPhase, SelectionState};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::ControlBackend;
use crate::config::ConsoleConfig;
use crate::error::{Result, RouteError};
use crate::layout::Layout;
use crate::path::PathBuilder;
use crate::policy::{PolicyResolver, PolicyStore, ZoneOption};

/// Command channel depth; operators do not queue more than a handful.
const COMMAND_BUFFER: usize = 32;

/// Everything the presentation layer renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub selection: SelectionState,
    pub phase: ControllerPhase,
    /// Last human-readable status line
    pub status: String,
    pub available_zones: Vec<ZoneOption>,
    pub available_winds: Vec<String>,
    pub backend_reachable: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl EngineSnapshot {
    pub fn rendered_path(&self) -> &str {
        self.selection.path_description()
    }
}

pub enum EngineCommand {
    SelectZone {
        zone: Option<String>,
        reply: oneshot::Sender<()>,
    },
    SelectWind {
        wind: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Activate {
        zone: Option<String>,
        wind: Option<String>,
        reply: oneshot::Sender<Result<ActivationOutcome>>,
    },
    ActivateSelected {
        reply: oneshot::Sender<Result<ActivationOutcome>>,
    },
    Deactivate {
        zone: String,
        reply: oneshot::Sender<Result<DeactivationOutcome>>,
    },
    Clear {
        reply: oneshot::Sender<ClearReport>,
    },
    Refresh {
        reply: oneshot::Sender<Result<TickOutcome>>,
    },
    Shutdown,
}

pub struct RouteEngine {
    store: Arc<PolicyStore>,
    resolver: Arc<PolicyResolver>,
    paths: Arc<PathBuilder>,
    controller: ActivationController,
    reconciler: ReconciliationLoop,
    state: SelectionState,
    status: String,
    backend_reachable: bool,
    last_intent: Option<Instant>,
    last_sync_at: Option<DateTime<Utc>>,
    snapshots: watch::Sender<EngineSnapshot>,
}

impl RouteEngine {
    pub fn new(backend: Arc<dyn ControlBackend>, layout: Arc<Layout>, config: &ConsoleConfig) -> Self {
        let store = Arc::new(PolicyStore::new(Arc::clone(&backend)));
        let resolver = Arc::new(PolicyResolver::new(Arc::clone(&store), Arc::clone(&backend)));
        let paths = Arc::new(PathBuilder::new(layout));
        let controller = ActivationController::new(
            Arc::clone(&backend),
            Arc::clone(&resolver),
            Arc::clone(&paths),
        );
        let reconciler = ReconciliationLoop::new(
            backend,
            Arc::clone(&resolver),
            Arc::clone(&paths),
            config.poll_interval,
            config.authority,
        );
        let (snapshots, _) = watch::channel(EngineSnapshot::default());

        Self {
            store,
            resolver,
            paths,
            controller,
            reconciler,
            state: SelectionState::default(),
            status: "Starting".to_string(),
            backend_reachable: false,
            last_intent: None,
            last_sync_at: None,
            snapshots,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn resolver(&self) -> &Arc<PolicyResolver> {
        &self.resolver
    }

    pub fn paths(&self) -> &Arc<PathBuilder> {
        &self.paths
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let index = self.store.snapshot().await;
        EngineSnapshot {
            selection: self.state.clone(),
            phase: self.controller.phase(),
            status: self.status.clone(),
            available_zones: index.available_zones().to_vec(),
            available_winds: index.available_winds().to_vec(),
            backend_reachable: self.backend_reachable,
            last_sync_at: self.last_sync_at,
        }
    }

    async fn publish(&self) {
        let next = self.snapshot().await;
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn set_reachable(&mut self, reachable: bool) {
        if self.backend_reachable != reachable {
            if reachable {
                info!("Backend reachable");
            } else {
                warn!("Backend unreachable");
            }
        }
        self.backend_reachable = reachable;
        self.controller.set_backend_reachable(reachable);
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Local-only; never touches the backend or an active route.
    pub fn select_zone(&mut self, zone: Option<String>) {
        self.state.selected_zone = zone.filter(|z| !z.trim().is_empty());
    }

    pub fn select_wind(&mut self, wind: Option<String>) {
        self.state.selected_wind = wind.filter(|w| !w.trim().is_empty());
    }

    pub async fn activate(&mut self, zone: Option<&str>, wind: Option<&str>) -> Result<ActivationOutcome> {
        let result = self.controller.activate(&mut self.state, zone, wind).await;
        match &result {
            Ok(outcome) => {
                self.last_intent = Some(Instant::now());
                self.status = match &self.state.active_route {
                    Some(route) => format!(
                        "Route {} active for zone {} ({})",
                        outcome.route_id, route.zone_id, route.wind_direction
                    ),
                    None => format!("Route {} active", outcome.route_id),
                };
            }
            Err(e) => {
                if matches!(e, RouteError::BackendUnreachable(_)) {
                    self.set_reachable(false);
                }
                self.status = e.status_line("Activation");
            }
        }
        result
    }

    pub async fn activate_selected(&mut self) -> Result<ActivationOutcome> {
        let zone = self.state.selected_zone.clone();
        let wind = self.state.selected_wind.clone();
        self.activate(zone.as_deref(), wind.as_deref()).await
    }

    pub async fn deactivate(&mut self, zone: &str) -> Result<DeactivationOutcome> {
        let result = self.controller.deactivate(&mut self.state, zone).await;
        match &result {
            Ok(outcome) => {
                self.last_intent = Some(Instant::now());
                self.status = outcome.status_line();
            }
            Err(e) => self.status = e.status_line("Deactivation"),
        }
        result
    }

    pub async fn clear(&mut self) -> ClearReport {
        let report = self.controller.clear(&mut self.state).await;
        self.last_intent = Some(Instant::now());
        self.status = report.status_line();
        report
    }

    /// Periodic pass. Failures are logged and swallowed.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let result = self.reconciler.tick(&mut self.state, self.last_intent).await;
        match &result {
            Ok(outcome) => {
                self.set_reachable(true);
                self.last_sync_at = Some(Utc::now());
                if outcome.changed_state() {
                    self.controller.settle(&self.state);
                }
                if let Some(line) = outcome.status_line() {
                    self.status = line;
                }
                debug!(?outcome, "Reconciliation tick");
            }
            Err(e) => {
                if matches!(e, RouteError::BackendUnreachable(_)) {
                    self.set_reachable(false);
                }
                warn!(error = %e, "Reconciliation tick failed; will retry");
            }
        }
        result
    }

    /// Reload the policy index, then reconcile immediately. An explicit
    /// refresh also bypasses any local grace window.
    pub async fn refresh(&mut self) -> Result<TickOutcome> {
        match self.store.load().await {
            Ok(_) => self.set_reachable(true),
            Err(e) => {
                self.set_reachable(false);
                self.status = e.status_line("Refresh");
                return Err(e);
            }
        }
        self.last_intent = None;
        let outcome = self.tick().await;
        if let Err(e) = &outcome {
            self.status = e.status_line("Refresh");
        }
        outcome
    }

    // =========================================================================
    // ACTOR LOOP
    // =========================================================================

    /// Spawn the engine on the current runtime.
    pub fn spawn(self) -> EngineHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let snapshots = self.subscribe();
        let task = tokio::spawn(self.run(receiver));
        EngineHandle {
            commands,
            snapshots,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        info!(
            poll_interval_ms = self.reconciler.interval().as_millis() as u64,
            "Route engine started"
        );
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Initial refresh failed; reconciliation will retry");
        }
        self.publish().await;

        let mut ticker = interval(self.reconciler.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The initial refresh already reconciled.
        ticker.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        None | Some(EngineCommand::Shutdown) => break,
                        Some(command) => self.handle(command).await,
                    }
                }
                _ = ticker.tick() => {
                    let _ = self.tick().await;
                    self.publish().await;
                }
            }
        }
        info!("Route engine stopped");
    }

    /// Apply one command. The snapshot is published before the reply so a
    /// caller that awaited the reply always reads its own write.
    async fn handle(&mut self, command: EngineCommand) {
        // A dropped reply receiver just means the caller stopped waiting.
        match command {
            EngineCommand::SelectZone { zone, reply } => {
                self.select_zone(zone);
                self.publish().await;
                let _ = reply.send(());
            }
            EngineCommand::SelectWind { wind, reply } => {
                self.select_wind(wind);
                self.publish().await;
                let _ = reply.send(());
            }
            EngineCommand::Activate { zone, wind, reply } => {
                let result = self.activate(zone.as_deref(), wind.as_deref()).await;
                self.publish().await;
                let _ = reply.send(result);
            }
            EngineCommand::ActivateSelected { reply } => {
                let result = self.activate_selected().await;
                self.publish().await;
                let _ = reply.send(result);
            }
            EngineCommand::Deactivate { zone, reply } => {
                let result = self.deactivate(&zone).await;
                self.publish().await;
                let _ = reply.send(result);
            }
            EngineCommand::Clear { reply } => {
                let report = self.clear().await;
                self.publish().await;
                let _ = reply.send(report);
            }
            EngineCommand::Refresh { reply } => {
                let result = self.refresh().await;
                self.publish().await;
                let _ = reply.send(result);
            }
            EngineCommand::Shutdown => {}
        }
    }
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<EngineSnapshot>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

fn engine_stopped() -> RouteError {
    RouteError::InvalidState("route engine is not running".into())
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> std::result::Result<T, RouteError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| engine_stopped())?;
        response.await.map_err(|_| engine_stopped())
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    pub async fn select_zone(&self, zone: Option<String>) -> Result<()> {
        self.request(|reply| EngineCommand::SelectZone { zone, reply })
            .await
    }

    pub async fn select_wind(&self, wind: Option<String>) -> Result<()> {
        self.request(|reply| EngineCommand::SelectWind { wind, reply })
            .await
    }

    pub async fn activate(&self, zone: &str, wind: &str) -> Result<ActivationOutcome> {
        let (zone, wind) = (Some(zone.to_string()), Some(wind.to_string()));
        self.request(|reply| EngineCommand::Activate { zone, wind, reply })
            .await?
    }

    pub async fn activate_selected(&self) -> Result<ActivationOutcome> {
        self.request(|reply| EngineCommand::ActivateSelected { reply })
            .await?
    }

    pub async fn deactivate(&self, zone: &str) -> Result<DeactivationOutcome> {
        let zone = zone.to_string();
        self.request(|reply| EngineCommand::Deactivate { zone, reply })
            .await?
    }

    pub async fn clear(&self) -> Result<ClearReport> {
        self.request(|reply| EngineCommand::Clear { reply }).await
    }

    pub async fn refresh(&self) -> Result<TickOutcome> {
        self.request(|reply| EngineCommand::Refresh { reply })
            .await?
    }

    /// Stop the engine and wait for its task to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Route engine task ended abnormally");
            }
        }
    }
}
