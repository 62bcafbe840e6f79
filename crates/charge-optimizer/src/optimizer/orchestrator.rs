use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::allocation::AmperageAllocator;
use super::commands::{apply_charge_rate, ChargeCommand};
use super::decision::{production_shift_reason, ChargeRateDecider};
use super::domain::{SharedFleet, VehicleFleet};
use super::monitor::{MonitorDecision, MonitorScheduler, PausePlan};
use super::priority::{PriorityOutcome, PriorityScorer};
use crate::collaborators::{Forecast, PowerProduction, VehicleControl};
use crate::config::{EngineSettings, RefreshIntervals, SettingsHandle};

/// Everything the engine needs, built once at startup and handed to every task.
#[derive(Clone)]
pub struct EngineContext {
    pub fleet: SharedFleet,
    pub settings: SettingsHandle,
    pub intervals: RefreshIntervals,
    pub vehicles: Arc<dyn VehicleControl>,
    pub production: Arc<dyn PowerProduction>,
    pub forecast: Arc<dyn Forecast>,
}

impl EngineContext {
    pub fn new(
        fleet: VehicleFleet,
        settings: SettingsHandle,
        intervals: RefreshIntervals,
        vehicles: Arc<dyn VehicleControl>,
        production: Arc<dyn PowerProduction>,
        forecast: Arc<dyn Forecast>,
    ) -> Self {
        Self {
            fleet: fleet.into_shared(),
            settings,
            intervals,
            vehicles,
            production,
            forecast,
        }
    }

    /// Runs one priority pass over the whole fleet under a single lock.
    pub fn assign_priority(&self) -> PriorityOutcome {
        let mut fleet = self.fleet.lock().expect("fleet mutex poisoned");
        PriorityScorer::new().assign(&mut fleet)
    }

    /// Fetches charge state for every vehicle, or only the stale ones.
    pub async fn refresh_charge_states(&self, only_stale: bool) {
        let targets: Vec<(usize, String)> = {
            let fleet = self.fleet.lock().expect("fleet mutex poisoned");
            if only_stale {
                fleet
                    .stale_indices()
                    .into_iter()
                    .filter_map(|index| {
                        fleet
                            .vehicle(index)
                            .map(|vehicle| (index, vehicle.id().to_string()))
                    })
                    .collect()
            } else {
                fleet.ids()
            }
        };

        for (index, id) in targets {
            match self.vehicles.charge_state(&id).await {
                Ok(state) => {
                    let mut fleet = self.fleet.lock().expect("fleet mutex poisoned");
                    if let Some(vehicle) = fleet.vehicle(index) {
                        info!(
                            vehicle = vehicle.name(),
                            charging_state = %state.charging_state,
                            battery_level = state.battery_level,
                            charge_limit_soc = state.charge_limit_soc,
                            charge_amps = state.charge_amps,
                            is_priority = vehicle.is_priority(),
                            "charge state refreshed"
                        );
                    }
                    fleet.apply_charge_state(index, state);
                }
                Err(err) => error!(
                    vehicle_id = %id,
                    error = %err,
                    "charge state unavailable, keeping last known value"
                ),
            }
        }
    }
}

/// Cancellation scope for one outer cycle. Dropping it cancels every task it spawned.
pub struct CycleScope {
    number: u64,
    token: CancellationToken,
    settings: Arc<EngineSettings>,
    started_at: DateTime<Utc>,
}

impl CycleScope {
    pub fn new(parent: &CancellationToken, settings: Arc<EngineSettings>, number: u64) -> Self {
        Self {
            number,
            token: parent.child_token(),
            settings,
            started_at: Utc::now(),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn settings(&self) -> &Arc<EngineSettings> {
        &self.settings
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for CycleScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Paused(PausePlan),
    Shutdown,
}

/// Top-level driver: runs cycles of concurrent refreshers separated by pauses.
pub struct OrchestrationLoop {
    context: EngineContext,
    shutdown: CancellationToken,
}

impl OrchestrationLoop {
    pub fn new(context: EngineContext, shutdown: CancellationToken) -> Self {
        Self { context, shutdown }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Runs until the shutdown token is cancelled.
    pub async fn run(self) {
        let mut cycle = 0u64;
        while !self.shutdown.is_cancelled() {
            cycle += 1;
            match self.context.settings.refresh() {
                Ok(true) => info!(cycle, "settings reloaded"),
                Ok(false) => {}
                Err(err) => warn!(cycle, error = %err, "settings reload failed, keeping previous snapshot"),
            }

            match self.run_cycle(cycle).await {
                CycleOutcome::Shutdown => break,
                CycleOutcome::Paused(plan) => {
                    info!(
                        cycle,
                        state = ?plan.state,
                        sleep_minutes = plan.minutes(),
                        resume_at = %plan.resume_at,
                        "cycle paused"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(plan.duration) => {}
                    }
                    info!(cycle, "pause elapsed, restarting cycle");
                }
            }
        }
        info!("orchestration loop stopped");
    }

    /// One active cycle: refreshers run until the monitor pauses or shutdown is requested.
    pub async fn run_cycle(&self, number: u64) -> CycleOutcome {
        let scope = CycleScope::new(&self.shutdown, self.context.settings.snapshot(), number);
        info!(cycle = scope.number(), "cycle started");

        let state_task = tokio::spawn(run_state_refresher(
            self.context.clone(),
            scope.token().clone(),
        ));

        if !self.wait_for_first_states(scope.token()).await {
            scope.cancel();
            join("vehicle state", state_task).await;
            return CycleOutcome::Shutdown;
        }

        self.context.assign_priority();

        let priority_task = tokio::spawn(run_priority_refresher(
            self.context.clone(),
            scope.token().clone(),
        ));
        let production_task = tokio::spawn(run_production_refresher(
            self.context.clone(),
            scope.settings().clone(),
            scope.token().clone(),
        ));
        let monitor_task = tokio::spawn(run_monitor(
            self.context.clone(),
            scope.settings().clone(),
            scope.token().clone(),
        ));

        let plan = match monitor_task.await {
            Ok(plan) => plan,
            Err(err) => {
                error!(error = %err, "monitor task failed");
                None
            }
        };

        scope.cancel();
        join("vehicle state", state_task).await;
        join("priority", priority_task).await;
        join("production", production_task).await;
        debug!(
            cycle = scope.number(),
            started_at = %scope.started_at(),
            "cycle tasks stopped"
        );

        match plan {
            Some(plan) => CycleOutcome::Paused(plan),
            None => CycleOutcome::Shutdown,
        }
    }

    /// Poll-waits until every vehicle has reported once. False when cancelled first.
    async fn wait_for_first_states(&self, token: &CancellationToken) -> bool {
        loop {
            let ready = self
                .context
                .fleet
                .lock()
                .expect("fleet mutex poisoned")
                .all_reported();
            if ready {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = sleep(self.context.intervals.startup_poll) => {}
            }
        }
    }
}

async fn join(task: &'static str, handle: JoinHandle<()>) {
    if let Err(err) = handle.await {
        error!(task, error = %err, "refresher task failed");
    }
}

async fn run_state_refresher(context: EngineContext, token: CancellationToken) {
    loop {
        context.refresh_charge_states(false).await;
        let next_full = Instant::now() + context.intervals.vehicle_state;

        loop {
            let wake = (Instant::now() + context.intervals.stale_poll).min(next_full);
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("vehicle state refresher cancelled");
                    return;
                }
                _ = sleep_until(wake) => {}
            }
            if Instant::now() >= next_full {
                break;
            }
            context.refresh_charge_states(true).await;
        }
    }
}

async fn run_priority_refresher(context: EngineContext, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("priority refresher cancelled");
                return;
            }
            _ = sleep(context.intervals.priority) => {}
        }
        context.assign_priority();
    }
}

async fn run_production_refresher(
    context: EngineContext,
    settings: Arc<EngineSettings>,
    token: CancellationToken,
) {
    let mut tracker = ProductionTracker::default();
    loop {
        production_pass(&context, &settings, &mut tracker).await;
        tokio::select! {
            _ = token.cancelled() => {
                debug!("production refresher cancelled");
                return;
            }
            _ = sleep(context.intervals.production) => {}
        }
    }
}

/// Production readings carried between passes of the production refresher.
#[derive(Debug, Default, Clone)]
pub struct ProductionTracker {
    /// Last successful reading.
    pub last_reading: Option<f64>,
    /// Reading at the time of the last issued command.
    pub last_commanded: f64,
    /// Reading each vehicle's rate was last settled at, by fleet index. Only moves when a
    /// command goes out or a re-read state is allocated, so slow drifts still add up.
    pub settled_at: HashMap<usize, f64>,
    /// Vehicles re-read because production moved; they allocate on their next pass.
    pub refetching: HashSet<usize>,
}

/// Reads net production, allocates current and sends any rate changes that pass the
/// hysteresis filter.
pub async fn production_pass(
    context: &EngineContext,
    settings: &EngineSettings,
    tracker: &mut ProductionTracker,
) {
    let production = match context.production.net_power_production().await {
        Ok(watts) => {
            tracker.last_reading = Some(watts);
            watts
        }
        Err(err) => match tracker.last_reading {
            Some(watts) => {
                error!(error = %err, last_reading = watts, "net production unavailable, reusing last reading");
                watts
            }
            None => {
                error!(error = %err, "net production unavailable and no prior reading");
                return;
            }
        },
    };
    info!(
        net_production = production,
        change_since_command = (production - tracker.last_commanded).abs(),
        "net production"
    );

    let allocator = AmperageAllocator::new(settings);
    let decider = ChargeRateDecider::new();
    let commands: Vec<ChargeCommand> = {
        let mut fleet = context.fleet.lock().expect("fleet mutex poisoned");
        let mut commands = Vec::new();
        for index in 0..fleet.len() {
            let Some(vehicle) = fleet.vehicle_mut(index) else {
                continue;
            };
            if vehicle.needs_refresh() {
                debug!(vehicle = vehicle.name(), "awaiting fresh charge state, skipped");
                continue;
            }
            if tracker.refetching.remove(&index) {
                tracker.settled_at.insert(index, production);
            } else {
                let settled = *tracker.settled_at.entry(index).or_insert(production);
                if let Some(reason) =
                    production_shift_reason(vehicle, settled, production, &allocator)
                {
                    info!(
                        vehicle = vehicle.name(),
                        reason,
                        settled_production = settled,
                        "charge state flagged for refresh"
                    );
                    vehicle.mark_stale();
                    tracker.refetching.insert(index);
                    continue;
                }
            }

            let allocation = allocator.allocate(vehicle, production);
            debug!(
                vehicle = vehicle.name(),
                desired_amps = allocation.desired_amps,
                rule = ?allocation.rule,
                watts_available = ?allocation.watts_available,
                "amperage allocated"
            );
            if decider.decide(vehicle, allocation.desired_amps).change {
                commands.push(ChargeCommand {
                    index,
                    vehicle_id: vehicle.id().to_string(),
                    vehicle_name: vehicle.name().to_string(),
                    was_charging: vehicle.is_charging(),
                    desired_amps: allocation.desired_amps,
                });
            }
        }
        commands
    };

    for command in commands {
        match apply_charge_rate(context.vehicles.as_ref(), &command).await {
            Ok(()) => {
                tracker.last_commanded = production;
                tracker.settled_at.insert(command.index, production);
            }
            Err(err) => error!(
                vehicle = %command.vehicle_name,
                desired_amps = command.desired_amps,
                error = %err,
                "charge command failed"
            ),
        }
        context
            .fleet
            .lock()
            .expect("fleet mutex poisoned")
            .mark_stale(command.index);
    }
}

async fn run_monitor(
    context: EngineContext,
    settings: Arc<EngineSettings>,
    token: CancellationToken,
) -> Option<PausePlan> {
    let mut scheduler = MonitorScheduler::new(
        context.fleet.clone(),
        context.forecast.clone(),
        context.vehicles.clone(),
        context.intervals.monitor,
    );

    loop {
        if let MonitorDecision::Pause(plan) = scheduler.tick(&settings, Utc::now()).await {
            return Some(plan);
        }
        tokio::select! {
            _ = token.cancelled() => {
                debug!("monitor cancelled");
                return None;
            }
            _ = sleep(context.intervals.monitor) => {}
        }
    }
}
