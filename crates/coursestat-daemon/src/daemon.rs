//! The orchestration daemon.
//!
//! Wires the whole system together: queues, job store, statistics
//! repository, provider, runners, completion dispatch, the request
//! intake loop, and the two periodic sweeps. Shutdown is two-stage:
//! the first request closes the queues and drains in-flight jobs, the
//! second abandons them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coursestat_engine::{JobProvider, JobRunner, ProviderConfig, RequestParser, RunnerContext};
use coursestat_queue::{open_queue, JobQueue, QueueError, QueueRegistry};
use coursestat_store::{JobStore, PgJobStore, StoreError};
use coursestat_steps::{
    CourseInputFormatter, CourseStatsParser, PgStatsRepository, RepositoryResultSink,
    StatsError, StatsRepository, StepRegistry,
};
use coursestat_types::{
    JobConfiguration, JobRequest, JobRow, JobState, Settings, SettingsError,
};

use crate::listeners::CompletionListeners;

/// Default overall time budget for generated jobs.
const DEFAULT_JOB_TIMEOUT_MS: u64 = 600_000;

pub const INCOMING_QUEUE: &str = "incoming";
pub const WORK_QUEUE: &str = "work";

/// Errors raised while assembling or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("statistics repository error: {0}")]
    Stats(#[from] StatsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which periodic sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    /// Re-dispatches every `periodical` job.
    Refresh,
    /// Re-dispatches every `rerun_requested` job with a forced
    /// recalculation.
    Recalculation,
}

impl SweepKind {
    fn name(&self) -> &'static str {
        match self {
            SweepKind::Refresh => "refresh",
            SweepKind::Recalculation => "recalculation",
        }
    }
}

/// Shared state the sweeps and intake loop operate on.
#[derive(Clone)]
struct SweepContext {
    store: Arc<dyn JobStore>,
    work: Arc<dyn JobQueue<JobConfiguration>>,
    parser: Arc<CourseStatsParser>,
    listeners: Arc<CompletionListeners>,
    /// Old job ids with a replacement currently in flight.
    pending: Arc<Mutex<HashSet<String>>>,
    job_type: String,
}

/// The orchestration daemon. Collaborators are injected so tests can run
/// against the in-memory store and repository.
pub struct Daemon {
    settings: Settings,
    store: Arc<dyn JobStore>,
    repository: Arc<dyn StatsRepository>,
    abrupt_handler: Option<Box<dyn FnOnce() + Send>>,
}

impl Daemon {
    pub fn new(
        settings: Settings,
        store: Arc<dyn JobStore>,
        repository: Arc<dyn StatsRepository>,
    ) -> Self {
        Self {
            settings,
            store,
            repository,
            abrupt_handler: None,
        }
    }

    /// Callback invoked when a forced shutdown abandons in-flight jobs,
    /// before `run` returns.
    pub fn with_abrupt_handler(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.abrupt_handler = Some(Box::new(handler));
        self
    }

    /// Assemble the production daemon: Postgres store and repository from
    /// the configured database URL.
    pub async fn connect(settings: Settings) -> Result<Self, DaemonError> {
        let store = Arc::new(PgJobStore::connect(&settings.database_url).await?);
        let repository = Arc::new(PgStatsRepository::connect(&settings.database_url).await?);
        Ok(Self::new(settings, store, repository))
    }

    /// Run until `shutdown` is cancelled, then drain. Cancelling `force`
    /// after that abandons in-flight jobs and returns immediately; their
    /// lifecycle rows stay `RUNNING` until re-submitted.
    pub async fn run(
        self,
        shutdown: CancellationToken,
        force: CancellationToken,
    ) -> Result<(), DaemonError> {
        let settings = self.settings;
        info!(
            job_type = %settings.job_type,
            runners = settings.max_concurrent_calculations,
            "daemon starting"
        );

        let incoming: Arc<dyn JobQueue<JobRequest>> =
            open_queue(&settings.incoming_queue, INCOMING_QUEUE).await?;
        let work: Arc<dyn JobQueue<JobConfiguration>> =
            open_queue(&settings.work_queue, WORK_QUEUE).await?;

        let queues = QueueRegistry::new();
        queues.register(INCOMING_QUEUE, incoming.clone());
        queues.register(WORK_QUEUE, work.clone());
        info!(queues = ?queues.names(), "queues registered");

        let parser = Arc::new(CourseStatsParser::new(
            DEFAULT_JOB_TIMEOUT_MS.min(settings.max_job_timeout_ms),
        ));
        let listeners = Arc::new(CompletionListeners::new());
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(listeners.clone().dispatch(completion_rx));

        let provider = JobProvider::new(
            work.clone(),
            self.store.clone(),
            ProviderConfig::from_settings(&settings),
        );
        let context = RunnerContext {
            provider,
            factory: Arc::new(StepRegistry::new(self.repository.clone())),
            formatter: Arc::new(CourseInputFormatter),
            sink: Arc::new(RepositoryResultSink::new(self.repository.clone())),
            completions: completion_tx,
        };
        let runners: Vec<_> = (0..settings.max_concurrent_calculations)
            .map(|id| JobRunner::spawn(id, context.clone()))
            .collect();
        drop(context);

        let intake = tokio::spawn(intake_loop(
            incoming.clone(),
            work.clone(),
            parser.clone(),
            listeners.clone(),
        ));

        let sweep_ctx = SweepContext {
            store: self.store.clone(),
            work: work.clone(),
            parser,
            listeners,
            pending: Arc::new(Mutex::new(HashSet::new())),
            job_type: settings.job_type.clone(),
        };
        let sweep_shutdown = shutdown.child_token();
        let sweeps = [
            spawn_sweep(
                SweepKind::Refresh,
                settings.refresh_scan.as_duration(),
                sweep_ctx.clone(),
                sweep_shutdown.clone(),
            ),
            spawn_sweep(
                SweepKind::Recalculation,
                settings.recalculation_scan.as_duration(),
                sweep_ctx,
                sweep_shutdown,
            ),
        ];

        info!("daemon running");
        shutdown.cancelled().await;
        info!("shutdown requested, draining in-flight jobs");

        let graceful = async {
            incoming.close().await;
            work.close().await;
            let _ = intake.await;
            for sweep in sweeps {
                let _ = sweep.await;
            }
            for runner in runners {
                runner.stop_and_wait().await;
            }
            let _ = dispatch.await;
        };
        tokio::select! {
            _ = graceful => info!("daemon stopped"),
            _ = force.cancelled() => {
                warn!("forced shutdown, abandoning in-flight jobs");
                if let Some(handler) = self.abrupt_handler {
                    handler();
                }
            }
        }
        Ok(())
    }
}

/// Drains the incoming queue: parse, register a completion listener, hand
/// the configuration to the work queue. Exits when the queue closes.
async fn intake_loop(
    incoming: Arc<dyn JobQueue<JobRequest>>,
    work: Arc<dyn JobQueue<JobConfiguration>>,
    parser: Arc<CourseStatsParser>,
    listeners: Arc<CompletionListeners>,
) {
    loop {
        let request = match incoming.dequeue().await {
            Ok(request) => request,
            Err(e) if e.is_closed() => break,
            Err(e) => {
                warn!(error = %e, "failed to read incoming request");
                continue;
            }
        };

        let config = match parser.parse(&request).await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "rejected incoming request");
                continue;
            }
        };

        // Listener first, enqueue second: the completion can never beat
        // the registration.
        let rx = listeners.register(config.job_id.clone());
        let job_id = config.job_id.clone();
        tokio::spawn(async move {
            if let Ok(outcome) = rx.await {
                debug!(job = %job_id, clean = outcome.is_clean(), "request settled");
            }
        });

        info!(job = %config.job_id, name = %config.name, "request accepted");
        match work.enqueue(config).await {
            Ok(_) => {}
            Err(e) if e.is_closed() => break,
            Err(e) => warn!(error = %e, "failed to enqueue job"),
        }
    }
    debug!("intake loop stopped");
}

fn spawn_sweep(
    kind: SweepKind,
    every: Duration,
    ctx: SweepContext,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires immediately; consume that so the first sweep
        // happens one full period after startup.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            if let Err(e) = run_sweep(kind, &ctx).await {
                warn!(sweep = kind.name(), error = %e, "sweep failed");
            }
        }
        debug!(sweep = kind.name(), "sweep stopped");
    })
}

async fn run_sweep(kind: SweepKind, ctx: &SweepContext) -> Result<(), DaemonError> {
    let rows = match kind {
        SweepKind::Refresh => ctx.store.list_periodical(&ctx.job_type).await?,
        SweepKind::Recalculation => ctx.store.list_rerun_requested(&ctx.job_type).await?,
    };
    debug!(sweep = kind.name(), rows = rows.len(), "sweep pass");

    for row in rows {
        if row.state == JobState::Running {
            continue;
        }
        if !ctx.pending.lock().unwrap().insert(row.job_id.clone()) {
            // Replacement still in flight from an earlier pass.
            continue;
        }
        if let Err(e) = dispatch_replacement(kind, ctx, &row).await {
            ctx.pending.lock().unwrap().remove(&row.job_id);
            warn!(sweep = kind.name(), job = %row.job_id, error = %e, "re-dispatch failed");
        }
    }
    Ok(())
}

/// Regenerate a job from its persisted descriptor under a fresh id and
/// move the sweep flag to the new row once the replacement completes
/// cleanly. Flags stay put on failure so the next pass retries.
async fn dispatch_replacement(
    kind: SweepKind,
    ctx: &SweepContext,
    row: &JobRow,
) -> Result<(), DaemonError> {
    let old_config = row.configuration()?;
    let Some(id_course) = old_config
        .input_config
        .get("id_course")
        .and_then(Value::as_i64)
    else {
        warn!(job = %row.job_id, "persisted descriptor has no course id, skipping");
        ctx.pending.lock().unwrap().remove(&row.job_id);
        return Ok(());
    };

    let (force, periodical) = match kind {
        SweepKind::Refresh => (false, true),
        SweepKind::Recalculation => (true, old_config.periodical),
    };
    let config = ctx.parser.build_configuration(id_course, force, periodical);
    let new_id = config.job_id.clone();
    let rx = ctx.listeners.register(new_id.clone());

    info!(
        sweep = kind.name(),
        old = %row.job_id,
        new = %new_id,
        id_course,
        "re-dispatching job"
    );
    ctx.work.enqueue(config).await?;

    let old_id = row.job_id.clone();
    let store = ctx.store.clone();
    let pending = ctx.pending.clone();
    tokio::spawn(async move {
        let outcome = rx.await;
        pending.lock().unwrap().remove(&old_id);
        match outcome {
            Ok(outcome) if outcome.is_clean() => {
                let flip = match kind {
                    SweepKind::Refresh => store.swap_periodical(&old_id, &new_id, true).await,
                    SweepKind::Recalculation => store.clear_rerun(&old_id, &new_id, false).await,
                };
                match flip {
                    Ok(()) => debug!(old = %old_id, new = %new_id, "sweep flag moved"),
                    Err(e) => warn!(old = %old_id, new = %new_id, error = %e, "flag flip failed"),
                }
            }
            Ok(_) => {
                warn!(old = %old_id, new = %new_id, "replacement failed, flags unchanged");
            }
            Err(_) => {
                // Dispatch shut down before the replacement settled.
                debug!(old = %old_id, "no completion for replacement");
            }
        }
    });
    Ok(())
}
