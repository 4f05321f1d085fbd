//! Bounded-concurrency registration of anomaly-cleared candidates.
//!
//! A run moves `Idle -> Running -> Done`. On entering `Running` it snapshots
//! the inventory's dedup keys; a fixed pool of workers then drains a shared
//! queue. For every item the worker registers the item and its
//! exchange-category pair, skipping any whose key is already taken. Keys are
//! reserved with a single check-and-insert under the set's lock, so two
//! workers can never both register the same key. There is no cancellation:
//! a started run drains the whole queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RegistrationConfig;
use crate::error::RegistrationError;
use crate::matching::{Dedup, IdentityKey};
use crate::models::FixtureRecord;
use crate::size::SizeParser;

/// The add-item operation a run hands each new record to.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, item: &FixtureRecord) -> Result<(), RegistrationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Done,
}

/// Outcome of one run. `inserted` order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct RegistrationReport {
    /// Queue length at start
    pub total: usize,

    /// Queue items fully handled
    pub processed: usize,

    pub inserted: Vec<FixtureRecord>,

    /// Records whose key was already taken
    pub skipped: usize,

    pub failed: Vec<(FixtureRecord, String)>,

    /// Dedup keys known at the end of the run
    pub keys: HashSet<IdentityKey<Dedup>>,
}

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

struct Shared {
    queue: Mutex<VecDeque<FixtureRecord>>,
    keys: Mutex<HashSet<IdentityKey<Dedup>>>,
    done: AtomicUsize,
    total: usize,
    parser: Arc<SizeParser>,
    progress: Arc<ProgressFn>,
}

#[derive(Default)]
struct WorkerTally {
    inserted: Vec<FixtureRecord>,
    skipped: usize,
    failed: Vec<(FixtureRecord, String)>,
}

/// A single registration run over a fixed queue.
pub struct RegistrationRun {
    state: RunState,
    queue: Vec<FixtureRecord>,
    parser: Arc<SizeParser>,
    config: RegistrationConfig,
}

impl RegistrationRun {
    pub fn new(queue: Vec<FixtureRecord>, config: RegistrationConfig) -> Self {
        Self {
            state: RunState::Idle,
            queue,
            parser: Arc::new(SizeParser::default_parser().clone()),
            config,
        }
    }

    pub fn with_parser(mut self, parser: SizeParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drain the queue against `inventory`, reporting `(done, total)` after
    /// each queue item. A run executes once; later calls return an empty
    /// report.
    pub async fn run<R, F>(
        &mut self,
        inventory: &[FixtureRecord],
        registrar: Arc<R>,
        progress: F,
    ) -> RegistrationReport
    where
        R: Registrar + 'static,
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        if self.state != RunState::Idle {
            warn!(state = ?self.state, "registration run already started");
            return RegistrationReport::default();
        }
        self.state = RunState::Running;

        let snapshot: HashSet<IdentityKey<Dedup>> = inventory
            .iter()
            .map(|item| IdentityKey::for_fixture(&self.parser, item))
            .collect();

        let queue: VecDeque<FixtureRecord> = std::mem::take(&mut self.queue).into();
        let total = queue.len();
        let workers = self.config.worker_count(total);
        info!(total, workers, existing = snapshot.len(), "registration run started");

        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            keys: Mutex::new(snapshot),
            done: AtomicUsize::new(0),
            total,
            parser: Arc::clone(&self.parser),
            progress: Arc::new(progress),
        });

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            tasks.spawn(drain_queue(Arc::clone(&shared), Arc::clone(&registrar)));
        }

        let mut report = RegistrationReport {
            total,
            ..RegistrationReport::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tally) => {
                    report.inserted.extend(tally.inserted);
                    report.skipped += tally.skipped;
                    report.failed.extend(tally.failed);
                }
                Err(err) => warn!(error = %err, "registration worker aborted"),
            }
        }

        report.processed = shared.done.load(Ordering::SeqCst);
        report.keys = shared.keys.lock().await.clone();
        self.state = RunState::Done;

        info!(
            processed = report.processed,
            inserted = report.inserted.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "registration run finished"
        );
        report
    }
}

async fn drain_queue<R: Registrar>(shared: Arc<Shared>, registrar: Arc<R>) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let next = shared.queue.lock().await.pop_front();
        let Some(item) = next else {
            break;
        };

        let pair = item.exchange_counterpart();
        let records = if pair == item { vec![item] } else { vec![item, pair] };

        for record in records {
            let key = IdentityKey::<Dedup>::for_fixture(&shared.parser, &record);
            let reserved = shared.keys.lock().await.insert(key.clone());
            if !reserved {
                debug!(key = %key, "already registered, skipping");
                tally.skipped += 1;
                continue;
            }

            match registrar.register(&record).await {
                Ok(()) => tally.inserted.push(record),
                Err(err) => {
                    shared.keys.lock().await.remove(&key);
                    warn!(key = %key, error = %err, "registration failed");
                    tally.failed.push((record, err.to_string()));
                }
            }
        }

        let done = shared.done.fetch_add(1, Ordering::SeqCst) + 1;
        (shared.progress)(done, shared.total);
    }

    tally
}

/// Register `queue` against `inventory` with a bounded worker pool.
pub async fn run_bounded_registration<R, F>(
    queue: Vec<FixtureRecord>,
    inventory: &[FixtureRecord],
    registrar: Arc<R>,
    config: RegistrationConfig,
    progress: F,
) -> RegistrationReport
where
    R: Registrar + 'static,
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    RegistrationRun::new(queue, config)
        .run(inventory, registrar, progress)
        .await
}
