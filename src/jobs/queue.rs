use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::error::ScrapeError;
use crate::jobs::memory::MemoryProbe;
use crate::jobs::model::{JobId, JobInfo, JobState, QueueStats};
use crate::jobs::work::Work;

type Hook = Arc<dyn Fn() + Send + Sync>;
type FailureHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Tick-driven scheduler for periodic and one-shot jobs.
///
/// New jobs are always preferred over waiting ones, so a steady stream of
/// additions can starve periodic jobs. Removing a job never aborts a run that
/// is already in flight.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    memory: Arc<dyn MemoryProbe>,
    state: Mutex<QueueState>,
    wake: Arc<Notify>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    running: bool,
    driver_spawned: bool,
    new_jobs: VecDeque<JobId>,
    /// Sorted by next deadline.
    waiting: VecDeque<JobId>,
    active: HashSet<JobId>,
    jobs: HashMap<JobId, JobEntry>,
    reschedules: u64,
    consecutive_stalls: u64,
}

struct JobEntry {
    interval: Option<Duration>,
    active: bool,
    executed: u64,
    last_run: Option<Instant>,
    last_run_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    parent: Option<JobId>,
    children: Vec<JobId>,
    state: JobState,
    work: Work,
    on_success: Vec<Hook>,
    on_failure: Vec<FailureHook>,
    on_done: Vec<Hook>,
}

impl JobEntry {
    fn deadline(&self) -> Option<Instant> {
        Some(self.last_run? + self.interval?)
    }

    fn next_run(&self, now: Instant) -> Duration {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn info(&self, id: JobId) -> JobInfo {
        JobInfo {
            id,
            state: self.state,
            interval_secs: self.interval.map(|interval| interval.as_secs()),
            active: self.active,
            executed: self.executed,
            last_run_at: self.last_run_at,
            started_at: self.started_at,
            parent: self.parent,
            children: self.children.clone(),
        }
    }
}

enum Tick {
    /// A job was started; try the next one right away.
    Started,
    Sleep(Duration),
    Idle,
}

impl JobQueue {
    pub fn new(config: QueueConfig, memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                memory,
                state: Mutex::new(QueueState::default()),
                wake: Arc::new(Notify::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Registers `work`. A missing or zero interval makes a one-shot job.
    pub fn add_job(&self, work: Work, interval: Option<Duration>) -> JobHandle {
        self.add_job_with(work, interval, |_| {})
    }

    /// Like [`JobQueue::add_job`], but `setup` runs before the job becomes
    /// eligible, so callbacks registered there cannot miss the first run.
    pub fn add_job_with(
        &self,
        work: Work,
        interval: Option<Duration>,
        setup: impl FnOnce(&JobHandle),
    ) -> JobHandle {
        self.inner.add(work, interval, None, setup)
    }

    /// Stops future runs of the job. Returns `false` if the job is unknown or
    /// was already removed.
    pub fn remove_job(&self, handle: &JobHandle) -> bool {
        self.inner.remove(handle.id)
    }

    pub fn start(&self) {
        let spawn_driver = {
            let mut state = self.inner.lock();
            state.running = true;
            !std::mem::replace(&mut state.driver_spawned, true)
        };
        if spawn_driver {
            tokio::spawn(drive(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.wake),
            ));
            tracing::debug!("job queue driver started");
        }
        self.inner.wake.notify_one();
    }

    pub fn pause(&self) {
        self.inner.lock().running = false;
    }

    /// Drops every queued job. In-flight runs finish and fire their callbacks,
    /// but are not queued again.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let QueueState {
            new_jobs,
            waiting,
            jobs,
            ..
        } = &mut *state;
        for id in new_jobs.drain(..).chain(waiting.drain(..)) {
            jobs.remove(&id);
        }
        for entry in jobs.values_mut() {
            entry.active = false;
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            new: state.new_jobs.len(),
            waiting: state.waiting.len(),
            active: state.active.len(),
            reschedules: state.reschedules,
        }
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let state = self.inner.lock();
        let mut infos: Vec<_> = state
            .jobs
            .iter()
            .map(|(id, entry)| entry.info(*id))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

/// Reference to a job registered on a [`JobQueue`].
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn on_success(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        self.with_entry(|entry| entry.on_success.push(Arc::new(callback)));
        self
    }

    pub fn on_failure(&self, callback: impl Fn(&anyhow::Error) + Send + Sync + 'static) -> &Self {
        self.with_entry(|entry| entry.on_failure.push(Arc::new(callback)));
        self
    }

    /// Runs after every completed run, whatever its outcome.
    pub fn on_done(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        self.with_entry(|entry| entry.on_done.push(Arc::new(callback)));
        self
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.with_entry(|entry| entry.last_run_at).flatten()
    }

    /// Time until the job is eligible again; zero when it is due.
    pub fn next_run(&self) -> Duration {
        let now = Instant::now();
        self.with_entry(|entry| entry.next_run(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Snapshot of the job, or `None` once it left the queue.
    pub fn info(&self) -> Option<JobInfo> {
        let id = self.id;
        self.with_entry(|entry| entry.info(id))
    }

    /// Registers a job tracked as a child of this one.
    pub fn add_child_job(&self, work: Work, interval: Option<Duration>) -> JobHandle {
        self.add_child_job_with(work, interval, |_| {})
    }

    pub fn add_child_job_with(
        &self,
        work: Work,
        interval: Option<Duration>,
        setup: impl FnOnce(&JobHandle),
    ) -> JobHandle {
        self.inner.add(work, interval, Some(self.id), setup)
    }

    fn with_entry<T>(&self, f: impl FnOnce(&mut JobEntry) -> T) -> Option<T> {
        let mut state = self.inner.lock();
        state.jobs.get_mut(&self.id).map(f)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(
        self: &Arc<Self>,
        work: Work,
        interval: Option<Duration>,
        parent: Option<JobId>,
        setup: impl FnOnce(&JobHandle),
    ) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = JobEntry {
            interval: interval.filter(|interval| !interval.is_zero()),
            active: true,
            executed: 0,
            last_run: None,
            last_run_at: None,
            started_at: None,
            parent,
            children: Vec::new(),
            state: JobState::New,
            work,
            on_success: Vec::new(),
            on_failure: Vec::new(),
            on_done: Vec::new(),
        };
        {
            let mut state = self.lock();
            state.jobs.insert(id, entry);
            if let Some(parent) = parent
                && let Some(parent) = state.jobs.get_mut(&parent)
            {
                parent.children.push(id);
            }
        }

        let handle = JobHandle {
            id,
            inner: Arc::clone(self),
        };
        setup(&handle);

        let queued = {
            let mut state = self.lock();
            let still_active = state.jobs.get(&id).is_some_and(|entry| entry.active);
            if still_active {
                state.new_jobs.push_back(id);
            }
            still_active
        };
        if queued {
            tracing::debug!(job_id = %id, ?interval, "job added");
            self.wake.notify_one();
        }
        handle
    }

    fn remove(&self, id: JobId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.jobs.get_mut(&id) else {
            return false;
        };
        if !entry.active {
            return false;
        }
        entry.active = false;
        match entry.state {
            JobState::Active => {}
            JobState::New => {
                state.new_jobs.retain(|queued| *queued != id);
                state.jobs.remove(&id);
            }
            JobState::Waiting => {
                state.waiting.retain(|queued| *queued != id);
                state.jobs.remove(&id);
            }
        }
        tracing::debug!(job_id = %id, "job removed");
        true
    }

    fn tick(self: &Arc<Self>) -> Tick {
        let now = Instant::now();
        let mut state = self.lock();

        let candidate = match (state.new_jobs.front(), state.waiting.front()) {
            (Some(&id), _) => (id, JobState::New),
            (None, Some(&id)) => (id, JobState::Waiting),
            (None, None) => return Tick::Idle,
        };

        if let Some(reason) = self.deferral(&state) {
            state.reschedules += 1;
            state.consecutive_stalls += 1;
            let stalls = state.consecutive_stalls;
            if stalls % self.config.stall_log_every.max(1) == 0 {
                let stall = ScrapeError::BackpressureStall { stalls, reason };
                tracing::warn!(reschedules = state.reschedules, "{stall}");
            }
            return Tick::Sleep(self.config.tick_delay);
        }
        state.consecutive_stalls = 0;

        let (id, from) = candidate;
        let Some(entry) = state.jobs.get_mut(&id) else {
            // Stale queue slot; the entry is gone.
            pop_front(&mut state, from);
            return Tick::Started;
        };
        let wait = entry.next_run(now);
        if !wait.is_zero() {
            return Tick::Sleep(wait);
        }

        entry.state = JobState::Active;
        entry.executed += 1;
        entry.started_at = Some(Utc::now());
        let work = entry.work.clone();
        pop_front(&mut state, from);
        state.active.insert(id);
        drop(state);

        tracing::debug!(job_id = %id, "job started");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // The inner task turns a panic in the work into a failed run.
            let result = match tokio::spawn(async move { work.start().await }).await {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("job panicked: {err}")),
            };
            inner.complete(id, result);
        });
        Tick::Started
    }

    fn deferral(&self, state: &QueueState) -> Option<&'static str> {
        if !state.running {
            return Some("paused");
        }
        if state.active.len() >= self.config.max_active {
            return Some("concurrency cap reached");
        }
        if let Some(limit) = self.config.memory_limit_bytes
            && let Some(used) = self.memory.used_bytes()
            && used > limit
        {
            return Some("memory ceiling exceeded");
        }
        None
    }

    fn complete(&self, id: JobId, result: anyhow::Result<()>) {
        let now = Instant::now();
        let hooks = {
            let mut state = self.lock();
            state.active.remove(&id);
            let QueueState { waiting, jobs, .. } = &mut *state;
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            entry.last_run = Some(now);
            entry.last_run_at = Some(Utc::now());
            let hooks = (
                entry.on_success.clone(),
                entry.on_failure.clone(),
                entry.on_done.clone(),
            );

            if entry.interval.is_some() && entry.active {
                entry.state = JobState::Waiting;
                let deadline = entry.deadline();
                let position = waiting.partition_point(|other| {
                    jobs.get(other)
                        .and_then(JobEntry::deadline)
                        .is_none_or(|other| Some(other) <= deadline)
                });
                waiting.insert(position, id);
            } else {
                jobs.remove(&id);
            }
            hooks
        };
        let (on_success, on_failure, on_done) = hooks;

        match &result {
            Ok(()) => {
                tracing::debug!(job_id = %id, "job finished");
                for callback in &on_success {
                    callback();
                }
            }
            Err(err) => {
                let failure = ScrapeError::JobFailure {
                    job_id: id,
                    message: format!("{err:#}"),
                };
                tracing::warn!(job_id = %id, "{failure}");
                for callback in &on_failure {
                    callback(err);
                }
            }
        }
        for callback in &on_done {
            callback();
        }
        self.wake.notify_one();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Lets an idle driver observe that the queue is gone.
        self.wake.notify_one();
    }
}

fn pop_front(state: &mut QueueState, from: JobState) {
    match from {
        JobState::New => state.new_jobs.pop_front(),
        JobState::Waiting => state.waiting.pop_front(),
        JobState::Active => None,
    };
}

async fn drive(inner: Weak<Inner>, wake: Arc<Notify>) {
    loop {
        let Some(queue) = inner.upgrade() else {
            tracing::debug!("job queue dropped; driver exiting");
            return;
        };
        let tick = queue.tick();
        drop(queue);

        match tick {
            Tick::Started => tokio::task::yield_now().await,
            Tick::Sleep(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {}
                }
            }
            Tick::Idle => wake.notified().await,
        }
    }
}
