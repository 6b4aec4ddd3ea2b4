//! Randomized-interval task scheduler
//!
//! Each registration owns one loop task: draw a delay in
//! `[min_time_seconds, max_time_seconds]`, sleep, run the task function, repeat.
//! Executions of one task are strictly sequential. Stopping only prevents
//! future executions; an invocation already in flight runs to completion.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::types::current_time_ms;
use crate::config::SchedulerConfig;

// =============================================================================
// Public types
// =============================================================================

pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a `TaskFn`
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Clone)]
pub struct TaskConfig {
    pub task_id: String,
    pub min_time_seconds: u64,
    pub max_time_seconds: u64,
    pub task_function: TaskFn,
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("task_id", &self.task_id)
            .field("min_time_seconds", &self.min_time_seconds)
            .field("max_time_seconds", &self.max_time_seconds)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a registration; times are Unix ms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub is_running: bool,
    pub start_time: u64,
    pub last_execution_time: Option<u64>,
    pub next_execution_time: Option<u64>,
    pub execution_count: u64,
}

/// Uniform whole-second delay in `[min, max]`
pub fn draw_delay(min_seconds: u64, max_seconds: u64) -> Duration {
    let secs = if min_seconds >= max_seconds {
        min_seconds
    } else {
        rand::thread_rng().gen_range(min_seconds..=max_seconds)
    };
    Duration::from_secs(secs)
}

// =============================================================================
// Registry
// =============================================================================

struct TaskProgress {
    start_time: u64,
    started_at: Instant,
    last_execution_time: Option<u64>,
    last_execution_at: Option<Instant>,
    next_execution_time: Option<u64>,
    execution_count: u64,
}

struct TaskRecord {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    progress: Arc<Mutex<TaskProgress>>,
    max_time_seconds: u64,
    _handle: JoinHandle<()>,
}

impl TaskRecord {
    /// Flag first, then timer
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TaskScheduler {
    config: SchedulerConfig,
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Register and arm a task, replacing any registration with the same id
    ///
    /// Returns `false` when `min_time_seconds > max_time_seconds`.
    pub fn start_task(&self, config: TaskConfig) -> bool {
        let TaskConfig {
            task_id,
            min_time_seconds,
            max_time_seconds,
            task_function,
        } = config;

        if min_time_seconds > max_time_seconds {
            warn!(
                task_id = %task_id,
                min = min_time_seconds,
                max = max_time_seconds,
                "Rejected task with min_time_seconds > max_time_seconds"
            );
            return false;
        }

        let raised = self.config.raised_thresholds(max_time_seconds);
        if !raised.is_empty() {
            warn!(
                task_id = %task_id,
                thresholds = ?raised,
                max = max_time_seconds,
                "Stale thresholds below twice max_time_seconds, raised for this task"
            );
        }

        if self.stop_task(&task_id) {
            info!(task_id = %task_id, "Existing registration stopped before restart");
        }

        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let progress = Arc::new(Mutex::new(TaskProgress {
            start_time: current_time_ms(),
            started_at: Instant::now(),
            last_execution_time: None,
            last_execution_at: None,
            next_execution_time: None,
            execution_count: 0,
        }));

        let handle = tokio::spawn(run_task(
            task_id.clone(),
            min_time_seconds,
            max_time_seconds,
            task_function,
            Arc::clone(&running),
            cancel.clone(),
            Arc::clone(&progress),
        ));

        let record = TaskRecord {
            running,
            cancel,
            progress,
            max_time_seconds,
            _handle: handle,
        };
        let displaced = lock(&self.tasks).insert(task_id.clone(), record);
        if let Some(old) = displaced {
            old.halt();
        }

        info!(
            task_id = %task_id,
            min_seconds = min_time_seconds,
            max_seconds = max_time_seconds,
            "Task scheduled"
        );
        true
    }

    /// Stop and remove a task; `false` if it was not registered
    pub fn stop_task(&self, task_id: &str) -> bool {
        let removed = lock(&self.tasks).remove(task_id);
        match removed {
            Some(record) => {
                record.halt();
                info!(task_id = %task_id, "Task stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every task that looks stuck; returns the stopped ids
    ///
    /// A task is stale when its last completed execution is older than the
    /// after-execution threshold, or when it never completed one and was
    /// started longer ago than the first-run threshold. Both thresholds are
    /// raised to at least twice the task's maximum delay.
    pub fn cleanup_stale_error(&self) -> Vec<String> {
        let stale: Vec<String> = {
            let tasks = lock(&self.tasks);
            tasks
                .iter()
                .filter(|(_, record)| self.is_stale(record))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut stopped = Vec::new();
        for task_id in stale {
            if self.stop_task(&task_id) {
                warn!(task_id = %task_id, "Stale task cleaned up");
                stopped.push(task_id);
            }
        }
        stopped.sort();
        stopped
    }

    fn is_stale(&self, record: &TaskRecord) -> bool {
        let floor = Duration::from_secs(record.max_time_seconds.saturating_mul(2));
        let progress = lock(&record.progress);
        match progress.last_execution_at {
            Some(at) => at.elapsed() > self.config.stale_after_execution().max(floor),
            None => {
                progress.started_at.elapsed() > self.config.stale_before_first_execution().max(floor)
            }
        }
    }

    /// Cancel every task and empty the registry; returns how many were removed
    pub fn force_clean_all_tasks(&self) -> usize {
        let drained: Vec<(String, TaskRecord)> = lock(&self.tasks).drain().collect();
        for (_, record) in &drained {
            record.halt();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All tasks force-cleaned");
        }
        drained.len()
    }

    pub fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        let tasks = lock(&self.tasks);
        tasks.get(task_id).map(|record| snapshot(task_id, record))
    }

    /// Status of every registered task, sorted by id
    pub fn get_all_task_statuses(&self) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = lock(&self.tasks)
            .iter()
            .map(|(id, record)| snapshot(id, record))
            .collect();
        statuses.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        statuses
    }

    pub fn task_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Run `cleanup_stale_error` on the configured interval until `cancel` fires
    ///
    /// Holds only a weak reference, so the loop ends once the scheduler is dropped.
    pub fn spawn_stale_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(scheduler) = scheduler.upgrade() else { break };
                        let stopped = scheduler.cleanup_stale_error();
                        if !stopped.is_empty() {
                            warn!(tasks = ?stopped, "Stale cleanup stopped tasks");
                        }
                    }
                }
            }
            debug!("Stale cleanup loop exited");
        })
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.force_clean_all_tasks();
    }
}

fn snapshot(task_id: &str, record: &TaskRecord) -> TaskStatus {
    let progress = lock(&record.progress);
    TaskStatus {
        task_id: task_id.to_string(),
        is_running: record.running.load(Ordering::SeqCst),
        start_time: progress.start_time,
        last_execution_time: progress.last_execution_time,
        next_execution_time: progress.next_execution_time,
        execution_count: progress.execution_count,
    }
}

// =============================================================================
// Task loop
// =============================================================================

async fn run_task(
    task_id: String,
    min_time_seconds: u64,
    max_time_seconds: u64,
    task_function: TaskFn,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    progress: Arc<Mutex<TaskProgress>>,
) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let delay = draw_delay(min_time_seconds, max_time_seconds);
        lock(&progress).next_execution_time = Some(current_time_ms() + delay.as_millis() as u64);
        debug!(task_id = %task_id, delay_secs = delay.as_secs(), "Next execution armed");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let invocation = AssertUnwindSafe(async { task_function().await }).catch_unwind();
        match invocation.await {
            Ok(Ok(())) => debug!(task_id = %task_id, "Task execution finished"),
            Ok(Err(e)) => error!(task_id = %task_id, error = %e, "Task execution failed"),
            Err(panic) => error!(task_id = %task_id, panic = %panic_message(&*panic), "Task execution panicked"),
        }

        let mut p = lock(&progress);
        p.last_execution_time = Some(current_time_ms());
        p.last_execution_at = Some(Instant::now());
        p.next_execution_time = None;
        p.execution_count += 1;
    }
    debug!(task_id = %task_id, "Task loop exited");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig {
            stale_after_execution_secs: 300,
            stale_before_first_execution_secs: 120,
            cleanup_interval_secs: 60,
        })
    }

    fn counting(counter: &Arc<AtomicUsize>) -> TaskFn {
        let counter = Arc::clone(counter);
        task_fn(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn config(id: &str, min: u64, max: u64, f: TaskFn) -> TaskConfig {
        TaskConfig {
            task_id: id.into(),
            min_time_seconds: min,
            max_time_seconds: max,
            task_function: f,
        }
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(min in 0u64..600, extra in 0u64..600) {
            let delay = draw_delay(min, min + extra);
            prop_assert!(delay >= Duration::from_secs(min));
            prop_assert!(delay <= Duration::from_secs(min + extra));
            prop_assert_eq!(delay.subsec_nanos(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_interval_fires_once() {
        let s = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(s.start_task(config("t1", 10, 10, counting(&calls))));

        advance(9.5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        advance(1.0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let status = s.get_task_status("t1").unwrap();
        assert!(status.is_running);
        assert_eq!(status.execution_count, 1);
        assert!(status.last_execution_time.is_some());
        assert!(status.next_execution_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_fire() {
        let s = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        s.start_task(config("t1", 10, 10, counting(&calls)));
        assert!(s.stop_task("t1"));

        advance(60.0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(s.get_task_status("t1").is_none());
        assert!(!s.stop_task("t1"));
        assert!(!s.stop_task("never-registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_registration() {
        let s = scheduler();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        s.start_task(config("t2", 10, 10, counting(&first)));
        s.start_task(config("t2", 10, 10, counting(&second)));

        advance(35.0).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        assert_eq!(s.task_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gaps_stay_within_bounds() {
        let s = scheduler();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        let started = Instant::now();
        s.start_task(config(
            "gaps",
            2,
            5,
            task_fn(move || {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(Instant::now());
                    Ok(())
                }
            }),
        ));

        advance(120.0).await;
        let stamps = stamps.lock().unwrap().clone();
        assert!(stamps.len() >= 120 / 5);

        let mut previous = started;
        for stamp in stamps {
            let gap = stamp - previous;
            assert!(gap >= Duration::from_secs(2) && gap <= Duration::from_secs(5), "gap {:?}", gap);
            previous = stamp;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_panics_do_not_stop_loop() {
        let s = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        s.start_task(config(
            "flaky",
            1,
            1,
            task_fn(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n % 3 {
                        0 => Err(anyhow::anyhow!("boom")),
                        1 => panic!("task panicked"),
                        _ => Ok(()),
                    }
                }
            }),
        ));

        advance(6.5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(s.get_task_status("flaky").unwrap().execution_count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_bounds_rejected() {
        let s = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(!s.start_task(config("bad", 10, 5, counting(&calls))));
        assert_eq!(s.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_execution_completes_after_stop() {
        let s = scheduler();
        let finished = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&finished);
        s.start_task(config(
            "slow",
            1,
            1,
            task_fn(move || {
                let sink = Arc::clone(&sink);
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    sink.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ));

        advance(2.0).await;
        assert!(s.stop_task("slow"));
        advance(30.0).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_clean_empties_registry() {
        let s = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            s.start_task(config(id, 5, 10, counting(&calls)));
        }
        assert_eq!(s.get_all_task_statuses().len(), 3);

        assert_eq!(s.force_clean_all_tasks(), 3);
        assert_eq!(s.task_count(), 0);
        assert_eq!(s.force_clean_all_tasks(), 0);

        advance(60.0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stale_error_stops_hung_tasks() {
        let s = TaskScheduler::new(SchedulerConfig {
            stale_after_execution_secs: 5,
            stale_before_first_execution_secs: 5,
            cleanup_interval_secs: 1,
        });
        let calls = Arc::new(AtomicUsize::new(0));
        s.start_task(config("healthy", 1, 1, counting(&calls)));
        s.start_task(config(
            "hung",
            1,
            1,
            task_fn(|| futures_util::future::pending::<anyhow::Result<()>>()),
        ));

        advance(3.0).await;
        assert!(s.cleanup_stale_error().is_empty());

        advance(5.0).await;
        assert_eq!(s.cleanup_stale_error(), vec!["hung"]);
        assert_eq!(s.task_count(), 1);
        assert!(s.get_task_status("healthy").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_cleanup_runs_until_cancelled() {
        let s = Arc::new(TaskScheduler::new(SchedulerConfig {
            stale_after_execution_secs: 5,
            stale_before_first_execution_secs: 5,
            cleanup_interval_secs: 2,
        }));
        s.start_task(config(
            "hung",
            1,
            1,
            task_fn(|| futures_util::future::pending::<anyhow::Result<()>>()),
        ));

        let cancel = CancellationToken::new();
        let handle = s.spawn_stale_cleanup(cancel.clone());

        advance(10.0).await;
        assert_eq!(s.task_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
