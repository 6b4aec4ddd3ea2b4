//! Task scheduler integration tests
//!
//! Exercises the scheduler through the public API with paused tokio time:
//! the fire/stop/restart scenarios, gap bounds across many tasks and
//! templates loaded from YAML.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use perp_desk::adapters::ConnectionManager;
use perp_desk::config::{load_config_from_str, HealthConfig, SchedulerConfig};
use perp_desk::core::{task_fn, TaskConfig, TaskFn, TaskScheduler};

fn counter_task(counter: &Arc<AtomicUsize>) -> TaskFn {
    let counter = Arc::clone(counter);
    task_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn task(id: &str, min: u64, max: u64, f: TaskFn) -> TaskConfig {
    TaskConfig {
        task_id: id.to_string(),
        min_time_seconds: min,
        max_time_seconds: max,
        task_function: f,
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_task_runs_exactly_once_per_period() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    assert!(scheduler.start_task(task("t1", 10, 10, counter_task(&calls))));

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get_task_status("t1").unwrap().execution_count, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_prevents_first_run() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    scheduler.start_task(task("t1", 10, 10, counter_task(&calls)));

    assert!(scheduler.stop_task("t1"));
    assert!(!scheduler.stop_task("t1"));
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_keeps_only_latest_registration() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let old = Arc::new(AtomicUsize::new(0));
    let new = Arc::new(AtomicUsize::new(0));
    scheduler.start_task(task("t2", 10, 10, counter_task(&old)));
    scheduler.start_task(task("t2", 10, 10, counter_task(&new)));

    tokio::time::sleep(Duration::from_millis(50_500)).await;
    assert_eq!(old.load(Ordering::SeqCst), 0);
    assert_eq!(new.load(Ordering::SeqCst), 5);
    assert_eq!(scheduler.get_all_task_statuses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn independent_tasks_respect_their_own_bounds() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let bounds = [("fast", 1, 3), ("medium", 5, 8), ("slow", 20, 30)];
    let start = Instant::now();
    let logs: Vec<Arc<Mutex<Vec<Instant>>>> = bounds.iter().map(|_| Arc::default()).collect();

    for ((id, min, max), log) in bounds.iter().zip(&logs) {
        let log = Arc::clone(log);
        scheduler.start_task(task(
            id,
            *min,
            *max,
            task_fn(move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(Instant::now());
                    Ok(())
                }
            }),
        ));
    }

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(scheduler.force_clean_all_tasks(), 3);

    for ((id, min, max), log) in bounds.iter().zip(&logs) {
        let stamps = log.lock().unwrap().clone();
        assert!(stamps.len() >= (300 / max) as usize, "{id} ran {} times", stamps.len());
        let mut previous = start;
        for stamp in stamps {
            let gap = stamp - previous;
            assert!(
                gap >= Duration::from_secs(*min) && gap <= Duration::from_secs(*max),
                "{id}: gap {gap:?} outside [{min}, {max}]"
            );
            previous = stamp;
        }
    }
    assert_eq!(scheduler.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_templates_keep_running_when_orders_fail() {
    let config = load_config_from_str(
        r#"
exchanges:
  - name: binance
tasks:
  - id: eth_sell
    symbol: ETH/USDT
    side: sell
    order_type: limit
    price: 3000.5
    min_amount: 0.1
    max_amount: 0.2
    min_interval_secs: 30
    max_interval_secs: 30
    exchanges: [binance]
"#,
    )
    .unwrap();

    // Nothing registered: every order attempt fails, the schedule must not
    let manager = ConnectionManager::new(HealthConfig::default());
    let scheduler = TaskScheduler::new(config.scheduler.clone());
    for template in &config.tasks {
        assert!(scheduler.start_task(template.into_task_config(manager.clone())));
    }

    tokio::time::sleep(Duration::from_secs(95)).await;
    let status = scheduler.get_task_status("eth_sell").unwrap();
    assert!(status.is_running);
    assert_eq!(status.execution_count, 3);
}
