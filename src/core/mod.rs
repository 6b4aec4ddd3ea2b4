//! Core module - manager events, reconnect backoff, task scheduling
//!
//! Re-exports are explicit so the public API only grows on purpose.

pub mod events;
pub mod reconnect;
pub mod scheduler;
pub mod templates;

pub use events::{log_event, ManagerEvent, ManagerEventType, MANAGER_EVENT_CAPACITY};
pub use reconnect::{backoff_delay, ReconnectOutcome, ReconnectPolicy, MAX_BACKOFF_MS};
pub use scheduler::{task_fn, TaskConfig, TaskFn, TaskScheduler, TaskStatus};
pub use templates::TaskTemplate;
