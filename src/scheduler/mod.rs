//! Schedule engine: live timers, state transitions, startup recovery.

pub mod context;
pub mod engine;
pub mod error;

pub use self::context::SchedulerContext;
pub use self::engine::{CreateSchedule, RecoveryReport, ScheduleEngine, UpdateSchedule};
pub use self::error::{EngineError, Result};
