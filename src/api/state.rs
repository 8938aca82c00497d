use crate::scheduler::ScheduleEngine;
use crate::storage::Pool;

/// Shared handler state; stores are cheap wrappers constructed per
/// request from the pool.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub engine: ScheduleEngine,
}
