/// Point-in-time counters of a pool. Fields are read independently, so a
/// snapshot taken while tasks are moving may be slightly inconsistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub running_workers: usize,
    pub idle_workers: usize,
    pub waiting_tasks: usize,
    pub submitted_tasks: usize,
    pub completed_tasks: usize,
    pub panicked_tasks: usize,
    pub discarded_tasks: usize,
}

impl PoolMetrics {
    /// Share of live workers currently running a task.
    pub fn utilization(&self) -> f64 {
        if self.running_workers == 0 {
            return 0.0;
        }
        let busy = self.running_workers.saturating_sub(self.idle_workers);
        busy as f64 / self.running_workers as f64
    }

    /// Tasks that left the pool one way or another.
    pub fn finished_tasks(&self) -> usize {
        self.completed_tasks + self.panicked_tasks + self.discarded_tasks
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.panicked_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
