//! Queue metrics exposed to observers.

use serde::{Deserialize, Serialize};

/// Point-in-time counts of the job queue's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
	/// Jobs admitted but not yet picked up, including retry-scheduled jobs.
	pub waiting: u64,
	/// Jobs currently held by a worker.
	pub active: u64,
	/// Jobs that completed successfully since startup.
	pub completed: u64,
	/// Jobs that exhausted their attempts since startup.
	pub failed: u64,
	pub total: u64,
}

impl QueueMetrics {
	pub fn new(waiting: u64, active: u64, completed: u64, failed: u64) -> Self {
		Self {
			waiting,
			active,
			completed,
			failed,
			total: waiting + active + completed + failed,
		}
	}
}
