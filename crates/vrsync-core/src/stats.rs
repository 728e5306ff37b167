// Per-run job statistics: named counters plus a coarse status.
//
// One `JobStats` is created for every top-level import and handed by
// reference to every layer that wants to count something. Counters use
// interior mutability so the same instance can be read by a status poller
// while the run is still going.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Lifecycle of a job. A run that fails part way stays `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    InProgress,
    Done,
}

/// Point-in-time copy of a job's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub name: String,
    pub status: JobState,
    pub to_do: u64,
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct JobStats {
    inner: Mutex<StatsSnapshot>,
}

impl JobStats {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Mutex::new(StatsSnapshot {
                name: name.to_string(),
                status: JobState::Pending,
                to_do: 0,
                counters: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment `counter`, starting it at zero if it has not been seen.
    pub fn bump(&self, counter: &str) {
        self.bump_by(counter, 1);
    }

    pub fn bump_by(&self, counter: &str, n: u64) {
        *self.lock().counters.entry(counter.to_string()).or_insert(0) += n;
    }

    /// Current value of `counter`; zero if it was never bumped.
    pub fn get(&self, counter: &str) -> u64 {
        self.lock().counters.get(counter).copied().unwrap_or(0)
    }

    pub fn set_status(&self, status: JobState) {
        self.lock().status = status;
    }

    pub fn status(&self) -> JobState {
        self.lock().status
    }

    pub fn add_to_do(&self, n: u64) {
        self.lock().to_do += n;
    }

    pub fn to_do(&self) -> u64 {
        self.lock().to_do
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    /// Human-readable JSON summary, suitable for a status endpoint.
    pub fn to_json(&self) -> String {
        // Only strings, integers and a unit enum; serialization cannot fail.
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_stats_are_pending_and_empty() {
        let stats = JobStats::new("tournamentImport");
        assert_eq!(stats.status(), JobState::Pending);
        assert_eq!(stats.to_do(), 0);
        assert_eq!(stats.get("anything"), 0);
    }

    #[test]
    fn bump_initializes_then_increments() {
        let stats = JobStats::new("t");
        stats.bump("created");
        stats.bump("created");
        stats.bump("skipped");
        assert_eq!(stats.get("created"), 2);
        assert_eq!(stats.get("skipped"), 1);
    }

    #[test]
    fn to_do_accumulates() {
        let stats = JobStats::new("t");
        stats.add_to_do(5);
        stats.add_to_do(3);
        assert_eq!(stats.to_do(), 8);
    }

    #[test]
    fn json_summary_shape() {
        let stats = JobStats::new("tournamentImport");
        stats.set_status(JobState::InProgress);
        stats.add_to_do(2);
        stats.bump("Tournaments created");

        let value: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "tournamentImport",
                "status": "IN_PROGRESS",
                "toDo": 2,
                "counters": { "Tournaments created": 1 }
            })
        );
    }

    #[test]
    fn shared_reference_counts_from_several_threads() {
        let stats = std::sync::Arc::new(JobStats::new("t"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.bump("n");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.get("n"), 400);
    }
}
