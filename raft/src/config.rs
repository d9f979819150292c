//! Timer constants. Values mirror the exercise's own defaults; nothing here
//! is tuned for a production deployment.

#[derive(Debug, Clone)]
pub struct Config {
    /// Base election timeout; the actual deadline is randomized to
    /// `now + election_timeout * (1 + rand[0,1))`.
    pub election_timeout: f64,
    /// Longest a leader will stay silent toward a caught-up follower.
    pub heartbeat_interval: f64,
    /// Floor on how often a leader re-scans followers for replication work.
    pub min_replication_interval: f64,
    /// Base period of the election-deadline check.
    pub election_check_interval: f64,
    /// Extra `rand[0, jitter)` added to each election check.
    pub election_check_jitter: f64,
    /// When true, a future implementation should route reads through
    /// read-index/lease confirmation instead of the leader's local state.
    /// Not implemented: reads are served from whatever the leader's state
    /// machine currently holds, same as a write that happens to read back.
    pub linearizable_reads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_timeout: 2.0,
            heartbeat_interval: 1.0,
            min_replication_interval: 0.05,
            election_check_interval: 0.1,
            election_check_jitter: 0.1,
            linearizable_reads: false,
        }
    }
}

impl Config {
    pub fn election_deadline(&self, now: f64) -> f64 {
        now + self.election_timeout * (1.0 + rand::random::<f64>())
    }

    pub fn stepdown_deadline(&self, now: f64) -> f64 {
        now + self.election_timeout
    }

    pub fn election_check_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.election_check_interval + rand::random::<f64>() * self.election_check_jitter)
    }
}
