use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info};

use crate::clock::Clock;

/// When each endpoint last finished an experiment. Absent means never.
#[derive(Debug, Default)]
pub struct CooldownTable {
    last_completion: HashMap<String, Instant>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_completion(&self, endpoint: &str) -> Option<Instant> {
        self.last_completion.get(endpoint).copied()
    }

    pub fn stamp(&mut self, endpoint: &str, at: Instant) {
        self.last_completion.insert(endpoint.to_string(), at);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.last_completion.len()
    }
}

/// Serializes experiments per endpoint so that one experiment's token window
/// has fully reset before the next one on the same endpoint starts.
#[derive(Debug)]
pub struct CooldownScheduler {
    table:        CooldownTable,
    min_interval: Duration,
    margin:       Duration,
}

impl CooldownScheduler {
    pub fn new(min_interval: Duration, margin: Duration) -> Self {
        Self {
            table: CooldownTable::new(),
            min_interval,
            margin,
        }
    }

    #[cfg(test)]
    pub fn table(&self) -> &CooldownTable {
        &self.table
    }

    /// Nap needed before `endpoint` may be called at `now`, if any.
    pub fn required_wait(&self, endpoint: &str, now: Instant) -> Option<Duration> {
        let last = self.table.last_completion(endpoint)?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.min_interval {
            return None;
        }
        Some(self.min_interval - elapsed + self.margin)
    }

    /// Blocks until `endpoint` is outside its cooldown. Returns the nap taken.
    ///
    /// The table is left untouched; the owner stamps it with [`Self::stamp`]
    /// once the experiment is over.
    pub async fn wait_for_slot<C: Clock>(&self, endpoint: &str, clock: &C) -> Option<Duration> {
        let Some(nap) = self.required_wait(endpoint, clock.now()) else {
            debug!(endpoint, "cooldown.clear");
            return None;
        };

        info!(endpoint, nap_secs = nap.as_secs_f64(), "cooldown.sleep");
        clock.sleep(nap).await;
        Some(nap)
    }

    pub fn stamp(&mut self, endpoint: &str, at: Instant) {
        self.table.stamp(endpoint, at);
    }
}
