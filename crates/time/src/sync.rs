//! Clock synchronization against external time authorities.
//!
//! Sources are tried one at a time in priority order (daytime first, HTTP-date
//! second by default) and the first answer wins. The resulting offset is
//! published to a [`ClockContext`]; a failed round leaves the previous offset
//! in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{global_context, ClockContext};
use crate::config::TimeConfig;
use crate::error::SyncUnavailable;
use crate::source::{client_for, TimeSource, TimeSourceClient, TimeSourceKind};

/// Details of a successful sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub source: TimeSourceKind,
    pub endpoint: String,
    /// Time reported by the authority.
    pub authoritative: DateTime<Utc>,
    /// Local wall clock when the winning attempt started.
    pub local: DateTime<Utc>,
    /// `authoritative - local`, in microseconds.
    pub offset_us: i64,
}

impl SyncReport {
    pub fn offset(&self) -> chrono::Duration {
        chrono::Duration::microseconds(self.offset_us)
    }
}

/// Result of [`ClockSync::sync`]. `Unknown` means every source failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced(SyncReport),
    Unknown,
}

impl SyncOutcome {
    /// The authoritative instant, or `None` for `Unknown`.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncOutcome::Synced(report) => Some(report.authoritative),
            SyncOutcome::Unknown => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }

    pub fn into_result(self) -> Result<SyncReport, SyncUnavailable> {
        match self {
            SyncOutcome::Synced(report) => Ok(report),
            SyncOutcome::Unknown => Err(SyncUnavailable),
        }
    }
}

/// Ordered chain of time sources bound to a clock context.
pub struct ClockSync {
    clients: Vec<Box<dyn TimeSourceClient>>,
    context: Arc<ClockContext>,
}

impl ClockSync {
    /// Sync over caller-built clients, tried in the given order.
    pub fn new(clients: Vec<Box<dyn TimeSourceClient>>, context: Arc<ClockContext>) -> Self {
        Self { clients, context }
    }

    pub fn with_sources(sources: Vec<TimeSource>, context: Arc<ClockContext>) -> Self {
        Self::new(sources.into_iter().map(client_for).collect(), context)
    }

    pub fn from_config(config: &TimeConfig, context: Arc<ClockContext>) -> Self {
        Self::with_sources(config.time_sources(), context)
    }

    pub fn context(&self) -> &Arc<ClockContext> {
        &self.context
    }

    pub fn sources(&self) -> impl Iterator<Item = &TimeSource> {
        self.clients.iter().map(|client| client.source())
    }

    /// Upper bound on one round: the sum of every source timeout.
    pub fn max_duration(&self) -> Duration {
        self.sources().map(|source| source.timeout).sum()
    }

    /// Run one sync round and publish the offset on success.
    ///
    /// A call that arrives while another round on the same context is in
    /// flight waits for that round and returns its outcome instead of
    /// starting a second one. Dropping the returned future before it resolves
    /// leaves the context untouched.
    pub async fn sync(&self) -> SyncOutcome {
        let observed = self.context.completed_rounds();
        let _gate = self.context.sync_gate.lock().await;

        if self.context.completed_rounds() != observed {
            debug!("joined an in-flight sync round");
            return self.context.last_outcome();
        }

        let outcome = self.run_round().await;
        self.context.finish_round(&outcome);
        outcome
    }

    async fn run_round(&self) -> SyncOutcome {
        for client in &self.clients {
            let source = client.source();
            let local = self.context.wall_now();

            match client.fetch().await {
                Ok(authoritative) => {
                    let offset = authoritative.signed_duration_since(local);
                    let Some(offset_us) = offset.num_microseconds() else {
                        warn!(
                            source = %source.kind,
                            %authoritative,
                            %local,
                            "offset does not fit in i64 microseconds, trying next"
                        );
                        continue;
                    };
                    info!(
                        source = %source.kind,
                        endpoint = %source.endpoint,
                        %authoritative,
                        offset_us,
                        "clock synchronized"
                    );
                    return SyncOutcome::Synced(SyncReport {
                        source: source.kind,
                        endpoint: source.endpoint.clone(),
                        authoritative,
                        local,
                        offset_us,
                    });
                }
                Err(err) => {
                    warn!(source = %source.kind, error = %err, "time source failed, trying next");
                }
            }
        }

        warn!(
            sources = self.clients.len(),
            "all time sources exhausted, keeping offset {} µs",
            self.context.offset_us()
        );
        SyncOutcome::Unknown
    }

    /// Spawn a detached task that re-syncs every `every`, starting immediately.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !self.sync().await.is_synced() {
                    debug!("periodic sync found no source, retrying in {every:?}");
                }
            }
        })
    }
}

/// Sync the process-wide clock over the default daytime → HTTP-date chain.
pub async fn sync() -> SyncOutcome {
    ClockSync::with_sources(TimeSource::default_chain(), global_context())
        .sync()
        .await
}
