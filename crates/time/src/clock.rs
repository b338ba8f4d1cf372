// src/clock.rs
//
// Corrected wall clock: local UTC plus the offset learned by the last
// successful sync. The offset lives in an explicitly owned `ClockContext`;
// a lazily created process-wide context backs the free functions.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::sync::{SyncOutcome, SyncReport};

// ==== WALL CLOCKS ====

/// Source of local (untrusted) UTC time.
pub trait WallClock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A deterministic clock for tests. Time only moves when told to.
#[derive(Debug)]
pub struct FixedWallClock {
    micros: AtomicI64,
}

impl FixedWallClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(at.timestamp_micros()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.micros.store(at.timestamp_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let step = by.num_microseconds().unwrap_or(i64::MAX);
        self.micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |us| {
                Some(us.saturating_add(step))
            })
            .ok();
    }
}

impl WallClock for FixedWallClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

// ==== CONTEXT ====

/// Owner of the clock offset.
///
/// The offset is a single `AtomicI64` of microseconds, so readers never see a
/// partially written value. Writes happen only through a sync round, which
/// holds `sync_gate` for its whole duration.
#[derive(Debug)]
pub struct ClockContext {
    wall: Arc<dyn WallClock>,
    offset_us: AtomicI64,
    rounds: AtomicU64,
    last_outcome: RwLock<SyncOutcome>,
    last_sync: RwLock<Option<SyncReport>>,
    pub(crate) sync_gate: tokio::sync::Mutex<()>,
}

impl ClockContext {
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self {
            wall,
            offset_us: AtomicI64::new(0),
            rounds: AtomicU64::new(0),
            last_outcome: RwLock::new(SyncOutcome::Unknown),
            last_sync: RwLock::new(None),
            sync_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Context backed by the operating system clock, offset zero.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemWallClock))
    }

    /// Reader handle over this context.
    pub fn reader(self: &Arc<Self>) -> ClockReader {
        ClockReader {
            context: Arc::clone(self),
        }
    }

    /// Uncorrected local time.
    pub fn wall_now(&self) -> DateTime<Utc> {
        self.wall.now()
    }

    pub fn offset(&self) -> Duration {
        Duration::microseconds(self.offset_us.load(Ordering::Acquire))
    }

    pub fn offset_us(&self) -> i64 {
        self.offset_us.load(Ordering::Acquire)
    }

    /// Override the offset without a sync, e.g. from an operator or a test.
    pub fn set_offset(&self, offset: Duration) {
        self.offset_us.store(saturating_micros(offset), Ordering::Release);
    }

    /// Report of the most recent successful sync, if any.
    pub fn last_sync(&self) -> Option<SyncReport> {
        self.last_sync.read().clone()
    }

    /// Number of completed sync rounds, successful or not.
    pub fn completed_rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    pub(crate) fn last_outcome(&self) -> SyncOutcome {
        self.last_outcome.read().clone()
    }

    /// Publish the result of a sync round. Callers must hold `sync_gate`.
    pub(crate) fn finish_round(&self, outcome: &SyncOutcome) {
        if let SyncOutcome::Synced(report) = outcome {
            self.offset_us.store(report.offset_us, Ordering::Release);
            *self.last_sync.write() = Some(report.clone());
        }
        *self.last_outcome.write() = outcome.clone();
        self.rounds.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for ClockContext {
    fn default() -> Self {
        Self::system()
    }
}

fn saturating_micros(offset: Duration) -> i64 {
    offset.num_microseconds().unwrap_or(if offset < Duration::zero() {
        i64::MIN
    } else {
        i64::MAX
    })
}

// ==== READER ====

/// Cheap, cloneable view of a [`ClockContext`]. Never blocks, never fails.
#[derive(Debug, Clone)]
pub struct ClockReader {
    context: Arc<ClockContext>,
}

impl ClockReader {
    /// Corrected UTC time: local wall clock plus the stored offset.
    ///
    /// If the sum is not representable the uncorrected local time is returned.
    pub fn now(&self) -> DateTime<Utc> {
        let offset = self.context.offset();
        let local = self.context.wall_now();
        local.checked_add_signed(offset).unwrap_or(local)
    }

    /// Corrected UTC time in microseconds since the Unix epoch.
    pub fn now_us(&self) -> i64 {
        self.now().timestamp_micros()
    }

    pub fn offset(&self) -> Duration {
        self.context.offset()
    }

    pub fn context(&self) -> &Arc<ClockContext> {
        &self.context
    }
}

// ==== PROCESS-WIDE DEFAULT ====

static GLOBAL: Lazy<Arc<ClockContext>> = Lazy::new(|| Arc::new(ClockContext::system()));

/// The process-wide context used by [`now`], [`offset`] and [`crate::sync`].
pub fn global_context() -> Arc<ClockContext> {
    Arc::clone(&GLOBAL)
}

/// Corrected UTC time from the process-wide context.
pub fn now() -> DateTime<Utc> {
    GLOBAL.reader().now()
}

/// Corrected UTC time in microseconds from the process-wide context.
pub fn now_us() -> i64 {
    now().timestamp_micros()
}

/// Offset currently applied by the process-wide context.
pub fn offset() -> Duration {
    GLOBAL.offset()
}

// ==== TESTS ====

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 4, 15, 0, 0).unwrap()
    }

    fn fixed_context() -> (Arc<FixedWallClock>, Arc<ClockContext>) {
        let wall = Arc::new(FixedWallClock::new(anchor()));
        let context = Arc::new(ClockContext::new(wall.clone()));
        (wall, context)
    }

    #[test]
    fn starts_at_zero_offset() {
        let (_, context) = fixed_context();
        assert_eq!(context.offset(), Duration::zero());
        assert_eq!(context.reader().now(), anchor());
        assert!(context.last_sync().is_none());
        assert_eq!(context.completed_rounds(), 0);
    }

    #[test]
    fn now_tracks_wall_clock_plus_offset() {
        let (wall, context) = fixed_context();
        let reader = context.reader();
        context.set_offset(Duration::seconds(90));

        assert_eq!(reader.now(), anchor() + Duration::seconds(90));

        wall.advance(Duration::milliseconds(250));
        assert_eq!(
            reader.now(),
            anchor() + Duration::seconds(90) + Duration::milliseconds(250)
        );
    }

    proptest! {
        #[test]
        fn any_offset_is_applied_exactly(offset_us in -86_400_000_000i64..86_400_000_000) {
            let (_, context) = fixed_context();
            context.set_offset(Duration::microseconds(offset_us));
            prop_assert_eq!(
                context.reader().now(),
                anchor() + Duration::microseconds(offset_us)
            );
            prop_assert_eq!(context.offset_us(), offset_us);
        }
    }

    #[test]
    fn unrepresentable_sum_falls_back_to_local_time() {
        let (_, context) = fixed_context();
        context.set_offset(Duration::MAX);
        assert_eq!(context.reader().now(), anchor());
    }

    #[test]
    fn readers_never_observe_torn_offsets() {
        let (_, context) = fixed_context();
        let first = Duration::microseconds(-7_654_321_987);
        let second = Duration::microseconds(1_234_567_890_123);
        let allowed = [anchor() + first, anchor() + second, anchor()];

        let writer = {
            let context = Arc::clone(&context);
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    context.set_offset(if i % 2 == 0 { first } else { second });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = context.reader();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        let observed = reader.now();
                        assert!(allowed.contains(&observed), "torn read: {observed}");
                    }
                })
            })
            .collect();

        writer.join().expect("writer must not panic");
        for reader in readers {
            reader.join().expect("reader must not panic");
        }
    }

    #[test]
    fn fixed_clock_can_be_repositioned() {
        let wall = FixedWallClock::new(anchor());
        let later = anchor() + Duration::days(3);
        wall.set(later);
        assert_eq!(wall.now(), later);
    }

    #[test]
    fn global_context_is_shared() {
        let a = global_context();
        let b = global_context();
        assert!(Arc::ptr_eq(&a, &b));
        // Without a sync the process clock is trusted as-is.
        let before = Utc::now();
        let corrected = now() - offset();
        assert!(corrected >= before - Duration::seconds(1));
    }
}
