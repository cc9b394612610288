use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{InnerStoreLocked, Pattern, StoreError};

/// Cursors not resumed within this time are dropped by the sweeper.
const CURSOR_TTL: Duration = Duration::from_secs(5 * 60);

/// Chance of a SCAN call sweeping expired cursors. Abandoned scans are common enough that the
/// registry must be bounded, but rare enough that a precise timer isn't worth it.
const SWEEP_PROBABILITY: f64 = 0.01;

/// A suspended scan, resumed by presenting its id.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    pub id: u64,
    /// Index in the key snapshot of the first key not yet visited.
    pub position: usize,
    /// The last key visited before suspending.
    pub last_key: Bytes,
    pub pattern: String,
    pub created_at: Instant,
}

impl ScanCursor {
    /// Where to resume in `snapshot`. Keys may have been added or removed since the cursor was
    /// created, in which case the position is re-anchored right after `last_key`; snapshots come
    /// sorted out of the engine.
    fn resume_position(&self, snapshot: &[Bytes]) -> usize {
        let anchored = self
            .position
            .checked_sub(1)
            .and_then(|index| snapshot.get(index))
            .is_some_and(|key| *key == self.last_key);

        if anchored {
            self.position
        } else {
            snapshot.partition_point(|key| *key <= self.last_key)
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct ScanPage {
    /// Zero when the iteration is complete.
    pub cursor: u64,
    pub keys: Vec<Bytes>,
}

#[derive(Debug, Default)]
pub(super) struct CursorRegistry {
    cursors: HashMap<u64, ScanCursor>,
    last_id: u64,
}

impl CursorRegistry {
    fn take(&mut self, id: u64) -> Option<ScanCursor> {
        if id == 0 {
            return None;
        }
        self.cursors.remove(&id)
    }

    fn register(&mut self, position: usize, last_key: Bytes, pattern: &Pattern) -> u64 {
        self.last_id += 1;
        let id = self.last_id;

        self.cursors.insert(
            id,
            ScanCursor {
                id,
                position,
                last_key,
                pattern: pattern.as_str().to_string(),
                created_at: Instant::now(),
            },
        );

        id
    }

    fn maybe_sweep(&mut self) {
        if rand::thread_rng().gen_bool(SWEEP_PROBABILITY) {
            self.sweep(Instant::now());
        }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.cursors.len();
        self.cursors
            .retain(|_, cursor| now.duration_since(cursor.created_at) < CURSOR_TTL);

        let evicted = before - self.cursors.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired scan cursors");
        }
        evicted
    }

    pub(super) fn clear(&mut self) {
        self.cursors.clear();
    }

    fn len(&self) -> usize {
        self.cursors.len()
    }
}

impl<'a> InnerStoreLocked<'a> {
    /// Returns up to `count` keys matching `pattern`, starting where `cursor` left off.
    ///
    /// A cursor of zero, or one that is unknown or expired, starts a new iteration. Every call
    /// takes a fresh snapshot of the keyspace, so keys written between calls may be returned
    /// twice or missed; a key present for the whole iteration is always returned.
    pub fn scan(
        &mut self,
        cursor: u64,
        pattern: &Pattern,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let snapshot = self.snapshot()?;
        let start = self
            .state
            .cursors
            .take(cursor)
            .map_or(0, |cursor| cursor.resume_position(&snapshot));

        let count = count.max(1);
        let mut keys = Vec::new();
        let mut position = start;
        while position < snapshot.len() && keys.len() < count {
            if pattern.matches(&snapshot[position]) {
                keys.push(snapshot[position].clone());
            }
            position += 1;
        }

        let next = match position.checked_sub(1).and_then(|index| snapshot.get(index)) {
            Some(last_key) if position < snapshot.len() => {
                self.state
                    .cursors
                    .register(position, last_key.clone(), pattern)
            }
            _ => 0,
        };

        self.state.cursors.maybe_sweep();

        Ok(ScanPage { cursor: next, keys })
    }

    pub fn scan_cursors(&self) -> usize {
        self.state.cursors.len()
    }
}
