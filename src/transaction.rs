//! Transaction id allocation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-local transaction id source.
///
/// Starts at a random offset so ids from a previous connection are unlikely
/// to collide with fresh ones, then counts up (wrapping).
#[derive(Debug)]
pub struct TransactionIds {
    next: AtomicU32,
}

impl TransactionIds {
    /// Start from a time/pid derived random seed.
    pub fn random() -> Self {
        Self::starting_at(random_seed())
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next id.
    #[inline]
    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self::random()
    }
}

fn random_seed() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    let mixed = nanos.wrapping_mul(0x517cc1b727220a95) ^ pid;
    (mixed >> 32) as u32 ^ mixed as u32
}
