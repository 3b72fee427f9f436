//! Distributed unique ID generation
//!
//! Snowflake layout, 64 bits total:
//! - 1 bit: unused (always 0)
//! - 41 bits: milliseconds since the custom epoch
//! - 10 bits: worker ID (0-1023)
//! - 12 bits: sequence number (0-4095 per millisecond)
//!
//! Worker ID uniqueness across processes is an operator obligation; the
//! recommended split is 0-63 for the write path and 64-127 for redirectors.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;

use crate::errors::{AppError, Result};

/// Custom epoch: 2025-01-01 00:00:00 UTC, in milliseconds.
/// Fixed at project inception; must never change once IDs have been issued.
pub const EPOCH_MS: i64 = 1_735_689_600_000;

const WORKER_ID_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_ID_BITS) - 1; // 1023
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1; // 4095
const WORKER_ID_SHIFT: u8 = SEQUENCE_BITS; // 12
const TIMESTAMP_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS; // 22

struct MinterState {
    sequence: u64,
    last_time_ms: i64,
}

/// Thread-safe Snowflake ID minter.
///
/// One mutex covers `(sequence, last_time_ms)`; everything else is
/// immutable after construction.
pub struct Minter {
    worker_id: u16,
    state: Mutex<MinterState>,
}

impl Minter {
    pub fn new(worker_id: u16) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(AppError::invalid_request(format!(
                "worker ID must be between 0 and {}, got {}",
                MAX_WORKER_ID, worker_id
            )));
        }

        Ok(Self {
            worker_id,
            state: Mutex::new(MinterState {
                sequence: 0,
                last_time_ms: -1,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Mint the next ID. Strictly increasing per instance.
    ///
    /// Busy-waits into the next millisecond when the per-millisecond
    /// sequence is exhausted. A backwards clock yields `ClockRegression`,
    /// which is fatal for the request; callers must not retry silently.
    pub fn next(&self) -> Result<u64> {
        let mut state = self.state.lock().expect("minter mutex poisoned");

        let mut now_ms = Self::now_ms();

        if now_ms < state.last_time_ms {
            return Err(AppError::clock_regression(format!(
                "clock moved backwards: last={}ms now={}ms",
                state.last_time_ms, now_ms
            )));
        }

        if now_ms == state.last_time_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // 同一毫秒内 4096 个序号用尽，自旋等待下一毫秒
                while now_ms <= state.last_time_ms {
                    std::hint::spin_loop();
                    now_ms = Self::now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_time_ms = now_ms;

        let id = ((now_ms as u64) << TIMESTAMP_SHIFT)
            | ((self.worker_id as u64) << WORKER_ID_SHIFT)
            | state.sequence;

        Ok(id)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis() - EPOCH_MS
    }
}

/// Extract the epoch-relative millisecond timestamp. Diagnostics only;
/// IDs are not ordered across workers.
pub fn timestamp_of(id: u64) -> i64 {
    (id >> TIMESTAMP_SHIFT) as i64
}

/// Extract the worker ID. Diagnostics only.
pub fn worker_of(id: u64) -> u16 {
    ((id >> WORKER_ID_SHIFT) & MAX_WORKER_ID as u64) as u16
}

/// Extract the sequence number. Diagnostics only.
pub fn sequence_of(id: u64) -> u64 {
    id & MAX_SEQUENCE
}

/// Convert an ID back to the wall-clock instant it was minted at.
pub fn minted_at(id: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_of(id) + EPOCH_MS)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_out_of_range_worker() {
        assert!(Minter::new(0).is_ok());
        assert!(Minter::new(1023).is_ok());
        assert!(Minter::new(1024).is_err());
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let minter = Minter::new(1).unwrap();
        let mut last = 0u64;
        for _ in 0..10_000 {
            let id = minter.next().unwrap();
            assert!(id > last, "id {} not greater than previous {}", id, last);
            last = id;
        }
    }

    #[test]
    fn test_round_trip_fields() {
        let minter = Minter::new(713).unwrap();
        let id = minter.next().unwrap();

        assert_eq!(worker_of(id), 713);
        assert!(sequence_of(id) <= MAX_SEQUENCE);

        let ts = minted_at(id);
        let drift = (Utc::now() - ts).num_seconds().abs();
        assert!(drift < 5, "minted_at drifted {}s from now", drift);
    }

    #[test]
    fn test_sign_bit_is_zero() {
        let minter = Minter::new(1023).unwrap();
        for _ in 0..100 {
            let id = minter.next().unwrap();
            assert_eq!(id >> 63, 0);
        }
    }

    #[test]
    fn test_concurrent_minting_yields_unique_ids() {
        let minter = Arc::new(Minter::new(5).unwrap());
        let mut handles = vec![];
        for _ in 0..8 {
            let m = Arc::clone(&minter);
            handles.push(std::thread::spawn(move || {
                (0..2000).map(|_| m.next().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "duplicate IDs minted under contention");
    }
}
