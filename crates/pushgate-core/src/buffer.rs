//! Notification buffer.
//!
//! Intake appends records while the sender periodically drains everything
//! collected so far. The two sides meet in a double-buffering arena:
//!
//! ```text
//!              generation (even → slot 0, odd → slot 1)
//!                     │
//!   add ──► [ live slot ]      [ retired slot ] ──► swap drains
//!                     ▲              │
//!                     └── swap flips ┘
//! ```
//!
//! `add` pins the slot it is about to write by bumping that slot's writer
//! count, then re-reads the generation. If a swap slipped in between it
//! backs out and retries against the new live slot. `swap` flips the
//! generation first and then waits for the retired slot's writers to drain,
//! so a record is either in the retired slot when it is drained or lands in
//! the new live slot, never both and never neither.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use pushgate_proto::{NotificationData, csv::CsvEntry};

/// One pending "someone has a message" signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationRecord {
    /// Recipient's ephemeral id
    pub ephemeral_id: i64,
    /// Round the signal was produced in
    pub round_id: u64,
    /// Fingerprint of the recipient identity
    pub identity_fingerprint: Vec<u8>,
    /// Hash of the pending message
    pub message_hash: Vec<u8>,
}

impl NotificationRecord {
    /// Build a record from a batch item.
    pub fn from_data(round_id: u64, data: NotificationData) -> Self {
        Self {
            ephemeral_id: data.ephemeral_id,
            round_id,
            identity_fingerprint: data.identity_fingerprint,
            message_hash: data.message_hash,
        }
    }
}

impl CsvEntry for NotificationRecord {
    fn message_hash(&self) -> &[u8] {
        &self.message_hash
    }

    fn identity_fingerprint(&self) -> &[u8] {
        &self.identity_fingerprint
    }
}

/// Records drained by one swap, grouped by ephemeral id.
pub type Drained = HashMap<i64, Vec<NotificationRecord>>;

#[derive(Debug, Default)]
struct Slot {
    records: Mutex<Drained>,
    writers: AtomicUsize,
}

/// Double-buffered accumulator of pending notifications.
#[derive(Debug)]
pub struct NotificationBuffer {
    slots: [Slot; 2],
    generation: AtomicU64,
    swap_lock: Mutex<()>,
    max_notifications: usize,
}

impl NotificationBuffer {
    /// Create an empty buffer whose swaps return at most
    /// `max_notifications` records per ephemeral id (at least 1).
    pub fn new(max_notifications: usize) -> Self {
        Self {
            slots: [Slot::default(), Slot::default()],
            generation: AtomicU64::new(0),
            swap_lock: Mutex::new(()),
            max_notifications: max_notifications.max(1),
        }
    }

    /// Per-group cap applied by [`swap`](Self::swap).
    pub fn max_notifications(&self) -> usize {
        self.max_notifications
    }

    fn slot(&self, generation: u64) -> &Slot {
        &self.slots[(generation % 2) as usize]
    }

    /// Append a record to the live slot.
    pub fn add(&self, record: NotificationRecord) {
        loop {
            let generation = self.generation.load(Ordering::SeqCst);
            let slot = self.slot(generation);
            slot.writers.fetch_add(1, Ordering::SeqCst);

            if self.generation.load(Ordering::SeqCst) != generation {
                slot.writers.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            slot.records.lock().entry(record.ephemeral_id).or_default().push(record);
            slot.writers.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    }

    /// Append many records.
    pub fn extend(&self, records: impl IntoIterator<Item = NotificationRecord>) {
        for record in records {
            self.add(record);
        }
    }

    /// Drain everything added so far.
    ///
    /// Each group comes back sorted by round id (stable, so arrival order is
    /// kept within a round) and capped at `max_notifications`; records past
    /// the cap are added back and show up in a later swap.
    pub fn swap(&self) -> Drained {
        let _exclusive = self.swap_lock.lock();

        let retired = self.slot(self.generation.fetch_add(1, Ordering::SeqCst));
        while retired.writers.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
        let mut drained = std::mem::take(&mut *retired.records.lock());

        for records in drained.values_mut() {
            records.sort_by_key(|r| r.round_id);
            if records.len() > self.max_notifications {
                let overflow = records.split_off(self.max_notifications);
                self.extend(overflow);
            }
        }

        drained
    }

    /// Number of records waiting for the next swap.
    pub fn len(&self) -> usize {
        self.slots.iter().map(|slot| slot.records.lock().values().map(Vec::len).sum::<usize>()).sum()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
