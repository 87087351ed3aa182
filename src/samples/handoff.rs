// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! State shared between the control thread and the audio thread.
//!
//! - [`BankHandoff`] carries newly published bank snapshots to the engine. The audio
//!   side only ever `try_lock`s it.
//! - [`Retirement`] moves anything whose last reference may die on the audio thread
//!   back to the control thread, so deallocation never happens inside a block.
//! - [`EngineStats`] holds atomic counters readable from anywhere via [`EngineMonitor`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use super::bank::{BankSnapshot, SampleSound};

/// A single-slot mailbox for bank snapshots.
#[derive(Default)]
pub(crate) struct BankHandoff {
    pending: Mutex<Option<Arc<BankSnapshot>>>,
}

impl BankHandoff {
    /// Publishes a snapshot, returning any earlier one the engine never picked up.
    /// Control side only.
    pub(crate) fn publish(&self, snapshot: Arc<BankSnapshot>) -> Option<Arc<BankSnapshot>> {
        self.pending.lock().replace(snapshot)
    }

    /// Takes the pending snapshot if there is one and the mailbox isn't contended.
    /// Never blocks.
    pub(crate) fn try_take(&self) -> Option<Arc<BankSnapshot>> {
        self.pending.try_lock().and_then(|mut pending| pending.take())
    }
}

/// Something released on the audio thread that must be dropped elsewhere.
pub(crate) enum Retired {
    Snapshot(Arc<BankSnapshot>),
    Sound(Arc<SampleSound>),
}

/// The audio side of the retirement queue.
pub(crate) struct Retirement {
    tx: Sender<Retired>,
    stats: Arc<EngineStats>,
}

impl Retirement {
    /// Creates a bounded retirement queue. The capacity is allocated up front so that
    /// sending never allocates.
    pub(crate) fn channel(
        capacity: usize,
        stats: Arc<EngineStats>,
    ) -> (Retirement, Receiver<Retired>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Retirement { tx, stats }, rx)
    }

    /// Hands a sound back to the control thread.
    pub(crate) fn sound(&self, sound: Arc<SampleSound>) {
        self.send(Retired::Sound(sound));
    }

    /// Hands a replaced snapshot back to the control thread.
    pub(crate) fn snapshot(&self, snapshot: Arc<BankSnapshot>) {
        self.send(Retired::Snapshot(snapshot));
    }

    fn send(&self, retired: Retired) {
        match self.tx.try_send(retired) {
            Ok(()) => {}
            // The item is dropped here. This only deallocates if the control side let
            // the queue fill up and nothing else holds a reference.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.retire_overflows.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Counters updated by the engine.
#[derive(Default, Debug)]
pub(crate) struct EngineStats {
    pub(crate) active_voices: AtomicUsize,
    pub(crate) held_samples: AtomicU64,
    pub(crate) bank_generation: AtomicU64,
    pub(crate) unmapped_notes: AtomicU64,
    pub(crate) dropped_notes: AtomicU64,
    pub(crate) stolen_voices: AtomicU64,
    pub(crate) dropped_events: AtomicU64,
    pub(crate) retire_overflows: AtomicU64,
}

/// Read-only view of engine activity, safe to poll from any thread.
#[derive(Clone, Debug)]
pub struct EngineMonitor {
    stats: Arc<EngineStats>,
}

impl EngineMonitor {
    pub(crate) fn new(stats: Arc<EngineStats>) -> Self {
        Self { stats }
    }

    /// Number of voices that were sounding at the end of the last block.
    pub fn active_voices(&self) -> usize {
        self.stats.active_voices.load(Ordering::Relaxed)
    }

    /// Number of samples any note has been continuously held for.
    pub fn held_samples(&self) -> u64 {
        self.stats.held_samples.load(Ordering::Relaxed)
    }

    /// Generation of the bank snapshot the engine is rendering from.
    pub fn bank_generation(&self) -> u64 {
        self.stats.bank_generation.load(Ordering::Relaxed)
    }

    /// Note-ons that had no sound mapped.
    pub fn unmapped_notes(&self) -> u64 {
        self.stats.unmapped_notes.load(Ordering::Relaxed)
    }

    /// Note-ons dropped because every voice was busy and stealing is disabled.
    pub fn dropped_notes(&self) -> u64 {
        self.stats.dropped_notes.load(Ordering::Relaxed)
    }

    /// Voices reclaimed from an older note.
    pub fn stolen_voices(&self) -> u64 {
        self.stats.stolen_voices.load(Ordering::Relaxed)
    }

    /// Events dropped because a block carried more than the configured maximum.
    pub fn dropped_events(&self) -> u64 {
        self.stats.dropped_events.load(Ordering::Relaxed)
    }

    /// Items released on the audio thread because the retirement queue was full.
    pub fn retire_overflows(&self) -> u64 {
        self.stats.retire_overflows.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_keeps_latest() {
        let handoff = BankHandoff::default();
        assert!(handoff.try_take().is_none());

        assert!(handoff.publish(Arc::new(BankSnapshot::default())).is_none());
        let replaced = handoff.publish(Arc::new(BankSnapshot::default()));
        assert!(replaced.is_some());

        assert!(handoff.try_take().is_some());
        assert!(handoff.try_take().is_none());
    }

    #[test]
    fn test_try_take_does_not_block_when_contended() {
        let handoff = BankHandoff::default();
        handoff.publish(Arc::new(BankSnapshot::default()));

        let guard = handoff.pending.lock();
        assert!(handoff.try_take().is_none());
        drop(guard);

        assert!(handoff.try_take().is_some());
    }

    #[test]
    fn test_retirement_overflow_is_counted() {
        let stats = Arc::new(EngineStats::default());
        let monitor = EngineMonitor::new(stats.clone());
        let (retirement, rx) = Retirement::channel(1, stats);

        retirement.snapshot(Arc::new(BankSnapshot::default()));
        retirement.snapshot(Arc::new(BankSnapshot::default()));

        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(monitor.retire_overflows(), 1);
    }
}
