use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::model::*;

use super::{Ledger, LedgerError};

pub const ARCHIVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only list of bookings moved out of their slots, in the order they
/// were archived. Entries leave only through undo or [`Ledger::clear_archive`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Archive {
    entries: Vec<ArchivedBooking>,
}

impl Archive {
    pub fn from_entries(entries: Vec<ArchivedBooking>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ArchivedBooking] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArchivedBooking> {
        self.entries.get(index)
    }
}

impl Ledger {
    /// Move the bookings of the selected slots into the archive.
    ///
    /// Each slot is handled on its own: an unknown number or an Empty slot
    /// is recorded in the report and the rest carry on.
    pub fn archive(&mut self, selection: &BTreeSet<SlotNumber>, now: NaiveDateTime) -> ArchiveReport {
        let archived_at = now.format(ARCHIVED_AT_FORMAT).to_string();
        let mut report = ArchiveReport::default();

        for &n in selection {
            let outcome = match self.pool.find_by_number(n).map(Slot::is_empty) {
                None => ArchiveOutcome::NotFound,
                Some(true) => ArchiveOutcome::SkippedEmpty,
                Some(false) => {
                    let booking = self.pool.clear(n).unwrap_or_default();
                    self.archive.entries.push(ArchivedBooking {
                        slot_number: n,
                        booking,
                        archived_at: archived_at.clone(),
                    });
                    ArchiveOutcome::Archived
                }
            };
            match outcome {
                ArchiveOutcome::Archived => {}
                ArchiveOutcome::SkippedEmpty => warn!("archive: slot {n} is empty, skipped"),
                ArchiveOutcome::NotFound => warn!("archive: no slot {n}, skipped"),
            }
            report.outcomes.push((n, outcome));
        }

        if report.archived() > 0 {
            self.dirty = true;
            info!("archived {} slot(s)", report.archived());
        }
        report
    }

    /// Restore archive entry `index` into the slot it came from and drop the
    /// entry. Returns the slot number.
    ///
    /// The target slot is overwritten even if it has been re-booked since;
    /// the displaced booking is lost. If the slot no longer exists the entry
    /// is kept and `SlotNotFound` is returned. `days_remaining` is counted
    /// again from `today`.
    pub fn undo(&mut self, index: usize, today: NaiveDate) -> Result<SlotNumber, LedgerError> {
        let entry = self
            .archive
            .get(index)
            .ok_or(LedgerError::ArchiveEntryNotFound(index))?;
        let n = entry.slot_number;
        let booking = entry.booking.clone();

        let displaced = self.pool.restore(n, booking, today)?;
        if !displaced.is_blank() {
            warn!(
                "undo: slot {n} held a booking for {:?}; overwritten by archive entry {index}",
                displaced.client_name
            );
        }
        self.archive.entries.remove(index);
        self.dirty = true;
        info!("restored archive entry {index} to slot {n}");
        Ok(n)
    }

    /// Drop every archive entry. Returns how many were removed.
    pub fn clear_archive(&mut self) -> usize {
        let removed = self.archive.entries.len();
        self.archive.entries.clear();
        if removed > 0 {
            self.dirty = true;
        }
        info!("archive cleared ({removed} entries)");
        removed
    }
}
