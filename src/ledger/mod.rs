mod archive;
mod error;
pub mod lifecycle;
mod pool;
mod report;

pub use archive::Archive;
pub use error::LedgerError;
pub use pool::SlotPool;
pub use report::ReportFilter;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::schema;
use crate::store::{RecordStore, Row, Table};

/// The whole in-memory state of one billboard book: the slot pool, the
/// archive and the summary row. Every core operation runs on this struct;
/// persistence is an explicit [`Ledger::flush`] call made by the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    pool: SlotPool,
    archive: Archive,
    summary: SummaryConfig,
    dirty: bool,
}

/// Field-level checks for a booking entered through Quick-Add.
pub(crate) fn validate_booking(booking: &Booking) -> Result<(), LedgerError> {
    if booking.text_fields().iter().any(|f| f.len() > MAX_FIELD_LEN) {
        return Err(LedgerError::Validation(format!(
            "field longer than {MAX_FIELD_LEN} bytes"
        )));
    }
    for (name, value) in [("start_date", &booking.start_date), ("end_date", &booking.end_date)] {
        if !value.trim().is_empty() && lifecycle::parse_date(value).is_none() {
            return Err(LedgerError::Validation(format!("malformed {name}: {value:?}")));
        }
    }
    for (name, value) in [("rent", booking.rent), ("advance", booking.advance)] {
        if value.is_some_and(|v| v < 0.0) {
            return Err(LedgerError::Validation(format!("{name} cannot be negative")));
        }
    }
    Ok(())
}

impl Ledger {
    /// A fresh ledger with `capacity` Empty slots and no archive.
    pub fn new(capacity: u32) -> Result<Self, LedgerError> {
        Ok(Self {
            pool: SlotPool::new(capacity)?,
            archive: Archive::default(),
            summary: SummaryConfig { total_slots: capacity },
            dirty: true,
        })
    }

    /// Rebuild the ledger from `store`.
    ///
    /// Capacity comes from `capacity` if given, else from the stored summary
    /// row, else [`DEFAULT_SLOTS`]. Tables that were never written load as
    /// empty and leave the ledger dirty so the first flush creates them.
    /// Stored `days_remaining` values are recounted from `today`.
    pub fn load(
        store: &dyn RecordStore,
        capacity: Option<u32>,
        today: NaiveDate,
    ) -> Result<Self, LedgerError> {
        let corrupt = |table: Table, e: schema::SchemaError| {
            LedgerError::Persistence(format!("{} table: {e}", table.name()))
        };

        let stored_summary = match store.load_table(Table::Summary)?.first() {
            Some(row) => Some(schema::summary_from_row(row).map_err(|e| corrupt(Table::Summary, e))?),
            None => None,
        };
        let total = capacity
            .or(stored_summary.map(|s| s.total_slots))
            .unwrap_or(DEFAULT_SLOTS);

        let slots = store
            .load_table(Table::Active)?
            .iter()
            .map(schema::slot_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(Table::Active, e))?;
        let mut pool = SlotPool::from_slots(slots, total)?;
        pool.refresh_days(today);

        let entries = store
            .load_table(Table::Archive)?
            .iter()
            .map(schema::archived_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(Table::Archive, e))?;

        let mut missing = false;
        for table in Table::ALL {
            missing |= !store.has_table(table)?;
        }
        let resized = stored_summary.is_some_and(|s| s.total_slots != total);

        info!(
            "ledger loaded: {total} slots, {} occupied, {} archived",
            pool.occupied().count(),
            entries.len()
        );

        Ok(Self {
            pool,
            archive: Archive::from_entries(entries),
            summary: SummaryConfig { total_slots: total },
            dirty: missing || resized,
        })
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn archive_entries(&self) -> &[ArchivedBooking] {
        self.archive.entries()
    }

    pub fn summary(&self) -> SummaryConfig {
        self.summary
    }

    /// True when there are changes not yet written by [`Ledger::flush`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn find_first_empty(&self) -> Option<SlotNumber> {
        self.pool.find_first_empty()
    }

    pub fn find_by_number(&self, n: SlotNumber) -> Option<&Slot> {
        self.pool.find_by_number(n)
    }

    pub fn status_of(&self, n: SlotNumber, alert_days: u32, today: NaiveDate) -> Option<StatusLabel> {
        self.pool
            .find_by_number(n)
            .map(|s| lifecycle::status(&s.booking.end_date, alert_days, today))
    }

    // ── Slot mutations ───────────────────────────────────────

    /// Grow or shrink the pool; see [`SlotPool::initialize`].
    pub fn resize(&mut self, n: u32) -> Result<(), LedgerError> {
        if n == self.pool.len() {
            return Ok(());
        }
        self.pool.initialize(n)?;
        self.summary.total_slots = n;
        self.dirty = true;
        info!("slot pool resized to {n}");
        Ok(())
    }

    pub fn assign(
        &mut self,
        n: SlotNumber,
        booking: Booking,
        overwrite: bool,
        today: NaiveDate,
    ) -> Result<(), LedgerError> {
        self.pool.assign(n, booking, overwrite, today)?;
        self.dirty = true;
        Ok(())
    }

    /// Quick-Add: validate `booking`, derive its balance and place it in the
    /// target slot. Returns the slot number used.
    pub fn quick_add(
        &mut self,
        target: SlotTarget,
        mut booking: Booking,
        overwrite: bool,
        today: NaiveDate,
    ) -> Result<SlotNumber, LedgerError> {
        validate_booking(&booking)?;
        booking.derive_balance();
        let n = match target {
            SlotTarget::Auto => self.pool.find_first_empty().ok_or(LedgerError::NoEmptySlot)?,
            SlotTarget::Number(n) => n,
        };
        self.assign(n, booking, overwrite, today)?;
        debug!("quick-add placed booking in slot {n}");
        Ok(n)
    }

    pub fn clear(&mut self, n: SlotNumber) -> Result<(), LedgerError> {
        self.pool.clear(n)?;
        self.dirty = true;
        Ok(())
    }

    /// Clear every selected slot. Unknown numbers fail the whole call
    /// before anything is cleared.
    pub fn clear_slots(&mut self, selection: &BTreeSet<SlotNumber>) -> Result<usize, LedgerError> {
        if let Some(&bad) = selection.iter().find(|n| self.pool.find_by_number(**n).is_none()) {
            return Err(LedgerError::InvalidSlot(bad));
        }
        for &n in selection {
            self.pool.clear(n)?;
        }
        if !selection.is_empty() {
            self.dirty = true;
        }
        Ok(selection.len())
    }

    /// Apply an edited image of the Active table. The image must name every
    /// slot exactly once; all rows are decoded before anything changes.
    /// `days_remaining` is recomputed, everything else is taken as given.
    pub fn apply_edits(&mut self, rows: &[Row], today: NaiveDate) -> Result<(), LedgerError> {
        let n = self.pool.len();
        if rows.len() != n as usize {
            return Err(LedgerError::Validation(format!(
                "edited table has {} rows, expected {n}",
                rows.len()
            )));
        }

        let mut image: Vec<Option<Slot>> = vec![None; n as usize];
        for row in rows {
            let mut slot = schema::slot_from_row(row)?;
            if slot.booking.text_fields().iter().any(|f| f.len() > MAX_FIELD_LEN) {
                return Err(LedgerError::Validation(format!(
                    "slot {}: field longer than {MAX_FIELD_LEN} bytes",
                    slot.number
                )));
            }
            let idx = (slot.number as usize)
                .checked_sub(1)
                .filter(|i| *i < n as usize)
                .ok_or(LedgerError::InvalidSlot(slot.number))?;
            if image[idx].is_some() {
                return Err(LedgerError::Validation(format!(
                    "slot {} edited twice",
                    slot.number
                )));
            }
            slot.booking.days_remaining = lifecycle::days_remaining(&slot.booking.end_date, today);
            image[idx] = Some(slot);
        }

        // Every index is filled: n rows, no duplicates, all within 1..=n.
        let slots: Vec<Slot> = image.into_iter().flatten().collect();
        self.pool.replace_all(slots);
        self.dirty = true;
        Ok(())
    }

    /// Empty every slot. The archive is left alone.
    pub fn reset(&mut self) {
        for n in 1..=self.pool.len() {
            let _ = self.pool.clear(n);
        }
        self.dirty = true;
        info!("all {} slots reset", self.pool.len());
    }

    // ── Table images ─────────────────────────────────────────

    pub fn active_rows(&self, alert_days: u32, today: NaiveDate) -> Vec<Row> {
        self.pool
            .slots()
            .iter()
            .map(|s| {
                let status = lifecycle::status(&s.booking.end_date, alert_days, today);
                schema::slot_to_row(s, status)
            })
            .collect()
    }

    pub fn archive_rows(&self) -> Vec<Row> {
        self.archive.entries().iter().map(schema::archived_to_row).collect()
    }

    /// Replace all three tables in `store` with the current state. On
    /// failure the ledger stays dirty and the store contents are undefined.
    pub fn flush(
        &mut self,
        store: &mut dyn RecordStore,
        alert_days: u32,
        today: NaiveDate,
    ) -> Result<(), LedgerError> {
        store.replace_table(Table::Active, &self.active_rows(alert_days, today))?;
        store.replace_table(Table::Archive, &self.archive_rows())?;
        store.replace_table(Table::Summary, &[schema::summary_to_row(&self.summary)])?;
        self.dirty = false;
        Ok(())
    }
}
