use chrono::NaiveDate;

use crate::model::*;

use super::lifecycle::{parse_date, status};
use super::Ledger;

/// Filters for the combined Active + Archive report. Unset filters match
/// everything; a record whose date cannot be parsed fails any date bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    /// Case-insensitive substring of `client_name`.
    pub client_contains: Option<String>,
    pub start_on_or_after: Option<NaiveDate>,
    pub end_on_or_before: Option<NaiveDate>,
}

impl ReportFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(needle) = &self.client_contains
            && !booking
                .client_name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        {
            return false;
        }
        if let Some(bound) = self.start_on_or_after
            && !parse_date(&booking.start_date).is_some_and(|d| d >= bound)
        {
            return false;
        }
        if let Some(bound) = self.end_on_or_before
            && !parse_date(&booking.end_date).is_some_and(|d| d <= bound)
        {
            return false;
        }
        true
    }
}

impl Ledger {
    pub fn stats(&self, alert_days: u32, today: NaiveDate) -> BoardStats {
        let mut booked = 0;
        let mut expiring_soon = 0;
        let mut expired = 0;
        for slot in self.pool.occupied() {
            booked += 1;
            match status(&slot.booking.end_date, alert_days, today) {
                StatusLabel::ExpiringSoon => expiring_soon += 1,
                StatusLabel::Expired => expired += 1,
                _ => {}
            }
        }
        let total_slots = self.pool.len();
        BoardStats {
            total_slots,
            booked,
            available: total_slots - booked,
            archived: self.archive.len(),
            expiring_soon,
            expired,
        }
    }

    /// Occupied Active slots in slot order, then Archive entries in archive
    /// order, keeping those that pass `filter`.
    pub fn report(&self, filter: &ReportFilter, alert_days: u32, today: NaiveDate) -> Vec<ReportRecord> {
        let active = self.pool.occupied().map(|slot| ReportRecord {
            source: RecordSource::Active,
            slot_number: slot.number,
            booking: slot.booking.clone(),
            status: status(&slot.booking.end_date, alert_days, today),
            archived_at: None,
        });
        let archived = self.archive.entries().iter().map(|entry| ReportRecord {
            source: RecordSource::Archive,
            slot_number: entry.slot_number,
            booking: entry.booking.clone(),
            status: status(&entry.booking.end_date, alert_days, today),
            archived_at: Some(entry.archived_at.clone()),
        });
        active
            .chain(archived)
            .filter(|r| filter.matches(&r.booking))
            .collect()
    }
}
