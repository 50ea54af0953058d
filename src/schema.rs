//! Fixed column layout of the persisted tables and the codec between
//! [`Booking`] and a flat [`Row`].

use crate::model::*;
use crate::store::Row;

pub const SLOT_NUMBER: &str = "slot_number";
pub const STATUS: &str = "status";
pub const ARCHIVED_AT: &str = "archived_at";
pub const TOTAL_SLOTS: &str = "total_slots";

/// Booking columns, in display order.
pub const BOOKING_COLUMNS: [&str; 19] = [
    "billboard_id",
    "location",
    "size",
    "client_name",
    "company_name",
    "contact_number",
    "email",
    "start_date",
    "end_date",
    "rental_duration",
    "rent",
    "advance",
    "balance",
    "payment_status",
    "contract_status",
    "days_remaining",
    "notes",
    "link",
    "partner_share",
];

/// `slot_number`, the booking columns, then the derived `status`.
pub fn active_columns() -> Vec<&'static str> {
    let mut cols = Vec::with_capacity(BOOKING_COLUMNS.len() + 2);
    cols.push(SLOT_NUMBER);
    cols.extend(BOOKING_COLUMNS);
    cols.push(STATUS);
    cols
}

/// `slot_number`, the booking columns, then `archived_at`.
pub fn archive_columns() -> Vec<&'static str> {
    let mut cols = Vec::with_capacity(BOOKING_COLUMNS.len() + 2);
    cols.push(SLOT_NUMBER);
    cols.extend(BOOKING_COLUMNS);
    cols.push(ARCHIVED_AT);
    cols
}

pub fn is_booking_column(name: &str) -> bool {
    BOOKING_COLUMNS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("invalid {column} {value:?}: {reason}")]
    Invalid {
        column: String,
        value: String,
        reason: String,
    },
}

fn invalid(column: &str, value: &str, reason: impl ToString) -> SchemaError {
    SchemaError::Invalid {
        column: column.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ── Cell formatting ──────────────────────────────────────────────

fn fmt_opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(|x| x.to_string()).unwrap_or_default()
}

/// Text of one booking column. Blank fields render as the empty string.
pub fn booking_cell(booking: &Booking, column: &str) -> Option<String> {
    let cell = match column {
        "billboard_id" => booking.billboard_id.clone(),
        "location" => booking.location.clone(),
        "size" => booking.size.clone(),
        "client_name" => booking.client_name.clone(),
        "company_name" => booking.company_name.clone(),
        "contact_number" => booking.contact_number.clone(),
        "email" => booking.email.clone(),
        "start_date" => booking.start_date.clone(),
        "end_date" => booking.end_date.clone(),
        "rental_duration" => booking.rental_duration.clone(),
        "rent" => fmt_opt(&booking.rent),
        "advance" => fmt_opt(&booking.advance),
        "balance" => fmt_opt(&booking.balance),
        "payment_status" => fmt_opt(&booking.payment_status),
        "contract_status" => fmt_opt(&booking.contract_status),
        "days_remaining" => fmt_opt(&booking.days_remaining),
        "notes" => booking.notes.clone(),
        "link" => booking.link.clone(),
        "partner_share" => booking.partner_share.clone(),
        _ => return None,
    };
    Some(cell)
}

pub fn booking_to_row(booking: &Booking) -> Row {
    BOOKING_COLUMNS
        .iter()
        .map(|col| {
            let cell = booking_cell(booking, col).unwrap_or_default();
            (col.to_string(), cell)
        })
        .collect()
}

pub fn slot_to_row(slot: &Slot, status: StatusLabel) -> Row {
    let mut row = booking_to_row(&slot.booking);
    row.insert(SLOT_NUMBER.into(), slot.number.to_string());
    row.insert(STATUS.into(), status.to_string());
    row
}

pub fn archived_to_row(entry: &ArchivedBooking) -> Row {
    let mut row = booking_to_row(&entry.booking);
    row.insert(SLOT_NUMBER.into(), entry.slot_number.to_string());
    row.insert(ARCHIVED_AT.into(), entry.archived_at.clone());
    row
}

pub fn summary_to_row(summary: &SummaryConfig) -> Row {
    let mut row = Row::new();
    row.insert(TOTAL_SLOTS.into(), summary.total_slots.to_string());
    row
}

// ── Cell parsing ─────────────────────────────────────────────────

fn parse_amount(column: &str, value: &str) -> Result<Option<f64>, SchemaError> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    let v: f64 = cleaned.parse().map_err(|e| invalid(column, value, e))?;
    if !v.is_finite() {
        return Err(invalid(column, value, "not a finite number"));
    }
    Ok(Some(v))
}

fn parse_opt<T>(column: &str, value: &str) -> Result<Option<T>, SchemaError>
where
    T: std::str::FromStr,
    T::Err: ToString,
{
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse().map(Some).map_err(|e: T::Err| invalid(column, value, e.to_string()))
}

/// Set one booking column from its text form.
pub fn set_booking_cell(booking: &mut Booking, column: &str, value: &str) -> Result<(), SchemaError> {
    match column {
        "billboard_id" => booking.billboard_id = value.to_string(),
        "location" => booking.location = value.to_string(),
        "size" => booking.size = value.to_string(),
        "client_name" => booking.client_name = value.to_string(),
        "company_name" => booking.company_name = value.to_string(),
        "contact_number" => booking.contact_number = value.to_string(),
        "email" => booking.email = value.to_string(),
        "start_date" => booking.start_date = value.to_string(),
        "end_date" => booking.end_date = value.to_string(),
        "rental_duration" => booking.rental_duration = value.to_string(),
        "rent" => booking.rent = parse_amount(column, value)?,
        "advance" => booking.advance = parse_amount(column, value)?,
        "balance" => booking.balance = parse_amount(column, value)?,
        "payment_status" => booking.payment_status = parse_opt(column, value)?,
        "contract_status" => booking.contract_status = parse_opt(column, value)?,
        "days_remaining" => booking.days_remaining = parse_opt(column, value)?,
        "notes" => booking.notes = value.to_string(),
        "link" => booking.link = value.to_string(),
        "partner_share" => booking.partner_share = value.to_string(),
        other => return Err(SchemaError::UnknownColumn(other.to_string())),
    }
    Ok(())
}

/// Decode the booking columns of a row. `slot_number`, `status` and
/// `archived_at` are skipped; the derived status is never read back.
pub fn booking_from_row(row: &Row) -> Result<Booking, SchemaError> {
    let mut booking = Booking::default();
    for (column, value) in row {
        match column.as_str() {
            SLOT_NUMBER | STATUS | ARCHIVED_AT => {}
            other => set_booking_cell(&mut booking, other, value)?,
        }
    }
    Ok(booking)
}

pub fn slot_number_from_row(row: &Row) -> Result<SlotNumber, SchemaError> {
    let raw = row.get(SLOT_NUMBER).ok_or(SchemaError::MissingColumn(SLOT_NUMBER))?;
    raw.trim().parse().map_err(|e| invalid(SLOT_NUMBER, raw, e))
}

pub fn slot_from_row(row: &Row) -> Result<Slot, SchemaError> {
    Ok(Slot {
        number: slot_number_from_row(row)?,
        booking: booking_from_row(row)?,
    })
}

pub fn archived_from_row(row: &Row) -> Result<ArchivedBooking, SchemaError> {
    Ok(ArchivedBooking {
        slot_number: slot_number_from_row(row)?,
        booking: booking_from_row(row)?,
        archived_at: row.get(ARCHIVED_AT).cloned().unwrap_or_default(),
    })
}

pub fn summary_from_row(row: &Row) -> Result<SummaryConfig, SchemaError> {
    let raw = row.get(TOTAL_SLOTS).ok_or(SchemaError::MissingColumn(TOTAL_SLOTS))?;
    let total_slots: u32 = raw.trim().parse().map_err(|e| invalid(TOTAL_SLOTS, raw, e))?;
    Ok(SummaryConfig { total_slots })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Booking {
        Booking {
            billboard_id: "BB-07".into(),
            location: "Mall Road".into(),
            client_name: "Acme".into(),
            start_date: "2026-01-01".into(),
            end_date: "2026-03-31".into(),
            rent: Some(50_000.0),
            advance: Some(20_000.0),
            balance: Some(30_000.0),
            payment_status: Some(PaymentStatus::Partial),
            contract_status: Some(ContractStatus::Active),
            days_remaining: Some(-4),
            ..Default::default()
        }
    }

    #[test]
    fn slot_row_carries_every_column() {
        let slot = Slot { number: 7, booking: sample() };
        let row = slot_to_row(&slot, StatusLabel::Booked);
        for col in active_columns() {
            assert!(row.contains_key(col), "missing {col}");
        }
        assert_eq!(row["rent"], "50000");
        assert_eq!(row["payment_status"], "Partial");
        assert_eq!(row["status"], "Booked");
        assert_eq!(slot_from_row(&row).unwrap(), slot);
    }

    #[test]
    fn stored_status_is_ignored() {
        let mut row = slot_to_row(&Slot::empty(3), StatusLabel::Available);
        row.insert(STATUS.into(), "Expired".into());
        let slot = slot_from_row(&row).unwrap();
        assert!(slot.is_empty());
    }

    #[test]
    fn amounts_accept_thousands_separators() {
        let mut b = Booking::default();
        set_booking_cell(&mut b, "rent", "1,250,000").unwrap();
        assert_eq!(b.rent, Some(1_250_000.0));
        set_booking_cell(&mut b, "rent", "  ").unwrap();
        assert_eq!(b.rent, None);
    }

    #[test]
    fn bad_cells_are_rejected() {
        let mut b = Booking::default();
        assert!(matches!(
            set_booking_cell(&mut b, "rent", "lots"),
            Err(SchemaError::Invalid { .. })
        ));
        assert!(matches!(
            set_booking_cell(&mut b, "payment_status", "maybe"),
            Err(SchemaError::Invalid { .. })
        ));
        assert!(matches!(
            set_booking_cell(&mut b, "colour", "red"),
            Err(SchemaError::UnknownColumn(_))
        ));
    }

    #[test]
    fn enum_cells_are_case_insensitive() {
        let mut b = Booking::default();
        set_booking_cell(&mut b, "contract_status", "completed").unwrap();
        assert_eq!(b.contract_status, Some(ContractStatus::Completed));
    }

    #[test]
    fn archive_row_keeps_origin_and_timestamp() {
        let entry = ArchivedBooking {
            slot_number: 12,
            booking: sample(),
            archived_at: "2026-04-04 10:00:00".into(),
        };
        let row = archived_to_row(&entry);
        assert_eq!(archived_from_row(&row).unwrap(), entry);
    }

    #[test]
    fn missing_slot_number_is_an_error() {
        let row = booking_to_row(&sample());
        assert_eq!(
            slot_number_from_row(&row),
            Err(SchemaError::MissingColumn(SLOT_NUMBER))
        );
    }
}
