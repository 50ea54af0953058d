use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Slot identity. Slots are numbered `1..=N` with no gaps.
pub type SlotNumber = u32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Partial,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Partial => "Partial",
            PaymentStatus::Overdue => "Overdue",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "partial" => Ok(PaymentStatus::Partial),
            "overdue" => Ok(PaymentStatus::Overdue),
            _ => Err(UnknownVariant {
                kind: "payment status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Active,
    Completed,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "Active",
            ContractStatus::Completed => "Completed",
            ContractStatus::Cancelled => "Cancelled",
        }
    }
}

impl FromStr for ContractStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(ContractStatus::Active),
            "completed" => Ok(ContractStatus::Completed),
            "cancelled" | "canceled" => Ok(ContractStatus::Cancelled),
            _ => Err(UnknownVariant {
                kind: "contract status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a rented slot carries. A booking whose every field is blank
/// means "no booking": the slot is Empty.
///
/// Dates stay as entered; they are parsed on demand so that a value the
/// parser rejects degrades to an `Unknown` status instead of a load failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub billboard_id: String,
    pub location: String,
    pub size: String,
    pub client_name: String,
    pub company_name: String,
    pub contact_number: String,
    pub email: String,
    pub start_date: String,
    pub end_date: String,
    pub rental_duration: String,
    pub rent: Option<f64>,
    pub advance: Option<f64>,
    /// `rent - advance` when entered through Quick-Add; negative is a credit.
    pub balance: Option<f64>,
    pub payment_status: Option<PaymentStatus>,
    pub contract_status: Option<ContractStatus>,
    pub days_remaining: Option<i64>,
    pub notes: String,
    pub link: String,
    pub partner_share: String,
}

impl Booking {
    /// All free-text fields, in column order.
    pub fn text_fields(&self) -> [&str; 13] {
        [
            &self.billboard_id,
            &self.location,
            &self.size,
            &self.client_name,
            &self.company_name,
            &self.contact_number,
            &self.email,
            &self.start_date,
            &self.end_date,
            &self.rental_duration,
            &self.notes,
            &self.link,
            &self.partner_share,
        ]
    }

    pub fn is_blank(&self) -> bool {
        self.text_fields().iter().all(|s| s.trim().is_empty())
            && self.rent.is_none()
            && self.advance.is_none()
            && self.balance.is_none()
            && self.payment_status.is_none()
            && self.contract_status.is_none()
            && self.days_remaining.is_none()
    }

    /// Derive the balance from rent and advance, when both are known.
    pub fn derive_balance(&mut self) {
        if let (Some(rent), Some(advance)) = (self.rent, self.advance) {
            self.balance = Some(rent - advance);
        }
    }
}

/// One of the N fixed billboard positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub number: SlotNumber,
    pub booking: Booking,
}

impl Slot {
    pub fn empty(number: SlotNumber) -> Self {
        Self {
            number,
            booking: Booking::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.booking.is_blank()
    }
}

/// A booking moved out of its slot. `slot_number` is a back-reference used
/// by undo; the slot may hold something else by then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedBooking {
    pub slot_number: SlotNumber,
    pub booking: Booking,
    pub archived_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub total_slots: u32,
}

/// Derived lifecycle label. Never stored as ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusLabel {
    Available,
    Booked,
    ExpiringSoon,
    Expired,
    Unknown,
}

impl StatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::Available => "Available",
            StatusLabel::Booked => "Booked",
            StatusLabel::ExpiringSoon => "Expiring Soon",
            StatusLabel::Expired => "Expired",
            StatusLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where Quick-Add should put a new booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    /// Lowest-numbered Empty slot.
    Auto,
    Number(SlotNumber),
}

// ── Operation results ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    SkippedEmpty,
    NotFound,
}

impl ArchiveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveOutcome::Archived => "archived",
            ArchiveOutcome::SkippedEmpty => "skipped_empty",
            ArchiveOutcome::NotFound => "not_found",
        }
    }
}

/// Per-slot result of a bulk archive, in ascending slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub outcomes: Vec<(SlotNumber, ArchiveOutcome)>,
}

impl ArchiveReport {
    pub fn archived(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ArchiveOutcome::Archived)
            .count()
    }

    pub fn has_warnings(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| *o != ArchiveOutcome::Archived)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardStats {
    pub total_slots: u32,
    pub booked: u32,
    pub available: u32,
    pub archived: usize,
    pub expiring_soon: u32,
    pub expired: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Active,
    Archive,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Active => "active",
            RecordSource::Archive => "archive",
        }
    }
}

/// A row of the combined Active + Archive report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub source: RecordSource,
    pub slot_number: SlotNumber,
    pub booking: Booking,
    pub status: StatusLabel,
    pub archived_at: Option<String>,
}
