use crate::model::SlotNumber;
use crate::schema::SchemaError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no billboard slot {0}")]
    InvalidSlot(SlotNumber),
    #[error("slot {0} is already occupied; set overwrite to replace it")]
    SlotOccupied(SlotNumber),
    #[error("no empty slot available")]
    NoEmptySlot,
    #[error("slot {0} no longer exists in the pool")]
    SlotNotFound(SlotNumber),
    #[error("no archive entry at index {0}")]
    ArchiveEntryNotFound(usize),
    #[error("cannot shrink to {requested} slots: slot {highest_occupied} is occupied")]
    ShrinkBelowOccupied {
        requested: u32,
        highest_occupied: SlotNumber,
    },
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl LedgerError {
    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) | LedgerError::InvalidSlot(_) => "22023",
            LedgerError::SlotOccupied(_) => "23505",
            LedgerError::NoEmptySlot => "53400",
            LedgerError::SlotNotFound(_) | LedgerError::ArchiveEntryNotFound(_) => "P0002",
            LedgerError::ShrinkBelowOccupied { .. } => "F0000",
            LedgerError::Persistence(_) => "58030",
        }
    }
}

impl From<SchemaError> for LedgerError {
    fn from(e: SchemaError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}
