use chrono::NaiveDate;

use crate::limits::MAX_SLOTS;
use crate::model::*;

use super::lifecycle;
use super::LedgerError;

/// The fixed, ordered set of billboard slots. `slots[i].number == i + 1`
/// always holds, so lookup by number is an index.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPool {
    slots: Vec<Slot>,
}

pub(crate) fn validate_capacity(n: u32) -> Result<(), LedgerError> {
    if n == 0 || n > MAX_SLOTS {
        return Err(LedgerError::Validation(format!(
            "slot capacity {n} outside 1..={MAX_SLOTS}"
        )));
    }
    Ok(())
}

impl SlotPool {
    /// `n` Empty slots numbered `1..=n`.
    pub fn new(n: u32) -> Result<Self, LedgerError> {
        validate_capacity(n)?;
        Ok(Self {
            slots: (1..=n).map(Slot::empty).collect(),
        })
    }

    /// Rebuild a pool of size `n` from stored slots. Missing numbers become
    /// Empty slots; stored Empty slots past `n` are dropped.
    pub fn from_slots(stored: Vec<Slot>, n: u32) -> Result<Self, LedgerError> {
        let mut pool = Self::new(n)?;
        let mut seen = vec![false; n as usize];
        for slot in stored {
            if slot.number == 0 {
                return Err(LedgerError::Validation("slot number 0 in stored table".into()));
            }
            if slot.number > n {
                if !slot.is_empty() {
                    return Err(LedgerError::ShrinkBelowOccupied {
                        requested: n,
                        highest_occupied: slot.number,
                    });
                }
                continue;
            }
            let idx = (slot.number - 1) as usize;
            if std::mem::replace(&mut seen[idx], true) {
                return Err(LedgerError::Validation(format!(
                    "slot {} appears twice in stored table",
                    slot.number
                )));
            }
            pool.slots[idx] = slot;
        }
        Ok(pool)
    }

    /// Grow or shrink to `n` slots, keeping every booking. Only trailing
    /// Empty slots are ever removed.
    pub fn initialize(&mut self, n: u32) -> Result<(), LedgerError> {
        validate_capacity(n)?;
        if let Some(highest) = self.highest_occupied()
            && highest > n
        {
            return Err(LedgerError::ShrinkBelowOccupied {
                requested: n,
                highest_occupied: highest,
            });
        }
        let current = self.len();
        if n > current {
            self.slots.extend((current + 1..=n).map(Slot::empty));
        } else {
            self.slots.truncate(n as usize);
        }
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn occupied(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| !s.is_empty())
    }

    pub fn highest_occupied(&self) -> Option<SlotNumber> {
        self.slots.iter().rev().find(|s| !s.is_empty()).map(|s| s.number)
    }

    /// Lowest-numbered Empty slot.
    pub fn find_first_empty(&self) -> Option<SlotNumber> {
        self.slots.iter().find(|s| s.is_empty()).map(|s| s.number)
    }

    pub fn find_by_number(&self, n: SlotNumber) -> Option<&Slot> {
        let idx = (n as usize).checked_sub(1)?;
        self.slots.get(idx)
    }

    fn slot_mut(&mut self, n: SlotNumber) -> Result<&mut Slot, LedgerError> {
        (n as usize)
            .checked_sub(1)
            .and_then(|idx| self.slots.get_mut(idx))
            .ok_or(LedgerError::InvalidSlot(n))
    }

    /// Overwrite every booking field of slot `n`. Refuses an occupied slot
    /// unless `overwrite` is set; a refused call changes nothing.
    pub fn assign(
        &mut self,
        n: SlotNumber,
        mut booking: Booking,
        overwrite: bool,
        today: NaiveDate,
    ) -> Result<(), LedgerError> {
        let slot = self.slot_mut(n)?;
        if !overwrite && !slot.is_empty() {
            return Err(LedgerError::SlotOccupied(n));
        }
        booking.days_remaining = lifecycle::days_remaining(&booking.end_date, today);
        slot.booking = booking;
        Ok(())
    }

    /// Blank every field of slot `n`, returning what it held.
    pub fn clear(&mut self, n: SlotNumber) -> Result<Booking, LedgerError> {
        let slot = self.slot_mut(n)?;
        Ok(std::mem::take(&mut slot.booking))
    }

    /// Put `booking` into slot `n`, whatever the slot holds. Every field is
    /// kept except `days_remaining`, which is counted from `today`.
    /// Returns the displaced booking.
    pub(crate) fn restore(
        &mut self,
        n: SlotNumber,
        mut booking: Booking,
        today: NaiveDate,
    ) -> Result<Booking, LedgerError> {
        let slot = self.slot_mut(n).map_err(|_| LedgerError::SlotNotFound(n))?;
        booking.days_remaining = lifecycle::days_remaining(&booking.end_date, today);
        Ok(std::mem::replace(&mut slot.booking, booking))
    }

    /// Recount `days_remaining` for every slot from `today`.
    pub(crate) fn refresh_days(&mut self, today: NaiveDate) {
        for slot in &mut self.slots {
            slot.booking.days_remaining = lifecycle::days_remaining(&slot.booking.end_date, today);
        }
    }

    /// Replace the whole pool image. The caller has already checked that
    /// `slots` covers `1..=len` exactly once.
    pub(crate) fn replace_all(&mut self, slots: Vec<Slot>) {
        debug_assert_eq!(slots.len(), self.slots.len());
        self.slots = slots;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn booking(client: &str) -> Booking {
        Booking {
            client_name: client.into(),
            end_date: "2026-05-31".into(),
            ..Default::default()
        }
    }

    fn numbers(pool: &SlotPool) -> Vec<SlotNumber> {
        pool.slots().iter().map(|s| s.number).collect()
    }

    #[test]
    fn new_pool_is_contiguous_and_empty() {
        let pool = SlotPool::new(50).unwrap();
        assert_eq!(numbers(&pool), (1..=50).collect::<Vec<_>>());
        assert!(pool.slots().iter().all(Slot::is_empty));
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(SlotPool::new(0), Err(LedgerError::Validation(_))));
        assert!(matches!(SlotPool::new(MAX_SLOTS + 1), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn first_empty_skips_occupied() {
        let mut pool = SlotPool::new(5).unwrap();
        pool.assign(1, booking("A"), false, today()).unwrap();
        pool.assign(3, booking("C"), false, today()).unwrap();
        assert_eq!(pool.find_first_empty(), Some(2));
    }

    #[test]
    fn first_empty_none_when_full() {
        let mut pool = SlotPool::new(2).unwrap();
        pool.assign(1, booking("A"), false, today()).unwrap();
        pool.assign(2, booking("B"), false, today()).unwrap();
        assert_eq!(pool.find_first_empty(), None);
    }

    #[test]
    fn find_by_number_is_lookup_only() {
        let pool = SlotPool::new(3).unwrap();
        assert_eq!(pool.find_by_number(3).map(|s| s.number), Some(3));
        assert!(pool.find_by_number(0).is_none());
        assert!(pool.find_by_number(4).is_none());
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn assign_computes_days_remaining() {
        let mut pool = SlotPool::new(3).unwrap();
        pool.assign(2, booking("A"), false, today()).unwrap();
        assert_eq!(pool.find_by_number(2).unwrap().booking.days_remaining, Some(30));

        let past = Booking {
            end_date: "2026-04-21".into(),
            ..booking("B")
        };
        pool.assign(3, past, false, today()).unwrap();
        assert_eq!(pool.find_by_number(3).unwrap().booking.days_remaining, Some(-10));
    }

    #[test]
    fn assign_occupied_without_overwrite_changes_nothing() {
        let mut pool = SlotPool::new(3).unwrap();
        pool.assign(1, booking("A"), false, today()).unwrap();
        let before = pool.clone();

        let err = pool.assign(1, booking("B"), false, today()).unwrap_err();
        assert!(matches!(err, LedgerError::SlotOccupied(1)));
        assert_eq!(pool, before);
    }

    #[test]
    fn assign_with_overwrite_replaces_every_field() {
        let mut pool = SlotPool::new(3).unwrap();
        let first = Booking {
            notes: "keep?".into(),
            ..booking("A")
        };
        pool.assign(1, first, false, today()).unwrap();
        pool.assign(1, booking("B"), true, today()).unwrap();

        let slot = pool.find_by_number(1).unwrap();
        assert_eq!(slot.booking.client_name, "B");
        assert_eq!(slot.booking.notes, "");
    }

    #[test]
    fn assign_unknown_slot_is_invalid() {
        let mut pool = SlotPool::new(3).unwrap();
        assert!(matches!(
            pool.assign(9, booking("A"), true, today()),
            Err(LedgerError::InvalidSlot(9))
        ));
    }

    #[test]
    fn clear_keeps_number() {
        let mut pool = SlotPool::new(3).unwrap();
        pool.assign(2, booking("A"), false, today()).unwrap();
        let old = pool.clear(2).unwrap();
        assert_eq!(old.client_name, "A");
        assert!(pool.find_by_number(2).unwrap().is_empty());
        assert_eq!(numbers(&pool), vec![1, 2, 3]);
        // clearing an empty slot is fine too
        pool.clear(2).unwrap();
    }

    #[test]
    fn initialize_grows_and_preserves_bookings() {
        let mut pool = SlotPool::new(3).unwrap();
        pool.assign(3, booking("C"), false, today()).unwrap();
        pool.initialize(6).unwrap();
        assert_eq!(numbers(&pool), (1..=6).collect::<Vec<_>>());
        assert_eq!(pool.find_by_number(3).unwrap().booking.client_name, "C");
        // idempotent
        pool.initialize(6).unwrap();
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn initialize_shrinks_trailing_empty_slots() {
        let mut pool = SlotPool::new(10).unwrap();
        pool.assign(4, booking("D"), false, today()).unwrap();
        pool.initialize(4).unwrap();
        assert_eq!(numbers(&pool), vec![1, 2, 3, 4]);
        assert_eq!(pool.find_by_number(4).unwrap().booking.client_name, "D");
    }

    #[test]
    fn initialize_refuses_to_drop_bookings() {
        let mut pool = SlotPool::new(10).unwrap();
        pool.assign(8, booking("H"), false, today()).unwrap();
        let before = pool.clone();
        let err = pool.initialize(5).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ShrinkBelowOccupied {
                requested: 5,
                highest_occupied: 8
            }
        ));
        assert_eq!(pool, before);
    }

    #[test]
    fn from_slots_fills_gaps_and_rejects_duplicates() {
        let stored = vec![
            Slot { number: 3, booking: booking("C") },
            Slot::empty(9),
        ];
        let pool = SlotPool::from_slots(stored, 4).unwrap();
        assert_eq!(numbers(&pool), vec![1, 2, 3, 4]);
        assert_eq!(pool.find_by_number(3).unwrap().booking.client_name, "C");

        let dup = vec![Slot::empty(1), Slot::empty(1)];
        assert!(matches!(
            SlotPool::from_slots(dup, 2),
            Err(LedgerError::Validation(_))
        ));

        let beyond = vec![Slot { number: 7, booking: booking("G") }];
        assert!(matches!(
            SlotPool::from_slots(beyond, 5),
            Err(LedgerError::ShrinkBelowOccupied { .. })
        ));
    }
}
