use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, Settings};
use crate::export::{ContractRenderer, HtmlContractRenderer};
use crate::ledger::{Ledger, LedgerError, ReportFilter};
use crate::model::*;
use crate::observability;
use crate::schema;
use crate::store::{FileStore, MemoryStore, RecordStore, Row};

/// Snapshot of the board for the `summary` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSummary {
    pub stats: BoardStats,
    pub alert_days: u32,
    /// Changes exist that have not been flushed.
    pub dirty: bool,
    /// False after a failed flush, until a later one succeeds.
    pub in_sync: bool,
}

/// A rendered contract plus its suggested download name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDocument {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

struct State {
    ledger: Ledger,
    store: Box<dyn RecordStore>,
    in_sync: bool,
}

impl State {
    fn flush(&mut self, alert_days: u32, today: NaiveDate) -> Result<(), LedgerError> {
        let start = Instant::now();
        let result = self.ledger.flush(self.store.as_mut(), alert_days, today);
        metrics::histogram!(observability::FLUSH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                self.in_sync = true;
                Ok(())
            }
            Err(e) => {
                warn!("flush failed, in-memory state kept: {e}");
                metrics::counter!(observability::FLUSH_FAILURES_TOTAL).increment(1);
                self.in_sync = false;
                Err(e)
            }
        }
    }

    fn record_gauges(&self) {
        metrics::gauge!(observability::SLOTS_OCCUPIED).set(self.ledger.pool().occupied().count() as f64);
        metrics::gauge!(observability::ARCHIVE_ENTRIES).set(self.ledger.archive_entries().len() as f64);
    }
}

/// Owns the ledger and its store. Every call takes the one lock for its
/// whole duration, flush included, so commands never interleave.
pub struct BoardService {
    state: Mutex<State>,
    settings: Settings,
    capacity: Option<u32>,
    renderer: Box<dyn ContractRenderer>,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl BoardService {
    /// Load the ledger from `store`. A freshly created or resized ledger is
    /// written back straight away when auto-save is on.
    pub fn open(
        store: Box<dyn RecordStore>,
        capacity: Option<u32>,
        settings: Settings,
    ) -> Result<Self, LedgerError> {
        let ledger = Ledger::load(store.as_ref(), capacity, now().date())?;
        let mut state = State {
            ledger,
            store,
            in_sync: true,
        };
        if settings.auto_save && state.ledger.is_dirty() {
            state.flush(settings.alert_days, now().date())?;
        }
        state.record_gauges();
        Ok(Self {
            state: Mutex::new(state),
            settings,
            capacity,
            renderer: Box::new(HtmlContractRenderer),
        })
    }

    /// File-backed when persistence is on, in-memory otherwise.
    pub fn from_config(config: &Config) -> Result<Self, LedgerError> {
        let store: Box<dyn RecordStore> = if config.settings.persist {
            let store = FileStore::open(&config.data_dir)
                .map_err(|e| LedgerError::Persistence(format!("{}: {e}", config.data_dir.display())))?;
            info!("tables stored under {}", store.dir().display());
            Box::new(store)
        } else {
            info!("persistence disabled, state is lost on exit");
            Box::new(MemoryStore::new())
        };
        Self::open(store, config.slots, config.settings)
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Run a mutation under the lock, then auto-save if anything changed.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Ledger, NaiveDateTime) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut state = self.state.lock().await;
        let now = now();
        let out = op(&mut state.ledger, now)?;
        if self.settings.auto_save && state.ledger.is_dirty() {
            state.flush(self.settings.alert_days, now.date())?;
        }
        state.record_gauges();
        Ok(out)
    }

    // ── Views ────────────────────────────────────────────────

    pub async fn active_rows(&self) -> Vec<Row> {
        let state = self.state.lock().await;
        state.ledger.active_rows(self.settings.alert_days, now().date())
    }

    pub async fn archive_entries(&self) -> Vec<ArchivedBooking> {
        self.state.lock().await.ledger.archive_entries().to_vec()
    }

    pub async fn summary(&self) -> BoardSummary {
        let state = self.state.lock().await;
        BoardSummary {
            stats: state.ledger.stats(self.settings.alert_days, now().date()),
            alert_days: self.settings.alert_days,
            dirty: state.ledger.is_dirty(),
            in_sync: state.in_sync,
        }
    }

    pub async fn first_empty(&self) -> Option<SlotNumber> {
        self.state.lock().await.ledger.find_first_empty()
    }

    pub async fn report(&self, filter: &ReportFilter) -> Vec<ReportRecord> {
        let state = self.state.lock().await;
        state.ledger.report(filter, self.settings.alert_days, now().date())
    }

    /// Render the contract of slot `n`: its current booking, or with
    /// `source = Archive` the oldest archive entry that came from it.
    pub async fn contract(&self, n: SlotNumber, source: RecordSource) -> Result<ContractDocument, LedgerError> {
        let state = self.state.lock().await;
        let now = now();
        let today = now.date();
        let ledger = &state.ledger;
        let record = match source {
            RecordSource::Active => {
                let slot = ledger.find_by_number(n).ok_or(LedgerError::InvalidSlot(n))?;
                if slot.is_empty() {
                    return Err(LedgerError::Validation(format!("slot {n} has no booking")));
                }
                ReportRecord {
                    source,
                    slot_number: n,
                    booking: slot.booking.clone(),
                    status: crate::ledger::lifecycle::status(&slot.booking.end_date, self.settings.alert_days, today),
                    archived_at: None,
                }
            }
            RecordSource::Archive => {
                let entry = ledger
                    .archive_entries()
                    .iter()
                    .find(|e| e.slot_number == n)
                    .ok_or_else(|| LedgerError::Validation(format!("no archive entry for slot {n}")))?;
                ReportRecord {
                    source,
                    slot_number: n,
                    booking: entry.booking.clone(),
                    status: crate::ledger::lifecycle::status(&entry.booking.end_date, self.settings.alert_days, today),
                    archived_at: Some(entry.archived_at.clone()),
                }
            }
        };
        Ok(ContractDocument {
            file_name: self.renderer.file_name(n),
            content_type: self.renderer.content_type(),
            body: self.renderer.render(&record, now),
        })
    }

    // ── Mutations ────────────────────────────────────────────

    pub async fn quick_add(
        &self,
        target: SlotTarget,
        booking: Booking,
        overwrite: bool,
    ) -> Result<SlotNumber, LedgerError> {
        self.mutate(|ledger, now| ledger.quick_add(target, booking, overwrite, now.date()))
            .await
    }

    /// Overlay partial rows onto the current Active image, then apply the
    /// whole image. Columns a row leaves out keep their current value.
    pub async fn apply_edits(&self, edits: Vec<Row>) -> Result<usize, LedgerError> {
        let alert_days = self.settings.alert_days;
        self.mutate(|ledger, now| {
            let today = now.date();
            let mut image = ledger.active_rows(alert_days, today);
            for edit in &edits {
                let n = schema::slot_number_from_row(edit)?;
                let row = (n as usize)
                    .checked_sub(1)
                    .and_then(|i| image.get_mut(i))
                    .ok_or(LedgerError::InvalidSlot(n))?;
                for (column, value) in edit {
                    row.insert(column.clone(), value.clone());
                }
            }
            ledger.apply_edits(&image, today)?;
            Ok(edits.len())
        })
        .await
    }

    pub async fn clear_slots(&self, selection: BTreeSet<SlotNumber>) -> Result<usize, LedgerError> {
        self.mutate(|ledger, _| ledger.clear_slots(&selection)).await
    }

    pub async fn archive(&self, selection: BTreeSet<SlotNumber>) -> Result<ArchiveReport, LedgerError> {
        self.mutate(|ledger, now| Ok(ledger.archive(&selection, now))).await
    }

    pub async fn undo(&self, index: usize) -> Result<SlotNumber, LedgerError> {
        self.mutate(|ledger, now| ledger.undo(index, now.date())).await
    }

    pub async fn clear_archive(&self) -> Result<usize, LedgerError> {
        self.mutate(|ledger, _| Ok(ledger.clear_archive())).await
    }

    pub async fn reset(&self) -> Result<(), LedgerError> {
        self.mutate(|ledger, _| {
            ledger.reset();
            Ok(())
        })
        .await
    }

    // ── Admin ────────────────────────────────────────────────

    /// Write all three tables now, whatever the auto-save setting.
    pub async fn save(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.flush(self.settings.alert_days, now().date())?;
        info!("ledger saved");
        Ok(())
    }

    /// Flush only if there is something unsaved. Used on shutdown.
    pub async fn save_if_dirty(&self) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.ledger.is_dirty() {
            return Ok(false);
        }
        state.flush(self.settings.alert_days, now().date())?;
        Ok(true)
    }

    /// Discard in-memory state and load it again from the store. On failure
    /// the current state is kept.
    pub async fn reload(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let ledger = Ledger::load(state.store.as_ref(), self.capacity, now().date())?;
        if state.ledger.is_dirty() {
            warn!("reload discarded unsaved changes");
        }
        state.ledger = ledger;
        state.in_sync = true;
        state.record_gauges();
        info!("ledger reloaded from store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, Table};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose writes fail while `broken` is set.
    struct FlakyStore {
        inner: MemoryStore,
        broken: Arc<AtomicBool>,
    }

    impl RecordStore for FlakyStore {
        fn load_table(&self, table: Table) -> Result<Vec<Row>, StoreError> {
            self.inner.load_table(table)
        }

        fn replace_table(&mut self, table: Table, rows: &[Row]) -> Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.replace_table(table, rows)
        }

        fn has_table(&self, table: Table) -> Result<bool, StoreError> {
            self.inner.has_table(table)
        }
    }

    fn booking(client: &str) -> Booking {
        Booking {
            client_name: client.into(),
            start_date: "2099-01-01".into(),
            end_date: "2099-12-31".into(),
            rent: Some(1000.0),
            advance: Some(250.0),
            ..Default::default()
        }
    }

    fn service(slots: u32, settings: Settings) -> BoardService {
        BoardService::open(Box::new(MemoryStore::new()), Some(slots), settings).unwrap()
    }

    fn set(ns: &[SlotNumber]) -> BTreeSet<SlotNumber> {
        ns.iter().copied().collect()
    }

    #[tokio::test]
    async fn auto_save_keeps_ledger_clean() {
        let svc = service(5, Settings::default());
        assert!(!svc.summary().await.dirty);

        let n = svc.quick_add(SlotTarget::Auto, booking("Acme"), false).await.unwrap();
        assert_eq!(n, 1);
        let summary = svc.summary().await;
        assert!(!summary.dirty);
        assert!(summary.in_sync);
        assert_eq!(summary.stats.booked, 1);
        assert_eq!(summary.stats.available, 4);
    }

    #[tokio::test]
    async fn without_auto_save_changes_wait_for_save() {
        let settings = Settings {
            auto_save: false,
            ..Settings::default()
        };
        let svc = service(5, settings);
        svc.quick_add(SlotTarget::Auto, booking("Acme"), false).await.unwrap();
        assert!(svc.summary().await.dirty);

        svc.save().await.unwrap();
        assert!(!svc.summary().await.dirty);
    }

    #[tokio::test]
    async fn reload_discards_unsaved_changes() {
        let settings = Settings {
            auto_save: false,
            ..Settings::default()
        };
        let svc = service(5, settings);
        svc.save().await.unwrap();
        svc.quick_add(SlotTarget::Number(3), booking("Acme"), false).await.unwrap();

        svc.reload().await.unwrap();
        assert_eq!(svc.first_empty().await, Some(1));
        assert_eq!(svc.summary().await.stats.booked, 0);
    }

    #[tokio::test]
    async fn failed_flush_marks_out_of_sync_until_next_success() {
        let broken = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: MemoryStore::new(),
            broken: broken.clone(),
        };
        let svc = BoardService::open(Box::new(store), Some(3), Settings::default()).unwrap();

        broken.store(true, Ordering::SeqCst);
        let err = svc.quick_add(SlotTarget::Auto, booking("Acme"), false).await.unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        let summary = svc.summary().await;
        assert!(!summary.in_sync);
        assert!(summary.dirty);
        // the booking itself stays in memory
        assert_eq!(summary.stats.booked, 1);

        broken.store(false, Ordering::SeqCst);
        svc.save().await.unwrap();
        let summary = svc.summary().await;
        assert!(summary.in_sync);
        assert!(!summary.dirty);
    }

    #[tokio::test]
    async fn apply_edits_overlays_partial_rows() {
        let svc = service(3, Settings::default());
        svc.quick_add(SlotTarget::Number(1), booking("Acme"), false).await.unwrap();

        let mut edit = Row::new();
        edit.insert("slot_number".into(), "1".into());
        edit.insert("notes".into(), "renewal due".into());
        assert_eq!(svc.apply_edits(vec![edit]).await.unwrap(), 1);

        let rows = svc.active_rows().await;
        assert_eq!(rows[0]["client_name"], "Acme");
        assert_eq!(rows[0]["notes"], "renewal due");
        assert_eq!(rows[0]["balance"], "750");

        let mut bad = Row::new();
        bad.insert("slot_number".into(), "9".into());
        assert!(matches!(
            svc.apply_edits(vec![bad]).await,
            Err(LedgerError::InvalidSlot(9))
        ));
    }

    #[tokio::test]
    async fn archive_undo_and_contract() {
        let svc = service(5, Settings::default());
        svc.quick_add(SlotTarget::Number(2), booking("Acme"), false).await.unwrap();

        let report = svc.archive(set(&[2, 3])).await.unwrap();
        assert_eq!(
            report.outcomes,
            vec![(2, ArchiveOutcome::Archived), (3, ArchiveOutcome::SkippedEmpty)]
        );

        let doc = svc.contract(2, RecordSource::Archive).await.unwrap();
        assert_eq!(doc.file_name, "Billboard_2_Contract.html");
        assert!(String::from_utf8(doc.body).unwrap().contains("Acme"));
        assert!(svc.contract(2, RecordSource::Active).await.is_err());

        assert_eq!(svc.undo(0).await.unwrap(), 2);
        assert!(svc.archive_entries().await.is_empty());
        assert!(svc.contract(2, RecordSource::Active).await.is_ok());
    }

    #[tokio::test]
    async fn file_backed_service_survives_restart() {
        let dir = std::env::temp_dir().join("billboard_test_service").join("restart");
        let _ = std::fs::remove_dir_all(&dir);
        {
            let store = FileStore::open(&dir).unwrap();
            let svc = BoardService::open(Box::new(store), Some(4), Settings::default()).unwrap();
            svc.quick_add(SlotTarget::Number(4), booking("Acme"), false).await.unwrap();
        }
        let store = FileStore::open(&dir).unwrap();
        let svc = BoardService::open(Box::new(store), None, Settings::default()).unwrap();
        let summary = svc.summary().await;
        assert_eq!(summary.stats.total_slots, 4);
        assert_eq!(summary.stats.booked, 1);
        assert!(!summary.dirty);
    }
}
