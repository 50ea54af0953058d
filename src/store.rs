use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A flat record: column name → text cell. Blank cells may be absent.
pub type Row = BTreeMap<String, String>;

/// The three persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Active,
    Archive,
    Summary,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Active, Table::Archive, Table::Summary];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Active => "active",
            Table::Archive => "archive",
            Table::Summary => "summary",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("table encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("table {table} is corrupt: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Load-all / replace-all persistence. There is no incremental update:
/// every write hands over the complete table image.
pub trait RecordStore: Send {
    /// Every row of `table`. A table that was never written loads as empty.
    fn load_table(&self, table: Table) -> Result<Vec<Row>, StoreError>;

    /// Replace the whole of `table` with `rows`.
    fn replace_table(&mut self, table: Table, rows: &[Row]) -> Result<(), StoreError>;

    /// True if `table` has been written at least once.
    fn has_table(&self, table: Table) -> Result<bool, StoreError>;
}

// ── In-memory store ──────────────────────────────────────────────

/// Volatile store used when persistence is switched off, and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: HashMap<Table, Vec<Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn load_table(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        Ok(self.tables.get(&table).cloned().unwrap_or_default())
    }

    fn replace_table(&mut self, table: Table, rows: &[Row]) -> Result<(), StoreError> {
        self.tables.insert(table, rows.to_vec());
        Ok(())
    }

    fn has_table(&self, table: Table) -> Result<bool, StoreError> {
        Ok(self.tables.contains_key(&table))
    }
}

// ── File store ───────────────────────────────────────────────────

/// One snapshot file per table under a data directory.
///
/// Format: `[u32: len][bincode: Vec<Row>][u32: crc32]`, little-endian.
/// A replace writes a temp file, fsyncs it and renames it over the old
/// snapshot, so readers see either the old or the new table in full.
/// Unlike a log there is no valid prefix to salvage: a short read or a
/// checksum mismatch fails the load.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (or create) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.dir.join(format!("{}.tbl", table.name()))
    }

    fn write_snapshot(path: &Path, rows: &[Row]) -> Result<(), StoreError> {
        let payload = bincode::serialize(rows)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "table too large"))?;
        let crc = crc32fast::hash(&payload);

        let tmp_path = path.with_extension("tbl.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_snapshot(path: &Path, table: Table) -> Result<Vec<Row>, StoreError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let corrupt = |reason: &str| StoreError::Corrupt {
            table: table.name(),
            reason: reason.to_string(),
        };

        let mut len_buf = [0u8; 4];
        read_exact_or(&mut reader, &mut len_buf, || corrupt("truncated length"))?;
        let len = u32::from_le_bytes(len_buf);
        // Header and checksum take 8 bytes; the payload cannot be larger than the rest.
        if u64::from(len) > file_len.saturating_sub(8) {
            return Err(corrupt("length exceeds file"));
        }
        let len = len as usize;

        let mut payload = vec![0u8; len];
        read_exact_or(&mut reader, &mut payload, || corrupt("truncated payload"))?;

        let mut crc_buf = [0u8; 4];
        read_exact_or(&mut reader, &mut crc_buf, || corrupt("truncated checksum"))?;
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return Err(corrupt("checksum mismatch"));
        }

        bincode::deserialize(&payload).map_err(|e| corrupt(&e.to_string()))
    }
}

fn read_exact_or(
    reader: &mut impl Read,
    buf: &mut [u8],
    on_eof: impl FnOnce() -> StoreError,
) -> Result<(), StoreError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(on_eof()),
        Err(e) => Err(e.into()),
    }
}

impl RecordStore for FileStore {
    fn load_table(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        Self::read_snapshot(&self.table_path(table), table)
    }

    fn replace_table(&mut self, table: Table, rows: &[Row]) -> Result<(), StoreError> {
        Self::write_snapshot(&self.table_path(table), rows)
    }

    fn has_table(&self, table: Table) -> Result<bool, StoreError> {
        Ok(self.table_path(table).try_exists()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("billboard_test_store").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replace_and_load() {
        let mut store = FileStore::open(tmp_dir("replace_and_load")).unwrap();
        let rows = vec![
            row(&[("slot_number", "1"), ("client_name", "Acme")]),
            row(&[("slot_number", "2")]),
        ];
        store.replace_table(Table::Active, &rows).unwrap();

        assert_eq!(store.load_table(Table::Active).unwrap(), rows);
        assert!(store.has_table(Table::Active).unwrap());
        assert!(!store.has_table(Table::Archive).unwrap());
    }

    #[test]
    fn replace_overwrites_whole_table() {
        let mut store = FileStore::open(tmp_dir("overwrite")).unwrap();
        store
            .replace_table(Table::Archive, &[row(&[("a", "1")]), row(&[("a", "2")])])
            .unwrap();
        store.replace_table(Table::Archive, &[]).unwrap();

        assert!(store.load_table(Table::Archive).unwrap().is_empty());
        assert!(store.has_table(Table::Archive).unwrap());
        assert!(!store.table_path(Table::Archive).with_extension("tbl.tmp").exists());
    }

    #[test]
    fn missing_table_loads_empty() {
        let store = FileStore::open(tmp_dir("missing")).unwrap();
        assert!(store.load_table(Table::Summary).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let mut store = FileStore::open(tmp_dir("bad_crc")).unwrap();
        store
            .replace_table(Table::Summary, &[row(&[("total_slots", "50")])])
            .unwrap();

        let path = store.table_path(Table::Summary);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = store.load_table(Table::Summary).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "summary", .. }));
    }

    #[test]
    fn truncated_snapshot_is_corrupt() {
        let mut store = FileStore::open(tmp_dir("truncated")).unwrap();
        store
            .replace_table(Table::Active, &[row(&[("slot_number", "1")])])
            .unwrap();

        let path = store.table_path(Table::Active);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();

        assert!(matches!(
            store.load_table(Table::Active),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn oversized_length_header_is_corrupt() {
        let mut store = FileStore::open(tmp_dir("huge_len")).unwrap();
        store
            .replace_table(Table::Archive, &[row(&[("slot_number", "3")])])
            .unwrap();

        let path = store.table_path(Table::Archive);
        let mut bytes = fs::read(&path).unwrap();
        bytes[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let err = store.load_table(Table::Archive).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Corrupt { table: "archive", ref reason } if reason == "length exceeds file"
        ));
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert!(!store.has_table(Table::Active).unwrap());
        let rows = vec![row(&[("slot_number", "7")])];
        store.replace_table(Table::Active, &rows).unwrap();
        assert_eq!(store.load_table(Table::Active).unwrap(), rows);
    }
}
