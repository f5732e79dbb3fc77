use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::Item;

/// One persisted row. Column order matches the declaration order here;
/// `contract_address` stays blank until enrichment succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRecord {
    pub name: String,
    pub fullname: String,
    pub price: String,
    pub age: String,
    pub makers: String,
    pub volume: String,
    pub buys: String,
    pub sells: String,
    pub liquidity: String,
    pub fdv: String,
    pub href: String,
    pub timestamp: String,
    pub contract_address: Option<String>,
}

impl PairRecord {
    pub fn from_item(item: &Item) -> Self {
        Self {
            name: item.fields.name.clone(),
            fullname: item.fields.fullname.clone(),
            price: item.fields.price.clone(),
            age: item.fields.age.clone(),
            makers: item.fields.makers.clone(),
            volume: item.fields.volume.clone(),
            buys: item.fields.buys.clone(),
            sells: item.fields.sells.clone(),
            liquidity: item.fields.liquidity.clone(),
            fdv: item.fields.fdv.clone(),
            href: item.identifier.clone(),
            timestamp: item.timestamp(),
            contract_address: item
                .enrichment
                .as_ref()
                .map(|e| e.contract_address.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// `upsert` found no prior row for the identifier; callers append instead.
    #[error("no record with identifier {0}")]
    NotFound(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV-backed record store supporting the two persistence shapes the
/// pipeline needs: append-only growth and idempotent update-by-identifier
/// with atomic replacement.
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rows currently on disk. A store that does not exist yet reads as
    /// empty.
    pub fn load(&self) -> Result<Vec<PairRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }

    /// Append one record, writing the header only when the file is new or
    /// empty.
    pub fn append(&self, record: &PairRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let needs_header = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Replace the row whose `href` matches, collapsing any duplicate rows
    /// for that identifier into the one updated record.
    ///
    /// The whole file is rewritten to a temporary sibling and renamed over
    /// the original, so a crash mid-write leaves either the fully-old or
    /// fully-new file, never a partial one.
    pub fn upsert(&self, record: &PairRecord) -> Result<(), StoreError> {
        let rows = self.load()?;
        if !rows.iter().any(|row| row.href == record.href) {
            return Err(StoreError::NotFound(record.href.clone()));
        }

        let tmp = self.tmp_path();
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            let mut replaced = false;
            for row in &rows {
                if row.href == record.href {
                    if !replaced {
                        writer.serialize(record)?;
                        replaced = true;
                    }
                } else {
                    writer.serialize(row)?;
                }
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(href: &str, price: &str, contract: Option<&str>) -> PairRecord {
        PairRecord {
            name: "PEPE".to_string(),
            fullname: "Pepe Coin".to_string(),
            price: price.to_string(),
            age: "2m".to_string(),
            makers: "12".to_string(),
            volume: "$5K".to_string(),
            buys: "30".to_string(),
            sells: "4".to_string(),
            liquidity: "$12K".to_string(),
            fdv: "$100K".to_string(),
            href: href.to_string(),
            timestamp: "2024-05-01 12:00:00".to_string(),
            contract_address: contract.map(str::to_string),
        }
    }

    #[test]
    fn append_writes_header_exactly_once() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));

        store.append(&record("a", "$1", None)).unwrap();
        store.append(&record("b", "$2", None)).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.matches("name,fullname").count(), 1);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_matching_row_only() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));

        store.append(&record("a", "$1", None)).unwrap();
        store.append(&record("b", "$2", None)).unwrap();

        store
            .upsert(&record("a", "$9", Some("abc123XYZ")))
            .unwrap();

        let rows = store.load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price, "$9");
        assert_eq!(rows[0].contract_address.as_deref(), Some("abc123XYZ"));
        assert_eq!(rows[1].price, "$2");
        assert_eq!(rows[1].contract_address, None);
    }

    #[test]
    fn upsert_collapses_duplicate_rows() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));

        store.append(&record("a", "$1", None)).unwrap();
        store.append(&record("a", "$2", None)).unwrap();

        store.upsert(&record("a", "$3", None)).unwrap();

        let rows = store.load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, "$3");
    }

    #[test]
    fn upsert_unknown_identifier_is_not_found() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));
        store.append(&record("a", "$1", None)).unwrap();

        let err = store.upsert(&record("zzz", "$1", None)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(href) if href == "zzz"));
    }

    #[test]
    fn crash_before_rename_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("pairs.csv"));

        store.append(&record("a", "$1", None)).unwrap();
        store.append(&record("b", "$2", None)).unwrap();
        let before = fs::read(store.path()).unwrap();

        // A crashed upsert is a stray temp file that never got renamed.
        fs::write(store.tmp_path(), "name,fullname\ngarbage,partial").unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), before);

        // The next completed upsert recovers and leaves one row per href.
        store.upsert(&record("b", "$7", None)).unwrap();
        let rows = store.load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].price, "$7");
    }
}
