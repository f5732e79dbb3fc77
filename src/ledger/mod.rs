use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which partition an identifier belongs to. `Pending` is provisional;
/// `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Pending,
    Accepted,
    Rejected,
}

/// One classified pair as it appears in the partition files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub href: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_liquidity: Option<bool>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// An identifier was reclassified inconsistently. This is surfaced, not
    /// silently overwritten, because it indicates a consistency bug upstream.
    #[error("{identifier} already classified as {existing:?}, refusing {requested:?}")]
    DuplicateClassification {
        identifier: String,
        existing: Classification,
        requested: Classification,
    },
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger parse error in {file}: {source}")]
    Parse {
        file: String,
        source: serde_json::Error,
    },
}

const PARTITIONS: [(Classification, &str); 3] = [
    (Classification::Pending, "new_pairs.json"),
    (Classification::Accepted, "good_pairs.json"),
    (Classification::Rejected, "bad_pairs.json"),
];

/// Durable record of which identifiers have already been classified.
///
/// A single in-memory map is the source of truth; the three partition files
/// are a flush target, merged back at load so a restarted process never
/// revisits an already-classified identifier.
pub struct DedupLedger {
    dir: PathBuf,
    entries: HashMap<String, (Classification, LedgerEntry)>,
}

impl DedupLedger {
    /// Load whatever partition files exist under `dir`. Missing or empty
    /// files initialize to empty partitions, not errors.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        let mut entries = HashMap::new();

        for (class, file) in PARTITIONS {
            for entry in read_partition(&dir.join(file))? {
                entries.insert(entry.href.clone(), (class, entry));
            }
        }

        tracing::info!(
            "ledger loaded: {} known identifiers from {}",
            entries.len(),
            dir.display()
        );
        Ok(Self { dir, entries })
    }

    pub fn is_known(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn classification(&self, identifier: &str) -> Option<Classification> {
        self.entries.get(identifier).map(|(class, _)| *class)
    }

    /// All known identifiers, for filtering a polled batch in one pass.
    pub fn snapshot(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Entries currently in `class`, in deterministic order.
    pub fn entries_in(&self, class: Classification) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|(c, _)| *c == class)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| (&a.timestamp, &a.href).cmp(&(&b.timestamp, &b.href)));
        entries
    }

    /// Assign `class` to the entry's identifier.
    ///
    /// Same class twice is a no-op that refreshes the stored entry. Promoting
    /// a `Pending` identifier to a terminal class is the normal flow. Any
    /// other change fails with `DuplicateClassification`.
    pub fn classify(&mut self, entry: LedgerEntry, class: Classification) -> Result<(), LedgerError> {
        match self.entries.get(&entry.href) {
            None => {
                self.entries.insert(entry.href.clone(), (class, entry));
                Ok(())
            }
            Some((existing, _)) if *existing == class => {
                self.entries.insert(entry.href.clone(), (class, entry));
                Ok(())
            }
            Some((Classification::Pending, _)) => {
                self.entries.insert(entry.href.clone(), (class, entry));
                Ok(())
            }
            Some((existing, _)) => Err(LedgerError::DuplicateClassification {
                identifier: entry.href,
                existing: *existing,
                requested: class,
            }),
        }
    }

    /// Write all partitions. Each file is replaced atomically so a crash
    /// mid-flush leaves the old partition intact.
    pub fn flush(&self) -> Result<(), LedgerError> {
        fs::create_dir_all(&self.dir)?;

        for (class, file) in PARTITIONS {
            let entries = self.entries_in(class);
            let path = self.dir.join(file);
            let tmp = self.dir.join(format!("{}.tmp", file));

            let json = serde_json::to_string_pretty(&entries).map_err(|source| {
                LedgerError::Parse {
                    file: file.to_string(),
                    source,
                }
            })?;
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }
}

fn read_partition(path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|source| LedgerError::Parse {
        file: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(href: &str) -> LedgerEntry {
        LedgerEntry {
            href: href.to_string(),
            timestamp: "2024-05-01 12:00:00".to_string(),
            contract_address: None,
            locked_liquidity: None,
        }
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempdir().unwrap();
        let ledger = DedupLedger::load(dir.path().join("does-not-exist-yet")).unwrap();
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn classify_then_is_known() {
        let dir = tempdir().unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();

        ledger.classify(entry("a"), Classification::Pending).unwrap();
        assert!(ledger.is_known("a"));
        assert!(!ledger.is_known("b"));
        assert_eq!(ledger.classification("a"), Some(Classification::Pending));
    }

    #[test]
    fn same_class_twice_is_noop() {
        let dir = tempdir().unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();

        ledger.classify(entry("a"), Classification::Accepted).unwrap();
        ledger.classify(entry("a"), Classification::Accepted).unwrap();
        assert_eq!(ledger.entries_in(Classification::Accepted).len(), 1);
    }

    #[test]
    fn pending_promotes_but_terminal_never_flips() {
        let dir = tempdir().unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();

        ledger.classify(entry("a"), Classification::Pending).unwrap();
        ledger.classify(entry("a"), Classification::Accepted).unwrap();
        assert_eq!(ledger.classification("a"), Some(Classification::Accepted));

        let err = ledger
            .classify(entry("a"), Classification::Rejected)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateClassification { .. }));

        let err = ledger
            .classify(entry("a"), Classification::Pending)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateClassification { .. }));
    }

    #[test]
    fn one_partition_per_identifier_after_promotion() {
        let dir = tempdir().unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();

        ledger.classify(entry("a"), Classification::Pending).unwrap();
        ledger.classify(entry("a"), Classification::Rejected).unwrap();

        assert!(ledger.entries_in(Classification::Pending).is_empty());
        assert_eq!(ledger.entries_in(Classification::Rejected).len(), 1);
    }

    #[test]
    fn survives_restart() {
        let dir = tempdir().unwrap();

        let mut ledger = DedupLedger::load(dir.path()).unwrap();
        let mut enriched = entry("a");
        enriched.contract_address = Some("abc123XYZ".to_string());
        enriched.locked_liquidity = Some(true);
        ledger.classify(enriched.clone(), Classification::Accepted).unwrap();
        ledger.classify(entry("b"), Classification::Rejected).unwrap();
        ledger.flush().unwrap();
        drop(ledger);

        let reloaded = DedupLedger::load(dir.path()).unwrap();
        assert!(reloaded.is_known("a"));
        assert!(reloaded.is_known("b"));
        assert_eq!(reloaded.entries_in(Classification::Accepted), vec![enriched]);
    }

    #[test]
    fn empty_partition_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good_pairs.json"), "").unwrap();

        let ledger = DedupLedger::load(dir.path()).unwrap();
        assert!(ledger.snapshot().is_empty());
    }
}
