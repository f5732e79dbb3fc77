use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tempfile::tempdir;

use dexwatch::core::config::{
    Config, EnrichConfig, MonitoringConfig, ScanConfig, SourceConfig, StorageConfig,
};
use dexwatch::ledger::{Classification, DedupLedger};
use dexwatch::model::RawItemFields;
use dexwatch::pipeline::Pipeline;
use dexwatch::source::{PageSource, SourceError};
use dexwatch::store::CsvStore;

/// Scripted in-memory listing: a fixed snapshot, per-pair detail ages and
/// contract-extraction scripts, and counters for the interactions the
/// pipeline is supposed to bound.
#[derive(Default)]
struct FakeSource {
    listing: Vec<RawItemFields>,
    detail_ages: HashMap<String, String>,
    contract_scripts: HashMap<String, VecDeque<Option<String>>>,
    metrics: HashMap<String, RawItemFields>,
    open_detail: Option<String>,
    detail_opens: usize,
    extract_attempts: usize,
}

impl FakeSource {
    fn with_listing(listing: Vec<RawItemFields>) -> Self {
        Self {
            listing,
            ..Self::default()
        }
    }

    fn script_contract(&mut self, href: &str, results: Vec<Option<&str>>) {
        self.contract_scripts.insert(
            href.to_string(),
            results
                .into_iter()
                .map(|r| r.map(str::to_string))
                .collect(),
        );
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn open_listing(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn list_item(&mut self, index: usize) -> Result<Option<RawItemFields>, SourceError> {
        Ok(self.listing.get(index - 1).cloned())
    }

    async fn open_detail(&mut self, identifier: &str) -> Result<(), SourceError> {
        assert!(
            self.open_detail.is_none(),
            "detail view opened while another was open"
        );
        self.open_detail = Some(identifier.to_string());
        self.detail_opens += 1;
        Ok(())
    }

    async fn detail_age_text(&mut self) -> Result<String, SourceError> {
        let href = self.open_detail.as_ref().expect("no detail view open");
        self.detail_ages
            .get(href)
            .cloned()
            .ok_or_else(|| SourceError::Transient("age element absent".into()))
    }

    async fn extract_contract_address(&mut self) -> Result<Option<String>, SourceError> {
        self.extract_attempts += 1;
        let href = self.open_detail.as_ref().expect("no detail view open");
        Ok(self
            .contract_scripts
            .get_mut(href)
            .and_then(VecDeque::pop_front)
            .flatten())
    }

    async fn detail_locked_liquidity(&mut self) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn detail_metrics(&mut self) -> Result<RawItemFields, SourceError> {
        let href = self.open_detail.as_ref().expect("no detail view open");
        self.metrics
            .get(href)
            .cloned()
            .ok_or_else(|| SourceError::Transient("metrics absent".into()))
    }

    async fn close_detail(&mut self) -> Result<(), SourceError> {
        assert!(self.open_detail.is_some(), "close without open");
        self.open_detail = None;
        Ok(())
    }
}

fn fields(href: &str, name: &str, age: &str) -> RawItemFields {
    RawItemFields {
        href: href.to_string(),
        name: name.to_string(),
        fullname: format!("{} Coin", name),
        price: "$0.0001".to_string(),
        age: age.to_string(),
        makers: "12".to_string(),
        volume: "$5K".to_string(),
        buys: "30".to_string(),
        sells: "4".to_string(),
        liquidity: "$12K".to_string(),
        fdv: "$100K".to_string(),
    }
}

fn snapshot() -> Vec<RawItemFields> {
    vec![
        fields("https://dex.example/solana/aaa", "AAA", "2m"),
        fields("https://dex.example/solana/bbb", "BBB", "45m"),
        fields("https://dex.example/solana/ccc", "CCC", "3h"),
    ]
}

fn test_config(data_dir: &Path) -> Config {
    Config {
        source: SourceConfig {
            webdriver_url: "http://localhost:9515".to_string(),
            base_url: "https://dex.example/".to_string(),
            chain_id: "solana".to_string(),
            min_liquidity: 10_000,
            max_fdv: 200_000_000,
            max_age_hours: 1,
            min_5m_volume: 3_000,
        },
        scan: ScanConfig {
            freshness_minutes: 30.0,
            poll_interval_minutes: 5,
            refresh_interval_minutes: 1,
            refresh_enabled: true,
        },
        enrich: EnrichConfig {
            max_retries: 3,
            retry_delay_secs: 0,
            strict_units: false,
        },
        storage: StorageConfig {
            data_dir: data_dir.display().to_string(),
        },
        monitoring: MonitoringConfig {
            log_level: "info".to_string(),
        },
    }
}

fn master_store(data_dir: &Path) -> CsvStore {
    CsvStore::new(data_dir.join("pairs.csv"))
}

#[tokio::test]
async fn fresh_item_is_enriched_and_cycle_is_idempotent() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let mut source = FakeSource::with_listing(snapshot());
    source
        .detail_ages
        .insert("https://dex.example/solana/aaa".to_string(), "2m".to_string());
    source.script_contract("https://dex.example/solana/aaa", vec![Some("abc123XYZ")]);

    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);

    let summary = pipeline.run_discovery_cycle().await.unwrap();
    assert_eq!(summary.polled, 3);
    assert_eq!(summary.fresh, 1);
    assert_eq!(summary.enriched, 1);
    assert_eq!(summary.aged_out, 2);
    assert_eq!(summary.failed, 0);

    let rows = master_store(dir.path()).load().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].href, "https://dex.example/solana/aaa");
    assert_eq!(rows[0].contract_address.as_deref(), Some("abc123XYZ"));

    // Second run over the unchanged snapshot: nothing new, no detail visits.
    let summary = pipeline.run_discovery_cycle().await.unwrap();
    assert_eq!(summary.already_known, 3);
    assert_eq!(summary.fresh, 0);
    assert_eq!(summary.enriched, 0);

    let (source, ledger) = pipeline.into_parts();
    assert_eq!(source.detail_opens, 1);
    assert!(source.open_detail.is_none(), "listing baseline restored");
    assert_eq!(ledger.entries_in(Classification::Accepted).len(), 1);
    assert_eq!(ledger.entries_in(Classification::Rejected).len(), 2);
    assert!(ledger.entries_in(Classification::Pending).is_empty());
}

#[tokio::test]
async fn exhausted_retries_are_recorded_not_dropped() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let href = "https://dex.example/solana/aaa";

    let mut source =
        FakeSource::with_listing(vec![fields(href, "AAA", "2m")]);
    source.detail_ages.insert(href.to_string(), "2m".to_string());
    // Every attempt yields a UI artifact that fails validation.
    source.script_contract(href, vec![Some("Copied!"), Some("Copied!"), Some("Copied!")]);

    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);

    let summary = pipeline.run_discovery_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.enriched, 0);

    let rows = master_store(dir.path()).load().unwrap();
    assert_eq!(rows.len(), 1, "failed enrichment still persists the base record");
    assert_eq!(rows[0].contract_address, None);

    let (source, ledger) = pipeline.into_parts();
    assert_eq!(source.extract_attempts, 3, "bounded by max_retries");
    assert_eq!(ledger.classification(href), Some(Classification::Rejected));
}

#[tokio::test]
async fn restart_never_reprocesses_classified_identifiers() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let mut source = FakeSource::with_listing(snapshot());
    source
        .detail_ages
        .insert("https://dex.example/solana/aaa".to_string(), "2m".to_string());
    source.script_contract("https://dex.example/solana/aaa", vec![Some("abc123XYZ")]);

    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);
    pipeline.run_discovery_cycle().await.unwrap();
    drop(pipeline);

    // Fresh process: new source, ledger reloaded from the partition files.
    let source = FakeSource::with_listing(snapshot());
    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);

    let summary = pipeline.run_discovery_cycle().await.unwrap();
    assert_eq!(summary.already_known, 3);
    assert_eq!(summary.fresh, 0);

    let (source, _) = pipeline.into_parts();
    assert_eq!(source.detail_opens, 0);
    assert_eq!(master_store(dir.path()).load().unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_updates_mutable_metrics_and_keeps_discovery_fields() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let href = "https://dex.example/solana/aaa";

    let mut source = FakeSource::with_listing(vec![fields(href, "AAA", "2m")]);
    source.detail_ages.insert(href.to_string(), "2m".to_string());
    source.script_contract(href, vec![Some("abc123XYZ")]);

    let mut updated = fields(href, "", "9m");
    updated.price = "$0.0009".to_string();
    updated.volume = "$40K".to_string();
    source.metrics.insert(href.to_string(), updated);

    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);
    pipeline.run_discovery_cycle().await.unwrap();

    let before = master_store(dir.path()).load().unwrap();
    assert_eq!(pipeline.run_refresh_cycle().await.unwrap(), 1);

    let rows = master_store(dir.path()).load().unwrap();
    assert_eq!(rows.len(), 1, "refresh upserts, never duplicates");
    assert_eq!(rows[0].price, "$0.0009");
    assert_eq!(rows[0].volume, "$40K");
    assert_eq!(rows[0].age, "9m");
    assert_eq!(rows[0].name, "AAA", "immutable fields survive refresh");
    assert_eq!(rows[0].timestamp, before[0].timestamp);
    assert_eq!(rows[0].contract_address.as_deref(), Some("abc123XYZ"));
}

#[tokio::test]
async fn backfill_patches_rows_missing_a_contract_address() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let href = "https://dex.example/solana/aaa";

    let mut source = FakeSource::with_listing(vec![fields(href, "AAA", "2m")]);
    source.detail_ages.insert(href.to_string(), "2m".to_string());
    // Discovery finds nothing on the clipboard; the startup backfill does.
    source.script_contract(
        href,
        vec![None, None, None, Some("abc123XYZ")],
    );

    let ledger = DedupLedger::load(dir.path()).unwrap();
    let mut pipeline = Pipeline::new(source, ledger, &config);

    let summary = pipeline.run_discovery_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(
        master_store(dir.path()).load().unwrap()[0].contract_address,
        None
    );

    assert_eq!(pipeline.backfill_missing_contracts().await.unwrap(), 1);
    let rows = master_store(dir.path()).load().unwrap();
    assert_eq!(rows[0].contract_address.as_deref(), Some("abc123XYZ"));

    // Nothing left to patch on the next pass.
    assert_eq!(pipeline.backfill_missing_contracts().await.unwrap(), 0);
}
