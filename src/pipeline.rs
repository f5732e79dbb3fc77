use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::Config;
use crate::enrich::{validate_contract_address, EnrichOutcome, EnrichmentWorker};
use crate::ledger::{Classification, DedupLedger, LedgerEntry};
use crate::model::{Item, ItemStatus};
use crate::scanner::age::{age_minutes, is_fresh, UnitPolicy};
use crate::scanner::ListingPoller;
use crate::source::{PageSource, SourceError};
use crate::store::{CsvStore, PairRecord, StoreError};

/// Counters for one discovery cycle, logged at cycle end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub polled: usize,
    pub already_known: usize,
    pub fresh: usize,
    pub aged_out: usize,
    pub enriched: usize,
    pub failed: usize,
    pub stale: usize,
}

/// Drives one listing stream through poll → filter → dedup → enrich →
/// persist. Owns the navigation context, the ledger, and the stores; the
/// scheduler in `main` decides when its cycles run.
pub struct Pipeline<S: PageSource> {
    source: S,
    ledger: DedupLedger,
    master: CsvStore,
    data_dir: PathBuf,
    worker: EnrichmentWorker,
    freshness_minutes: f64,
    unit_policy: UnitPolicy,
}

impl<S: PageSource> Pipeline<S> {
    pub fn new(source: S, ledger: DedupLedger, config: &Config) -> Self {
        let unit_policy = if config.enrich.strict_units {
            UnitPolicy::Strict
        } else {
            UnitPolicy::Lenient
        };
        let data_dir = PathBuf::from(&config.storage.data_dir);

        Self {
            source,
            ledger,
            master: CsvStore::new(data_dir.join("pairs.csv")),
            data_dir,
            worker: EnrichmentWorker::new(
                config.enrich.max_retries,
                Duration::from_secs(config.enrich.retry_delay_secs),
                config.scan.freshness_minutes,
                unit_policy,
            ),
            freshness_minutes: config.scan.freshness_minutes,
            unit_policy,
        }
    }

    /// One full discovery cycle. Per-item enrichment failures are isolated;
    /// only a failed poll or a store/ledger write error aborts the cycle,
    /// and the caller waits for the next tick rather than terminating.
    pub async fn run_discovery_cycle(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        let rows = ListingPoller::poll(&mut self.source)
            .await
            .context("listing poll failed")?;
        summary.polled = rows.len();

        // Filter the whole batch against one snapshot of the ledger instead
        // of probing it per row as history grows.
        let known = self.ledger.snapshot();
        let mut seen_this_pass: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();

        for fields in rows {
            let identifier = fields.href.trim_end_matches('/').to_string();
            if known.contains(&identifier) || !seen_this_pass.insert(identifier) {
                summary.already_known += 1;
                continue;
            }

            let age = age_minutes(&fields.age, self.unit_policy);
            let mut item = Item::from_fields(fields, age);
            match item.age_minutes {
                Some(minutes) if is_fresh(minutes, self.freshness_minutes) => {
                    item.status = ItemStatus::Fresh;
                    summary.fresh += 1;
                    candidates.push(item);
                }
                Some(_) => {
                    // Ages only grow; this pair can never become eligible.
                    summary.aged_out += 1;
                    self.classify(&item, Classification::Rejected)?;
                }
                None => {
                    tracing::warn!(
                        "{} reports unparseable age {:?}, rejecting",
                        item.identifier,
                        item.raw_age
                    );
                    summary.aged_out += 1;
                    self.classify(&item, Classification::Rejected)?;
                }
            }
        }
        self.ledger.flush().context("ledger flush failed")?;

        // Enrich survivors in listing order.
        for mut item in candidates {
            self.classify(&item, Classification::Pending)?;
            self.ledger.flush().context("ledger flush failed")?;

            item.status = ItemStatus::Enriching;
            match self.worker.enrich(&mut self.source, &item).await {
                EnrichOutcome::Enriched(enrichment) => {
                    item.enrichment = Some(enrichment);
                    item.status = ItemStatus::Enriched;
                    summary.enriched += 1;
                    self.classify(&item, Classification::Accepted)?;
                }
                EnrichOutcome::Stale => {
                    summary.stale += 1;
                    self.classify(&item, Classification::Rejected)?;
                }
                EnrichOutcome::Failed => {
                    item.status = ItemStatus::EnrichmentFailed;
                    summary.failed += 1;
                    self.classify(&item, Classification::Rejected)?;
                }
            }

            let record = PairRecord::from_item(&item);
            self.persist_discovery(&record)
                .with_context(|| format!("persisting {}", item.identifier))?;
            self.ledger.flush().context("ledger flush failed")?;
        }

        tracing::info!(
            "discovery cycle: {} polled, {} known, {} fresh, {} enriched, {} failed, {} stale, {} aged out",
            summary.polled,
            summary.already_known,
            summary.fresh,
            summary.enriched,
            summary.failed,
            summary.stale,
            summary.aged_out
        );
        Ok(summary)
    }

    /// Re-poll previously accepted pairs' mutable metrics and update their
    /// rows in place. Runs on its own, faster cadence.
    pub async fn run_refresh_cycle(&mut self) -> Result<usize> {
        let accepted = self.ledger.entries_in(Classification::Accepted);
        if accepted.is_empty() {
            return Ok(0);
        }

        let existing = self.master.load().context("loading store for refresh")?;
        let mut refreshed = 0;

        for entry in accepted {
            let Some(current) = existing.iter().find(|row| row.href == entry.href) else {
                tracing::warn!("accepted pair {} has no persisted record", entry.href);
                continue;
            };
            match self.refresh_one(current.clone()).await {
                Ok(()) => refreshed += 1,
                Err(e) => tracing::warn!("refresh failed for {}: {:#}", entry.href, e),
            }
        }

        tracing::debug!("refresh cycle: {} pairs updated", refreshed);
        Ok(refreshed)
    }

    async fn refresh_one(&mut self, mut record: PairRecord) -> Result<()> {
        self.source.open_detail(&record.href).await?;
        let metrics = self.source.detail_metrics().await;
        if let Err(e) = self.source.close_detail().await {
            tracing::warn!("failed to restore listing view after {}: {}", record.href, e);
        }
        let metrics = metrics?;

        // Mutable metrics only; name, discovery timestamp, and contract
        // address stay as first persisted.
        record.price = metrics.price;
        record.age = metrics.age;
        record.makers = metrics.makers;
        record.volume = metrics.volume;
        record.buys = metrics.buys;
        record.sells = metrics.sells;
        record.liquidity = metrics.liquidity;
        record.fdv = metrics.fdv;

        match self.master.upsert(&record) {
            Err(StoreError::NotFound(_)) => self.master.append(&record)?,
            other => other?,
        }
        Ok(())
    }

    /// One pass over persisted rows that never got a contract address,
    /// retrying the lookup and patching the rows in place.
    pub async fn backfill_missing_contracts(&mut self) -> Result<usize> {
        let rows = self.master.load().context("loading store for backfill")?;
        let mut updated = 0;

        for mut row in rows
            .into_iter()
            .filter(|row| row.contract_address.is_none())
        {
            let address = match self.lookup_contract(&row.href).await {
                Ok(Some(address)) => address,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("backfill lookup failed for {}: {}", row.href, e);
                    continue;
                }
            };

            row.contract_address = Some(address);
            self.master
                .upsert(&row)
                .with_context(|| format!("patching {}", row.href))?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn lookup_contract(&mut self, href: &str) -> Result<Option<String>, SourceError> {
        self.source.open_detail(href).await?;
        let extracted = self.source.extract_contract_address().await;
        if let Err(e) = self.source.close_detail().await {
            tracing::warn!("failed to restore listing view after {}: {}", href, e);
        }
        Ok(extracted?.filter(|address| validate_contract_address(address)))
    }

    fn classify(&mut self, item: &Item, class: Classification) -> Result<()> {
        let entry = LedgerEntry {
            href: item.identifier.clone(),
            timestamp: item.timestamp(),
            contract_address: item
                .enrichment
                .as_ref()
                .map(|e| e.contract_address.clone()),
            locked_liquidity: item.enrichment.as_ref().map(|e| e.locked_liquidity),
        };
        self.ledger.classify(entry, class)?;
        Ok(())
    }

    fn persist_discovery(&self, record: &PairRecord) -> Result<(), StoreError> {
        self.daily_log().append(record)?;
        match self.master.upsert(record) {
            Err(StoreError::NotFound(_)) => self.master.append(record),
            other => other,
        }
    }

    fn daily_log(&self) -> CsvStore {
        let name = format!("{}_new_pairs.csv", Utc::now().format("%d-%m-%Y"));
        CsvStore::new(self.data_dir.join(name))
    }

    /// Hand the navigation context and ledger back for shutdown.
    pub fn into_parts(self) -> (S, DedupLedger) {
        (self.source, self.ledger)
    }
}
