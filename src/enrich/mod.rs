use std::time::Duration;

use crate::model::{Enrichment, Item};
use crate::scanner::age::{age_minutes, is_fresh, UnitPolicy};
use crate::source::PageSource;

/// Result of one enrichment pass over a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichOutcome {
    Enriched(Enrichment),
    /// Aged past the window between poll and enrichment; the base record is
    /// still persisted, enrichment is skipped.
    Stale,
    /// All attempts exhausted. Recorded, never silently dropped.
    Failed,
}

/// Performs the secondary detail-page lookup under a bounded-retry policy.
pub struct EnrichmentWorker {
    max_retries: u32,
    retry_delay: Duration,
    freshness_minutes: f64,
    unit_policy: UnitPolicy,
}

impl EnrichmentWorker {
    pub fn new(
        max_retries: u32,
        retry_delay: Duration,
        freshness_minutes: f64,
        unit_policy: UnitPolicy,
    ) -> Self {
        Self {
            max_retries,
            retry_delay,
            freshness_minutes,
            unit_policy,
        }
    }

    /// Open the item's detail view, attempt extraction, and restore the
    /// listing baseline on every exit path.
    pub async fn enrich<S: PageSource>(&self, source: &mut S, item: &Item) -> EnrichOutcome {
        if let Err(e) = source.open_detail(&item.identifier).await {
            tracing::warn!("could not open detail view for {}: {}", item.identifier, e);
            return EnrichOutcome::Failed;
        }

        let outcome = self.enrich_on_detail(source, item).await;

        if let Err(e) = source.close_detail().await {
            tracing::warn!(
                "failed to restore listing view after {}: {}",
                item.identifier,
                e
            );
        }
        outcome
    }

    async fn enrich_on_detail<S: PageSource>(&self, source: &mut S, item: &Item) -> EnrichOutcome {
        // The listing snapshot may be stale by the time enrichment runs;
        // trust the detail page's own age over the polled one.
        match source.detail_age_text().await {
            Ok(age_text) => match age_minutes(&age_text, self.unit_policy) {
                Some(age) if is_fresh(age, self.freshness_minutes) => {}
                Some(age) => {
                    tracing::info!(
                        "{} aged out before enrichment ({:.1}m > {:.1}m)",
                        item.identifier,
                        age,
                        self.freshness_minutes
                    );
                    return EnrichOutcome::Stale;
                }
                None => {
                    tracing::warn!(
                        "{} reports unparseable age {:?}, treating as stale",
                        item.identifier,
                        age_text
                    );
                    return EnrichOutcome::Stale;
                }
            },
            Err(e) => {
                tracing::warn!("detail view for {} never settled: {}", item.identifier, e);
                return EnrichOutcome::Failed;
            }
        }

        for attempt in 1..=self.max_retries {
            match source.extract_contract_address().await {
                Ok(Some(address)) if validate_contract_address(&address) => {
                    let locked_liquidity = match source.detail_locked_liquidity().await {
                        Ok(locked) => locked,
                        Err(e) => {
                            tracing::warn!(
                                "locked-liquidity check failed for {}: {}",
                                item.identifier,
                                e
                            );
                            false
                        }
                    };
                    return EnrichOutcome::Enriched(Enrichment {
                        contract_address: address,
                        locked_liquidity,
                    });
                }
                Ok(Some(address)) => {
                    tracing::warn!(
                        "attempt {}/{}: extracted value {:?} failed validation",
                        attempt,
                        self.max_retries,
                        address
                    );
                }
                Ok(None) => {
                    tracing::warn!(
                        "attempt {}/{}: no contract address on {}",
                        attempt,
                        self.max_retries,
                        item.identifier
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "attempt {}/{}: extraction failed for {}: {}",
                        attempt,
                        self.max_retries,
                        item.identifier,
                        e
                    );
                }
            }

            if attempt < self.max_retries {
                // Let the external source settle before the next attempt.
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        EnrichOutcome::Failed
    }
}

/// Sanity check that an extracted value is a plausible contract address and
/// not a UI artifact: non-empty, alphanumeric, mixed-case.
pub fn validate_contract_address(address: &str) -> bool {
    !address.is_empty()
        && address.chars().all(|c| c.is_ascii_alphanumeric())
        && address.chars().any(|c| c.is_ascii_lowercase())
        && address.chars().any(|c| c.is_ascii_uppercase())
}
