use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw field values read from one listing row. Opaque passthrough data; the
/// pipeline never interprets prices or volumes, only `href` and `age`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItemFields {
    pub href: String,
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
}

/// Secondary attributes fetched from the pair detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub contract_address: String,
    pub locked_liquidity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Discovered,
    Fresh,
    Enriching,
    Enriched,
    EnrichmentFailed,
}

/// One discovered pair. `identifier` is the canonical detail-page URL and the
/// sole deduplication key.
#[derive(Debug, Clone)]
pub struct Item {
    pub identifier: String,
    pub discovered_at: DateTime<Utc>,
    pub raw_age: String,
    pub age_minutes: Option<f64>,
    pub fields: RawItemFields,
    pub enrichment: Option<Enrichment>,
    pub status: ItemStatus,
}

impl Item {
    pub fn from_fields(fields: RawItemFields, age_minutes: Option<f64>) -> Self {
        Self {
            identifier: fields.href.trim_end_matches('/').to_string(),
            discovered_at: Utc::now(),
            raw_age: fields.age.clone(),
            age_minutes,
            fields,
            enrichment: None,
            status: ItemStatus::Discovered,
        }
    }

    /// Observation timestamp in the persisted-record format.
    pub fn timestamp(&self) -> String {
        self.discovered_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
