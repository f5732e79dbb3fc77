use anyhow::Result;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub scan: ScanConfig,
    pub enrich: EnrichConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// Listing filter parameters. These shape the query string sent to the
/// listing page and are passed through opaquely.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub webdriver_url: String,
    pub base_url: String,
    pub chain_id: String,
    pub min_liquidity: u64,
    pub max_fdv: u64,
    pub max_age_hours: u32,
    pub min_5m_volume: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Maximum pair age (minutes) eligible for enrichment.
    pub freshness_minutes: f64,
    pub poll_interval_minutes: u64,
    pub refresh_interval_minutes: u64,
    pub refresh_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Reject age strings containing unrecognized duration units instead of
    /// counting them as zero minutes.
    pub strict_units: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl SourceConfig {
    /// Full listing URL, newest pairs first.
    pub fn listing_url(&self) -> String {
        format!(
            "{}?rankBy=pairAge&order=asc&chainIds={}&minLiq={}&maxFdv={}&maxAge={}&min5MVol={}",
            self.base_url,
            self.chain_id,
            self.min_liquidity,
            self.max_fdv,
            self.max_age_hours,
            self.min_5m_volume
        )
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            source: SourceConfig {
                webdriver_url: env::var("DEXWATCH_WEBDRIVER_URL")
                    .unwrap_or_else(|_| "http://localhost:9515".to_string()),
                base_url: env::var("DEXWATCH_BASE_URL")
                    .unwrap_or_else(|_| "https://dexscreener.com/".to_string()),
                chain_id: env::var("DEXWATCH_CHAIN_ID").unwrap_or_else(|_| "solana".to_string()),
                min_liquidity: env::var("DEXWATCH_MIN_LIQUIDITY")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .unwrap_or(10_000),
                max_fdv: env::var("DEXWATCH_MAX_FDV")
                    .unwrap_or_else(|_| "200000000".to_string())
                    .parse()
                    .unwrap_or(200_000_000),
                max_age_hours: env::var("DEXWATCH_MAX_AGE_HOURS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
                min_5m_volume: env::var("DEXWATCH_MIN_5M_VOL")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3_000),
            },
            scan: ScanConfig {
                freshness_minutes: env::var("DEXWATCH_FRESHNESS_MINUTES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5.0),
                poll_interval_minutes: env::var("DEXWATCH_POLL_INTERVAL_MINUTES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                refresh_interval_minutes: env::var("DEXWATCH_REFRESH_INTERVAL_MINUTES")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
                refresh_enabled: env::var("DEXWATCH_REFRESH_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .unwrap_or(true),
            },
            enrich: EnrichConfig {
                max_retries: env::var("DEXWATCH_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                retry_delay_secs: env::var("DEXWATCH_RETRY_DELAY_SECS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                strict_units: env::var("DEXWATCH_STRICT_UNITS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            storage: StorageConfig {
                data_dir: env::var("DEXWATCH_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            monitoring: MonitoringConfig {
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        })
    }
}
