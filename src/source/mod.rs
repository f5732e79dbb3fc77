use async_trait::async_trait;
use thiserror::Error;

use crate::model::RawItemFields;

pub mod webdriver;

pub use webdriver::WebDriverSource;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Lookup timed out or an expected element was absent. Retryable.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("webdriver request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webdriver protocol error: {0}")]
    Protocol(String),
    #[error("no active webdriver session")]
    NoSession,
}

/// The rendered listing page and its pair detail views.
///
/// The navigation context behind a source is a single mutable resource: one
/// listing view, at most one detail view open at a time. Callers that open a
/// detail view must close it again before polling the listing, whatever the
/// outcome in between.
#[async_trait]
pub trait PageSource: Send {
    /// Navigate to (or reload) the filtered listing view.
    async fn open_listing(&mut self) -> Result<(), SourceError>;

    /// Field values for the listing row at 1-based `index`, or `None` once
    /// `index` is past the end of the listing.
    async fn list_item(&mut self, index: usize) -> Result<Option<RawItemFields>, SourceError>;

    /// Open the detail view for `identifier` in a fresh window.
    async fn open_detail(&mut self, identifier: &str) -> Result<(), SourceError>;

    /// Source-reported age string on the currently open detail view.
    async fn detail_age_text(&mut self) -> Result<String, SourceError>;

    /// One attempt at pulling the contract address off the open detail view.
    async fn extract_contract_address(&mut self) -> Result<Option<String>, SourceError>;

    /// Whether the open detail view shows the locked-liquidity marker.
    async fn detail_locked_liquidity(&mut self) -> Result<bool, SourceError>;

    /// Current mutable metrics from the open detail view (refresh path).
    async fn detail_metrics(&mut self) -> Result<RawItemFields, SourceError>;

    /// Close the detail view and restore the listing as the active window.
    async fn close_detail(&mut self) -> Result<(), SourceError>;
}
