use crate::model::RawItemFields;
use crate::source::{PageSource, SourceError};

/// Walks the listing view row by row and returns the current snapshot in
/// display order. Deduplication is the ledger's job, not the poller's.
pub struct ListingPoller;

impl ListingPoller {
    /// One poll pass. `Ok` with the rows seen so far when the source reports
    /// the end of the listing; `Err` when a fetch fails mid-pass, which
    /// aborts this cycle's poll (the next scheduled cycle starts over from
    /// position 1).
    pub async fn poll<S: PageSource>(source: &mut S) -> Result<Vec<RawItemFields>, SourceError> {
        source.open_listing().await?;

        let mut items = Vec::new();
        let mut index = 1;
        loop {
            match source.list_item(index).await? {
                Some(fields) => {
                    items.push(fields);
                    index += 1;
                }
                // Normal termination, not a failure.
                None => break,
            }
        }

        tracing::debug!("listing snapshot: {} rows", items.len());
        Ok(items)
    }
}
