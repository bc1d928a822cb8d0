//! Accumulation of ad records across listing pages.

use serde::Serialize;
use serde_json::Value;

use crate::error::ScrapeError;
use crate::locate::PRERENDERED_STATE_MARKER;

/// What one page contributed to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageYield {
    pub added: usize,
    /// Page count the site reports for the listing, when present.
    pub total_pages: Option<u32>,
}

/// Ads in page order, then in-page order. Never deduplicated.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct AdCollection {
    ads: Vec<Value>,
}

impl AdCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the ads found at `__PRERENDERED_STATE__.listing.listing.ads`.
    ///
    /// Missing keys below the top level contribute nothing. A state without
    /// the top-level key is not a listing page at all and is rejected.
    pub fn extend_from_state(&mut self, state: &Value) -> Result<PageYield, ScrapeError> {
        let root = state
            .get(PRERENDERED_STATE_MARKER)
            .ok_or(ScrapeError::UnexpectedStateShape {
                key: PRERENDERED_STATE_MARKER,
            })?;
        let listing = root.get("listing").and_then(|l| l.get("listing"));

        let ads = listing
            .and_then(|l| l.get("ads"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let total_pages = listing
            .and_then(|l| l.get("totalPages"))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());

        self.ads.extend(ads.iter().cloned());
        Ok(PageYield {
            added: ads.len(),
            total_pages,
        })
    }

    pub fn len(&self) -> usize {
        self.ads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ads.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.ads
    }
}
