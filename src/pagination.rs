//! Fetch-all helpers for the two listing styles the Service uses.
//!
//! Both take the single-page fetch as a closure so the termination rules
//! can be exercised without a transport.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One page of a cursor-driven listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationPage<T> {
    /// Cursor for the next page; absent or empty on the last one.
    #[serde(default)]
    pub continuation_token: Option<String>,
    #[serde(default = "Vec::new")]
    pub invoices: Vec<T>,
}

impl<T> ContinuationPage<T> {
    fn next_cursor(&self) -> Option<&str> {
        self.continuation_token.as_deref().filter(|token| !token.is_empty())
    }
}

/// Follow cursors until a page comes back without one.
///
/// `fetch` receives `None` for the first page and the previous page's
/// cursor afterwards.
pub fn collect_continuation<T, F>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<&str>) -> Result<ContinuationPage<T>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let page = fetch(cursor.as_deref())?;
        pages += 1;
        let next = page.next_cursor().map(str::to_string);
        items.extend(page.invoices);

        match next {
            Some(token) => cursor = Some(token),
            None => break,
        }
    }

    tracing::debug!(pages, items = items.len(), "continuation listing complete");
    Ok(items)
}

/// One page of an offset-driven query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetPage<T> {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default = "Vec::new")]
    pub invoices: Vec<T>,
}

/// Walk page offsets from `first_offset` until `hasMore` is false.
///
/// A truncated page aborts the whole walk with [`Error::TruncatedResult`];
/// nothing gathered so far is returned.
pub fn collect_offset<T, F>(first_offset: i32, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(i32) -> Result<OffsetPage<T>>,
{
    let mut items = Vec::new();
    let mut offset = first_offset;

    loop {
        let page = fetch(offset)?;
        if page.is_truncated {
            tracing::warn!(offset, "query result truncated by the Service");
            return Err(Error::TruncatedResult);
        }
        items.extend(page.invoices);
        if !page.has_more {
            break;
        }
        offset += 1;
    }

    Ok(items)
}
