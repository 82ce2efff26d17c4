use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::Gateway;

/// One unwrapped collection page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_link: Option<String>,
}

// `value` is Option so an envelope that omits the key entirely can be told
// apart from `"value": []`; only the former violates the contract.
#[derive(Debug, Deserialize)]
struct RawPage<T> {
    value: Option<Vec<T>>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Strictly unwraps a collection envelope body.
///
/// An explicit empty `value` array is a valid, successful empty page; a body
/// that lacks the `value` key (or is not an envelope at all) is
/// [`Error::MalformedEnvelope`], never silently treated as empty.
pub(crate) fn unwrap_page<T: DeserializeOwned>(body: &str, endpoint: &str) -> Result<Page<T>> {
    let raw: RawPage<T> =
        serde_json::from_str(body).map_err(|e| Error::MalformedEnvelope {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;

    let Some(items) = raw.value else {
        return Err(Error::MalformedEnvelope {
            endpoint: endpoint.to_string(),
            detail: "missing 'value' property".to_string(),
        });
    };

    Ok(Page {
        items,
        next_link: raw.next_link,
    })
}

/// Lazily walks a paginated collection, one request per page.
///
/// Items are yielded in remote order; the next page request is only issued
/// once the buffered items are consumed and the budget allows more, so
/// stopping early never forces remaining pages to be fetched. The walk is
/// finite and non-restartable.
pub struct PageWalker<T> {
    gateway: Gateway,
    next_url: Option<String>,
    buffer: VecDeque<T>,
    remaining: Option<usize>,
}

impl<T: DeserializeOwned> PageWalker<T> {
    pub(crate) fn new(gateway: Gateway, first_url: String, max_items: Option<usize>) -> Self {
        Self {
            gateway,
            next_url: Some(first_url),
            buffer: VecDeque::new(),
            remaining: max_items,
        }
    }

    /// Yields the next item, fetching the next page only when needed.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            if let Some(item) = self.buffer.pop_front() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Ok(Some(item));
            }
            let Some(url) = self.next_url.take() else {
                return Ok(None);
            };
            let page = self.gateway.get_page::<T>(&url).await?;
            self.buffer.extend(page.items);
            self.next_url = page.next_link;
        }
    }

    /// Drains the walker into a vector, honoring the item budget.
    pub async fn collect_remaining(&mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.try_next().await? {
            items.push(item);
        }
        Ok(items)
    }
}
