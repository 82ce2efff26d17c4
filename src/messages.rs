use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::folders::FolderRef;
use crate::gateway::{Gateway, PageWalker};

const MESSAGE_PAGE_SIZE: usize = 50;

const MESSAGE_SELECT_FIELDS: &str =
    "id,subject,from,toRecipients,receivedDateTime,isRead,hasAttachments,bodyPreview,webLink";

/// A message listing entry. Beyond `id`, fields are passed through from the
/// remote API unvalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub subject: Option<String>,
    pub from: Option<Recipient>,
    #[serde(rename = "toRecipients")]
    pub to_recipients: Option<Vec<Recipient>>,
    #[serde(rename = "receivedDateTime")]
    pub received_date_time: Option<String>,
    #[serde(rename = "isRead")]
    pub is_read: Option<bool>,
    #[serde(rename = "hasAttachments")]
    pub has_attachments: Option<bool>,
    #[serde(rename = "bodyPreview")]
    pub body_preview: Option<String>,
    #[serde(rename = "webLink")]
    pub web_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "emailAddress")]
    pub email_address: Option<EmailAddress>,
}

impl Recipient {
    pub fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Lists messages within a resolved folder, following pagination lazily.
pub struct MessageService {
    gateway: Gateway,
}

impl MessageService {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Lazy walk over the folder's messages in remote order. The walker
    /// issues one request per page and stops fetching as soon as `max_items`
    /// is satisfied or the collection is exhausted.
    pub fn stream(
        &self,
        folder: &FolderRef,
        max_items: Option<usize>,
    ) -> Result<PageWalker<MessageSummary>> {
        let first_url = self.first_page_url(folder, max_items)?;
        Ok(PageWalker::new(self.gateway.clone(), first_url, max_items))
    }

    /// Eagerly collects up to `max_items` messages (all of them when `None`).
    pub async fn list_messages(
        &self,
        folder: &FolderRef,
        max_items: Option<usize>,
    ) -> Result<Vec<MessageSummary>> {
        self.stream(folder, max_items)?.collect_remaining().await
    }

    fn first_page_url(&self, folder: &FolderRef, max_items: Option<usize>) -> Result<String> {
        let endpoint = self
            .gateway
            .api_url(&format!("/me/mailFolders/{}/messages", folder.id));
        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid message listing url {endpoint}: {e}")))?;

        // A budget below the page size caps the first page; no point asking
        // for items that will be discarded.
        let top = max_items
            .map(|limit| limit.clamp(1, MESSAGE_PAGE_SIZE))
            .unwrap_or(MESSAGE_PAGE_SIZE);
        url.query_pairs_mut()
            .append_pair("$top", &top.to_string())
            .append_pair("$select", MESSAGE_SELECT_FIELDS)
            .append_pair("$orderby", "receivedDateTime desc");
        Ok(url.to_string())
    }
}
