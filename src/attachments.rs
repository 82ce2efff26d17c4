use bytes::Bytes;
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gateway::{Gateway, PageWalker};

const ATTACHMENT_PAGE_SIZE: usize = 50;

const ATTACHMENT_SELECT_FIELDS: &str = "id,name,contentType,size,isInline";

/// Attachment listing entry. Opaque to the core beyond the identifier,
/// content type and size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "isInline")]
    pub is_inline: Option<bool>,
}

/// Lists attachment metadata for a message and downloads attachment content.
pub struct AttachmentService {
    gateway: Gateway,
}

impl AttachmentService {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Lazy walk over the message's attachments; same pagination contract as
    /// message listing.
    pub fn stream(&self, message_id: &str) -> Result<PageWalker<AttachmentMetadata>> {
        let first_url = self.first_page_url(message_id)?;
        Ok(PageWalker::new(self.gateway.clone(), first_url, None))
    }

    pub async fn list_attachments(&self, message_id: &str) -> Result<Vec<AttachmentMetadata>> {
        self.stream(message_id)?.collect_remaining().await
    }

    /// Downloads one attachment's raw content as a chunked byte stream; the
    /// body is never buffered whole here. A remote 404 is
    /// [`Error::AttachmentNotFound`], not a generic remote error.
    pub async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentDownload> {
        let url = self.gateway.api_url(&format!(
            "/me/messages/{message_id}/attachments/{attachment_id}/$value"
        ));
        match self.gateway.download(&url).await {
            Ok(response) => Ok(AttachmentDownload::new(response)),
            Err(Error::RemoteApi { status: 404, .. }) => Err(Error::AttachmentNotFound {
                message_id: message_id.to_string(),
                attachment_id: attachment_id.to_string(),
            }),
            Err(other) => Err(other),
        }
    }

    fn first_page_url(&self, message_id: &str) -> Result<String> {
        let endpoint = self
            .gateway
            .api_url(&format!("/me/messages/{message_id}/attachments"));
        let mut url = Url::parse(&endpoint).map_err(|e| {
            Error::Config(format!("invalid attachment listing url {endpoint}: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("$top", &ATTACHMENT_PAGE_SIZE.to_string())
            .append_pair("$select", ATTACHMENT_SELECT_FIELDS);
        Ok(url.to_string())
    }
}

/// An in-flight attachment download: content type plus a chunked body.
#[derive(Debug)]
pub struct AttachmentDownload {
    content_type: Option<String>,
    content_length: Option<u64>,
    response: Response,
}

impl AttachmentDownload {
    fn new(response: Response) -> Self {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        Self {
            content_type,
            content_length,
            response,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next chunk of the body, or `None` once the stream is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    /// Convenience for small payloads; buffers the remaining body.
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn attachment_metadata_deserializes_graph_shape() {
        let payload = json!({
            "id": "att-1",
            "name": "report.pdf",
            "contentType": "application/pdf",
            "size": 48211,
            "isInline": false,
            "@odata.type": "#microsoft.graph.fileAttachment"
        });
        let attachment: AttachmentMetadata =
            serde_json::from_value(payload).expect("decode attachment metadata");
        assert_eq!(attachment.id, "att-1");
        assert_eq!(attachment.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(attachment.size, Some(48211));
    }

    #[test]
    fn minimal_attachment_still_deserializes() {
        let attachment: AttachmentMetadata =
            serde_json::from_value(json!({ "id": "bare" })).expect("decode minimal attachment");
        assert_eq!(attachment.id, "bare");
        assert!(attachment.name.is_none());
    }
}
