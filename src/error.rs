use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

const REDACTED_BODY_MAX_LEN: usize = 200;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the mailbox browsing core.
///
/// Every failure crossing the library boundary is one of these variants; the
/// core never swallows an error into a degraded default value.
#[derive(Debug, Error)]
pub enum Error {
    /// The identity provider rejected the authorization code (expired,
    /// already used, mismatched redirect URI) or the token response was
    /// missing required fields. The caller must restart the flow.
    #[error("authorization code exchange failed: {reason}")]
    AuthExchange { reason: String },

    /// No usable refresh path: there is no session, no refresh token, or the
    /// refresh call itself failed. Not retried locally; the caller must
    /// restart the authorization-code flow.
    #[error("session expired: {reason}")]
    SessionExpired { reason: String },

    /// Any non-2xx from the remote mail API not otherwise classified.
    #[error("remote api error (status {status}, code {code}): {message}")]
    RemoteApi {
        status: u16,
        code: String,
        message: String,
    },

    /// A response that claims to be a collection but lacks its `value` key.
    /// Never silently treated as empty.
    #[error("malformed collection envelope from {endpoint}: {detail}")]
    MalformedEnvelope { endpoint: String, detail: String },

    /// Folder traversal exhausted the entire tree without an exact match.
    #[error("folder not found: '{name}'")]
    FolderNotFound { name: String },

    /// The remote API reported 404 for an attachment download.
    #[error("attachment '{attachment_id}' not found on message '{message_id}'")]
    AttachmentNotFound {
        message_id: String,
        attachment_id: String,
    },

    /// A 2xx response body that could not be decoded into the expected shape.
    #[error("decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: serde_json::Error,
    },

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("session store: {0}")]
    Store(String),
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Translates a non-2xx remote API response into [`Error::RemoteApi`].
///
/// Graph failure bodies carry `{"error": {"code": ..., "message": ...}}`;
/// anything else is surfaced with a redacted copy of the raw body.
pub(crate) fn translate_remote_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<GraphErrorBody>(body) {
        Ok(parsed) => Error::RemoteApi {
            status: status.as_u16(),
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => Error::RemoteApi {
            status: status.as_u16(),
            code: String::new(),
            message: redact_response_body(body),
        },
    }
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        trimmed.to_string()
    } else {
        let cut = trimmed
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|idx| *idx <= REDACTED_BODY_MAX_LEN)
            .last()
            .unwrap_or(0);
        format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_body_maps_to_remote_api() {
        let body = r#"{"error":{"code":"ErrorItemNotFound","message":"The specified object was not found in the store."}}"#;
        let error = translate_remote_error(StatusCode::NOT_FOUND, body);
        match error {
            Error::RemoteApi {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "ErrorItemNotFound");
                assert!(message.contains("not found"));
            }
            other => panic!("expected RemoteApi, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_error_body_is_redacted_into_message() {
        let error = translate_remote_error(StatusCode::BAD_GATEWAY, "<html>gateway down</html>");
        match error {
            Error::RemoteApi {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 502);
                assert!(code.is_empty());
                assert!(message.contains("gateway down"));
            }
            other => panic!("expected RemoteApi, got {other:?}"),
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(5000);
        let redacted = redact_response_body(&body);
        assert!(redacted.len() < body.len());
        assert!(redacted.contains("truncated 5000 bytes"));
    }
}
