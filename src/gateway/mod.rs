use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::auth::Authenticator;
use crate::config::GraphConfig;
use crate::error::{translate_remote_error, Error, Result};

pub mod envelope;

pub use envelope::{Page, PageWalker};

/// Builds the shared HTTP client with the configured timeout.
pub fn http_client(config: &GraphConfig) -> Result<Client> {
    Ok(Client::builder().timeout(config.http_timeout).build()?)
}

/// The single chokepoint for authenticated calls to the remote mail API.
///
/// Attaches a bearer token from the [`Authenticator`] to every request. When
/// the remote API rejects the token mid-call (clock skew, out-of-band
/// revocation — distinct from the proactive expiry check in the
/// authenticator) it performs exactly one transparent re-authentication and
/// retry; a second failure on the same call is surfaced, never retried again.
#[derive(Clone)]
pub struct Gateway {
    http: Client,
    auth: Arc<Authenticator>,
    base: String,
}

impl Gateway {
    pub fn new(config: &GraphConfig, http: Client, auth: Arc<Authenticator>) -> Self {
        Self {
            http,
            auth,
            base: config.graph_base.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for a path under the mail API base.
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Fetches one collection page, strictly unwrapping the envelope.
    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>> {
        let body = self.get_text(url).await?;
        envelope::unwrap_page(&body, url)
    }

    /// Fetches and decodes a single (non-collection) resource.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|source| Error::Decode {
            endpoint: url.to_string(),
            source,
        })
    }

    /// Issues a GET whose body is consumed incrementally by the caller.
    /// Non-2xx responses are translated before the response is handed over.
    pub(crate) async fn download(&self, url: &str) -> Result<Response> {
        let response = self.send_with_reauth(url).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(translate_remote_error(status, &body));
        }
        Ok(response)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send_with_reauth(url).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(translate_remote_error(status, &body));
        }
        Ok(body)
    }

    async fn send_with_reauth(&self, url: &str) -> Result<Response> {
        let session = self.auth.get_valid_session().await?;
        let response = self.get_request(url, &session.access_token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // The token passed the proactive expiry check but the API rejected
        // it anyway. One bounded retry with a forced refresh.
        warn!("bearer token rejected mid-call, re-authenticating once: {url}");
        let fresh = self
            .auth
            .refresh_after_rejection(&session.access_token)
            .await?;
        Ok(self.get_request(url, &fresh.access_token).send().await?)
    }

    fn get_request(&self, url: &str, access_token: &str) -> RequestBuilder {
        self.http
            .get(url)
            .bearer_auth(access_token)
            .header("accept", "application/json")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Client;

    use super::*;

    fn test_gateway() -> Gateway {
        let config = GraphConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            tenant_id: "tenant".into(),
            redirect_uri: "http://localhost/callback".into(),
            scopes: vec!["Mail.Read".into()],
            authority_base: "https://login.example.test".into(),
            graph_base: "https://graph.example.test/v1.0/".into(),
            http_timeout: Duration::from_secs(5),
        };
        let http = Client::new();
        let auth = Arc::new(Authenticator::new(Arc::new(config.clone()), http.clone()));
        Gateway::new(&config, http, auth)
    }

    #[test]
    fn api_url_joins_base_and_path() {
        let gateway = test_gateway();
        assert_eq!(
            gateway.api_url("/me/mailFolders"),
            "https://graph.example.test/v1.0/me/mailFolders"
        );
    }
}
