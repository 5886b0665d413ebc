//! HTTP implementations of the engine's collaborator traits.
//!
//! Both APIs speak JSON with camelCase keys and authenticate with an optional
//! bearer token. Transport failures and unexpected statuses are mapped onto
//! [`ExternalError`] so the engine can classify them per item.

mod ledger;
mod members;

pub use ledger::HttpLedger;
pub use members::HttpMemberDirectory;

use ledgerbridge_engine::ExternalError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest error body quoted in a `Rejected` message.
const MAX_ERROR_BODY: usize = 200;

/// Errors building an API client at startup.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid API base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// A reqwest client bound to one API base URL.
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    pub(crate) fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base })
    }

    /// Base URL extended by percent-encoded path segments.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, ExternalError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ExternalError::Unavailable("invalid base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.client.get(url)
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send a request and reject non-success statuses.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, ExternalError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let path = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &path, &body))
    }

    /// Send a request and decode its JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ExternalError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        ExternalError::Timeout
    } else if err.is_decode() {
        ExternalError::Decode(err.to_string())
    } else {
        ExternalError::Unavailable(err.to_string())
    }
}

fn status_error(status: StatusCode, path: &str, body: &str) -> ExternalError {
    match status {
        StatusCode::NOT_FOUND => ExternalError::NotFound(path.to_string()),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ExternalError::Unavailable(format!("{path} returned {status}"))
        }
        _ => ExternalError::Rejected {
            status: status.as_u16(),
            message: body.chars().take(MAX_ERROR_BODY).collect(),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_segments_are_encoded() {
        let api = ApiClient::new("http://ledger.local/api/", None, Duration::from_secs(1)).unwrap();
        let url = api.url(&["accounts", "a/b c", "transactions"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://ledger.local/api/accounts/a%2Fb%20c/transactions"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            ApiClient::new("not a url", None, Duration::from_secs(1)),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ApiClient::new("http://ledger.local", Some("bad\ntoken"), Duration::from_secs(1)),
            Err(ClientError::InvalidToken)
        ));
    }

    #[test]
    fn statuses_map_to_external_errors() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "/accounts/x", ""),
            ExternalError::NotFound("/accounts/x".into())
        );
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "/health", ""),
            ExternalError::Unavailable(_)
        ));
        assert_eq!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "/x", "limit exceeded"),
            ExternalError::Rejected {
                status: 422,
                message: "limit exceeded".into()
            }
        );
    }
}
