//! Authenticated request dispatch and failure classification.
//!
//! Every call yields exactly one [`RequestOutcome`]: a body (or `None` for an
//! empty acknowledgement) or a [`RequestError`]. Nothing is retried here;
//! one-shot callers get the failure back and decide what to do with it.

use crate::config::Credentials;
use crate::error::{ErrorDetails, RequestError, RequestOutcome};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use serde_json::Value;

pub struct Dispatcher<T: HttpTransport> {
    credentials: Credentials,
    transport: T,
}

impl<T: HttpTransport> Dispatcher<T> {
    pub fn new(credentials: Credentials, transport: T) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `method` to `path` and decode the JSON response.
    ///
    /// Missing credentials and unsupported methods fail before any network
    /// call is attempted.
    pub async fn dispatch(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> RequestOutcome {
        let request = self.prepare(method, path, body, query)?;
        let url = request.url.clone();
        let response = self.send(request).await?;

        if !response.is_success() {
            return Err(classify_http_error(&response, &url));
        }
        decode_success(response)
    }

    /// Like [`dispatch`](Self::dispatch) but hands back the raw body text of a
    /// successful response. Used for rendered documents.
    pub async fn dispatch_raw(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<String, RequestError> {
        let request = self.prepare(method, path, None, query)?;
        let url = request.url.clone();
        let response = self.send(request).await?;

        if !response.is_success() {
            return Err(classify_http_error(&response, &url));
        }
        Ok(response.body)
    }

    fn prepare(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<HttpRequest, RequestError> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let (api_key, base_url) = match (
            present(&self.credentials.api_key),
            present(&self.credentials.base_url),
        ) {
            (Some(key), Some(url)) => (key, url),
            _ => {
                return Err(RequestError::configuration(
                    "API key and base URL must be provided",
                ))
            }
        };

        let method: Method = method.parse().map_err(RequestError::UnsupportedMethod)?;

        Ok(HttpRequest {
            method,
            url: join_url(&base_url, path),
            headers: vec![
                ("Authorization".to_string(), format!("Token {}", api_key)),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: if method.sends_body() { body.cloned() } else { None },
        })
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");
        let method = request.method;
        let url = request.url.clone();

        match self.transport.send(request).await {
            Ok(response) => {
                tracing::debug!(%method, %url, status = response.status, "response received");
                Ok(response)
            }
            Err(failure) => {
                tracing::warn!(%method, %url, error = %failure, "transport failure");
                Err(RequestError::transport(failure.0))
            }
        }
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn classify_http_error(response: &HttpResponse, url: &str) -> RequestError {
    let reason = reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown Status");
    let kind = if response.status >= 500 {
        "Server Error"
    } else {
        "Client Error"
    };

    RequestError::Http {
        status_code: response.status,
        message: format!("{} {}: {} for url: {}", response.status, kind, reason, url),
        details: ErrorDetails::from_body(&response.body),
    }
}

fn decode_success(response: HttpResponse) -> RequestOutcome {
    if response.body.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&response.body)
        .map(Some)
        .map_err(|e| RequestError::decode(e.to_string(), response.body))
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
