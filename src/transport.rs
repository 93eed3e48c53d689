use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// HTTP methods the analytics service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Only POST and PATCH carry a JSON body.
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(s.to_string()),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A fully built request, ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct TransportFailure(pub String);

/// Send a request, get a status and a body back.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout_seconds: u64) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut builder = self.client.request(request.method.into(), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportFailure(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{HttpRequest, HttpResponse, HttpTransport, TransportFailure};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct FakeTransportState {
        responses: VecDeque<Result<HttpResponse, TransportFailure>>,
        requests: Vec<HttpRequest>,
    }

    /// Scripted transport for testing. Responses are handed out in order;
    /// once the script runs dry every call fails at the transport level.
    #[derive(Clone)]
    pub struct FakeTransport {
        inner: Arc<Mutex<FakeTransportState>>,
    }

    impl Default for FakeTransport {
        fn default() -> Self {
            Self {
                inner: Arc::new(Mutex::new(FakeTransportState {
                    responses: VecDeque::new(),
                    requests: Vec::new(),
                })),
            }
        }
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, status: u16, body: &str) -> &Self {
            self.inner
                .lock()
                .responses
                .push_back(Ok(HttpResponse::new(status, body)));
            self
        }

        pub fn respond_json(&self, status: u16, body: &serde_json::Value) -> &Self {
            self.respond(status, &body.to_string())
        }

        pub fn fail(&self, message: &str) -> &Self {
            self.inner
                .lock()
                .responses
                .push_back(Err(TransportFailure(message.to_string())));
            self
        }

        /// Every request sent so far
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.inner.lock().requests.clone()
        }

        pub fn request_count(&self) -> usize {
            self.inner.lock().requests.len()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
            let mut state = self.inner.lock();
            state.requests.push(request);
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure("no scripted response".to_string())))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTransport;
