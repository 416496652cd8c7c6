use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use http::HeaderMap;
use reqwest::Client as ReqwestClient;
use url::Url;

use crate::error::{Error, Result};
use crate::request::Request;

/// Body chunks in arrival order; the stream ends when the transfer completes
pub type BodyStream = BoxStream<'static, Result<Vec<u8>>>;

/// What the transport reports once response headers arrive
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Final URL, after redirects
    pub url: Url,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .finish()
    }
}

/// Transport trait for HTTP exchanges
///
/// This is the seam over the underlying URL loader. An implementation sends
/// the request, resolves once headers are in, and then yields the body as a
/// stream. Errors before headers resolve `issue` with `Err`; errors after
/// surface as an `Err` item in the body stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response headers
    async fn issue(&self, request: &Request) -> Result<TransportResponse>;

    /// Get the transport name
    fn name(&self) -> &str;
}

/// Default transport implementation using reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
}

impl HttpTransport {
    /// Create a new HTTP transport with a default reqwest client
    pub fn new() -> Result<Self> {
        let client = ReqwestClient::builder().build()?;
        Ok(Self { client })
    }

    /// Create a transport around an existing reqwest client
    pub fn with_client(client: ReqwestClient) -> Self {
        Self { client }
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &ReqwestClient {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(&self, request: &Request) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(request.method().into(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(Error::Network)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::Network))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            url,
            body,
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}
