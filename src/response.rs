use std::fmt;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue};
use url::Url;

/// Timing of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// When the request was handed to the transport
    pub request_start: Instant,
    /// When the status line and headers arrived
    pub headers_received: Instant,
    /// When the exchange completed
    pub completed: Instant,
}

impl Timeline {
    /// Create a timeline with every point set to `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            request_start: start,
            headers_received: start,
            completed: start,
        }
    }

    /// Total time from request start to completion
    pub fn latency(&self) -> Duration {
        self.completed.saturating_duration_since(self.request_start)
    }

    /// Time from request start until headers arrived
    pub fn time_to_headers(&self) -> Duration {
        self.headers_received.saturating_duration_since(self.request_start)
    }
}

/// HTTP response descriptor
///
/// Created when headers arrive and finalized once the body is complete.
/// `body` is `None` when no bytes were received.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    url: Url,
    body: Option<Vec<u8>>,
    timeline: Timeline,
}

impl Response {
    /// Create a response from its parts
    pub fn new(status: u16, headers: HeaderMap, url: Url, body: Option<Vec<u8>>, timeline: Timeline) -> Self {
        Self {
            status,
            headers,
            url,
            body: body.filter(|b| !b.is_empty()),
            timeline,
        }
    }

    /// Create a response builder
    pub fn builder(status: u16) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// Get the HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get the response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Get the content type
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
    }

    /// Get the URL that produced this response, after redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the raw body
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Check if the response is successful (2xx status code)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the status is one that carries no content (204, 205)
    pub fn is_no_content(&self) -> bool {
        matches!(self.status, 204 | 205)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} : {} bytes : {:?}",
            self.status,
            self.url,
            self.body.as_ref().map_or(0, Vec::len),
            self.timeline.latency()
        )
    }
}

/// Builder for creating responses by hand, mostly for tests and custom transports
#[derive(Debug)]
pub struct ResponseBuilder {
    status: u16,
    headers: HeaderMap,
    url: Option<Url>,
    body: Option<Vec<u8>>,
    timeline: Option<Timeline>,
}

impl ResponseBuilder {
    /// Create a new response builder
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: None,
            body: None,
            timeline: None,
        }
    }

    /// Set the headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the URL
    pub fn url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the timeline
    pub fn timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Build the response; the URL is required
    pub fn build(self) -> crate::Result<Response> {
        let url = self
            .url
            .ok_or_else(|| crate::Error::invalid_request("response URL is required"))?;
        let timeline = self.timeline.unwrap_or_else(|| Timeline::starting_at(Instant::now()));
        Ok(Response::new(self.status, self.headers, url, self.body, timeline))
    }
}
