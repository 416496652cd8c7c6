use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{Error, Result};
use crate::multipart::{FormDataFile, MultipartBuilder};
use crate::params::{self, Encoding, HttpMethod, Parameters};
use crate::session::SessionConfig;

/// HTTP request descriptor
///
/// Produced by [`RequestBuilder::build`] and immutable afterwards. The URL
/// already carries any query parameters and `body` holds the encoded bytes.
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpMethod,
    url: Url,
    encoding: Encoding,
    parameters: Option<Parameters>,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    session: SessionConfig,
    restrict_status_codes: BTreeSet<u16>,
}

impl Request {
    /// Start building a request
    pub fn builder(url: impl Into<String>, method: HttpMethod, encoding: Encoding) -> RequestBuilder {
        RequestBuilder::new(url, method, encoding)
    }

    /// Build a request in one call
    ///
    /// Headers are applied before the parameters are encoded, so a
    /// `Content-Type` given here is kept.
    pub fn new(
        url: impl Into<String>,
        method: HttpMethod,
        encoding: Encoding,
        parameters: Option<Parameters>,
        headers: Option<HeaderMap>,
    ) -> Result<Self> {
        let mut builder = RequestBuilder::new(url, method, encoding);
        if let Some(parameters) = parameters {
            builder = builder.parameters(parameters);
        }
        if let Some(headers) = headers {
            builder = builder.headers(headers);
        }
        builder.build()
    }

    /// Get the HTTP method
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Get the URL, including the encoded query
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Get the parameters the request was built from
    pub fn parameters(&self) -> Option<&Parameters> {
        self.parameters.as_ref()
    }

    /// Get the headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the encoded body
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Get the session limits
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Status codes the caller wants treated as failures
    pub fn restrict_status_codes(&self) -> &BTreeSet<u16> {
        &self.restrict_status_codes
    }

    /// Host key used for per-host connection limits
    pub(crate) fn host_key(&self) -> String {
        format!(
            "{}:{}",
            self.url.host_str().unwrap_or_default(),
            self.url.port_or_known_default().unwrap_or_default()
        )
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        if let Some(parameters) = &self.parameters {
            write!(f, " : {}", parameters)?;
        }
        if !self.headers.is_empty() {
            let headers: Vec<String> = self
                .headers
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
                .collect();
            write!(f, " : [{}]", headers.join(", "))?;
        }
        Ok(())
    }
}

/// Builder for [`Request`]
///
/// Header and form-data setters accumulate; parameters are encoded once in
/// [`build`](RequestBuilder::build).
#[derive(Debug)]
pub struct RequestBuilder {
    url: String,
    method: HttpMethod,
    encoding: Encoding,
    parameters: Option<Parameters>,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    multipart: MultipartBuilder,
    session: SessionConfig,
    restrict_status_codes: BTreeSet<u16>,
}

impl RequestBuilder {
    /// Create a new request builder
    pub fn new(url: impl Into<String>, method: HttpMethod, encoding: Encoding) -> Self {
        Self {
            url: url.into(),
            method,
            encoding,
            parameters: None,
            headers: HeaderMap::new(),
            body: None,
            multipart: MultipartBuilder::new(),
            session: SessionConfig::default(),
            restrict_status_codes: BTreeSet::new(),
        }
    }

    /// Get the HTTP method
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Set the parameters
    pub fn parameters(mut self, parameters: impl Into<Parameters>) -> Self {
        self.parameters = Some(parameters.into());
        self
    }

    /// Set a header, replacing any previous value
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name.parse::<HeaderName>()?;
        let value = value.parse::<HeaderValue>()?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set multiple headers, replacing earlier values of the same names
    ///
    /// Every value of a repeated header is kept.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Replace the encoded body with raw bytes
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a text part; requires [`Encoding::FormData`]
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.multipart.add_field(name, value);
        self
    }

    /// Append a file part; requires [`Encoding::FormData`]
    pub fn form_file(mut self, file: FormDataFile) -> Self {
        self.multipart.add_file(file);
        self
    }

    /// Set all session limits
    pub fn session_limits(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set both request and resource timeouts
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.session = self
            .session
            .timeout_for_request(timeout)
            .timeout_for_resource(timeout);
        self
    }

    /// Set the connection limit per host
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.session = self.session.max_connections_per_host(max);
        self
    }

    /// Treat these status codes as failures
    pub fn restrict_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.restrict_status_codes.extend(codes);
        self
    }

    /// Build the request
    pub fn build(self) -> Result<Request> {
        let mut url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_request(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if !self.multipart.is_empty() && self.encoding != Encoding::FormData {
            return Err(Error::invalid_request(
                "form fields and files require form-data encoding",
            ));
        }

        let mut headers = self.headers;
        let mut multipart = self.multipart;
        let mut body = None;

        if let Some(parameters) = &self.parameters {
            body = params::encode(
                parameters,
                self.method,
                self.encoding,
                &mut url,
                &mut headers,
                &mut multipart,
            )?
            .body;
        }

        if self.encoding == Encoding::FormData && (self.parameters.is_some() || !multipart.is_empty()) {
            params::set_default_content_type(&mut headers, &multipart.content_type())?;
            body = Some(multipart.build());
        }

        if let Some(raw) = self.body {
            body = Some(raw);
        }

        Ok(Request {
            method: self.method,
            url,
            encoding: self.encoding,
            parameters: self.parameters,
            headers,
            body,
            session: self.session,
            restrict_status_codes: self.restrict_status_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use serde_json::json;

    #[test]
    fn test_request_creation() {
        let request = Request::new("https://httpbin.org/get", HttpMethod::Get, Encoding::Url, None, None).unwrap();
        assert_eq!(request.method(), HttpMethod::Get);
        assert_eq!(request.url().as_str(), "https://httpbin.org/get");
        assert!(request.body().is_none());
        assert!(request.headers().is_empty());
        assert_eq!(request.session(), &SessionConfig::default());
    }

    #[test]
    fn test_invalid_url_fails() {
        let result = Request::builder("not a url", HttpMethod::Get, Encoding::Url).build();
        assert!(matches!(result, Err(Error::Url(_))));

        let result = Request::builder("ftp://example.com/x", HttpMethod::Get, Encoding::Url).build();
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_headers_keep_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/html"));

        let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
            .header("accept", "text/plain")
            .unwrap()
            .header("x-trace", "abc")
            .unwrap()
            .headers(headers)
            .build()
            .unwrap();

        let accept: Vec<&str> = request
            .headers()
            .get_all("accept")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(accept, vec!["application/json", "text/html"]);
        assert_eq!(request.headers().get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_get_with_parameters() {
        let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
            .parameters(vec![("b", json!(true)), ("a", json!("x y"))])
            .build()
            .unwrap();

        assert_eq!(request.url().query(), Some("a=x%20y&b=1"));
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        let request = Request::new(
            "https://httpbin.org/post",
            HttpMethod::Post,
            Encoding::Json,
            Some(vec![("a", json!(1))].into()),
            Some(headers),
        )
        .unwrap();

        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/vnd.api+json"
        );
    }

    #[test]
    fn test_form_data_request() {
        let request = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::FormData)
            .parameters(vec![("name", json!("roger"))])
            .form_field("city", "Manila")
            .form_file(FormDataFile::new("doc", b"hello".to_vec(), "a.txt", "text/plain"))
            .build()
            .unwrap();

        let content_type = request.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = String::from_utf8(request.body().unwrap().to_vec()).unwrap();
        assert!(body.contains("name=\"name\"\r\n\r\nroger"));
        assert!(body.contains("name=\"city\"\r\n\r\nManila"));
        assert!(body.contains("filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello"));
        assert!(body.ends_with(&format!("\r\n--{}--\r\n", boundary)));
    }

    #[test]
    fn test_form_fields_need_form_data_encoding() {
        let result = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::Json)
            .form_field("a", "b")
            .build();
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_raw_body_overrides_encoding() {
        let request = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::Url)
            .parameters(vec![("a", json!(1))])
            .body(b"raw".to_vec())
            .build()
            .unwrap();
        assert_eq!(request.body(), Some(&b"raw"[..]));
    }

    #[test]
    fn test_session_and_restrictions() {
        let request = Request::builder("http://localhost:8080/x", HttpMethod::Delete, Encoding::Url)
            .timeout(Duration::from_secs(5))
            .max_connections_per_host(3)
            .restrict_status_codes([404, 410])
            .build()
            .unwrap();

        assert_eq!(request.session().timeout_for_request, Duration::from_secs(5));
        assert_eq!(request.session().max_connections_per_host, 3);
        assert!(request.restrict_status_codes().contains(&410));
        assert_eq!(request.host_key(), "localhost:8080");
    }

    #[test]
    fn test_invalid_header() {
        let result = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
            .header("bad header", "x");
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_display() {
        let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
            .header("Accept", "application/json")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.to_string(),
            "GET https://httpbin.org/get : [accept: application/json]"
        );
    }
}
