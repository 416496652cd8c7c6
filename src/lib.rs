//! rmhttp - a small JSON-over-HTTP request dispatcher
//!
//! rmhttp builds HTTP requests from a method, a URL, parameters and an
//! encoding, sends them through a pluggable transport, and delivers each
//! outcome as a typed result: a JSON object, a JSON array, text, or a
//! serde model.
//!
//! ## Features
//!
//! - **Three parameter encodings**: URL query/form, JSON body, multipart form data
//! - **Typed results** classified against the shape the caller expects
//! - **One error type** for transport, status-code and parsing failures
//! - **Cancellation** by request id, with exactly one outcome per request
//! - **Per-request session limits** for timeouts and connections per host
//!
//! ## Quick Start
//!
//! ```no_run
//! use rmhttp::{Dispatcher, Encoding, HttpMethod, Request, Shape, TypedResult};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new()?;
//!     let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
//!         .parameters(vec![("page", 1)])
//!         .build()?;
//!
//!     let result: Option<TypedResult> = dispatcher.fetch(request, Shape::Object).await;
//!     if let Some(Ok(payload)) = result {
//!         println!("{:?}", payload.as_object());
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod dispatcher;
pub mod error;
pub mod multipart;
pub mod params;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use classify::{classify, Payload, Shape, TypedResult};
pub use dispatcher::{
    DispatchObserver, Dispatcher, DispatcherBuilder, RequestHandle, RequestId, StatusPolicy,
};
pub use error::{Error, ErrorInfo, ErrorKind, Result};
pub use multipart::{FormDataFile, MultipartBuilder};
pub use params::{Encoding, HttpMethod, Parameters};
pub use request::{Request, RequestBuilder};
pub use response::{Response, Timeline};
pub use session::SessionConfig;
pub use transport::{HttpTransport, Transport, TransportResponse};

// Re-export common HTTP types
pub use http::{HeaderMap, HeaderValue};

// Re-export JSON types
pub use serde_json::{Map as JsonMap, Value as JsonValue};

// Re-export URL types
pub use url::Url;

// Re-export common traits
pub use async_trait::async_trait;
