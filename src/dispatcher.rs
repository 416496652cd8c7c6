//! Request dispatch
//!
//! A [`Dispatcher`] hands each request to its [`Transport`] on a separate
//! task, while one serial callback queue owns the in-flight registry and
//! runs every completion. Cancellation and completion both go through that
//! queue, so whichever arrives first wins and the caller sees exactly one
//! outcome.

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{AbortHandle, Abortable};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{classify, Shape, TypedResult};
use crate::error::{Error, ErrorInfo, ErrorKind, Result};
use crate::params::HttpMethod;
use crate::request::Request;
use crate::response::{Response, Timeline};
use crate::session::HostLimiter;
use crate::transport::{HttpTransport, Transport};

/// Client error codes that always fail a request
pub const CLIENT_ERROR_CODES: [u16; 7] = [400, 401, 403, 404, 405, 408, 409];

/// Server error codes that always fail a request
pub const SERVER_ERROR_CODES: [u16; 7] = [500, 501, 502, 503, 504, 505, 511];

/// Identifier of a dispatched request
pub type RequestId = u64;

/// What the observer sees of a finished request
type Outcome = std::result::Result<Arc<Response>, ErrorInfo>;

/// Whether `status` fails the exchange, given the request's restricted codes
pub fn is_failure_status(status: u16, restricted: &BTreeSet<u16>) -> bool {
    CLIENT_ERROR_CODES.contains(&status)
        || SERVER_ERROR_CODES.contains(&status)
        || restricted.contains(&status)
}

/// What happens when a failing status code arrives with the headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Read the body to the end, then deliver the status-code error with it
    #[default]
    Complete,
    /// Stop the transfer as soon as the headers are in
    FailFast,
}

/// Lifecycle hooks, all called on the callback queue
///
/// `on_cancel` is the only notice a cancelled request produces.
pub trait DispatchObserver: Send + Sync {
    fn on_finish(&self, _id: RequestId, _response: &Response) {}

    fn on_fail(&self, _id: RequestId, _error: &ErrorInfo) {}

    fn on_cancel(&self, _id: RequestId) {}
}

/// Handle to one dispatched request
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    commands: mpsc::UnboundedSender<Command>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel the request; its completion will not run
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel { id: self.id });
    }
}

/// Sends requests and delivers typed results through one callback queue
///
/// Cloning is cheap and clones share the registry.
///
/// # Examples
///
/// ```no_run
/// use rmhttp::{Dispatcher, Encoding, HttpMethod, Request, Shape, TypedResult};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dispatcher = Dispatcher::new()?;
///     let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url).build()?;
///     dispatcher.send(request, Shape::Object, |result: TypedResult| match result {
///         Ok(payload) => println!("{:?}", payload.as_object()),
///         Err(error) => eprintln!("{}", error),
///     });
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedSender<Command>,
    runtime: Handle,
    limiter: HostLimiter,
    next_id: AtomicU64,
    status_policy: StatusPolicy,
    verbose: bool,
}

impl Dispatcher {
    /// Create a dispatcher with the default reqwest transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new dispatcher builder
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Get the transport name
    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    pub fn status_policy(&self) -> StatusPolicy {
        self.inner.status_policy
    }

    /// Dispatch a request; `completion` runs once on the callback queue
    ///
    /// Use [`Shape::Model`] with a `Deserialize` type `M` to decode into a
    /// model. If the request is cancelled first, `completion` is dropped
    /// without running.
    pub fn send<M, F>(&self, request: Request, shape: Shape, completion: F) -> RequestHandle
    where
        M: DeserializeOwned + Send + 'static,
        F: FnOnce(TypedResult<M>) + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(request);
        let (abort, registration) = AbortHandle::new_pair();

        debug!(id, method = %request.method(), url = %request.url(), "request sent");
        if self.inner.verbose {
            debug!(id, request = %request, "request details");
        }

        // registered before the task exists, so its completion is always queued after
        self.inner.command(Command::Register {
            id,
            entry: InFlight {
                abort,
                method: request.method(),
                url: request.url().clone(),
                started: Instant::now(),
            },
        });

        let inner = self.inner.clone();
        let task = async move {
            let settled = AssertUnwindSafe(inner.settle::<M>(id, request.clone(), shape))
                .catch_unwind()
                .await;
            let (outcome, result) = settled.unwrap_or_else(|_| {
                warn!(id, "request task panicked");
                let error = ErrorInfo::new(ErrorKind::None, "request task panicked").with_request(request);
                (Err(error.clone()), Err(error))
            });
            inner.command(Command::Finished {
                id,
                outcome,
                deliver: Box::new(move || completion(result)),
            });
        };
        self.inner.runtime.spawn(Abortable::new(task, registration));

        RequestHandle {
            id,
            commands: self.inner.commands.clone(),
        }
    }

    /// Dispatch a request and wait for its result
    ///
    /// Returns `None` if the request was cancelled.
    pub async fn fetch<M>(&self, request: Request, shape: Shape) -> Option<TypedResult<M>>
    where
        M: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(request, shape, move |result: TypedResult<M>| {
            let _ = tx.send(result);
        });
        rx.await.ok()
    }

    /// Cancel one request by id
    pub fn cancel(&self, id: RequestId) {
        self.inner.command(Command::Cancel { id });
    }

    /// Cancel every in-flight request
    pub fn cancel_all(&self) {
        self.inner.command(Command::CancelAll);
    }

    /// Number of requests still registered, as seen by the callback queue
    pub async fn in_flight(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.inner.command(Command::Count { reply });
        rx.await.unwrap_or(0)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.inner.transport.name())
            .field("status_policy", &self.inner.status_policy)
            .field("verbose", &self.inner.verbose)
            .finish()
    }
}

impl Inner {
    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("callback queue has shut down");
        }
    }

    /// Run one exchange and classify it; the first half goes to the observer
    async fn settle<M>(&self, id: RequestId, request: Arc<Request>, shape: Shape) -> (Outcome, TypedResult<M>)
    where
        M: DeserializeOwned,
    {
        match self.exchange(id, request.clone()).await {
            Ok(response) => {
                let result = classify::<M>(&response, shape).map_err(|error| {
                    error
                        .with_request(request.clone())
                        .with_response(response.clone())
                });
                let outcome = match &result {
                    Ok(_) => Ok(response),
                    Err(error) => Err(error.clone()),
                };
                (outcome, result)
            }
            Err(error) => {
                let error = error.with_request(request);
                (Err(error.clone()), Err(error))
            }
        }
    }

    /// Run one exchange up to a finished response or an error
    async fn exchange(&self, id: RequestId, request: Arc<Request>) -> std::result::Result<Arc<Response>, ErrorInfo> {
        let session = request.session().clone();
        let _permit = self
            .limiter
            .acquire(request.host_key(), session.max_connections_per_host)
            .await
            .map_err(ErrorInfo::transport)?;

        let start = Instant::now();
        match tokio::time::timeout(session.timeout_for_resource, self.transfer(id, &request, start)).await {
            Ok(result) => result,
            Err(_) => Err(ErrorInfo::transport(Error::timeout(session.timeout_for_resource))),
        }
    }

    async fn transfer(
        &self,
        id: RequestId,
        request: &Request,
        start: Instant,
    ) -> std::result::Result<Arc<Response>, ErrorInfo> {
        let step = request.session().timeout_for_request;

        let head = within(step, self.transport.issue(request))
            .await?
            .map_err(ErrorInfo::transport)?;
        let headers_received = Instant::now();
        let status = head.status;
        let failed = is_failure_status(status, request.restrict_status_codes());

        debug!(id, status, "headers received");
        if self.verbose {
            debug!(id, headers = ?head.headers, "response headers");
        }

        let mut timeline = Timeline {
            request_start: start,
            headers_received,
            completed: headers_received,
        };

        if failed && self.status_policy == StatusPolicy::FailFast {
            let response = Response::new(status, head.headers, head.url, None, timeline);
            return Err(ErrorInfo::status_code(status).with_response(Arc::new(response)));
        }

        let mut body = head.body;
        let mut data = Vec::new();
        while let Some(chunk) = within(step, body.next()).await? {
            data.extend_from_slice(&chunk.map_err(ErrorInfo::transport)?);
        }
        timeline.completed = Instant::now();

        let response = Arc::new(Response::new(status, head.headers, head.url, Some(data), timeline));
        if failed {
            return Err(ErrorInfo::status_code(status).with_response(response));
        }
        Ok(response)
    }
}

/// Await `future`, failing with a transport timeout after `limit`
async fn within<F: std::future::Future>(limit: Duration, future: F) -> std::result::Result<F::Output, ErrorInfo> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ErrorInfo::transport(Error::timeout(limit)))
}

/// Builder for creating dispatchers with custom configuration
///
/// # Examples
///
/// ```no_run
/// use rmhttp::{DispatcherBuilder, StatusPolicy};
///
/// # #[tokio::main]
/// # async fn main() -> rmhttp::Result<()> {
/// let dispatcher = DispatcherBuilder::new()
///     .status_policy(StatusPolicy::FailFast)
///     .stop_all_on_failure(true)
///     .verbose(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DispatcherBuilder {
    transport: Option<Arc<dyn Transport>>,
    observer: Option<Arc<dyn DispatchObserver>>,
    status_policy: StatusPolicy,
    stop_all_on_failure: bool,
    verbose: bool,
}

impl DispatcherBuilder {
    /// Create a new dispatcher builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom transport
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Register lifecycle hooks
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: DispatchObserver + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set the failing-status policy
    pub fn status_policy(mut self, policy: StatusPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    /// Cancel every other in-flight request when one fails
    pub fn stop_all_on_failure(mut self, enabled: bool) -> Self {
        self.stop_all_on_failure = enabled;
        self
    }

    /// Log request and response headers at debug level
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Build the dispatcher and start its callback queue
    pub fn build(self) -> Result<Dispatcher> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("a tokio runtime is required to build a dispatcher"))?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let queue = CallbackQueue {
            registry: HashMap::new(),
            observer: self.observer,
            stop_all_on_failure: self.stop_all_on_failure,
        };
        runtime.spawn(queue.run(receiver));

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                transport,
                commands,
                runtime,
                limiter: HostLimiter::new(),
                next_id: AtomicU64::new(1),
                status_policy: self.status_policy,
                verbose: self.verbose,
            }),
        })
    }
}

struct InFlight {
    abort: AbortHandle,
    method: HttpMethod,
    url: Url,
    started: Instant,
}

enum Command {
    Register {
        id: RequestId,
        entry: InFlight,
    },
    Finished {
        id: RequestId,
        outcome: Outcome,
        deliver: Box<dyn FnOnce() + Send>,
    },
    Cancel {
        id: RequestId,
    },
    CancelAll,
    Count {
        reply: oneshot::Sender<usize>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register { id, .. } => write!(f, "Register({})", id),
            Command::Finished { id, .. } => write!(f, "Finished({})", id),
            Command::Cancel { id } => write!(f, "Cancel({})", id),
            Command::CancelAll => write!(f, "CancelAll"),
            Command::Count { .. } => write!(f, "Count"),
        }
    }
}

/// Serial owner of the in-flight registry
struct CallbackQueue {
    registry: HashMap<RequestId, InFlight>,
    observer: Option<Arc<dyn DispatchObserver>>,
    stop_all_on_failure: bool,
}

impl CallbackQueue {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register { id, entry } => {
                    self.registry.insert(id, entry);
                }
                Command::Finished { id, outcome, deliver } => self.finish(id, outcome, deliver),
                Command::Cancel { id } => self.cancel(id),
                Command::CancelAll => self.cancel_all(),
                Command::Count { reply } => {
                    let _ = reply.send(self.registry.len());
                }
            }
        }
        debug!("callback queue stopped");
    }

    fn finish(
        &mut self,
        id: RequestId,
        outcome: Outcome,
        deliver: Box<dyn FnOnce() + Send>,
    ) {
        let Some(entry) = self.registry.remove(&id) else {
            debug!(id, "completion for cancelled request dropped");
            return;
        };
        let latency_ms = entry.started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) => {
                info!(id, method = %entry.method, url = %entry.url, status = response.status(), latency_ms, "request completed");
                if let Some(observer) = &self.observer {
                    observer.on_finish(id, response);
                }
            }
            Err(error) => {
                warn!(id, method = %entry.method, url = %entry.url, kind = %error.kind(), status = error.status(), reason = error.reason(), latency_ms, "request failed");
                if let Some(observer) = &self.observer {
                    observer.on_fail(id, error);
                }
            }
        }

        if std::panic::catch_unwind(AssertUnwindSafe(deliver)).is_err() {
            warn!(id, "completion callback panicked");
        }

        if outcome.is_err() && self.stop_all_on_failure {
            self.cancel_all();
        }
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(entry) = self.registry.remove(&id) {
            entry.abort.abort();
            debug!(id, url = %entry.url, "request cancelled");
            if let Some(observer) = &self.observer {
                observer.on_cancel(id);
            }
        }
    }

    fn cancel_all(&mut self) {
        let ids: Vec<RequestId> = self.registry.keys().copied().collect();
        for id in ids {
            self.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Payload;
    use crate::params::Encoding;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use http::HeaderMap;
    use std::sync::Mutex;

    /// Scripted transport: fixed status, body chunks and an optional delay
    struct ScriptedTransport {
        status: u16,
        chunks: Vec<&'static [u8]>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(status: u16, chunks: Vec<&'static [u8]>) -> Self {
            Self {
                status,
                chunks,
                delay: Duration::ZERO,
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn issue(&self, request: &Request) -> Result<TransportResponse> {
            tokio::time::sleep(self.delay).await;
            let chunks: Vec<Result<Vec<u8>>> = self.chunks.iter().map(|c| Ok(c.to_vec())).collect();
            Ok(TransportResponse {
                status: self.status,
                headers: HeaderMap::new(),
                url: request.url().clone(),
                body: futures::stream::iter(chunks).boxed(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        async fn issue(&self, _request: &Request) -> Result<TransportResponse> {
            panic!("transport bug")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DispatchObserver for Recorder {
        fn on_finish(&self, id: RequestId, response: &Response) {
            self.events.lock().unwrap().push(format!("finish {} {}", id, response.status()));
        }

        fn on_fail(&self, id: RequestId, error: &ErrorInfo) {
            self.events.lock().unwrap().push(format!("fail {} {}", id, error.kind()));
        }

        fn on_cancel(&self, id: RequestId) {
            self.events.lock().unwrap().push(format!("cancel {}", id));
        }
    }

    fn get(url: &str) -> Request {
        Request::builder(url, HttpMethod::Get, Encoding::Url).build().unwrap()
    }

    #[test]
    fn test_failure_status_sets() {
        let restricted = BTreeSet::from([418]);
        assert!(is_failure_status(404, &restricted));
        assert!(is_failure_status(511, &restricted));
        assert!(is_failure_status(418, &restricted));
        assert!(!is_failure_status(200, &restricted));
        assert!(!is_failure_status(410, &restricted));
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = Dispatcher::builder().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_chunks_are_accumulated_in_order() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"{\"a\":", b" [1, ", b"2]}"]))
            .build()
            .unwrap();

        let result: TypedResult = dispatcher
            .fetch(get("http://scripted.test/obj"), Shape::Object)
            .await
            .unwrap();
        let payload = result.unwrap();
        assert_eq!(payload.as_object().unwrap()["a"], serde_json::json!([1, 2]));
        assert_eq!(dispatcher.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_status_error_completes_with_body() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(404, vec![b"not here"]))
            .observer(recorder.clone())
            .build()
            .unwrap();

        let result: TypedResult = dispatcher
            .fetch(get("http://scripted.test/missing"), Shape::Object)
            .await
            .unwrap();
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StatusCode);
        assert_eq!(error.status(), 404);
        assert_eq!(error.response().unwrap().body(), Some(&b"not here"[..]));
        assert_eq!(error.request().unwrap().url().path(), "/missing");
        assert_eq!(recorder.events(), vec!["fail 1 status-code".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_body() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(503, vec![b"busy"]))
            .status_policy(StatusPolicy::FailFast)
            .build()
            .unwrap();

        let result: TypedResult = dispatcher
            .fetch(get("http://scripted.test/"), Shape::Text)
            .await
            .unwrap();
        let error = result.unwrap_err();
        assert_eq!(error.status(), 503);
        assert!(error.response().unwrap().body().is_none());
    }

    #[tokio::test]
    async fn test_restricted_status() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(202, vec![b"{}"]))
            .build()
            .unwrap();

        let request = Request::builder("http://scripted.test/", HttpMethod::Get, Encoding::Url)
            .restrict_status_codes([202])
            .build()
            .unwrap();
        let result: TypedResult = dispatcher.fetch(request, Shape::Object).await.unwrap();
        assert!(result.unwrap_err().is_status_code());
    }

    #[tokio::test]
    async fn test_cancel_drops_completion() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"{}"]).delayed(Duration::from_secs(5)))
            .observer(recorder.clone())
            .build()
            .unwrap();

        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let handle = dispatcher.send(get("http://scripted.test/"), Shape::Object, move |_: TypedResult| {
            *flag.lock().unwrap() = true;
        });
        assert_eq!(dispatcher.in_flight().await, 1);

        handle.cancel();
        assert_eq!(dispatcher.in_flight().await, 0);
        assert!(!*called.lock().unwrap());
        assert_eq!(recorder.events(), vec![format!("cancel {}", handle.id())]);
    }

    #[tokio::test]
    async fn test_fetch_returns_none_when_cancelled() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"{}"]).delayed(Duration::from_secs(5)))
            .build()
            .unwrap();

        let pending = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .fetch::<serde_json::Value>(get("http://scripted.test/"), Shape::Object)
                    .await
            })
        };
        while dispatcher.in_flight().await == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.cancel_all();

        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resource_timeout_is_transport_error() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"{}"]).delayed(Duration::from_secs(5)))
            .build()
            .unwrap();

        let request = Request::builder("http://scripted.test/", HttpMethod::Get, Encoding::Url)
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let result: TypedResult = dispatcher.fetch(request, Shape::Object).await.unwrap();
        let error = result.unwrap_err();
        assert!(error.is_transport());
        assert!(error.reason().contains("timed out"));
    }

    #[tokio::test]
    async fn test_model_decoding() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Item {
            id: u32,
        }

        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"{\"id\": 7}"]))
            .build()
            .unwrap();

        let result = dispatcher
            .fetch::<Item>(get("http://scripted.test/item"), Shape::Model)
            .await
            .unwrap();
        assert_eq!(result.unwrap(), Payload::Model(Item { id: 7 }));
    }

    #[tokio::test]
    async fn test_panicking_callback_keeps_queue_alive() {
        let dispatcher = Dispatcher::builder()
            .transport(ScriptedTransport::new(200, vec![b"ok"]))
            .build()
            .unwrap();

        let (tx, rx) = oneshot::channel();
        dispatcher.send(get("http://scripted.test/"), Shape::Text, move |_: TypedResult| {
            let _ = tx.send(());
            panic!("callback failure");
        });
        rx.await.unwrap();

        let result: TypedResult = dispatcher
            .fetch(get("http://scripted.test/"), Shape::Text)
            .await
            .unwrap();
        assert_eq!(result.unwrap().as_text(), Some("ok"));
    }

    #[tokio::test]
    async fn test_panicking_task_delivers_error() {
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::builder()
            .transport(PanickingTransport)
            .observer(recorder.clone())
            .build()
            .unwrap();

        let result: TypedResult = dispatcher
            .fetch(get("http://scripted.test/"), Shape::Object)
            .await
            .expect("a panicking request is not a cancellation");
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::None);
        assert_eq!(error.reason(), "request task panicked");
        assert!(error.request().is_some());
        assert_eq!(dispatcher.in_flight().await, 0);
        assert_eq!(recorder.events(), vec!["fail 1 none".to_string()]);
    }

    fn entry() -> InFlight {
        let (abort, _registration) = AbortHandle::new_pair();
        InFlight {
            abort,
            method: HttpMethod::Get,
            url: Url::parse("http://scripted.test/").unwrap(),
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_registry_membership_decides_cancel_race() {
        let recorder = Recorder::default();
        let queue = CallbackQueue {
            registry: HashMap::new(),
            observer: Some(Arc::new(recorder.clone())),
            stop_all_on_failure: false,
        };
        let (commands, receiver) = mpsc::unbounded_channel();
        let running = tokio::spawn(queue.run(receiver));

        let late = Arc::new(Mutex::new(false));
        let early = Arc::new(Mutex::new(false));

        // cancel wins: the completion that follows is dropped
        commands.send(Command::Register { id: 7, entry: entry() }).unwrap();
        commands.send(Command::Cancel { id: 7 }).unwrap();
        let flag = late.clone();
        commands
            .send(Command::Finished {
                id: 7,
                outcome: Err(ErrorInfo::status_code(500)),
                deliver: Box::new(move || *flag.lock().unwrap() = true),
            })
            .unwrap();

        // completion wins: the cancel that follows is a no-op
        commands.send(Command::Register { id: 8, entry: entry() }).unwrap();
        let flag = early.clone();
        commands
            .send(Command::Finished {
                id: 8,
                outcome: Err(ErrorInfo::status_code(503)),
                deliver: Box::new(move || *flag.lock().unwrap() = true),
            })
            .unwrap();
        commands.send(Command::Cancel { id: 8 }).unwrap();

        let (reply, count) = oneshot::channel();
        commands.send(Command::Count { reply }).unwrap();
        assert_eq!(count.await.unwrap(), 0);

        drop(commands);
        running.await.unwrap();
        assert!(!*late.lock().unwrap());
        assert!(*early.lock().unwrap());
        assert_eq!(
            recorder.events(),
            vec!["cancel 7".to_string(), "fail 8 status-code".to_string()]
        );
    }
}
