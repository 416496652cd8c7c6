use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Per-request session limits
///
/// `timeout_for_request` bounds the wait for any single step of the exchange
/// (response headers, or the next body chunk). `timeout_for_resource` bounds
/// the whole exchange. `max_connections_per_host` caps how many requests
/// with this limit may be in flight against one host at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub timeout_for_request: Duration,
    pub timeout_for_resource: Duration,
    pub max_connections_per_host: usize,
}

impl SessionConfig {
    /// Create a configuration using `timeout` for both request and resource
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_for_request: timeout,
            timeout_for_resource: timeout,
            ..Self::default()
        }
    }

    /// Set the per-step timeout
    pub fn timeout_for_request(mut self, timeout: Duration) -> Self {
        self.timeout_for_request = timeout;
        self
    }

    /// Set the whole-exchange timeout
    pub fn timeout_for_resource(mut self, timeout: Duration) -> Self {
        self.timeout_for_resource = timeout;
        self
    }

    /// Set the connection limit per host; zero is treated as one
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = max.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_for_request: Duration::from_secs(60),
            timeout_for_resource: Duration::from_secs(60),
            // serializes requests to one host unless raised
            max_connections_per_host: 1,
        }
    }
}

/// Per-host connection gate
///
/// Requests to the same host with the same limit share one semaphore, so at
/// most `limit` of them hold a permit at a time. An entry is dropped once
/// nobody holds or waits for its semaphore.
#[derive(Debug, Default)]
pub(crate) struct HostLimiter {
    hosts: Arc<Mutex<HashMap<HostKey, Arc<Semaphore>>>>,
}

type HostKey = (String, usize);

impl HostLimiter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for a connection slot on `host`
    pub(crate) async fn acquire(&self, host: String, limit: usize) -> Result<HostPermit> {
        let key = (host, limit);
        let semaphore = {
            let mut hosts = self
                .hosts
                .lock()
                .map_err(|_| Error::config("host limiter lock poisoned"))?;
            hosts
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
                .clone()
        };
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| Error::config("host limiter closed"))?;
        Ok(HostPermit {
            permit: Some(permit),
            key,
            hosts: self.hosts.clone(),
        })
    }
}

/// A held connection slot; releasing the last one forgets the host
#[derive(Debug)]
pub(crate) struct HostPermit {
    permit: Option<OwnedSemaphorePermit>,
    key: HostKey,
    hosts: Arc<Mutex<HashMap<HostKey, Arc<Semaphore>>>>,
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        let Ok(mut hosts) = self.hosts.lock() else {
            return;
        };
        // the map's own reference is the only one left
        if hosts.get(&self.key).map_or(false, |s| Arc::strong_count(s) == 1) {
            hosts.remove(&self.key);
        }
    }
}
