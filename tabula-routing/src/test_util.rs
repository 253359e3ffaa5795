//! Test doubles shared by the unit tests in this crate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tabula_core::Endpoint;

use crate::connection::{Connection, Connector};
use crate::error::ConnectError;

pub fn ep(s: &str) -> Endpoint {
    Endpoint::new(s).unwrap()
}

#[derive(Debug)]
pub struct MockConn {
    name: String,
    endpoint: Endpoint,
    closed: AtomicBool,
}

impl MockConn {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: ep(endpoint),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MockConn {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Connector that succeeds unless the endpoint was marked as failing.
///
/// A held endpoint blocks its handshakes until released.
#[derive(Debug, Default)]
pub struct MockConnector {
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashSet<String>>,
    released: Condvar,
    waiting: AtomicU64,
    connects: AtomicU64,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_string());
    }

    pub fn heal_endpoint(&self, endpoint: &str) {
        self.failing.lock().remove(endpoint);
    }

    pub fn hold_endpoint(&self, endpoint: &str) {
        self.held.lock().insert(endpoint.to_string());
    }

    pub fn release_endpoint(&self, endpoint: &str) {
        self.held.lock().remove(endpoint);
        self.released.notify_all();
    }

    /// Handshakes currently blocked on a held endpoint.
    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl Connector for MockConnector {
    type Conn = MockConn;

    fn connect(&self, name: &str, endpoint: &Endpoint) -> Result<MockConn, ConnectError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let mut held = self.held.lock();
        if held.contains(endpoint.as_str()) {
            self.waiting.fetch_add(1, Ordering::AcqRel);
            while held.contains(endpoint.as_str()) {
                self.released.wait(&mut held);
            }
            self.waiting.fetch_sub(1, Ordering::AcqRel);
        }
        drop(held);
        if self.failing.lock().contains(endpoint.as_str()) {
            return Err(ConnectError::Refused {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(MockConn::new(name, endpoint.as_str()))
    }
}
