//! Client callback fan-out
//!
//! This module provides the [`CloudletCallback`] trait for decoupling event
//! delivery from any particular transport, and the [`CallbackRegistry`] that
//! fans launcher events out to every registered client. Implementations can
//! print to stdout (CLI), forward over IPC, or record events in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque handle identifying one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Callback surface exposed to external clients
///
/// Two event types exist: free-form status messages relayed from VPN state
/// changes, and tunnel-IP assignment notifications sent after a successful
/// connection.
#[async_trait]
pub trait CloudletCallback: Send + Sync {
    /// Deliver a free-form status message
    async fn message(&self, text: &str) -> Result<(), String>;

    /// Deliver a newly assigned tunnel IP address
    async fn new_server_ip(&self, ip: &str) -> Result<(), String>;
}

/// Registry of live client callbacks
///
/// Delivery is attempted to every registered handle on each broadcast; a
/// handle whose delivery fails is treated as dead and removed after the
/// sweep, so one unreachable client never blocks the rest and never
/// reappears in later broadcasts.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: u64,
    handles: HashMap<CallbackId, Arc<dyn CloudletCallback>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and return its handle
    pub fn register(&mut self, callback: Arc<dyn CloudletCallback>) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.handles.insert(id, callback);
        tracing::debug!("Callback {:?} registered", id);
        id
    }

    /// Remove a callback; unknown handles are ignored
    pub fn unregister(&mut self, id: CallbackId) {
        if self.handles.remove(&id).is_some() {
            tracing::debug!("Callback {:?} unregistered", id);
        }
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether any handles are registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Broadcast a status message to every live handle
    pub async fn broadcast_message(&mut self, text: &str) -> usize {
        self.broadcast(|cb| {
            let text = text.to_string();
            async move { cb.message(&text).await }
        })
        .await
    }

    /// Broadcast a tunnel IP assignment to every live handle
    pub async fn broadcast_server_ip(&mut self, ip: &str) -> usize {
        self.broadcast(|cb| {
            let ip = ip.to_string();
            async move { cb.new_server_ip(&ip).await }
        })
        .await
    }

    async fn broadcast<F, Fut>(&mut self, deliver: F) -> usize
    where
        F: Fn(Arc<dyn CloudletCallback>) -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, callback) in &self.handles {
            match deliver(Arc::clone(callback)).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!("Callback {:?} unreachable, pruning: {}", id, e);
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            self.handles.remove(&id);
        }

        delivered
    }
}

/// No-op callback for tests or headless runs
#[derive(Default, Clone)]
pub struct NoOpCallback;

#[async_trait]
impl CloudletCallback for NoOpCallback {
    async fn message(&self, _text: &str) -> Result<(), String> {
        Ok(())
    }

    async fn new_server_ip(&self, _ip: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout callback for CLI mode - prints events to console
#[derive(Default, Clone)]
pub struct StdoutCallback {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutCallback {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

#[async_trait]
impl CloudletCallback for StdoutCallback {
    async fn message(&self, text: &str) -> Result<(), String> {
        if self.json_output {
            println!(r#"{{"event":"message","text":{}}}"#, json_string(text));
        } else {
            println!("[cloudlet] {text}");
        }
        Ok(())
    }

    async fn new_server_ip(&self, ip: &str) -> Result<(), String> {
        if self.json_output {
            println!(r#"{{"event":"new_server_ip","ip":{}}}"#, json_string(ip));
        } else {
            println!("[cloudlet] server ip: {ip}");
        }
        Ok(())
    }
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_default()
}
