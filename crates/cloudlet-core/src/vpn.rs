//! VPN session control
//!
//! The VPN tunnel itself is an external subsystem reached through the
//! [`VpnClient`] trait; this module owns the client-side session state:
//! lazy status-callback registration, connect/disconnect requests, and the
//! state machine driven by asynchronous status events.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// VPN connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VpnState {
    /// Not connected and not attempting to connect
    #[default]
    Disconnected,
    /// Connect requested, waiting for the subsystem to come up
    Connecting,
    /// Tunnel established
    Connected,
    /// Subsystem reported a failure
    Error,
}

impl VpnState {
    /// Human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            VpnState::Disconnected => "disconnected",
            VpnState::Connecting => "connecting",
            VpnState::Connected => "connected",
            VpnState::Error => "error",
        }
    }

    /// Map a subsystem status string onto a connection state
    ///
    /// The subsystem emits more granular states than we track; anything
    /// between disconnected and connected collapses to `Connecting`.
    pub fn from_status(status: &str) -> VpnState {
        match status {
            "CONNECTED" => VpnState::Connected,
            "DISCONNECTED" | "EXITING" | "NOPROCESS" => VpnState::Disconnected,
            "ERROR" | "FATAL" => VpnState::Error,
            _ => VpnState::Connecting,
        }
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event delivered asynchronously by the VPN subsystem
#[derive(Debug, Clone)]
pub struct VpnStatusEvent {
    /// Subsystem session identifier
    pub session_id: String,
    /// Subsystem state string (e.g. `"CONNECTED"`)
    pub state: String,
    /// Free-form status message
    pub message: String,
    /// Severity level as reported by the subsystem
    pub level: String,
}

/// Errors from the VPN subsystem
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    #[error("Launcher is not registered with the VPN subsystem")]
    NotRegistered,

    #[error("VPN subsystem error: {0}")]
    Subsystem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface to the external VPN subsystem
///
/// Status events flow back through the sender handed to
/// `register_status_callback`; connect results are only ever observed that
/// way.
#[async_trait]
pub trait VpnClient: Send + Sync {
    /// Request a tunnel using the given configuration text (fire-and-forget)
    async fn start_vpn(&self, config: &str) -> Result<(), VpnError>;

    /// Request tunnel teardown
    async fn disconnect(&self) -> Result<(), VpnError>;

    /// Register the sender that receives status events
    async fn register_status_callback(
        &self,
        sender: mpsc::UnboundedSender<VpnStatusEvent>,
    ) -> Result<(), VpnError>;

    /// Drop the registered status sender, if any
    async fn unregister_status_callback(&self) -> Result<(), VpnError>;
}

/// Client-side owner of the single VPN session
///
/// At most one session is live per controller. All mutation happens from
/// the launcher actor task, so the controller needs no internal locking.
pub struct VpnSessionController {
    client: Arc<dyn VpnClient>,
    status_tx: mpsc::UnboundedSender<VpnStatusEvent>,
    registered: bool,
    state: VpnState,
    session_id: String,
}

impl VpnSessionController {
    /// Create a controller; no registration is attempted yet
    pub fn new(
        client: Arc<dyn VpnClient>,
        status_tx: mpsc::UnboundedSender<VpnStatusEvent>,
    ) -> Self {
        Self {
            client,
            status_tx,
            registered: false,
            state: VpnState::Disconnected,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Current connection state
    pub fn state(&self) -> VpnState {
        self.state
    }

    /// Launcher-side session identifier
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the status callback registration has been acknowledged
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Register the status callback if not yet acknowledged
    ///
    /// Callers must verify this returns `true` before issuing any session
    /// or VPN action. A failed registration is logged and retried lazily on
    /// the next action.
    pub async fn ensure_registered(&mut self) -> bool {
        if self.registered {
            return true;
        }

        match self
            .client
            .register_status_callback(self.status_tx.clone())
            .await
        {
            Ok(()) => {
                self.registered = true;
                tracing::info!("VPN status callback registered");
            }
            Err(e) => {
                tracing::warn!("The launcher needs to register with the VPN subsystem first: {e}");
            }
        }

        self.registered
    }

    /// Request a tunnel with the given configuration text
    ///
    /// Fire-and-forget: the outcome arrives as status events. An immediate
    /// submission failure is logged, never surfaced.
    pub async fn connect(&mut self, config_text: &str) {
        match self.client.start_vpn(config_text).await {
            Ok(()) => {
                self.state = VpnState::Connecting;
                tracing::debug!(session_id = %self.session_id, "VPN connect requested");
            }
            Err(e) => {
                tracing::error!("Error in starting VPN connection: {e}");
            }
        }
    }

    /// Request tunnel teardown
    ///
    /// An unregistered subsystem is a benign no-op; other failures are
    /// logged and not surfaced.
    pub async fn disconnect(&mut self) {
        match self.client.disconnect().await {
            Ok(()) => {
                self.state = VpnState::Disconnected;
                tracing::debug!(session_id = %self.session_id, "VPN disconnect requested");
            }
            Err(VpnError::NotRegistered) => {
                tracing::warn!("The launcher hasn't registered with the VPN subsystem");
            }
            Err(e) => {
                tracing::error!("Error in disconnecting VPN session: {e}");
            }
        }
    }

    /// Drop the status registration, typically during shutdown
    pub async fn unregister(&mut self) {
        if !self.registered {
            return;
        }
        if let Err(e) = self.client.unregister_status_callback().await {
            tracing::debug!("Error in unregistering VPN status callback: {e}");
        }
        self.registered = false;
    }

    /// Apply a status event to the session state
    ///
    /// Returns `true` exactly when the event is the transition into the
    /// connected state.
    pub fn handle_status(&mut self, event: &VpnStatusEvent) -> bool {
        let previous = self.state;
        self.state = VpnState::from_status(&event.state);
        previous != VpnState::Connected && self.state == VpnState::Connected
    }
}
