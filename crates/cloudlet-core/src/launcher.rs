//! Cloudlet discovery workflow
//!
//! This module ties the registry client, polling scheduler, VPN session
//! controller and callback registry together into the end-to-end flow:
//! create request, poll for a tunnel address, connect the VPN, notify
//! registered clients.
//!
//! All mutable launcher state lives inside a single actor task; commands,
//! poll outcomes and VPN status events arrive over channels and are
//! serialized by one `tokio::select!` loop, so no lock is held across any
//! of the concurrent activities.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::PollingConfig;
use crate::events::{CallbackId, CallbackRegistry, CloudletCallback};
use crate::poller::{PollOutcome, PollerHandle, TunnelPoller};
use crate::registry::{CloudletRegistry, SessionAction};
use crate::vpn::{VpnClient, VpnSessionController, VpnState, VpnStatusEvent};

/// Placeholder substituted with the assigned tunnel address when the VPN
/// configuration template is rendered
pub const TUNNEL_IP_PLACEHOLDER: &str = "{tunnel_ip}";

/// Launcher operating mode, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LauncherMode {
    /// Normal operation: connected sessions broadcast the tunnel IP
    #[default]
    Standard,
    /// VPN connections proceed normally but the tunnel IP is never
    /// broadcast to external clients
    Testing,
}

impl LauncherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LauncherMode::Standard => "standard",
            LauncherMode::Testing => "testing",
        }
    }
}

/// Errors surfaced by [`LauncherHandle`] operations
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("Launcher task is no longer running")]
    Stopped,
}

/// Snapshot of launcher state for introspection
#[derive(Debug, Clone)]
pub struct LauncherStatus {
    /// Current VPN connection state
    pub vpn_state: VpnState,
    /// Tunnel address assigned by the registry, if any
    pub assigned_ip: Option<String>,
    /// Number of live polling tasks
    pub active_pollers: usize,
    /// Number of registered client callbacks
    pub callbacks: usize,
}

enum Command {
    FindCloudlet {
        app_id: String,
    },
    DisconnectCloudlet {
        app_id: String,
    },
    RegisterCallback {
        callback: Arc<dyn CloudletCallback>,
        reply: oneshot::Sender<CallbackId>,
    },
    UnregisterCallback {
        id: CallbackId,
    },
    StartVpn,
    StopVpn,
    Status {
        reply: oneshot::Sender<LauncherStatus>,
    },
    Shutdown,
}

/// Clone-able handle for driving the launcher actor
///
/// Every operation is non-blocking from the caller's perspective; the
/// actual work happens on the actor task and its spawned request tasks.
#[derive(Clone)]
pub struct LauncherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl LauncherHandle {
    /// Discover a cloudlet for the given application and connect to it
    pub fn find_cloudlet(&self, app_id: &str) -> Result<(), LauncherError> {
        self.send(Command::FindCloudlet {
            app_id: app_id.to_string(),
        })
    }

    /// Tear down the VPN session and release the cloudlet assignment
    pub fn disconnect_cloudlet(&self, app_id: &str) -> Result<(), LauncherError> {
        self.send(Command::DisconnectCloudlet {
            app_id: app_id.to_string(),
        })
    }

    /// Register a client callback for status and IP-assignment events
    pub async fn register_callback(
        &self,
        callback: Arc<dyn CloudletCallback>,
    ) -> Result<CallbackId, LauncherError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterCallback { callback, reply })?;
        rx.await.map_err(|_| LauncherError::Stopped)
    }

    /// Remove a previously registered callback
    pub fn unregister_callback(&self, id: CallbackId) -> Result<(), LauncherError> {
        self.send(Command::UnregisterCallback { id })
    }

    /// Bring the VPN up directly, without cloudlet discovery
    pub fn start_vpn(&self) -> Result<(), LauncherError> {
        self.send(Command::StartVpn)
    }

    /// Tear the VPN down directly, without touching the registry
    pub fn stop_vpn(&self) -> Result<(), LauncherError> {
        self.send(Command::StopVpn)
    }

    /// Snapshot the launcher state
    pub async fn status(&self) -> Result<LauncherStatus, LauncherError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| LauncherError::Stopped)
    }

    /// Stop the actor, disconnecting the VPN and cancelling all pollers
    pub fn shutdown(&self) -> Result<(), LauncherError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), LauncherError> {
        self.tx.send(command).map_err(|_| LauncherError::Stopped)
    }
}

/// The launcher actor
pub struct CloudletLauncher {
    user_id: String,
    vpn_template: String,
    mode: LauncherMode,
    polling: PollingConfig,
    registry: Arc<dyn CloudletRegistry>,
    controller: VpnSessionController,
    callbacks: CallbackRegistry,
    pollers: HashMap<(String, String), PollerHandle>,
    assigned_ip: Option<String>,

    command_rx: mpsc::UnboundedReceiver<Command>,
    create_tx: mpsc::UnboundedSender<(String, String)>,
    create_rx: mpsc::UnboundedReceiver<(String, String)>,
    outcome_tx: mpsc::UnboundedSender<PollOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<PollOutcome>,
    status_rx: mpsc::UnboundedReceiver<VpnStatusEvent>,
}

impl CloudletLauncher {
    /// Start the launcher actor and return a handle to it
    ///
    /// `user_id` and `vpn_template` come from the local configuration files
    /// (see [`crate::config::LauncherConfig`]); either may be empty, in
    /// which case the launcher runs degraded but alive.
    pub fn spawn(
        polling: PollingConfig,
        user_id: String,
        vpn_template: String,
        registry: Arc<dyn CloudletRegistry>,
        vpn_client: Arc<dyn VpnClient>,
        mode: LauncherMode,
    ) -> LauncherHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (create_tx, create_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let launcher = CloudletLauncher {
            user_id,
            vpn_template,
            mode,
            polling,
            registry,
            controller: VpnSessionController::new(vpn_client, status_tx),
            callbacks: CallbackRegistry::new(),
            pollers: HashMap::new(),
            assigned_ip: None,
            command_rx,
            create_tx,
            create_rx,
            outcome_tx,
            outcome_rx,
            status_rx,
        };

        tokio::spawn(launcher.run());

        LauncherHandle { tx: command_tx }
    }

    async fn run(mut self) {
        tracing::info!(mode = self.mode.as_str(), "Cloudlet launcher started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        // All handles dropped
                        None => break,
                    }
                }
                Some((user_id, app_id)) = self.create_rx.recv() => {
                    self.start_polling(user_id, app_id);
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_poll_outcome(outcome).await;
                }
                Some(event) = self.status_rx.recv() => {
                    self.handle_vpn_status(event).await;
                }
            }
        }

        self.teardown().await;
        tracing::info!("Cloudlet launcher stopped");
    }

    /// Returns `true` when the actor should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::FindCloudlet { app_id } => {
                tracing::debug!(app_id = %app_id, "findCloudlet called");
                if self.controller.ensure_registered().await {
                    self.spawn_session_request(SessionAction::Create, app_id);
                }
            }
            Command::DisconnectCloudlet { app_id } => {
                tracing::debug!(app_id = %app_id, "disconnectCloudlet called");
                if self.controller.ensure_registered().await {
                    self.controller.disconnect().await;
                    self.cancel_poller(&app_id);
                    self.assigned_ip = None;
                    self.spawn_session_request(SessionAction::Delete, app_id);
                }
            }
            Command::RegisterCallback { callback, reply } => {
                let id = self.callbacks.register(callback);
                let _ = reply.send(id);
            }
            Command::UnregisterCallback { id } => {
                self.callbacks.unregister(id);
            }
            Command::StartVpn => {
                if self.controller.ensure_registered().await {
                    let config = self.render_vpn_config(None);
                    self.controller.connect(&config).await;
                }
            }
            Command::StopVpn => {
                if self.controller.ensure_registered().await {
                    self.controller.disconnect().await;
                }
            }
            Command::Status { reply } => {
                let _ = reply.send(LauncherStatus {
                    vpn_state: self.controller.state(),
                    assigned_ip: self.assigned_ip.clone(),
                    active_pollers: self.pollers.len(),
                    callbacks: self.callbacks.len(),
                });
            }
            Command::Shutdown => return true,
        }

        false
    }

    /// Issue a create/delete request off the actor task
    ///
    /// Only a successful create feeds back into the actor (to start the
    /// poller); delete outcomes are logged and otherwise discarded.
    fn spawn_session_request(&self, action: SessionAction, app_id: String) {
        let registry = Arc::clone(&self.registry);
        let user_id = self.user_id.clone();
        let create_tx = self.create_tx.clone();

        tokio::spawn(async move {
            match registry.request(action, &app_id, &user_id).await {
                Ok(response) => {
                    tracing::debug!(
                        action = action.as_str(),
                        app_id = %app_id,
                        "Registry request acknowledged: {response}"
                    );
                    if action == SessionAction::Create {
                        let _ = create_tx.send((user_id, app_id));
                    }
                }
                Err(e) => {
                    tracing::error!(
                        action = action.as_str(),
                        app_id = %app_id,
                        "Error in sending {action} request: {e}"
                    );
                }
            }
        });
    }

    /// Start polling for the pair's tunnel address, cancelling any poller
    /// already running for the same pair first
    fn start_polling(&mut self, user_id: String, app_id: String) {
        let key = (user_id.clone(), app_id.clone());
        if let Some(previous) = self.pollers.remove(&key) {
            tracing::debug!(user_id = %user_id, app_id = %app_id, "Cancelling previous poller");
            previous.cancel();
        }

        let handle = TunnelPoller::spawn(
            Arc::clone(&self.registry),
            user_id,
            app_id,
            self.polling.clone(),
            self.outcome_tx.clone(),
        );
        self.pollers.insert(key, handle);
    }

    fn cancel_poller(&mut self, app_id: &str) {
        let key = (self.user_id.clone(), app_id.to_string());
        if let Some(handle) = self.pollers.remove(&key) {
            handle.cancel();
        }
    }

    async fn handle_poll_outcome(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::TunnelAssigned {
                user_id,
                app_id,
                ip,
            } => {
                self.pollers.remove(&(user_id, app_id));
                self.assigned_ip = Some(ip.clone());
                let config = self.render_vpn_config(Some(&ip));
                self.controller.connect(&config).await;
            }
            PollOutcome::TimedOut { user_id, app_id } => {
                self.pollers.remove(&(user_id, app_id.clone()));
                self.callbacks
                    .broadcast_message(&format!("Cloudlet discovery timed out for {app_id}"))
                    .await;
            }
        }
    }

    async fn handle_vpn_status(&mut self, event: VpnStatusEvent) {
        tracing::debug!("{}|{}", event.state, event.message);

        let connected = self.controller.handle_status(&event);
        self.callbacks
            .broadcast_message(&format!("{}|{}", event.state, event.message))
            .await;

        if connected {
            match self.mode {
                LauncherMode::Testing => {
                    tracing::debug!("Not broadcasting new IP because running in testing mode");
                }
                LauncherMode::Standard => match self.assigned_ip.clone() {
                    Some(ip) => {
                        self.callbacks.broadcast_server_ip(&ip).await;
                    }
                    None => {
                        tracing::warn!("VPN connected but no tunnel address is assigned");
                    }
                },
            }
        }
    }

    /// Render the VPN configuration template, substituting the tunnel
    /// address when one is given and the template carries the placeholder
    fn render_vpn_config(&self, tunnel_ip: Option<&str>) -> String {
        if self.vpn_template.is_empty() {
            tracing::warn!("VPN configuration template is empty");
        }

        match tunnel_ip {
            Some(ip) if self.vpn_template.contains(TUNNEL_IP_PLACEHOLDER) => {
                self.vpn_template.replace(TUNNEL_IP_PLACEHOLDER, ip)
            }
            Some(_) => {
                tracing::warn!(
                    "VPN template has no {TUNNEL_IP_PLACEHOLDER} placeholder, using it as-is"
                );
                self.vpn_template.clone()
            }
            None => self.vpn_template.clone(),
        }
    }

    async fn teardown(&mut self) {
        for (_, handle) in self.pollers.drain() {
            handle.cancel();
        }
        self.controller.disconnect().await;
        self.controller.unregister().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const NOT_READY: &str = "None";

    /// Registry mock recording requests and replaying scripted poll bodies
    /// (the last script entry repeats once exhausted).
    struct MockRegistry {
        requests: Mutex<Vec<(SessionAction, String, String)>>,
        poll_script: Mutex<VecDeque<String>>,
        create_response: String,
    }

    impl MockRegistry {
        fn new(create_response: &str, poll_script: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                poll_script: Mutex::new(poll_script.into_iter().map(String::from).collect()),
                create_response: create_response.to_string(),
            })
        }

        fn requests(&self) -> Vec<(SessionAction, String, String)> {
            self.requests.lock().unwrap().clone()
        }

        fn request_count(&self, action: SessionAction) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _, _)| *a == action)
                .count()
        }
    }

    #[async_trait]
    impl CloudletRegistry for MockRegistry {
        async fn request(
            &self,
            action: SessionAction,
            app_id: &str,
            user_id: &str,
        ) -> Result<String, RegistryError> {
            self.requests
                .lock()
                .unwrap()
                .push((action, app_id.to_string(), user_id.to_string()));
            Ok(self.create_response.clone())
        }

        async fn poll_status(
            &self,
            _user_id: &str,
            _app_id: &str,
        ) -> Result<String, RegistryError> {
            let mut script = self.poll_script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script
                    .front()
                    .cloned()
                    .unwrap_or_else(|| NOT_READY.to_string()))
            }
        }
    }

    /// VPN subsystem mock: captures the status sender so tests can emit
    /// events, records connect/disconnect traffic.
    struct MockVpn {
        ready: AtomicBool,
        sender: Mutex<Option<mpsc::UnboundedSender<VpnStatusEvent>>>,
        start_configs: Mutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    impl MockVpn {
        fn new(ready: bool) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                sender: Mutex::new(None),
                start_configs: Mutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            })
        }

        fn start_configs(&self) -> Vec<String> {
            self.start_configs.lock().unwrap().clone()
        }

        fn emit(&self, state: &str, message: &str) {
            let sender = self.sender.lock().unwrap();
            let sender = sender.as_ref().expect("status callback not registered");
            sender
                .send(VpnStatusEvent {
                    session_id: "vpn-0".to_string(),
                    state: state.to_string(),
                    message: message.to_string(),
                    level: "info".to_string(),
                })
                .unwrap();
        }
    }

    #[async_trait]
    impl VpnClient for MockVpn {
        async fn start_vpn(&self, config: &str) -> Result<(), crate::vpn::VpnError> {
            self.start_configs.lock().unwrap().push(config.to_string());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), crate::vpn::VpnError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn register_status_callback(
            &self,
            sender: mpsc::UnboundedSender<VpnStatusEvent>,
        ) -> Result<(), crate::vpn::VpnError> {
            if !self.ready.load(Ordering::SeqCst) {
                return Err(crate::vpn::VpnError::Subsystem("not bound".to_string()));
            }
            *self.sender.lock().unwrap() = Some(sender);
            Ok(())
        }

        async fn unregister_status_callback(&self) -> Result<(), crate::vpn::VpnError> {
            self.sender.lock().unwrap().take();
            Ok(())
        }
    }

    /// Callback recording everything it receives
    struct RecordingCallback {
        events: Mutex<Vec<String>>,
    }

    impl RecordingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn server_ips(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| e.strip_prefix("ip:").map(String::from))
                .collect()
        }
    }

    #[async_trait]
    impl CloudletCallback for RecordingCallback {
        async fn message(&self, text: &str) -> Result<(), String> {
            self.events.lock().unwrap().push(format!("message:{text}"));
            Ok(())
        }

        async fn new_server_ip(&self, ip: &str) -> Result<(), String> {
            self.events.lock().unwrap().push(format!("ip:{ip}"));
            Ok(())
        }
    }

    fn fast_polling(max_attempts: u32) -> PollingConfig {
        PollingConfig {
            first_delay_ms: 5,
            interval_ms: 5,
            max_attempts,
        }
    }

    fn spawn_launcher(
        registry: Arc<MockRegistry>,
        vpn: Arc<MockVpn>,
        mode: LauncherMode,
        max_attempts: u32,
    ) -> LauncherHandle {
        CloudletLauncher::spawn(
            fast_polling(max_attempts),
            "u1".to_string(),
            "client\nremote {tunnel_ip} 1194\n".to_string(),
            registry as Arc<dyn CloudletRegistry>,
            vpn as Arc<dyn VpnClient>,
            mode,
        )
    }

    /// Poll a condition until it holds or a second elapses
    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    #[tokio::test]
    async fn test_find_cloudlet_polls_before_connecting() {
        // The create response carries an address, but connection must wait
        // for the status poll: first "None", then the real tunnel address.
        let registry = MockRegistry::new("203.0.113.5", vec![NOT_READY, "203.0.113.7"]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 50);

        handle.find_cloudlet("appA").unwrap();

        wait_until("VPN connect", || !vpn.start_configs().is_empty()).await;

        // Connected with the polled address, not the create response
        assert_eq!(
            vpn.start_configs(),
            vec!["client\nremote 203.0.113.7 1194\n"]
        );

        // Polling stopped after the address arrived
        let status = handle.status().await.unwrap();
        assert_eq!(status.active_pollers, 0);
        assert_eq!(status.assigned_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(status.vpn_state, VpnState::Connecting);

        // Exactly one connect attempt, ever
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(vpn.start_configs().len(), 1);

        let requests = registry.requests();
        assert_eq!(
            requests[0],
            (SessionAction::Create, "appA".to_string(), "u1".to_string())
        );
    }

    #[tokio::test]
    async fn test_none_response_never_connects() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 3);

        let callback = RecordingCallback::new();
        handle
            .register_callback(Arc::clone(&callback) as Arc<dyn CloudletCallback>)
            .await
            .unwrap();

        handle.find_cloudlet("appA").unwrap();

        // The attempt budget runs out and the timeout is surfaced
        wait_until("timeout broadcast", || {
            callback
                .events()
                .iter()
                .any(|e| e.contains("discovery timed out"))
        })
        .await;

        assert!(vpn.start_configs().is_empty());
        let status = handle.status().await.unwrap();
        assert_eq!(status.active_pollers, 0);
        assert_eq!(status.vpn_state, VpnState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_find_cancels_previous_poller() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 10_000);

        handle.find_cloudlet("appA").unwrap();
        wait_until("first poller", || {
            registry.request_count(SessionAction::Create) == 1
        })
        .await;

        handle.find_cloudlet("appA").unwrap();
        wait_until("second create", || {
            registry.request_count(SessionAction::Create) == 2
        })
        .await;

        // Never two live pollers for the same (user, app) pair
        let status = handle.status().await.unwrap();
        assert_eq!(status.active_pollers, 1);
    }

    #[tokio::test]
    async fn test_connected_broadcasts_ip_to_all_callbacks() {
        let registry = MockRegistry::new("ok", vec!["203.0.113.7"]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 50);

        let h1 = RecordingCallback::new();
        let h2 = RecordingCallback::new();
        handle
            .register_callback(Arc::clone(&h1) as Arc<dyn CloudletCallback>)
            .await
            .unwrap();
        handle
            .register_callback(Arc::clone(&h2) as Arc<dyn CloudletCallback>)
            .await
            .unwrap();

        handle.find_cloudlet("appA").unwrap();
        wait_until("VPN connect", || !vpn.start_configs().is_empty()).await;

        vpn.emit("CONNECTED", "Initialization Sequence Completed");

        wait_until("IP broadcast", || {
            !h1.server_ips().is_empty() && !h2.server_ips().is_empty()
        })
        .await;

        assert_eq!(h1.server_ips(), vec!["203.0.113.7"]);
        assert_eq!(h2.server_ips(), vec!["203.0.113.7"]);

        // The raw status message was relayed verbatim too
        assert!(h1
            .events()
            .contains(&"message:CONNECTED|Initialization Sequence Completed".to_string()));
    }

    #[tokio::test]
    async fn test_testing_mode_suppresses_ip_broadcast() {
        let registry = MockRegistry::new("ok", vec!["203.0.113.7"]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Testing, 50);

        let callback = RecordingCallback::new();
        handle
            .register_callback(Arc::clone(&callback) as Arc<dyn CloudletCallback>)
            .await
            .unwrap();

        handle.find_cloudlet("appA").unwrap();
        wait_until("VPN connect", || !vpn.start_configs().is_empty()).await;

        vpn.emit("CONNECTED", "up");

        wait_until("status relay", || {
            callback.events().contains(&"message:CONNECTED|up".to_string())
        })
        .await;

        // The VPN connected, the status was relayed, but no IP went out
        assert!(callback.server_ips().is_empty());
        let status = handle.status().await.unwrap();
        assert_eq!(status.vpn_state, VpnState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_then_find_leaves_one_session() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 10_000);

        handle.find_cloudlet("appA").unwrap();
        wait_until("first poller", || {
            registry.request_count(SessionAction::Create) == 1
        })
        .await;

        handle.disconnect_cloudlet("appA").unwrap();
        handle.find_cloudlet("appA").unwrap();

        wait_until("delete and second create", || {
            registry.request_count(SessionAction::Delete) == 1
                && registry.request_count(SessionAction::Create) == 2
        })
        .await;

        let mut status = handle.status().await.unwrap();
        for _ in 0..400 {
            if status.active_pollers == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            status = handle.status().await.unwrap();
        }
        assert_eq!(status.active_pollers, 1);
        assert_eq!(status.assigned_ip, None);
        assert_eq!(vpn.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vpn_not_ready_skips_registry_request() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(false);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 50);

        handle.find_cloudlet("appA").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Not registered with the VPN subsystem: no request went out
        assert!(registry.requests().is_empty());

        // Once the subsystem is up, the next call registers lazily first
        vpn.ready.store(true, Ordering::SeqCst);
        handle.find_cloudlet("appA").unwrap();
        wait_until("create after recovery", || {
            registry.request_count(SessionAction::Create) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn test_start_vpn_uses_template_without_substitution() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Testing, 50);

        handle.start_vpn().unwrap();
        wait_until("VPN connect", || !vpn.start_configs().is_empty()).await;

        assert_eq!(vpn.start_configs(), vec!["client\nremote {tunnel_ip} 1194\n"]);

        handle.stop_vpn().unwrap();
        wait_until("VPN disconnect", || {
            vpn.disconnects.load(Ordering::SeqCst) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_actor() {
        let registry = MockRegistry::new("ok", vec![NOT_READY]);
        let vpn = MockVpn::new(true);
        let handle = spawn_launcher(Arc::clone(&registry), Arc::clone(&vpn), LauncherMode::Standard, 10_000);

        handle.find_cloudlet("appA").unwrap();
        handle.shutdown().unwrap();

        wait_until("actor stopped", || handle.find_cloudlet("appA").is_err()).await;
        assert!(matches!(
            handle.status().await,
            Err(LauncherError::Stopped)
        ));
    }
}
