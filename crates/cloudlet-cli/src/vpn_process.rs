//! Process-backed VPN client
//!
//! Drives an external VPN management command as a child process: the
//! rendered client configuration is written to its stdin, and status
//! lines of the form `STATE|message` read from its stdout are turned into
//! [`VpnStatusEvent`]s for the launcher.

use cloudlet_core::vpn::{VpnClient, VpnError, VpnStatusEvent};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

struct Inner {
    sender: Option<mpsc::UnboundedSender<VpnStatusEvent>>,
    child: Option<Child>,
}

/// [`VpnClient`] implementation spawning an external VPN command
pub struct ProcessVpnClient {
    command: String,
    args: Vec<String>,
    inner: Mutex<Inner>,
}

impl ProcessVpnClient {
    /// Build a client from a whitespace-separated command line
    pub fn new(command_line: &str) -> Result<Self, VpnError> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let command = parts
            .next()
            .ok_or_else(|| VpnError::Subsystem("Empty VPN command".to_string()))?;

        Ok(Self {
            command,
            args: parts.collect(),
            inner: Mutex::new(Inner {
                sender: None,
                child: None,
            }),
        })
    }
}

#[async_trait::async_trait]
impl VpnClient for ProcessVpnClient {
    async fn start_vpn(&self, config: &str) -> Result<(), VpnError> {
        let mut inner = self.inner.lock().await;
        let sender = inner
            .sender
            .clone()
            .ok_or(VpnError::NotRegistered)?;

        // One tunnel at a time
        if let Some(mut previous) = inner.child.take() {
            tracing::debug!("Stopping previous VPN process");
            let _ = previous.start_kill();
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let session_id = format!(
            "vpn-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VpnError::Subsystem("Failed to get VPN process stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VpnError::Subsystem("Failed to get VPN process stdout".to_string()))?;

        // The process reads its configuration until EOF
        stdin.write_all(config.as_bytes()).await?;
        stdin.shutdown().await?;
        drop(stdin);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let (state, message) = match line.split_once('|') {
                            Some((state, message)) => (state.trim(), message.trim()),
                            None => (line.trim(), ""),
                        };
                        if state.is_empty() {
                            continue;
                        }
                        let event = VpnStatusEvent {
                            session_id: session_id.clone(),
                            state: state.to_string(),
                            message: message.to_string(),
                            level: "info".to_string(),
                        };
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("VPN process stdout closed");
                        let _ = sender.send(VpnStatusEvent {
                            session_id: session_id.clone(),
                            state: "NOPROCESS".to_string(),
                            message: "VPN process exited".to_string(),
                            level: "info".to_string(),
                        });
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading VPN process stdout: {}", e);
                        break;
                    }
                }
            }
        });

        inner.child = Some(child);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VpnError> {
        let mut inner = self.inner.lock().await;
        if inner.sender.is_none() {
            return Err(VpnError::NotRegistered);
        }

        match inner.child.take() {
            Some(mut child) => {
                child.start_kill()?;
                let _ = child.wait().await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn register_status_callback(
        &self,
        sender: mpsc::UnboundedSender<VpnStatusEvent>,
    ) -> Result<(), VpnError> {
        self.inner.lock().await.sender = Some(sender);
        Ok(())
    }

    async fn unregister_status_callback(&self) -> Result<(), VpnError> {
        let mut inner = self.inner.lock().await;
        inner.sender = None;
        if let Some(mut child) = inner.child.take() {
            let _ = child.start_kill();
        }
        Ok(())
    }
}
