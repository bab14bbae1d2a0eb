//! Cloudlet Core Library
//!
//! Core types and logic for the cloudlet launcher: discovering a nearby
//! cloudlet through the central registry and bringing up the VPN tunnel
//! to it. This crate is independent of any particular front end; the CLI
//! lives in its own crate.
//!
//! # Modules
//!
//! - [`config`] - Launcher configuration and local input files
//! - [`registry`] - HTTP client for the cloudlet registry protocol
//! - [`poller`] - Fixed-delay polling for the assigned tunnel address
//! - [`vpn`] - VPN session state machine and subsystem interface
//! - [`events`] - Callback fan-out to registered clients
//! - [`launcher`] - The discovery workflow actor tying it all together

pub mod config;
pub mod events;
pub mod launcher;
pub mod poller;
pub mod registry;
pub mod vpn;

// Re-export commonly used types
pub use config::{ConfigError, LauncherConfig, PollingConfig, RegistryConfig};
pub use events::{CallbackId, CallbackRegistry, CloudletCallback, NoOpCallback, StdoutCallback};
pub use launcher::{
    CloudletLauncher, LauncherError, LauncherHandle, LauncherMode, LauncherStatus,
};
pub use poller::{PollOutcome, PollerHandle, TunnelPoller};
pub use registry::{CloudletRegistry, HttpRegistryClient, RegistryError, SessionAction};
pub use vpn::{VpnClient, VpnError, VpnSessionController, VpnState, VpnStatusEvent};
