//! Peer-link abstraction.
//!
//! The physical transport (discovery, invitations, encryption) lives outside
//! this crate. What the session layer sees is a [`PeerChannel`]: one reliable
//! bidirectional byte pipe per remote device. Link-state changes and inbound
//! bytes never touch session state directly; the transport integration
//! enqueues them as events on the owning coordinator.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RelayError;

/// Connection state reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    NotConnected,
}

/// Out-of-band context a connecting peer attaches to its invitation.
///
/// This is the admission handshake: it is not a typed envelope, and the
/// hub's accept/reject decision carries no explanation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteContext {
    pub passcode: String,
    pub nickname: String,
}

/// Reliable, in-order byte channel to one remote peer.
///
/// Sends are fire-and-forget; a send to a peer whose link has gone away
/// returns an error the caller is expected to swallow per-peer.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    device_name: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl PeerChannel {
    pub fn new(device_name: impl Into<String>, sender: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            device_name: device_name.into(),
            sender,
        }
    }

    /// Creates a channel together with the receiving half, for transports
    /// (and tests) that pump bytes themselves.
    pub fn pair(device_name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(device_name, tx), rx)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn send(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        self.sender
            .send(bytes)
            .map_err(|_| RelayError::ChannelClosed(self.device_name.clone()))
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
