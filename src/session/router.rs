use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::link::PeerChannel;
use super::envelope::Envelope;
use super::state::Role;

/// One connected peer as the hub sees it. Owned exclusively by the hub for
/// the lifetime of the connection; removed on disconnect.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub role: Role,
    pub nickname: String,
    pub channel: PeerChannel,
}

/// Maintains the star topology.
///
/// On the hub, the peer table is the only path between clients: a relayed
/// envelope goes to every channel except the logical sender's, so no client
/// ever receives its own echo and no two clients share a channel. On a
/// client, there is at most one channel, pointing at the hub.
pub struct MessageRouter {
    peers: RwLock<HashMap<String, PeerRecord>>,
    hub: RwLock<Option<PeerChannel>>,
}

impl MessageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(HashMap::new()),
            hub: RwLock::new(None),
        })
    }

    pub async fn add_peer(&self, device_name: String, role: Role, nickname: String, channel: PeerChannel) {
        let mut peers = self.peers.write().await;
        peers.insert(
            device_name.clone(),
            PeerRecord {
                role,
                nickname,
                channel,
            },
        );
        tracing::info!(peer = %device_name, ?role, "Peer registered");
    }

    pub async fn remove_peer(&self, device_name: &str) -> Option<PeerRecord> {
        let mut peers = self.peers.write().await;
        let removed = peers.remove(device_name);
        if removed.is_some() {
            tracing::info!(peer = %device_name, "Peer removed");
        }
        removed
    }

    pub async fn peer_role(&self, device_name: &str) -> Option<Role> {
        let peers = self.peers.read().await;
        peers.get(device_name).map(|p| p.role)
    }

    pub async fn has_teacher(&self) -> bool {
        let peers = self.peers.read().await;
        peers.values().any(|p| p.role == Role::Teacher)
    }

    pub async fn connected_devices(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        peers.keys().cloned().collect()
    }

    pub async fn student_nicknames(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        let mut names: Vec<String> = peers
            .values()
            .filter(|p| p.role == Role::Student)
            .map(|p| p.nickname.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn peer_count(&self) -> usize {
        let peers = self.peers.read().await;
        peers.len()
    }

    pub async fn clear(&self) {
        let mut peers = self.peers.write().await;
        peers.clear();
    }

    /// Sends `envelope` to every connected peer except `from` and
    /// `excluding`. Broadcasting to an empty room is a valid no-op. A
    /// serialization failure drops the whole send; a dead peer is skipped
    /// so it never blocks delivery to the rest.
    pub async fn relay(&self, envelope: &Envelope, from: Option<&str>, excluding: Option<&str>) {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping relay, envelope failed to serialize");
                return;
            }
        };

        let peers = self.peers.read().await;
        for (device_name, record) in peers.iter() {
            if Some(device_name.as_str()) == from || Some(device_name.as_str()) == excluding {
                continue;
            }
            if let Err(e) = record.channel.send(bytes.clone()) {
                tracing::debug!(peer = %device_name, error = %e, "Dropping send to dead peer");
            }
        }
    }

    /// Sends `envelope` to a single peer; misses and dead channels are
    /// swallowed like any other delivery failure.
    pub async fn send_to(&self, device_name: &str, envelope: &Envelope) {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping send, envelope failed to serialize");
                return;
            }
        };

        let peers = self.peers.read().await;
        match peers.get(device_name) {
            Some(record) => {
                if let Err(e) = record.channel.send(bytes) {
                    tracing::debug!(peer = %device_name, error = %e, "Dropping send to dead peer");
                }
            }
            None => {
                tracing::debug!(peer = %device_name, "Dropping send to unknown peer");
            }
        }
    }

    /// Client-side: attach or detach the single hub channel.
    pub async fn set_hub_channel(&self, channel: Option<PeerChannel>) {
        let mut hub = self.hub.write().await;
        *hub = channel;
    }

    pub async fn hub_device(&self) -> Option<String> {
        let hub = self.hub.read().await;
        hub.as_ref().map(|c| c.device_name().to_string())
    }

    /// Client-side: send on the single outbound channel to whichever peer
    /// is currently acting as hub. A detached hub is a silent drop.
    pub async fn send_to_hub(&self, envelope: &Envelope) {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping send, envelope failed to serialize");
                return;
            }
        };

        let hub = self.hub.read().await;
        match hub.as_ref() {
            Some(channel) => {
                if let Err(e) = channel.send(bytes) {
                    tracing::debug!(error = %e, "Dropping send, hub channel is dead");
                }
            }
            None => {
                tracing::debug!("Dropping send, no hub channel attached");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn add_test_peer(
        router: &MessageRouter,
        device: &str,
        role: Role,
    ) -> UnboundedReceiver<Vec<u8>> {
        let (channel, rx) = PeerChannel::pair(device);
        router
            .add_peer(device.to_string(), role, device.to_string(), channel)
            .await;
        rx
    }

    #[tokio::test]
    async fn test_relay_excludes_sender() {
        let router = MessageRouter::new();
        let mut teacher_rx = add_test_peer(&router, "teacher-pad", Role::Teacher).await;
        let mut student_rx = add_test_peer(&router, "student-pad", Role::Student).await;

        router
            .relay(&Envelope::StopInteraction, Some("teacher-pad"), None)
            .await;

        assert!(teacher_rx.try_recv().is_err());
        let bytes = student_rx.try_recv().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), Envelope::StopInteraction);
    }

    #[tokio::test]
    async fn test_relay_honors_excluding() {
        let router = MessageRouter::new();
        let mut a_rx = add_test_peer(&router, "a", Role::Student).await;
        let mut b_rx = add_test_peer(&router, "b", Role::Student).await;

        router
            .relay(&Envelope::EndClass, None, Some("b"))
            .await;

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_to_empty_room_is_noop() {
        let router = MessageRouter::new();
        router.relay(&Envelope::EndClass, None, None).await;
    }

    #[tokio::test]
    async fn test_dead_peer_does_not_block_fanout() {
        let router = MessageRouter::new();
        let dead_rx = add_test_peer(&router, "dead", Role::Student).await;
        drop(dead_rx);
        let mut live_rx = add_test_peer(&router, "live", Role::Student).await;

        router.relay(&Envelope::StopInteraction, None, None).await;

        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_hub_without_channel_is_silent() {
        let router = MessageRouter::new();
        router.send_to_hub(&Envelope::RequestStudents).await;
    }

    #[tokio::test]
    async fn test_send_to_hub() {
        let router = MessageRouter::new();
        let (channel, mut rx) = PeerChannel::pair("hub");
        router.set_hub_channel(Some(channel)).await;

        router.send_to_hub(&Envelope::RequestStudents).await;
        let bytes = rx.try_recv().unwrap();
        assert_eq!(
            Envelope::decode(&bytes).unwrap(),
            Envelope::RequestStudents
        );
    }

    #[tokio::test]
    async fn test_student_nicknames_sorted() {
        let router = MessageRouter::new();
        let _rx1 = add_test_peer(&router, "zed", Role::Student).await;
        let _rx2 = add_test_peer(&router, "amy", Role::Student).await;
        let _rx3 = add_test_peer(&router, "ms-lee", Role::Teacher).await;

        assert_eq!(router.student_nicknames().await, vec!["amy", "zed"]);
        assert!(router.has_teacher().await);
    }
}
