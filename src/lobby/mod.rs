//! Lobby module - rendezvous core
//!
//! Owns the announced-endpoint registry and the peer bindings. A client
//! announces itself under an endpoint id; a second client connects using
//! that id; from then on the lobby relays frames verbatim between the two
//! until either side disconnects, at which point the other side is closed
//! as well.

mod registry;
mod wire;

pub use registry::{EndpointRegistry, RegistryError, RegistryResult};
pub use wire::Wire;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::{Command, Reply};

/// Identifies one accepted connection for the lifetime of the lobby
pub type ClientId = u64;

/// Per-client state tracked by the lobby
#[derive(Debug)]
struct ClientState {
    /// Outbound half of the connection
    wire: Arc<dyn Wire>,
    /// Whether this client is half of a peer binding
    bound_to_peer: bool,
    /// The other half of the binding
    peer: Option<ClientId>,
    /// Ids this client announced and has not yet paired away
    announced: Vec<String>,
}

#[derive(Debug, Default)]
struct LobbyState {
    registry: EndpointRegistry,
    clients: HashMap<ClientId, ClientState>,
    next_id: ClientId,
}

/// The lobby core.
///
/// All registry mutations and binding changes happen under one lock, so
/// each inbound event is handled to completion before the next: a pairing
/// is created atomically for both sides, and a duplicate announce can never
/// race a connect for the same id.
#[derive(Debug, Default)]
pub struct Lobby {
    state: Mutex<LobbyState>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new connection into the lobby.
    ///
    /// Called by the transport layer once per accepted connection; the
    /// returned id names the client in all later calls.
    pub async fn client_connected(&self, wire: Arc<dyn Wire>) -> ClientId {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.clients.insert(
            id,
            ClientState {
                wire,
                bound_to_peer: false,
                peer: None,
                announced: Vec::new(),
            },
        );
        tracing::debug!("Client {} accepted", id);
        id
    }

    /// Handle one inbound frame from a client.
    ///
    /// Bound clients get the relay path: the frame goes to their peer
    /// verbatim, without being parsed. Everyone else gets command dispatch;
    /// anything that is not a recognized command closes the connection
    /// with no reply.
    pub async fn on_message(&self, id: ClientId, raw: &str) {
        let mut state = self.state.lock().await;
        let Some(client) = state.clients.get(&id) else {
            return;
        };

        if client.bound_to_peer {
            let peer_wire = client
                .peer
                .and_then(|peer| state.clients.get(&peer))
                .map(|peer| peer.wire.clone());

            // Peer already torn down: the cascade will close this client
            // shortly, drop the frame.
            if let Some(peer_wire) = peer_wire {
                peer_wire.send(raw.to_string());
            }
            return;
        }

        let wire = client.wire.clone();

        match Command::parse(raw) {
            Ok(Command::Announce { endpoint_id }) => {
                Self::on_announce(&mut state, id, &endpoint_id)
            }
            Ok(Command::Connect { endpoint_id }) => Self::on_connect(&mut state, id, &endpoint_id),
            Err(err) => {
                tracing::debug!("Closing client {}: unsupported command ({})", id, err);
                wire.close();
            }
        }
    }

    /// Handle an "announce" command
    fn on_announce(state: &mut LobbyState, id: ClientId, endpoint_id: &str) {
        let Some(client) = state.clients.get(&id) else {
            return;
        };
        let wire = client.wire.clone();

        match state.registry.register(endpoint_id, id) {
            Ok(()) => {
                if let Some(client) = state.clients.get_mut(&id) {
                    client.announced.push(endpoint_id.to_string());
                }
                tracing::info!("Client {} announced endpoint '{}'", id, endpoint_id);
            }
            Err(err) => {
                tracing::info!("Rejecting announce from client {}: {}", id, err);
                // Reply first, then close; the existing registration is
                // untouched.
                wire.send(Reply::AlreadyAnnounced.to_frame());
                wire.close();
            }
        }
    }

    /// Handle a "connect" command: form the peer binding
    fn on_connect(state: &mut LobbyState, id: ClientId, endpoint_id: &str) {
        let Some(client) = state.clients.get(&id) else {
            return;
        };
        let connecting_wire = client.wire.clone();

        let endpoint_client = match state.registry.lookup(endpoint_id) {
            Ok(endpoint_client) => endpoint_client,
            Err(err) => {
                tracing::info!("Rejecting connect from client {}: {}", id, err);
                connecting_wire.send(Reply::NotAnnounced.to_frame());
                connecting_wire.close();
                return;
            }
        };

        let Some(endpoint) = state.clients.get(&endpoint_client) else {
            // Stale entry pointing at a client that is already gone.
            state.registry.remove(endpoint_id);
            connecting_wire.send(Reply::NotAnnounced.to_frame());
            connecting_wire.close();
            return;
        };
        let endpoint_wire = endpoint.wire.clone();

        // Bind both sides. Everything below happens under the lobby lock,
        // so the binding is never observable half-formed.
        if let Some(endpoint) = state.clients.get_mut(&endpoint_client) {
            endpoint.bound_to_peer = true;
            endpoint.peer = Some(id);
            endpoint.announced.retain(|announced| announced != endpoint_id);
        }
        if let Some(client) = state.clients.get_mut(&id) {
            client.bound_to_peer = true;
            client.peer = Some(endpoint_client);
        }

        // Endpoint side first, then the connector.
        endpoint_wire.send(Reply::Connected.to_frame());
        connecting_wire.send(Reply::Connected.to_frame());

        // The announcer is no longer waiting; the id is free for reuse.
        state.registry.remove(endpoint_id);

        tracing::info!(
            "Paired client {} with endpoint '{}' (client {})",
            id,
            endpoint_id,
            endpoint_client
        );
    }

    /// Handle a client's close event.
    ///
    /// Bound clients cascade: losing either side of a pairing closes the
    /// other. Ids the client announced but never paired are freed so they
    /// can be announced again.
    pub async fn client_closed(&self, id: ClientId) {
        let mut state = self.state.lock().await;
        let Some(client) = state.clients.remove(&id) else {
            return;
        };

        for endpoint_id in &client.announced {
            state.registry.remove(endpoint_id);
            tracing::debug!(
                "Freed endpoint '{}' after client {} closed unpaired",
                endpoint_id,
                id
            );
        }

        if client.bound_to_peer {
            if let Some(peer) = client.peer.and_then(|peer| state.clients.get(&peer)) {
                tracing::info!("Client {} closed; closing its bound peer", id);
                peer.wire.close();
            }
        } else {
            tracing::debug!("Client {} closed", id);
        }
    }

    /// Look up the client announced under an endpoint id
    pub async fn endpoint(&self, endpoint_id: &str) -> RegistryResult<ClientId> {
        self.state.lock().await.registry.lookup(endpoint_id)
    }

    /// Number of clients currently known to the lobby
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    #[cfg(test)]
    async fn binding(&self, id: ClientId) -> (bool, Option<ClientId>) {
        let state = self.state.lock().await;
        state
            .clients
            .get(&id)
            .map(|client| (client.bound_to_peer, client.peer))
            .unwrap_or((false, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum WireOp {
        Sent(String),
        Closed,
    }

    /// Records every send and close, preserving their relative order
    #[derive(Debug, Default)]
    struct StubWire {
        ops: StdMutex<Vec<WireOp>>,
    }

    impl Wire for StubWire {
        fn send(&self, frame: String) {
            self.ops.lock().unwrap().push(WireOp::Sent(frame));
        }

        fn close(&self) {
            self.ops.lock().unwrap().push(WireOp::Closed);
        }
    }

    impl StubWire {
        fn ops(&self) -> Vec<WireOp> {
            self.ops.lock().unwrap().clone()
        }

        fn sent(&self) -> Vec<String> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    WireOp::Sent(frame) => Some(frame),
                    WireOp::Closed => None,
                })
                .collect()
        }

        fn close_count(&self) -> usize {
            self.ops()
                .iter()
                .filter(|op| **op == WireOp::Closed)
                .count()
        }
    }

    async fn accept(lobby: &Lobby) -> (ClientId, Arc<StubWire>) {
        let wire = Arc::new(StubWire::default());
        let id = lobby.client_connected(wire.clone()).await;
        (id, wire)
    }

    fn announce(endpoint_id: &str) -> String {
        format!(r#"{{"command":"announce","endpoint_id":"{}"}}"#, endpoint_id)
    }

    fn connect(endpoint_id: &str) -> String {
        format!(r#"{{"command":"connect","endpoint_id":"{}"}}"#, endpoint_id)
    }

    #[tokio::test]
    async fn announce_registers_the_endpoint() {
        let lobby = Lobby::new();
        let (a, wire_a) = accept(&lobby).await;
        let (b, wire_b) = accept(&lobby).await;

        lobby.on_message(a, &announce("test-a")).await;
        lobby.on_message(b, &announce("test-b")).await;

        assert_eq!(lobby.endpoint("test-a").await.unwrap(), a);
        assert_eq!(lobby.endpoint("test-b").await.unwrap(), b);

        // A successful announce gets no reply
        assert!(wire_a.ops().is_empty());
        assert!(wire_b.ops().is_empty());
    }

    #[tokio::test]
    async fn unknown_endpoint_lookup_is_an_error() {
        let lobby = Lobby::new();
        assert!(matches!(
            lobby.endpoint("*unannounced-id*").await,
            Err(RegistryError::UnknownEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_announce_replies_then_closes_the_new_connection() {
        let lobby = Lobby::new();
        let (a, wire_a) = accept(&lobby).await;
        let (b, wire_b) = accept(&lobby).await;

        lobby.on_message(a, &announce("test")).await;
        lobby.on_message(b, &announce("test")).await;

        // Exactly one error frame, then exactly one close, in that order
        assert_eq!(
            wire_b.ops(),
            vec![
                WireOp::Sent(r#"{"error":"endpoint-already-announced"}"#.to_string()),
                WireOp::Closed,
            ]
        );

        // First announcer and its registration are untouched
        assert!(wire_a.ops().is_empty());
        assert_eq!(lobby.endpoint("test").await.unwrap(), a);
    }

    #[tokio::test]
    async fn unsupported_command_closes_with_no_reply() {
        let lobby = Lobby::new();
        let (a, wire_a) = accept(&lobby).await;

        lobby.on_message(a, r#"{"command":"*unsupported*"}"#).await;

        assert_eq!(wire_a.ops(), vec![WireOp::Closed]);
    }

    #[tokio::test]
    async fn malformed_json_closes_with_no_reply() {
        let lobby = Lobby::new();
        let (a, wire_a) = accept(&lobby).await;

        lobby.on_message(a, "this is not json").await;

        assert_eq!(wire_a.ops(), vec![WireOp::Closed]);
    }

    #[tokio::test]
    async fn connect_binds_both_sides_and_frees_the_id() {
        let lobby = Lobby::new();
        let (endpoint, endpoint_wire) = accept(&lobby).await;
        let (connector, connector_wire) = accept(&lobby).await;

        lobby.on_message(endpoint, &announce("test")).await;
        lobby.on_message(connector, &connect("test")).await;

        // Symmetric binding
        assert_eq!(lobby.binding(endpoint).await, (true, Some(connector)));
        assert_eq!(lobby.binding(connector).await, (true, Some(endpoint)));

        // Both sides get exactly one connected event
        assert_eq!(
            endpoint_wire.sent(),
            vec![r#"{"event":"connected"}"#.to_string()]
        );
        assert_eq!(
            connector_wire.sent(),
            vec![r#"{"event":"connected"}"#.to_string()]
        );
        assert_eq!(endpoint_wire.close_count(), 0);
        assert_eq!(connector_wire.close_count(), 0);

        // The id is free for reuse
        assert!(lobby.endpoint("test").await.is_err());
        let (again, _) = accept(&lobby).await;
        lobby.on_message(again, &announce("test")).await;
        assert_eq!(lobby.endpoint("test").await.unwrap(), again);
    }

    #[tokio::test]
    async fn connect_to_unknown_endpoint_replies_then_closes() {
        let lobby = Lobby::new();
        let (a, wire_a) = accept(&lobby).await;

        lobby.on_message(a, &connect("*unannounced-id*")).await;

        assert_eq!(
            wire_a.ops(),
            vec![
                WireOp::Sent(r#"{"error":"endpoint-not-announced"}"#.to_string()),
                WireOp::Closed,
            ]
        );

        // The lobby itself is unaffected
        assert_eq!(lobby.client_count().await, 1);
    }

    #[tokio::test]
    async fn relay_is_verbatim_and_bidirectional() {
        let lobby = Lobby::new();
        let (endpoint, endpoint_wire) = accept(&lobby).await;
        let (connector, connector_wire) = accept(&lobby).await;

        lobby.on_message(endpoint, &announce("test")).await;
        lobby.on_message(connector, &connect("test")).await;

        let message = "What is this program? A miserable little pile of tests!";

        lobby.on_message(endpoint, message).await;
        assert_eq!(
            connector_wire.sent(),
            vec![r#"{"event":"connected"}"#.to_string(), message.to_string()]
        );

        lobby.on_message(connector, message).await;
        assert_eq!(
            endpoint_wire.sent(),
            vec![r#"{"event":"connected"}"#.to_string(), message.to_string()]
        );
    }

    #[tokio::test]
    async fn relay_does_not_reparse_command_shaped_frames() {
        let lobby = Lobby::new();
        let (endpoint, _) = accept(&lobby).await;
        let (connector, connector_wire) = accept(&lobby).await;

        lobby.on_message(endpoint, &announce("test")).await;
        lobby.on_message(connector, &connect("test")).await;

        // A frame that happens to look like a command is still opaque
        lobby.on_message(endpoint, &announce("smuggled")).await;

        assert!(lobby.endpoint("smuggled").await.is_err());
        assert_eq!(connector_wire.sent().last().unwrap(), &announce("smuggled"));
    }

    #[tokio::test]
    async fn closing_a_bound_client_closes_its_peer_exactly_once() {
        let lobby = Lobby::new();
        let (endpoint, _) = accept(&lobby).await;
        let (connector, connector_wire) = accept(&lobby).await;

        lobby.on_message(endpoint, &announce("test")).await;
        lobby.on_message(connector, &connect("test")).await;

        lobby.client_closed(endpoint).await;
        assert_eq!(connector_wire.close_count(), 1);

        // The peer's own close event must not cascade back
        lobby.client_closed(connector).await;
        assert_eq!(connector_wire.close_count(), 1);
        assert_eq!(lobby.client_count().await, 0);
    }

    #[tokio::test]
    async fn closing_an_unbound_client_closes_nobody() {
        let lobby = Lobby::new();
        let (a, _) = accept(&lobby).await;
        let (b, wire_b) = accept(&lobby).await;

        lobby.client_closed(a).await;

        assert_eq!(wire_b.close_count(), 0);
        assert_eq!(lobby.client_count().await, 1);
    }

    #[tokio::test]
    async fn close_frees_unpaired_endpoint_id() {
        let lobby = Lobby::new();
        let (a, _) = accept(&lobby).await;

        lobby.on_message(a, &announce("test")).await;
        lobby.client_closed(a).await;

        assert!(lobby.endpoint("test").await.is_err());

        // The id can be announced again
        let (b, wire_b) = accept(&lobby).await;
        lobby.on_message(b, &announce("test")).await;
        assert_eq!(lobby.endpoint("test").await.unwrap(), b);
        assert!(wire_b.ops().is_empty());
    }

    #[tokio::test]
    async fn pairing_leaves_other_endpoints_resolvable() {
        let lobby = Lobby::new();
        let (s1, wire_s1) = accept(&lobby).await;
        let (s2, wire_s2) = accept(&lobby).await;
        let (s3, wire_s3) = accept(&lobby).await;

        lobby.on_message(s1, &announce("a")).await;
        lobby.on_message(s2, &announce("b")).await;
        lobby.on_message(s3, &connect("a")).await;

        assert_eq!(wire_s1.sent(), vec![r#"{"event":"connected"}"#.to_string()]);
        assert_eq!(wire_s3.sent(), vec![r#"{"event":"connected"}"#.to_string()]);
        assert!(wire_s2.ops().is_empty());

        assert!(lobby.endpoint("a").await.is_err());
        assert_eq!(lobby.endpoint("b").await.unwrap(), s2);
    }
}
