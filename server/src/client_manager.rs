//! Registry of connected clients and their replication progress.
//!
//! Each connection task registers its client here once the handshake
//! succeeds. The registry tracks:
//! - the newest game time each client has confirmed
//! - whether the client has signalled it is ready for the next tick
//! - the server's capacity limit
//!
//! It lives inside the shared game state, so every access happens under the
//! state lock.

use log::info;
use shared::{GameTime, RegionId};
use std::collections::HashMap;
use std::net::SocketAddr;

/// A connected client and its replication progress
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Peer address, kept for logging
    pub addr: SocketAddr,
    /// Newest game time the client has applied
    pub confirmed: GameTime,
    /// Set by a poll with `last`, cleared by every tick
    pub ready: bool,
    /// Region the client last asked about, if any
    pub scope: Option<RegionId>,
}

impl Client {
    /// Creates a client that has applied everything up to `confirmed`
    pub fn new(id: u32, addr: SocketAddr, confirmed: GameTime) -> Self {
        Self {
            id,
            addr,
            confirmed,
            ready: false,
            scope: None,
        }
    }

    /// Raises the confirmed time; it never moves backwards.
    pub fn confirm(&mut self, time: GameTime) -> GameTime {
        self.confirmed = self.confirmed.max(time);
        self.confirmed
    }
}

/// Manages all connected clients
///
/// The ClientManager enforces the server capacity limit and answers the two
/// questions the simulation asks about clients: are they all ready for the
/// next tick, and which history can be dropped because every client has
/// already applied it.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to register a new client
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    /// `confirmed` is the game time of the snapshot the client was sent.
    pub fn add_client(&mut self, addr: SocketAddr, confirmed: GameTime) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, confirmed));

        Some(client_id)
    }

    /// Removes a client from the server
    ///
    /// Returns true if the client was found and removed, false if they
    /// were already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} ({}) disconnected", client.id, client.addr);
            true
        } else {
            false
        }
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Records that a client has applied everything up to `time`
    ///
    /// Returns the client's confirmed time afterwards, or None for an
    /// unknown client.
    pub fn confirm(&mut self, client_id: u32, time: GameTime) -> Option<GameTime> {
        self.clients
            .get_mut(&client_id)
            .map(|client| client.confirm(time))
    }

    pub fn set_scope(&mut self, client_id: u32, scope: Option<RegionId>) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.scope = scope;
        }
    }

    /// Marks a client as ready for the next tick
    pub fn set_ready(&mut self, client_id: u32) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.ready = true;
            true
        } else {
            false
        }
    }

    /// True when at least one client is connected and all of them are ready
    pub fn all_ready(&self) -> bool {
        !self.clients.is_empty() && self.clients.values().all(|client| client.ready)
    }

    /// Clears every ready flag; called once per tick
    pub fn reset_ready(&mut self) {
        for client in self.clients.values_mut() {
            client.ready = false;
        }
    }

    /// Lowest confirmed time across all clients, None when nobody is connected
    pub fn oldest_confirmed(&self) -> Option<GameTime> {
        self.clients.values().map(|client| client.confirmed).min()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr, 101);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
        assert_eq!(client.confirmed, 101);
        assert!(!client.ready);
        assert_eq!(client.scope, None);
    }

    #[test]
    fn test_confirmed_time_never_decreases() {
        let mut client = Client::new(1, test_addr(), 301);
        assert_eq!(client.confirm(201), 301);
        assert_eq!(client.confirm(401), 401);
        assert_eq!(client.confirmed, 401);
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);

        let client_id1 = manager.add_client(test_addr(), 1).unwrap();
        let client_id2 = manager.add_client(test_addr2(), 1).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr(), 1).is_some());
        assert!(manager.add_client(test_addr2(), 1).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), 1).unwrap();

        assert!(manager.remove_client(&client_id));
        assert!(manager.is_empty());
        assert!(!manager.remove_client(&999));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(test_addr(), 1).unwrap();
        manager.remove_client(&first);
        let second = manager.add_client(test_addr(), 1).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_ready_flags() {
        let mut manager = ClientManager::new(3);
        assert!(!manager.all_ready());

        let a = manager.add_client(test_addr(), 1).unwrap();
        let b = manager.add_client(test_addr2(), 1).unwrap();
        assert!(manager.set_ready(a));
        assert!(!manager.all_ready());
        assert!(manager.set_ready(b));
        assert!(manager.all_ready());

        manager.reset_ready();
        assert!(!manager.all_ready());
        assert!(!manager.set_ready(999));
    }

    #[test]
    fn test_oldest_confirmed() {
        let mut manager = ClientManager::new(3);
        assert_eq!(manager.oldest_confirmed(), None);

        let a = manager.add_client(test_addr(), 101).unwrap();
        let b = manager.add_client(test_addr2(), 301).unwrap();
        assert_eq!(manager.oldest_confirmed(), Some(101));

        assert_eq!(manager.confirm(a, 401), Some(401));
        assert_eq!(manager.oldest_confirmed(), Some(301));
        manager.set_scope(b, Some(4));
        assert_eq!(manager.get(b).unwrap().scope, Some(4));
        assert_eq!(manager.confirm(999, 1), None);
    }
}
