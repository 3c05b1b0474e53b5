//! Shared server state.
//!
//! The [`Hub`] is the central container handed to every connection task:
//! configuration, store handle, crypto manager, domain services, the session
//! registry, the worker pool, and the live connection index.
//!
//! Lock discipline: the connection index is a DashMap; fan-out iterates it,
//! probing each connection's joined-room set under that connection's own
//! read lock, and collects matching senders before awaiting any send. No
//! await ever happens while a shard or room-set lock is held.

use crate::config::Config;
use crate::crypto::CryptoManager;
use crate::db::Database;
use crate::pool::WorkerPool;
use crate::security::{AddressTracker, SessionRegistry};
use crate::services::{AdminService, AuthService};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outgoing-line channel depth per connection.
pub const OUTGOING_BUFFER: usize = 64;

/// The engine-side handle to one authenticated connection.
pub struct ConnectionHandle {
    pub session_id: String,
    pub account_id: i64,
    pub username: String,
    outgoing: mpsc::Sender<String>,
    joined_rooms: RwLock<HashSet<i64>>,
    /// One-shot disconnect signal; cancelling it tears the connection down.
    pub disconnect: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        session_id: String,
        account_id: i64,
        username: String,
        outgoing: mpsc::Sender<String>,
    ) -> Self {
        Self {
            session_id,
            account_id,
            username,
            outgoing,
            joined_rooms: RwLock::new(HashSet::new()),
            disconnect: CancellationToken::new(),
        }
    }

    /// Queue a line on the connection's serialized write path.
    pub async fn send(&self, line: impl Into<String>) {
        if self.outgoing.send(line.into()).await.is_err() {
            debug!(session = %self.session_id, "Dropped line for closed connection");
        }
    }

    fn sender(&self) -> mpsc::Sender<String> {
        self.outgoing.clone()
    }

    pub fn join_room(&self, room_id: i64) {
        self.joined_rooms.write().expect("room set lock").insert(room_id);
    }

    pub fn leave_room(&self, room_id: i64) {
        self.joined_rooms.write().expect("room set lock").remove(&room_id);
    }

    pub fn is_in_room(&self, room_id: i64) -> bool {
        self.joined_rooms.read().expect("room set lock").contains(&room_id)
    }

    pub fn joined_rooms(&self) -> Vec<i64> {
        self.joined_rooms
            .read()
            .expect("room set lock")
            .iter()
            .copied()
            .collect()
    }
}

/// Live connection index keyed by session id.
#[derive(Default)]
pub struct ConnectionIndex {
    connections: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionIndex {
    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.connections.insert(handle.session_id.clone(), handle);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(session_id).map(|(_, h)| h)
    }

    /// Linear scan by account id; fine at the current scale.
    pub fn find_by_account(&self, account_id: i64) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .find(|e| e.value().account_id == account_id)
            .map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver a line to every member of a room, optionally excluding one
    /// session (usually the sender, which echoes separately).
    pub async fn broadcast_to_room(&self, room_id: i64, line: &str, exclude_session: &str) {
        let targets: Vec<mpsc::Sender<String>> = self
            .connections
            .iter()
            .filter(|e| e.value().session_id != exclude_session && e.value().is_in_room(room_id))
            .map(|e| e.value().sender())
            .collect();

        for target in targets {
            let _ = target.send(line.to_string()).await;
        }
    }

    /// Deliver a line to every connection.
    pub async fn broadcast_all(&self, line: &str) {
        let targets: Vec<mpsc::Sender<String>> =
            self.connections.iter().map(|e| e.value().sender()).collect();
        for target in targets {
            let _ = target.send(line.to_string()).await;
        }
    }
}

/// Central shared state container.
pub struct Hub {
    pub config: Config,
    pub db: Database,
    pub crypto: Arc<CryptoManager>,
    pub auth: AuthService,
    pub admin: AdminService,
    pub tracker: AddressTracker,
    pub sessions: Arc<SessionRegistry>,
    pub pool: WorkerPool,
    pub connections: ConnectionIndex,
    pub shutdown: CancellationToken,
}

impl Hub {
    pub fn new(config: Config, db: Database, crypto: Arc<CryptoManager>) -> Self {
        let auth = AuthService::new(
            db.clone(),
            config.security.password_min_length,
            config.security.password_require_special,
        );
        let admin = AdminService::new(db.clone());
        let tracker = AddressTracker::new(
            db.clone(),
            config.security.max_ip_suspicion,
            config.security.enable_ip_tracking,
        );
        let sessions = Arc::new(SessionRegistry::new(config.security.session_timeout_secs));
        let pool = WorkerPool::new(&config.threadpool);

        Self {
            config,
            db,
            crypto,
            auth,
            admin,
            tracker,
            sessions,
            pool,
            connections: ConnectionIndex::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.server_name
    }
}
