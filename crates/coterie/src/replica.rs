//! The Replica: unified API for the coterie system.
//!
//! A `Replica` owns the current graph value behind a mutex; local appends and
//! remote merges both go through that single writer, so concurrent
//! connections cannot lose updates. Connections are wired up with
//! [`Replica::connect`] and install everything they learn back into the
//! replica.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use coterie_core::{validate, HashGraph, Keypair, PublicKey};
use coterie_proto::{
    Connection, ConnectionConfig, ConnectionEffect, ConnectionEvent, Envelope,
};
use coterie_team::{InvitationSeed, TeamAction, TeamState};

use crate::error::{ReplicaError, Result};

/// One participant's local copy of a team.
///
/// Cloning a `Replica` yields another handle onto the same graph.
#[derive(Debug, Clone)]
pub struct Replica {
    keypair: Keypair,
    name: String,
    graph: Arc<Mutex<Option<HashGraph>>>,
}

impl Replica {
    /// Found a new team, with this replica's key as founder.
    pub fn create_team(
        keypair: Keypair,
        name: impl Into<String>,
        team_name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let team_name = team_name.into();
        let founder = coterie_team::Member::new(keypair.public_key(), &name);
        let payload = TeamAction::Found { team_name, founder }.to_bytes()?;
        let graph = HashGraph::found(payload, &keypair, now_millis());
        info!(founder = %keypair.public_key(), "founded team");
        Ok(Self {
            keypair,
            name,
            graph: Arc::new(Mutex::new(Some(graph))),
        })
    }

    /// Join from an existing graph value.
    pub fn from_graph(keypair: Keypair, name: impl Into<String>, graph: HashGraph) -> Self {
        Self {
            keypair,
            name: name.into(),
            graph: Arc::new(Mutex::new(Some(graph))),
        }
    }

    /// Join from a serialized graph, validating it first.
    pub fn load(keypair: Keypair, name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let graph = HashGraph::load(bytes)?;
        validate(&graph)?;
        Ok(Self::from_graph(keypair, name, graph))
    }

    /// An invitee replica: no graph until a member admits it.
    pub fn invitee(keypair: Keypair, name: impl Into<String>) -> Self {
        Self {
            keypair,
            name: name.into(),
            graph: Arc::new(Mutex::new(None)),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current graph.
    pub fn graph(&self) -> Option<HashGraph> {
        self.lock().clone()
    }

    /// Serialize the current graph.
    pub fn save(&self) -> Result<Vec<u8>> {
        Ok(self.lock().as_ref().ok_or(ReplicaError::NoTeam)?.save())
    }

    /// Team state reduced from the current graph.
    pub fn team_state(&self) -> Result<TeamState> {
        let guard = self.lock();
        let graph = guard.as_ref().ok_or(ReplicaError::NoTeam)?;
        Ok(TeamState::from_graph(graph)?)
    }

    /// Append a signed action to the graph.
    pub fn append_action(&self, action: &TeamAction) -> Result<()> {
        let payload = action.to_bytes()?;
        let mut guard = self.lock();
        let graph = guard.as_ref().ok_or(ReplicaError::NoTeam)?;
        *guard = Some(graph.append(payload, &self.keypair, now_millis()));
        Ok(())
    }

    /// Merge a remote graph into ours. Returns whether anything changed.
    pub fn merge_remote(&self, other: &HashGraph) -> Result<bool> {
        let mut guard = self.lock();
        match guard.as_ref() {
            Some(current) => {
                let merged = current.merge(other)?;
                let changed = merged.len() != current.len() || merged.head() != current.head();
                if changed {
                    debug!(head = %merged.head(), links = merged.len(), "merged remote graph");
                    *guard = Some(merged);
                }
                Ok(changed)
            }
            None => {
                *guard = Some(other.clone());
                Ok(true)
            }
        }
    }

    /// Open a connection to a peer, as a member carrying our graph.
    pub fn connect(&self, config: ConnectionConfig) -> Result<ReplicaConnection> {
        let graph = self.graph().ok_or(ReplicaError::NoTeam)?;
        let connection =
            Connection::as_member(self.keypair.clone(), self.name.clone(), graph, config);
        Ok(ReplicaConnection {
            replica: self.clone(),
            connection,
        })
    }

    /// Open a connection presenting an invitation instead of membership.
    pub fn connect_with_invitation(
        &self,
        seed: InvitationSeed,
        config: ConnectionConfig,
    ) -> ReplicaConnection {
        let connection =
            Connection::as_invitee(self.keypair.clone(), self.name.clone(), seed, config);
        ReplicaConnection {
            replica: self.clone(),
            connection,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashGraph>> {
        // The graph value is replaced wholesale under the lock, so a poisoned
        // mutex still holds a coherent value.
        self.graph.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A connection bound to a replica: graphs learned from the peer are
/// installed through the replica's mutex.
#[derive(Debug)]
pub struct ReplicaConnection {
    replica: Replica,
    connection: Connection,
}

impl ReplicaConnection {
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn start(&mut self, now: i64) -> Vec<ConnectionEffect> {
        let effects = self.connection.start(now);
        self.absorb(effects)
    }

    pub fn handle(&mut self, envelope: Envelope, now: i64) -> Vec<ConnectionEffect> {
        let effects = self.connection.handle(envelope, now);
        self.absorb(effects)
    }

    pub fn tick(&mut self, now: i64) -> Vec<ConnectionEffect> {
        let effects = self.connection.tick(now);
        self.absorb(effects)
    }

    /// Push the replica's current graph into the connection, after a local
    /// append or a merge learned from another connection.
    pub fn push_local(&mut self, now: i64) -> Vec<ConnectionEffect> {
        match self.replica.graph() {
            Some(graph) => {
                let effects = self.connection.local_update(graph, now);
                self.absorb(effects)
            }
            None => Vec::new(),
        }
    }

    /// Send application data under the session key.
    pub fn send_message(&mut self, plaintext: &[u8]) -> Result<Vec<ConnectionEffect>> {
        Ok(self.connection.send_message(plaintext)?)
    }

    pub fn disconnect(&mut self, reason: impl Into<String>) -> Vec<ConnectionEffect> {
        self.connection.disconnect(reason)
    }

    /// Install connection-side graph changes into the replica.
    fn absorb(&mut self, effects: Vec<ConnectionEffect>) -> Vec<ConnectionEffect> {
        for effect in &effects {
            if matches!(
                effect,
                ConnectionEffect::Emit(ConnectionEvent::Updated)
            ) {
                if let Some(graph) = self.connection.graph() {
                    // Merge rather than overwrite, in case another writer got
                    // in between.
                    let _ = self.replica.merge_remote(&graph.clone());
                }
            }
        }
        effects
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
