//! The peer connection state machine.
//!
//! A `Connection` is sans-I/O: callers feed it envelopes and clock ticks, and
//! it returns effects (envelopes to transmit, events to surface). The phases:
//!
//! ```text
//! AwaitingIdentityClaim -> Authenticating -> Negotiating -> Synchronizing
//!      -> Connected -> Disconnected
//! ```
//!
//! Authentication covers invitation admission and a mutual challenge-response
//! over the claimed member keys; negotiation exchanges session seeds;
//! synchronization drives the sync engine until both heads agree. Every
//! awaiting phase is bounded by a timeout measured against the injected
//! `now` timestamp.

use tracing::{debug, info, warn};

use coterie_core::{validate, HashGraph, Keypair, PublicKey, SignatureBytes};
use coterie_sync::{generate_message, receive_message, SyncConfig, SyncState};
use coterie_team::{
    generate_proof, validate_proof, InvitationId, InvitationSeed, Member, TeamAction, TeamState,
};

use crate::crypto::{
    session_key, EncryptionKey, EncryptionNonce, SessionSeed, X25519PublicKey, X25519Secret,
};
use crate::delivery::{DeliveryConfig, OrderedDelivery};
use crate::error::{ProtocolError, Result};
use crate::messages::{Envelope, IdentityClaim, WireMessage};

/// Signed prefix for identity challenge responses.
const CHALLENGE_CONTEXT: &[u8] = b"coterie identity challenge v0";

/// Tunables for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long any awaiting phase may sit idle, in milliseconds.
    pub await_timeout_ms: i64,
    pub sync: SyncConfig,
    pub delivery: DeliveryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: 7000,
            sync: SyncConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    AwaitingIdentityClaim,
    Authenticating,
    Negotiating,
    Synchronizing,
    Connected,
    Disconnected { reason: String },
}

impl ConnectionPhase {
    fn name(&self) -> &'static str {
        match self {
            ConnectionPhase::AwaitingIdentityClaim => "awaiting-identity-claim",
            ConnectionPhase::Authenticating => "authenticating",
            ConnectionPhase::Negotiating => "negotiating",
            ConnectionPhase::Synchronizing => "synchronizing",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Disconnected { .. } => "disconnected",
        }
    }
}

/// Things the caller needs to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake and initial sync complete.
    Connected,

    /// The graph changed; pull it with [`Connection::graph`].
    Updated,

    /// Decrypted application data from the peer.
    Message(Vec<u8>),

    /// The connection ended.
    Disconnected { reason: String },
}

/// What the state machine wants done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    /// Put this envelope on the wire.
    Transmit(Envelope),

    /// Surface this event to the application.
    Emit(ConnectionEvent),
}

/// One end of a peer connection.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    keypair: Keypair,
    name: String,
    graph: Option<HashGraph>,
    invitation: Option<InvitationSeed>,

    phase: ConnectionPhase,
    delivery: OrderedDelivery,
    sync_state: SyncState,

    secret: X25519Secret,
    peer_encryption_key: Option<X25519PublicKey>,
    our_seed: SessionSeed,
    session: Option<EncryptionKey>,

    peer_id: Option<PublicKey>,
    sent_challenge: Option<[u8; 32]>,
    verified_peer: bool,
    peer_accepted_us: bool,
    awaiting_admission: bool,

    deadline: Option<(i64, &'static str)>,
}

impl Connection {
    /// A connection from an existing team member.
    pub fn as_member(
        keypair: Keypair,
        name: impl Into<String>,
        graph: HashGraph,
        config: ConnectionConfig,
    ) -> Self {
        Self::new(keypair, name.into(), Some(graph), None, config)
    }

    /// A connection from an invitee holding a seed but no graph yet.
    pub fn as_invitee(
        keypair: Keypair,
        name: impl Into<String>,
        invitation: InvitationSeed,
        config: ConnectionConfig,
    ) -> Self {
        Self::new(keypair, name.into(), None, Some(invitation), config)
    }

    fn new(
        keypair: Keypair,
        name: String,
        graph: Option<HashGraph>,
        invitation: Option<InvitationSeed>,
        config: ConnectionConfig,
    ) -> Self {
        let delivery = OrderedDelivery::new(config.delivery.clone());
        Self {
            config,
            keypair,
            name,
            graph,
            invitation,
            phase: ConnectionPhase::AwaitingIdentityClaim,
            delivery,
            sync_state: SyncState::new(),
            secret: X25519Secret::generate(),
            peer_encryption_key: None,
            our_seed: SessionSeed::generate(),
            session: None,
            peer_id: None,
            sent_challenge: None,
            verified_peer: false,
            peer_accepted_us: false,
            awaiting_admission: false,
            deadline: None,
        }
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    pub fn graph(&self) -> Option<&HashGraph> {
        self.graph.as_ref()
    }

    pub fn peer_id(&self) -> Option<PublicKey> {
        self.peer_id
    }

    /// The established session key, once negotiated.
    pub fn session_key(&self) -> Option<&EncryptionKey> {
        self.session.as_ref()
    }

    // ─── Driving the machine ────────────────────────────────────────────────

    /// Open the connection: flush buffered sends and say hello.
    pub fn start(&mut self, now: i64) -> Vec<ConnectionEffect> {
        let mut effects: Vec<ConnectionEffect> = self
            .delivery
            .start()
            .into_iter()
            .map(ConnectionEffect::Transmit)
            .collect();

        let member_id = self.keypair.public_key();
        let proof = self
            .invitation
            .as_ref()
            .map(|seed| generate_proof(seed, &member_id));
        let hello = WireMessage::Hello {
            identity_claim: Some(IdentityClaim {
                member_id,
                name: self.name.clone(),
            }),
            proof,
            encryption_key: self.secret.public_key(),
        };
        self.transmit(hello, &mut effects);
        self.set_deadline(now, "peer hello");
        effects
    }

    /// Feed one envelope from the wire.
    pub fn handle(&mut self, envelope: Envelope, now: i64) -> Vec<ConnectionEffect> {
        if matches!(self.phase, ConnectionPhase::Disconnected { .. }) {
            return Vec::new();
        }

        if envelope.is_control() {
            return match envelope.message {
                WireMessage::RequestResend { index } => match self.delivery.resend(index) {
                    Ok(env) => vec![ConnectionEffect::Transmit(env)],
                    Err(e) => self.fail(e),
                },
                other => {
                    warn!(kind = other.kind(), "ignoring non-control message on control index");
                    Vec::new()
                }
            };
        }

        let delivered = self.delivery.receive(envelope, now);
        let mut effects = Vec::new();
        for message in delivered {
            if matches!(self.phase, ConnectionPhase::Disconnected { .. }) {
                break;
            }
            match self.dispatch(message, now) {
                Ok(more) => effects.extend(more),
                Err(e) => effects.extend(self.fail(e)),
            }
        }
        effects
    }

    /// Advance timers.
    pub fn tick(&mut self, now: i64) -> Vec<ConnectionEffect> {
        if matches!(self.phase, ConnectionPhase::Disconnected { .. }) {
            return Vec::new();
        }
        if let Some((deadline, what)) = self.deadline {
            if now >= deadline {
                return self.fail(ProtocolError::Timeout(what.into()));
            }
        }
        let mut effects = Vec::new();
        if let Some(index) = self.delivery.tick(now) {
            effects.push(ConnectionEffect::Transmit(Envelope::control(
                WireMessage::RequestResend { index },
            )));
        }
        effects
    }

    /// Install a locally changed graph and push the change to the peer.
    pub fn local_update(&mut self, graph: HashGraph, _now: i64) -> Vec<ConnectionEffect> {
        self.graph = Some(graph);
        let mut effects = Vec::new();
        match self.phase {
            ConnectionPhase::Connected => {
                if let Some(graph) = &self.graph {
                    if let Some(payload) =
                        generate_message(graph, &mut self.sync_state, &self.config.sync)
                    {
                        self.transmit(WireMessage::LocalUpdate { payload }, &mut effects);
                    }
                }
                if let Err(e) = self.enforce_peer_membership() {
                    effects.extend(self.fail(e));
                }
            }
            ConnectionPhase::Synchronizing => {
                if let Some(graph) = &self.graph {
                    if let Some(payload) =
                        generate_message(graph, &mut self.sync_state, &self.config.sync)
                    {
                        self.transmit(WireMessage::Sync { payload }, &mut effects);
                    }
                }
            }
            _ => {}
        }
        effects
    }

    /// Encrypt and queue application data. Only valid once connected.
    pub fn send_message(&mut self, plaintext: &[u8]) -> Result<Vec<ConnectionEffect>> {
        if self.phase != ConnectionPhase::Connected {
            return Err(ProtocolError::UnexpectedMessage {
                state: self.phase.name().into(),
                message: "outgoing application data".into(),
            });
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ProtocolError::Encryption("no session key".into()))?;
        let nonce = EncryptionNonce::generate();
        let ciphertext = session.encrypt(plaintext, &nonce)?;
        let mut effects = Vec::new();
        self.transmit(WireMessage::EncryptedMessage { nonce, ciphertext }, &mut effects);
        Ok(effects)
    }

    /// Orderly local shutdown.
    pub fn disconnect(&mut self, reason: impl Into<String>) -> Vec<ConnectionEffect> {
        let reason = reason.into();
        let mut effects = Vec::new();
        self.transmit(WireMessage::Disconnect, &mut effects);
        effects.push(self.enter_disconnected(reason));
        effects
    }

    // ─── Message dispatch ───────────────────────────────────────────────────

    fn dispatch(&mut self, message: WireMessage, now: i64) -> Result<Vec<ConnectionEffect>> {
        debug!(kind = message.kind(), phase = self.phase.name(), "dispatch");
        let phase = self.phase.clone();
        match (phase, message) {
            (
                ConnectionPhase::AwaitingIdentityClaim,
                WireMessage::Hello {
                    identity_claim,
                    proof,
                    encryption_key,
                },
            ) => self.on_hello(identity_claim, proof, encryption_key, now),

            (ConnectionPhase::Authenticating, WireMessage::AcceptInvitation { serialized_graph }) => {
                self.on_admission(&serialized_graph, now)
            }

            (ConnectionPhase::Authenticating, WireMessage::ChallengeIdentity { challenge }) => {
                let signature = self.keypair.sign(&challenge_message(&challenge));
                let mut effects = Vec::new();
                self.transmit(WireMessage::ProveIdentity { signature }, &mut effects);
                Ok(effects)
            }

            (ConnectionPhase::Authenticating, WireMessage::ProveIdentity { signature }) => {
                self.on_proof_of_identity(signature, now)
            }

            (ConnectionPhase::Authenticating, WireMessage::AcceptIdentity) => {
                self.peer_accepted_us = true;
                self.maybe_negotiate(now)
            }

            (ConnectionPhase::Negotiating, WireMessage::Seed {
                encrypted_seed,
                nonce,
            }) => self.on_seed(&encrypted_seed, &nonce, now),

            (
                ConnectionPhase::Synchronizing | ConnectionPhase::Connected,
                WireMessage::Sync { payload } | WireMessage::LocalUpdate { payload },
            ) => self.on_sync(payload, now),

            (ConnectionPhase::Connected, WireMessage::EncryptedMessage { nonce, ciphertext }) => {
                let session = self
                    .session
                    .as_ref()
                    .ok_or_else(|| ProtocolError::Encryption("no session key".into()))?;
                let plaintext = session.decrypt(&ciphertext, &nonce)?;
                Ok(vec![ConnectionEffect::Emit(ConnectionEvent::Message(
                    plaintext,
                ))])
            }

            // A reported error is recorded and never echoed back.
            (_, WireMessage::Error { message }) => {
                warn!(peer_error = %message, "peer reported failure");
                Ok(vec![self
                    .enter_disconnected(format!("peer reported an error: {message}"))])
            }

            (_, WireMessage::Disconnect) => {
                Ok(vec![self.enter_disconnected("closed by peer".into())])
            }

            (phase, message) => Err(ProtocolError::UnexpectedMessage {
                state: phase.name().into(),
                message: message.kind().into(),
            }),
        }
    }

    fn on_hello(
        &mut self,
        identity_claim: Option<IdentityClaim>,
        proof: Option<coterie_team::InvitationProof>,
        encryption_key: X25519PublicKey,
        now: i64,
    ) -> Result<Vec<ConnectionEffect>> {
        self.peer_encryption_key = Some(encryption_key);
        let claim = identity_claim.ok_or_else(|| ProtocolError::UnexpectedMessage {
            state: self.phase.name().into(),
            message: "hello without identity claim".into(),
        })?;
        self.peer_id = Some(claim.member_id);
        self.phase = ConnectionPhase::Authenticating;
        self.set_deadline(now, "authentication");

        match (self.invitation.is_some(), proof) {
            (true, Some(_)) => Err(ProtocolError::NeitherIsMember),

            (true, None) => {
                // We hold the invitation; the member side will deliver the
                // graph once our proof checks out.
                self.awaiting_admission = true;
                Ok(Vec::new())
            }

            (false, Some(proof)) => {
                let graph = self.member_graph()?;
                let state = TeamState::from_graph(graph)?;
                let status = state
                    .invitation(&proof.id)
                    .ok_or(ProtocolError::InvalidProof)?;
                if !status.is_open()
                    || !validate_proof(&proof, &status.record, &claim.member_id)
                {
                    return Err(ProtocolError::InvalidProof);
                }

                info!(invitee = %claim.member_id, invitation = %proof.id, "admitting invitee");
                let action = TeamAction::AdmitMember {
                    member: Member::new(claim.member_id, claim.name.clone()),
                    invitation_id: proof.id,
                };
                let admitted = graph.append(action.to_bytes()?, &self.keypair, now);
                let serialized_graph = admitted.save();
                self.graph = Some(admitted);

                let mut effects = vec![ConnectionEffect::Emit(ConnectionEvent::Updated)];
                self.transmit(
                    WireMessage::AcceptInvitation { serialized_graph },
                    &mut effects,
                );
                effects.extend(self.issue_challenge()?);
                Ok(effects)
            }

            (false, None) => {
                // Member to member: the claimed key must already be on the team.
                let state = TeamState::from_graph(self.member_graph()?)?;
                if !state.is_member(&claim.member_id) {
                    return Err(ProtocolError::IdentityChallengeFailed);
                }
                self.issue_challenge()
            }
        }
    }

    fn on_admission(&mut self, serialized_graph: &[u8], _now: i64) -> Result<Vec<ConnectionEffect>> {
        if !self.awaiting_admission {
            return Err(ProtocolError::UnexpectedMessage {
                state: self.phase.name().into(),
                message: "accept-invitation".into(),
            });
        }
        let graph = HashGraph::load(serialized_graph)?;
        validate(&graph)?;
        let state = TeamState::from_graph(&graph)?;

        // Wrong-team protection: the delivered graph must record the very
        // invitation we hold, and must now list us as a member.
        let seed = self
            .invitation
            .as_ref()
            .ok_or(ProtocolError::WrongTeam)?;
        let our_invitation = InvitationId::derive(&seed.keypair().public_key());
        if state.invitation(&our_invitation).is_none()
            || !state.is_member(&self.keypair.public_key())
        {
            return Err(ProtocolError::WrongTeam);
        }

        info!(team = state.team_name(), "admitted to team");
        self.graph = Some(graph);
        self.awaiting_admission = false;

        let mut effects = vec![ConnectionEffect::Emit(ConnectionEvent::Updated)];
        effects.extend(self.issue_challenge()?);
        Ok(effects)
    }

    fn on_proof_of_identity(
        &mut self,
        signature: SignatureBytes,
        now: i64,
    ) -> Result<Vec<ConnectionEffect>> {
        let challenge = self
            .sent_challenge
            .ok_or(ProtocolError::IdentityChallengeFailed)?;
        let peer = self.peer_id.ok_or(ProtocolError::IdentityChallengeFailed)?;
        if !peer.verify(&challenge_message(&challenge), &signature) {
            return Err(ProtocolError::IdentityChallengeFailed);
        }
        self.verified_peer = true;
        let mut effects = Vec::new();
        self.transmit(WireMessage::AcceptIdentity, &mut effects);
        effects.extend(self.maybe_negotiate(now)?);
        Ok(effects)
    }

    /// Both identity sub-processes run in parallel; move on once the peer has
    /// proven itself to us and accepted our proof.
    fn maybe_negotiate(&mut self, now: i64) -> Result<Vec<ConnectionEffect>> {
        if !(self.verified_peer && self.peer_accepted_us && !self.awaiting_admission) {
            return Ok(Vec::new());
        }
        self.phase = ConnectionPhase::Negotiating;
        self.set_deadline(now, "seed exchange");

        let peer_key = self
            .peer_encryption_key
            .ok_or_else(|| ProtocolError::Encryption("peer encryption key unknown".into()))?;
        let transport = self.secret.seed_transport_key(&peer_key);
        let nonce = EncryptionNonce::generate();
        let encrypted_seed = transport.encrypt(&self.our_seed.0, &nonce)?;

        let mut effects = Vec::new();
        self.transmit(
            WireMessage::Seed {
                encrypted_seed,
                nonce,
            },
            &mut effects,
        );
        Ok(effects)
    }

    fn on_seed(
        &mut self,
        encrypted_seed: &[u8],
        nonce: &EncryptionNonce,
        now: i64,
    ) -> Result<Vec<ConnectionEffect>> {
        let peer_key = self
            .peer_encryption_key
            .ok_or_else(|| ProtocolError::Encryption("peer encryption key unknown".into()))?;
        let transport = self.secret.seed_transport_key(&peer_key);
        let seed_bytes = transport.decrypt(encrypted_seed, nonce)?;
        let seed_bytes: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| ProtocolError::Encryption("seed has wrong length".into()))?;
        let theirs = SessionSeed::from_bytes(seed_bytes);
        self.session = Some(session_key(&self.our_seed, &theirs));

        self.phase = ConnectionPhase::Synchronizing;
        self.set_deadline(now, "synchronization");
        debug!("session key established, synchronizing");

        let mut effects = Vec::new();
        if let Some(graph) = &self.graph {
            if let Some(payload) = generate_message(graph, &mut self.sync_state, &self.config.sync)
            {
                self.transmit(WireMessage::Sync { payload }, &mut effects);
            }
        }
        Ok(effects)
    }

    fn on_sync(
        &mut self,
        payload: coterie_sync::SyncPayload,
        now: i64,
    ) -> Result<Vec<ConnectionEffect>> {
        let mut graph = self.member_graph()?.clone();
        let mut effects = Vec::new();

        if let Some(merged) = receive_message(&graph, &mut self.sync_state, payload, &self.config.sync)? {
            graph = merged.clone();
            self.graph = Some(merged);
            effects.push(ConnectionEffect::Emit(ConnectionEvent::Updated));
            self.enforce_peer_membership()?;
        }

        if let Some(reply) = generate_message(&graph, &mut self.sync_state, &self.config.sync) {
            let message = if self.phase == ConnectionPhase::Connected {
                WireMessage::LocalUpdate { payload: reply }
            } else {
                WireMessage::Sync { payload: reply }
            };
            self.transmit(message, &mut effects);
        }

        if self.phase == ConnectionPhase::Synchronizing {
            let head = graph.head();
            if self.sync_state.last_common_head == Some(head)
                && self.sync_state.our_head == Some(head)
            {
                self.phase = ConnectionPhase::Connected;
                self.deadline = None;
                info!(%head, "synchronized, connection established");
                effects.push(ConnectionEffect::Emit(ConnectionEvent::Connected));
            } else {
                self.set_deadline(now, "synchronization");
            }
        }
        Ok(effects)
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn member_graph(&self) -> Result<&HashGraph> {
        self.graph.as_ref().ok_or_else(|| ProtocolError::UnexpectedMessage {
            state: self.phase.name().into(),
            message: "graph operation before admission".into(),
        })
    }

    fn enforce_peer_membership(&mut self) -> Result<()> {
        let (Some(graph), Some(peer)) = (&self.graph, self.peer_id) else {
            return Ok(());
        };
        let state = TeamState::from_graph(graph)?;
        if state.is_member(&peer) {
            Ok(())
        } else {
            warn!(%peer, "peer is no longer a team member");
            Err(ProtocolError::PeerRemoved)
        }
    }

    fn issue_challenge(&mut self) -> Result<Vec<ConnectionEffect>> {
        let challenge = coterie_core::random_bytes();
        self.sent_challenge = Some(challenge);
        let mut effects = Vec::new();
        self.transmit(WireMessage::ChallengeIdentity { challenge }, &mut effects);
        Ok(effects)
    }

    fn transmit(&mut self, message: WireMessage, effects: &mut Vec<ConnectionEffect>) {
        if let Some(envelope) = self.delivery.send(message) {
            effects.push(ConnectionEffect::Transmit(envelope));
        }
    }

    /// Report a local failure to the peer and shut down.
    fn fail(&mut self, error: ProtocolError) -> Vec<ConnectionEffect> {
        warn!(%error, phase = self.phase.name(), "connection failed");
        let mut effects = Vec::new();
        self.transmit(
            WireMessage::Error {
                message: error.to_string(),
            },
            &mut effects,
        );
        self.transmit(WireMessage::Disconnect, &mut effects);
        effects.push(self.enter_disconnected(error.to_string()));
        effects
    }

    fn enter_disconnected(&mut self, reason: String) -> ConnectionEffect {
        self.phase = ConnectionPhase::Disconnected {
            reason: reason.clone(),
        };
        self.deadline = None;
        self.delivery.stop();
        ConnectionEffect::Emit(ConnectionEvent::Disconnected { reason })
    }

    fn set_deadline(&mut self, now: i64, what: &'static str) {
        self.deadline = Some((now + self.config.await_timeout_ms, what));
    }
}

fn challenge_message(challenge: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(CHALLENGE_CONTEXT.len() + 32);
    message.extend_from_slice(CHALLENGE_CONTEXT);
    message.extend_from_slice(challenge);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use coterie_team::InvitationRecord;

    fn team_action(action: &TeamAction) -> Bytes {
        action.to_bytes().unwrap()
    }

    /// A founded team with the given extra members added by the founder.
    fn team(founder: &Keypair, members: &[(&Keypair, &str)]) -> HashGraph {
        let mut graph = HashGraph::found(
            team_action(&TeamAction::Found {
                team_name: "ops".into(),
                founder: Member::new(founder.public_key(), "alice"),
            }),
            founder,
            0,
        );
        for (i, (keypair, name)) in members.iter().enumerate() {
            graph = graph.append(
                team_action(&TeamAction::AddMember {
                    member: Member::new(keypair.public_key(), *name),
                }),
                founder,
                (i as i64 + 1) * 10,
            );
        }
        graph
    }

    fn post_invitation(graph: &HashGraph, by: &Keypair, record: InvitationRecord) -> HashGraph {
        graph.append(
            team_action(&TeamAction::PostInvitation { invitation: record }),
            by,
            100,
        )
    }

    /// Ferry effects between two connections until both go quiet. Returns the
    /// events each side emitted.
    fn pump(
        a: &mut Connection,
        b: &mut Connection,
        now: i64,
    ) -> (Vec<ConnectionEvent>, Vec<ConnectionEvent>) {
        let mut a_events = Vec::new();
        let mut b_events = Vec::new();
        let mut to_b: Vec<Envelope> = Vec::new();
        let mut to_a: Vec<Envelope> = Vec::new();

        let mut split = |effects: Vec<ConnectionEffect>,
                         wire: &mut Vec<Envelope>,
                         events: &mut Vec<ConnectionEvent>| {
            for effect in effects {
                match effect {
                    ConnectionEffect::Transmit(env) => wire.push(env),
                    ConnectionEffect::Emit(event) => events.push(event),
                }
            }
        };

        split(a.start(now), &mut to_b, &mut a_events);
        split(b.start(now), &mut to_a, &mut b_events);

        for _ in 0..100 {
            if to_a.is_empty() && to_b.is_empty() {
                break;
            }
            for env in std::mem::take(&mut to_b) {
                split(b.handle(env, now), &mut to_a, &mut b_events);
            }
            for env in std::mem::take(&mut to_a) {
                split(a.handle(env, now), &mut to_b, &mut a_events);
            }
        }
        (a_events, b_events)
    }

    #[test]
    fn test_member_to_member_handshake() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = team(&alice, &[(&bob, "bob")]);

        let mut a = Connection::as_member(alice, "alice", graph.clone(), Default::default());
        let mut b = Connection::as_member(bob, "bob", graph, Default::default());

        let (a_events, b_events) = pump(&mut a, &mut b, 0);
        assert!(a_events.contains(&ConnectionEvent::Connected), "{a_events:?}");
        assert!(b_events.contains(&ConnectionEvent::Connected), "{b_events:?}");
        assert!(a.is_connected() && b.is_connected());
        assert_eq!(a.session_key(), b.session_key());
        assert!(a.session_key().is_some());
    }

    #[test]
    fn test_divergent_members_converge_on_connect() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let base = team(&alice, &[(&bob, "bob")]);

        let a_graph = base.append(
            team_action(&TeamAction::AddRole { role: "ops".into() }),
            &alice,
            50,
        );
        let b_graph = base.append(
            team_action(&TeamAction::AddRole { role: "dev".into() }),
            &bob,
            50,
        );

        let mut a = Connection::as_member(alice, "alice", a_graph, Default::default());
        let mut b = Connection::as_member(bob, "bob", b_graph, Default::default());
        pump(&mut a, &mut b, 0);

        assert!(a.is_connected() && b.is_connected());
        let (ga, gb) = (a.graph().unwrap(), b.graph().unwrap());
        assert_eq!(ga.head(), gb.head());
        assert_eq!(ga.links(), gb.links());
    }

    #[test]
    fn test_invitation_admission() {
        let alice = Keypair::from_seed(&[1; 32]);
        let carol = Keypair::from_seed(&[3; 32]);
        let seed = InvitationSeed::from_bytes([9; 16]);
        let graph = post_invitation(&team(&alice, &[]), &alice, seed.record());

        let mut a = Connection::as_member(alice, "alice", graph, Default::default());
        let mut c = Connection::as_invitee(carol.clone(), "carol", seed, Default::default());

        let (a_events, c_events) = pump(&mut a, &mut c, 0);
        assert!(a_events.contains(&ConnectionEvent::Connected), "{a_events:?}");
        assert!(c_events.contains(&ConnectionEvent::Connected), "{c_events:?}");
        assert_eq!(a.session_key(), c.session_key());

        // Carol ends up with the graph, as a member.
        let state = TeamState::from_graph(c.graph().unwrap()).unwrap();
        assert!(state.is_member(&carol.public_key()));
        assert_eq!(a.graph().unwrap().head(), c.graph().unwrap().head());
    }

    #[test]
    fn test_both_invited_fails() {
        let carol = Keypair::from_seed(&[3; 32]);
        let dave = Keypair::from_seed(&[4; 32]);

        let mut c = Connection::as_invitee(
            carol,
            "carol",
            InvitationSeed::from_bytes([9; 16]),
            Default::default(),
        );
        let mut d = Connection::as_invitee(
            dave,
            "dave",
            InvitationSeed::from_bytes([8; 16]),
            Default::default(),
        );

        let (c_events, d_events) = pump(&mut c, &mut d, 0);
        assert!(c_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
        assert!(d_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
        assert!(!c.is_connected() && !d.is_connected());
    }

    #[test]
    fn test_bad_proof_rejected() {
        let alice = Keypair::from_seed(&[1; 32]);
        let carol = Keypair::from_seed(&[3; 32]);
        let posted = InvitationSeed::from_bytes([9; 16]);
        let held = InvitationSeed::from_bytes([7; 16]);
        let graph = post_invitation(&team(&alice, &[]), &alice, posted.record());

        let mut a = Connection::as_member(alice, "alice", graph, Default::default());
        // Carol holds a seed for an invitation that was never posted.
        let mut c = Connection::as_invitee(carol, "carol", held, Default::default());

        let (_, c_events) = pump(&mut a, &mut c, 0);
        assert!(c_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
        assert!(!a.is_connected());
    }

    #[test]
    fn test_impostor_fails_identity_challenge() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let mallory = Keypair::from_seed(&[9; 32]);
        let graph = team(&alice, &[(&bob, "bob")]);

        let mut a = Connection::as_member(alice, "alice", graph.clone(), Default::default());
        // Mallory presents bob's graph but cannot sign with bob's key. The
        // claim carries mallory's own key, which is not on the team.
        let mut m = Connection::as_member(mallory, "bob", graph, Default::default());

        let (a_events, _) = pump(&mut a, &mut m, 0);
        assert!(!a.is_connected());
        assert!(a_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
    }

    #[test]
    fn test_mid_session_removal_disconnects() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = team(&alice, &[(&bob, "bob")]);

        let mut a = Connection::as_member(alice.clone(), "alice", graph.clone(), Default::default());
        let mut b = Connection::as_member(bob.clone(), "bob", graph, Default::default());
        pump(&mut a, &mut b, 0);
        assert!(a.is_connected() && b.is_connected());

        // Alice removes bob locally and pushes the update.
        let removed = a.graph().unwrap().append(
            team_action(&TeamAction::RemoveMember {
                id: bob.public_key(),
            }),
            &alice,
            200,
        );
        let effects = a.local_update(removed, 200);

        let mut to_b: Vec<Envelope> = Vec::new();
        let mut a_events = Vec::new();
        for effect in effects {
            match effect {
                ConnectionEffect::Transmit(env) => to_b.push(env),
                ConnectionEffect::Emit(event) => a_events.push(event),
            }
        }
        assert!(a_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));

        let mut b_events = Vec::new();
        for env in to_b {
            for effect in b.handle(env, 200) {
                if let ConnectionEffect::Emit(event) = effect {
                    b_events.push(event);
                }
            }
        }
        // Bob learns of the removal and the disconnect.
        assert!(b_events.contains(&ConnectionEvent::Updated));
        assert!(b_events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
        assert!(!b.is_connected());
    }

    #[test]
    fn test_application_messages_roundtrip() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = team(&alice, &[(&bob, "bob")]);

        let mut a = Connection::as_member(alice, "alice", graph.clone(), Default::default());
        let mut b = Connection::as_member(bob, "bob", graph, Default::default());
        pump(&mut a, &mut b, 0);

        let effects = a.send_message(b"deploy at noon").unwrap();
        let mut delivered = Vec::new();
        for effect in effects {
            if let ConnectionEffect::Transmit(env) = effect {
                for eff in b.handle(env, 10) {
                    if let ConnectionEffect::Emit(ConnectionEvent::Message(data)) = eff {
                        delivered.push(data);
                    }
                }
            }
        }
        assert_eq!(delivered, vec![b"deploy at noon".to_vec()]);
    }

    #[test]
    fn test_handshake_timeout() {
        let alice = Keypair::from_seed(&[1; 32]);
        let graph = team(&alice, &[]);
        let mut a = Connection::as_member(alice, "alice", graph, Default::default());

        a.start(0);
        // Nothing arrives within the window.
        assert!(a.tick(6999).is_empty());
        let effects = a.tick(7000);
        assert!(effects
            .iter()
            .any(|e| matches!(e, ConnectionEffect::Emit(ConnectionEvent::Disconnected { .. }))));
        assert!(matches!(a.phase(), ConnectionPhase::Disconnected { .. }));
    }

    #[test]
    fn test_lost_envelope_recovered_via_resend() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = team(&alice, &[(&bob, "bob")]);

        let mut a = Connection::as_member(alice, "alice", graph.clone(), Default::default());
        let mut b = Connection::as_member(bob, "bob", graph, Default::default());

        // Drop alice's first envelope (the hello), deliver the rest.
        let mut a_out: Vec<Envelope> = a
            .start(0)
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEffect::Transmit(env) => Some(env),
                _ => None,
            })
            .collect();
        let lost = a_out.remove(0);
        let mut b_out: Vec<Envelope> = b
            .start(0)
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEffect::Transmit(env) => Some(env),
                _ => None,
            })
            .collect();

        // Alice processes bob's hello; bob got nothing deliverable yet.
        for env in std::mem::take(&mut b_out) {
            for eff in a.handle(env, 0) {
                if let ConnectionEffect::Transmit(env) = eff {
                    a_out.push(env);
                }
            }
        }
        for env in std::mem::take(&mut a_out) {
            b.handle(env, 0);
        }

        // Bob's resend timer fires and asks for envelope 0.
        let requests: Vec<Envelope> = b
            .tick(1000)
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEffect::Transmit(env) => Some(env),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_control());

        // Alice retransmits; bob can now proceed.
        let mut retransmitted = Vec::new();
        for env in requests {
            for eff in a.handle(env, 1000) {
                if let ConnectionEffect::Transmit(env) = eff {
                    retransmitted.push(env);
                }
            }
        }
        assert_eq!(retransmitted.len(), 1);
        assert_eq!(retransmitted[0], lost);
        let effects = b.handle(retransmitted[0].clone(), 1000);
        assert!(!effects.is_empty());
    }
}
