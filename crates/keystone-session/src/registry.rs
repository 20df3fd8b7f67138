//! The session registry: the authoritative set of live sessions.
//!
//! Every connection task looks sessions up on every packet, so the two
//! indices (by session id and by account id) are split into shards, each
//! behind its own `RwLock`. Two tasks only contend when their keys land in
//! the same shard.
//!
//! # Lock order
//!
//! session state mutex → account shard. The id shards are never held
//! while taking either of the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    AccountId, ChallengeTransform, ChannelHandle, HandshakeState, IdentityEcho, Session, SessionError,
    SessionId, SessionState, generate_handshake_key, now_ms,
};

const SHARDS: usize = 16;

/// What happens when an account logs in while another session already
/// holds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateLoginPolicy {
    /// The older session is removed and closed; the new one wins.
    #[default]
    EvictExisting,
    /// The new session is refused with
    /// [`SessionError::AccountAlreadyBound`].
    RejectNew,
}

/// Concurrent index of live sessions.
///
/// Shared between all connection tasks as `Arc<SessionRegistry>`.
pub struct SessionRegistry {
    next_id: AtomicU64,
    by_id: Vec<RwLock<HashMap<SessionId, Arc<Session>>>>,
    by_account: Vec<RwLock<HashMap<AccountId, SessionId>>>,
    transform: Arc<dyn ChallengeTransform>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Creates an empty registry whose clients echo the challenge as is.
    pub fn new() -> Self {
        Self::with_transform(IdentityEcho)
    }

    /// Creates an empty registry using `transform` to compute the echo
    /// each new session expects.
    pub fn with_transform<T: ChallengeTransform>(transform: T) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_id: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            by_account: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            transform: Arc::new(transform),
        }
    }

    fn id_shard(&self, id: SessionId) -> &RwLock<HashMap<SessionId, Arc<Session>>> {
        &self.by_id[(id.0 % SHARDS as u64) as usize]
    }

    fn account_shard(&self, account: AccountId) -> &RwLock<HashMap<AccountId, SessionId>> {
        &self.by_account[(account.0 % SHARDS as u64) as usize]
    }

    /// Registers a new session with a freshly drawn handshake key.
    pub fn create(&self, channel: ChannelHandle) -> Arc<Session> {
        let key = generate_handshake_key(&mut rand::rng());
        self.create_with_key(channel, key)
    }

    /// Registers a new session challenged with `key`.
    ///
    /// The session is fully built before it becomes visible, so a
    /// concurrent lookup either misses it or sees it complete.
    pub fn create_with_key(&self, channel: ChannelHandle, key: u32) -> Arc<Session> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handshake = HandshakeState::new(key, self.transform.expected_echo(key), now_ms());
        let session = Arc::new(Session::new(id, channel, SessionState::new(handshake)));

        self.id_shard(id).write().insert(id, Arc::clone(&session));
        info!(%id, conn = %session.channel().connection(), "session created");
        session
    }

    pub fn get_by_id(&self, id: SessionId) -> Option<Arc<Session>> {
        self.id_shard(id).read().get(&id).cloned()
    }

    pub fn get_by_account_id(&self, account: AccountId) -> Option<Arc<Session>> {
        let id = self.account_shard(account).read().get(&account).copied()?;
        self.get_by_id(id)
    }

    /// Associates `account` with session `id`.
    ///
    /// If another live session already holds the account, `policy`
    /// decides: with [`DuplicateLoginPolicy::EvictExisting`] that session
    /// is removed, closed, and returned; with
    /// [`DuplicateLoginPolicy::RejectNew`] this call fails.
    ///
    /// Binding a session to the account it already holds is a no-op.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if `id` is not live.
    /// - [`SessionError::SessionBound`] if `id` holds a different account.
    /// - [`SessionError::AccountAlreadyBound`] under `RejectNew`.
    pub fn bind_account(
        &self,
        id: SessionId,
        account: AccountId,
        policy: DuplicateLoginPolicy,
    ) -> Result<Option<Arc<Session>>, SessionError> {
        let session = self.get_by_id(id).ok_or(SessionError::NotFound(id))?;

        let displaced = {
            let mut state = session.lock();
            if state.detached {
                return Err(SessionError::NotFound(id));
            }
            match state.account_id() {
                Some(bound) if bound == account => return Ok(None),
                Some(bound) => {
                    return Err(SessionError::SessionBound {
                        session: id,
                        account: bound,
                    });
                }
                None => {}
            }

            let mut shard = self.account_shard(account).write();
            let displaced = match shard.get(&account).copied() {
                Some(existing) if existing != id => match policy {
                    DuplicateLoginPolicy::RejectNew => {
                        return Err(SessionError::AccountAlreadyBound {
                            account,
                            session: existing,
                        });
                    }
                    DuplicateLoginPolicy::EvictExisting => Some(existing),
                },
                _ => None,
            };
            shard.insert(account, id);
            state.set_account(account);
            displaced
        };

        info!(%id, %account, "account bound");

        let evicted = displaced.and_then(|old| {
            let evicted = self.remove(old)?;
            evicted.close();
            warn!(%account, evicted = %old, by = %id, "duplicate login, evicted older session");
            Some(evicted)
        });
        Ok(evicted)
    }

    /// Removes a session from both indices.
    ///
    /// Does not touch the transport; see [`close`](Self::close) for that.
    /// Returns `None` if the session was not present.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.id_shard(id).write().remove(&id)?;

        let account = {
            let mut state = session.lock();
            state.detached = true;
            state.account_id()
        };
        if let Some(account) = account {
            let mut shard = self.account_shard(account).write();
            // A newer session may already own the account.
            if shard.get(&account) == Some(&id) {
                shard.remove(&account);
            }
        }

        debug!(%id, "session removed");
        Some(session)
    }

    /// Removes the session and tells its connection task to shut down.
    ///
    /// Safe to call from any task and any number of times; only the first
    /// call for a live session returns `true`.
    pub fn close(&self, id: SessionId) -> bool {
        match self.remove(id) {
            Some(session) => {
                session.close();
                info!(%id, "session closed");
                true
            }
            None => false,
        }
    }

    /// [`close`](Self::close) for the session bound to `account`.
    pub fn close_by_account_id(&self, account: AccountId) -> bool {
        let Some(id) = self.account_shard(account).read().get(&account).copied() else {
            return false;
        };
        self.close(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.by_id.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of live session ids, in ascending order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .by_id
            .iter()
            .flat_map(|shard| shard.read().keys().copied().collect::<Vec<_>>())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_protocol::Packet;
    use keystone_transport::ConnectionId;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn channel() -> (ChannelHandle, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelHandle::new(ConnectionId::next(), tx, CancellationToken::new()), rx)
    }

    #[test]
    fn test_create_assigns_increasing_ids() {
        let registry = SessionRegistry::new();
        let a = registry.create(channel().0);
        let b = registry.create(channel().0);
        assert_eq!(a.id(), SessionId(1));
        assert_eq!(b.id(), SessionId(2));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.session_ids(), [SessionId(1), SessionId(2)]);
    }

    #[test]
    fn test_create_concurrently_yields_distinct_ids() {
        let registry = SessionRegistry::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        registry.create(channel().0);
                    }
                });
            }
        });

        let ids = registry.session_ids();
        assert_eq!(ids.len(), 800);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_create_with_key_applies_transform() {
        struct Inverted;
        impl ChallengeTransform for Inverted {
            fn expected_echo(&self, challenge: u32) -> u32 {
                !challenge
            }
        }

        let registry = SessionRegistry::with_transform(Inverted);
        let session = registry.create_with_key(channel().0, 0xA1B2_C3D4);
        let state = session.lock();
        assert_eq!(state.handshake.server_key(), 0xA1B2_C3D4);
        assert_eq!(state.handshake.client_key_expected(), !0xA1B2_C3D4);
    }

    #[test]
    fn test_bind_account_then_lookup_returns_same_session() {
        let registry = SessionRegistry::new();
        let session = registry.create(channel().0);

        let evicted = registry
            .bind_account(session.id(), AccountId(77), DuplicateLoginPolicy::EvictExisting)
            .unwrap();
        assert!(evicted.is_none());

        let found = registry.get_by_account_id(AccountId(77)).unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert_eq!(session.account_id(), Some(AccountId(77)));
    }

    #[test]
    fn test_bind_account_same_account_twice_is_noop() {
        let registry = SessionRegistry::new();
        let id = registry.create(channel().0).id();
        let policy = DuplicateLoginPolicy::RejectNew;
        registry.bind_account(id, AccountId(1), policy).unwrap();
        assert!(matches!(registry.bind_account(id, AccountId(1), policy), Ok(None)));
    }

    #[test]
    fn test_bind_account_different_account_returns_error() {
        let registry = SessionRegistry::new();
        let id = registry.create(channel().0).id();
        let policy = DuplicateLoginPolicy::EvictExisting;
        registry.bind_account(id, AccountId(1), policy).unwrap();

        let err = registry.bind_account(id, AccountId(2), policy).unwrap_err();
        assert_eq!(
            err,
            SessionError::SessionBound {
                session: id,
                account: AccountId(1)
            }
        );
        assert!(registry.get_by_account_id(AccountId(2)).is_none());
    }

    #[test]
    fn test_bind_account_evict_existing_closes_older_session() {
        let registry = SessionRegistry::new();
        let old = registry.create(channel().0);
        let new = registry.create(channel().0);
        let policy = DuplicateLoginPolicy::EvictExisting;

        registry.bind_account(old.id(), AccountId(9), policy).unwrap();
        let evicted = registry.bind_account(new.id(), AccountId(9), policy).unwrap().unwrap();

        assert_eq!(evicted.id(), old.id());
        assert!(old.is_closed());
        assert!(registry.get_by_id(old.id()).is_none());
        assert_eq!(registry.get_by_account_id(AccountId(9)).unwrap().id(), new.id());
    }

    #[test]
    fn test_bind_account_reject_new_keeps_older_session() {
        let registry = SessionRegistry::new();
        let old = registry.create(channel().0);
        let new = registry.create(channel().0);
        let policy = DuplicateLoginPolicy::RejectNew;

        registry.bind_account(old.id(), AccountId(9), policy).unwrap();
        let err = registry.bind_account(new.id(), AccountId(9), policy).unwrap_err();

        assert_eq!(
            err,
            SessionError::AccountAlreadyBound {
                account: AccountId(9),
                session: old.id()
            }
        );
        assert!(!old.is_closed());
        assert_eq!(new.account_id(), None);
    }

    #[test]
    fn test_bind_account_unknown_session_returns_not_found() {
        let registry = SessionRegistry::new();
        let err = registry
            .bind_account(SessionId(42), AccountId(1), DuplicateLoginPolicy::default())
            .unwrap_err();
        assert_eq!(err, SessionError::NotFound(SessionId(42)));
    }

    #[test]
    fn test_remove_clears_both_indices() {
        let registry = SessionRegistry::new();
        let session = registry.create(channel().0);
        registry
            .bind_account(session.id(), AccountId(5), DuplicateLoginPolicy::default())
            .unwrap();

        assert!(registry.remove(session.id()).is_some());
        assert!(registry.get_by_id(session.id()).is_none());
        assert!(registry.get_by_account_id(AccountId(5)).is_none());
        // Remove alone does not signal the connection.
        assert!(!session.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry.create(channel().0);

        assert!(registry.close(session.id()));
        assert!(!registry.close(session.id()));
        assert!(session.is_closed());
    }

    #[test]
    fn test_close_by_account_id_closes_bound_session() {
        let registry = SessionRegistry::new();
        let session = registry.create(channel().0);
        registry
            .bind_account(session.id(), AccountId(3), DuplicateLoginPolicy::default())
            .unwrap();

        assert!(registry.close_by_account_id(AccountId(3)));
        assert!(session.is_closed());
        assert!(!registry.close_by_account_id(AccountId(3)));
    }

    #[test]
    fn test_bind_account_after_remove_returns_not_found() {
        let registry = SessionRegistry::new();
        let session = registry.create(channel().0);
        registry.remove(session.id());

        assert!(registry
            .bind_account(session.id(), AccountId(1), DuplicateLoginPolicy::default())
            .is_err());
        assert!(registry.get_by_account_id(AccountId(1)).is_none());
    }
}
