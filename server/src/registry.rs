//! Process-wide record of live connections and their nicknames.
//!
//! Three mappings are kept in step (connection to address, connection to
//! nickname, nickname to address) alongside each connection's outbound queue
//! and the file-transfer routes. Everything sits behind one mutex so compound
//! check-then-update steps are atomic with respect to other client tasks.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::outbound::{Outbound, StreamCredit};
use crate::server_types::{ConnId, Target};

#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

#[derive(Default)]
pub struct RegistryState {
    // connections still awaiting a nickname
    pending: HashMap<ConnId, SocketAddr>,
    outbound: HashMap<ConnId, Outbound>,
    conn_addr: HashMap<ConnId, SocketAddr>,
    conn_nick: HashMap<ConnId, String>,
    nick_addr: BTreeMap<String, SocketAddr>,
    // sender -> recipient resolved by user lookup
    sessions: HashMap<ConnId, ConnId>,
    // recipient -> sender of the latest offer it was shown
    offers: HashMap<ConnId, ConnId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly accepted connection. It can be written to but
    /// receives no broadcasts until it has a nickname.
    pub async fn register(&self, conn: ConnId, addr: SocketAddr, outbound: Outbound) {
        let mut state = self.state.lock().await;
        state.pending.insert(conn, addr);
        state.outbound.insert(conn, outbound);
    }

    /// Assigns `nickname` to a pending connection, returning false if the
    /// name is empty, already taken, or the connection is not pending.
    pub async fn set_nickname(&self, conn: ConnId, nickname: &str) -> bool {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return false;
        }

        let mut state = self.state.lock().await;
        if state.nick_addr.contains_key(nickname) || state.conn_nick.contains_key(&conn) {
            return false;
        }

        let addr = match state.pending.remove(&conn) {
            Some(addr) => addr,
            None => return false,
        };

        state.conn_addr.insert(conn, addr);
        state.conn_nick.insert(conn, nickname.to_owned());
        state.nick_addr.insert(nickname.to_owned(), addr);
        true
    }

    pub async fn lookup(&self, nickname: &str) -> Option<ConnId> {
        let state = self.state.lock().await;
        state
            .conn_nick
            .iter()
            .find(|(_, n)| n.as_str() == nickname)
            .map(|(c, _)| *c)
    }

    pub async fn nickname(&self, conn: ConnId) -> Option<String> {
        self.state.lock().await.conn_nick.get(&conn).cloned()
    }

    /// True while `conn` is a registered, named connection.
    pub async fn contains(&self, conn: ConnId) -> bool {
        self.state.lock().await.conn_nick.contains_key(&conn)
    }

    /// Nickname to address pairs, ordered by nickname.
    pub async fn status_snapshot(&self) -> Vec<(String, SocketAddr)> {
        let state = self.state.lock().await;
        state.nick_addr.iter().map(|(n, a)| (n.clone(), *a)).collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.state.lock().await.nick_addr.keys().cloned().collect()
    }

    /// Resolves `nickname` to another live connection and makes it the
    /// transfer recipient for `requester`. A miss clears any previous one.
    pub async fn lookup_user(&self, requester: ConnId, nickname: &str) -> bool {
        let mut state = self.state.lock().await;

        let found = state
            .conn_nick
            .iter()
            .find(|(c, n)| **c != requester && n.as_str() == nickname)
            .map(|(c, _)| *c);

        match found {
            Some(recipient) => {
                state.sessions.insert(requester, recipient);
                true
            }
            None => {
                state.sessions.remove(&requester);
                false
            }
        }
    }

    pub async fn transfer_recipient(&self, sender: ConnId) -> Option<ConnId> {
        self.state.lock().await.sessions.get(&sender).copied()
    }

    /// Backlog credit of a named connection, for pacing a file stream to it.
    pub async fn stream_credit(&self, conn: ConnId) -> Option<StreamCredit> {
        let state = self.state.lock().await;
        if !state.conn_nick.contains_key(&conn) {
            return None;
        }
        state.outbound.get(&conn).map(Outbound::credit)
    }

    /// Looks up the recipient of `sender`'s offer and remembers the offer
    /// so the recipient's answer can find its way back.
    pub async fn record_offer(&self, sender: ConnId) -> Option<ConnId> {
        let mut state = self.state.lock().await;
        let recipient = state.sessions.get(&sender).copied()?;
        state.offers.insert(recipient, sender);
        Some(recipient)
    }

    /// The sender whose offer `recipient` is answering.
    pub async fn offer_sender(&self, recipient: ConnId) -> Option<ConnId> {
        self.state.lock().await.offers.get(&recipient).copied()
    }

    // fan-out needs the queues and the member list under the same guard
    pub(crate) async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }
}

impl RegistryState {
    pub(crate) fn recipients(&self, origin: ConnId, target: Target) -> Vec<ConnId> {
        match target {
            Target::Others => self.conn_nick.keys().filter(|c| **c != origin).copied().collect(),
            Target::All => self.conn_nick.keys().copied().collect(),
            Target::Recip(Some(conn)) if self.conn_nick.contains_key(&conn) => vec![conn],
            Target::Recip(_) => vec![],
        }
    }

    pub(crate) fn outbound(&self, conn: ConnId) -> Option<&Outbound> {
        self.outbound.get(&conn)
    }

    /// Drops every trace of `conn`, returning its nickname if it had one.
    /// Safe to call more than once.
    pub(crate) fn remove(&mut self, conn: ConnId) -> Option<String> {
        self.pending.remove(&conn);
        self.outbound.remove(&conn);
        self.conn_addr.remove(&conn);

        self.sessions.remove(&conn);
        self.sessions.retain(|_, recipient| *recipient != conn);
        self.offers.remove(&conn);
        self.offers.retain(|_, sender| *sender != conn);

        let nickname = self.conn_nick.remove(&conn)?;
        self.nick_addr.remove(&nickname);
        debug!("removed {} ({}) from registry", conn, nickname);
        Some(nickname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::outbound::Outgoing;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    // returns the queue's receiving end so it stays open for the test's duration
    async fn connect(registry: &Registry, id: u64) -> (ConnId, UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = Outbound::channel();
        let conn = ConnId(id);
        registry.register(conn, addr(5000 + id as u16), outbound).await;
        (conn, rx)
    }

    async fn named(registry: &Registry, id: u64, nick: &str) -> (ConnId, UnboundedReceiver<Outgoing>) {
        let (conn, far) = connect(registry, id).await;
        assert!(registry.set_nickname(conn, nick).await);
        (conn, far)
    }

    #[tokio::test]
    async fn test_pending_connection_is_not_listed() {
        let registry = Registry::new();
        let (conn, _far) = connect(&registry, 1).await;

        assert!(!registry.contains(conn).await);
        assert_eq!(registry.names().await.len(), 0);
        assert!(registry.status_snapshot().await.is_empty());
        assert!(registry.stream_credit(conn).await.is_none());
    }

    #[tokio::test]
    async fn test_set_nickname_populates_all_mappings() {
        let registry = Registry::new();
        let (conn, _far) = named(&registry, 1, "alice").await;

        assert!(registry.contains(conn).await);
        assert_eq!(registry.nickname(conn).await.as_deref(), Some("alice"));
        assert!(registry.stream_credit(conn).await.is_some());
        assert_eq!(registry.lookup("alice").await, Some(conn));
        assert_eq!(registry.status_snapshot().await, vec![("alice".to_owned(), addr(5001))]);
    }

    #[tokio::test]
    async fn test_nickname_collision() {
        let registry = Registry::new();
        let (_alice, _f1) = named(&registry, 1, "alice").await;
        let (other, _f2) = connect(&registry, 2).await;

        assert!(!registry.set_nickname(other, "alice").await);
        assert!(!registry.set_nickname(other, "  alice ").await);
        assert!(!registry.set_nickname(other, "   ").await);
        assert!(!registry.contains(other).await);

        assert!(registry.set_nickname(other, "alicia").await);
        assert_eq!(registry.names().await, vec!["alice".to_owned(), "alicia".to_owned()]);
    }

    #[tokio::test]
    async fn test_connection_cannot_rename() {
        let registry = Registry::new();
        let (conn, _far) = named(&registry, 1, "alice").await;

        assert!(!registry.set_nickname(conn, "alicia").await);
        assert_eq!(registry.lookup("alicia").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_nickname_single_winner() {
        let registry = Registry::new();
        let mut pipes = Vec::new();
        let mut handles = Vec::new();

        for id in 1..=16 {
            let (conn, far) = connect(&registry, id).await;
            pipes.push(far);
            let r = registry.clone();
            handles.push(tokio::spawn(async move { r.set_nickname(conn, "bob").await }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(registry.names().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_complete_and_idempotent() {
        let registry = Registry::new();
        let (alice, _f1) = named(&registry, 1, "alice").await;
        let (bob, _f2) = named(&registry, 2, "bob").await;

        assert_eq!(registry.lock().await.remove(alice).as_deref(), Some("alice"));
        assert_eq!(registry.lock().await.remove(alice), None);

        assert!(!registry.contains(alice).await);
        assert_eq!(registry.lookup("alice").await, None);
        assert!(registry.stream_credit(alice).await.is_none());
        assert!(registry.lock().await.outbound(alice).is_none());
        assert_eq!(registry.names().await, vec!["bob".to_owned()]);
        assert!(registry.contains(bob).await);

        // the name is free again
        let (carol, _f3) = connect(&registry, 3).await;
        assert!(registry.set_nickname(carol, "alice").await);
    }

    #[tokio::test]
    async fn test_remove_pending_connection() {
        let registry = Registry::new();
        let (conn, _far) = connect(&registry, 1).await;

        assert_eq!(registry.lock().await.remove(conn), None);
        assert!(!registry.set_nickname(conn, "ghost").await);
    }

    #[tokio::test]
    async fn test_lookup_user_sets_and_clears_recipient() {
        let registry = Registry::new();
        let (alice, _f1) = named(&registry, 1, "alice").await;
        let (bob, _f2) = named(&registry, 2, "bob").await;

        assert!(registry.lookup_user(alice, "bob").await);
        assert_eq!(registry.transfer_recipient(alice).await, Some(bob));

        assert!(!registry.lookup_user(alice, "carol").await);
        assert_eq!(registry.transfer_recipient(alice).await, None);

        // no self match
        assert!(!registry.lookup_user(alice, "alice").await);
    }

    #[tokio::test]
    async fn test_sessions_are_keyed_per_sender() {
        let registry = Registry::new();
        let (alice, _f1) = named(&registry, 1, "alice").await;
        let (bob, _f2) = named(&registry, 2, "bob").await;
        let (carol, _f3) = named(&registry, 3, "carol").await;
        let (dave, _f4) = named(&registry, 4, "dave").await;

        assert!(registry.lookup_user(alice, "bob").await);
        assert!(registry.lookup_user(carol, "dave").await);

        assert_eq!(registry.record_offer(alice).await, Some(bob));
        assert_eq!(registry.record_offer(carol).await, Some(dave));
        assert_eq!(registry.offer_sender(bob).await, Some(alice));
        assert_eq!(registry.offer_sender(dave).await, Some(carol));
    }

    #[tokio::test]
    async fn test_remove_drops_transfer_routes() {
        let registry = Registry::new();
        let (alice, _f1) = named(&registry, 1, "alice").await;
        let (bob, _f2) = named(&registry, 2, "bob").await;

        registry.lookup_user(alice, "bob").await;
        registry.record_offer(alice).await;

        registry.lock().await.remove(bob);
        assert_eq!(registry.transfer_recipient(alice).await, None);
        assert_eq!(registry.offer_sender(bob).await, None);
    }

    #[tokio::test]
    async fn test_recipients_by_target() {
        let registry = Registry::new();
        let (alice, _f1) = named(&registry, 1, "alice").await;
        let (bob, _f2) = named(&registry, 2, "bob").await;
        let (pending, _f3) = connect(&registry, 3).await;

        let state = registry.lock().await;

        let mut all = state.recipients(alice, Target::All);
        all.sort();
        assert_eq!(all, vec![alice, bob]);
        assert_eq!(state.recipients(alice, Target::Others), vec![bob]);
        assert_eq!(state.recipients(alice, Target::Recip(Some(bob))), vec![bob]);
        assert!(state.recipients(alice, Target::Recip(Some(pending))).is_empty());
        assert!(state.recipients(alice, Target::Recip(None)).is_empty());
    }
}
