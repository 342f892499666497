//! Session and client-list layer: per-listener membership, admission,
//! stale-client eviction, and change notification.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, ErrorKind, Result};
use crate::module::ModuleEvent;

/// One subscribed client of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub address: IpAddr,
    pub last_seen: u64,
    pub permanent: bool,
}

struct SessionState {
    listener_id: u32,
    listener_name: String,
    reflect_port: u16,
    clients: Vec<Client>,
    bytes_received: u64,
    bytes_sent: u64,
}

/// The administrative grouping owned by one listener identity: client
/// list, byte counters, and a mutex serialising all access to both.
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    fn new(listener_id: u32, listener_name: String, reflect_port: u16) -> Session {
        Session {
            state: Mutex::new(SessionState {
                listener_id,
                listener_name,
                reflect_port,
                clients: Vec::new(),
                bytes_received: 0,
                bytes_sent: 0,
            }),
        }
    }

    pub fn listener_id(&self) -> u32 {
        self.state.lock().unwrap().listener_id
    }

    pub fn listener_name(&self) -> String {
        self.state.lock().unwrap().listener_name.clone()
    }

    /// The port clients of this session are reflected to; set once at
    /// listener registration time to the listener's own bind port
    /// (reflection is symmetric: a client is addressed on the same port
    /// it was heard on).
    pub fn reflect_port(&self) -> u16 {
        self.state.lock().unwrap().reflect_port
    }

    /// Adds or refreshes a client. Returns `true` iff a new client was
    /// inserted (membership changed); returns `false` if this call only
    /// refreshed `last_seen` on an already-present client.
    pub fn client_add(&self, address: IpAddr, last_seen: u64, permanent: bool) -> bool {
        let mut state = flux::debug_lock!(self.state);
        if let Some(existing) = state.clients.iter_mut().find(|c| c.address == address) {
            existing.last_seen = last_seen;
            false
        } else {
            state.clients.push(Client {
                address,
                last_seen,
                permanent,
            });
            true
        }
    }

    /// Removes the first client whose address matches `address` under the
    /// prefix implied by `mask_bits` (32 for an exact host match).
    pub fn client_remove(&self, address: IpAddr, mask_bits: u8) -> bool {
        let mut state = flux::debug_lock!(self.state);
        if let Some(pos) = state.clients.iter().position(|c| address_matches(c.address, address, mask_bits)) {
            state.clients.remove(pos);
            true
        } else {
            false
        }
    }

    /// Returns a freshly-allocated snapshot of the current client list.
    pub fn client_list_copy(&self) -> Vec<Client> {
        self.state.lock().unwrap().clients.clone()
    }

    /// Removes non-permanent clients whose `last_seen <= cutoff`. Returns
    /// the number of clients removed.
    pub fn evict_stale(&self, cutoff: u64) -> usize {
        let mut state = flux::debug_lock!(self.state);
        let before = state.clients.len();
        state.clients.retain(|c| c.permanent || c.last_seen > cutoff);
        before - state.clients.len()
    }

    pub fn inc_received(&self, bytes: u64) {
        self.state.lock().unwrap().bytes_received += bytes;
    }

    pub fn inc_sent(&self, bytes: u64) {
        self.state.lock().unwrap().bytes_sent += bytes;
    }

    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.bytes_received, state.bytes_sent)
    }
}

fn address_matches(candidate: IpAddr, target: IpAddr, mask_bits: u8) -> bool {
    match (candidate, target) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let mask: u32 = if mask_bits == 0 { 0 } else { !0u32 << (32 - mask_bits.min(32)) };
            (u32::from(a) & mask) == (u32::from(b) & mask)
        }
        _ => candidate == target,
    }
}

/// A handler invoked when a session's client list changes. Must not call
/// back into `SessionRegistry`/`Session` methods to avoid deadlock.
pub type ChangeHandler = dyn Fn(u32, &ModuleEvent) + Send + Sync;

/// Owns every session, keyed by listener id, and fans out client-list
/// change notifications.
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
    next_listener_id: Mutex<u32>,
    handlers: RwLock<Vec<Arc<ChangeHandler>>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry {
            sessions: RwLock::new(Vec::new()),
            next_listener_id: Mutex::new(0),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_handler(&self, handler: Arc<ChangeHandler>) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Registers a new listener identity and returns its freshly assigned
    /// listener id. `reflect_port` is the port clients of this listener
    /// are reflected back to.
    pub fn register_listener(&self, listener_name: impl Into<String>, reflect_port: u16) -> u32 {
        let id = {
            let mut next = self.next_listener_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let session = Arc::new(Session::new(id, listener_name.into(), reflect_port));
        self.sessions.write().unwrap().push(session);
        id
    }

    pub fn session(&self, listener_id: u32) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .find(|s| s.listener_id() == listener_id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::SessionNew))
    }

    /// Resolves a listener's administrative name (e.g.
    /// `udp-0.0.0.0:1234`) to its listener id, for wire-format `Target`
    /// headers that name a module rather than a numeric id.
    pub fn find_by_name(&self, listener_name: &str) -> Option<u32> {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .find(|s| s.listener_name() == listener_name)
            .map(|s| s.listener_id())
    }

    /// Adds/refreshes a client and fires `on_change` iff membership
    /// actually changed.
    pub fn client_add(&self, listener_id: u32, address: IpAddr, last_seen: u64, permanent: bool) -> Result<bool> {
        let session = self.session(listener_id)?;
        let changed = session.client_add(address, last_seen, permanent);
        if changed {
            self.on_change(listener_id);
        }
        Ok(changed)
    }

    /// Removes the first client matching `address`/`mask_bits` and fires
    /// `on_change` iff a client was actually removed.
    pub fn client_remove(&self, listener_id: u32, address: IpAddr, mask_bits: u8) -> Result<bool> {
        let session = self.session(listener_id)?;
        let removed = session.client_remove(address, mask_bits);
        if removed {
            self.on_change(listener_id);
        }
        Ok(removed)
    }

    pub fn evict_stale(&self, listener_id: u32, cutoff: u64) -> Result<usize> {
        let session = self.session(listener_id)?;
        let removed = session.evict_stale(cutoff);
        if removed > 0 {
            self.on_change(listener_id);
        }
        Ok(removed)
    }

    fn on_change(&self, listener_id: u32) {
        let event = ModuleEvent::ClientListChanged { listener_id };
        for handler in self.handlers.read().unwrap().iter() {
            handler(listener_id, &event);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> SessionRegistry {
        SessionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn client_add_is_idempotent_but_refreshes_last_seen() {
        let session = Session::new(0, "udp-0".to_owned(), 1234);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(session.client_add(addr, 10, false));
        assert!(!session.client_add(addr, 20, false));
        assert_eq!(session.client_list_copy()[0].last_seen, 20);
    }

    #[test]
    fn eviction_scenario_s6() {
        let session = Session::new(0, "udp-0".to_owned(), 1234);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let c: IpAddr = "10.0.0.3".parse().unwrap();
        session.client_add(a, 10, false);
        session.client_add(b, 20, false);
        session.client_add(c, 0, true);

        let removed = session.evict_stale(15);
        assert_eq!(removed, 1);

        let remaining: Vec<IpAddr> = session.client_list_copy().iter().map(|c| c.address).collect();
        assert_eq!(remaining, vec![b, c]);
    }

    #[test]
    fn on_change_fires_exactly_once_per_eviction_batch() {
        let registry = SessionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        registry.register_handler(Arc::new(move |_id, _event| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));

        let listener_id = registry.register_listener("udp-0", 1234);
        registry.client_add(listener_id, "10.0.0.1".parse().unwrap(), 10, false).unwrap();
        registry.client_add(listener_id, "10.0.0.2".parse().unwrap(), 20, false).unwrap();
        registry.client_add(listener_id, "10.0.0.3".parse().unwrap(), 0, true).unwrap();

        registry.evict_stale(listener_id, 15).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 4);
        let remaining = registry.session(listener_id).unwrap().client_list_copy();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn client_remove_matches_exact_host() {
        let session = Session::new(0, "udp-0".to_owned(), 1234);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        session.client_add(addr, 0, false);
        assert!(session.client_remove(addr, 32));
        assert!(session.client_list_copy().is_empty());
    }
}
