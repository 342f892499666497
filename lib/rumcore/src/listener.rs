//! Generic UDP listener module (`listener/udp`): the built-in module that
//! makes the reflector runnable without a concrete media protocol. Binds a
//! non-blocking socket, registers it with the readiness bridge, and on each
//! wake drains datagrams until `WouldBlock`, the way the teacher's
//! `Endpoint::sync` drains a `mio` poll in a `loop { ... WouldBlock => break }`.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::UdpSocket;
use mio::Token;

use crate::core::ReflectorCore;
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{ClientDescriptor, Metadata};
use crate::module::{ModuleInterface, ModuleParam};
use crate::packet::{Packet, PacketRef};
use crate::path::{Path, PathKey, PathNode};
use crate::queue::{Queue, QueueGroup};

const READ_BUFFER_LEN: usize = 64 * 1024;

pub struct UdpListener {
    core: Arc<ReflectorCore>,
    name: String,
    bind_addr: String,
    output: Arc<Queue<Metadata>>,
    socket: Option<UdpSocket>,
    listener_id: Option<u32>,
    group: Arc<QueueGroup>,
    token: Option<Token>,
}

impl UdpListener {
    pub fn new(core: Arc<ReflectorCore>, name: impl Into<String>, bind_addr: impl Into<String>, output: Arc<Queue<Metadata>>) -> UdpListener {
        UdpListener {
            core,
            name: name.into(),
            bind_addr: bind_addr.into(),
            output,
            socket: None,
            listener_id: None,
            group: Arc::new(QueueGroup::new()),
            token: None,
        }
    }

    /// Factory entry point for the static registry: parameters are
    /// `[bind]`. Runtime dependencies come from `core`/`output`, captured by
    /// the closure that calls this at registration time.
    pub fn from_params(core: Arc<ReflectorCore>, output: Arc<Queue<Metadata>>, params: &[ModuleParam]) -> Result<UdpListener> {
        let bind = params
            .iter()
            .find(|p| p.name == "bind")
            .map(|p| p.value.clone())
            .ok_or_else(|| Error::new(ErrorKind::ListenParameters))?;
        Ok(UdpListener::new(core, format!("udp-{}", bind), bind, output))
    }

    fn recv_loop(&mut self, socket: &UdpSocket, listener_id: u32) {
        let mut buffer = vec![0u8; READ_BUFFER_LEN];
        loop {
            match socket.recv_from(&mut buffer) {
                Ok((len, peer)) => self.handle_datagram(listener_id, peer, &buffer[..len]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn handle_datagram(&self, listener_id: u32, peer: SocketAddr, payload: &[u8]) {
        let session = match self.core.sessions.session(listener_id) {
            Ok(session) => session,
            Err(_) => return,
        };
        session.inc_received(payload.len() as u64);

        let packet = PacketRef::new(Packet::new(0, peer.port(), self.name.clone(), peer, payload.to_vec()));

        let clients: Vec<ClientDescriptor> = session
            .client_list_copy()
            .into_iter()
            .map(|c| ClientDescriptor {
                address: c.address,
                last_seen: c.last_seen,
                listener_id,
                permanent: c.permanent,
            })
            .collect();
        if clients.is_empty() {
            return;
        }

        let mut meta = Metadata::new(packet, clients);
        for i in 0..meta.client_count() {
            let destination = meta.client(i).map(|c| c.address).unwrap();
            let key = PathKey {
                source: peer.ip(),
                destination,
                listener_id,
            };
            let core = &self.core;
            let path = core.processors.path_for(key, || resolve_path(core, destination));
            meta.set_path_for(i, Some(path));
        }

        for finished in self.core.processors.dispatch(meta) {
            self.output.push(finished);
        }
    }
}

/// Builds the processor path for `destination` from the routing table's
/// longest-matching path rule, or the empty path ("straight to sender")
/// when no rule matches or the destination isn't an IPv4 address (the
/// trie is IPv4-only, matching the BMP layout in §4.4).
fn resolve_path(core: &ReflectorCore, destination: IpAddr) -> Path {
    let v4 = match destination {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return Path::empty(),
    };
    let names = match core.routing.path_rule(v4) {
        Some(names) => names,
        None => return Path::empty(),
    };
    let nodes: Vec<PathNode> = names
        .into_iter()
        .enumerate()
        .map(|(handle, name)| PathNode {
            handle: handle as u32,
            name: std::sync::Arc::from(name),
        })
        .collect();
    Path::new(nodes).unwrap_or_else(|_| Path::empty())
}

impl ModuleInterface for UdpListener {
    fn init(&mut self) -> Result<()> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| Error::wrap(ErrorKind::ListenParameters, io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let socket = UdpSocket::bind(&addr).map_err(|e| Error::wrap(ErrorKind::ListenerInit, e))?;

        let token = self.core.readiness.next_token();
        self.core
            .readiness
            .register(&socket, token, self.group.waker())
            .map_err(|e| Error::wrap(ErrorKind::ListenerInit, e))?;
        self.token = Some(token);

        let listener_id = self.core.sessions.register_listener(self.name.clone(), addr.port());
        self.listener_id = Some(listener_id);
        self.socket = Some(socket);
        Ok(())
    }

    fn main(&mut self, stop_flag: &AtomicBool) {
        while !stop_flag.load(Ordering::Relaxed) {
            if !self.group.tmwait(std::time::Duration::from_millis(250)) {
                continue;
            }
            let listener_id = match self.listener_id {
                Some(id) => id,
                None => continue,
            };
            if let Some(socket) = self.socket.take() {
                self.recv_loop(&socket, listener_id);
                self.socket = Some(socket);
            }
        }
    }

    fn clean(&mut self, _for_restart: bool) {
        if let Some(socket) = self.socket.take() {
            if let Some(token) = self.token.take() {
                let _ = self.core.readiness.deregister(&socket, token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_params_requires_bind() {
        let core = ReflectorCore::new().unwrap();
        let output = Arc::new(Queue::data(16));
        let err = UdpListener::from_params(core, output, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ListenParameters);
    }

    #[test]
    fn resolve_path_follows_routing_table_rule() {
        let core = ReflectorCore::new().unwrap();
        core.routing
            .set_path_rule("10.1.0.0".parse().unwrap(), 16, vec!["filter".to_owned()]);

        let matched = resolve_path(&core, "10.1.2.3".parse().unwrap());
        assert_eq!(matched.len(), 1);
        assert_eq!(matched.nodes()[0].name.as_ref(), "filter");

        let unmatched = resolve_path(&core, "10.2.0.1".parse().unwrap());
        assert!(unmatched.is_empty());
    }

    #[test]
    fn from_params_derives_name_from_bind() {
        let core = ReflectorCore::new().unwrap();
        let output = Arc::new(Queue::data(16));
        let params = vec![ModuleParam::new("bind", "listen address", "127.0.0.1:0")];
        let listener = UdpListener::from_params(core, output, &params).unwrap();
        assert_eq!(listener.name, "udp-127.0.0.1:0");
    }
}
