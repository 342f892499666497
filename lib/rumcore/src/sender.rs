//! Generic UDP sender module (`sender/udp`): the built-in module that
//! drains a processor master's output queue and writes each surviving
//! client a datagram, mirroring `listener.rs`'s `tmwait`-driven thread body
//! but over a single shared outbound socket instead of per-listener ones.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::UdpSocket;

use crate::core::ReflectorCore;
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::Metadata;
use crate::module::{ModuleInterface, ModuleParam};
use crate::queue::{Queue, QueueGroup};

pub struct UdpSender {
    core: Arc<ReflectorCore>,
    name: String,
    bind_addr: String,
    input: Arc<Queue<Metadata>>,
    socket: Option<UdpSocket>,
    group: Arc<QueueGroup>,
}

impl UdpSender {
    pub fn new(core: Arc<ReflectorCore>, name: impl Into<String>, bind_addr: impl Into<String>, input: Arc<Queue<Metadata>>) -> UdpSender {
        let group = Arc::new(QueueGroup::new());
        input.join(&group);
        UdpSender {
            core,
            name: name.into(),
            bind_addr: bind_addr.into(),
            input,
            socket: None,
            group,
        }
    }

    /// Factory entry point for the static registry: parameters are
    /// `[bind]`, the local address the shared outbound socket binds to.
    pub fn from_params(core: Arc<ReflectorCore>, input: Arc<Queue<Metadata>>, params: &[ModuleParam]) -> Result<UdpSender> {
        let bind = params
            .iter()
            .find(|p| p.name == "bind")
            .map(|p| p.value.clone())
            .ok_or_else(|| Error::new(ErrorKind::SenderInit))?;
        Ok(UdpSender::new(core, format!("udp-{}", bind), bind, input))
    }

    /// Writes one metadata's packet to each still-valid client, reflecting
    /// to the client's address on its listener's bind port, then drops the
    /// metadata (releasing its packet reference).
    fn send_one(&self, socket: &UdpSocket, meta: Metadata) {
        let buffer = meta.packet().buffer();
        for i in 0..meta.client_count() {
            if !meta.mask_get(i) {
                continue;
            }
            let client = match meta.client(i) {
                Some(client) => client,
                None => continue,
            };
            let session = match self.core.sessions.session(client.listener_id) {
                Ok(session) => session,
                Err(_) => continue,
            };
            let addr = SocketAddr::new(client.address, session.reflect_port());
            match socket.send_to(buffer, &addr) {
                Ok(sent) => session.inc_sent(sent as u64),
                Err(_) => continue,
            }
        }
    }
}

impl ModuleInterface for UdpSender {
    fn init(&mut self) -> Result<()> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| Error::wrap(ErrorKind::SenderInit, io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let socket = UdpSocket::bind(&addr).map_err(|e| Error::wrap(ErrorKind::SenderInit, e))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn main(&mut self, stop_flag: &AtomicBool) {
        while !stop_flag.load(Ordering::Relaxed) {
            if !self.group.tmwait(std::time::Duration::from_millis(250)) {
                continue;
            }
            if let Some(socket) = self.socket.take() {
                while let Some(meta) = self.input.pop() {
                    self.send_one(&socket, meta);
                }
                self.socket = Some(socket);
            }
        }
    }

    fn clean(&mut self, _for_restart: bool) {
        self.socket = None;
    }
}
