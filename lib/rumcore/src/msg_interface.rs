//! Generic RAP/TCP networking front-end (`msg-interface/rap-tcp`): accepts
//! connections, frames requests off each one with `rap::parse_request`, and
//! forwards them to the management master. Per the "only contract" in §9:
//! every request that arrives is eventually handed to the management
//! master, and every response is written back to the connection it came
//! from in arrival order — guaranteed here because one connection is
//! served end-to-end by one thread, so request and response order on the
//! wire is just the thread's own call order.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use mio::net::TcpListener;
use mio::Token;

use crate::error::{Error, ErrorKind, Result};
use crate::management::ManagementMaster;
use crate::module::{ModuleInterface, ModuleParam};
use crate::queue::QueueGroup;
use crate::readiness::ReadinessBridge;

const READ_CHUNK: usize = 4096;

pub struct RapTcpInterface {
    master: Arc<ManagementMaster>,
    readiness: Arc<ReadinessBridge>,
    bind_addr: String,
    listener: Option<TcpListener>,
    group: Arc<QueueGroup>,
    connections: Vec<thread::JoinHandle<()>>,
    token: Option<Token>,
}

impl RapTcpInterface {
    pub fn new(master: Arc<ManagementMaster>, readiness: Arc<ReadinessBridge>, bind_addr: impl Into<String>) -> RapTcpInterface {
        RapTcpInterface {
            master,
            readiness,
            bind_addr: bind_addr.into(),
            listener: None,
            group: Arc::new(QueueGroup::new()),
            connections: Vec::new(),
            token: None,
        }
    }

    /// Factory entry point for the static registry: parameters are
    /// `[bind]`.
    pub fn from_params(master: Arc<ManagementMaster>, readiness: Arc<ReadinessBridge>, params: &[ModuleParam]) -> Result<RapTcpInterface> {
        let bind = params
            .iter()
            .find(|p| p.name == "bind")
            .map(|p| p.value.clone())
            .ok_or_else(|| Error::new(ErrorKind::AdminIfaceParameters))?;
        Ok(RapTcpInterface::new(master, readiness, bind))
    }

    fn accept_loop(&mut self, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn spawn_connection(&mut self, stream: mio::net::TcpStream, peer: SocketAddr) {
        // mio 0.6 sockets are non-blocking; a per-connection thread wants
        // ordinary blocking reads/writes, so hand the raw fd to std.
        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
        if std_stream.set_nonblocking(false).is_err() {
            return;
        }
        let master = self.master.clone();
        self.connections.push(thread::spawn(move || serve_connection(master, std_stream, peer)));
    }
}

fn serve_connection(master: Arc<ManagementMaster>, mut stream: std::net::TcpStream, _peer: SocketAddr) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        buf.extend_from_slice(&chunk[..read]);

        loop {
            match rap::parse_request(&buf) {
                Ok(rap::ParseOutcome::Complete { request, consumed }) => {
                    let response = master.handle(&request);
                    if stream.write_all(&response.encode()).is_err() {
                        return;
                    }
                    buf.drain(..consumed);
                }
                Ok(rap::ParseOutcome::Incomplete) => break,
                Err(_) => {
                    let response = rap::Response::new(400);
                    let _ = stream.write_all(&response.encode());
                    return;
                }
            }
        }
    }
}

impl ModuleInterface for RapTcpInterface {
    fn init(&mut self) -> Result<()> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| Error::wrap(ErrorKind::AdminIfaceParameters, std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let listener = TcpListener::bind(&addr).map_err(|e| Error::wrap(ErrorKind::AdminIfaceInit, e))?;
        let token = self.readiness.next_token();
        self.readiness
            .register(&listener, token, self.group.waker())
            .map_err(|e| Error::wrap(ErrorKind::AdminIfaceInit, e))?;
        self.token = Some(token);
        self.listener = Some(listener);
        Ok(())
    }

    fn main(&mut self, stop_flag: &AtomicBool) {
        while !stop_flag.load(Ordering::Relaxed) {
            if !self.group.tmwait(std::time::Duration::from_millis(250)) {
                continue;
            }
            if let Some(listener) = self.listener.take() {
                self.accept_loop(&listener);
                self.listener = Some(listener);
            }
        }
    }

    fn clean(&mut self, _for_restart: bool) {
        if let Some(listener) = self.listener.take() {
            if let Some(token) = self.token.take() {
                let _ = self.readiness.deregister(&listener, token);
            }
        }
        for handle in self.connections.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReflectorCore;

    fn master() -> Arc<ManagementMaster> {
        Arc::new(ManagementMaster::new(ReflectorCore::new().unwrap(), flux::logging::discard()))
    }

    #[test]
    fn from_params_requires_bind() {
        let readiness = ReadinessBridge::new().unwrap();
        let err = RapTcpInterface::from_params(master(), readiness, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AdminIfaceParameters);
    }

    #[test]
    fn serves_a_keep_alive_request_over_a_real_socket() {
        let readiness = ReadinessBridge::new().unwrap();
        let mut iface = RapTcpInterface::from_params(
            master(),
            readiness.clone(),
            &[ModuleParam::new("bind", "admin bind address", "127.0.0.1:0")],
        )
        .unwrap();
        iface.init().unwrap();
        let addr = iface.listener.as_ref().unwrap().local_addr().unwrap();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag2 = stop_flag.clone();
        let handle = thread::spawn(move || iface.main(&stop_flag2));

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client.write_all(b"KEEP-ALIVE RAP/1.0\r\n\r\n").unwrap();

        let mut response = [0u8; 64];
        let n = client.read(&mut response).unwrap();
        let text = String::from_utf8_lossy(&response[..n]);
        assert!(text.starts_with("200 RAP/1.0\r\n"));

        stop_flag.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
