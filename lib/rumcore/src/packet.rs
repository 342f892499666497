//! Shared, reference-counted packet payload with copy-on-write mutation.
//!
//! A `Packet` is the immutable unit of payload sharing across a fan-out:
//! every `Metadata` segment referencing the same bytes holds one
//! `PacketRef`, and releasing the last `PacketRef` frees the payload.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The immutable payload shared across fan-out copies. Once a packet's
/// reference count exceeds one, none of these fields may change; the only
/// path to a mutable copy is `PacketRef::make_writable`.
pub struct Packet {
    pub session_id: u64,
    pub receive_port: u16,
    pub listener_name: String,
    pub sender_addr: SocketAddr,
    buffer: Vec<u8>,
    refcount: AtomicUsize,
}

impl Packet {
    pub fn new(
        session_id: u64,
        receive_port: u16,
        listener_name: String,
        sender_addr: SocketAddr,
        buffer: Vec<u8>,
    ) -> Packet {
        Packet {
            session_id,
            receive_port,
            listener_name,
            sender_addr,
            buffer,
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }
}

/// A reference-counted handle to a `Packet`. `retain`/`release` are the
/// only operations that touch the shared count; cloning a handle is the
/// Rust-idiomatic spelling of `retain`.
pub struct PacketRef(Arc<Packet>);

impl PacketRef {
    /// Creates the first reference to a freshly allocated packet (refcount
    /// becomes 1).
    pub fn new(packet: Packet) -> PacketRef {
        packet.refcount.store(1, Ordering::SeqCst);
        PacketRef(Arc::new(packet))
    }

    pub fn refcount(&self) -> usize {
        self.0.refcount()
    }

    /// Returns an owning copy of this handle, atomically incrementing the
    /// shared reference count (`packet.retain()`).
    pub fn retain(&self) -> PacketRef {
        self.0.refcount.fetch_add(1, Ordering::SeqCst);
        PacketRef(self.0.clone())
    }

    /// If the reference count is 1, returns `self` unchanged (the sole
    /// owner may mutate freely via `copy_fn(orig, new)` with `orig == new`).
    /// Otherwise allocates a new packet via `copy_fn`, releases one count
    /// from the original, and returns a fresh, uniquely-owned handle.
    pub fn make_writable(self, copy_fn: impl FnOnce(&Packet) -> Packet) -> PacketRef {
        if self.refcount() == 1 {
            return self;
        }
        let new_packet = copy_fn(&self.0);
        // `self` is dropped at the end of this scope, releasing one count
        // from the original via `Drop`.
        PacketRef::new(new_packet)
    }
}

impl Clone for PacketRef {
    /// Cloning a handle is a `retain`: it bumps the shared refcount.
    fn clone(&self) -> PacketRef {
        self.retain()
    }
}

impl Drop for PacketRef {
    fn drop(&mut self) {
        self.0.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::ops::Deref for PacketRef {
    type Target = Packet;

    fn deref(&self) -> &Packet {
        &self.0
    }
}
