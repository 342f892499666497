//! Per fan-out mutable metadata: a pointer to the shared packet, a
//! fixed-size client descriptor array, a validity bitmask, a path cursor,
//! and per-client processor paths.

use std::net::IpAddr;

use crate::packet::PacketRef;
use crate::path::Path;

/// A client a metadata record may deliver to.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub address: IpAddr,
    pub last_seen: u64,
    pub listener_id: u32,
    pub permanent: bool,
}

/// One fan-out segment in flight: a packet reference, the clients it may
/// still reach, and each client's remaining processor path.
pub struct Metadata {
    packet: PacketRef,
    clients: Vec<ClientDescriptor>,
    mask: Vec<bool>,
    paths: Vec<Option<Path>>,
    next_node: usize,
    pub profile_enqueued_at: Option<u64>,
}

impl Metadata {
    /// Allocates a metadata block for `clients`, all initially valid.
    /// Transfers ownership of the supplied `PacketRef` — it does **not**
    /// additionally `retain()`; the caller must already hold the count it
    /// is handing over.
    pub fn new(packet: PacketRef, clients: Vec<ClientDescriptor>) -> Metadata {
        let count = clients.len();
        Metadata {
            packet,
            clients,
            mask: vec![true; count],
            paths: vec![None; count],
            next_node: 0,
            profile_enqueued_at: None,
        }
    }

    pub fn packet(&self) -> &PacketRef {
        &self.packet
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, index: usize) -> Option<&ClientDescriptor> {
        self.clients.get(index)
    }

    pub fn clients(&self) -> &[ClientDescriptor] {
        &self.clients
    }

    /// Out-of-range indices silently return `false`, matching the original
    /// bitmask semantics.
    pub fn mask_get(&self, index: usize) -> bool {
        self.mask.get(index).copied().unwrap_or(false)
    }

    /// Out-of-range indices are a silent no-op.
    pub fn mask_set(&mut self, index: usize, valid: bool) {
        if let Some(slot) = self.mask.get_mut(index) {
            *slot = valid;
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|v| **v).count()
    }

    pub fn path_for(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).and_then(|p| p.as_ref())
    }

    pub fn set_path_for(&mut self, index: usize, path: Option<Path>) {
        if let Some(slot) = self.paths.get_mut(index) {
            *slot = path;
        }
    }

    pub fn next_node(&self) -> usize {
        self.next_node
    }

    pub fn advance(&mut self) {
        self.next_node += 1;
    }

    /// Deep copy: duplicates client descriptors, mask, and path slots, and
    /// bumps the packet's reference count (`packet.retain()`), since the
    /// original metadata keeps its own reference.
    pub fn copy(&self) -> Metadata {
        Metadata {
            packet: self.packet.retain(),
            clients: self.clients.clone(),
            mask: self.mask.clone(),
            paths: self.paths.clone(),
            next_node: self.next_node,
            profile_enqueued_at: self.profile_enqueued_at,
        }
    }

    /// Splits this metadata into groups of client indices that share the
    /// same path, consuming `self`. Used by the processor master to
    /// dispatch a mixed fan-out without walking each client individually.
    ///
    /// `self` holds exactly one reference to the packet on entry; each
    /// returned group retains its own, and `self`'s reference is released
    /// when it drops at the end of this call, so the net effect is one
    /// reference per returned group.
    pub fn partition_by_path(self) -> Vec<Metadata> {
        if self.clients.len() <= 1 {
            return vec![self];
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        'outer: for i in 0..self.clients.len() {
            for group in groups.iter_mut() {
                let rep = group[0];
                if self.paths[rep] == self.paths[i] {
                    group.push(i);
                    continue 'outer;
                }
            }
            groups.push(vec![i]);
        }

        if groups.len() == 1 {
            return vec![self];
        }

        groups
            .into_iter()
            .map(|group| Metadata {
                packet: self.packet.retain(),
                clients: group.iter().map(|&i| self.clients[i].clone()).collect(),
                mask: group.iter().map(|&i| self.mask[i]).collect(),
                paths: group.iter().map(|&i| self.paths[i].clone()).collect(),
                next_node: self.next_node,
                profile_enqueued_at: self.profile_enqueued_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    fn client(ip: &str) -> ClientDescriptor {
        ClientDescriptor {
            address: ip.parse().unwrap(),
            last_seen: 0,
            listener_id: 0,
            permanent: false,
        }
    }

    fn packet() -> PacketRef {
        PacketRef::new(Packet::new(
            1,
            1234,
            "udp-0".to_owned(),
            "127.0.0.1:9999".parse().unwrap(),
            b"HELLO".to_vec(),
        ))
    }

    #[test]
    fn mask_out_of_range_is_noop() {
        let meta = Metadata::new(packet(), vec![client("10.0.0.1")]);
        assert!(!meta.mask_get(5));
        let mut meta = meta;
        meta.mask_set(5, true);
        assert!(!meta.mask_get(5));
    }

    #[test]
    fn copy_bumps_packet_refcount() {
        let meta = Metadata::new(packet(), vec![client("10.0.0.1")]);
        assert_eq!(meta.packet().refcount(), 1);
        let copied = meta.copy();
        assert_eq!(meta.packet().refcount(), 2);
        assert_eq!(copied.packet().refcount(), 2);
    }

    #[test]
    fn mask_set_disables_single_client() {
        let mut meta = Metadata::new(packet(), vec![client("10.0.0.1")]);
        meta.mask_set(0, false);
        assert_eq!(meta.valid_count(), 0);
    }
}
