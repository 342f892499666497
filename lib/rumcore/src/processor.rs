//! Processor master: resolves and memoises processor paths, and dispatches
//! metadata through them, advancing `next_node` as each stage completes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::metadata::Metadata;
use crate::path::{Path, PathKey};

/// A single pipeline stage. Implementations mutate the metadata mask (and
/// may rewrite the packet via `PacketRef::make_writable`) in place.
pub trait Processor: Send + Sync {
    fn process(&self, meta: &mut Metadata);
}

/// Resolves `(source, destination, listener)` into processor paths and
/// walks metadata through them, one stage per call to `dispatch`'s inner
/// loop.
pub struct ProcessorMaster {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
    paths: RwLock<HashMap<PathKey, Path>>,
}

impl ProcessorMaster {
    pub fn new() -> ProcessorMaster {
        ProcessorMaster {
            processors: RwLock::new(HashMap::new()),
            paths: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.write().unwrap().insert(name.into(), processor);
    }

    /// Returns the memoised path for `key`, building it via `build` on a
    /// cache miss. `build` is only invoked once per distinct key.
    pub fn path_for(&self, key: PathKey, build: impl FnOnce() -> Path) -> Path {
        if let Some(path) = self.paths.read().unwrap().get(&key) {
            return path.clone();
        }
        let path = build();
        self.paths.write().unwrap().insert(key, path.clone());
        path
    }

    /// Runs `meta` through its processor path(s) to completion, returning
    /// the metadata segments ready for the sender (their path exhausted or
    /// empty). Partitions a mixed fan-out by per-client path before
    /// walking, per the dispatch algorithm in the specification.
    pub fn dispatch(&self, meta: Metadata) -> Vec<Metadata> {
        let mut finished = Vec::new();
        for group in meta.partition_by_path() {
            finished.push(self.walk(group));
        }
        finished
    }

    fn walk(&self, mut meta: Metadata) -> Metadata {
        loop {
            let path = match meta.path_for(0) {
                Some(path) => path.clone(),
                None => break,
            };
            if meta.next_node() >= path.len() {
                break;
            }
            let node = &path.nodes()[meta.next_node()];
            if let Some(processor) = self.processors.read().unwrap().get(node.name.as_ref()) {
                processor.process(&mut meta);
            }
            meta.advance();
        }
        meta
    }
}

impl Default for ProcessorMaster {
    fn default() -> ProcessorMaster {
        ProcessorMaster::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ClientDescriptor;
    use crate::packet::{Packet, PacketRef};
    use crate::path::PathNode;
    use std::sync::Arc;

    struct UppercaseFirstByte;
    impl Processor for UppercaseFirstByte {
        fn process(&self, meta: &mut Metadata) {
            let rewritten = meta.packet().clone().make_writable(|orig| {
                let mut buffer = orig.buffer().to_vec();
                if let Some(first) = buffer.first_mut() {
                    *first = first.to_ascii_uppercase();
                }
                Packet::new(orig.session_id, orig.receive_port, orig.listener_name.clone(), orig.sender_addr, buffer)
            });
            *meta = Metadata::new(rewritten, meta.clients().to_vec());
        }
    }

    fn packet_ref(buffer: &[u8]) -> PacketRef {
        PacketRef::new(Packet::new(1, 1234, "udp-0".to_owned(), "127.0.0.1:9".parse().unwrap(), buffer.to_vec()))
    }

    fn client(ip: &str) -> ClientDescriptor {
        ClientDescriptor {
            address: ip.parse().unwrap(),
            last_seen: 0,
            listener_id: 0,
            permanent: false,
        }
    }

    #[test]
    fn dispatch_runs_single_stage_path_to_completion() {
        let master = ProcessorMaster::new();
        master.register_processor("upper", Arc::new(UppercaseFirstByte));

        let path = Path::new(vec![PathNode {
            handle: 1,
            name: Arc::from("upper"),
        }])
        .unwrap();

        let mut meta = Metadata::new(packet_ref(b"hello"), vec![client("10.0.0.1")]);
        meta.set_path_for(0, Some(path));

        let mut finished = master.dispatch(meta);
        assert_eq!(finished.len(), 1);
        let meta = finished.remove(0);
        assert_eq!(meta.next_node(), 1);
        assert_eq!(meta.packet().buffer(), b"Hello");
    }

    #[test]
    fn empty_path_passes_straight_through() {
        let master = ProcessorMaster::new();
        let meta = Metadata::new(packet_ref(b"hello"), vec![client("10.0.0.1")]);
        let finished = master.dispatch(meta);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].next_node(), 0);
    }

    #[test]
    fn path_for_memoises_build() {
        let master = ProcessorMaster::new();
        let key = PathKey {
            source: "10.0.0.1".parse().unwrap(),
            destination: "10.0.0.2".parse().unwrap(),
            listener_id: 0,
        };
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let build = move || {
            calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Path::empty()
        };
        let _ = master.path_for(key.clone(), build.clone());
        let _ = master.path_for(key, build);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
