//! Immutable, reference-counted processor path: an ordered tuple of up to
//! `MAX_PATH_LEN` processor module handles, memoised by the processor
//! master per `(source_ip, destination_ip, listener_id)`.

use std::net::IpAddr;
use std::sync::Arc;

/// Compile-time bound on path length (`L` in the specification).
pub const MAX_PATH_LEN: usize = 5;

/// One hop in a processor path: the handle used to push metadata plus the
/// module's name (co-located so path consumers never need a second lookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub handle: u32,
    pub name: Arc<str>,
}

/// An immutable, shareable ordered sequence of processor hops. Cloning is
/// cheap (an `Arc` bump); content never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(Arc<[PathNode]>);

impl Path {
    /// The empty path means "send directly to the sender".
    pub fn empty() -> Path {
        Path(Arc::from(Vec::new().into_boxed_slice()))
    }

    pub fn new(nodes: Vec<PathNode>) -> Result<Path, crate::error::Error> {
        if nodes.len() > MAX_PATH_LEN {
            return Err(crate::error::ErrorKind::ProcessorTooMany.into());
        }
        Ok(Path(Arc::from(nodes.into_boxed_slice())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&PathNode> {
        self.0.get(index)
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.0
    }
}

/// Key used to memoise resolved paths: source and destination address plus
/// the listener that originated the packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub listener_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_has_zero_length() {
        let path = Path::empty();
        assert!(path.is_empty());
        assert_eq!(path.len(), 0);
    }

    #[test]
    fn path_rejects_too_many_nodes() {
        let nodes = (0..(MAX_PATH_LEN + 1))
            .map(|i| PathNode {
                handle: i as u32,
                name: Arc::from(format!("processor-{}", i)),
            })
            .collect();
        assert!(Path::new(nodes).is_err());
    }

    #[test]
    fn equal_paths_compare_equal() {
        let a = Path::new(vec![PathNode {
            handle: 1,
            name: Arc::from("filter"),
        }])
        .unwrap();
        let b = a.clone();
        assert_eq!(a, b);
    }
}
