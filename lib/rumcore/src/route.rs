//! AAA/routing module: wraps the best-matching-prefix trie to answer
//! access-control checks and to compose processor path rules.

use std::net::Ipv4Addr;
use std::sync::RwLock;

use crate::error::Result;
use crate::trie::Trie;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

/// Access-control + path-rule tables, each a single reader/writer-
/// serialised trie per the concurrency model in §5.
pub struct RoutingTable {
    acl: RwLock<Trie<Access>>,
    path_rules: RwLock<Trie<Vec<String>>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable {
            acl: RwLock::new(Trie::new()),
            path_rules: RwLock::new(Trie::new()),
        }
    }

    pub fn set_acl(&self, network: Ipv4Addr, prefix_bits: u8, access: Access) -> Result<()> {
        self.acl.write().unwrap().insert(network, prefix_bits, access)
    }

    pub fn remove_acl(&self, network: Ipv4Addr, prefix_bits: u8) -> Result<()> {
        self.acl.write().unwrap().remove(network, prefix_bits)
    }

    /// Checks a client's access permission by longest-prefix match;
    /// unmatched addresses default to `Deny`.
    pub fn acl_check(&self, client: Ipv4Addr) -> Access {
        self.acl.read().unwrap().find(client).copied().unwrap_or(Access::Deny)
    }

    pub fn set_path_rule(&self, destination: Ipv4Addr, prefix_bits: u8, processors: Vec<String>) -> Result<()> {
        self.path_rules.write().unwrap().insert(destination, prefix_bits, processors)
    }

    /// Resolves the processor-name sequence for `destination` by longest-
    /// prefix match, or `None` if no rule matches (meaning "direct to
    /// sender").
    pub fn path_rule(&self, destination: Ipv4Addr) -> Option<Vec<String>> {
        self.path_rules.read().unwrap().find(destination).cloned()
    }
}

impl Default for RoutingTable {
    fn default() -> RoutingTable {
        RoutingTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_client_is_denied_by_default() {
        let table = RoutingTable::new();
        assert_eq!(table.acl_check("203.0.113.1".parse().unwrap()), Access::Deny);
    }

    #[test]
    fn more_specific_acl_wins() {
        let table = RoutingTable::new();
        table.set_acl("10.0.0.0".parse().unwrap(), 8, Access::Deny).unwrap();
        table.set_acl("10.0.0.0".parse().unwrap(), 24, Access::Allow).unwrap();
        assert_eq!(table.acl_check("10.0.0.5".parse().unwrap()), Access::Allow);
        assert_eq!(table.acl_check("10.5.0.5".parse().unwrap()), Access::Deny);
    }

    #[test]
    fn path_rule_resolves_processor_sequence() {
        let table = RoutingTable::new();
        table.set_path_rule("10.1.0.0".parse().unwrap(), 16, vec!["filter".to_owned()]).unwrap();
        assert_eq!(table.path_rule("10.1.2.3".parse().unwrap()), Some(vec!["filter".to_owned()]));
        assert_eq!(table.path_rule("10.2.0.1".parse().unwrap()), None);
    }

    #[test]
    fn acl_rejects_prefix_shorter_than_one_stride() {
        let table = RoutingTable::new();
        assert!(table.set_acl("8.0.0.0".parse().unwrap(), 2, Access::Allow).is_err());
    }
}
