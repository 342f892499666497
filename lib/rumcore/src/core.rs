//! The reflector core: the single bundle of shared, reflector-wide state
//! that every stateful built-in module factory closes over. Stands in for
//! the original's global accessor functions (`clients_get`, `queue_get`,
//! ...) with explicit, passed-in ownership instead of process globals.

use std::sync::Arc;

use crate::module::{ModuleRuntime, StaticRegistry};
use crate::processor::ProcessorMaster;
use crate::readiness::ReadinessBridge;
use crate::route::RoutingTable;
use crate::session::SessionRegistry;
use crate::sync_gate::SyncGate;

pub struct ReflectorCore {
    pub registry: Arc<StaticRegistry>,
    pub modules: Arc<ModuleRuntime>,
    pub sessions: Arc<SessionRegistry>,
    pub processors: Arc<ProcessorMaster>,
    pub routing: Arc<RoutingTable>,
    pub readiness: Arc<ReadinessBridge>,
    pub sync_gate: Arc<SyncGate>,
}

impl ReflectorCore {
    pub fn new() -> std::io::Result<Arc<ReflectorCore>> {
        let registry = Arc::new(StaticRegistry::new());
        Ok(Arc::new(ReflectorCore {
            modules: Arc::new(ModuleRuntime::new(registry.clone())),
            registry,
            sessions: Arc::new(SessionRegistry::new()),
            processors: Arc::new(ProcessorMaster::new()),
            routing: Arc::new(RoutingTable::new()),
            readiness: ReadinessBridge::new()?,
            sync_gate: Arc::new(SyncGate::new()),
        }))
    }
}
