//! Core processing fabric for the packet reflector: module lifecycle,
//! queues, packet/metadata ownership, the best-matching-prefix trie,
//! processor dispatch, routing, and the client/session registry.

pub mod core;
pub mod error;
pub mod listener;
pub mod management;
pub mod metadata;
pub mod module;
pub mod msg_interface;
pub mod packet;
pub mod path;
pub mod processor;
pub mod processors;
pub mod queue;
pub mod readiness;
pub mod registry;
pub mod route;
pub mod sender;
pub mod session;
pub mod sync_gate;
pub mod trie;

pub use core::ReflectorCore;
pub use error::{Error, ErrorKind, Result};
pub use listener::UdpListener;
pub use management::ManagementMaster;
pub use metadata::{ClientDescriptor, Metadata};
pub use module::{
    LifecycleState, ModuleClass, ModuleEvent, ModuleFactory, ModuleId, ModuleInterface, ModuleParam, ModuleRuntime,
    StaticRegistry, MODULE_VERSION,
};
pub use msg_interface::RapTcpInterface;
pub use packet::{Packet, PacketRef};
pub use path::{Path, PathKey, PathNode, MAX_PATH_LEN};
pub use processor::{Processor, ProcessorMaster};
pub use queue::{Queue, QueueGroup, QueueGroupWaker};
pub use readiness::ReadinessBridge;
pub use registry::register_builtins;
pub use route::{Access, RoutingTable};
pub use sender::UdpSender;
pub use session::{Client, Session, SessionRegistry};
pub use sync_gate::SyncGate;
pub use trie::Trie;
