//! Populates a `StaticRegistry` with the built-in module factories the
//! reflector ships with out of the box, standing in for the `#[ctor]`
//! self-registration the teacher's plugins use when they are linked
//! statically rather than `dlopen`ed.

use std::sync::Arc;

use crate::core::ReflectorCore;
use crate::listener::UdpListener;
use crate::management::ManagementMaster;
use crate::metadata::Metadata;
use crate::module::{ModuleClass, ModuleInterface};
use crate::msg_interface::RapTcpInterface;
use crate::queue::Queue;
use crate::sender::UdpSender;

/// Registers `listener/udp`, `sender/udp`, and `msg-interface/rap-tcp`
/// against `core.registry`. `pipeline` is the data queue connecting
/// listeners to senders; `master` backs the administrative front-end.
pub fn register_builtins(core: &Arc<ReflectorCore>, master: Arc<ManagementMaster>, pipeline: Arc<Queue<Metadata>>) {
    let listener_core = core.clone();
    let listener_pipeline = pipeline.clone();
    core.registry.register(
        ModuleClass::Listener,
        "udp",
        Arc::new(move |params| {
            UdpListener::from_params(listener_core.clone(), listener_pipeline.clone(), params)
                .map(|m| Box::new(m) as Box<dyn ModuleInterface>)
        }),
    );

    let sender_core = core.clone();
    let sender_pipeline = pipeline.clone();
    core.registry.register(
        ModuleClass::Sender,
        "udp",
        Arc::new(move |params| {
            UdpSender::from_params(sender_core.clone(), sender_pipeline.clone(), params).map(|m| Box::new(m) as Box<dyn ModuleInterface>)
        }),
    );

    let readiness = core.readiness.clone();
    core.registry.register(
        ModuleClass::MsgInterface,
        "rap-tcp",
        Arc::new(move |params| {
            RapTcpInterface::from_params(master.clone(), readiness.clone(), params).map(|m| Box::new(m) as Box<dyn ModuleInterface>)
        }),
    );
}
