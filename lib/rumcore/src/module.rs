//! Module runtime: classes, identity, the interface capability set, the
//! lifecycle state machine, and the static registry that stands in for
//! `rum2/mod.h`'s dynamic plugin loader.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};

/// The interface version every `ModuleInterface` must declare; a mismatch
/// at load time is reported as `ModuleIncompatible`.
pub const MODULE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleClass {
    Reflector,
    Listener,
    Processor,
    Sender,
    Aaa,
    Management,
    MsgInterface,
}

impl ModuleClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleClass::Reflector => "reflector",
            ModuleClass::Listener => "listener",
            ModuleClass::Processor => "processor",
            ModuleClass::Sender => "sender",
            ModuleClass::Aaa => "aaa",
            ModuleClass::Management => "management",
            ModuleClass::MsgInterface => "msg-interface",
        }
    }
}

impl fmt::Display for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ModuleClass {
    /// Parses a wire-format class string (the left-hand side of a
    /// `class/name` module identifier). Unknown strings are `None`.
    pub fn parse(s: &str) -> Option<ModuleClass> {
        Some(match s {
            "reflector" => ModuleClass::Reflector,
            "listener" => ModuleClass::Listener,
            "processor" => ModuleClass::Processor,
            "sender" => ModuleClass::Sender,
            "aaa" => ModuleClass::Aaa,
            "management" => ModuleClass::Management,
            "msg-interface" => ModuleClass::MsgInterface,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    pub class: ModuleClass,
    pub name: String,
}

impl ModuleId {
    pub fn new(class: ModuleClass, name: impl Into<String>) -> ModuleId {
        ModuleId {
            class,
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.name)
    }
}

/// A named, described, defaulted, runtime-settable parameter.
#[derive(Debug, Clone)]
pub struct ModuleParam {
    pub name: String,
    pub description: String,
    pub default: String,
    pub value: String,
}

impl ModuleParam {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default: impl Into<String>) -> ModuleParam {
        let default = default.into();
        ModuleParam {
            name: name.into(),
            description: description.into(),
            value: default.clone(),
            default,
        }
    }
}

/// Lifecycle state machine transitions are driven only by the management
/// master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialised,
    Inserted,
    Initialised,
    Running,
    Stopped,
    Destroyed,
}

/// Intra-reflector events a module may receive via `events()`.
#[derive(Debug, Clone)]
pub enum ModuleEvent {
    LogSourceAdded(String),
    LogSourceRemoved(String),
    ClientListChanged { listener_id: u32 },
}

/// The capability set every module implements. Optional slots have default
/// implementations that report absence rather than requiring every module
/// to stub them out, matching the spec's "callers test presence" contract.
pub trait ModuleInterface: Send {
    /// Interface version this implementation was built against.
    fn version(&self) -> u32 {
        MODULE_VERSION
    }

    /// Optional: compute a final name from parameters and a disambiguator.
    fn name(&self, _id: u32) -> Option<String> {
        None
    }

    /// Optional: identifiers of modules this one cannot coexist with.
    fn conflicts(&self) -> Vec<ModuleId> {
        Vec::new()
    }

    /// Required: allocate resources, open sockets, register queue groups.
    /// May fail; after success the module must be start-able.
    fn init(&mut self) -> Result<()>;

    /// Required: the thread body.
    fn main(&mut self, stop_flag: &AtomicBool);

    /// Optional: invoked immediately after `main` returns, even on forced
    /// cancellation, to release transient resources.
    fn stop(&mut self) {}

    /// Required: frees everything allocated by `init`/`main`. When
    /// `for_restart` is false, parameter storage and identity are also
    /// released by the caller once this returns.
    fn clean(&mut self, _for_restart: bool) {}

    /// Optional synchronous alternative to a data-queue push.
    fn push_data(&mut self, _payload: &[u8]) -> Option<Result<()>> {
        None
    }

    /// Optional synchronous alternative to a message-queue push.
    fn push_message(&mut self, _payload: &[u8]) -> Option<Result<()>> {
        None
    }

    /// Optional: handles intra-reflector events.
    fn events(&mut self, _event: &ModuleEvent) {}

    /// Emits administrative requests that reconstruct current state.
    fn config(&self, _name_override: Option<&str>, _start_only: bool) -> Vec<String> {
        Vec::new()
    }
}

struct ModuleSlot {
    id: ModuleId,
    state: LifecycleState,
    params: Vec<ModuleParam>,
    instance: Option<Box<dyn ModuleInterface>>,
}

/// Factory invoked by the static registry to produce a fresh module
/// instance from its parameter list.
pub type ModuleFactory = dyn Fn(&[ModuleParam]) -> Result<Box<dyn ModuleInterface>> + Send + Sync;

/// The process-wide static registry standing in for dynamic plugin
/// loading: each built-in module type registers a factory here (typically
/// from a `#[ctor]` constructor), and `ModuleRuntime::load` resolves
/// `(class, name)` against it.
pub struct StaticRegistry {
    factories: RwLock<HashMap<(ModuleClass, &'static str), Arc<ModuleFactory>>>,
}

impl StaticRegistry {
    pub fn new() -> StaticRegistry {
        StaticRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, class: ModuleClass, name: &'static str, factory: Arc<ModuleFactory>) {
        self.factories.write().unwrap().insert((class, name), factory);
    }

    fn get(&self, class: ModuleClass, name: &str) -> Option<Arc<ModuleFactory>> {
        self.factories
            .read()
            .unwrap()
            .iter()
            .find(|((c, n), _)| *c == class && *n == name)
            .map(|(_, f)| f.clone())
    }

    /// Lists every statically registered `(class, name)` pair, for the
    /// administrative `AVAIL` query.
    pub fn available(&self) -> Vec<ModuleId> {
        self.factories
            .read()
            .unwrap()
            .keys()
            .map(|(class, name)| ModuleId::new(*class, (*name).to_owned()))
            .collect()
    }
}

impl Default for StaticRegistry {
    fn default() -> StaticRegistry {
        StaticRegistry::new()
    }
}

/// The global module list: locates, initialises, starts, stops, and
/// destroys modules, and answers discovery/listing queries. `(class,
/// name)` is enforced unique reflector-wide.
pub struct ModuleRuntime {
    registry: Arc<StaticRegistry>,
    modules: RwLock<IndexMap<ModuleId, ModuleSlot>>,
}

impl ModuleRuntime {
    pub fn new(registry: Arc<StaticRegistry>) -> ModuleRuntime {
        ModuleRuntime {
            registry,
            modules: RwLock::new(IndexMap::new()),
        }
    }

    /// Resolves a statically registered module, validates its interface
    /// version, and inserts it into the module list in the `Inserted`
    /// state. Fails with `ModuleInvalid` if `(class, name)` already exists,
    /// `ModuleNotStarted` if no factory is registered for it (the
    /// dynamic-plugin branch is out of scope), or `ModuleIncompatible` on a
    /// version mismatch.
    pub fn load(&self, class: ModuleClass, name: &str, params: Vec<ModuleParam>) -> Result<ModuleId> {
        let id = ModuleId::new(class, name.to_owned());

        {
            let modules = self.modules.read().unwrap();
            if modules.contains_key(&id) {
                return Err(Error::new(ErrorKind::ModuleInvalid));
            }
        }

        let factory = self
            .registry
            .get(class, name)
            .ok_or_else(|| Error::new(ErrorKind::ModuleNotStarted))?;

        let instance = factory(&params)?;
        if instance.version() != MODULE_VERSION {
            return Err(Error::new(ErrorKind::ModuleIncompatible));
        }

        let mut modules = flux::debug_write!(self.modules);
        modules.insert(
            id.clone(),
            ModuleSlot {
                id: id.clone(),
                state: LifecycleState::Inserted,
                params,
                instance: Some(instance),
            },
        );
        Ok(id)
    }

    /// Runs `init()`, transitioning `Inserted -> Initialised` on success.
    pub fn initialise(&self, id: &ModuleId) -> Result<()> {
        let mut modules = flux::debug_write!(self.modules);
        let slot = modules.get_mut(id).ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
        let instance = slot.instance.as_mut().ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
        instance.init().map_err(|e| {
            slot.state = LifecycleState::Destroyed;
            e
        })?;
        slot.state = LifecycleState::Initialised;
        Ok(())
    }

    /// Marks a module `Running`. The caller is responsible for spawning the
    /// OS thread that invokes `main()`.
    pub fn mark_running(&self, id: &ModuleId) -> Result<()> {
        self.transition(id, LifecycleState::Initialised, LifecycleState::Running)
    }

    /// Marks a module `Stopped` after its `main` thread has returned and
    /// `stop()` has run.
    pub fn mark_stopped(&self, id: &ModuleId) -> Result<()> {
        self.transition(id, LifecycleState::Running, LifecycleState::Stopped)
    }

    /// Restarts a stopped module: `Stopped -> Initialised`.
    pub fn restart(&self, id: &ModuleId) -> Result<()> {
        let mut modules = flux::debug_write!(self.modules);
        let slot = modules.get_mut(id).ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
        if slot.state != LifecycleState::Stopped {
            return Err(Error::new(ErrorKind::ModuleStart));
        }
        if let Some(instance) = slot.instance.as_mut() {
            instance.clean(true);
        }
        slot.state = LifecycleState::Initialised;
        Ok(())
    }

    /// Tears a module down fully: `clean(false)` then removal from the
    /// module list.
    pub fn destroy(&self, id: &ModuleId) -> Result<()> {
        let mut modules = flux::debug_write!(self.modules);
        let mut slot = modules
            .shift_remove(id)
            .ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
        if let Some(instance) = slot.instance.as_mut() {
            instance.clean(false);
        }
        Ok(())
    }

    /// Spawns the OS thread that runs an `Initialised` module's `main`,
    /// marking it `Running` for the duration and `Stopped` once `main`
    /// returns (after `stop()` has run). The instance is moved into the
    /// thread and moved back into its slot before the thread exits, so a
    /// concurrent `find`/`state` lookup sees `Running` throughout and the
    /// slot is whole again by the time the handle is joined.
    pub fn spawn(self: Arc<Self>, id: ModuleId, stop_flag: Arc<AtomicBool>) -> Result<std::thread::JoinHandle<()>> {
        let mut instance = {
            let mut modules = flux::debug_write!(self.modules);
            let slot = modules.get_mut(&id).ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
            if slot.state != LifecycleState::Initialised {
                return Err(Error::new(ErrorKind::ModuleStart));
            }
            slot.state = LifecycleState::Running;
            slot.instance.take().ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?
        };

        let runtime = self;
        Ok(std::thread::spawn(move || {
            instance.main(&stop_flag);
            instance.stop();
            let mut modules = flux::debug_write!(runtime.modules);
            if let Some(slot) = modules.get_mut(&id) {
                slot.state = LifecycleState::Stopped;
                slot.instance = Some(instance);
            }
        }))
    }

    fn transition(&self, id: &ModuleId, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut modules = flux::debug_write!(self.modules);
        let slot = modules.get_mut(id).ok_or_else(|| Error::new(ErrorKind::ModuleInvalid))?;
        if slot.state != from {
            return Err(Error::new(ErrorKind::ModuleStart));
        }
        slot.state = to;
        Ok(())
    }

    pub fn state(&self, id: &ModuleId) -> Option<LifecycleState> {
        self.modules.read().unwrap().get(id).map(|s| s.state)
    }

    /// `find(class, name)`: exact lookup (the spec also allows regex; that
    /// surface lives in the administrative protocol layer, not here).
    pub fn find(&self, class: ModuleClass, name: &str) -> Option<ModuleId> {
        let modules = self.modules.read().unwrap();
        let id = ModuleId::new(class, name.to_owned());
        modules.get(&id).map(|s| s.id.clone())
    }

    /// Iterates module ids belonging to `class`, or all modules when
    /// `class` is `Reflector` (the pseudo-class meaning "all").
    pub fn foreach(&self, class: ModuleClass, mut f: impl FnMut(&ModuleId)) {
        let modules = self.modules.read().unwrap();
        for slot in modules.values() {
            if class == ModuleClass::Reflector || slot.id.class == class {
                f(&slot.id);
            }
        }
    }

    pub fn registry(&self) -> &Arc<StaticRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopModule;
    impl ModuleInterface for NoopModule {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn main(&mut self, _stop_flag: &AtomicBool) {}
    }

    struct IncompatibleModule;
    impl ModuleInterface for IncompatibleModule {
        fn version(&self) -> u32 {
            MODULE_VERSION + 1
        }
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn main(&mut self, _stop_flag: &AtomicBool) {}
    }

    fn runtime_with_noop() -> ModuleRuntime {
        let registry = Arc::new(StaticRegistry::new());
        registry.register(ModuleClass::Processor, "noop", Arc::new(|_| Ok(Box::new(NoopModule) as Box<dyn ModuleInterface>)));
        ModuleRuntime::new(registry)
    }

    #[test]
    fn load_unknown_module_fails() {
        let runtime = runtime_with_noop();
        let err = runtime.load(ModuleClass::Processor, "ghost", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModuleNotStarted);
    }

    #[test]
    fn duplicate_class_name_is_rejected() {
        let runtime = runtime_with_noop();
        runtime.load(ModuleClass::Processor, "noop", Vec::new()).unwrap();
        let err = runtime.load(ModuleClass::Processor, "noop", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModuleInvalid);
    }

    #[test]
    fn lifecycle_progresses_through_states() {
        let runtime = runtime_with_noop();
        let id = runtime.load(ModuleClass::Processor, "noop", Vec::new()).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Inserted));
        runtime.initialise(&id).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Initialised));
        runtime.mark_running(&id).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Running));
        runtime.mark_stopped(&id).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Stopped));
        runtime.restart(&id).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Initialised));
    }

    #[test]
    fn version_mismatch_is_incompatible() {
        let registry = Arc::new(StaticRegistry::new());
        registry.register(ModuleClass::Processor, "bad", Arc::new(|_| Ok(Box::new(IncompatibleModule) as Box<dyn ModuleInterface>)));
        let runtime = ModuleRuntime::new(registry);
        let err = runtime.load(ModuleClass::Processor, "bad", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModuleIncompatible);
    }

    struct LoopingModule;
    impl ModuleInterface for LoopingModule {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn main(&mut self, stop_flag: &AtomicBool) {
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }

    #[test]
    fn spawn_runs_main_and_restores_the_slot_on_exit() {
        let registry = Arc::new(StaticRegistry::new());
        registry.register(ModuleClass::Processor, "loop", Arc::new(|_| Ok(Box::new(LoopingModule) as Box<dyn ModuleInterface>)));
        let runtime = Arc::new(ModuleRuntime::new(registry));
        let id = runtime.load(ModuleClass::Processor, "loop", Vec::new()).unwrap();
        runtime.initialise(&id).unwrap();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let handle = runtime.clone().spawn(id.clone(), stop_flag.clone()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(runtime.state(&id), Some(LifecycleState::Running));

        stop_flag.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Stopped));

        runtime.restart(&id).unwrap();
        assert_eq!(runtime.state(&id), Some(LifecycleState::Initialised));
    }
}
