//! Closed error-kind enumeration and bounded per-thread error-context stack.
//!
//! Mirrors `rum2/error.h`'s `enum rum_error` and `rum_error_push/pop/last`,
//! realised as a safe `Error`/`ErrorKind` pair plus a `thread_local!` stack
//! instead of a global array indexed by thread id.

use std::cell::RefCell;
use std::fmt;

/// Maximum depth of the per-thread error-context stack (`RUM_ERRCTX_MAX`).
pub const ERRCTX_MAX: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfMemory,
    QueueInit,
    QueueGroupInit,
    QueueGroupIo,
    QueueOverflow,
    InvalidContext,
    ModuleLimit,
    ModuleStart,
    ModuleInterfaceMissing,
    ModuleIncompatible,
    ModuleNotStarted,
    ModuleInvalid,
    ModuleConflict,
    ModuleNew,
    ModuleParameterDescription,
    ModuleParameterValue,
    ModuleParameterSet,
    ModuleSubthread,
    LogSourceAdd,
    LogSourceNotFound,
    LogRegister,
    ListenerInit,
    ListenParameters,
    ProtocolParseLine,
    ProtocolParseHeader,
    ProtocolParseContent,
    ProtocolRequest,
    ProtocolRequestCopy,
    ProtocolResponse,
    AdminIfaceInit,
    AdminIfaceParameters,
    AdminIfaceParser,
    AdminIfaceLogSource,
    ConfigInit,
    ConfigRead,
    ConfigWrite,
    SyncRequestInRequest,
    SenderInit,
    SessionInit,
    SessionNew,
    PacketCopy,
    TrieInit,
    TrieInsert,
    ProcessorInit,
    ProcessorParameters,
    ProcessorTooMany,
    ProcessorPush,
    ProcessorProcess,
    RouteInit,
    RouteProcess,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            OutOfMemory => "out of memory",
            QueueInit => "queue initialisation failed",
            QueueGroupInit => "queue group initialisation failed",
            QueueGroupIo => "queue group I/O registration failed",
            QueueOverflow => "queue overflow, item dropped",
            InvalidContext => "invalid context",
            ModuleLimit => "module limit reached",
            ModuleStart => "module failed to start",
            ModuleInterfaceMissing => "required module interface slot missing",
            ModuleIncompatible => "module interface version mismatch",
            ModuleNotStarted => "module not started",
            ModuleInvalid => "invalid module identifier",
            ModuleConflict => "module conflicts with a running module",
            ModuleNew => "module could not be created",
            ModuleParameterDescription => "invalid module parameter description",
            ModuleParameterValue => "invalid module parameter value",
            ModuleParameterSet => "failed to set module parameter",
            ModuleSubthread => "module subthread failed",
            LogSourceAdd => "failed to add log source",
            LogSourceNotFound => "log source not found",
            LogRegister => "failed to register log sink",
            ListenerInit => "listener initialisation failed",
            ListenParameters => "invalid listener parameters",
            ProtocolParseLine => "malformed protocol request line",
            ProtocolParseHeader => "malformed protocol header",
            ProtocolParseContent => "malformed protocol body",
            ProtocolRequest => "invalid protocol request",
            ProtocolRequestCopy => "failed to copy protocol request",
            ProtocolResponse => "invalid protocol response",
            AdminIfaceInit => "administrative interface initialisation failed",
            AdminIfaceParameters => "invalid administrative interface parameters",
            AdminIfaceParser => "administrative protocol parser error",
            AdminIfaceLogSource => "administrative interface log source error",
            ConfigInit => "configuration initialisation failed",
            ConfigRead => "failed to read configuration",
            ConfigWrite => "failed to write configuration",
            SyncRequestInRequest => "synchronous request issued inside another",
            SenderInit => "sender initialisation failed",
            SessionInit => "session initialisation failed",
            SessionNew => "failed to create session",
            PacketCopy => "failed to copy packet",
            TrieInit => "trie initialisation failed",
            TrieInsert => "trie insertion failed",
            ProcessorInit => "processor initialisation failed",
            ProcessorParameters => "invalid processor parameters",
            ProcessorTooMany => "too many processors in path",
            ProcessorPush => "failed to push to processor",
            ProcessorProcess => "processor failed to process metadata",
            RouteInit => "routing initialisation failed",
            RouteProcess => "routing lookup failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported failure: a leaf kind plus an optional wrapped source
/// error (e.g. an I/O failure from a socket operation).
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub fn wrap(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.kind, source),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bounded stack of error kinds accumulated while unwinding a single
/// operation: leaf-first, with higher-level semantic kinds pushed as
/// the failure propagates up through calling layers.
#[derive(Debug, Default)]
pub struct ErrorContext {
    stack: Vec<ErrorKind>,
}

impl ErrorContext {
    pub fn new() -> ErrorContext {
        ErrorContext { stack: Vec::new() }
    }

    /// Pushes a kind onto the context, silently dropping it if the stack is
    /// already at `ERRCTX_MAX` depth (mirrors the fixed-size C array: once
    /// full, deeper semantic wrapping is no longer recorded but the
    /// original leaf-first kinds already captured remain available).
    pub fn push(&mut self, kind: ErrorKind) {
        if self.stack.len() < ERRCTX_MAX {
            self.stack.push(kind);
        }
    }

    pub fn pop(&mut self) -> Option<ErrorKind> {
        self.stack.pop()
    }

    /// The leaf (first-pushed) kind, i.e. the bottom of the stack, which is
    /// the user-facing reason per the propagation contract.
    pub fn bottom(&self) -> Option<ErrorKind> {
        self.stack.first().copied()
    }

    pub fn last(&self) -> Option<ErrorKind> {
        self.stack.last().copied()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

thread_local! {
    static CONTEXT: RefCell<ErrorContext> = RefCell::new(ErrorContext::new());
}

/// Pushes a kind onto the current thread's error context.
pub fn push(kind: ErrorKind) {
    CONTEXT.with(|ctx| ctx.borrow_mut().push(kind));
}

pub fn pop() -> Option<ErrorKind> {
    CONTEXT.with(|ctx| ctx.borrow_mut().pop())
}

pub fn last() -> Option<ErrorKind> {
    CONTEXT.with(|ctx| ctx.borrow().last())
}

pub fn bottom() -> Option<ErrorKind> {
    CONTEXT.with(|ctx| ctx.borrow().bottom())
}

pub fn reset() {
    CONTEXT.with(|ctx| ctx.borrow_mut().reset());
}
