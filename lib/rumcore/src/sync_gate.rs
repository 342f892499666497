//! Reflector-wide synchronous request gate (§5): at most one synchronous
//! administrative request in flight at a time; any number of asynchronous
//! requests may run concurrently with each other, but none with a
//! synchronous one. A single named msg-interface module may be exempted
//! ("request-in-request") for the duration of one enclosing sync request.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, ErrorKind, Result};

#[derive(Default)]
struct GateState {
    sync_in_flight: bool,
    async_count: u32,
    request_in_request_holder: Option<String>,
}

pub struct SyncGate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl SyncGate {
    pub fn new() -> SyncGate {
        SyncGate {
            state: Mutex::new(GateState::default()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until no synchronous request is in flight, then marks one as
    /// entered. Returns a guard releasing the gate on drop.
    pub fn enter_sync(&self) -> SyncGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.sync_in_flight || state.async_count > 0 {
            state = self.condvar.wait(state).unwrap();
        }
        state.sync_in_flight = true;
        SyncGuard { gate: self }
    }

    /// Blocks until no synchronous request is in flight, then marks one
    /// asynchronous request as entered. Returns a guard releasing it on
    /// drop. Multiple asynchronous requests may hold this concurrently.
    pub fn enter_async(&self) -> AsyncGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.sync_in_flight {
            state = self.condvar.wait(state).unwrap();
        }
        state.async_count += 1;
        AsyncGuard { gate: self }
    }

    /// Lifts the gate for `module_name` for the duration of the enclosing
    /// sync request, so that module alone may issue a nested synchronous
    /// request without deadlocking against itself. Fails with
    /// `SyncRequestInRequest` if another module already holds the
    /// exemption or if no synchronous request is currently in flight.
    pub fn request_in_request(&self, module_name: &str) -> Result<RequestInRequestGuard<'_>> {
        let mut state = self.state.lock().unwrap();
        if !state.sync_in_flight {
            return Err(Error::new(ErrorKind::SyncRequestInRequest));
        }
        if let Some(holder) = &state.request_in_request_holder {
            if holder != module_name {
                return Err(Error::new(ErrorKind::SyncRequestInRequest));
            }
        }
        state.request_in_request_holder = Some(module_name.to_owned());
        Ok(RequestInRequestGuard { gate: self })
    }

    fn exit_sync(&self) {
        let mut state = self.state.lock().unwrap();
        state.sync_in_flight = false;
        drop(state);
        self.condvar.notify_all();
    }

    fn exit_async(&self) {
        let mut state = self.state.lock().unwrap();
        state.async_count -= 1;
        drop(state);
        self.condvar.notify_all();
    }

    fn exit_request_in_request(&self) {
        self.state.lock().unwrap().request_in_request_holder = None;
    }
}

impl Default for SyncGate {
    fn default() -> SyncGate {
        SyncGate::new()
    }
}

pub struct SyncGuard<'a> {
    gate: &'a SyncGate,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_sync();
    }
}

pub struct AsyncGuard<'a> {
    gate: &'a SyncGate,
}

impl Drop for AsyncGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_async();
    }
}

pub struct RequestInRequestGuard<'a> {
    gate: &'a SyncGate,
}

impl Drop for RequestInRequestGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_request_in_request();
    }
}
