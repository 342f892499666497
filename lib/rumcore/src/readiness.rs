//! I/O readiness bridge: a dedicated thread that polls registered file
//! descriptors (via `mio`) and wakes the queue groups waiting on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Evented, Events, Poll, PollOpt, Ready, Token};

use crate::queue::QueueGroupWaker;

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

struct Registration {
    waker: QueueGroupWaker,
}

/// Owns the `mio::Poll` instance and the token→waker map. A registered
/// token may be removed at any time; removal is synchronous (the next poll
/// iteration will not observe it).
///
/// Tokens are handed out by `next_token` rather than chosen by the
/// registering module, so that two instances of the same module type (two
/// `listener/udp`s, say) never collide on the same bridge — the spec
/// requires fds across all groups to be globally unique.
pub struct ReadinessBridge {
    poll: Poll,
    registrations: Mutex<HashMap<Token, Registration>>,
    next_token: AtomicUsize,
}

impl ReadinessBridge {
    pub fn new() -> std::io::Result<Arc<ReadinessBridge>> {
        Ok(Arc::new(ReadinessBridge {
            poll: Poll::new()?,
            registrations: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(0),
        }))
    }

    /// Allocates a token guaranteed unique for the lifetime of this bridge.
    pub fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `source` for readability under `token`, waking `waker`
    /// whenever it becomes readable.
    pub fn register(&self, source: &dyn Evented, token: Token, waker: QueueGroupWaker) -> std::io::Result<()> {
        self.poll.register(source, token, Ready::readable(), PollOpt::edge())?;
        self.registrations.lock().unwrap().insert(token, Registration { waker });
        Ok(())
    }

    pub fn deregister(&self, source: &dyn Evented, token: Token) -> std::io::Result<()> {
        self.poll.deregister(source)?;
        self.registrations.lock().unwrap().remove(&token);
        Ok(())
    }

    /// Spawns the bridge's helper thread. The thread runs until
    /// `stop_flag` is set.
    pub fn spawn(self: Arc<Self>, stop_flag: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut events = Events::with_capacity(1024);
            while !stop_flag.load(Ordering::Relaxed) {
                match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                    Ok(_) => {}
                    Err(_) => continue,
                }
                let registrations = self.registrations.lock().unwrap();
                for event in events.iter() {
                    if let Some(reg) = registrations.get(&event.token()) {
                        reg.waker.signal();
                    }
                }
            }
        })
    }
}
