#[macro_export]
macro_rules! choose {
    ($cond: expr => $true_val: expr, $false_val: expr) => {{
        if $cond {
            $true_val
        } else {
            $false_val
        }
    }};
}

use std::sync::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

const DEADLOCK_TIMEOUT_SECS: u64 = 10;
const DEADLOCK_POLL_INTERVAL_MS: u64 = 10;

/// Reports a lock that has been contended past the deadlock timeout, in the
/// style of the original `internal_lock` diagnostic: waiting thread, the
/// lock's name, and the call site. Debug builds only; this never aborts the
/// process, it just surfaces where to look.
#[cfg(debug_assertions)]
fn report_stuck(kind: &str, name: &str, file: &str, line: u32) {
    eprintln!(
        "possible deadlock: thread {:?} has been waiting on {} `{}` at {}:{}",
        std::thread::current().id(),
        kind,
        name,
        file,
        line
    );
}

/// Debug-build deadlock-detection acquire for a `Mutex`: spins `try_lock`
/// for a bounded wait, logs the stuck mutex/thread/call site if the timeout
/// is reached, then falls back to a blocking acquire either way. Release
/// builds skip straight to the blocking acquire.
#[cfg(debug_assertions)]
pub fn debug_lock<'a, T>(mutex: &'a Mutex<T>, name: &str, file: &str, line: u32) -> MutexGuard<'a, T> {
    let deadline = Instant::now() + Duration::from_secs(DEADLOCK_TIMEOUT_SECS);
    loop {
        match mutex.try_lock() {
            Ok(guard) => return guard,
            Err(_) if Instant::now() >= deadline => {
                report_stuck("mutex", name, file, line);
                break;
            }
            Err(_) => std::thread::sleep(Duration::from_millis(DEADLOCK_POLL_INTERVAL_MS)),
        }
    }
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(not(debug_assertions))]
pub fn debug_lock<'a, T>(mutex: &'a Mutex<T>, _name: &str, _file: &str, _line: u32) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Same as [`debug_lock`], for the writer side of an `RwLock`.
#[cfg(debug_assertions)]
pub fn debug_write<'a, T>(lock: &'a RwLock<T>, name: &str, file: &str, line: u32) -> RwLockWriteGuard<'a, T> {
    let deadline = Instant::now() + Duration::from_secs(DEADLOCK_TIMEOUT_SECS);
    loop {
        match lock.try_write() {
            Ok(guard) => return guard,
            Err(_) if Instant::now() >= deadline => {
                report_stuck("rwlock writer", name, file, line);
                break;
            }
            Err(_) => std::thread::sleep(Duration::from_millis(DEADLOCK_POLL_INTERVAL_MS)),
        }
    }
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(not(debug_assertions))]
pub fn debug_write<'a, T>(lock: &'a RwLock<T>, _name: &str, _file: &str, _line: u32) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Acquires a `Mutex`, routing through the debug-build deadlock-detection
/// shim (see [`debug_lock`]) and tagging it with the call site automatically.
#[macro_export]
macro_rules! debug_lock {
    ($mutex:expr) => {
        $crate::util::debug_lock(&$mutex, stringify!($mutex), file!(), line!())
    };
}

/// Acquires an `RwLock` for writing through the same shim; see [`debug_write`].
#[macro_export]
macro_rules! debug_write {
    ($lock:expr) => {
        $crate::util::debug_write(&$lock, stringify!($lock), file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_lock_returns_current_value() {
        let mutex = Mutex::new(5);
        {
            let mut guard = debug_lock(&mutex, "test", file!(), line!());
            *guard += 1;
        }
        assert_eq!(*mutex.lock().unwrap(), 6);
    }

    #[test]
    fn debug_write_grants_exclusive_access() {
        let lock = RwLock::new(vec![1, 2, 3]);
        {
            let mut guard = debug_write(&lock, "test", file!(), line!());
            guard.push(4);
        }
        assert_eq!(*lock.read().unwrap(), vec![1, 2, 3, 4]);
    }
}
