pub mod dining_philosophers;
pub mod lock_chain_with_deadlock;
pub mod one_thread_no_deadlocks;
pub mod two_threads_different_locks;
pub mod two_threads_one_lock;

use std::thread::{self, JoinHandle};

/// Spawns a named OS thread; scenario threads show up by name in logs.
pub(crate) fn spawn_named<F, T>(name: &str, f: F) -> Result<JoinHandle<T>, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map_err(|e| format!("failed to spawn {name}: {e}"))
}

pub(crate) fn join_named<T>(name: &str, handle: JoinHandle<T>) -> Result<T, String> {
    handle.join().map_err(|_| format!("{name} panicked"))
}
