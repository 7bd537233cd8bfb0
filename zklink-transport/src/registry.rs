//! Process-wide table of connected device addresses
//!
//! Transports add their `host:port` once the socket is open and remove it
//! on disconnect, peer close, or drop. Several sessions may share an
//! address, so every entry counts its open sockets.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::trace;

static CONNECTED: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();

fn connected() -> &'static Mutex<HashMap<String, usize>> {
    CONNECTED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Count one more open socket to `addr`; returns the new count
pub fn register(addr: &str) -> usize {
    let mut table = connected().lock();
    let count = table.entry(addr.to_string()).or_insert(0);
    *count += 1;

    trace!(addr, count = *count, "Registry add");
    *count
}

/// Drop one socket to `addr`; returns the sockets still open
///
/// The address leaves the table when its last socket closes.
pub fn unregister(addr: &str) -> usize {
    let mut table = connected().lock();

    let left = match table.get_mut(addr) {
        Some(count) if *count > 1 => {
            *count -= 1;
            *count
        }
        Some(_) => {
            table.remove(addr);
            0
        }
        None => 0,
    };

    trace!(addr, left, "Registry remove");
    left
}

pub fn is_registered(addr: &str) -> bool {
    connected().lock().contains_key(addr)
}

/// Open sockets to `addr`
pub fn connection_count(addr: &str) -> usize {
    connected().lock().get(addr).copied().unwrap_or(0)
}

/// Snapshot of every connected address, sorted
pub fn connected_addrs() -> Vec<String> {
    let mut addrs: Vec<String> = connected().lock().keys().cloned().collect();
    addrs.sort();
    addrs
}
