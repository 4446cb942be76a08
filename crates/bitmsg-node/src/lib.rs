//! bitmsg node -- library crate for the peer-to-peer node.
//!
//! Re-exports the node's modules so the binary and integration tests can
//! drive handshakes, the peer book and the node directly.

pub mod config;
pub mod handshake;
pub mod node;
pub mod peer_book;
pub mod pow_worker;

use std::path::PathBuf;
use std::sync::Arc;

use bitmsg_storage::{InventoryStore, MemoryInventory, SqliteInventory};

/// Inventory backend named by `[storage] inventory`: `"memory"` or a
/// SQLite path (`~` expanded).
pub fn open_inventory(location: &str) -> anyhow::Result<Arc<dyn InventoryStore>> {
    if location == "memory" {
        tracing::info!("inventory: in-memory");
        return Ok(Arc::new(MemoryInventory::new()));
    }
    let path = expand_tilde(location);
    let store = SqliteInventory::open(&path)?;
    tracing::info!(path = %path.display(), objects = store.len()?, "inventory: opened");
    Ok(Arc::new(store))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
