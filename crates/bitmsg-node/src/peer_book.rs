//! Peer book -- thread-safe set of known peer addresses.
//!
//! Shared by every connection task. Updates from one handshake are applied in
//! a single write-lock section, so readers see either none or all of them.
//! Both a single merge and the whole book are bounded.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bitmsg_protocol::AddressRecord;
use rand::seq::{IteratorRandom, SliceRandom};
use tokio::sync::RwLock;

/// Most records taken from one peer's `addr` list (and sent in ours).
pub const MAX_ADDR_ENTRIES: usize = 1000;

/// Most peers held at once; the stalest are evicted beyond this.
pub const MAX_BOOK_SIZE: usize = 20_000;

type Endpoint = (Ipv4Addr, u16);

#[derive(Clone, Default)]
pub struct PeerBook {
    inner: Arc<RwLock<HashMap<Endpoint, AddressRecord>>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: Vec<AddressRecord>) -> Self {
        let mut book = HashMap::with_capacity(peers.len().min(MAX_BOOK_SIZE));
        for record in peers {
            upsert(&mut book, record);
        }
        evict_stalest(&mut book, MAX_BOOK_SIZE);
        Self {
            inner: Arc::new(RwLock::new(book)),
        }
    }

    /// Consistent copy of the current set.
    pub async fn snapshot(&self) -> Vec<AddressRecord> {
        self.inner.read().await.values().copied().collect()
    }

    /// Merge addresses learned from a peer. At most [`MAX_ADDR_ENTRIES`]
    /// records are considered. Entries are keyed by ip:port; an existing
    /// entry keeps the fresher `time`. Returns how many were new.
    pub async fn merge(&self, records: &[AddressRecord]) -> usize {
        if records.is_empty() {
            return 0;
        }
        if records.len() > MAX_ADDR_ENTRIES {
            tracing::debug!(
                offered = records.len(),
                kept = MAX_ADDR_ENTRIES,
                "peers: addr list truncated"
            );
        }
        let (added, evicted, book_size) = {
            let mut book = self.inner.write().await;
            let added = records
                .iter()
                .take(MAX_ADDR_ENTRIES)
                .filter(|r| upsert(&mut book, **r))
                .count();
            let evicted = evict_stalest(&mut book, MAX_BOOK_SIZE);
            (added, evicted, book.len())
        };
        if added > 0 {
            tracing::info!(added, evicted, book_size, "peers: addresses merged");
        }
        added
    }

    /// Up to `n` distinct peers in random order.
    pub async fn sample(&self, n: usize) -> Vec<AddressRecord> {
        let book = self.inner.read().await;
        let mut rng = rand::thread_rng();
        let mut picked: Vec<AddressRecord> =
            book.values().copied().choose_multiple(&mut rng, n);
        drop(book);
        picked.shuffle(&mut rng);
        picked
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Insert or refresh `record`; true if it was not known before.
fn upsert(book: &mut HashMap<Endpoint, AddressRecord>, record: AddressRecord) -> bool {
    match book.get_mut(&(record.ip, record.port)) {
        Some(existing) => {
            if record.time > existing.time {
                *existing = record;
            }
            false
        }
        None => {
            book.insert((record.ip, record.port), record);
            true
        }
    }
}

/// Drop the oldest entries until at most `cap` remain. Returns how many went.
fn evict_stalest(book: &mut HashMap<Endpoint, AddressRecord>, cap: usize) -> usize {
    let excess = book.len().saturating_sub(cap);
    if excess == 0 {
        return 0;
    }
    let mut by_age: Vec<(u64, Endpoint)> = book.iter().map(|(k, r)| (r.time, *k)).collect();
    by_age.select_nth_unstable(excess - 1);
    for (_, key) in &by_age[..excess] {
        book.remove(key);
    }
    excess
}
