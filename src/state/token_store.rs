use crate::state::token::{IdentitySource, TokenIdentity, TokenRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type TokenMap = HashMap<TokenIdentity, TokenRecord>;

/// Live mapping of token identity to the latest merged record.
///
/// Copy-on-write: the map sits behind an `Arc` that readers clone out, so a
/// reader always holds a complete map. `replace_all` builds the new map before
/// taking the lock and swaps it in; `merge_all` mutates under the write lock
/// (cloning first if a reader still holds the previous version).
///
/// Cheap to clone (just an Arc bump).
#[derive(Clone, Debug)]
pub struct TokenStore {
    inner: Arc<RwLock<Arc<TokenMap>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        TokenStore {
            inner: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
            revision: Arc::new(revision),
        }
    }

    /// Drops every current record and installs `records` in their place.
    pub fn replace_all<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = TokenRecord>,
    {
        let mut fresh = TokenMap::new();
        for record in records {
            let (id, source) = record.identity();
            note_fallback(&id, source);
            fresh.insert(id, record);
        }
        let len = fresh.len();

        *self.inner.write() = Arc::new(fresh);
        self.bump();
        len
    }

    /// Overlays each partial record onto the record with the same identity,
    /// inserting it as-is when the identity is new.
    pub fn merge_all<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = TokenRecord>,
    {
        let len = {
            let mut guard = self.inner.write();
            let map = Arc::make_mut(&mut *guard);
            for record in records {
                let (id, source) = record.identity();
                note_fallback(&id, source);
                match map.get_mut(&id) {
                    Some(existing) => existing.overlay(&record),
                    None => {
                        map.insert(id, record);
                    }
                }
            }
            map.len()
        };
        self.bump();
        len
    }

    /// Current records in no particular order.
    pub fn snapshot(&self) -> Vec<TokenRecord> {
        self.snapshot_map().values().cloned().collect()
    }

    /// The current map itself; later mutations never show through it.
    pub fn snapshot_map(&self) -> Arc<HashMap<TokenIdentity, TokenRecord>> {
        self.inner.read().clone()
    }

    pub fn get(&self, id: &TokenIdentity) -> Option<TokenRecord> {
        self.inner.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Incremented after every replace or merge.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
        crate::metrics::record_token_count(self.len());
    }
}

fn note_fallback(id: &TokenIdentity, source: IdentitySource) {
    if source == IdentitySource::Fallback {
        debug!(identity = %id, "record has no identifying field, using random key");
        crate::metrics::record_fallback_identity();
    }
}
