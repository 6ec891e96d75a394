//! Map of appends waiting out the reorg window.
//!
//! Each entry pairs an event key with the cancellation token of its delayed
//! task. Cancelling and claiming both remove the entry under the same lock,
//! so for a given entry exactly one of them succeeds.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::EventKey;

/// Identifies one registration, so a task never claims an entry that
/// replaced its own.
pub type EntryId = u64;

#[derive(Debug)]
struct Entry {
    id: EntryId,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EventKey, Entry>,
    next_id: EntryId,
}

#[derive(Debug, Default)]
pub struct PendingAppends {
    inner: Mutex<Inner>,
}

/// Result of [`PendingAppends::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub id: EntryId,
    /// An entry for the same key existed and was cancelled
    pub replaced: bool,
}

impl PendingAppends {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `token` under `key`, cancelling any entry it replaces.
    pub fn insert(&self, key: EventKey, token: CancellationToken) -> Registered {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let previous = inner.entries.insert(key, Entry { id, token });
        if let Some(previous) = &previous {
            previous.token.cancel();
        }
        Registered {
            id,
            replaced: previous.is_some(),
        }
    }

    /// Remove the entry for `key` and cancel it. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().entries.remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Take ownership of entry `id` so its append may go ahead.
    ///
    /// Fails if the entry was cancelled, replaced or already claimed.
    pub fn claim(&self, key: &str, id: EntryId) -> bool {
        let mut inner = self.lock();
        let ours = inner
            .entries
            .get(key)
            .is_some_and(|e| e.id == id && !e.token.is_cancelled());
        if ours {
            inner.entries.remove(key);
        }
        ours
    }

    /// Cancel and drop every entry. Returns how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        for (_, entry) in inner.entries.drain() {
            entry.token.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_then_cancel() {
        let pending = PendingAppends::default();
        let token = CancellationToken::new();
        let reg = pending.insert("0xabc".into(), token.clone());
        assert!(!reg.replaced);

        assert!(pending.claim("0xabc", reg.id));
        assert!(!pending.contains("0xabc"));
        // Too late: the append already went ahead
        assert!(!pending.cancel("0xabc"));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_then_claim() {
        let pending = PendingAppends::default();
        let token = CancellationToken::new();
        let reg = pending.insert("0xabc".into(), token.clone());

        assert!(pending.cancel("0xabc"));
        assert!(token.is_cancelled());
        assert!(!pending.claim("0xabc", reg.id));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_replacement_cancels_previous() {
        let pending = PendingAppends::default();
        let first = CancellationToken::new();
        let second = CancellationToken::new();

        let old = pending.insert("0xabc".into(), first.clone());
        let new = pending.insert("0xabc".into(), second.clone());

        assert!(new.replaced);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(pending.len(), 1);

        // The stale task cannot claim the new entry
        assert!(!pending.claim("0xabc", old.id));
        assert!(pending.claim("0xabc", new.id));
    }

    #[test]
    fn test_claim_refuses_cancelled_token() {
        let pending = PendingAppends::default();
        let token = CancellationToken::new();
        let reg = pending.insert("0xabc".into(), token.clone());

        // Owner teardown cancels the token without touching the map
        token.cancel();
        assert!(!pending.claim("0xabc", reg.id));
    }

    #[test]
    fn test_clear_cancels_everything() {
        let pending = PendingAppends::default();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for (i, token) in tokens.iter().enumerate() {
            pending.insert(format!("0x{i}"), token.clone());
        }

        assert_eq!(pending.clear(), 3);
        assert_eq!(pending.len(), 0);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
