//! Balance cache
//!
//! Read-through on miss, write-through after commit. Puts are version
//! monotonic: a put carrying an older `version` than the cached row is
//! ignored, so two writers finishing out of order cannot leave the older
//! balance in the cache.

use dashmap::DashMap;

use super::account::AccountId;
use super::types::AccountBalance;

/// Cache store port
pub trait BalanceCache: Send + Sync {
    fn get(&self, account: &AccountId) -> Option<AccountBalance>;
    fn put(&self, balance: AccountBalance);
    fn evict(&self, account: &AccountId);
}

/// In-process cache backed by a sharded concurrent map
pub struct InProcessBalanceCache {
    entries: DashMap<AccountId, AccountBalance>,
    capacity: usize,
}

impl InProcessBalanceCache {
    /// `capacity == 0` disables caching entirely
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        // Any victim will do; evicted rows are re-read from the store.
        let victim = self.entries.iter().next().map(|e| e.key().clone());
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }
}

impl BalanceCache for InProcessBalanceCache {
    fn get(&self, account: &AccountId) -> Option<AccountBalance> {
        self.entries.get(account).map(|e| e.value().clone())
    }

    fn put(&self, balance: AccountBalance) {
        if self.capacity == 0 {
            return;
        }

        if let Some(mut existing) = self.entries.get_mut(&balance.account) {
            if balance.version >= existing.version {
                *existing = balance;
            }
            return;
        }

        self.make_room();
        self.entries
            .entry(balance.account.clone())
            .and_modify(|existing| {
                if balance.version >= existing.version {
                    *existing = balance.clone();
                }
            })
            .or_insert(balance);
    }

    fn evict(&self, account: &AccountId) {
        self.entries.remove(account);
    }
}
