//! Striped row locks
//!
//! Keys (accounts, references, workflow records) are hashed onto a fixed
//! set of mutexes. A commit locks every stripe it touches in ascending
//! stripe order, so two commits over the same keys in opposite order can
//! never deadlock. Unrelated accounts almost never share a stripe.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;

/// Fixed pool of lock stripes
pub struct LockStripes {
    stripes: Vec<Mutex<()>>,
}

/// Guards for every stripe held by one commit (released on drop)
pub struct StripeGuards<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockStripes {
    /// Create a pool with `count` stripes
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "stripe count must be > 0");
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe index for a key
    pub fn stripe_of(&self, key: &str) -> usize {
        let hash = blake3::hash(key.as_bytes());
        let bytes = hash.as_bytes();
        let value = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        (value % self.stripes.len() as u64) as usize
    }

    /// Lock all stripes covering `keys`, lowest index first
    pub fn acquire<S: AsRef<str>>(&self, keys: &[S]) -> StripeGuards<'_> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.stripe_of(k.as_ref())).collect();
        indices.sort_unstable();
        indices.dedup();

        let guards = indices.into_iter().map(|i| self.stripes[i].lock()).collect();
        StripeGuards { _guards: guards }
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false, a pool has at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

impl fmt::Debug for LockStripes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockStripes")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl fmt::Debug for StripeGuards<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGuards")
            .field("held", &self._guards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stripe_is_stable() {
        let locks = LockStripes::new(64);
        let a = locks.stripe_of("account:alice");
        assert!(a < 64);
        assert_eq!(a, locks.stripe_of("account:alice"));
    }

    #[test]
    fn test_duplicate_keys_lock_once() {
        let locks = LockStripes::new(8);
        // Would self-deadlock if the same stripe were locked twice
        let guards = locks.acquire(&["account:alice", "account:alice", "reference:x"]);
        drop(guards);
        let _again = locks.acquire(&["account:alice"]);
    }

    #[test]
    fn test_opposite_order_does_not_deadlock() {
        let locks = Arc::new(LockStripes::new(4));
        let mut handles = Vec::new();

        for i in 0..8 {
            let locks = locks.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    let keys = if i % 2 == 0 {
                        ["account:alice", "account:bob"]
                    } else {
                        ["account:bob", "account:alice"]
                    };
                    let _guards = locks.acquire(&keys);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
