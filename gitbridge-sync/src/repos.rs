//! The two configured repositories and their per-repository locks.
//!
//! Names are resolved against a fixed pair before any lock is taken, so an
//! unknown name never allocates or blocks. Multi-lock operations acquire in
//! ascending name order.

use std::sync::{Mutex, MutexGuard};

use gitbridge_core::{RepositoryConfig, RepositoryPairConfig};

use crate::error::SyncError;

/// One repository and the mutex serializing every operation on its working copy.
#[derive(Debug)]
pub struct RepositorySlot {
    config: RepositoryConfig,
    lock: Mutex<()>,
}

impl RepositorySlot {
    fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name.as_str()
    }

    /// Block until this repository is free. A poisoned lock is recovered: the
    /// guarded state lives on disk, not in the mutex.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held locks on both repositories. Released on drop.
pub struct PairGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: MutexGuard<'a, ()>,
}

/// Lock two distinct slots in ascending name order.
pub fn lock_both<'a>(a: &'a RepositorySlot, b: &'a RepositorySlot) -> PairGuard<'a> {
    let (first, second) = if a.name() <= b.name() { (a, b) } else { (b, a) };
    let first_guard = first.lock();
    let second_guard = second.lock();
    PairGuard {
        _first: first_guard,
        _second: second_guard,
    }
}

/// Exactly two repositories, fixed at startup.
#[derive(Debug)]
pub struct RepositoryPair {
    slots: [RepositorySlot; 2],
}

impl RepositoryPair {
    pub fn new(config: RepositoryPairConfig) -> Self {
        Self {
            slots: [
                RepositorySlot::new(config.internal),
                RepositorySlot::new(config.customer),
            ],
        }
    }

    /// The slot named `name` together with its counterpart.
    pub fn resolve(&self, name: &str) -> Result<(&RepositorySlot, &RepositorySlot), SyncError> {
        let [a, b] = &self.slots;
        if a.name() == name {
            Ok((a, b))
        } else if b.name() == name {
            Ok((b, a))
        } else {
            Err(SyncError::UnknownRepository(name.to_string()))
        }
    }

    pub fn configs(&self) -> impl Iterator<Item = &RepositoryConfig> {
        self.slots.iter().map(RepositorySlot::config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn pair() -> RepositoryPair {
        let repo = |name: &str| RepositoryConfig {
            name: name.into(),
            local_path: PathBuf::from(format!("/srv/{name}")),
            remote_url: format!("file:///srv/remotes/{name}.git"),
        };
        RepositoryPair::new(RepositoryPairConfig {
            internal: repo("internal"),
            customer: repo("customer"),
        })
    }

    #[test]
    fn resolve_returns_named_slot_and_its_counterpart() {
        let pair = pair();
        let (named, other) = pair.resolve("customer").expect("known");
        assert_eq!(named.name(), "customer");
        assert_eq!(other.name(), "internal");
    }

    #[test]
    fn resolve_rejects_unknown_names() {
        let err = pair().resolve("../etc").unwrap_err();
        assert!(matches!(err, SyncError::UnknownRepository(ref n) if n == "../etc"));
        assert_eq!(err.to_string(), "Unknown repository: ../etc");
    }

    #[test]
    fn opposite_argument_orders_do_not_deadlock() {
        let pair = Arc::new(pair());
        let handles: Vec<_> = [("internal", "customer"), ("customer", "internal")]
            .into_iter()
            .map(|(x, y)| {
                let pair = Arc::clone(&pair);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let (a, _) = pair.resolve(x).expect("known");
                        let (b, _) = pair.resolve(y).expect("known");
                        let _guard = lock_both(a, b);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished");
        }
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let pair = Arc::new(pair());
        let poisoner = Arc::clone(&pair);
        let _ = thread::spawn(move || {
            let (slot, _) = poisoner.resolve("internal").expect("known");
            let _guard = slot.lock();
            panic!("poison the lock");
        })
        .join();

        let (slot, _) = pair.resolve("internal").expect("known");
        drop(slot.lock());
    }
}
