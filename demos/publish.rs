//! Publishes successive configuration snapshots to concurrent readers.
//!
//! Writers allocate each snapshot in a `SharedPtr`, keep it alive in a list
//! guarded by an `ExclusiveSpinLock` and make it visible through an `Atomic`.
//! Readers only ever observe the raw pointer, which stays valid because no
//! snapshot is freed before the registry itself.

use std::cell::UnsafeCell;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::Arc;
use std::thread;

use resident::{Atomic, ExclusiveSpinLock, Residency, ScopedLock, SharedPtr};

const WRITERS: u64 = 4;
const UPDATES: u64 = 25;

#[derive(Debug)]
struct Config {
    writer: u64,
    revision: u64,
}

struct Registry {
    current: Atomic<Config>,
    lock: ExclusiveSpinLock,
    snapshots: UnsafeCell<Vec<SharedPtr<Config>>>,
}

unsafe impl Sync for Registry {}

impl Registry {
    fn new() -> Self {
        Self {
            current: Atomic::null(),
            lock: ExclusiveSpinLock::new(),
            snapshots: UnsafeCell::new(Vec::new()),
        }
    }

    fn publish(&self, config: Config) -> usize {
        let snapshot: SharedPtr<Config> = SharedPtr::from_value(config, Residency::Pageable);

        let _guard = ScopedLock::new(&self.lock);
        self.current.store(snapshot.ptr(), Release);
        let snapshots = unsafe { &mut *self.snapshots.get() };
        snapshots.push(snapshot);
        snapshots.len()
    }

    fn current(&self) -> Option<&Config> {
        // snapshots are only freed when the registry is dropped
        unsafe { self.current.as_ref(Acquire) }
    }
}

fn main() {
    let registry = Arc::new(Registry::new());

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for revision in 0..UPDATES {
                    registry.publish(Config { writer, revision });
                }
            })
        })
        .collect();

    let reader = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let mut observed = 0;
            while observed < 1_000 {
                if let Some(config) = registry.current() {
                    assert!(config.writer <= WRITERS && config.revision < UPDATES);
                    observed += 1;
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let published = registry.publish(Config { writer: WRITERS, revision: 0 });
    println!("published {} snapshots, latest: {:?}", published, registry.current());
}
