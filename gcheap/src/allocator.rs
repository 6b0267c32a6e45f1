use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::error::{GcError, Result};
use crate::object::{Allocation, ObjectPtr};
use crate::root::{Registration, Root};

/// Process unique identity of an [`Allocator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AllocatorId(u64);

impl AllocatorId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocator #{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RootId(u64);

/// Snapshot of an allocator's bookkeeping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub allocator: AllocatorId,
    pub objects: usize,
    pub roots: usize,
    pub bytes_allocated: usize,
    pub cycles: u64,
    pub swept: u64,
}

struct LiveSet {
    objects: HashSet<ObjectPtr>,
    roots: HashMap<RootId, ObjectPtr>,
    bytes_allocated: usize,
}

/// State shared between an [`Allocator`] and every root registered with it.
pub(crate) struct Heap {
    id: AllocatorId,
    live: Mutex<LiveSet>,
    object_hint: AtomicUsize,
    next_root: AtomicU64,
    cycles: AtomicU64,
    swept: AtomicU64,
    /// Set once the owning `Allocator` is gone. Nobody calls `gc` anymore, so
    /// every deregistration collects instead.
    orphaned: AtomicBool,
}

impl Heap {
    fn new() -> Self {
        Self {
            id: AllocatorId::next(),
            live: Mutex::new(LiveSet {
                objects: HashSet::new(),
                roots: HashMap::new(),
                bytes_allocated: 0,
            }),
            object_hint: AtomicUsize::new(0),
            next_root: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            swept: AtomicU64::new(0),
            orphaned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AllocatorId {
        self.id
    }

    fn next_root_id(&self) -> RootId {
        RootId(self.next_root.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a new object and its first root in one critical section, so no
    /// cycle can observe the object unrooted. `None` if the identity is
    /// already live.
    fn insert_rooted(self: &Arc<Self>, object: ObjectPtr) -> Option<Registration> {
        let id = self.next_root_id();
        {
            let mut live = self.live.lock();
            if !live.objects.insert(object) {
                return None;
            }

            live.bytes_allocated += unsafe { object.header() }.size();
            live.roots.insert(id, object);
            self.object_hint.store(live.objects.len(), Ordering::Relaxed);
        }

        Some(Registration::new(self.clone(), id))
    }

    /// The caller must hold a registered root to `target`.
    pub fn register_root(self: &Arc<Self>, target: ObjectPtr) -> Registration {
        let id = self.next_root_id();
        {
            let mut live = self.live.lock();
            debug_assert!(live.objects.contains(&target), "root to an object outside {}", self.id);
            live.roots.insert(id, target);
        }

        Registration::new(self.clone(), id)
    }

    pub fn retarget_root(&self, id: RootId, target: ObjectPtr) {
        let mut live = self.live.lock();
        debug_assert!(live.objects.contains(&target), "root to an object outside {}", self.id);
        let previous = live.roots.insert(id, target);
        debug_assert!(previous.is_some(), "retargeted an unregistered root");
    }

    pub fn unregister_root(&self, id: RootId) {
        let removed = self.live.lock().roots.remove(&id);
        debug_assert!(removed.is_some(), "unregistered an unknown root");

        if self.orphaned.load(Ordering::Acquire) {
            self.drain();
        }
    }

    fn bytes_allocated(&self) -> usize {
        self.live.lock().bytes_allocated
    }

    /// One mark-sweep cycle. Returns the number of objects destroyed.
    ///
    /// Marking only looks at registered roots; fields of a live object keep
    /// their targets alive only when they are roots themselves. Unmarked
    /// objects are unlinked under the lock and destroyed after it is
    /// released, because their destructors drop roots into this heap.
    fn collect_cycle(&self) -> usize {
        if self.object_hint.load(Ordering::Relaxed) == 0 {
            return 0;
        }

        let (doomed, bytes) = {
            let mut live = self.live.lock();

            for object in &live.objects {
                unsafe { object.header() }.unmark();
            }

            log::trace!("{}: marking from {} roots", self.id, live.roots.len());
            for target in live.roots.values() {
                unsafe { target.header() }.mark();
            }

            let doomed: Vec<ObjectPtr> = live.objects
                .iter()
                .copied()
                .filter(|object| !unsafe { object.header() }.is_marked())
                .collect();

            let mut bytes = 0;
            for object in &doomed {
                live.objects.remove(object);
                bytes += unsafe { object.header() }.size();
            }
            live.bytes_allocated -= bytes;
            self.object_hint.store(live.objects.len(), Ordering::Relaxed);

            (doomed, bytes)
        };

        for object in &doomed {
            unsafe {
                debug_assert_eq!(object.header().owner(), self.id);
                log::trace!("{}: sweeping {}", self.id, object.header().type_name());
                object.destroy();
            }
        }

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.swept.fetch_add(doomed.len() as u64, Ordering::Relaxed);
        log::debug!("{}: cycle {} swept {} objects ({} bytes)", self.id, cycle, doomed.len(), bytes);

        doomed.len()
    }

    /// Collects until a cycle frees nothing. Objects dropped by a parent's
    /// destructor are only reclaimed by the cycle after it.
    fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let swept = self.collect_cycle();
            if swept == 0 {
                return total;
            }
            total += swept;
        }
    }

    fn stats(&self) -> HeapStats {
        let live = self.live.lock();
        HeapStats {
            allocator: self.id,
            objects: live.objects.len(),
            roots: live.roots.len(),
            bytes_allocated: live.bytes_allocated,
            cycles: self.cycles.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Heap {
    // Every root holds an Arc to its heap, so nothing left here is rooted
    // from this heap and all of it is garbage.
    fn drop(&mut self) {
        let live = self.live.get_mut();
        debug_assert!(live.roots.is_empty());

        let remaining: Vec<ObjectPtr> = live.objects.drain().collect();
        if !remaining.is_empty() {
            log::debug!("{}: releasing {} objects on drop", self.id, remaining.len());
        }

        for object in remaining {
            unsafe {
                object.destroy();
            }
        }
    }
}

/// Owns a set of managed objects and the roots that keep them alive.
pub struct Allocator {
    heap: Arc<Heap>,
    config: Config,
    threshold: AtomicUsize,
}

impl Allocator {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            heap: Arc::new(Heap::new()),
            threshold: AtomicUsize::new(config.initial_threshold),
            config,
        }
    }

    pub fn id(&self) -> AllocatorId {
        self.heap.id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Moves `data` into the heap and returns the first root to it.
    ///
    /// Returns a null root if the new object's identity is somehow already
    /// live; callers should check [`Root::is_null`] before dereferencing.
    pub fn manage<T>(&self, data: T) -> Result<Root<T>>
    where
        T: Send + Sync + 'static,
    {
        self.manage_with(|| Ok::<T, GcError>(data))
    }

    /// Like [`manage`](Self::manage), but the value is built by `init` after
    /// storage has been obtained. An error from `init` is passed through
    /// and leaves nothing behind in the heap.
    pub fn manage_with<T, E, F>(&self, init: F) -> std::result::Result<Root<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<GcError>,
    {
        let ptr = Allocation::construct(self.id(), init)?;

        match self.heap.insert_rooted(Allocation::erase(ptr)) {
            Some(registration) => Ok(Root::from_registration(registration, ptr)),
            None => {
                log::error!("{}", GcError::DuplicateObject { allocator: self.id() });
                Ok(Root::null())
            },
        }
    }

    /// Runs one full mark-sweep cycle.
    pub fn gc(&self) {
        self.heap.collect_cycle();
    }

    /// Runs a cycle only once allocation has passed the current threshold.
    /// Returns whether a cycle ran.
    pub fn collect(&self) -> bool {
        if self.heap.bytes_allocated() <= self.threshold.load(Ordering::Relaxed) {
            return false;
        }

        self.gc();

        let threshold = self.config.next_threshold(self.heap.bytes_allocated());
        self.threshold.store(threshold, Ordering::Relaxed);
        log::debug!("{}: next collection above {} bytes", self.id(), threshold);

        true
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let mut swept = self.heap.drain();
        self.heap.orphaned.store(true, Ordering::Release);
        // A root dropped on another thread before the flag was visible.
        swept += self.heap.drain();

        let stats = self.heap.stats();
        log::debug!("{}: teardown swept {} objects", stats.allocator, swept);

        if stats.objects > 0 {
            log::warn!(
                "{}: {} objects are still rooted at teardown, they are collected as their external roots drop; roots between them alone keep them forever",
                stats.allocator,
                stats.objects,
            );
        }
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Tracked {
        value: u32,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(value: u32, drops: &Arc<AtomicUsize>) -> Tracked {
        Tracked {
            value,
            drops: drops.clone(),
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = Allocator::new();
        let b = Allocator::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn empty_gc_is_a_no_op() {
        let allocator = Allocator::new();
        allocator.gc();
        allocator.gc();

        let stats = allocator.stats();
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.cycles, 0);
    }

    #[test]
    fn manage_registers_object_and_root() {
        let allocator = Allocator::new();
        let root = allocator.manage(7u64).unwrap();
        assert_eq!(*root, 7);

        let stats = allocator.stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.roots, 1);
        assert_eq!(stats.bytes_allocated, std::mem::size_of::<Allocation<u64>>());
    }

    #[test]
    fn unrooted_objects_are_swept() {
        let drops = Arc::new(AtomicUsize::new(0));
        let allocator = Allocator::new();

        let kept = allocator.manage(tracked(1, &drops)).unwrap();
        drop(allocator.manage(tracked(2, &drops)).unwrap());

        allocator.gc();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(kept.value, 1);

        let stats = allocator.stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.swept, 1);
        assert_eq!(stats.bytes_allocated, std::mem::size_of::<Allocation<Tracked>>());
    }

    #[test]
    fn failed_init_leaves_heap_untouched() {
        let allocator = Allocator::new();
        let result: std::result::Result<Root<u32>, GcError> =
            allocator.manage_with(|| Err(GcError::InvalidConfig("refused".into())));

        assert!(matches!(result, Err(GcError::InvalidConfig(_))));
        let stats = allocator.stats();
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.roots, 0);
    }

    #[test]
    fn collect_respects_threshold() {
        let size = std::mem::size_of::<Allocation<[u8; 64]>>();
        let allocator = Allocator::with_config(Config {
            initial_threshold: 2 * size,
            threshold_adj: 2.0,
        });

        let mut roots = vec![allocator.manage([0u8; 64]).unwrap()];
        assert!(!allocator.collect());

        roots.push(allocator.manage([1u8; 64]).unwrap());
        roots.push(allocator.manage([2u8; 64]).unwrap());
        roots.pop();

        assert!(allocator.collect());
        let stats = allocator.stats();
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.bytes_allocated, 2 * size);

        // Threshold moved up to 2 * 2 * size + 100.
        roots.push(allocator.manage([3u8; 64]).unwrap());
        assert!(!allocator.collect());
        assert_eq!(allocator.stats().cycles, 1);
    }

    #[test]
    fn teardown_destroys_unrooted_objects() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let allocator = Allocator::new();
            for value in 0..4 {
                drop(allocator.manage(tracked(value, &drops)).unwrap());
            }
        }

        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn embedded_roots_are_reclaimed_after_teardown() {
        struct Node {
            child: parking_lot::Mutex<Root<Tracked>>,
            drops: Arc<AtomicUsize>,
        }

        impl Drop for Node {
            fn drop(&mut self) {
                self.drops.fetch_add(1, Ordering::SeqCst);
            }
        }

        let parent_drops = Arc::new(AtomicUsize::new(0));
        let child_drops = Arc::new(AtomicUsize::new(0));

        let parent = {
            let allocator = Allocator::new();
            let parent = allocator.manage(Node {
                child: parking_lot::Mutex::new(Root::null()),
                drops: parent_drops.clone(),
            }).unwrap();
            *parent.child.lock() = allocator.manage(tracked(3, &child_drops)).unwrap();
            parent
        };

        assert_eq!(parent.child.lock().value, 3);
        assert_eq!(parent_drops.load(Ordering::SeqCst), 0);

        drop(parent);
        assert_eq!(parent_drops.load(Ordering::SeqCst), 1);
        assert_eq!(child_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn roots_outliving_the_allocator_stay_valid() {
        let drops = Arc::new(AtomicUsize::new(0));
        let root = {
            let allocator = Allocator::new();
            allocator.manage(tracked(9, &drops)).unwrap()
        };

        assert_eq!(root.value, 9);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(root);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
