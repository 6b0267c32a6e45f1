use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocator::{AllocatorId, Heap, RootId};
use crate::object::{Allocation, ObjectPtr};

/// Membership of one root in one heap's root set. Dropping it deregisters.
pub(crate) struct Registration {
    heap: Arc<Heap>,
    id: RootId,
}

impl Registration {
    pub(crate) fn new(heap: Arc<Heap>, id: RootId) -> Self {
        Self {
            heap,
            id,
        }
    }

    fn same_heap(&self, other: &Registration) -> bool {
        Arc::ptr_eq(&self.heap, &other.heap)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.heap.unregister_root(self.id);
    }
}

struct Target<T> {
    registration: Registration,
    ptr: NonNull<Allocation<T>>,
}

impl<T> Target<T> {
    fn object(&self) -> ObjectPtr {
        Allocation::erase(self.ptr)
    }
}

/// A handle whose existence keeps its target alive.
///
/// A root is registered with its target's allocator exactly as long as it
/// points somewhere; [`Root::null`] is registered nowhere. Roots stored inside
/// a managed object keep their targets alive for as long as that object
/// lives, which is the only way reachability propagates: the collector never
/// looks inside objects, so a reference that is not itself a `Root` keeps
/// nothing alive.
pub struct Root<T: 'static> {
    target: Option<Target<T>>,
}

// A root only hands out `&T`, and the target may be dropped on whichever
// thread runs the collector.
unsafe impl<T: Send + Sync + 'static> Send for Root<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Root<T> {}

impl<T: 'static> Root<T> {
    pub const fn null() -> Self {
        Self {
            target: None,
        }
    }

    pub(crate) fn from_registration(registration: Registration, ptr: NonNull<Allocation<T>>) -> Self {
        Self {
            target: Some(Target {
                registration,
                ptr,
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    /// The allocator this root is registered with, `None` for a null root.
    pub fn allocator_id(&self) -> Option<AllocatorId> {
        self.target.as_ref().map(|target| target.registration.heap.id())
    }

    pub fn get(&self) -> Option<&T> {
        self.target.as_ref().map(|target| {
            unsafe { target.ptr.as_ref() }.data()
        })
    }

    /// Points this root at `other`'s target.
    ///
    /// When the targets live in different allocators the registration moves:
    /// this root leaves its old allocator's root set before joining the new
    /// one. Setting from a null root is the same as [`clear`](Self::clear).
    pub fn set(&mut self, other: &Root<T>) {
        let source = match &other.target {
            Some(source) => source,
            None => return self.clear(),
        };
        debug_assert_eq!(unsafe { source.ptr.as_ref() }.header().owner(), source.registration.heap.id());

        if let Some(current) = self.target.as_mut() {
            if current.registration.same_heap(&source.registration) {
                current.registration.heap.retarget_root(current.registration.id, source.object());
                current.ptr = source.ptr;
                return;
            }
        }

        self.clear();
        let registration = source.registration.heap.register_root(source.object());
        self.target = Some(Target {
            registration,
            ptr: source.ptr,
        });
    }

    /// Drops the target and deregisters.
    pub fn clear(&mut self) {
        self.target = None;
    }

    #[inline]
    pub fn ptr_eq(a: &Root<T>, b: &Root<T>) -> bool {
        a.target.as_ref().map(|t| t.ptr) == b.target.as_ref().map(|t| t.ptr)
    }
}

impl<T: 'static> Default for Root<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: 'static> Clone for Root<T> {
    fn clone(&self) -> Self {
        match &self.target {
            Some(target) => {
                let registration = target.registration.heap.register_root(target.object());
                Self::from_registration(registration, target.ptr)
            },
            None => Self::null(),
        }
    }
}

impl<T: 'static> Deref for Root<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        #[inline(never)]
        #[cold]
        fn null_deref(type_name: &str) -> ! {
            panic!("dereferenced a null Root<{}>", type_name);
        }

        match self.get() {
            Some(data) => data,
            None => null_deref(std::any::type_name::<T>()),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get() {
            Some(inner) => write!(f, "Root({:?})", inner),
            None => write!(f, "Root(null)"),
        }
    }
}

impl<T: fmt::Display + 'static> fmt::Display for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get() {
            Some(inner) => inner.fmt(f),
            None => write!(f, "null"),
        }
    }
}
