use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::allocator::AllocatorId;
use crate::error::GcError;

/// Collector metadata placed in front of every managed value.
pub(crate) struct Header {
    mark: AtomicBool,
    owner: AllocatorId,
    size: usize,
    type_name: &'static str,
    drop_fn: unsafe fn(NonNull<Header>),
}

impl Header {
    pub fn owner(&self) -> AllocatorId {
        self.owner
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn mark(&self) {
        self.mark.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn unmark(&self) {
        self.mark.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.mark.load(Ordering::Relaxed)
    }
}

/// A managed value. Never moved once constructed; roots and the live set
/// refer to it by address.
#[repr(C)]
pub(crate) struct Allocation<T> {
    header: Header,
    data: T,
}

impl<T: 'static> Allocation<T> {
    /// Obtains storage for the container, then runs `init` and writes its
    /// value in place. The storage is released again if `init` fails.
    pub fn construct<E, F>(owner: AllocatorId, init: F) -> Result<NonNull<Allocation<T>>, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<GcError>,
    {
        let layout = Layout::new::<Allocation<T>>();
        let ptr = unsafe {
            std::alloc::alloc(layout) as *mut Allocation<T>
        };
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return Err(GcError::OutOfMemory { size: layout.size() }.into()),
        };

        let data = match init() {
            Ok(data) => data,
            Err(err) => {
                unsafe {
                    std::alloc::dealloc(ptr.as_ptr() as *mut u8, layout);
                }
                return Err(err);
            },
        };

        unsafe {
            ptr.as_ptr().write(Allocation {
                header: Header {
                    mark: AtomicBool::new(false),
                    owner,
                    size: layout.size(),
                    type_name: std::any::type_name::<T>(),
                    drop_fn: destroy::<T>,
                },
                data,
            });
        }

        Ok(ptr)
    }
}

impl<T> Allocation<T> {
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn erase(ptr: NonNull<Allocation<T>>) -> ObjectPtr {
        ObjectPtr(ptr.cast())
    }
}

unsafe fn destroy<T>(header: NonNull<Header>) {
    let ptr = header.cast::<Allocation<T>>().as_ptr();
    unsafe {
        std::ptr::drop_in_place(ptr);
        std::alloc::dealloc(ptr as *mut u8, Layout::new::<Allocation<T>>());
    }
}

/// Type erased identity of an [`Allocation`], as stored in the live sets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObjectPtr(NonNull<Header>);

// Only dereferenced while the object is known to be live, which the
// allocator lock establishes.
unsafe impl Send for ObjectPtr {}
unsafe impl Sync for ObjectPtr {}

impl ObjectPtr {
    /// # Safety
    /// The object must not have been destroyed.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a Header {
        unsafe { self.0.as_ref() }
    }

    /// Runs the value's destructor and releases the storage.
    ///
    /// # Safety
    /// Must be called at most once, and only after the object left the
    /// live set and no registered root targets it.
    pub unsafe fn destroy(self) {
        unsafe {
            let drop_fn = self.header().drop_fn;
            drop_fn(self.0);
        }
    }
}
