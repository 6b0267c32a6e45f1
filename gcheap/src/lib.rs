//! A garbage collected object heap for otherwise manually managed programs.
//!
//! Values moved into an [`Allocator`] are reached through [`Root`] handles.
//! A collection cycle ([`Allocator::gc`]) marks every object targeted by a
//! registered root and destroys the rest. Objects are never traced: a managed
//! value keeps another alive only by holding a `Root` to it.

mod allocator;
mod collector;
mod config;
mod error;
mod object;
mod root;

use std::sync::OnceLock;

pub use allocator::{Allocator, AllocatorId, HeapStats};
pub use collector::Collector;
pub use config::Config;
pub use error::{GcError, Result};
pub use root::Root;

static GLOBAL: OnceLock<Allocator> = OnceLock::new();

/// Process wide allocator, created on first use.
pub fn global() -> &'static Allocator {
    GLOBAL.get_or_init(Allocator::new)
}

/// [`Allocator::manage`] on the [`global`] allocator.
pub fn manage<T>(data: T) -> Result<Root<T>>
where
    T: Send + Sync + 'static,
{
    global().manage(data)
}

/// [`Allocator::gc`] on the [`global`] allocator.
pub fn gc() {
    global().gc()
}
