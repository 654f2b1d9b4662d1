//! Ownership wrapper for the accessibility element backing a window.
//!
//! The window table stores one [`AxHandle`] per entry. The handle owns the
//! underlying platform reference and releases it exactly once, when the
//! entry is removed or its handle is overwritten. Tests use the counting
//! variant to assert the release discipline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(target_os = "macos")]
use std::ffi::c_void;
#[cfg(target_os = "macos")]
use std::ptr::NonNull;

pub struct AxHandle(Inner);

enum Inner {
    /// Retained AXUIElementRef. Dropping releases the CF reference.
    #[cfg(target_os = "macos")]
    Element(NonNull<c_void>),
    /// Increments the shared counter on release.
    Counter(Arc<AtomicU32>),
    Empty,
}

// The raw element is only touched from the main thread, but the handle
// itself may be moved across the payload/injector boundary.
unsafe impl Send for AxHandle {}

impl AxHandle {
    /// A handle with no backing element (windows adopted before their
    /// accessibility element resolves).
    pub fn empty() -> Self {
        AxHandle(Inner::Empty)
    }

    /// Wraps an already-retained AXUIElementRef, taking ownership of the
    /// retain count.
    #[cfg(target_os = "macos")]
    pub unsafe fn from_retained(element: NonNull<c_void>) -> Self {
        AxHandle(Inner::Element(element))
    }

    #[cfg(target_os = "macos")]
    pub fn as_ptr(&self) -> Option<NonNull<c_void>> {
        match self.0 {
            Inner::Element(p) => Some(p),
            _ => None,
        }
    }

    /// Test instrumentation: bumps `releases` exactly once on drop.
    pub fn counting(releases: &Arc<AtomicU32>) -> Self {
        AxHandle(Inner::Counter(releases.clone()))
    }
}

impl Drop for AxHandle {
    fn drop(&mut self) {
        match &self.0 {
            #[cfg(target_os = "macos")]
            Inner::Element(p) => unsafe {
                crate::sys::skylight::CFRelease(p.as_ptr().cast());
            },
            Inner::Counter(releases) => {
                releases.fetch_add(1, Ordering::SeqCst);
            }
            Inner::Empty => {}
        }
    }
}

impl std::fmt::Debug for AxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            #[cfg(target_os = "macos")]
            Inner::Element(p) => write!(f, "AxHandle({:?})", p),
            Inner::Counter(_) => write!(f, "AxHandle(counting)"),
            Inner::Empty => write!(f, "AxHandle(empty)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_handle_releases_exactly_once() {
        let releases = Arc::new(AtomicU32::new(0));
        let handle = AxHandle::counting(&releases);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_handle_is_inert() {
        drop(AxHandle::empty());
    }
}
