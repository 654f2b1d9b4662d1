//! Main-queue marshalling for the payload handlers. The Dock's internal
//! functions must run on its main thread; the listener thread never calls
//! them directly.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

#[repr(C)]
pub struct dispatch_object_s {
    _private: [u8; 0],
}

pub type dispatch_queue_t = *mut dispatch_object_s;

#[link(name = "System", kind = "framework")]
unsafe extern "C" {
    static _dispatch_main_q: dispatch_object_s;
    fn dispatch_async_f(
        queue: dispatch_queue_t,
        context: *mut c_void,
        work: extern "C" fn(*mut c_void),
    );
    fn dispatch_sync_f(
        queue: dispatch_queue_t,
        context: *mut c_void,
        work: extern "C" fn(*mut c_void),
    );
}

fn main_queue() -> dispatch_queue_t {
    (unsafe { &raw const _dispatch_main_q }) as dispatch_queue_t
}

extern "C" fn call_boxed(context: *mut c_void) {
    let closure: Box<Box<dyn FnOnce() + Send>> =
        unsafe { Box::from_raw(context as *mut Box<dyn FnOnce() + Send>) };
    closure();
}

/// Fire-and-forget onto the main queue.
pub fn on_main_queue(f: impl FnOnce() + Send + 'static) {
    let boxed: Box<Box<dyn FnOnce() + Send>> = Box::new(Box::new(f));
    unsafe { dispatch_async_f(main_queue(), Box::into_raw(boxed).cast(), call_boxed) };
}

struct SyncContext<T, F> {
    f: Option<F>,
    out: Option<T>,
}

extern "C" fn call_sync<T, F: FnOnce() -> T>(context: *mut c_void) {
    let ctx = unsafe { &mut *(context as *mut SyncContext<T, F>) };
    if let Some(f) = ctx.f.take() {
        ctx.out = Some(f());
    }
}

/// Runs `f` on the main queue and waits for its result. Returns `None`
/// only if the work was never invoked.
pub fn on_main_queue_sync<T: Send, F: FnOnce() -> T + Send>(f: F) -> Option<T> {
    let mut ctx = SyncContext { f: Some(f), out: None };
    unsafe {
        dispatch_sync_f(main_queue(), (&raw mut ctx).cast(), call_sync::<T, F>);
    }
    ctx.out
}
