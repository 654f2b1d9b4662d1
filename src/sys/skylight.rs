// credits
// https://github.com/asmagill/hs._asm.undocumented.spaces/blob/master/CGSSpace.h
// https://github.com/koekeishiya/yabai/blob/master/src/misc/extern.h

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::ffi::{c_int, c_uint, c_void};

use bitflags::bitflags;
use objc2_core_foundation::{CGPoint, CGRect};
use once_cell::sync::Lazy;

pub type cid_t = i32;

/// The process-wide window server connection; discovered once, never
/// released.
pub static G_CONNECTION: Lazy<cid_t> = Lazy::new(|| unsafe { SLSMainConnectionID() });

pub fn main_connection() -> cid_t {
    *G_CONNECTION
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct CGSSpaceMask: c_int {
        const INCLUDE_CURRENT = 1 << 0;
        const INCLUDE_OTHERS  = 1 << 1;
        const INCLUDE_USER    = 1 << 2;
        const INCLUDE_OS      = 1 << 3;
        const VISIBLE         = 1 << 16;

        const ALL_SPACES =
            Self::INCLUDE_USER.bits() | Self::INCLUDE_OTHERS.bits() | Self::INCLUDE_CURRENT.bits();
    }
}

pub type CFTypeRef = *const c_void;
pub type CFArrayRef = *const c_void;
pub type CFStringRef = *const c_void;
pub type CFNumberRef = *const c_void;
pub type CFAllocatorRef = *const c_void;
pub type CFIndex = isize;

const K_CF_NUMBER_SINT32_TYPE: CFIndex = 3;
const K_CF_NUMBER_SINT64_TYPE: CFIndex = 4;

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    pub fn CFRelease(cf: *const c_void);
    pub fn CFArrayCreate(
        allocator: CFAllocatorRef,
        values: *const *const c_void,
        num_values: CFIndex,
        callbacks: *const c_void,
    ) -> CFArrayRef;
    pub fn CFArrayGetCount(array: CFArrayRef) -> CFIndex;
    pub fn CFArrayGetValueAtIndex(array: CFArrayRef, index: CFIndex) -> *const c_void;
    pub fn CFNumberCreate(
        allocator: CFAllocatorRef,
        number_type: CFIndex,
        value_ptr: *const c_void,
    ) -> CFNumberRef;
    pub fn CFNumberGetValue(number: CFNumberRef, number_type: CFIndex, out: *mut c_void) -> bool;
    pub static kCFTypeArrayCallBacks: c_void;
}

#[link(name = "SkyLight", kind = "framework")]
unsafe extern "C" {
    pub fn SLSMainConnectionID() -> cid_t;
    pub fn SLSGetSpaceManagementMode(cid: cid_t) -> c_int;
    pub fn CGSGetActiveSpace(cid: cid_t) -> u64;
    pub fn CGSCopySpaces(cid: cid_t, mask: CGSSpaceMask) -> CFArrayRef;
    pub fn CGSManagedDisplayGetCurrentSpace(cid: cid_t, uuid: CFStringRef) -> u64;
    pub fn CGSCopyManagedDisplays(cid: cid_t) -> CFArrayRef;
    pub fn SLSSpaceGetType(cid: cid_t, sid: u64) -> c_int;
    pub fn SLSGetWindowLevel(cid: cid_t, wid: u32, level: *mut c_int) -> c_int;
    pub fn CGSGetWindowBounds(cid: cid_t, wid: u32, frame: *mut CGRect) -> c_int;
    pub fn SLSGetCurrentCursorLocation(cid: cid_t, point: *mut CGPoint) -> c_int;
    pub fn CGWarpMouseCursorPosition(point: CGPoint) -> c_int;
    pub fn SLSCopySpacesForWindows(
        cid: cid_t,
        selector: c_uint,
        windows: CFArrayRef,
    ) -> CFArrayRef;
    pub fn SLSCopyWindowsWithOptionsAndTags(
        cid: cid_t,
        owner: c_uint,
        spaces: CFArrayRef,
        options: c_uint,
        set_tags: *mut u64,
        clear_tags: *mut u64,
    ) -> CFArrayRef;
    pub fn SLSMoveWindow(cid: cid_t, wid: u32, point: *const CGPoint) -> c_int;
    pub fn SLSSetWindowAlpha(cid: cid_t, wid: u32, alpha: f32) -> c_int;
    pub fn SLSSetWindowLevel(cid: cid_t, wid: u32, level: c_int) -> c_int;
    pub fn SLSOrderWindow(cid: cid_t, wid: u32, order: c_int, relative_to: u32) -> c_int;
    pub fn SLSSetWindowTags(cid: cid_t, wid: u32, tags: *mut u64, tag_count: c_int) -> c_int;
    pub fn SLSClearWindowTags(cid: cid_t, wid: u32, tags: *mut u64, tag_count: c_int) -> c_int;
    pub fn SLSMoveWindowsToManagedSpace(cid: cid_t, windows: CFArrayRef, sid: u64) -> c_int;
    pub fn SLSManagedDisplaySetCurrentSpace(
        cid: cid_t,
        display_uuid: CFStringRef,
        sid: u64,
    ) -> c_int;
    pub fn CGDisplayCreateUUIDFromDisplayID(did: u32) -> CFTypeRef;
    pub fn CFUUIDCreateString(allocator: CFAllocatorRef, uuid: CFTypeRef) -> CFStringRef;
}

/// Whether "displays have separate Spaces" is enabled; the manager
/// refuses to start without it.
pub fn displays_have_separate_spaces() -> bool {
    unsafe { SLSGetSpaceManagementMode(main_connection()) == 1 }
}

fn cf_number_u32(value: u32) -> CFNumberRef {
    let v = value as i32;
    unsafe { CFNumberCreate(std::ptr::null(), K_CF_NUMBER_SINT32_TYPE, (&raw const v).cast()) }
}

/// Wraps window ids in a CF array and hands them to the managed-space
/// mover. Every CF object created here is released before returning.
pub fn move_windows_to_space(wids: &[u32], sid: u64) -> bool {
    unsafe {
        let numbers: Vec<CFNumberRef> = wids.iter().map(|w| cf_number_u32(*w)).collect();
        let array = CFArrayCreate(
            std::ptr::null(),
            numbers.as_ptr().cast(),
            numbers.len() as CFIndex,
            &raw const kCFTypeArrayCallBacks,
        );
        let ok = if array.is_null() {
            false
        } else {
            let r = SLSMoveWindowsToManagedSpace(main_connection(), array, sid);
            CFRelease(array);
            r == 0
        };
        for number in numbers {
            if !number.is_null() {
                CFRelease(number);
            }
        }
        ok
    }
}

/// Number of spaces across all displays.
pub fn managed_space_count() -> u64 {
    unsafe {
        let spaces = CGSCopySpaces(main_connection(), CGSSpaceMask::ALL_SPACES);
        if spaces.is_null() {
            return 0;
        }
        let count = CFArrayGetCount(spaces);
        CFRelease(spaces);
        count as u64
    }
}

/// Highest space id currently known; space ids are handed out
/// monotonically, so the newest space carries the maximum.
pub fn newest_space_id() -> u64 {
    unsafe {
        let spaces = CGSCopySpaces(main_connection(), CGSSpaceMask::ALL_SPACES);
        if spaces.is_null() {
            return 0;
        }
        let mut newest: u64 = 0;
        for i in 0..CFArrayGetCount(spaces) {
            let number = CFArrayGetValueAtIndex(spaces, i);
            let mut value: i64 = 0;
            if !number.is_null()
                && CFNumberGetValue(number, K_CF_NUMBER_SINT64_TYPE, (&raw mut value).cast())
            {
                newest = newest.max(value as u64);
            }
        }
        CFRelease(spaces);
        newest
    }
}
