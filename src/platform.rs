//! Capability surface the core consumes.
//!
//! The real backend talks to the window server; the mock backend answers
//! from a scripted scene and records every command so tests can assert on
//! intent. Commands report success; queries answer with an option.
//! Operations that need the scripting addition report failure when it is
//! unavailable rather than erroring.

pub mod mock;

#[cfg(target_os = "macos")]
pub mod macos;

use crate::sys::geometry::{Point, Rect};
use crate::sys::process::pid_t;
use crate::sys::screen::{DisplayId, SpaceId, SpaceKind, WindowId};

pub trait Platform {
    // window queries
    fn window_frame(&self, wid: WindowId) -> Option<Rect>;
    fn window_space(&self, wid: WindowId) -> Option<SpaceId>;
    fn window_pid(&self, wid: WindowId) -> Option<pid_t>;
    fn window_level(&self, wid: WindowId) -> Option<i32>;
    fn window_is_minimized(&self, wid: WindowId) -> Option<bool>;
    fn window_is_fullscreen(&self, wid: WindowId) -> Option<bool>;
    fn window_title(&self, wid: WindowId) -> Option<String>;
    fn window_role(&self, wid: WindowId) -> Option<String>;
    fn window_subrole(&self, wid: WindowId) -> Option<String>;
    fn app_name(&self, pid: pid_t) -> Option<String>;

    // window commands
    fn set_window_frame(&mut self, wid: WindowId, frame: Rect) -> bool;
    fn set_window_level(&mut self, wid: WindowId, level: i32) -> bool;
    fn set_window_opacity(&mut self, wid: WindowId, alpha: f32) -> bool;
    fn focus_window(&mut self, wid: WindowId) -> bool;
    /// Requires the scripting addition.
    fn focus_window_without_raise(&mut self, wid: WindowId) -> bool;
    fn minimize_window(&mut self, wid: WindowId) -> bool;
    fn close_window(&mut self, wid: WindowId) -> bool;

    // space queries
    fn space_kind(&self, sid: SpaceId) -> Option<SpaceKind>;
    fn space_display(&self, sid: SpaceId) -> Option<DisplayId>;
    fn space_windows(&self, sid: SpaceId) -> Option<Vec<WindowId>>;
    fn active_space(&self, did: DisplayId) -> Option<SpaceId>;

    // space commands
    fn focus_space(&mut self, sid: SpaceId) -> bool;
    fn move_window_to_space(&mut self, wid: WindowId, sid: SpaceId) -> bool;
    /// Requires the scripting addition.
    fn create_space(&mut self, did: DisplayId) -> Option<SpaceId>;
    /// Requires the scripting addition.
    fn destroy_space(&mut self, sid: SpaceId) -> bool;

    // display queries
    fn display_frame(&self, did: DisplayId) -> Option<Rect>;
    fn display_spaces(&self, did: DisplayId) -> Option<Vec<SpaceId>>;
    fn displays(&self) -> Vec<DisplayId>;

    // system
    fn cursor_position(&self) -> Option<Point>;
    fn warp_cursor(&mut self, point: Point) -> bool;
    fn focused_window(&self) -> Option<WindowId>;
    fn focused_pid(&self) -> Option<pid_t>;
    fn sa_available(&self) -> bool;
}
