//! Scripted platform for tests.
//!
//! A scene is set up with displays, spaces, and windows; every command is
//! recorded and also applied to the scene so later queries observe it.
//! Windows can be marked as resisting resize for a number of passes, which
//! is how the two-pass application logic gets exercised.

use crate::common::collections::HashMap;
use crate::platform::Platform;
use crate::sys::geometry::{Point, Rect};
use crate::sys::process::pid_t;
use crate::sys::screen::{DisplayId, SpaceId, SpaceKind, WindowId};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFrame(WindowId, Rect),
    SetLevel(WindowId, i32),
    SetOpacity(WindowId, f32),
    Focus(WindowId),
    FocusWithoutRaise(WindowId),
    Minimize(WindowId),
    Close(WindowId),
    FocusSpace(SpaceId),
    MoveToSpace(WindowId, SpaceId),
    CreateSpace(DisplayId),
    DestroySpace(SpaceId),
    WarpCursor(Point),
}

#[derive(Debug, Clone)]
struct MockWindow {
    frame: Rect,
    space: SpaceId,
    pid: pid_t,
    level: i32,
    minimized: bool,
    fullscreen: bool,
    title: String,
    role: String,
    subrole: String,
    /// Remaining set-frame calls this window will ignore.
    resist: u32,
}

#[derive(Debug, Clone)]
struct MockDisplay {
    frame: Rect,
    spaces: Vec<SpaceId>,
    active: SpaceId,
}

#[derive(Default)]
pub struct MockPlatform {
    displays: Vec<(DisplayId, MockDisplay)>,
    space_kinds: HashMap<SpaceId, SpaceKind>,
    windows: HashMap<WindowId, MockWindow>,
    app_names: HashMap<pid_t, String>,
    cursor: Option<Point>,
    focused: Option<WindowId>,
    sa: bool,
    next_space: u64,
    pub commands: Vec<Command>,
    set_frame_counts: HashMap<WindowId, u32>,
}

impl MockPlatform {
    pub fn new() -> Self {
        MockPlatform { next_space: 1000, ..Default::default() }
    }

    pub fn single_display(frame: Rect, space: SpaceId) -> Self {
        let mut platform = MockPlatform::new();
        platform.add_display(DisplayId::new(1), frame, &[space]);
        platform
    }

    pub fn add_display(&mut self, did: DisplayId, frame: Rect, spaces: &[SpaceId]) {
        for sid in spaces {
            self.space_kinds.insert(*sid, SpaceKind::User);
        }
        self.displays.push((did, MockDisplay {
            frame,
            spaces: spaces.to_vec(),
            active: spaces[0],
        }));
    }

    pub fn add_window(&mut self, wid: WindowId, pid: pid_t, space: SpaceId, frame: Rect) {
        self.windows.insert(wid, MockWindow {
            frame,
            space,
            pid,
            level: 0,
            minimized: false,
            fullscreen: false,
            title: String::new(),
            role: String::from("AXWindow"),
            subrole: String::from("AXStandardWindow"),
            resist: 0,
        });
    }

    pub fn set_app_name(&mut self, pid: pid_t, name: &str) {
        self.app_names.insert(pid, name.to_string());
    }

    pub fn set_window_title(&mut self, wid: WindowId, title: &str) {
        if let Some(w) = self.windows.get_mut(&wid) {
            title.clone_into(&mut w.title);
        }
    }

    pub fn set_window_role(&mut self, wid: WindowId, role: &str, subrole: &str) {
        if let Some(w) = self.windows.get_mut(&wid) {
            role.clone_into(&mut w.role);
            subrole.clone_into(&mut w.subrole);
        }
    }

    pub fn set_space_kind(&mut self, sid: SpaceId, kind: SpaceKind) {
        self.space_kinds.insert(sid, kind);
    }

    pub fn remove_window(&mut self, wid: WindowId) {
        self.windows.remove(&wid);
    }

    pub fn set_minimized(&mut self, wid: WindowId, minimized: bool) {
        if let Some(w) = self.windows.get_mut(&wid) {
            w.minimized = minimized;
        }
    }

    pub fn set_cursor(&mut self, p: Point) {
        self.cursor = Some(p);
    }

    pub fn enable_sa(&mut self) {
        self.sa = true;
    }

    /// The window ignores the next `passes` set-frame commands.
    pub fn resist_resize(&mut self, wid: WindowId, passes: u32) {
        if let Some(w) = self.windows.get_mut(&wid) {
            w.resist = passes;
        }
    }

    pub fn set_frame_count(&self, wid: WindowId) -> u32 {
        self.set_frame_counts.get(&wid).copied().unwrap_or(0)
    }

    pub fn frames_issued(&self) -> Vec<(WindowId, Rect)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::SetFrame(wid, frame) => Some((*wid, *frame)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
        self.set_frame_counts.clear();
    }

    fn display_mut(&mut self, did: DisplayId) -> Option<&mut MockDisplay> {
        self.displays.iter_mut().find(|(d, _)| *d == did).map(|(_, s)| s)
    }
}

impl Platform for MockPlatform {
    fn window_frame(&self, wid: WindowId) -> Option<Rect> {
        self.windows.get(&wid).map(|w| w.frame)
    }

    fn window_space(&self, wid: WindowId) -> Option<SpaceId> {
        self.windows.get(&wid).map(|w| w.space)
    }

    fn window_pid(&self, wid: WindowId) -> Option<pid_t> {
        self.windows.get(&wid).map(|w| w.pid)
    }

    fn window_level(&self, wid: WindowId) -> Option<i32> {
        self.windows.get(&wid).map(|w| w.level)
    }

    fn window_is_minimized(&self, wid: WindowId) -> Option<bool> {
        self.windows.get(&wid).map(|w| w.minimized)
    }

    fn window_is_fullscreen(&self, wid: WindowId) -> Option<bool> {
        self.windows.get(&wid).map(|w| w.fullscreen)
    }

    fn window_title(&self, wid: WindowId) -> Option<String> {
        self.windows.get(&wid).map(|w| w.title.clone())
    }

    fn window_role(&self, wid: WindowId) -> Option<String> {
        self.windows.get(&wid).map(|w| w.role.clone())
    }

    fn window_subrole(&self, wid: WindowId) -> Option<String> {
        self.windows.get(&wid).map(|w| w.subrole.clone())
    }

    fn app_name(&self, pid: pid_t) -> Option<String> {
        self.app_names.get(&pid).cloned()
    }

    fn set_window_frame(&mut self, wid: WindowId, frame: Rect) -> bool {
        self.commands.push(Command::SetFrame(wid, frame));
        *self.set_frame_counts.entry(wid).or_insert(0) += 1;
        match self.windows.get_mut(&wid) {
            Some(w) => {
                if w.resist > 0 {
                    w.resist -= 1;
                } else {
                    w.frame = frame;
                }
                true
            }
            None => false,
        }
    }

    fn set_window_level(&mut self, wid: WindowId, level: i32) -> bool {
        self.commands.push(Command::SetLevel(wid, level));
        match self.windows.get_mut(&wid) {
            Some(w) => {
                w.level = level;
                true
            }
            None => false,
        }
    }

    fn set_window_opacity(&mut self, wid: WindowId, alpha: f32) -> bool {
        self.commands.push(Command::SetOpacity(wid, alpha));
        self.windows.contains_key(&wid)
    }

    fn focus_window(&mut self, wid: WindowId) -> bool {
        self.commands.push(Command::Focus(wid));
        if self.windows.contains_key(&wid) {
            self.focused = Some(wid);
            true
        } else {
            false
        }
    }

    fn focus_window_without_raise(&mut self, wid: WindowId) -> bool {
        if !self.sa {
            return false;
        }
        self.commands.push(Command::FocusWithoutRaise(wid));
        if self.windows.contains_key(&wid) {
            self.focused = Some(wid);
            true
        } else {
            false
        }
    }

    fn minimize_window(&mut self, wid: WindowId) -> bool {
        self.commands.push(Command::Minimize(wid));
        match self.windows.get_mut(&wid) {
            Some(w) => {
                w.minimized = true;
                true
            }
            None => false,
        }
    }

    fn close_window(&mut self, wid: WindowId) -> bool {
        self.commands.push(Command::Close(wid));
        self.windows.remove(&wid).is_some()
    }

    fn space_kind(&self, sid: SpaceId) -> Option<SpaceKind> {
        self.space_kinds.get(&sid).copied()
    }

    fn space_display(&self, sid: SpaceId) -> Option<DisplayId> {
        self.displays
            .iter()
            .find(|(_, d)| d.spaces.contains(&sid))
            .map(|(did, _)| *did)
    }

    fn space_windows(&self, sid: SpaceId) -> Option<Vec<WindowId>> {
        self.space_kinds.get(&sid)?;
        let mut ids: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.space == sid)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Some(ids)
    }

    fn active_space(&self, did: DisplayId) -> Option<SpaceId> {
        self.displays.iter().find(|(d, _)| *d == did).map(|(_, s)| s.active)
    }

    fn focus_space(&mut self, sid: SpaceId) -> bool {
        self.commands.push(Command::FocusSpace(sid));
        let Some(did) = self.space_display(sid) else {
            return false;
        };
        if let Some(display) = self.display_mut(did) {
            display.active = sid;
            true
        } else {
            false
        }
    }

    fn move_window_to_space(&mut self, wid: WindowId, sid: SpaceId) -> bool {
        self.commands.push(Command::MoveToSpace(wid, sid));
        if !self.space_kinds.contains_key(&sid) {
            return false;
        }
        match self.windows.get_mut(&wid) {
            Some(w) => {
                w.space = sid;
                true
            }
            None => false,
        }
    }

    fn create_space(&mut self, did: DisplayId) -> Option<SpaceId> {
        if !self.sa {
            return None;
        }
        self.commands.push(Command::CreateSpace(did));
        self.next_space += 1;
        let sid = SpaceId::new(self.next_space);
        self.space_kinds.insert(sid, SpaceKind::User);
        self.display_mut(did)?.spaces.push(sid);
        Some(sid)
    }

    fn destroy_space(&mut self, sid: SpaceId) -> bool {
        if !self.sa {
            return false;
        }
        self.commands.push(Command::DestroySpace(sid));
        let Some(did) = self.space_display(sid) else {
            return false;
        };
        if let Some(display) = self.display_mut(did) {
            display.spaces.retain(|s| *s != sid);
            if display.active == sid
                && let Some(first) = display.spaces.first()
            {
                display.active = *first;
            }
        }
        self.space_kinds.remove(&sid);
        true
    }

    fn display_frame(&self, did: DisplayId) -> Option<Rect> {
        self.displays.iter().find(|(d, _)| *d == did).map(|(_, s)| s.frame)
    }

    fn display_spaces(&self, did: DisplayId) -> Option<Vec<SpaceId>> {
        self.displays
            .iter()
            .find(|(d, _)| *d == did)
            .map(|(_, s)| s.spaces.clone())
    }

    fn displays(&self) -> Vec<DisplayId> {
        self.displays.iter().map(|(d, _)| *d).collect()
    }

    fn cursor_position(&self) -> Option<Point> {
        self.cursor
    }

    fn warp_cursor(&mut self, point: Point) -> bool {
        self.commands.push(Command::WarpCursor(point));
        self.cursor = Some(point);
        true
    }

    fn focused_window(&self) -> Option<WindowId> {
        self.focused
    }

    fn focused_pid(&self) -> Option<pid_t> {
        self.focused.and_then(|wid| self.window_pid(wid))
    }

    fn sa_available(&self) -> bool {
        self.sa
    }
}
