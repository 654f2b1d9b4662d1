//! The reconciliation loop.
//!
//! Compositor notifications arrive in bursts. Event handlers only mutate
//! the window table and mark work dirty; the drain runs once per tick and
//! turns the accumulated dirty state into the minimum amount of idempotent
//! work, in a fixed precedence: app-lifecycle queues, state validation,
//! window-space refresh, view rebuilds, layout passes, config syncs.
//! Draining is not preemptible; anything dirtied while draining is picked
//! up on the next tick.

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::common::collections::HashMap;
use crate::common::config::Config;
use crate::layout_engine::{Direction, LayoutEngine, SplitAxis};
use crate::model::rules::RuleRegistry;
use crate::model::window::{WindowEntry, WindowFlags};
use crate::model::window_table::WindowTable;
use crate::platform::Platform;
use crate::sys::axuielement::AxHandle;
use crate::sys::geometry::Point;
use crate::sys::process::pid_t;
use crate::sys::screen::{SpaceId, WindowId};


pub const MAX_DIRTY_SPACES: usize = 16;
pub const MAX_QUEUED_PIDS: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dirty: u16 {
        const LAYOUT_CURRENT        = 1 << 0;
        const LAYOUT_ALL            = 1 << 1;
        const REBUILD_VIEW          = 1 << 2;
        const SCAN_APPS             = 1 << 3;
        const SYNC_SPACES           = 1 << 4;
        const SYNC_CONFIG           = 1 << 5;
        const VALIDATE_STATE        = 1 << 6;
        const REFRESH_WINDOW_SPACES = 1 << 7;
        const APPS_LAUNCHED         = 1 << 8;
        const APPS_TERMINATED       = 1 << 9;
        const APP_FOCUS_CHANGED     = 1 << 10;
        const APPS_HIDDEN           = 1 << 11;
        const APPS_SHOWN            = 1 << 12;
    }
}

/// Deduplicating queue with a hard capacity; arrivals past the cap are
/// dropped with a warning and picked up by the next full rescan.
#[derive(Debug)]
pub struct BoundedQueue<T: PartialEq + Copy + std::fmt::Debug> {
    items: Vec<T>,
    cap: usize,
}

impl<T: PartialEq + Copy + std::fmt::Debug> BoundedQueue<T> {
    pub fn new(cap: usize) -> Self {
        BoundedQueue { items: Vec::new(), cap }
    }

    pub fn push(&mut self, item: T) {
        if self.items.contains(&item) {
            return;
        }
        if self.items.len() >= self.cap {
            warn!("queue full ({}), dropping {:?}", self.cap, item);
            return;
        }
        self.items.push(item);
    }

    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Layout commands arriving over the control socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FocusDirection(Direction),
    SwapDirection(Direction),
    AdjustRatio(Direction, f32),
    Equalize(Option<SplitAxis>),
    Balance(Option<SplitAxis>),
    ToggleFloat(WindowId),
}

#[derive(Debug)]
pub enum Event {
    WindowCreated { wid: WindowId, pid: pid_t, handle: AxHandle },
    WindowDestroyed(WindowId),
    WindowFocused(WindowId),
    WindowMoved(WindowId),
    WindowResized(WindowId),
    WindowMinimized(WindowId),
    WindowDeminimized(WindowId),
    SpaceChanged,
    DisplayChanged,
    AppLaunched(pid_t),
    AppTerminated(pid_t),
    AppHidden(pid_t),
    AppShown(pid_t),
    MouseMoved(Point),
    Command(Command),
}

pub struct Reactor {
    pub table: WindowTable,
    pub engine: LayoutEngine,
    pub rules: RuleRegistry,
    config: Config,
    dirty: Dirty,
    dirty_spaces: BoundedQueue<SpaceId>,
    launched: BoundedQueue<pid_t>,
    terminated: BoundedQueue<pid_t>,
    hidden: BoundedQueue<pid_t>,
    shown: BoundedQueue<pid_t>,
    /// Per-window mouse-follows-focus overrides from the rules; windows
    /// without one follow the config.
    mff_overrides: HashMap<WindowId, bool>,
}

impl Reactor {
    pub fn new(config: Config) -> Self {
        let mut engine = LayoutEngine::new(config.layout);
        engine.settle_delay = std::time::Duration::from_millis(config.settle_ms);
        Reactor {
            table: WindowTable::new(),
            engine,
            rules: RuleRegistry::new(),
            config,
            dirty: Dirty::empty(),
            dirty_spaces: BoundedQueue::new(MAX_DIRTY_SPACES),
            launched: BoundedQueue::new(MAX_QUEUED_PIDS),
            terminated: BoundedQueue::new(MAX_QUEUED_PIDS),
            hidden: BoundedQueue::new(MAX_QUEUED_PIDS),
            shown: BoundedQueue::new(MAX_QUEUED_PIDS),
            mff_overrides: HashMap::default(),
        }
    }

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    /// Lets the embedding run loop request work directly, e.g. periodic
    /// rescans or a config re-sync.
    pub fn mark(&mut self, flags: Dirty) {
        self.dirty.insert(flags);
    }

    fn mark_space_dirty(&mut self, space: SpaceId) {
        self.dirty.insert(Dirty::LAYOUT_CURRENT);
        self.dirty_spaces.push(space);
    }

    /// Mutates state and records dirty work. Never performs layout.
    pub fn handle_event(&mut self, platform: &mut dyn Platform, event: Event) {
        trace!("event: {:?}", event);
        match event {
            Event::WindowCreated { wid, pid, handle } => {
                self.on_window_created(platform, wid, pid, handle);
            }
            Event::WindowDestroyed(wid) => {
                self.mff_overrides.remove(&wid);
                if let Some(entry) = self.table.remove(wid) {
                    self.mark_space_dirty(entry.space_id);
                }
            }
            Event::WindowFocused(wid) => {
                self.table.set_focused(Some(wid));
                self.dirty.insert(Dirty::APP_FOCUS_CHANGED);
            }
            Event::WindowMoved(wid) | Event::WindowResized(wid) => {
                if let Some(entry) = self.table.get(wid) {
                    self.mark_space_dirty(entry.space_id);
                }
            }
            Event::WindowMinimized(wid) => {
                if let Some(entry) = self.table.get_mut(wid) {
                    entry.flags.insert(WindowFlags::MINIMIZED);
                    let space = entry.space_id;
                    self.mark_space_dirty(space);
                }
            }
            Event::WindowDeminimized(wid) => {
                if let Some(entry) = self.table.get_mut(wid) {
                    entry.flags.remove(WindowFlags::MINIMIZED);
                    let space = entry.space_id;
                    self.mark_space_dirty(space);
                }
            }
            Event::SpaceChanged => {
                self.dirty.insert(Dirty::SYNC_SPACES | Dirty::LAYOUT_ALL);
            }
            Event::DisplayChanged => {
                // display geometry changed under the views; rebuild them
                // from the defaults rather than keeping stale ratios
                self.dirty.insert(
                    Dirty::SYNC_SPACES
                        | Dirty::REFRESH_WINDOW_SPACES
                        | Dirty::REBUILD_VIEW
                        | Dirty::LAYOUT_ALL,
                );
                let spaces: Vec<SpaceId> = self.table.spaces().collect();
                for space in spaces {
                    self.mark_space_dirty(space);
                }
            }
            Event::AppLaunched(pid) => {
                self.dirty.insert(Dirty::APPS_LAUNCHED);
                self.launched.push(pid);
            }
            Event::AppTerminated(pid) => {
                self.dirty.insert(Dirty::APPS_TERMINATED);
                self.terminated.push(pid);
            }
            Event::AppHidden(pid) => {
                self.dirty.insert(Dirty::APPS_HIDDEN);
                self.hidden.push(pid);
            }
            Event::AppShown(pid) => {
                self.dirty.insert(Dirty::APPS_SHOWN);
                self.shown.push(pid);
            }
            Event::MouseMoved(point) => self.on_mouse_moved(platform, point),
            Event::Command(command) => self.on_command(platform, command),
        }
    }

    fn on_window_created(
        &mut self,
        platform: &mut dyn Platform,
        wid: WindowId,
        pid: pid_t,
        handle: AxHandle,
    ) {
        let space = platform
            .window_space(wid)
            .or_else(|| {
                let first = platform.displays().into_iter().next()?;
                platform.active_space(first)
            });
        let Some(space) = space else {
            warn!("created window {:?} has no space, ignoring", wid);
            return;
        };

        let app = platform.app_name(pid).unwrap_or_default();
        let title = platform.window_title(wid).unwrap_or_default();
        // windows that expose no role are still ordinary windows
        let role = platform
            .window_role(wid)
            .unwrap_or_else(|| String::from("AXWindow"));
        let subrole = platform
            .window_subrole(wid)
            .unwrap_or_else(|| String::from("AXStandardWindow"));
        let effects = self.rules.match_all(&app, &title, &role, &subrole);
        if effects.manage == Some(false) {
            debug!("rules exclude {:?} ({app}) from management", wid);
            return;
        }
        if let Some(mff) = effects.mouse_follows_focus {
            self.mff_overrides.insert(wid, mff);
        }

        let mut entry = WindowEntry::new(wid, pid, space, handle);
        if effects.sticky == Some(true) {
            entry.flags.insert(WindowFlags::STICKY);
        }
        if effects.fullscreen == Some(true) {
            entry.flags.insert(WindowFlags::FULLSCREEN);
        }
        let floats = effects.grid.is_some() || effects.scratchpad.is_some();
        if floats {
            entry.flags.insert(WindowFlags::FLOATING);
        }
        if platform.window_is_minimized(wid) == Some(true) {
            entry.flags.insert(WindowFlags::MINIMIZED);
        }
        self.table.add(entry);

        if let Some(alpha) = effects.opacity {
            platform.set_window_opacity(wid, alpha);
        }
        if let Some(level) = effects.layer {
            platform.set_window_level(wid, level);
        }
        if let Some(grid) = effects.grid
            && let Some(did) = platform.space_display(space)
            && let Some(bounds) = platform.display_frame(did)
        {
            platform.set_window_frame(wid, grid.apply(bounds));
        }
        // a display target resolves to that display's active space; an
        // explicit space target wins
        let space_target = effects.space.or_else(|| {
            let display = effects.display?;
            let active = platform.active_space(display.id)?;
            Some(crate::model::rules::FollowTarget { id: active, follow: display.follow })
        });
        if let Some(target) = space_target
            && target.id != space
            && platform.move_window_to_space(wid, target.id)
        {
            self.table.move_to_space(wid, target.id);
            self.mark_space_dirty(target.id);
            if target.follow {
                platform.focus_space(target.id);
            }
        }

        let space = self.table.get(wid).map(|e| e.space_id).unwrap_or(space);
        self.mark_space_dirty(space);
    }

    fn on_mouse_moved(&mut self, platform: &mut dyn Platform, point: Point) {
        use crate::common::config::FocusFollowsMouse;
        match self.config.focus_follows_mouse {
            FocusFollowsMouse::Disabled => {}
            policy => {
                let hit = self
                    .table
                    .windows()
                    .map(|e| e.id)
                    .find(|wid| {
                        platform.window_frame(*wid).is_some_and(|f| f.contains(point))
                    });
                if let Some(wid) = hit
                    && self.table.focused_window_id() != Some(wid)
                {
                    let ok = match policy {
                        FocusFollowsMouse::Autofocus => {
                            platform.focus_window_without_raise(wid)
                        }
                        _ => platform.focus_window(wid),
                    };
                    if ok {
                        self.table.set_focused(Some(wid));
                    }
                }
            }
        }
    }

    fn on_command(&mut self, platform: &mut dyn Platform, command: Command) {
        match command {
            Command::FocusDirection(direction) => {
                if let Some(target) = self.window_in_direction(direction)
                    && platform.focus_window(target)
                {
                    self.table.set_focused(Some(target));
                    self.dirty.insert(Dirty::APP_FOCUS_CHANGED);
                }
            }
            Command::SwapDirection(direction) => {
                if let Some(focused) = self.table.focused_window_id()
                    && let Some(target) = self.window_in_direction(direction)
                {
                    self.table.swap_window_order(focused, target);
                    if let Some(entry) = self.table.get(focused) {
                        let space = entry.space_id;
                        self.mark_space_dirty(space);
                    }
                }
            }
            Command::AdjustRatio(direction, delta) => {
                let Some((space, leaf)) = self.focused_leaf() else {
                    return;
                };
                if self.engine.view_mut(space).tree.adjust_ratio(leaf, direction, delta) {
                    self.mark_space_dirty(space);
                }
            }
            Command::Equalize(axis) => {
                if let Some(space) = self.focused_space() {
                    let default = self.engine.view_mut(space).split_ratio();
                    self.engine.view_mut(space).tree.equalize(axis, default);
                    self.mark_space_dirty(space);
                }
            }
            Command::Balance(axis) => {
                if let Some(space) = self.focused_space() {
                    self.engine.view_mut(space).tree.balance(axis);
                    self.mark_space_dirty(space);
                }
            }
            Command::ToggleFloat(wid) => {
                if let Some(entry) = self.table.get_mut(wid) {
                    entry.flags.toggle(WindowFlags::FLOATING);
                    let space = entry.space_id;
                    self.mark_space_dirty(space);
                }
            }
        }
    }

    fn focused_space(&self) -> Option<SpaceId> {
        let focused = self.table.focused_window_id()?;
        self.table.get(focused).map(|e| e.space_id)
    }

    /// BSP leaf of the focused window, resolved through its position in
    /// the space's tileable list.
    fn focused_leaf(&mut self) -> Option<(SpaceId, crate::layout_engine::BspNodeId)> {
        let focused = self.table.focused_window_id()?;
        let space = self.table.get(focused)?.space_id;
        let tileable = self.table.tileable_windows_for_space(space);
        let index = tileable.iter().position(|w| *w == focused)?;
        let leaves = self.engine.view_mut(space).tree.leaves();
        leaves.get(index).map(|leaf| (space, *leaf))
    }

    fn window_in_direction(&mut self, direction: Direction) -> Option<WindowId> {
        let focused = self.table.focused_window_id()?;
        let space = self.table.get(focused)?.space_id;
        let tileable = self.table.tileable_windows_for_space(space);
        let index = tileable.iter().position(|w| *w == focused)?;
        let view = self.engine.view_mut(space);
        let leaves = view.tree.leaves();
        let source = *leaves.get(index)?;
        let target_leaf = view.tree.find_leaf_in_direction(source, direction)?;
        let target_index = leaves.iter().position(|l| *l == target_leaf)?;
        tileable.get(target_index).copied()
    }

    /// Executes the pending work in precedence order. Runs to completion;
    /// work dirtied while draining waits for the next tick.
    pub fn drain(&mut self, platform: &mut dyn Platform) {
        if self.dirty.is_empty() && self.dirty_spaces.is_empty() {
            return;
        }
        debug!("drain: {:?}", self.dirty);

        // 1. app lifecycle queues
        if self.dirty.contains(Dirty::APPS_TERMINATED) {
            for pid in self.terminated.drain() {
                for space in self.table.remove_pid(pid) {
                    self.mark_space_dirty(space);
                }
            }
            self.dirty.remove(Dirty::APPS_TERMINATED);
        }
        if self.dirty.intersects(Dirty::APPS_LAUNCHED | Dirty::SCAN_APPS) {
            let only: Option<Vec<pid_t>> = if self.dirty.contains(Dirty::SCAN_APPS) {
                None
            } else {
                Some(self.launched.drain())
            };
            self.scan_windows(platform, only.as_deref());
            self.launched.drain();
            self.dirty.remove(Dirty::APPS_LAUNCHED | Dirty::SCAN_APPS);
        }
        if self.dirty.contains(Dirty::APPS_HIDDEN) {
            for pid in self.hidden.drain() {
                self.set_pid_hidden(pid, true);
            }
            self.dirty.remove(Dirty::APPS_HIDDEN);
        }
        if self.dirty.contains(Dirty::APPS_SHOWN) {
            for pid in self.shown.drain() {
                self.set_pid_hidden(pid, false);
            }
            self.dirty.remove(Dirty::APPS_SHOWN);
        }

        // 2. state validation
        if self.dirty.contains(Dirty::VALIDATE_STATE) {
            self.validate_state(platform);
            self.dirty.remove(Dirty::VALIDATE_STATE);
        }

        // 3. window-space refresh
        if self.dirty.contains(Dirty::REFRESH_WINDOW_SPACES) {
            self.refresh_window_spaces(platform);
            self.dirty.remove(Dirty::REFRESH_WINDOW_SPACES);
        }

        // 4. view rebuilds
        if self.dirty.contains(Dirty::REBUILD_VIEW) {
            let spaces: Vec<SpaceId> = self.dirty_spaces.items.clone();
            for space in spaces {
                self.engine.rebuild_view(space);
            }
            self.dirty.remove(Dirty::REBUILD_VIEW);
        }

        // 5. layout passes
        if self.dirty.intersects(Dirty::LAYOUT_CURRENT | Dirty::LAYOUT_ALL) {
            let mut spaces = self.dirty_spaces.drain();
            if self.dirty.contains(Dirty::LAYOUT_ALL) {
                for did in platform.displays() {
                    if let Some(active) = platform.active_space(did)
                        && !spaces.contains(&active)
                    {
                        spaces.push(active);
                    }
                }
            }
            for space in spaces {
                self.layout_space(platform, space);
            }
            self.dirty.remove(Dirty::LAYOUT_CURRENT | Dirty::LAYOUT_ALL);
        }

        // 6. config syncs
        if self.dirty.contains(Dirty::SYNC_SPACES) {
            // space enumeration is query-only; stale views are dropped
            self.sync_spaces(platform);
            self.dirty.remove(Dirty::SYNC_SPACES);
        }
        if self.dirty.contains(Dirty::SYNC_CONFIG) {
            self.engine.settle_delay = std::time::Duration::from_millis(self.config.settle_ms);
            self.dirty.remove(Dirty::SYNC_CONFIG);
        }
        if self.dirty.contains(Dirty::APP_FOCUS_CHANGED) {
            self.sync_focus(platform);
            self.dirty.remove(Dirty::APP_FOCUS_CHANGED);
        }
    }

    /// Focus side effects: when mouse-follows-focus applies to the newly
    /// focused window, the cursor is warped to its center unless it is
    /// already inside the window.
    fn sync_focus(&mut self, platform: &mut dyn Platform) {
        let Some(focused) = self.table.focused_window_id() else {
            return;
        };
        let table = &self.table;
        self.mff_overrides.retain(|wid, _| table.contains(*wid));

        let mff = self
            .mff_overrides
            .get(&focused)
            .copied()
            .unwrap_or(self.config.mouse_follows_focus);
        if !mff {
            return;
        }
        let Some(frame) = platform.window_frame(focused) else {
            return;
        };
        let inside = platform.cursor_position().is_some_and(|p| frame.contains(p));
        if !inside && !platform.warp_cursor(frame.center()) {
            debug!("cursor warp to {:?} failed", focused);
        }
    }

    fn layout_space(&mut self, platform: &mut dyn Platform, space: SpaceId) {
        if let Some(kind) = platform.space_kind(space)
            && !kind.is_tileable()
        {
            trace!("skipping layout of non-user space {:?}", space);
            return;
        }
        let Some(did) = platform.space_display(space) else {
            return;
        };
        let Some(bounds) = platform.display_frame(did) else {
            return;
        };
        let tileable = self.table.tileable_windows_for_space(space);
        let frames = self.engine.calculate_frames(space, bounds, &tileable);
        let repeated = self.engine.apply_frames(platform, &frames);
        if repeated > 0 {
            debug!("{repeated} windows resisted the first pass on {:?}", space);
        }
    }

    /// Adopts windows the table does not know about yet, optionally only
    /// those belonging to `pids`.
    fn scan_windows(&mut self, platform: &mut dyn Platform, pids: Option<&[pid_t]>) {
        for did in platform.displays() {
            let Some(spaces) = platform.display_spaces(did) else {
                continue;
            };
            for space in spaces {
                let Some(wids) = platform.space_windows(space) else {
                    continue;
                };
                for wid in wids {
                    if self.table.contains(wid) {
                        continue;
                    }
                    let Some(pid) = platform.window_pid(wid) else {
                        continue;
                    };
                    if pids.is_some_and(|p| !p.contains(&pid)) {
                        continue;
                    }
                    // nonzero layers are panels and overlays, not windows
                    if platform.window_level(wid).unwrap_or(0) != 0 {
                        continue;
                    }
                    self.on_window_created(platform, wid, pid, AxHandle::empty());
                }
            }
        }
    }

    fn set_pid_hidden(&mut self, pid: pid_t, hidden: bool) {
        let wids: Vec<WindowId> = self.table.windows_for_pid(pid).to_vec();
        for wid in wids {
            if let Some(entry) = self.table.get_mut(wid) {
                entry.flags.set(WindowFlags::HIDDEN, hidden);
                let space = entry.space_id;
                self.mark_space_dirty(space);
            }
        }
    }

    fn validate_state(&mut self, platform: &mut dyn Platform) {
        debug_assert!(self.table.check_invariants());
        let stale: Vec<WindowId> = self
            .table
            .windows()
            .map(|e| e.id)
            .filter(|wid| platform.window_frame(*wid).is_none())
            .collect();
        for wid in stale {
            debug!("dropping stale {:?}", wid);
            if let Some(entry) = self.table.remove(wid) {
                self.mark_space_dirty(entry.space_id);
            }
        }
    }

    fn refresh_window_spaces(&mut self, platform: &mut dyn Platform) {
        let moves: Vec<(WindowId, SpaceId, SpaceId)> = self
            .table
            .windows()
            .filter_map(|e| {
                let actual = platform.window_space(e.id)?;
                (actual != e.space_id).then_some((e.id, e.space_id, actual))
            })
            .collect();
        for (wid, old, new) in moves {
            if self.table.move_to_space(wid, new) {
                self.mark_space_dirty(old);
                self.mark_space_dirty(new);
            }
        }
    }

    fn sync_spaces(&mut self, platform: &mut dyn Platform) {
        let live: Vec<SpaceId> = platform
            .displays()
            .into_iter()
            .filter_map(|did| platform.display_spaces(did))
            .flatten()
            .collect();
        let known: Vec<SpaceId> = self.table.spaces().collect();
        for space in known {
            if !live.contains(&space) {
                self.engine.remove_space(space);
            }
        }
    }
}
