//! Authoritative registry of tracked windows.
//!
//! The table is the single source of truth for window existence, space
//! membership, and flags. Both secondary indexes (per space, per pid) are
//! kept consistent by routing every mutation through this API. Index lists
//! are bounded; overflowing a list evicts its oldest window through the
//! normal removal path so the invariants keep holding.

use tracing::warn;

use crate::common::collections::HashMap;
use crate::model::window::WindowEntry;
use crate::sys::axuielement::AxHandle;
use crate::sys::process::pid_t;
use crate::sys::screen::{SpaceId, WindowId};

pub const MAX_WINDOWS_PER_LIST: usize = 64;

#[derive(Default)]
pub struct WindowTable {
    entries: HashMap<WindowId, WindowEntry>,
    by_space: HashMap<SpaceId, Vec<WindowId>>,
    by_pid: HashMap<pid_t, Vec<WindowId>>,
    focused: Option<WindowId>,
    last_focused: Option<WindowId>,
}

impl WindowTable {
    pub fn new() -> Self {
        WindowTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut WindowEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Inserts or updates an entry.
    ///
    /// An existing entry keeps its position in any index list whose key did
    /// not change; the old accessibility handle is dropped when overwritten.
    pub fn add(&mut self, entry: WindowEntry) {
        let id = entry.id;
        if let Some(existing) = self.entries.get_mut(&id) {
            let old_space = existing.space_id;
            let old_pid = existing.pid;
            // Overwriting the handle drops (releases) the previous one.
            *existing = entry;
            let (new_space, new_pid) = (existing.space_id, existing.pid);
            if old_space != new_space {
                remove_from_list(&mut self.by_space, old_space, id);
                self.push_space_index(new_space, id);
            }
            if old_pid != new_pid {
                remove_from_list(&mut self.by_pid, old_pid, id);
                self.push_pid_index(new_pid, id);
            }
            return;
        }

        let space = entry.space_id;
        let pid = entry.pid;
        self.entries.insert(id, entry);
        self.push_space_index(space, id);
        self.push_pid_index(pid, id);
    }

    /// Removes an entry, updating both indexes and clearing focus state
    /// that pointed at it. The returned entry still owns its handle.
    pub fn remove(&mut self, id: WindowId) -> Option<WindowEntry> {
        let entry = self.entries.remove(&id)?;
        remove_from_list(&mut self.by_space, entry.space_id, id);
        remove_from_list(&mut self.by_pid, entry.pid, id);
        if self.focused == Some(id) {
            self.focused = None;
        }
        if self.last_focused == Some(id) {
            self.last_focused = None;
        }
        Some(entry)
    }

    /// Moves a window between space lists. Atomic: the window is either in
    /// its old position or appended to the new list, never in both or
    /// neither. Returns whether the move happened.
    pub fn move_to_space(&mut self, id: WindowId, new_space: SpaceId) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        let old_space = entry.space_id;
        if old_space == new_space {
            return true;
        }

        let old_index = match self.by_space.get(&old_space).and_then(|l| position(l, id)) {
            Some(i) => i,
            None => return false,
        };
        remove_from_list(&mut self.by_space, old_space, id);

        let list = self.by_space.entry(new_space).or_default();
        if list.len() >= MAX_WINDOWS_PER_LIST {
            warn!(
                "space {:?} window list is full ({}), refusing move of {:?}",
                new_space, MAX_WINDOWS_PER_LIST, id
            );
            let old = self.by_space.entry(old_space).or_default();
            let at = old_index.min(old.len());
            old.insert(at, id);
            return false;
        }
        list.push(id);

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.space_id = new_space;
        }
        true
    }

    pub fn focused_window_id(&self) -> Option<WindowId> {
        self.focused
    }

    pub fn last_focused_window_id(&self) -> Option<WindowId> {
        self.last_focused
    }

    /// Updates focus; the previously focused window becomes `last_focused`.
    pub fn set_focused(&mut self, id: Option<WindowId>) {
        if self.focused == id {
            return;
        }
        if let Some(prev) = self.focused {
            self.last_focused = Some(prev);
        }
        self.focused = match id {
            Some(id) if self.entries.contains_key(&id) => Some(id),
            Some(id) => {
                warn!("ignoring focus on untracked {:?}", id);
                None
            }
            None => None,
        };
    }

    /// Windows on a space, in layout order.
    pub fn windows_for_space(&self, space: SpaceId) -> &[WindowId] {
        self.by_space.get(&space).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn windows_for_pid(&self, pid: pid_t) -> &[WindowId] {
        self.by_pid.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reorders two windows within their common space. No-op when they are
    /// on different spaces.
    pub fn swap_window_order(&mut self, a: WindowId, b: WindowId) {
        let (Some(ea), Some(eb)) = (self.entries.get(&a), self.entries.get(&b)) else {
            return;
        };
        if ea.space_id != eb.space_id {
            return;
        }
        if let Some(list) = self.by_space.get_mut(&ea.space_id)
            && let (Some(ia), Some(ib)) = (position(list, a), position(list, b))
        {
            list.swap(ia, ib);
        }
    }

    /// The layout-ordered subset of a space's windows that participates in
    /// tiling.
    pub fn tileable_windows_for_space(&self, space: SpaceId) -> Vec<WindowId> {
        self.windows_for_space(space)
            .iter()
            .copied()
            .filter(|id| self.entries.get(id).is_some_and(|e| e.is_tileable()))
            .collect()
    }

    pub fn spaces(&self) -> impl Iterator<Item = SpaceId> + '_ {
        self.by_space.keys().copied()
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.values()
    }

    /// Drops every window belonging to `pid`, used by the process
    /// termination sweep. Returns the spaces that lost windows.
    pub fn remove_pid(&mut self, pid: pid_t) -> Vec<SpaceId> {
        let ids: Vec<WindowId> =
            self.by_pid.get(&pid).map(|l| l.to_vec()).unwrap_or_default();
        let mut spaces = Vec::new();
        for id in ids {
            if let Some(entry) = self.remove(id)
                && !spaces.contains(&entry.space_id)
            {
                spaces.push(entry.space_id);
            }
        }
        spaces
    }

    fn push_space_index(&mut self, space: SpaceId, id: WindowId) {
        loop {
            let list = self.by_space.entry(space).or_default();
            if list.len() < MAX_WINDOWS_PER_LIST {
                list.push(id);
                return;
            }
            let oldest = list[0];
            warn!(
                "space {:?} window list is full ({}), evicting oldest {:?}",
                space, MAX_WINDOWS_PER_LIST, oldest
            );
            self.remove(oldest);
        }
    }

    fn push_pid_index(&mut self, pid: pid_t, id: WindowId) {
        loop {
            let list = self.by_pid.entry(pid).or_default();
            if list.len() < MAX_WINDOWS_PER_LIST {
                list.push(id);
                return;
            }
            let oldest = list[0];
            warn!(
                "pid {} window list is full ({}), evicting oldest {:?}",
                pid, MAX_WINDOWS_PER_LIST, oldest
            );
            self.remove(oldest);
        }
    }

    /// Debug check of both index invariants. Cheap enough to run from the
    /// reconciliation loop's validation pass.
    pub fn check_invariants(&self) -> bool {
        for (space, list) in &self.by_space {
            for id in list {
                match self.entries.get(id) {
                    Some(e) if e.space_id == *space => {}
                    _ => return false,
                }
            }
        }
        for (pid, list) in &self.by_pid {
            for id in list {
                match self.entries.get(id) {
                    Some(e) if e.pid == *pid => {}
                    _ => return false,
                }
            }
        }
        for entry in self.entries.values() {
            if position(self.windows_for_space(entry.space_id), entry.id).is_none() {
                return false;
            }
            if position(self.windows_for_pid(entry.pid), entry.id).is_none() {
                return false;
            }
        }
        if let Some(f) = self.focused
            && !self.entries.contains_key(&f)
        {
            return false;
        }
        true
    }
}

fn position(list: &[WindowId], id: WindowId) -> Option<usize> {
    list.iter().position(|w| *w == id)
}

fn remove_from_list<K: std::hash::Hash + Eq + Copy>(
    map: &mut HashMap<K, Vec<WindowId>>,
    key: K,
    id: WindowId,
) {
    if let Some(list) = map.get_mut(&key) {
        list.retain(|w| *w != id);
        if list.is_empty() {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::window::WindowFlags;

    fn entry(id: u32, pid: pid_t, space: u64) -> WindowEntry {
        WindowEntry::new(
            WindowId::new(id),
            pid,
            SpaceId::new(space),
            AxHandle::empty(),
        )
    }

    #[test]
    fn add_and_get() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        assert_eq!(table.len(), 1);
        let e = table.get(WindowId::new(1)).unwrap();
        assert_eq!(e.pid, 100);
        assert_eq!(e.space_id, SpaceId::new(10));
        assert!(table.check_invariants());
    }

    #[test]
    fn add_remove_round_trip_restores_prior_state() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));

        let spaces_before: Vec<_> = table.windows_for_space(SpaceId::new(10)).to_vec();
        let pids_before: Vec<_> = table.windows_for_pid(100).to_vec();

        table.add(entry(3, 200, 11));
        let removed = table.remove(WindowId::new(3)).unwrap();
        assert_eq!(removed.id, WindowId::new(3));

        assert_eq!(table.len(), 2);
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &spaces_before[..]);
        assert_eq!(table.windows_for_pid(100), &pids_before[..]);
        // the emptied index entries are gone, not left as husks
        assert_eq!(table.windows_for_space(SpaceId::new(11)), &[]);
        assert_eq!(table.windows_for_pid(200), &[]);
        assert!(table.check_invariants());
    }

    #[test]
    fn removed_window_is_gone_from_every_index() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));
        table.remove(WindowId::new(1));

        assert!(table.get(WindowId::new(1)).is_none());
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[WindowId::new(2)]);
        assert_eq!(table.windows_for_pid(100), &[WindowId::new(2)]);
        assert!(table.check_invariants());
    }

    #[test]
    fn overwrite_releases_old_handle_exactly_once() {
        let releases = Arc::new(AtomicU32::new(0));
        let mut table = WindowTable::new();

        let mut e = entry(1, 100, 10);
        e.handle = AxHandle::counting(&releases);
        table.add(e);
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        // overwrite: the first handle must be released, once
        table.add(entry(1, 100, 10));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // remove: the replacement handle is dropped with the entry
        let releases2 = Arc::new(AtomicU32::new(0));
        let mut e = entry(2, 100, 10);
        e.handle = AxHandle::counting(&releases2);
        table.add(e);
        drop(table.remove(WindowId::new(2)));
        assert_eq!(releases2.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_reconciles_indexes_on_space_change() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(1, 100, 20));

        assert_eq!(table.len(), 1);
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[]);
        assert_eq!(table.windows_for_space(SpaceId::new(20)), &[WindowId::new(1)]);
        assert!(table.check_invariants());
    }

    #[test]
    fn move_to_space_updates_entry_and_both_lists() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));

        assert!(table.move_to_space(WindowId::new(1), SpaceId::new(20)));
        assert_eq!(table.get(WindowId::new(1)).unwrap().space_id, SpaceId::new(20));
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[WindowId::new(2)]);
        assert_eq!(table.windows_for_space(SpaceId::new(20)), &[WindowId::new(1)]);
        assert!(table.check_invariants());
    }

    #[test]
    fn move_to_full_space_rolls_back() {
        let mut table = WindowTable::new();
        for i in 0..MAX_WINDOWS_PER_LIST as u32 {
            table.add(entry(100 + i, 1, 20));
        }
        table.add(entry(1, 2, 10));

        assert!(!table.move_to_space(WindowId::new(1), SpaceId::new(20)));
        assert_eq!(table.get(WindowId::new(1)).unwrap().space_id, SpaceId::new(10));
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[WindowId::new(1)]);
        assert!(table.check_invariants());
    }

    #[test]
    fn move_to_unknown_window_fails() {
        let mut table = WindowTable::new();
        assert!(!table.move_to_space(WindowId::new(9), SpaceId::new(1)));
    }

    #[test]
    fn focus_tracking() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));

        table.set_focused(Some(WindowId::new(1)));
        assert_eq!(table.focused_window_id(), Some(WindowId::new(1)));
        assert_eq!(table.last_focused_window_id(), None);

        table.set_focused(Some(WindowId::new(2)));
        assert_eq!(table.focused_window_id(), Some(WindowId::new(2)));
        assert_eq!(table.last_focused_window_id(), Some(WindowId::new(1)));
    }

    #[test]
    fn removing_focused_window_clears_focus() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.set_focused(Some(WindowId::new(1)));
        table.remove(WindowId::new(1));
        assert_eq!(table.focused_window_id(), None);
        assert!(table.check_invariants());
    }

    #[test]
    fn swap_window_order_same_space() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));
        table.add(entry(3, 100, 10));

        table.swap_window_order(WindowId::new(1), WindowId::new(3));
        assert_eq!(
            table.windows_for_space(SpaceId::new(10)),
            &[WindowId::new(3), WindowId::new(2), WindowId::new(1)]
        );
    }

    #[test]
    fn swap_window_order_across_spaces_is_noop() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 20));

        table.swap_window_order(WindowId::new(1), WindowId::new(2));
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[WindowId::new(1)]);
        assert_eq!(table.windows_for_space(SpaceId::new(20)), &[WindowId::new(2)]);
    }

    #[test]
    fn tileable_filters_minimized_floating_hidden() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 10));
        table.add(entry(3, 100, 10));
        table.add(entry(4, 100, 10));

        table.get_mut(WindowId::new(2)).unwrap().flags.insert(WindowFlags::MINIMIZED);
        table.get_mut(WindowId::new(3)).unwrap().flags.insert(WindowFlags::FLOATING);
        table.get_mut(WindowId::new(4)).unwrap().flags.insert(WindowFlags::HIDDEN);

        assert_eq!(
            table.tileable_windows_for_space(SpaceId::new(10)),
            vec![WindowId::new(1)]
        );
    }

    #[test]
    fn index_cap_evicts_oldest() {
        let mut table = WindowTable::new();
        for i in 0..(MAX_WINDOWS_PER_LIST as u32 + 1) {
            table.add(entry(i, 1, 10));
        }
        assert_eq!(table.len(), MAX_WINDOWS_PER_LIST);
        assert!(table.get(WindowId::new(0)).is_none());
        assert!(table.get(WindowId::new(MAX_WINDOWS_PER_LIST as u32)).is_some());
        assert!(table.check_invariants());
    }

    #[test]
    fn remove_pid_sweeps_all_windows() {
        let mut table = WindowTable::new();
        table.add(entry(1, 100, 10));
        table.add(entry(2, 100, 20));
        table.add(entry(3, 200, 10));

        let spaces = table.remove_pid(100);
        assert_eq!(table.len(), 1);
        assert!(spaces.contains(&SpaceId::new(10)));
        assert!(spaces.contains(&SpaceId::new(20)));
        assert_eq!(table.windows_for_pid(100), &[]);
        assert_eq!(table.windows_for_space(SpaceId::new(10)), &[WindowId::new(3)]);
        assert!(table.check_invariants());
    }
}
