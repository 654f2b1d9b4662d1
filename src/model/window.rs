use bitflags::bitflags;

use crate::sys::axuielement::AxHandle;
use crate::sys::process::pid_t;
use crate::sys::screen::{SpaceId, WindowId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WindowFlags: u16 {
        const SHADOW     = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const MINIMIZED  = 1 << 2;
        const FLOATING   = 1 << 3;
        const STICKY     = 1 << 4;
        const WINDOWED   = 1 << 5;
        const MOVABLE    = 1 << 6;
        const RESIZABLE  = 1 << 7;
        const HIDDEN     = 1 << 8;
    }
}

impl Default for WindowFlags {
    fn default() -> Self {
        WindowFlags::SHADOW | WindowFlags::MOVABLE | WindowFlags::RESIZABLE
    }
}

/// One tracked window. The entry owns the accessibility handle; it is
/// released when the entry is removed or the handle is overwritten.
#[derive(Debug)]
pub struct WindowEntry {
    pub id: WindowId,
    pub pid: pid_t,
    pub space_id: SpaceId,
    pub handle: AxHandle,
    pub flags: WindowFlags,
}

impl WindowEntry {
    pub fn new(id: WindowId, pid: pid_t, space_id: SpaceId, handle: AxHandle) -> Self {
        WindowEntry {
            id,
            pid,
            space_id,
            handle,
            flags: WindowFlags::default(),
        }
    }

    /// Excluded from tiling when minimized, floating, or hidden.
    pub fn is_tileable(&self) -> bool {
        !self
            .flags
            .intersects(WindowFlags::MINIMIZED | WindowFlags::FLOATING | WindowFlags::HIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let flags = WindowFlags::default();
        assert!(flags.contains(WindowFlags::SHADOW));
        assert!(flags.contains(WindowFlags::MOVABLE));
        assert!(flags.contains(WindowFlags::RESIZABLE));
        assert!(!flags.intersects(
            WindowFlags::FULLSCREEN
                | WindowFlags::MINIMIZED
                | WindowFlags::FLOATING
                | WindowFlags::STICKY
                | WindowFlags::WINDOWED
                | WindowFlags::HIDDEN
        ));
    }

    #[test]
    fn tileable_excludes_minimized_floating_hidden() {
        let mut entry = WindowEntry::new(
            WindowId::new(1),
            100,
            SpaceId::new(1),
            AxHandle::empty(),
        );
        assert!(entry.is_tileable());

        entry.flags.insert(WindowFlags::MINIMIZED);
        assert!(!entry.is_tileable());
        entry.flags.remove(WindowFlags::MINIMIZED);

        entry.flags.insert(WindowFlags::FLOATING);
        assert!(!entry.is_tileable());
        entry.flags.remove(WindowFlags::FLOATING);

        entry.flags.insert(WindowFlags::HIDDEN);
        assert!(!entry.is_tileable());
    }
}
