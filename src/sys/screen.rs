//! Identifiers handed out by the window server.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Window id assigned by the compositor. Unique process-wide at any
/// instant; may be recycled after the window is destroyed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

/// Space id. Each space belongs to exactly one display.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub u64);

/// Display id, persistent for the session. A UUID alias exists for
/// cross-API use on the platform side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplayId(pub u32);

impl WindowId {
    pub const fn new(id: u32) -> Self {
        WindowId(id)
    }
}

impl SpaceId {
    pub const fn new(id: u64) -> Self {
        SpaceId(id)
    }
}

impl DisplayId {
    pub const fn new(id: u32) -> Self {
        DisplayId(id)
    }
}

impl fmt::Debug for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window({})", self.0)
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Space({})", self.0)
    }
}

impl fmt::Debug for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Display({})", self.0)
    }
}

/// What the window server says a space is used for.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
pub enum SpaceKind {
    User = 0,
    System = 2,
    Fullscreen = 4,
}

impl SpaceKind {
    /// Fullscreen spaces hold exactly one fullscreen window and are left
    /// alone by the layout engine.
    pub fn is_tileable(self) -> bool {
        matches!(self, SpaceKind::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_kind_from_raw() {
        assert_eq!(SpaceKind::try_from(0), Ok(SpaceKind::User));
        assert_eq!(SpaceKind::try_from(4), Ok(SpaceKind::Fullscreen));
        assert!(SpaceKind::try_from(7).is_err());
    }

    #[test]
    fn only_user_spaces_tile() {
        assert!(SpaceKind::User.is_tileable());
        assert!(!SpaceKind::System.is_tileable());
        assert!(!SpaceKind::Fullscreen.is_tileable());
    }
}
