//! Scripting addition: privileged capabilities obtained by loading a
//! payload into the Dock.
//!
//! The accessibility API cannot create or destroy spaces, move a space
//! between displays, or focus a window without raising it. The Dock can,
//! through private functions. This module discovers those functions by
//! static analysis of the Dock binary ([`discovery`]), injects a payload
//! dylib that serves them over a UNIX socket ([`inject`], [`payload`]),
//! and talks to it from the manager ([`client`]).

pub mod client;
pub mod discovery;
pub mod insn;
pub mod macho;
pub mod pattern;
pub mod payload;
pub mod protocol;
pub mod shellcode;
pub mod verify;

#[cfg(target_os = "macos")]
pub mod inject;

use std::path::PathBuf;

/// Socket the payload listens on, scoped to the login user.
pub fn sa_socket_path() -> PathBuf {
    PathBuf::from(format!(
        "/tmp/yabai.zig-sa_{}.socket",
        crate::common::util::user_name()
    ))
}

/// An existing socket means a payload is already serving; injection is
/// skipped and reported as success.
pub fn already_injected() -> bool {
    already_injected_at(&sa_socket_path())
}

pub fn already_injected_at(path: &std::path::Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_user_scoped() {
        let path = sa_socket_path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("yabai.zig-sa_"));
        assert!(name.ends_with(".socket"));
        assert!(path.starts_with("/tmp"));
    }

    #[test]
    fn existing_socket_counts_as_injected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sa.socket");
        assert!(!already_injected_at(&path));
        std::fs::write(&path, b"").unwrap();
        assert!(already_injected_at(&path));
    }
}
