//! A tiling window manager for macOS.
//!
//! The core is a single-threaded reconciliation loop: compositor events
//! mutate the window table and mark work dirty, and a once-per-tick drain
//! turns the dirty set into layout passes against the platform. Privileged
//! operations the accessibility API cannot express are routed through a
//! scripting addition injected into the Dock (see [`sa`]).

pub mod actor;
pub mod common;
pub mod errors;
pub mod ipc;
pub mod layout_engine;
pub mod model;
pub mod platform;
pub mod sa;
pub mod sys;

pub use errors::Error;
