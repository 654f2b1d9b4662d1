pub mod geometry;
pub mod process;
pub mod screen;

pub mod axuielement;

#[cfg(target_os = "macos")]
pub mod dispatch;
#[cfg(target_os = "macos")]
pub mod mach;
#[cfg(target_os = "macos")]
pub mod skylight;
