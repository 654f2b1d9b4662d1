use thiserror::Error;

use crate::sys::screen::WindowId;

/// Failure kinds the core distinguishes.
///
/// Only three conditions abort the process, all at startup: accessibility
/// denied, running as root, and the separate-spaces preference being
/// disabled. Everything else degrades the operation or feature it belongs
/// to and leaves the rest of the manager running.
#[derive(Debug, Error)]
pub enum Error {
    #[error("accessibility permission has not been granted")]
    AccessibilityDenied,

    #[error("platform call failed: {0}")]
    PlatformCallFailed(&'static str),

    #[error("window not found: {0:?}")]
    WindowNotFound(WindowId),

    #[error("window does not expose attribute: {0}")]
    AttributeUnsupported(&'static str),

    #[error("dynamic symbol not found: {0}")]
    SymbolNotFound(&'static str),

    #[error("injection failed: {0}")]
    InjectionFailed(InjectionError),

    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    ProtocolError(&'static str),

    #[error("no pattern match for {0}")]
    PatternNotFound(&'static str),

    #[error("allocation failed")]
    AllocationFailed,
}

/// Why an injection attempt did not complete.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InjectionError {
    #[error("timed out waiting for the remote thread")]
    Timeout,
    #[error("remote thread creation failed (kr={0})")]
    ThreadCreate(i32),
    #[error("remote memory setup failed (kr={0})")]
    Memory(i32),
    #[error("task port unavailable (kr={0})")]
    TaskPort(i32),
}

impl From<InjectionError> for Error {
    fn from(e: InjectionError) -> Self {
        Error::InjectionFailed(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
