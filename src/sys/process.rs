#![allow(non_camel_case_types)]

pub type pid_t = i32;

#[cfg(target_os = "macos")]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSerialNumber {
    pub high: u32,
    pub low: u32,
}

/// Whether the process is still alive, without reaping it.
#[cfg(unix)]
pub fn is_process_alive(pid: pid_t) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}
