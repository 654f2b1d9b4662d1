//! Mach kernel interface used by the injector: task ports, remote memory,
//! and remote threads. Every kern_return is checked at the call site; the
//! helpers here keep the raw surface in one place.

#![allow(non_camel_case_types)]
#![allow(dead_code)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_int, c_uint, c_void};

pub type kern_return_t = c_int;
pub type mach_port_t = u32;
pub type task_t = mach_port_t;
pub type thread_act_t = mach_port_t;
pub type mach_vm_address_t = u64;
pub type mach_vm_size_t = u64;
pub type vm_prot_t = c_int;
pub type thread_state_flavor_t = c_int;
pub type mach_msg_type_number_t = c_uint;

pub const KERN_SUCCESS: kern_return_t = 0;

pub const VM_FLAGS_ANYWHERE: c_int = 0x0001;

pub const VM_PROT_READ: vm_prot_t = 0x01;
pub const VM_PROT_WRITE: vm_prot_t = 0x02;
pub const VM_PROT_EXECUTE: vm_prot_t = 0x04;

pub const ARM_THREAD_STATE64: thread_state_flavor_t = 6;
pub const ARM_THREAD_STATE64_COUNT: mach_msg_type_number_t = 68;
pub const X86_THREAD_STATE64: thread_state_flavor_t = 4;
pub const X86_THREAD_STATE64_COUNT: mach_msg_type_number_t = 42;

pub const THREAD_CONVERT_THREAD_STATE_TO_SELF: c_int = 1;
pub const THREAD_CONVERT_THREAD_STATE_FROM_SELF: c_int = 2;

/// General-purpose register file for a 64-bit ARM thread.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct arm_thread_state64_t {
    pub x: [u64; 29],
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
    pub pc: u64,
    pub cpsr: u32,
    pub flags: u32,
}

impl Default for arm_thread_state64_t {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct x86_thread_state64_t {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub fs: u64,
    pub gs: u64,
}

#[link(name = "System", kind = "framework")]
unsafe extern "C" {
    pub fn mach_task_self() -> task_t;
    pub fn task_for_pid(task: task_t, pid: c_int, target: *mut task_t) -> kern_return_t;
    pub fn mach_port_deallocate(task: task_t, name: mach_port_t) -> kern_return_t;

    pub fn mach_vm_allocate(
        task: task_t,
        address: *mut mach_vm_address_t,
        size: mach_vm_size_t,
        flags: c_int,
    ) -> kern_return_t;
    pub fn mach_vm_deallocate(
        task: task_t,
        address: mach_vm_address_t,
        size: mach_vm_size_t,
    ) -> kern_return_t;
    pub fn mach_vm_write(
        task: task_t,
        address: mach_vm_address_t,
        data: *const c_void,
        count: mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn mach_vm_read_overwrite(
        task: task_t,
        address: mach_vm_address_t,
        size: mach_vm_size_t,
        data: mach_vm_address_t,
        out_size: *mut mach_vm_size_t,
    ) -> kern_return_t;
    pub fn mach_vm_protect(
        task: task_t,
        address: mach_vm_address_t,
        size: mach_vm_size_t,
        set_maximum: c_int,
        new_protection: vm_prot_t,
    ) -> kern_return_t;

    pub fn thread_create_running(
        task: task_t,
        flavor: thread_state_flavor_t,
        new_state: *const c_uint,
        new_state_count: mach_msg_type_number_t,
        child: *mut thread_act_t,
    ) -> kern_return_t;
    pub fn thread_create(task: task_t, child: *mut thread_act_t) -> kern_return_t;
    pub fn thread_get_state(
        thread: thread_act_t,
        flavor: thread_state_flavor_t,
        state: *mut c_uint,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn thread_set_state(
        thread: thread_act_t,
        flavor: thread_state_flavor_t,
        state: *const c_uint,
        count: mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn thread_convert_thread_state(
        thread: thread_act_t,
        direction: c_int,
        flavor: thread_state_flavor_t,
        in_state: *const c_uint,
        in_count: mach_msg_type_number_t,
        out_state: *mut c_uint,
        out_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn thread_terminate(thread: thread_act_t) -> kern_return_t;
}

/// Task port for `pid`, or the failing kern_return.
pub fn task_for_pid_checked(pid: c_int) -> Result<task_t, i32> {
    let mut task: task_t = 0;
    let kr = unsafe { task_for_pid(mach_task_self(), pid, &mut task) };
    if kr == KERN_SUCCESS { Ok(task) } else { Err(kr) }
}

/// One word of the remote address space.
pub fn read_remote_u64(task: task_t, address: u64) -> Option<u64> {
    let mut value: u64 = 0;
    let mut out_size: mach_vm_size_t = 0;
    let kr = unsafe {
        mach_vm_read_overwrite(
            task,
            address,
            8,
            (&raw mut value) as mach_vm_address_t,
            &mut out_size,
        )
    };
    (kr == KERN_SUCCESS && out_size == 8).then_some(value)
}
