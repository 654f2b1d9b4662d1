//! Remote-thread injection of the payload dylib into the Dock.
//!
//! The sequence: task port, a small remote stack (RW) with a sentinel
//! return address, a code region (shellcode + payload path) flipped to RX,
//! then a remote thread started at the code base. The shellcode parks the
//! completion magic in the return-value register once `dlopen` has run;
//! polling the register file is the only synchronization with the remote
//! side. Every port, allocation, and thread is released on every exit
//! path.

use std::ffi::{CString, c_void};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{Error, InjectionError, Result};
use crate::sa::shellcode::{self, Arch, COMPLETION_MAGIC};
use crate::sys::mach::{self, task_t, thread_act_t};

const REMOTE_STACK_SIZE: u64 = 16 * 1024;
/// Bogus return address; the shellcode never returns, and a recognizable
/// sentinel makes a crashed remote thread easy to spot in a sample.
const SENTINEL_LR: u64 = 0x0000_1337_0000_1337;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_BUDGET: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    Injected,
    /// The payload socket already exists; nothing was touched.
    AlreadyInjected,
}

/// Clears the pointer-authentication bits of an address taken in our own
/// address space, leaving the raw virtual address the remote process can
/// consume.
pub fn strip(addr: u64) -> u64 {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut out = addr;
        std::arch::asm!("xpaci {x}", x = inout(reg) out);
        out
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        addr
    }
}

/// Signs an address with the process key so it can be used as a branch
/// target under pointer authentication.
pub fn sign(addr: u64) -> u64 {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut out = addr;
        std::arch::asm!("paciza {x}", x = inout(reg) out);
        out
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        addr
    }
}

const RTLD_DEFAULT: *mut c_void = -2isize as *mut c_void;

unsafe extern "C" {
    fn dlsym(handle: *mut c_void, symbol: *const std::ffi::c_char) -> *mut c_void;
}

/// Resolves a symbol in our own image and strips its PAC bits; the
/// address is identical in the target because both link the shared cache.
fn resolve_stripped(symbol: &'static str) -> Result<u64> {
    let name = CString::new(symbol).expect("symbol names contain no NUL");
    let addr = unsafe { dlsym(RTLD_DEFAULT, name.as_ptr()) };
    if addr.is_null() {
        return Err(Error::SymbolNotFound(symbol));
    }
    Ok(strip(addr as u64))
}

/// Injects the payload at `payload_path` into `pid`.
pub fn inject(pid: i32, payload_path: &str) -> Result<Injection> {
    if crate::sa::already_injected() {
        debug!("payload socket already present, skipping injection");
        return Ok(Injection::AlreadyInjected);
    }

    let pthread_create = resolve_stripped("pthread_create_from_mach_thread")?;
    let dlopen = resolve_stripped("dlopen")?;
    let code = shellcode::build(Arch::host(), pthread_create, dlopen, payload_path)?;

    let task = mach::task_for_pid_checked(pid).map_err(InjectionError::TaskPort)?;
    let task_guard = scopeguard::guard(task, |task| unsafe {
        mach::mach_port_deallocate(mach::mach_task_self(), task);
    });

    // remote stack, RW only
    let mut stack_base: u64 = 0;
    let kr = unsafe {
        mach::mach_vm_allocate(*task_guard, &mut stack_base, REMOTE_STACK_SIZE, mach::VM_FLAGS_ANYWHERE)
    };
    if kr != mach::KERN_SUCCESS {
        return Err(InjectionError::Memory(kr).into());
    }
    let stack_guard = scopeguard::guard((task, stack_base), |(task, base)| unsafe {
        mach::mach_vm_deallocate(task, base, REMOTE_STACK_SIZE);
    });

    // code region: write the shellcode, then flip to RX
    let code_size = code.len() as u64;
    let mut code_base: u64 = 0;
    let kr = unsafe {
        mach::mach_vm_allocate(*task_guard, &mut code_base, code_size, mach::VM_FLAGS_ANYWHERE)
    };
    if kr != mach::KERN_SUCCESS {
        return Err(InjectionError::Memory(kr).into());
    }
    let code_guard = scopeguard::guard((task, code_base, code_size), |(task, base, size)| unsafe {
        mach::mach_vm_deallocate(task, base, size);
    });

    unsafe {
        let kr = mach::mach_vm_write(
            *task_guard,
            code_base,
            code.as_ptr().cast(),
            code.len() as u32,
        );
        if kr != mach::KERN_SUCCESS {
            return Err(InjectionError::Memory(kr).into());
        }
        let kr = mach::mach_vm_protect(
            *task_guard,
            code_base,
            code_size,
            0,
            mach::VM_PROT_READ | mach::VM_PROT_EXECUTE,
        );
        if kr != mach::KERN_SUCCESS {
            return Err(InjectionError::Memory(kr).into());
        }
        // seed the sentinel return address at the stack top
        let sp = stack_base + REMOTE_STACK_SIZE - 16;
        let kr = mach::mach_vm_write(
            *task_guard,
            sp,
            (&raw const SENTINEL_LR).cast(),
            8,
        );
        if kr != mach::KERN_SUCCESS {
            return Err(InjectionError::Memory(kr).into());
        }

        let thread = create_remote_thread(*task_guard, code_base, sp)?;
        let thread_guard = scopeguard::guard(thread, |thread| {
            mach::thread_terminate(thread);
        });

        let result = wait_for_completion(*thread_guard);
        match result {
            Ok(()) => {
                info!("payload injected into pid {pid}");
                // the payload is loaded; the bootstrap thread and both
                // remote regions are no longer needed
                drop(thread_guard);
                drop(code_guard);
                drop(stack_guard);
                drop(task_guard);
                Ok(Injection::Injected)
            }
            Err(e) => {
                warn!("injection into pid {pid} failed: {e}");
                Err(e)
            }
        }
    }
}

/// Starts the remote thread. On ARM the direct create-running call is
/// tried first; kernels that reject an unsigned PC get the longer route:
/// create a suspended thread, let the kernel re-sign the register file
/// with `thread_convert_thread_state`, then recreate it running with the
/// converted state.
unsafe fn create_remote_thread(task: task_t, pc: u64, sp: u64) -> Result<thread_act_t> {
    unsafe {
        if cfg!(target_arch = "aarch64") {
            let mut state = mach::arm_thread_state64_t {
                pc,
                sp,
                lr: SENTINEL_LR,
                ..Default::default()
            };
            state.x[0] = 0;

            let mut thread: thread_act_t = 0;
            let kr = mach::thread_create_running(
                task,
                mach::ARM_THREAD_STATE64,
                (&raw const state).cast(),
                mach::ARM_THREAD_STATE64_COUNT,
                &mut thread,
            );
            if kr == mach::KERN_SUCCESS {
                return Ok(thread);
            }
            debug!("direct create-running rejected (kr={kr}), converting thread state");

            let mut scratch: thread_act_t = 0;
            let kr = mach::thread_create(task, &mut scratch);
            if kr != mach::KERN_SUCCESS {
                return Err(InjectionError::ThreadCreate(kr).into());
            }
            let mut converted = mach::arm_thread_state64_t::default();
            let mut count = mach::ARM_THREAD_STATE64_COUNT;
            let kr = mach::thread_convert_thread_state(
                scratch,
                mach::THREAD_CONVERT_THREAD_STATE_TO_SELF,
                mach::ARM_THREAD_STATE64,
                (&raw const state).cast(),
                mach::ARM_THREAD_STATE64_COUNT,
                (&raw mut converted).cast(),
                &mut count,
            );
            mach::thread_terminate(scratch);
            if kr != mach::KERN_SUCCESS {
                return Err(InjectionError::ThreadCreate(kr).into());
            }
            let mut thread: thread_act_t = 0;
            let kr = mach::thread_create_running(
                task,
                mach::ARM_THREAD_STATE64,
                (&raw const converted).cast(),
                count,
                &mut thread,
            );
            if kr != mach::KERN_SUCCESS {
                return Err(InjectionError::ThreadCreate(kr).into());
            }
            Ok(thread)
        } else {
            let state = mach::x86_thread_state64_t { rip: pc, rsp: sp, ..Default::default() };
            let mut thread: thread_act_t = 0;
            let kr = mach::thread_create_running(
                task,
                mach::X86_THREAD_STATE64,
                (&raw const state).cast(),
                mach::X86_THREAD_STATE64_COUNT,
                &mut thread,
            );
            if kr != mach::KERN_SUCCESS {
                return Err(InjectionError::ThreadCreate(kr).into());
            }
            Ok(thread)
        }
    }
}

/// Polls the remote register file for the completion magic.
unsafe fn wait_for_completion(thread: thread_act_t) -> Result<()> {
    let deadline = std::time::Instant::now() + POLL_BUDGET;
    loop {
        std::thread::sleep(POLL_INTERVAL);
        let register = unsafe { read_first_argument(thread) };
        if register == Some(COMPLETION_MAGIC) {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(InjectionError::Timeout.into());
        }
    }
}

unsafe fn read_first_argument(thread: thread_act_t) -> Option<u64> {
    unsafe {
        if cfg!(target_arch = "aarch64") {
            let mut state = mach::arm_thread_state64_t::default();
            let mut count = mach::ARM_THREAD_STATE64_COUNT;
            let kr = mach::thread_get_state(
                thread,
                mach::ARM_THREAD_STATE64,
                (&raw mut state).cast(),
                &mut count,
            );
            (kr == mach::KERN_SUCCESS).then_some(state.x[0])
        } else {
            let mut state = mach::x86_thread_state64_t::default();
            let mut count = mach::X86_THREAD_STATE64_COUNT;
            let kr = mach::thread_get_state(
                thread,
                mach::X86_THREAD_STATE64,
                (&raw mut state).cast(),
                &mut count,
            );
            (kr == mach::KERN_SUCCESS).then_some(state.rax)
        }
    }
}
