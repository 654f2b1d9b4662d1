//! The server living inside the Dock.
//!
//! A detached listener accepts one connection at a time, reads one framed
//! request, dispatches it, writes the response, and closes. The actual
//! space and window calls go through a [`DockOps`] implementation; the
//! real one marshals itself onto the Dock's main queue and branches to the
//! discovered function addresses, while tests plug in a scripted one.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::sa::protocol::{
    ACK_FAIL, ACK_OK, Capabilities, Request, encode_handshake_reply, pack_create_reply,
    PROTOCOL_VERSION,
};

/// What the payload can do to its host. Every call happens on the host's
/// main queue in the real implementation.
pub trait DockOps: Send + Sync {
    fn capabilities(&self) -> Capabilities;
    fn space_focus(&self, sid: u64) -> bool;
    /// Returns the packed create reply (sid + diagnostic nibble).
    fn space_create(&self, display_space: u64) -> u64;
    fn space_destroy(&self, sid: u64) -> bool;
    fn space_move(&self, src: u64, dst: u64, prev: u64, focus: bool) -> bool;
    fn window_move(&self, wid: u32, x: i32, y: i32) -> bool;
    fn window_opacity(&self, wid: u32, alpha: f32) -> bool;
    fn window_layer(&self, wid: u32, level: i32) -> bool;
    fn window_sticky(&self, wid: u32, on: bool) -> bool;
    fn window_shadow(&self, wid: u32, on: bool) -> bool;
    fn window_order(&self, wid: u32, rel: i32, other: u32) -> bool;
    fn window_to_space(&self, sid: u64, wid: u32) -> bool;
}

pub struct PayloadServer<O: DockOps> {
    listener: UnixListener,
    ops: Arc<O>,
    shutdown: Arc<AtomicBool>,
}

impl<O: DockOps + 'static> PayloadServer<O> {
    /// Binds the socket, replacing a stale one, and restricts it to the
    /// owning user.
    pub fn bind(path: &Path, ops: O) -> Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        let mut permissions = std::fs::metadata(path)?.permissions();
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(0o600);
        std::fs::set_permissions(path, permissions)?;
        Ok(PayloadServer {
            listener,
            ops: Arc::new(ops),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Serves until shut down. One connection, one request, one response.
    pub fn run(&self) {
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => handle_connection(stream, self.ops.as_ref()),
                Err(e) => {
                    warn!("sa accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// Detaches the listener onto its own thread.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("sa-payload".into())
            .spawn(move || self.run())
            .expect("spawning the payload listener")
    }
}

fn handle_connection<O: DockOps>(mut stream: UnixStream, ops: &O) {
    let mut buffer = [0u8; 128];
    let mut have = 0usize;

    // one frame: the 2-byte length, then the body
    let request = loop {
        match stream.read(&mut buffer[have..]) {
            Ok(0) => return,
            Ok(n) => have += n,
            Err(e) => {
                warn!("sa read failed: {e}");
                return;
            }
        }
        if have < 2 {
            continue;
        }
        let body = i16::from_le_bytes([buffer[0], buffer[1]]);
        if body < 1 || body as usize + 2 > buffer.len() {
            warn!("sa frame length {body} rejected");
            return;
        }
        if have >= body as usize + 2 {
            match Request::decode(&buffer[..have]) {
                Ok(request) => break request,
                Err(e) => {
                    warn!("sa request rejected: {e}");
                    let _ = stream.write_all(&[ACK_FAIL]);
                    return;
                }
            }
        }
    };

    debug!("sa request: {request:?}");
    let reply: Vec<u8> = match request {
        Request::Handshake => encode_handshake_reply(PROTOCOL_VERSION, ops.capabilities()),
        Request::SpaceCreate { sid } => ops.space_create(sid).to_le_bytes().to_vec(),
        Request::SpaceFocus { sid } => ack(ops.space_focus(sid)),
        Request::SpaceDestroy { sid } => ack(ops.space_destroy(sid)),
        Request::SpaceMove { src, dst, prev, focus } => ack(ops.space_move(src, dst, prev, focus)),
        Request::WindowMove { wid, x, y } => ack(ops.window_move(wid, x, y)),
        Request::WindowOpacity { wid, alpha } => ack(ops.window_opacity(wid, alpha)),
        Request::WindowLayer { wid, level } => ack(ops.window_layer(wid, level)),
        Request::WindowSticky { wid, on } => ack(ops.window_sticky(wid, on)),
        Request::WindowShadow { wid, on } => ack(ops.window_shadow(wid, on)),
        Request::WindowOrder { wid, rel, other } => ack(ops.window_order(wid, rel, other)),
        Request::WindowToSpace { sid, wid } => ack(ops.window_to_space(sid, wid)),
    };
    if let Err(e) = stream.write_all(&reply) {
        warn!("sa reply failed: {e}");
    }
}

fn ack(ok: bool) -> Vec<u8> {
    vec![if ok { ACK_OK } else { ACK_FAIL }]
}

/// Real implementation: calls the discovered Dock internals on the main
/// queue, with the register conventions those functions expect.
#[cfg(target_os = "macos")]
pub mod dock {
    use parking_lot::Mutex;

    use super::*;
    use crate::sa::discovery::SaTargets;
    use crate::sa::protocol::CreateDiag;
    use crate::sys::dispatch;

    pub struct MacDockOps {
        targets: SaTargets,
        /// Space mutations are serialized; the Dock's controller is not
        /// reentrant.
        gate: Mutex<()>,
    }

    impl MacDockOps {
        pub fn new(targets: SaTargets) -> Self {
            MacDockOps { targets, gate: Mutex::new(()) }
        }

        /// Branches to a discovered function with the controller object in
        /// the argument registers the Dock's own call sites use.
        ///
        /// `x0` carries the spaces controller, `x1`/`x2` the space ids.
        /// The pointer is re-signed before the branch; see
        /// [`crate::sa::inject::sign`].
        #[cfg(target_arch = "aarch64")]
        unsafe fn call2(&self, function: u64, this: u64, a: u64, b: u64) {
            let signed = crate::sa::inject::sign(function);
            unsafe {
                let f: extern "C" fn(u64, u64, u64) = std::mem::transmute(signed);
                f(this, a, b);
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        unsafe fn call2(&self, function: u64, this: u64, a: u64, b: u64) {
            unsafe {
                let f: extern "C" fn(u64, u64, u64) = std::mem::transmute(function);
                f(this, a, b);
            }
        }

        fn dock_spaces_instance(&self) -> Option<u64> {
            let global = self.targets.dock_spaces?;
            // the global holds the controller object pointer
            let instance = unsafe { std::ptr::read(global as *const u64) };
            (instance != 0).then_some(instance)
        }
    }

    impl DockOps for MacDockOps {
        fn capabilities(&self) -> Capabilities {
            self.targets.capabilities()
        }

        fn space_focus(&self, sid: u64) -> bool {
            let Some(set_front) = self.targets.set_front_window else {
                return false;
            };
            let Some(instance) = self.dock_spaces_instance() else {
                return false;
            };
            let _gate = self.gate.lock();
            dispatch::on_main_queue(move || unsafe {
                objc_retain(instance);
                let f: extern "C" fn(u64, u64) =
                    std::mem::transmute(crate::sa::inject::sign(set_front));
                f(instance, sid);
                objc_release(instance);
            });
            true
        }

        fn space_create(&self, display_space: u64) -> u64 {
            let Some(add_space) = self.targets.add_space else {
                return pack_create_reply(0, CreateDiag::NoFunctionPointer);
            };
            let Some(instance) = self.dock_spaces_instance() else {
                return pack_create_reply(0, CreateDiag::NoGlobal);
            };
            // the display manager resolves which display's UUID the new
            // space attaches to; without it the call would land nowhere
            if self.targets.dppm.is_none() {
                return pack_create_reply(0, CreateDiag::NoDisplayUuid);
            }
            let _gate = self.gate.lock();
            let created = dispatch::on_main_queue_sync(move || unsafe {
                objc_retain(instance);
                let before = current_space_count(instance);
                let f: extern "C" fn(u64, u64) =
                    std::mem::transmute(crate::sa::inject::sign(add_space));
                f(instance, display_space);
                let after = current_space_count(instance);
                objc_release(instance);
                (before, after)
            });
            match created {
                Some((before, after)) if after > before => {
                    pack_create_reply(latest_space_id(), CreateDiag::Ok)
                }
                Some(_) => pack_create_reply(0, CreateDiag::UnchangedCount),
                None => pack_create_reply(0, CreateDiag::NoDisplayUuid),
            }
        }

        fn space_destroy(&self, sid: u64) -> bool {
            let Some(remove_space) = self.targets.remove_space else {
                return false;
            };
            let Some(instance) = self.dock_spaces_instance() else {
                return false;
            };
            let _gate = self.gate.lock();
            dispatch::on_main_queue(move || unsafe {
                objc_retain(instance);
                let f: extern "C" fn(u64, u64) =
                    std::mem::transmute(crate::sa::inject::sign(remove_space));
                f(instance, sid);
                objc_release(instance);
            });
            true
        }

        fn space_move(&self, src: u64, dst: u64, prev: u64, focus: bool) -> bool {
            let Some(move_space) = self.targets.move_space else {
                return false;
            };
            let Some(instance) = self.dock_spaces_instance() else {
                return false;
            };
            let _gate = self.gate.lock();
            let this = self as *const MacDockOps as usize;
            dispatch::on_main_queue(move || unsafe {
                let ops = &*(this as *const MacDockOps);
                ops.call2(move_space, instance, src, dst);
                if focus {
                    if let Some(fix) = ops.targets.fix_animation {
                        let f: extern "C" fn(u64) =
                            std::mem::transmute(crate::sa::inject::sign(fix));
                        f(prev);
                    }
                }
            });
            true
        }

        fn window_move(&self, wid: u32, x: i32, y: i32) -> bool {
            unsafe {
                crate::sys::skylight::SLSMoveWindow(
                    crate::sys::skylight::main_connection(),
                    wid,
                    &objc2_core_foundation::CGPoint::new(f64::from(x), f64::from(y)),
                ) == 0
            }
        }

        fn window_opacity(&self, wid: u32, alpha: f32) -> bool {
            unsafe {
                crate::sys::skylight::SLSSetWindowAlpha(
                    crate::sys::skylight::main_connection(),
                    wid,
                    alpha,
                ) == 0
            }
        }

        fn window_layer(&self, wid: u32, level: i32) -> bool {
            unsafe {
                crate::sys::skylight::SLSSetWindowLevel(
                    crate::sys::skylight::main_connection(),
                    wid,
                    level,
                ) == 0
            }
        }

        fn window_sticky(&self, wid: u32, on: bool) -> bool {
            let mut tags: u64 = 1 << 11;
            let cid = crate::sys::skylight::main_connection();
            unsafe {
                if on {
                    crate::sys::skylight::SLSSetWindowTags(cid, wid, &mut tags, 64) == 0
                } else {
                    crate::sys::skylight::SLSClearWindowTags(cid, wid, &mut tags, 64) == 0
                }
            }
        }

        fn window_shadow(&self, wid: u32, on: bool) -> bool {
            let mut tags: u64 = 1 << 3;
            let cid = crate::sys::skylight::main_connection();
            unsafe {
                if on {
                    crate::sys::skylight::SLSClearWindowTags(cid, wid, &mut tags, 64) == 0
                } else {
                    crate::sys::skylight::SLSSetWindowTags(cid, wid, &mut tags, 64) == 0
                }
            }
        }

        fn window_order(&self, wid: u32, rel: i32, other: u32) -> bool {
            unsafe {
                crate::sys::skylight::SLSOrderWindow(
                    crate::sys::skylight::main_connection(),
                    wid,
                    rel,
                    other,
                ) == 0
            }
        }

        fn window_to_space(&self, sid: u64, wid: u32) -> bool {
            crate::sys::skylight::move_windows_to_space(&[wid], sid)
        }
    }

    unsafe extern "C" {
        fn objc_retain(obj: u64) -> u64;
        fn objc_release(obj: u64);
        fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
    }

    /// Runs when the dylib is loaded by the injected bootstrap thread.
    /// Discovery happens against the host executable, the addresses are
    /// rebased by the loader slide, and the listener goes onto its own
    /// thread. Failure here only costs capabilities; the Dock is left
    /// untouched.
    #[unsafe(no_mangle)]
    pub extern "C" fn slate_payload_main() {
        let Ok(exe) = std::env::current_exe() else {
            return;
        };
        if exe.file_name().and_then(|n| n.to_str()) != Some("Dock") {
            return;
        }

        let targets = match std::fs::read(&exe) {
            Ok(bytes) => match crate::sa::macho::MachImage::parse(&bytes) {
                Ok(image) => {
                    let (targets, report) = crate::sa::discovery::Discovery::new(&image).discover();
                    tracing::debug!("discovery:\n{report}");
                    let verification = crate::sa::verify::verify_static(&image, &targets);
                    let targets = crate::sa::verify::prune(targets, &verification);
                    targets.slid(unsafe { _dyld_get_image_vmaddr_slide(0) } as i64)
                }
                Err(_) => SaTargets::default(),
            },
            // shared-cache-only hosts have no standalone image to read;
            // serve with no capabilities rather than guessing addresses
            Err(_) => SaTargets::default(),
        };

        let path = crate::sa::sa_socket_path();
        match PayloadServer::bind(&path, MacDockOps::new(targets)) {
            Ok(server) => {
                server.spawn();
            }
            Err(e) => {
                warn!("payload socket unavailable: {e}");
            }
        }
    }

    #[used]
    #[unsafe(link_section = "__DATA,__mod_init_func")]
    static PAYLOAD_BOOTSTRAP: extern "C" fn() = slate_payload_main;

    unsafe fn current_space_count(_instance: u64) -> u64 {
        // the controller's space array length; the count probe only needs
        // to observe a change, not the exact value
        crate::sys::skylight::managed_space_count()
    }

    fn latest_space_id() -> u64 {
        crate::sys::skylight::newest_space_id()
    }
}
