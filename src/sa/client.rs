//! Manager-side client for the in-Dock payload.
//!
//! One connection per request, one outstanding request at a time. Any
//! socket failure is logged and surfaced as an operation failure; nothing
//! here ever blocks past the protocol timeouts (500 ms for plain acks,
//! 1 s for response-carrying operations).

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::sa::protocol::{
    self, ACK_OK, Capabilities, CreateDiag, Opcode, Request, unpack_create_reply,
};

const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SaClient {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: String,
    pub capabilities: Capabilities,
}

impl SaClient {
    pub fn new() -> Self {
        SaClient { path: crate::sa::sa_socket_path() }
    }

    pub fn with_path(path: &Path) -> Self {
        SaClient { path: path.to_path_buf() }
    }

    pub fn is_available(&self) -> bool {
        self.path.exists()
    }

    fn roundtrip(&self, request: &Request) -> Result<Vec<u8>> {
        let timeout = if request.opcode().reply_len() > 1 {
            REPLY_TIMEOUT
        } else {
            ACK_TIMEOUT
        };
        let mut stream = UnixStream::connect(&self.path).map_err(|e| {
            warn!("sa connect failed: {e}");
            Error::SocketError(e)
        })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(ACK_TIMEOUT))?;

        stream.write_all(&request.encode())?;

        let mut reply = vec![0u8; request.opcode().reply_len()];
        stream.read_exact(&mut reply).map_err(|e| {
            warn!("sa read failed for {:?}: {e}", request.opcode());
            Error::SocketError(e)
        })?;
        Ok(reply)
    }

    fn acked(&self, request: Request) -> Result<()> {
        let reply = self.roundtrip(&request)?;
        if reply.first() == Some(&ACK_OK) {
            Ok(())
        } else {
            Err(Error::ProtocolError("operation refused"))
        }
    }

    pub fn handshake(&self) -> Result<Handshake> {
        // the handshake reply is variable-length, so it gets its own read
        let mut stream = UnixStream::connect(&self.path)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        stream.set_write_timeout(Some(ACK_TIMEOUT))?;
        stream.write_all(&Request::Handshake.encode())?;

        let mut reply = Vec::with_capacity(64);
        stream.read_to_end(&mut reply)?;
        let (version, capabilities) = protocol::decode_handshake_reply(&reply)?;
        debug!("sa payload {version}, caps {capabilities:?}");
        Ok(Handshake { version, capabilities })
    }

    pub fn focus_space(&self, sid: u64) -> Result<()> {
        self.acked(Request::SpaceFocus { sid })
    }

    /// Returns the created space id. The payload packs a diagnostic code
    /// into the top nibble; zero sid means the Dock refused.
    pub fn create_space(&self, display_space: u64) -> Result<u64> {
        let reply = self.roundtrip(&Request::SpaceCreate { sid: display_space })?;
        let raw = u64::from_le_bytes(
            reply
                .as_slice()
                .try_into()
                .map_err(|_| Error::ProtocolError("short create reply"))?,
        );
        let (sid, diag) = unpack_create_reply(raw);
        if sid == 0 || diag != CreateDiag::Ok {
            warn!("space create failed: {diag:?}");
            return Err(Error::ProtocolError("space create refused"));
        }
        debug!("created space {sid}");
        Ok(sid)
    }

    pub fn destroy_space(&self, sid: u64) -> Result<()> {
        self.acked(Request::SpaceDestroy { sid })
    }

    pub fn move_space(&self, src: u64, dst: u64, prev: u64, focus: bool) -> Result<()> {
        self.acked(Request::SpaceMove { src, dst, prev, focus })
    }

    pub fn move_window(&self, wid: u32, x: i32, y: i32) -> Result<()> {
        self.acked(Request::WindowMove { wid, x, y })
    }

    pub fn set_window_opacity(&self, wid: u32, alpha: f32) -> Result<()> {
        self.acked(Request::WindowOpacity { wid, alpha })
    }

    pub fn set_window_layer(&self, wid: u32, level: i32) -> Result<()> {
        self.acked(Request::WindowLayer { wid, level })
    }

    pub fn set_window_sticky(&self, wid: u32, on: bool) -> Result<()> {
        self.acked(Request::WindowSticky { wid, on })
    }

    pub fn set_window_shadow(&self, wid: u32, on: bool) -> Result<()> {
        self.acked(Request::WindowShadow { wid, on })
    }

    pub fn order_window(&self, wid: u32, rel: i32, other: u32) -> Result<()> {
        self.acked(Request::WindowOrder { wid, rel, other })
    }

    pub fn window_to_space(&self, sid: u64, wid: u32) -> Result<()> {
        self.acked(Request::WindowToSpace { sid, wid })
    }

    /// Used by the platform layer to downgrade SA ops to plain failures.
    pub fn try_acked(&self, request: Request) -> bool {
        debug_assert_ne!(request.opcode(), Opcode::SpaceCreate);
        self.acked(request).is_ok()
    }
}

impl Default for SaClient {
    fn default() -> Self {
        SaClient::new()
    }
}
