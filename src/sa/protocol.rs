//! Wire protocol between the manager and the in-Dock payload.
//!
//! Transport is a UNIX stream socket. Requests are framed as
//! `[length: i16 LE][opcode: u8][payload: length-1 bytes]`. Responses are
//! not framed: every operation acks with a single byte except
//! `space_create`, which answers with eight bytes carrying the new space
//! id in the low 60 bits and a diagnostic code in the top nibble.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::errors::{Error, Result};

pub const PROTOCOL_VERSION: &str = "2.0";

/// Single-byte ack sent for every non-value-returning operation.
pub const ACK_OK: u8 = 0x01;
pub const ACK_FAIL: u8 = 0x00;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum Opcode {
    Handshake = 0x01,
    SpaceFocus = 0x02,
    SpaceCreate = 0x03,
    SpaceDestroy = 0x04,
    SpaceMove = 0x05,
    WindowMove = 0x06,
    WindowOpacity = 0x07,
    WindowLayer = 0x09,
    WindowSticky = 0x0A,
    WindowShadow = 0x0B,
    WindowOrder = 0x10,
    WindowToSpace = 0x13,
}

impl Opcode {
    /// `space_create` is the sole opcode answering with eight bytes.
    pub fn reply_len(self) -> usize {
        match self {
            Opcode::SpaceCreate => 8,
            _ => 1,
        }
    }
}

bitflags! {
    /// Advertised in the handshake: which discovered entities were present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const SPACE_CREATE  = 1 << 0;
        const SPACE_DESTROY = 1 << 1;
        const SPACE_MOVE    = 1 << 2;
    }
}

/// Why `space_create` produced no usable space; packed in the top nibble
/// of the reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum CreateDiag {
    Ok = 0,
    NoGlobal = 1,
    NoFunctionPointer = 2,
    NoDisplayUuid = 3,
    UnchangedCount = 4,
}

const SID_MASK: u64 = (1 << 60) - 1;

pub fn pack_create_reply(sid: u64, diag: CreateDiag) -> u64 {
    (u64::from(u8::from(diag)) << 60) | (sid & SID_MASK)
}

pub fn unpack_create_reply(reply: u64) -> (u64, CreateDiag) {
    let diag = CreateDiag::try_from((reply >> 60) as u8).unwrap_or(CreateDiag::UnchangedCount);
    (reply & SID_MASK, diag)
}

pub fn encode_frame(op: Opcode, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 1) as i16;
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.push(op.into());
    frame.extend_from_slice(payload);
    frame
}

pub fn decode_frame(bytes: &[u8]) -> Result<(Opcode, &[u8])> {
    if bytes.len() < 3 {
        return Err(Error::ProtocolError("short frame"));
    }
    let len = i16::from_le_bytes([bytes[0], bytes[1]]);
    if len < 1 {
        return Err(Error::ProtocolError("bad frame length"));
    }
    let body_len = len as usize;
    if bytes.len() < 2 + body_len {
        return Err(Error::ProtocolError("truncated frame"));
    }
    let op = Opcode::try_from(bytes[2]).map_err(|_| Error::ProtocolError("unknown opcode"))?;
    Ok((op, &bytes[3..2 + body_len]))
}

/// Little-endian field reader for request payloads.
pub struct Fields<'a> {
    bytes: &'a [u8],
}

impl<'a> Fields<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Fields { bytes }
    }

    pub fn u8(&mut self) -> Option<u8> {
        let (head, rest) = self.bytes.split_first()?;
        self.bytes = rest;
        Some(*head)
    }

    pub fn u32(&mut self) -> Option<u32> {
        let (head, rest) = self.bytes.split_at_checked(4)?;
        self.bytes = rest;
        Some(u32::from_le_bytes(head.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    pub fn u64(&mut self) -> Option<u64> {
        let (head, rest) = self.bytes.split_at_checked(8)?;
        self.bytes = rest;
        Some(u64::from_le_bytes(head.try_into().unwrap()))
    }

    pub fn f32(&mut self) -> Option<f32> {
        self.u32().map(f32::from_bits)
    }

    pub fn done(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Typed requests, decoded by the payload server and encoded by the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    Handshake,
    SpaceFocus { sid: u64 },
    SpaceCreate { sid: u64 },
    SpaceDestroy { sid: u64 },
    SpaceMove { src: u64, dst: u64, prev: u64, focus: bool },
    WindowMove { wid: u32, x: i32, y: i32 },
    WindowOpacity { wid: u32, alpha: f32 },
    WindowLayer { wid: u32, level: i32 },
    WindowSticky { wid: u32, on: bool },
    WindowShadow { wid: u32, on: bool },
    WindowOrder { wid: u32, rel: i32, other: u32 },
    WindowToSpace { sid: u64, wid: u32 },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Handshake => Opcode::Handshake,
            Request::SpaceFocus { .. } => Opcode::SpaceFocus,
            Request::SpaceCreate { .. } => Opcode::SpaceCreate,
            Request::SpaceDestroy { .. } => Opcode::SpaceDestroy,
            Request::SpaceMove { .. } => Opcode::SpaceMove,
            Request::WindowMove { .. } => Opcode::WindowMove,
            Request::WindowOpacity { .. } => Opcode::WindowOpacity,
            Request::WindowLayer { .. } => Opcode::WindowLayer,
            Request::WindowSticky { .. } => Opcode::WindowSticky,
            Request::WindowShadow { .. } => Opcode::WindowShadow,
            Request::WindowOrder { .. } => Opcode::WindowOrder,
            Request::WindowToSpace { .. } => Opcode::WindowToSpace,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match *self {
            Request::Handshake => {}
            Request::SpaceFocus { sid }
            | Request::SpaceCreate { sid }
            | Request::SpaceDestroy { sid } => payload.extend_from_slice(&sid.to_le_bytes()),
            Request::SpaceMove { src, dst, prev, focus } => {
                payload.extend_from_slice(&src.to_le_bytes());
                payload.extend_from_slice(&dst.to_le_bytes());
                payload.extend_from_slice(&prev.to_le_bytes());
                payload.push(u8::from(focus));
            }
            Request::WindowMove { wid, x, y } => {
                payload.extend_from_slice(&wid.to_le_bytes());
                payload.extend_from_slice(&x.to_le_bytes());
                payload.extend_from_slice(&y.to_le_bytes());
            }
            Request::WindowOpacity { wid, alpha } => {
                payload.extend_from_slice(&wid.to_le_bytes());
                payload.extend_from_slice(&alpha.to_bits().to_le_bytes());
            }
            Request::WindowLayer { wid, level } => {
                payload.extend_from_slice(&wid.to_le_bytes());
                payload.extend_from_slice(&level.to_le_bytes());
            }
            Request::WindowSticky { wid, on } | Request::WindowShadow { wid, on } => {
                payload.extend_from_slice(&wid.to_le_bytes());
                payload.push(u8::from(on));
            }
            Request::WindowOrder { wid, rel, other } => {
                payload.extend_from_slice(&wid.to_le_bytes());
                payload.extend_from_slice(&rel.to_le_bytes());
                payload.extend_from_slice(&other.to_le_bytes());
            }
            Request::WindowToSpace { sid, wid } => {
                payload.extend_from_slice(&sid.to_le_bytes());
                payload.extend_from_slice(&wid.to_le_bytes());
            }
        }
        encode_frame(self.opcode(), &payload)
    }

    pub fn decode(frame: &[u8]) -> Result<Request> {
        let (op, payload) = decode_frame(frame)?;
        let mut f = Fields::new(payload);
        let parsed = match op {
            Opcode::Handshake => Some(Request::Handshake),
            Opcode::SpaceFocus => f.u64().map(|sid| Request::SpaceFocus { sid }),
            Opcode::SpaceCreate => f.u64().map(|sid| Request::SpaceCreate { sid }),
            Opcode::SpaceDestroy => f.u64().map(|sid| Request::SpaceDestroy { sid }),
            Opcode::SpaceMove => (|| {
                Some(Request::SpaceMove {
                    src: f.u64()?,
                    dst: f.u64()?,
                    prev: f.u64()?,
                    focus: f.u8()? != 0,
                })
            })(),
            Opcode::WindowMove => (|| {
                Some(Request::WindowMove { wid: f.u32()?, x: f.i32()?, y: f.i32()? })
            })(),
            Opcode::WindowOpacity => (|| {
                Some(Request::WindowOpacity { wid: f.u32()?, alpha: f.f32()? })
            })(),
            Opcode::WindowLayer => (|| {
                Some(Request::WindowLayer { wid: f.u32()?, level: f.i32()? })
            })(),
            Opcode::WindowSticky => (|| {
                Some(Request::WindowSticky { wid: f.u32()?, on: f.u8()? != 0 })
            })(),
            Opcode::WindowShadow => (|| {
                Some(Request::WindowShadow { wid: f.u32()?, on: f.u8()? != 0 })
            })(),
            Opcode::WindowOrder => (|| {
                Some(Request::WindowOrder { wid: f.u32()?, rel: f.i32()?, other: f.u32()? })
            })(),
            Opcode::WindowToSpace => (|| {
                Some(Request::WindowToSpace { sid: f.u64()?, wid: f.u32()? })
            })(),
        };
        match parsed {
            Some(request) if f.done() => Ok(request),
            _ => Err(Error::ProtocolError("malformed request payload")),
        }
    }
}

/// Handshake reply: `[version_len: u8][version][caps: u32 LE]`.
pub fn encode_handshake_reply(version: &str, caps: Capabilities) -> Vec<u8> {
    let mut reply = Vec::with_capacity(version.len() + 5);
    reply.push(version.len() as u8);
    reply.extend_from_slice(version.as_bytes());
    reply.extend_from_slice(&caps.bits().to_le_bytes());
    reply
}

pub fn decode_handshake_reply(bytes: &[u8]) -> Result<(String, Capabilities)> {
    let mut f = Fields::new(bytes);
    let len = f.u8().ok_or(Error::ProtocolError("short handshake"))? as usize;
    if bytes.len() < 1 + len + 4 {
        return Err(Error::ProtocolError("short handshake"));
    }
    let version = std::str::from_utf8(&bytes[1..1 + len])
        .map_err(|_| Error::ProtocolError("bad handshake version"))?
        .to_string();
    let caps = u32::from_le_bytes(bytes[1 + len..1 + len + 4].try_into().unwrap());
    Ok((version, Capabilities::from_bits_truncate(caps)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn all_requests() -> Vec<Request> {
        vec![
            Request::Handshake,
            Request::SpaceFocus { sid: 0x64 },
            Request::SpaceCreate { sid: 0x64 },
            Request::SpaceDestroy { sid: 7 },
            Request::SpaceMove { src: 1, dst: 2, prev: 3, focus: true },
            Request::WindowMove { wid: 500, x: -10, y: 20 },
            Request::WindowOpacity { wid: 500, alpha: 0.5 },
            Request::WindowLayer { wid: 500, level: -20 },
            Request::WindowSticky { wid: 500, on: true },
            Request::WindowShadow { wid: 500, on: false },
            Request::WindowOrder { wid: 500, rel: 1, other: 501 },
            Request::WindowToSpace { sid: 0x64, wid: 500 },
        ]
    }

    #[test]
    fn every_request_round_trips() {
        for request in all_requests() {
            let frame = request.encode();
            let decoded = Request::decode(&frame).unwrap();
            assert_eq!(decoded, request, "{request:?}");
        }
    }

    #[test]
    fn frame_layout_is_length_opcode_payload() {
        // the space-create example: length 9, opcode, 8 payload bytes
        let frame = Request::SpaceCreate { sid: 0x64 }.encode();
        assert_eq!(frame.len(), 11);
        assert_eq!(&frame[0..2], &9i16.to_le_bytes());
        assert_eq!(frame[2], 0x03);
        assert_eq!(&frame[3..11], &0x64u64.to_le_bytes());
    }

    #[test]
    fn opcodes_match_the_wire_values() {
        assert_eq!(u8::from(Opcode::Handshake), 0x01);
        assert_eq!(u8::from(Opcode::SpaceFocus), 0x02);
        assert_eq!(u8::from(Opcode::SpaceCreate), 0x03);
        assert_eq!(u8::from(Opcode::SpaceDestroy), 0x04);
        assert_eq!(u8::from(Opcode::SpaceMove), 0x05);
        assert_eq!(u8::from(Opcode::WindowMove), 0x06);
        assert_eq!(u8::from(Opcode::WindowOpacity), 0x07);
        assert_eq!(u8::from(Opcode::WindowLayer), 0x09);
        assert_eq!(u8::from(Opcode::WindowSticky), 0x0A);
        assert_eq!(u8::from(Opcode::WindowShadow), 0x0B);
        assert_eq!(u8::from(Opcode::WindowOrder), 0x10);
        assert_eq!(u8::from(Opcode::WindowToSpace), 0x13);
        assert!(Opcode::try_from(0x08u8).is_err());
    }

    #[test]
    fn only_space_create_returns_a_wide_reply() {
        for request in all_requests() {
            let expected = if request.opcode() == Opcode::SpaceCreate { 8 } else { 1 };
            assert_eq!(request.opcode().reply_len(), expected);
        }
    }

    #[test]
    fn truncated_and_malformed_frames_are_rejected() {
        assert!(Request::decode(&[]).is_err());
        assert!(Request::decode(&[9, 0]).is_err());
        // frame claims 9 body bytes but carries 4
        assert!(Request::decode(&[9, 0, 0x03, 1, 2, 3]).is_err());
        // unknown opcode
        assert!(Request::decode(&[1, 0, 0xFF]).is_err());
        // trailing garbage after a well-formed payload
        let mut frame = Request::SpaceFocus { sid: 1 }.encode();
        frame[0] += 1;
        frame.push(0xAB);
        assert!(Request::decode(&frame).is_err());
    }

    #[test]
    fn create_reply_packs_sid_and_diagnostic() {
        let reply = pack_create_reply(0x64, CreateDiag::Ok);
        assert_eq!(unpack_create_reply(reply), (0x64, CreateDiag::Ok));

        let failed = pack_create_reply(0, CreateDiag::NoDisplayUuid);
        let (sid, diag) = unpack_create_reply(failed);
        assert_eq!(sid, 0);
        assert_eq!(diag, CreateDiag::NoDisplayUuid);

        // a huge sid does not bleed into the diagnostic nibble
        let packed = pack_create_reply(u64::MAX, CreateDiag::Ok);
        let (sid, diag) = unpack_create_reply(packed);
        assert_eq!(sid, (1 << 60) - 1);
        assert_eq!(diag, CreateDiag::Ok);
    }

    #[test]
    fn handshake_reply_round_trips() {
        let caps = Capabilities::SPACE_CREATE | Capabilities::SPACE_MOVE;
        let reply = encode_handshake_reply(PROTOCOL_VERSION, caps);
        let (version, decoded) = decode_handshake_reply(&reply).unwrap();
        assert_eq!(version, PROTOCOL_VERSION);
        assert_eq!(decoded, caps);

        assert!(decode_handshake_reply(&[]).is_err());
        assert!(decode_handshake_reply(&[200]).is_err());
    }
}
