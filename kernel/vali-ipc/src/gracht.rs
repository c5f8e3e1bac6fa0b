//! Gracht-style RPC wire framing (C11).
//!
//! Defines the fixed header, inline-argument encoding, and addressing
//! types the IPC context and its `ipc_send`/`ipc_recv`/`ipc_respond`
//! operations are built from. Encoding/decoding a message onto a
//! [`crate::streambuffer::StreamBuffer`] is pure, allocation-light logic
//! and lives here; resolving an [`IpcAddress::ByPath`] against a process's
//! handle table, enforcing a send deadline against the time wheel, and
//! waking a [`crate::handleset::HandleSet`] on delivery all need
//! collaborators only `vali-kernel` owns (`HandleTable::find_by_path`,
//! `TimeBase`, the scheduler) and so live in its IPC glue, built on top of
//! the framing this module provides.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use vali_core::id::HandleId;

/// Maximum number of inline scalar arguments a gracht message can carry
/// before falling back to the variable trailing payload.
pub const MAX_INLINE_ARGS: usize = 5;

/// Size in bytes of the on-wire [`GrachtHeader`] encoding.
pub const HEADER_SIZE: usize = 10;

/// Fixed header prefixing every gracht message (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrachtHeader {
    /// Protocol magic, identifying this as a gracht-framed message.
    pub magic: u32,
    /// Protocol id (which service's call table `action` indexes into).
    pub protocol: u8,
    /// Action (method) number within the protocol.
    pub action: u8,
    /// Total length of the encoded args + payload that follows.
    pub length: u16,
    /// Protocol-defined flags (e.g. "this is a response", "one-way call").
    pub flags: u16,
}

impl GrachtHeader {
    /// Encodes the header as its fixed 10-byte wire form.
    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.protocol;
        buf[5] = self.action;
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..10].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Decodes a header from its wire form.
    pub fn parse(bytes: &[u8]) -> Result<Self, IpcError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IpcError::InvalidProtocol);
        }
        Ok(Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            protocol: bytes[4],
            action: bytes[5],
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
            flags: u16::from_le_bytes([bytes[8], bytes[9]]),
        })
    }
}

/// One inline scalar argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrachtArg {
    /// A signed 64-bit scalar.
    Int(i64),
    /// An unsigned 64-bit scalar (also used for packed handle/object ids).
    UInt(u64),
}

impl GrachtArg {
    const TAG_INT: u8 = 0;
    const TAG_UINT: u8 = 1;
    const ENCODED_LEN: usize = 9;

    fn pack(self, out: &mut Vec<u8>) {
        match self {
            Self::Int(v) => {
                out.push(Self::TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::UInt(v) => {
                out.push(Self::TAG_UINT);
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }

    fn parse(bytes: &[u8]) -> Result<Self, IpcError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(IpcError::InvalidProtocol);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[1..9]);
        match bytes[0] {
            Self::TAG_INT => Ok(Self::Int(i64::from_le_bytes(raw))),
            Self::TAG_UINT => Ok(Self::UInt(u64::from_le_bytes(raw))),
            _ => Err(IpcError::InvalidProtocol),
        }
    }
}

/// Where an `ipc_send` targets: directly by handle, or by a well-known
/// service path resolved through the caller's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcAddress<'a> {
    /// Send directly to a known `IpcContext` handle.
    ByHandle(HandleId),
    /// Resolve a service path (e.g. via the VFS/registry) to a handle first.
    ByPath(&'a str),
}

/// A process's IPC endpoint: a handle naming a `StreamBuffer`-backed
/// handle object, exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct IpcContext(HandleId);

impl IpcContext {
    /// Wraps a handle as an IPC context.
    pub const fn new(handle: HandleId) -> Self {
        Self(handle)
    }

    /// The backing handle.
    pub const fn handle(self) -> HandleId {
        self.0
    }
}

/// Errors reported by IPC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// `ByPath` address did not resolve to any handle.
    NotFound,
    /// The target context has no peer (e.g. it was torn down).
    NotConnected,
    /// The send/receive deadline elapsed (or had already elapsed).
    Timeout,
    /// The wait was cancelled via `ActivityBits::CANCELLED`.
    Cancelled,
    /// The message failed to decode as a well-formed gracht frame.
    InvalidProtocol,
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::NotConnected => "not connected",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidProtocol => "invalid protocol",
        };
        f.write_str(s)
    }
}

/// Encodes `header`'s trailing args and payload into a single byte buffer
/// ready to hand to [`crate::streambuffer::StreamBuffer::write_packet_start`]'s
/// cursor: `[u8 arg_count][args...][payload]`. `header.length` is filled in
/// to match the encoded size; the header itself is not included in the
/// returned bytes (the stream-buffer packet header already carries a
/// sender field, so the gracht header is logically the first part of the
/// packet *payload*, not the ring's own framing).
pub fn encode_message(
    header: &mut GrachtHeader,
    args: &[GrachtArg],
    payload: &[u8],
) -> Result<Vec<u8>, IpcError> {
    if args.len() > MAX_INLINE_ARGS {
        return Err(IpcError::InvalidProtocol);
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + 1 + args.len() * GrachtArg::ENCODED_LEN + payload.len());
    out.push(u8::try_from(args.len()).map_err(|_| IpcError::InvalidProtocol)?);
    for arg in args {
        arg.pack(&mut out);
    }
    out.extend_from_slice(payload);
    header.length = u16::try_from(out.len()).map_err(|_| IpcError::InvalidProtocol)?;
    let mut full = Vec::with_capacity(HEADER_SIZE + out.len());
    full.extend_from_slice(&header.pack());
    full.extend_from_slice(&out);
    Ok(full)
}

/// The inverse of [`encode_message`]: splits a full wire message (header +
/// args + payload) back into its parts.
pub fn decode_message(bytes: &[u8]) -> Result<(GrachtHeader, Vec<GrachtArg>, &[u8]), IpcError> {
    let header = GrachtHeader::parse(bytes)?;
    let body = &bytes[HEADER_SIZE..];
    if body.is_empty() {
        return Err(IpcError::InvalidProtocol);
    }
    let arg_count = body[0] as usize;
    if arg_count > MAX_INLINE_ARGS {
        return Err(IpcError::InvalidProtocol);
    }
    let mut args = Vec::with_capacity(arg_count);
    let mut offset = 1;
    for _ in 0..arg_count {
        let chunk = body.get(offset..).ok_or(IpcError::InvalidProtocol)?;
        args.push(GrachtArg::parse(chunk)?);
        offset += GrachtArg::ENCODED_LEN;
    }
    let payload = body.get(offset..).ok_or(IpcError::InvalidProtocol)?;
    Ok((header, args, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = GrachtHeader { magic: 0x4854_4152, protocol: 3, action: 7, length: 0, flags: 1 };
        let packed = header.pack();
        let parsed = GrachtHeader::parse(&packed).unwrap();
        assert_eq!(parsed.protocol, 3);
        assert_eq!(parsed.action, 7);
        assert_eq!(parsed.flags, 1);
    }

    #[test]
    fn message_round_trips_args_and_payload() {
        let mut header = GrachtHeader { magic: 1, protocol: 2, action: 3, length: 0, flags: 0 };
        let args = [GrachtArg::Int(-5), GrachtArg::UInt(9000)];
        let payload = b"hello world";
        let encoded = encode_message(&mut header, &args, payload).unwrap();

        let (decoded_header, decoded_args, decoded_payload) = decode_message(&encoded).unwrap();
        assert_eq!(decoded_header.protocol, 2);
        assert_eq!(decoded_args, args.to_vec());
        assert_eq!(decoded_payload, payload);
        assert_eq!(decoded_header.length as usize, 1 + args.len() * GrachtArg::ENCODED_LEN + payload.len());
    }

    #[test]
    fn too_many_args_rejected() {
        let mut header = GrachtHeader { magic: 0, protocol: 0, action: 0, length: 0, flags: 0 };
        let args = [GrachtArg::Int(0); MAX_INLINE_ARGS + 1];
        assert_eq!(encode_message(&mut header, &args, &[]), Err(IpcError::InvalidProtocol));
    }

    #[test]
    fn truncated_message_rejected() {
        assert_eq!(decode_message(&[0u8; 4]), Err(IpcError::InvalidProtocol));
    }
}
