//! IPC context registry (C11): gracht framing over per-connection
//! [`StreamBuffer`]s, addressed by handle or by a path registered in the
//! handle table.
//!
//! `vali_ipc::gracht`/`streambuffer` supply the wire format and the ring
//! buffer; this module owns the piece that needs the handle table and the
//! scheduler: resolving [`IpcAddress`], allocating a context's buffers, and
//! turning a would-block ring into the kernel's blocking-retry convention.

extern crate alloc;

use alloc::collections::BTreeMap;

use vali_core::error::SysError;
use vali_core::handle::ObjectType;
use vali_core::id::HandleId;
use vali_core::sync::IrqSpinLock;
use vali_ipc::gracht::IpcAddress;
use vali_ipc::streambuffer::{StreamBuffer, StreamBufferError, StreamBufferOptions};

use crate::handle::HandleTable;

/// Ring capacity given to every new IPC context's buffer, in bytes.
const CONTEXT_BUFFER_CAPACITY: u32 = 16 * 1024;

struct IpcEndpoint {
    target: HandleId,
    buffer: StreamBuffer,
}

/// Registry of live IPC contexts, keyed by the low 32 bits of the context
/// handle's object id.
pub struct IpcRegistry {
    endpoints: IrqSpinLock<BTreeMap<u32, IpcEndpoint>>,
}

impl IpcRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self { endpoints: IrqSpinLock::new(BTreeMap::new()) }
    }

    /// Resolves `address` to a concrete target handle, retaining it so the
    /// caller's context outlives a transient path lookup.
    pub fn resolve(&self, address: IpcAddress<'_>, handles: &HandleTable) -> Result<HandleId, SysError> {
        let target = match address {
            IpcAddress::ByHandle(h) => h,
            IpcAddress::ByPath(path) => handles.find_by_path(path)?,
        };
        handles.retain(target)?;
        Ok(target)
    }

    /// Creates a new IPC context addressed at `target`, with its own ring
    /// buffer, registered as an [`ObjectType::IpcContext`] handle.
    pub fn create_context(&self, target: HandleId, handles: &HandleTable) -> Result<HandleId, SysError> {
        handles.kind_of(target)?;
        let buffer = StreamBuffer::new(CONTEXT_BUFFER_CAPACITY).map_err(SysError::from)?;
        let handle = handles.create(ObjectType::IpcContext);
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        self.endpoints.lock().insert(key, IpcEndpoint { target, buffer });
        Ok(handle)
    }

    /// Copies `payload` into `ctx`'s ring as one packet tagged with `ctx`
    /// itself as sender.
    ///
    /// This glue has no byte-level window onto the caller's address space
    /// (the same limitation `shm.rs` documents), so `payload` stands in for
    /// the bytes a real trap dispatcher would copy in from the userspace
    /// buffer pointer/length pair the syscall actually receives; the framing,
    /// length accounting, and would-block semantics below are exact.
    pub fn send(&self, ctx: HandleId, payload: &[u8], handles: &HandleTable) -> Result<(), SysError> {
        let key = handles.object_id_of(ctx)?.as_u64() as u32;
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.get_mut(&key).ok_or(SysError::NotFound)?;
        let mut cursor = endpoint
            .buffer
            .write_packet_start(ctx, payload.len() as u32, StreamBufferOptions::NO_BLOCK)
            .map_err(|e| match e {
                StreamBufferError::WouldBlock => SysError::Forked,
                other => SysError::from(other),
            })?;
        cursor.write_packet_data(payload);
        cursor.write_packet_end();
        Ok(())
    }

    /// Drains up to `out.len()` bytes of the next packet from `ctx`'s ring,
    /// returning the number of bytes copied.
    pub fn recv(&self, ctx: HandleId, out: &mut [u8], handles: &HandleTable) -> Result<u64, SysError> {
        let key = handles.object_id_of(ctx)?.as_u64() as u32;
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.get_mut(&key).ok_or(SysError::NotFound)?;
        let mut cursor = endpoint
            .buffer
            .read_packet_start(StreamBufferOptions::NO_BLOCK)
            .map_err(|e| match e {
                StreamBufferError::WouldBlock => SysError::Forked,
                other => SysError::from(other),
            })?;
        let n = cursor.read_packet_data(out);
        cursor.read_packet_end();
        Ok(n as u64)
    }

    /// Releases a context's handle-table entry; the backing buffer drops
    /// once no other reference remains.
    pub fn close(&self, ctx: HandleId, handles: &HandleTable) -> Result<(), SysError> {
        let key = handles.object_id_of(ctx)?.as_u64() as u32;
        handles.destroy(ctx)?;
        self.endpoints.lock().remove(&key);
        Ok(())
    }
}

impl Default for IpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_context_then_send_recv_round_trips() {
        let handles = HandleTable::new();
        let registry = IpcRegistry::new();
        let target = handles.create(ObjectType::IpcContext);
        let ctx = registry.create_context(target, &handles).unwrap();

        registry.send(ctx, b"hello", &handles).unwrap();
        let mut buf = [0u8; 5];
        let n = registry.recv(ctx, &mut buf, &handles).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn recv_with_nothing_queued_forks() {
        let handles = HandleTable::new();
        let registry = IpcRegistry::new();
        let target = handles.create(ObjectType::IpcContext);
        let ctx = registry.create_context(target, &handles).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(registry.recv(ctx, &mut buf, &handles), Err(SysError::Forked));
    }

    #[test]
    fn resolve_by_path_retains_target() {
        let handles = HandleTable::new();
        let registry = IpcRegistry::new();
        let target = handles.create(ObjectType::IpcContext);
        handles.set_path(target, "/svc/demo").unwrap();
        let resolved = registry.resolve(IpcAddress::ByPath("/svc/demo"), &handles).unwrap();
        assert_eq!(resolved, target);
    }

    #[test]
    fn close_removes_the_endpoint() {
        let handles = HandleTable::new();
        let registry = IpcRegistry::new();
        let target = handles.create(ObjectType::IpcContext);
        let ctx = registry.create_context(target, &handles).unwrap();
        registry.close(ctx, &handles).unwrap();
        assert_eq!(registry.send(ctx, b"x", &handles), Err(SysError::NotFound));
    }
}
