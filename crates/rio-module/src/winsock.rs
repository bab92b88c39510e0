//! `WinsockRio` — the system registered-I/O table.
//!
//! Discovery, once per process through `resolver()`:
//!
//! 1. `WSAStartup(2.2)`
//! 2. a throwaway TCP socket created with the registered-I/O flags
//! 3. `WSAIoctl(SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER, WSAID_MULTIPLE_RIO)`
//! 4. size check of the returned table, then typed binding of each slot
//!
//! Any failure means the platform has no usable RIO and is cached by the
//! resolver.

use std::ffi::c_void;
use std::sync::Arc;

use windows_sys::Win32::Networking::WinSock::{
    closesocket, WSAGetLastError, WSAIoctl, WSASocketW, WSAStartup, INVALID_SOCKET, WSADATA,
};

use rio_core::entry::{
    BufferId, NotificationCompletion, QueueLimits, RawCq, RawRq, RawSocket, RequestContext,
    RioBuf, RioResult, SocketContext,
};
use rio_core::error::{status, Result, RioError};
use rio_core::extension::RioExtension;
use rio_core::waitable::RioSocket;
use rio_core::{rio_debug, rio_error};

use crate::resolver::ExtensionResolver;
use crate::winsock_sys::{
    BoundTable, RawExtensionTable, AF_INET, EXTENSION_TABLE_SIZE, IPPROTO_TCP,
    SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER, SOCK_STREAM, WSAID_MULTIPLE_RIO,
    WSA_FLAG_OVERLAPPED, WSA_FLAG_REGISTERED_IO,
};

static RESOLVER: ExtensionResolver<WinsockRio> = ExtensionResolver::new(WinsockRio::load);

/// The process-wide resolver for the system table.
pub fn resolver() -> &'static ExtensionResolver<WinsockRio> {
    &RESOLVER
}

fn wsa_last_error() -> i32 {
    unsafe { WSAGetLastError() as i32 }
}

fn open_registered(af: i32, ty: i32, protocol: i32) -> std::result::Result<usize, i32> {
    let s = unsafe {
        WSASocketW(
            af as _,
            ty as _,
            protocol as _,
            std::ptr::null(),
            0,
            WSA_FLAG_OVERLAPPED | WSA_FLAG_REGISTERED_IO,
        )
    };
    if s == INVALID_SOCKET {
        return Err(wsa_last_error());
    }
    Ok(s as usize)
}

struct CloseOnDrop(usize);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        unsafe {
            closesocket(self.0 as _);
        }
    }
}

pub struct WinsockRio {
    table: BoundTable,
}

impl WinsockRio {
    /// Run discovery. Use `resolver()` instead of calling this directly.
    pub fn load() -> Result<Self> {
        let mut data: WSADATA = unsafe { std::mem::zeroed() };
        let rc = unsafe { WSAStartup(0x0202, &mut data) };
        if rc != 0 {
            return Err(RioError::Unsupported(rc));
        }

        let probe = open_registered(AF_INET, SOCK_STREAM, IPPROTO_TCP)
            .map_err(RioError::Unsupported)?;
        let _probe = CloseOnDrop(probe);

        let mut raw = RawExtensionTable::zeroed();
        let mut returned: u32 = 0;
        let rc = unsafe {
            WSAIoctl(
                probe as _,
                SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER,
                WSAID_MULTIPLE_RIO.as_ptr() as *const c_void,
                WSAID_MULTIPLE_RIO.len() as u32,
                &mut raw as *mut RawExtensionTable as *mut c_void,
                EXTENSION_TABLE_SIZE as u32,
                &mut returned,
                std::ptr::null_mut(),
                None,
            )
        };
        if rc != 0 {
            return Err(RioError::Unsupported(wsa_last_error()));
        }
        raw.validate(returned as usize)?;

        let table = raw.bind().map_err(|slot| {
            rio_error!("extension table slot {} is null", slot);
            RioError::Unsupported(status::WSAEOPNOTSUPP)
        })?;
        rio_debug!("RIO table bound ({} bytes)", returned);
        Ok(Self { table })
    }

    /// Bound table from the process-wide resolver.
    pub fn system() -> Result<Arc<Self>> {
        resolver().ensure_initialized()
    }
}

impl RioExtension for WinsockRio {
    unsafe fn register_buffer(&self, ptr: *mut u8, len: u32) -> BufferId {
        (self.table.register_buffer)(ptr, len)
    }

    fn deregister_buffer(&self, id: BufferId) {
        unsafe { (self.table.deregister_buffer)(id) }
    }

    fn create_completion_queue(
        &self,
        capacity: u32,
        notification: Option<&NotificationCompletion>,
    ) -> RawCq {
        let n = notification.map_or(std::ptr::null(), |n| n as *const NotificationCompletion);
        unsafe { (self.table.create_completion_queue)(capacity, n) }
    }

    fn close_completion_queue(&self, cq: RawCq) {
        unsafe { (self.table.close_completion_queue)(cq) }
    }

    fn notify(&self, cq: RawCq) -> i32 {
        unsafe { (self.table.notify)(cq) }
    }

    fn create_request_queue(
        &self,
        socket: RawSocket,
        limits: &QueueLimits,
        receive_cq: RawCq,
        send_cq: RawCq,
        context: SocketContext,
    ) -> RawRq {
        unsafe {
            (self.table.create_request_queue)(
                socket.0,
                limits.max_outstanding_receive,
                limits.max_receive_data_buffers,
                limits.max_outstanding_send,
                limits.max_send_data_buffers,
                receive_cq,
                send_cq,
                context.0 as usize as *mut c_void,
            )
        }
    }

    fn dequeue_completion(&self, cq: RawCq, results: &mut [RioResult]) -> u32 {
        let count = results.len().min(u32::MAX as usize - 1) as u32;
        unsafe { (self.table.dequeue_completion)(cq, results.as_mut_ptr(), count) }
    }

    unsafe fn send(&self, rq: RawRq, bufs: &[RioBuf], flags: u32, ctx: RequestContext) -> bool {
        let ptr = if bufs.is_empty() { std::ptr::null() } else { bufs.as_ptr() };
        (self.table.send)(rq, ptr, bufs.len() as u32, flags, ctx.0 as usize as *mut c_void) != 0
    }

    unsafe fn receive(
        &self,
        rq: RawRq,
        bufs: &[RioBuf],
        flags: u32,
        ctx: RequestContext,
    ) -> bool {
        let ptr = if bufs.is_empty() { std::ptr::null() } else { bufs.as_ptr() };
        (self.table.receive)(rq, ptr, bufs.len() as u32, flags, ctx.0 as usize as *mut c_void) != 0
    }

    fn last_error(&self) -> i32 {
        wsa_last_error()
    }
}

/// A socket created with the overlapped and registered-I/O flags.
/// Closed on drop, which also destroys its request queue.
pub struct RegisteredSocket {
    raw: usize,
    owned: bool,
}

impl RegisteredSocket {
    /// Create a socket eligible for a request queue. Runs discovery first,
    /// so Winsock is started and RIO is known to be present.
    pub fn new(af: i32, ty: i32, protocol: i32) -> Result<Self> {
        resolver().ensure_initialized()?;
        let raw = open_registered(af, ty, protocol).map_err(RioError::Os)?;
        rio_debug!("registered socket {:#x} af {} type {}", raw, af, ty);
        Ok(Self { raw, owned: true })
    }

    pub fn tcp() -> Result<Self> {
        Self::new(AF_INET, SOCK_STREAM, IPPROTO_TCP)
    }

    /// Wrap a socket created elsewhere with `WSA_FLAG_REGISTERED_IO`.
    /// It is NOT closed on drop.
    ///
    /// # Safety
    /// `raw` must be a valid socket that outlives this value.
    pub unsafe fn from_raw(raw: RawSocket) -> Self {
        Self {
            raw: raw.0,
            owned: false,
        }
    }
}

impl RioSocket for RegisteredSocket {
    fn raw_socket(&self) -> RawSocket {
        RawSocket(self.raw)
    }
}

impl Drop for RegisteredSocket {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                closesocket(self.raw as _);
            }
        }
    }
}
