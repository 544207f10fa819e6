//! C ABI adapter for native engines.
//!
//! A native engine exports a [`NativeEngineVtable`]; [`FfiBridge`] turns it
//! into a [`NativeBridge`]. Diagnostic messages and captured packets come back
//! through C callbacks whose `user_data` points at objects this module keeps
//! alive until the engine is told to stop using them.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr::NonNull;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::logging::DiagnosticLogger;
use crate::pcap::PacketSink;
use crate::tunnel::{NativeBridge, TunnelHandle};

/// Log callback handed to the engine. `message` is a NUL-terminated string.
pub type LogCallback =
    unsafe extern "C" fn(user_data: *mut c_void, level: c_int, message: *const c_char);

/// Packet callback handed to the engine. Returns 0 on success.
pub type PacketCallback =
    unsafe extern "C" fn(user_data: *mut c_void, data: *const u8, len: usize) -> c_int;

/// Entry points exported by a native engine.
///
/// The engine may invoke callbacks from any thread. It must stop using a
/// log `user_data` once `destroy` returns, and a packet `user_data` once
/// `stop_pcap`, `destroy` or the next `restart_pcap` for that handle returns.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeEngineVtable {
    /// Returns 0 when no context could be created.
    pub create: unsafe extern "C" fn(
        kind: *const c_char,
        log: LogCallback,
        user_data: *mut c_void,
    ) -> u64,
    pub destroy: unsafe extern "C" fn(handle: u64),
    pub set_masquerade_ip4_mode: unsafe extern "C" fn(handle: u64, on: bool),
    /// `address` is in host byte order.
    pub set_masquerade_ip4: unsafe extern "C" fn(handle: u64, address: u32),
    pub set_masquerade_ip6_mode: unsafe extern "C" fn(handle: u64, on: bool),
    /// `address` points at exactly 16 bytes, valid only for the call.
    pub set_masquerade_ip6: unsafe extern "C" fn(handle: u64, address: *const u8),
    pub restart_pcap:
        unsafe extern "C" fn(handle: u64, write: PacketCallback, user_data: *mut c_void),
    pub stop_pcap: unsafe extern "C" fn(handle: u64),
}

unsafe extern "C" fn log_trampoline(
    user_data: *mut c_void,
    level: c_int,
    message: *const c_char,
) {
    let Some(logger) = NonNull::new(user_data.cast::<DiagnosticLogger>()) else {
        return;
    };
    if message.is_null() {
        return;
    }
    // SAFETY: user_data is the logger pinned in FfiBridge::loggers until the
    // context is destroyed, and the engine passes a NUL-terminated message.
    let (logger, message) = unsafe { (logger.as_ref(), CStr::from_ptr(message)) };
    logger.log_native(level, &message.to_string_lossy());
}

unsafe extern "C" fn packet_trampoline(
    user_data: *mut c_void,
    data: *const u8,
    len: usize,
) -> c_int {
    let Some(sink) = NonNull::new(user_data.cast::<Arc<dyn PacketSink>>()) else {
        return -1;
    };
    let packet: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        return -1;
    } else {
        // SAFETY: the engine guarantees `data` points at `len` readable bytes.
        unsafe { slice::from_raw_parts(data, len) }
    };
    // SAFETY: user_data is the boxed sink pinned in FfiBridge::sinks.
    let sink = unsafe { sink.as_ref() };
    match sink.write_packet(packet) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// [`NativeBridge`] over a C function table.
pub struct FfiBridge {
    vtable: NativeEngineVtable,
    loggers: Mutex<HashMap<u64, Arc<DiagnosticLogger>>>,
    sinks: Mutex<HashMap<u64, Box<Arc<dyn PacketSink>>>>,
}

impl FfiBridge {
    /// Wrap an engine's function table.
    ///
    /// # Safety
    ///
    /// Every function in `vtable` must be safe to call with the arguments
    /// described on [`NativeEngineVtable`] for as long as the bridge lives,
    /// and must honor the callback lifetimes documented there.
    pub unsafe fn new(vtable: NativeEngineVtable) -> Self {
        FfiBridge {
            vtable,
            loggers: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_loggers(&self) -> MutexGuard<'_, HashMap<u64, Arc<DiagnosticLogger>>> {
        self.loggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sinks(&self) -> MutexGuard<'_, HashMap<u64, Box<Arc<dyn PacketSink>>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeBridge for FfiBridge {
    fn create_context(&self, kind: &str, logger: Arc<DiagnosticLogger>) -> Option<TunnelHandle> {
        let Ok(kind_c) = CString::new(kind) else {
            warn!(kind, "Tunnel kind contains a NUL byte");
            return None;
        };
        let user_data = Arc::as_ptr(&logger).cast_mut().cast::<c_void>();
        // SAFETY: contract of FfiBridge::new; `logger` outlives the call.
        let raw = unsafe { (self.vtable.create)(kind_c.as_ptr(), log_trampoline, user_data) };
        if raw == 0 {
            return None;
        }
        if self.lock_loggers().insert(raw, logger).is_some() {
            warn!(handle = raw, "Engine reused a live handle");
        }
        Some(TunnelHandle::from_raw(raw))
    }

    fn destroy_context(&self, handle: TunnelHandle) {
        let raw = handle.as_raw();
        // SAFETY: contract of FfiBridge::new.
        unsafe { (self.vtable.destroy)(raw) };
        // the engine no longer calls back, so the pinned objects can go
        let sink = self.lock_sinks().remove(&raw);
        let logger = self.lock_loggers().remove(&raw);
        debug!(
            handle = %handle,
            had_sink = sink.is_some(),
            had_logger = logger.is_some(),
            "Native context destroyed"
        );
    }

    fn set_masquerade_ip4_mode(&self, handle: TunnelHandle, on: bool) {
        // SAFETY: contract of FfiBridge::new.
        unsafe { (self.vtable.set_masquerade_ip4_mode)(handle.as_raw(), on) }
    }

    fn set_masquerade_ip4(&self, handle: TunnelHandle, address: u32) {
        // SAFETY: contract of FfiBridge::new.
        unsafe { (self.vtable.set_masquerade_ip4)(handle.as_raw(), address) }
    }

    fn set_masquerade_ip6_mode(&self, handle: TunnelHandle, on: bool) {
        // SAFETY: contract of FfiBridge::new.
        unsafe { (self.vtable.set_masquerade_ip6_mode)(handle.as_raw(), on) }
    }

    fn set_masquerade_ip6(&self, handle: TunnelHandle, address: &[u8; 16]) {
        // SAFETY: contract of FfiBridge::new; `address` holds 16 bytes.
        unsafe { (self.vtable.set_masquerade_ip6)(handle.as_raw(), address.as_ptr()) }
    }

    fn debug_restart_pcap(&self, handle: TunnelHandle, sink: Arc<dyn PacketSink>) {
        let raw = handle.as_raw();
        let boxed = Box::new(sink);
        let user_data = (&*boxed as *const Arc<dyn PacketSink>)
            .cast_mut()
            .cast::<c_void>();
        let previous = self.lock_sinks().insert(raw, boxed);
        // SAFETY: contract of FfiBridge::new; the box stays in `sinks` until
        // the capture is stopped or replaced.
        unsafe { (self.vtable.restart_pcap)(raw, packet_trampoline, user_data) };
        drop(previous);
    }

    fn debug_stop_pcap(&self, handle: TunnelHandle) {
        let raw = handle.as_raw();
        // SAFETY: contract of FfiBridge::new.
        unsafe { (self.vtable.stop_pcap)(raw) };
        self.lock_sinks().remove(&raw);
    }
}
