//! CUPTI activity runtime
//!
//! CUPTI calls back into us through plain C function pointers. The buffer
//! callbacks carry no user data, so the registered [`BufferClient`] lives in
//! one process-wide slot that the trampolines read. API callbacks get their
//! hook through the subscription's user data pointer instead.

mod sys;

use cutrace_shared::{
    ActivityKind, ActivityRecord, ApiActivity, KernelActivity, MemcpyActivity, MemsetActivity,
};
use libc::{c_char, c_void, size_t};
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, trace, warn};

use super::{
    ActivityRuntime, ApiCallInfo, ApiHook, BufferClient, CallbackDomain, CallbackSite,
    RecordCursor, Subscription,
};
use crate::buffer::release_raw;
use crate::error::RuntimeError;

/// Buffer client the CUPTI buffer callbacks are routed to
static BUFFER_CLIENT: RwLock<Option<Weak<dyn BufferClient>>> = RwLock::new(None);

fn current_client() -> Option<Arc<dyn BufferClient>> {
    BUFFER_CLIENT
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .and_then(Weak::upgrade)
}

fn result_string(code: sys::CUptiResult) -> String {
    let mut message: *const c_char = ptr::null();
    // SAFETY: CUPTI writes a pointer to a static string on success
    let status = unsafe { sys::cuptiGetResultString(code, &mut message) };
    if status != sys::CUPTI_SUCCESS || message.is_null() {
        return format!("unknown CUPTI error {}", code);
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}

fn check(call: &'static str, code: sys::CUptiResult) -> Result<(), RuntimeError> {
    if code == sys::CUPTI_SUCCESS {
        Ok(())
    } else {
        Err(RuntimeError::Cupti {
            call,
            code,
            message: result_string(code),
        })
    }
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

extern "C" fn buffer_requested(buffer: *mut *mut u8, size: *mut size_t, max_num_records: *mut size_t) {
    let (ptr, capacity) = match current_client() {
        Some(client) => {
            let (ptr, capacity) = client.buffer_requested().into_raw();
            (ptr.as_ptr(), capacity)
        }
        None => {
            warn!("CUPTI requested a buffer with no client registered");
            (ptr::null_mut(), 0)
        }
    };
    trace!("buffer requested: {:p} ({} bytes)", ptr, capacity);

    // SAFETY: CUPTI passes valid out-pointers
    unsafe {
        *buffer = ptr;
        *size = capacity;
        *max_num_records = 0;
    }
}

extern "C" fn buffer_completed(
    _context: sys::CUcontext,
    stream_id: u32,
    buffer: *mut u8,
    size: size_t,
    valid_size: size_t,
) {
    trace!("buffer completed: stream {}, size {}, valid {}", stream_id, size, valid_size);
    let Some(ptr) = NonNull::new(buffer) else {
        return;
    };

    match current_client() {
        // SAFETY: every buffer CUPTI completes came from `buffer_requested`
        Some(client) => {
            let buffer = unsafe { client.reclaim(ptr, size) };
            client.buffer_completed(buffer, valid_size);
        }
        None => {
            warn!("CUPTI completed a buffer with no client registered, dropping it");
            unsafe { release_raw(ptr, size) };
        }
    }
}

extern "C" fn api_callback(userdata: *mut c_void, domain: u32, cbid: u32, cbdata: *const c_void) {
    if userdata.is_null() {
        return;
    }
    // SAFETY: userdata is the boxed hook installed by `subscribe`, freed only
    // after `cuptiUnsubscribe` returns
    let hook = unsafe { &*(userdata as *const Arc<dyn ApiHook>) };
    let info = unsafe { call_info(domain, cbdata) };
    hook.on_api_call(CallbackDomain::from_raw(domain), cbid, &info);
}

unsafe fn call_info(domain: u32, cbdata: *const c_void) -> ApiCallInfo {
    if cbdata.is_null() {
        return ApiCallInfo::default();
    }

    match domain {
        sys::CUPTI_CB_DOMAIN_DRIVER_API | sys::CUPTI_CB_DOMAIN_RUNTIME_API => {
            let data = &*(cbdata as *const sys::CUpti_CallbackData);
            ApiCallInfo {
                site: match data.callbackSite {
                    sys::CUPTI_API_ENTER => Some(CallbackSite::Enter),
                    sys::CUPTI_API_EXIT => Some(CallbackSite::Exit),
                    _ => None,
                },
                function_name: c_string(data.functionName),
                symbol_name: c_string(data.symbolName),
                correlation_id: Some(data.correlationId),
            }
        }
        sys::CUPTI_CB_DOMAIN_NVTX => {
            let data = &*(cbdata as *const sys::CUpti_NvtxData);
            ApiCallInfo {
                function_name: c_string(data.functionName),
                ..ApiCallInfo::default()
            }
        }
        _ => ApiCallInfo::default(),
    }
}

unsafe fn api_activity(record: *const sys::CUpti_Activity) -> ApiActivity {
    let api = &*(record as *const sys::CUpti_ActivityAPI);
    ApiActivity {
        cbid: api.cbid,
        start: api.start,
        end: api.end,
        process_id: api.processId,
        thread_id: api.threadId,
        correlation_id: api.correlationId,
    }
}

unsafe fn kernel_activity(record: *const sys::CUpti_Activity) -> KernelActivity {
    let kernel = &*(record as *const sys::CUpti_ActivityKernel4);
    KernelActivity {
        name: c_string(kernel.name).unwrap_or_default(),
        start: kernel.start,
        end: kernel.end,
        device_id: kernel.deviceId,
        context_id: kernel.contextId,
        stream_id: kernel.streamId,
        correlation_id: kernel.correlationId,
        grid: (kernel.gridX, kernel.gridY, kernel.gridZ),
        block: (kernel.blockX, kernel.blockY, kernel.blockZ),
        static_shared_memory: kernel.staticSharedMemory,
        dynamic_shared_memory: kernel.dynamicSharedMemory,
    }
}

/// Convert a raw record after checking its kind tag
///
/// # Safety
/// `record` must point at a complete CUPTI activity record.
unsafe fn convert(record: *const sys::CUpti_Activity) -> ActivityRecord {
    let kind = (*record).kind;
    match kind {
        sys::CUPTI_ACTIVITY_KIND_MEMCPY => {
            let m = &*(record as *const sys::CUpti_ActivityMemcpy);
            ActivityRecord::Memcpy(MemcpyActivity {
                copy_kind: m.copyKind,
                start: m.start,
                end: m.end,
                device_id: m.deviceId,
                context_id: m.contextId,
                stream_id: m.streamId,
                correlation_id: m.correlationId,
                runtime_correlation_id: m.runtimeCorrelationId,
                bytes: m.bytes,
            })
        }
        sys::CUPTI_ACTIVITY_KIND_MEMSET => {
            let m = &*(record as *const sys::CUpti_ActivityMemset);
            ActivityRecord::Memset(MemsetActivity {
                memory_kind: m.memoryKind,
                start: m.start,
                end: m.end,
                device_id: m.deviceId,
                context_id: m.contextId,
                stream_id: m.streamId,
                correlation_id: m.correlationId,
                bytes: m.bytes,
            })
        }
        sys::CUPTI_ACTIVITY_KIND_DRIVER => ActivityRecord::Driver(api_activity(record)),
        sys::CUPTI_ACTIVITY_KIND_RUNTIME => ActivityRecord::Runtime(api_activity(record)),
        sys::CUPTI_ACTIVITY_KIND_KERNEL => ActivityRecord::Kernel(kernel_activity(record)),
        sys::CUPTI_ACTIVITY_KIND_CONCURRENT_KERNEL => {
            ActivityRecord::ConcurrentKernel(kernel_activity(record))
        }
        other => ActivityRecord::Unknown { kind: other },
    }
}

struct ActiveSubscription {
    handle: sys::CUpti_SubscriberHandle,
    hook: *mut Arc<dyn ApiHook>,
}

// The handle is an opaque token and the hook pointer is owned by us
unsafe impl Send for ActiveSubscription {}

impl ActiveSubscription {
    fn id(&self) -> Subscription {
        Subscription::new(self.handle as usize as u64)
    }
}

/// Profiling runtime backed by libcupti
///
/// CUPTI allows one subscriber per process.
#[derive(Default)]
pub struct CuptiRuntime {
    subscription: Mutex<Option<ActiveSubscription>>,
}

impl CuptiRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn release_subscription(active: ActiveSubscription) -> Result<(), RuntimeError> {
        // SAFETY: handle came from a successful cuptiSubscribe
        let result = check("cuptiUnsubscribe", unsafe { sys::cuptiUnsubscribe(active.handle) });
        // SAFETY: no more callbacks reference the hook once unsubscribed
        drop(unsafe { Box::from_raw(active.hook) });
        result
    }
}

impl ActivityRuntime for CuptiRuntime {
    fn enable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError> {
        debug!("enabling {} activity", kind);
        check("cuptiActivityEnable", unsafe {
            sys::cuptiActivityEnable(kind.as_raw())
        })
    }

    fn disable_kind(&self, kind: ActivityKind) -> Result<(), RuntimeError> {
        debug!("disabling {} activity", kind);
        check("cuptiActivityDisable", unsafe {
            sys::cuptiActivityDisable(kind.as_raw())
        })
    }

    fn subscribe(&self, hook: Arc<dyn ApiHook>) -> Result<Subscription, RuntimeError> {
        let mut slot = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(RuntimeError::Rejected {
                call: "cuptiSubscribe",
                reason: "multiple subscribers not supported".into(),
            });
        }

        let hook = Box::into_raw(Box::new(hook));
        let mut handle: sys::CUpti_SubscriberHandle = ptr::null_mut();
        let status = unsafe { sys::cuptiSubscribe(&mut handle, api_callback, hook as *mut c_void) };
        if let Err(e) = check("cuptiSubscribe", status) {
            drop(unsafe { Box::from_raw(hook) });
            return Err(e);
        }

        let active = ActiveSubscription { handle, hook };
        if let Err(e) = check("cuptiEnableAllDomains", unsafe {
            sys::cuptiEnableAllDomains(1, handle)
        }) {
            if let Err(cleanup) = Self::release_subscription(active) {
                warn!("failed to release subscription: {}", cleanup);
            }
            return Err(e);
        }

        let id = active.id();
        *slot = Some(active);
        Ok(id)
    }

    fn unsubscribe(&self, subscription: Subscription) -> Result<(), RuntimeError> {
        let mut slot = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(active) if active.id() == subscription => Self::release_subscription(active),
            other => {
                *slot = other;
                Err(RuntimeError::Rejected {
                    call: "cuptiUnsubscribe",
                    reason: format!("unknown subscription {}", subscription.raw()),
                })
            }
        }
    }

    fn register_buffer_client(&self, client: Arc<dyn BufferClient>) -> Result<(), RuntimeError> {
        *BUFFER_CLIENT.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(&client));
        check("cuptiActivityRegisterCallbacks", unsafe {
            sys::cuptiActivityRegisterCallbacks(buffer_requested, buffer_completed)
        })
    }

    fn flush_all(&self) -> Result<(), RuntimeError> {
        debug!("forcing flush of all activity buffers");
        check("cuptiActivityFlushAll", unsafe {
            sys::cuptiActivityFlushAll(sys::CUPTI_ACTIVITY_FLAG_FLUSH_FORCED)
        })
    }

    fn next_record(
        &self,
        buffer: &[u8],
        cursor: &mut RecordCursor,
    ) -> Result<Option<ActivityRecord>, RuntimeError> {
        let base = buffer.as_ptr() as *mut u8;
        let mut record: *mut sys::CUpti_Activity = match cursor.position() {
            None => ptr::null_mut(),
            Some(offset) => base.wrapping_add(offset) as *mut sys::CUpti_Activity,
        };

        // SAFETY: CUPTI only reads the buffer and moves `record` within it
        let status = unsafe { sys::cuptiActivityGetNextRecord(base, buffer.len(), &mut record) };
        match status {
            sys::CUPTI_SUCCESS => {}
            sys::CUPTI_ERROR_MAX_LIMIT_REACHED => return Ok(None),
            code => check("cuptiActivityGetNextRecord", code)?,
        }
        if record.is_null() {
            return Ok(None);
        }

        let offset = (record as usize)
            .checked_sub(base as usize)
            .filter(|offset| *offset < buffer.len())
            .ok_or_else(|| RuntimeError::CorruptRecord {
                offset: buffer.len(),
                reason: "record pointer outside the buffer".into(),
            })?;
        cursor.advance_to(offset);

        // SAFETY: CUPTI returned a record inside the valid region
        Ok(Some(unsafe { convert(record) }))
    }
}

impl Drop for CuptiRuntime {
    fn drop(&mut self) {
        let active = self
            .subscription
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(active) = active {
            if let Err(e) = Self::release_subscription(active) {
                warn!("failed to unsubscribe on drop: {}", e);
            }
        }
        *BUFFER_CLIENT.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
