//! Hand-written CUPTI bindings
//!
//! Only the calls and record layouts the tracer uses. Record structs are
//! prefixes of the CUPTI definitions: the runtime always hands out at least
//! this many bytes for a record of the matching kind.

#![allow(non_camel_case_types, non_snake_case)]
// Record structs spell out fields the tracer never reads to keep the C layout
#![allow(dead_code)]

use libc::{c_char, c_void, size_t};

pub type CUptiResult = u32;
pub type CUpti_ActivityKind = u32;
pub type CUpti_CallbackDomain = u32;
pub type CUpti_CallbackId = u32;
pub type CUpti_SubscriberHandle = *mut c_void;
pub type CUcontext = *mut c_void;

pub const CUPTI_SUCCESS: CUptiResult = 0;
pub const CUPTI_ERROR_MAX_LIMIT_REACHED: CUptiResult = 12;

pub const CUPTI_ACTIVITY_KIND_MEMCPY: CUpti_ActivityKind = 1;
pub const CUPTI_ACTIVITY_KIND_MEMSET: CUpti_ActivityKind = 2;
pub const CUPTI_ACTIVITY_KIND_KERNEL: CUpti_ActivityKind = 3;
pub const CUPTI_ACTIVITY_KIND_DRIVER: CUpti_ActivityKind = 4;
pub const CUPTI_ACTIVITY_KIND_RUNTIME: CUpti_ActivityKind = 5;
pub const CUPTI_ACTIVITY_KIND_CONCURRENT_KERNEL: CUpti_ActivityKind = 10;

pub const CUPTI_ACTIVITY_FLAG_FLUSH_FORCED: u32 = 1;

pub const CUPTI_API_ENTER: u32 = 0;
pub const CUPTI_API_EXIT: u32 = 1;

pub const CUPTI_CB_DOMAIN_DRIVER_API: CUpti_CallbackDomain = 1;
pub const CUPTI_CB_DOMAIN_RUNTIME_API: CUpti_CallbackDomain = 2;
pub const CUPTI_CB_DOMAIN_NVTX: CUpti_CallbackDomain = 5;

pub type CUpti_BuffersCallbackRequestFunc =
    extern "C" fn(buffer: *mut *mut u8, size: *mut size_t, max_num_records: *mut size_t);

pub type CUpti_BuffersCallbackCompleteFunc = extern "C" fn(
    context: CUcontext,
    stream_id: u32,
    buffer: *mut u8,
    size: size_t,
    valid_size: size_t,
);

pub type CUpti_CallbackFunc = extern "C" fn(
    userdata: *mut c_void,
    domain: CUpti_CallbackDomain,
    cbid: CUpti_CallbackId,
    cbdata: *const c_void,
);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_Activity {
    pub kind: CUpti_ActivityKind,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_ActivityAPI {
    pub kind: CUpti_ActivityKind,
    pub cbid: CUpti_CallbackId,
    pub start: u64,
    pub end: u64,
    pub processId: u32,
    pub threadId: u32,
    pub correlationId: u32,
    pub returnValue: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_ActivityMemcpy {
    pub kind: CUpti_ActivityKind,
    pub copyKind: u8,
    pub srcKind: u8,
    pub dstKind: u8,
    pub flags: u8,
    pub bytes: u64,
    pub start: u64,
    pub end: u64,
    pub deviceId: u32,
    pub contextId: u32,
    pub streamId: u32,
    pub correlationId: u32,
    pub runtimeCorrelationId: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_ActivityMemset {
    pub kind: CUpti_ActivityKind,
    pub value: u32,
    pub bytes: u64,
    pub start: u64,
    pub end: u64,
    pub deviceId: u32,
    pub contextId: u32,
    pub streamId: u32,
    pub correlationId: u32,
    pub flags: u16,
    pub memoryKind: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_ActivityKernel4 {
    pub kind: CUpti_ActivityKind,
    pub cacheConfig: u8,
    pub sharedMemoryConfig: u8,
    pub registersPerThread: u16,
    pub partitionedGlobalCacheRequested: u32,
    pub partitionedGlobalCacheExecuted: u32,
    pub start: u64,
    pub end: u64,
    pub completed: u64,
    pub deviceId: u32,
    pub contextId: u32,
    pub streamId: u32,
    pub gridX: i32,
    pub gridY: i32,
    pub gridZ: i32,
    pub blockX: i32,
    pub blockY: i32,
    pub blockZ: i32,
    pub staticSharedMemory: i32,
    pub dynamicSharedMemory: i32,
    pub localMemoryPerThread: u32,
    pub localMemoryTotal: u32,
    pub correlationId: u32,
    pub gridId: i64,
    pub name: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_CallbackData {
    pub callbackSite: u32,
    pub functionName: *const c_char,
    pub functionParams: *const c_void,
    pub functionReturnValue: *mut c_void,
    pub symbolName: *const c_char,
    pub context: CUcontext,
    pub contextUid: u32,
    pub correlationData: *mut u64,
    pub correlationId: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUpti_NvtxData {
    pub functionName: *const c_char,
    pub functionParams: *const c_void,
    pub functionReturnValue: *const c_void,
}

// Linked by the build script when the `cuda` feature is on
extern "C" {
    pub fn cuptiActivityEnable(kind: CUpti_ActivityKind) -> CUptiResult;

    pub fn cuptiActivityDisable(kind: CUpti_ActivityKind) -> CUptiResult;

    pub fn cuptiActivityRegisterCallbacks(
        func_buffer_requested: CUpti_BuffersCallbackRequestFunc,
        func_buffer_completed: CUpti_BuffersCallbackCompleteFunc,
    ) -> CUptiResult;

    pub fn cuptiActivityGetNextRecord(
        buffer: *mut u8,
        valid_buffer_size_bytes: size_t,
        record: *mut *mut CUpti_Activity,
    ) -> CUptiResult;

    pub fn cuptiActivityFlushAll(flag: u32) -> CUptiResult;

    pub fn cuptiSubscribe(
        subscriber: *mut CUpti_SubscriberHandle,
        callback: CUpti_CallbackFunc,
        userdata: *mut c_void,
    ) -> CUptiResult;

    pub fn cuptiUnsubscribe(subscriber: CUpti_SubscriberHandle) -> CUptiResult;

    pub fn cuptiEnableAllDomains(enable: u32, subscriber: CUpti_SubscriberHandle) -> CUptiResult;

    pub fn cuptiGetResultString(result: CUptiResult, str: *mut *const c_char) -> CUptiResult;
}
