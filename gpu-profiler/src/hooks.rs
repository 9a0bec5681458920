//! API callback hooks
//!
//! A tracing session subscribes one [`ApiHook`] to every callback domain.
//! [`NoopApiHook`] is the default; [`LoggingApiHook`] reports each call as a
//! `tracing` event.

use tracing::debug;

use crate::runtime::{ApiCallInfo, ApiHook, CallbackDomain, CallbackSite};

/// Hook that ignores every call
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopApiHook;

impl ApiHook for NoopApiHook {
    fn on_api_call(&self, _domain: CallbackDomain, _callback_id: u32, _info: &ApiCallInfo) {}
}

/// Hook that emits one debug event per intercepted call
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingApiHook;

fn site(info: &ApiCallInfo) -> &'static str {
    match info.site {
        Some(CallbackSite::Enter) => "enter",
        Some(CallbackSite::Exit) => "exit",
        None => "-",
    }
}

impl ApiHook for LoggingApiHook {
    fn on_api_call(&self, domain: CallbackDomain, callback_id: u32, info: &ApiCallInfo) {
        let function = info.function_name.as_deref().unwrap_or("?");
        let correlation = info.correlation_id.unwrap_or(0);

        match domain {
            CallbackDomain::RuntimeApi => debug!(
                "runtime api {} {} (cbid {}, correlation {})",
                site(info),
                function,
                callback_id,
                correlation
            ),
            CallbackDomain::DriverApi => debug!(
                "driver api {} {} (cbid {}, correlation {})",
                site(info),
                function,
                callback_id,
                correlation
            ),
            CallbackDomain::Resource => debug!("resource callback {}", callback_id),
            CallbackDomain::Synchronize => debug!("synchronize callback {}", callback_id),
            CallbackDomain::Nvtx => debug!(
                "nvtx {} (cbid {})",
                info.symbol_name.as_deref().unwrap_or(function),
                callback_id
            ),
            CallbackDomain::Other(raw) => {
                debug!("callback {} in unknown domain {}", callback_id, raw)
            }
        }
    }
}
