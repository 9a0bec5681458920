//! Fail-fast policy for unrecoverable runtime failures
//!
//! Library calls return typed errors. Code that sits on the runtime's
//! callback path has nobody to return them to, and a tracing session left
//! half-configured is worse than none, so those paths end the process here.

use tracing::error;

/// Exit status used for fatal tracer failures
pub const FATAL_EXIT_CODE: i32 = -1;

/// Log `error` and terminate the process
pub fn terminate(context: &str, error: &dyn std::error::Error) -> ! {
    error!("{}: {}", context, error);
    eprintln!("error: {}: {}", context, error);
    std::process::exit(FATAL_EXIT_CODE)
}

/// Terminate the process instead of propagating an error
pub trait OrExit<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E: std::error::Error> OrExit<T> for Result<T, E> {
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => terminate(context, &e),
        }
    }
}
