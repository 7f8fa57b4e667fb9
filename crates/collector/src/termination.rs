use crate::{Error, wire::TIMEOUT_CODE};
use tracing::error;

/// Exception codes with both top bits set have error severity.
const FATAL_EXCEPTION_MASK: u32 = 0xC000_0000;

/// Why the engine switched the monitored thread's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChangeReason {
    FatalSignal,
    Exception,
    Other,
}

/// Why the monitored process is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// A fatal signal was delivered.
    Signal(i32),
    /// An exception with error severity was raised.
    Exception(i32),
    /// The operator ran out of patience.
    Timeout,
}

impl Reason {
    /// Classify a context change. Non-fatal changes yield `None`.
    pub fn from_context_change(reason: ContextChangeReason, info: i32) -> Option<Self> {
        match reason {
            ContextChangeReason::FatalSignal => Some(Self::Signal(info)),
            ContextChangeReason::Exception if is_fatal_exception(info) => {
                Some(Self::Exception(info))
            }
            ContextChangeReason::Exception | ContextChangeReason::Other => None,
        }
    }

    /// Code carried in the terminal record.
    ///
    /// Engine codes are sign-extended, so an exception such as `0xC0000005`
    /// reaches the consumer as `0xFFFFFFFFC0000005`.
    pub fn code(self) -> u64 {
        match self {
            Self::Signal(code) | Self::Exception(code) => i64::from(code) as u64,
            Self::Timeout => TIMEOUT_CODE,
        }
    }
}

pub fn is_fatal_exception(code: i32) -> bool {
    (code as u32) & FATAL_EXCEPTION_MASK == FATAL_EXCEPTION_MASK
}

/// Requests the collector makes of the instrumentation engine.
pub trait ProcessControl: Send + Sync {
    /// Tear the monitored process down after a timeout.
    fn exit_application(&self, status: i32);

    /// The transport is gone; the process must not keep running.
    ///
    /// Implementations are expected not to return. If they do, the collector
    /// drops every later event.
    fn abort(&self, error: &Error);
}

/// Exits the current process directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitProcess;

impl ProcessControl for ExitProcess {
    fn exit_application(&self, status: i32) {
        std::process::exit(status);
    }

    fn abort(&self, error: &Error) {
        error!(%error, "trace channel failed, terminating");
        std::process::exit(1);
    }
}
