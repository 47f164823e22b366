//! The fixed result-code enum every control-surface entry point returns:
//! a C-linkage crate cannot propagate a `thiserror` enum across the FFI
//! boundary, so every internal error collapses to one of these five
//! discriminants.

/// `#[repr(i32)]` so the values are stable across the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResultCode {
    Success = 0,
    Failure = 1,
    ReceiverUninitialised = 2,
    ConsumerAlreadyInitialised = 3,
    ConsumerNotInitialised = 4,
}

impl From<spead_capture::CaptureError> for ControlResultCode {
    fn from(err: spead_capture::CaptureError) -> Self {
        tracing::error!("capture error: {err}");
        match err {
            spead_capture::CaptureError::ReceiverUninitialised => {
                ControlResultCode::ReceiverUninitialised
            }
            _ => ControlResultCode::Failure,
        }
    }
}

impl From<spead_capture::ConsumerError> for ControlResultCode {
    fn from(err: spead_capture::ConsumerError) -> Self {
        tracing::warn!("consumer error: {err}");
        match err {
            spead_capture::ConsumerError::AlreadyInitialised(_)
            | spead_capture::ConsumerError::AlreadyRunning(_) => {
                ControlResultCode::ConsumerAlreadyInitialised
            }
            spead_capture::ConsumerError::NotInitialised(_)
            | spead_capture::ConsumerError::NotRegistered(_) => {
                ControlResultCode::ConsumerNotInitialised
            }
            _ => ControlResultCode::Failure,
        }
    }
}
