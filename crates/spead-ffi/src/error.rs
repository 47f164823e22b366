use thiserror::Error;

/// Internal errors specific to the control surface; always logged then
/// collapsed to a [`crate::result_code::ControlResultCode`] before
/// crossing the C boundary.
#[derive(Debug, Error)]
pub enum FfiError {
    #[error("failed to load consumer module {0:?}: {1}")]
    ModuleLoad(String, #[source] libloading::Error),

    #[error("failed to resolve factory symbol {0:?}: {1}")]
    SymbolResolve(String, #[source] libloading::Error),

    #[error("factory symbol {0:?} returned a null instance")]
    FactoryReturnedNull(String),

    #[error("invalid UTF-8 in C string argument")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("null pointer passed for required argument {0}")]
    NullArgument(&'static str),

    #[error("malformed consumer config JSON: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("receiver is not started")]
    ReceiverUninitialised,

    #[error("no module loaded for consumer {0:?}")]
    ModuleNotLoaded(String),
}

impl From<FfiError> for crate::result_code::ControlResultCode {
    fn from(err: FfiError) -> Self {
        tracing::error!("control surface error: {err}");
        match err {
            FfiError::ReceiverUninitialised => {
                crate::result_code::ControlResultCode::ReceiverUninitialised
            }
            _ => crate::result_code::ControlResultCode::Failure,
        }
    }
}
