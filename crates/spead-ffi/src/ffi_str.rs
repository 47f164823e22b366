//! Safe conversion of incoming C string arguments, expected to be plain
//! ASCII; every entry point in [`crate`] goes through this instead of
//! calling `CStr::from_ptr` inline.

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::error::FfiError;

/// # Safety
/// `ptr` must be either null or a valid, NUL-terminated C string whose
/// backing memory outlives this call.
pub unsafe fn borrow_str<'a>(ptr: *const c_char, arg_name: &'static str) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullArgument(arg_name));
    }
    let cstr = CStr::from_ptr(ptr);
    cstr.to_str().map_err(FfiError::from)
}
