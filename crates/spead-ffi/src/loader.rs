//! Dynamic consumer module loading: `load_consumer(module, symbol)` opens
//! a shared module and resolves a zero-argument factory symbol that
//! returns a new consumer instance.
//!
//! A loaded module cannot hand us a `Box<dyn ConsumerHooks>` directly
//! across the FFI boundary (trait objects are fat pointers with no
//! stable ABI), so the factory symbol is expected to return a thin
//! pointer to a second, heap-allocated box: `*mut Box<dyn ConsumerHooks>`.
//! We take ownership of that outer box here and immediately unwrap it
//! into the `Box<dyn ConsumerHooks>` this crate works with everywhere
//! else.

use libloading::{Library, Symbol};
use spead_capture::ConsumerHooks;

use crate::error::FfiError;

type FactoryFn = unsafe extern "C" fn() -> *mut Box<dyn ConsumerHooks>;

/// Keeps the `Library` alive for as long as any instance it produced is
/// in use; dropping it before the consumer would unmap code the
/// consumer's vtable still points into.
pub struct LoadedModule {
    #[allow(dead_code)]
    library: Library,
}

impl LoadedModule {
    /// Loads `module` and resolves `symbol`, without yet invoking it.
    pub fn open(module: &str) -> Result<Self, FfiError> {
        // SAFETY: loading an arbitrary shared object always carries the
        // caller's trust that it does not run conflicting initializers;
        // this mirrors every other `dlopen`-based consumer loader.
        let library = unsafe { Library::new(module) }
            .map_err(|source| FfiError::ModuleLoad(module.to_string(), source))?;
        Ok(Self { library })
    }

    /// Resolves `symbol` and invokes it, taking ownership of the
    /// returned hooks object.
    pub fn instantiate(&self, symbol: &str) -> Result<Box<dyn ConsumerHooks>, FfiError> {
        // SAFETY: the caller asserts `symbol` names a zero-argument
        // factory with this exact signature; a mismatched signature is
        // undefined behavior the same way any FFI type mismatch is.
        let factory: Symbol<FactoryFn> = unsafe { self.library.get(symbol.as_bytes()) }
            .map_err(|source| FfiError::SymbolResolve(symbol.to_string(), source))?;
        let raw = unsafe { factory() };
        if raw.is_null() {
            return Err(FfiError::FactoryReturnedNull(symbol.to_string()));
        }
        // SAFETY: `raw` was just allocated by the factory via `Box::into_raw`
        // on a `Box<dyn ConsumerHooks>`; reclaiming it here is the
        // matching `Box::from_raw`.
        let boxed = unsafe { Box::from_raw(raw) };
        Ok(*boxed)
    }
}
