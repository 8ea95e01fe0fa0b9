//! Purpose: Seam between the module layer and the OS dynamic loader.
//! Exports: `Loader` (open/symbol/close), `SystemLoader` (`dlopen` with `RTLD_NOW`).
//! Role: Lets `Module` own handles generically so tests can count opens and closes.
//! Invariants: `close` receives each handle returned by `open` exactly once.
//! Invariants: Failure strings carry the loader's own diagnostic (`dlerror`).
use std::ffi::{CStr, c_void};
use std::ptr::NonNull;

use tracing::warn;

pub trait Loader {
    type Handle;

    /// Loads a module with immediate symbol binding.
    fn open(&self, path: &CStr) -> Result<Self::Handle, String>;

    fn symbol(&self, handle: &Self::Handle, name: &CStr) -> Result<NonNull<c_void>, String>;

    fn close(&self, handle: Self::Handle);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLoader;

impl Loader for SystemLoader {
    type Handle = NonNull<c_void>;

    fn open(&self, path: &CStr) -> Result<Self::Handle, String> {
        let raw = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW) };
        NonNull::new(raw).ok_or_else(take_dl_error)
    }

    fn symbol(&self, handle: &Self::Handle, name: &CStr) -> Result<NonNull<c_void>, String> {
        // Clear any stale error so a null result is attributed to this lookup.
        let _ = take_dl_error();
        let raw = unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) };
        NonNull::new(raw).ok_or_else(take_dl_error)
    }

    fn close(&self, handle: Self::Handle) {
        if unsafe { libc::dlclose(handle.as_ptr()) } != 0 {
            warn!(error = %take_dl_error(), "dlclose failed");
        }
    }
}

fn take_dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}
