//! Purpose: Own exactly one dynamically loaded module and release it exactly once.
//! Exports: `Module`, `MAX_MODULE_PATH_BYTES`.
//! Role: Leaf resource layer beneath `Probe`.
//! Invariants: A handle is present iff its owned path copy is present (set together).
//! Invariants: `teardown` is idempotent and also runs on drop.
//! Invariants: A failed `open` leaves the module empty.
use std::ffi::{CStr, CString, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::loader::{Loader, SystemLoader};

/// Longest module path accepted by `open`, in bytes.
pub const MAX_MODULE_PATH_BYTES: usize = 1024;

struct Loaded<H> {
    handle: H,
    path: PathBuf,
}

pub struct Module<L: Loader = SystemLoader> {
    loader: L,
    loaded: Option<Loaded<L::Handle>>,
}

impl Module<SystemLoader> {
    pub fn new() -> Self {
        Self::with_loader(SystemLoader)
    }
}

impl Default for Module<SystemLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Loader> Module<L> {
    pub fn with_loader(loader: L) -> Self {
        Self {
            loader,
            loaded: None,
        }
    }

    pub fn open(&mut self, path: &Path) -> Result<(), Error> {
        self.teardown();

        let c_path = module_path_cstring(path)?;
        let handle = self.loader.open(&c_path).map_err(|diagnostic| {
            warn!(path = %path.display(), %diagnostic, "failed to open module");
            Error::new(ErrorKind::Probe)
                .with_message(format!("failed to open module: {diagnostic}"))
                .with_path(path)
        })?;

        debug!(path = %path.display(), "module loaded");
        self.loaded = Some(Loaded {
            handle,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    pub fn which_path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|loaded| loaded.path.as_path())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn symbol(&self, name: &CStr) -> Result<NonNull<c_void>, Error> {
        let symbol = name.to_string_lossy();
        let Some(loaded) = &self.loaded else {
            return Err(Error::new(ErrorKind::Probe)
                .with_message("no module is loaded")
                .with_symbol(symbol));
        };
        self.loader.symbol(&loaded.handle, name).map_err(|diagnostic| {
            warn!(path = %loaded.path.display(), %symbol, %diagnostic, "symbol lookup failed");
            Error::new(ErrorKind::Probe)
                .with_message(format!("failed to resolve symbol: {diagnostic}"))
                .with_path(&loaded.path)
                .with_symbol(symbol)
        })
    }

    pub fn teardown(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            debug!(path = %loaded.path.display(), "module unloaded");
            self.loader.close(loaded.handle);
        }
    }
}

impl<L: Loader> Drop for Module<L> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn module_path_cstring(path: &Path) -> Result<CString, Error> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.is_empty() {
        return Err(Error::new(ErrorKind::Probe).with_message("module path is empty"));
    }
    if bytes.len() > MAX_MODULE_PATH_BYTES {
        return Err(Error::new(ErrorKind::Probe)
            .with_message(format!(
                "module path exceeds {MAX_MODULE_PATH_BYTES} bytes"
            ))
            .with_path(path));
    }
    CString::new(bytes).map_err(|err| {
        Error::new(ErrorKind::Probe)
            .with_message("module path contains a NUL byte")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{MAX_MODULE_PATH_BYTES, Module};
    use crate::core::error::ErrorKind;
    use crate::core::loader::fake::{FakeLoader, FakeModule};

    const LIB: &str = "/opt/p11/libdemo.so";

    fn loader() -> FakeLoader {
        FakeLoader::default().with_module(LIB, FakeModule::NoEntryPoint)
    }

    #[test]
    fn open_records_owned_path() {
        let fake = loader();
        let mut module = Module::with_loader(fake.clone());
        let caller_path = String::from(LIB);

        module.open(Path::new(&caller_path)).expect("open");
        drop(caller_path);

        assert_eq!(module.which_path(), Some(Path::new(LIB)));
        assert!(module.is_loaded());
        assert_eq!(fake.opens(), 1);
    }

    #[test]
    fn failed_open_leaves_module_empty() {
        let fake = loader();
        let mut module = Module::with_loader(fake.clone());
        module.open(Path::new(LIB)).expect("open");

        let err = module.open(Path::new("/missing/lib.so")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Probe);
        assert_eq!(err.path(), Some(Path::new("/missing/lib.so")));
        assert!(err.message().unwrap().contains("cannot open shared object"));
        assert_eq!(module.which_path(), None);
        assert_eq!(fake.live(), 0);
        assert_eq!(fake.closes(), 1);
    }

    #[test]
    fn teardown_twice_closes_once() {
        let fake = loader();
        let mut module = Module::with_loader(fake.clone());
        module.open(Path::new(LIB)).expect("open");

        module.teardown();
        module.teardown();

        assert_eq!(fake.closes(), 1);
        assert_eq!(module.which_path(), None);
    }

    #[test]
    fn teardown_on_never_opened_module_is_noop() {
        let fake = loader();
        let mut module = Module::with_loader(fake.clone());
        module.teardown();
        drop(module);
        assert_eq!(fake.opens(), 0);
        assert_eq!(fake.closes(), 0);
    }

    #[test]
    fn drop_releases_loaded_module() {
        let fake = loader();
        {
            let mut module = Module::with_loader(fake.clone());
            module.open(Path::new(LIB)).expect("open");
        }
        assert_eq!(fake.closes(), 1);
        assert_eq!(fake.live(), 0);
    }

    #[test]
    fn rejects_unusable_paths_without_loading() {
        let fake = loader();
        let mut module = Module::with_loader(fake.clone());
        let long = format!("/{}", "a".repeat(MAX_MODULE_PATH_BYTES));

        for path in ["", "/opt/p11/lib\0demo.so", long.as_str()] {
            let err = module.open(Path::new(path)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Probe);
        }
        assert!(fake.attempts().is_empty());
    }

    #[test]
    fn symbol_requires_loaded_module() {
        let fake = loader();
        let mut module = Module::with_loader(fake);
        let err = module.symbol(c"C_GetFunctionList").unwrap_err();
        assert_eq!(err.symbol(), Some("C_GetFunctionList"));

        module.open(Path::new(LIB)).expect("open");
        let err = module.symbol(c"C_GetFunctionList").unwrap_err();
        assert!(err.message().unwrap().contains("undefined symbol"));
        assert_eq!(err.path(), Some(Path::new(LIB)));
    }
}
