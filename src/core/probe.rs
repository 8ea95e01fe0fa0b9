//! Purpose: Resolve a PKCS#11 provider's function table from a loaded module.
//! Exports: `Probe`, `ProbeState`, `DEFAULT_CANDIDATES`.
//! Role: Second resource layer; owns a `Module` plus a borrowed view of the provider table.
//! Invariants: A function table is present only while the owned module is loaded.
//! Invariants: Teardown releases the module first, then clears the table view; repeatable.
//! Invariants: Every `probe` call starts from a full teardown.
//! Invariants: A failure after a successful open keeps the module loaded (`ModuleOpen`).
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::handle::ProviderHandle;
use crate::core::loader::{Loader, SystemLoader};
use crate::core::module::Module;
use crate::core::pkcs11::rv_name;
use crate::core::pkcs11::sys::{CKR_OK, CkFunctionList, CkGetFunctionList, GET_FUNCTION_LIST_SYMBOL};

/// Modules tried, in order, when no explicit path is given.
pub const DEFAULT_CANDIDATES: &[&str] = &["/usr/lib/opencryptoki/libopencryptoki.so"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeState {
    Empty,
    ModuleOpen,
    Resolved,
}

pub struct Probe<L: Loader = SystemLoader> {
    module: Module<L>,
    // Owned by the provider module; never freed here.
    functions: Option<NonNull<CkFunctionList>>,
    candidates: Vec<PathBuf>,
}

impl Probe<SystemLoader> {
    pub fn new() -> Self {
        Self::with_loader(SystemLoader)
    }
}

impl Default for Probe<SystemLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Loader> Probe<L> {
    pub fn with_loader(loader: L) -> Self {
        Self {
            module: Module::with_loader(loader),
            functions: None,
            candidates: DEFAULT_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }

    /// Replaces the fallback candidate list.
    pub fn with_candidates<I, P>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn probe(&mut self, path: Option<&Path>) -> Result<(), Error> {
        self.teardown();

        match path.filter(|path| !path.as_os_str().is_empty()) {
            Some(path) => self.module.open(path)?,
            None => self.open_first_candidate()?,
        }
        self.resolve_function_list()
    }

    pub fn which_path(&self) -> Option<&Path> {
        self.module.which_path()
    }

    pub fn function_list(&self) -> Option<&CkFunctionList> {
        // The table lives inside the loaded module, which `self` keeps alive for this borrow.
        self.functions.map(|table| unsafe { table.as_ref() })
    }

    pub fn state(&self) -> ProbeState {
        match (self.module.is_loaded(), self.functions.is_some()) {
            (true, true) => ProbeState::Resolved,
            (true, false) => ProbeState::ModuleOpen,
            (false, _) => ProbeState::Empty,
        }
    }

    pub fn teardown(&mut self) {
        self.module.teardown();
        self.functions = None;
    }

    fn open_first_candidate(&mut self) -> Result<(), Error> {
        if self.candidates.is_empty() {
            return Err(Error::new(ErrorKind::Probe)
                .with_message("no module path given and no fallback candidates configured"));
        }
        for candidate in &self.candidates {
            match self.module.open(candidate) {
                Ok(()) => {
                    debug!(path = %candidate.display(), "fallback candidate loaded");
                    return Ok(());
                }
                Err(err) => debug!(%err, "fallback candidate rejected"),
            }
        }

        let tried = self
            .candidates
            .iter()
            .map(|candidate| candidate.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::new(ErrorKind::Probe)
            .with_message(format!("no fallback candidate could be loaded (tried: {tried})"))
            .with_hint("pass the provider module path explicitly"))
    }

    fn resolve_function_list(&mut self) -> Result<(), Error> {
        let symbol = self.module.symbol(GET_FUNCTION_LIST_SYMBOL)?;
        let entry =
            unsafe { std::mem::transmute::<*mut c_void, CkGetFunctionList>(symbol.as_ptr()) };

        let mut table: *mut CkFunctionList = ptr::null_mut();
        let rv = unsafe { entry(&mut table) };
        let path = self.module.which_path().map(Path::to_path_buf).unwrap_or_default();

        if rv != CKR_OK {
            warn!(path = %path.display(), rv = %rv_name(rv), "C_GetFunctionList failed");
            return Err(Error::new(ErrorKind::Probe)
                .with_message(format!("C_GetFunctionList returned {}", rv_name(rv)))
                .with_path(path)
                .with_symbol(GET_FUNCTION_LIST_SYMBOL.to_string_lossy())
                .with_rv(rv));
        }
        let Some(table) = NonNull::new(table) else {
            warn!(path = %path.display(), "C_GetFunctionList returned a null table");
            return Err(Error::new(ErrorKind::Probe)
                .with_message("C_GetFunctionList returned a null function table")
                .with_path(path)
                .with_symbol(GET_FUNCTION_LIST_SYMBOL.to_string_lossy()));
        };

        debug!(path = %path.display(), "function table resolved");
        self.functions = Some(table);
        Ok(())
    }
}

impl<L: Loader> Drop for Probe<L> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<L: Loader> ProviderHandle for Probe<L> {
    fn probe(&mut self, path: Option<&Path>) -> Result<(), Error> {
        Probe::probe(self, path)
    }

    fn which_path(&self) -> Option<&Path> {
        Probe::which_path(self)
    }

    fn function_list(&self) -> Option<&CkFunctionList> {
        Probe::function_list(self)
    }

    fn teardown(&mut self) {
        Probe::teardown(self);
    }
}
