//! Purpose: Uniform interface over the module layer and the provider-probe layer.
//! Exports: `ProviderHandle`.
//! Role: Lets callers drive either layer through `&mut dyn ProviderHandle`.
//! Invariants: `teardown` is always safe to repeat; `function_list` is `None` unless resolved.
use std::path::Path;

use crate::core::error::{Error, ErrorKind};
use crate::core::loader::Loader;
use crate::core::module::Module;
use crate::core::pkcs11::sys::CkFunctionList;

pub trait ProviderHandle {
    /// Loads `path`, or runs the layer's fallback search when `path` is absent or empty.
    fn probe(&mut self, path: Option<&Path>) -> Result<(), Error>;

    fn which_path(&self) -> Option<&Path>;

    fn function_list(&self) -> Option<&CkFunctionList>;

    fn teardown(&mut self);
}

impl<L: Loader> ProviderHandle for Module<L> {
    fn probe(&mut self, path: Option<&Path>) -> Result<(), Error> {
        match path.filter(|path| !path.as_os_str().is_empty()) {
            Some(path) => self.open(path),
            None => {
                Module::teardown(self);
                Err(Error::new(ErrorKind::Usage)
                    .with_message("a bare module loader needs an explicit module path"))
            }
        }
    }

    fn which_path(&self) -> Option<&Path> {
        Module::which_path(self)
    }

    fn function_list(&self) -> Option<&CkFunctionList> {
        None
    }

    fn teardown(&mut self) {
        Module::teardown(self);
    }
}
