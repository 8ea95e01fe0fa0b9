//! Purpose: Define the public Rust API boundary for p11probe.
//! Exports: Probe layers, the handle trait, PKCS#11 query types, and errors.
//! Role: Single import path for the CLI and integration tests.
//! Invariants: Raw ABI mirrors stay reachable only through `sys`.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::handle::ProviderHandle;
pub use crate::core::loader::{Loader, SystemLoader};
pub use crate::core::module::{MAX_MODULE_PATH_BYTES, Module};
pub use crate::core::pkcs11::{
    Cryptoki, Inventory, LibraryInfo, QueryFailure, SlotInfo, SlotReport, TokenInfo, Version,
    inventory, rv_name, sys,
};
pub use crate::core::probe::{DEFAULT_CANDIDATES, Probe, ProbeState};
