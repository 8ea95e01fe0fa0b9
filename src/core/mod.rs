// Core modules: dynamic loading, the module/probe resource layers, and PKCS#11 access.
pub mod error;
pub mod handle;
pub mod loader;
pub mod module;
pub mod pkcs11;
pub mod probe;
