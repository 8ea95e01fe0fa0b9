//! Purpose: Library crate behind the `p11probe` CLI and its tests.
//! Exports: `core` (loader, module/probe layers, PKCS#11 queries, errors), `api`, `report`.
//! Role: Loads a PKCS#11 provider module and exposes its function table and slot/token records.
//! Invariants: Unix only; modules are loaded through `dlopen` with immediate binding.
//! Invariants: Single-threaded by construction; probe types are neither `Send` nor `Sync`.
#[cfg(not(unix))]
compile_error!("p11probe requires a Unix dynamic loader (dlopen)");

pub mod api;
pub mod core;
pub mod report;
