//! Purpose: Compile the fixture PKCS#11 provider used by the integration tests.
//! Role: Cargo build-script; drives the `cc`-discovered C compiler to emit shared objects.
//! Invariants: Never fails the build; a missing or broken compiler only emits a cargo warning.
//! Invariants: When fixtures are built, `P11PROBE_FIXTURE_DIR` points at their directory.
//! Invariants: Uses only Cargo-provided env vars (e.g. `CARGO_MANIFEST_DIR`, `OUT_DIR`).
use std::env;
use std::path::{Path, PathBuf};

/// Output file stem and extra preprocessor define for each fixture variant.
const FIXTURES: &[(&str, Option<&str>)] = &[
    ("fixture_p11", None),
    ("fixture_p11_noentry", Some("FIXTURE_NO_ENTRY_POINT")),
    ("fixture_p11_fails", Some("FIXTURE_ENTRY_FAILS")),
];

fn main() {
    println!("cargo:rerun-if-changed=c/fixture_provider.c");

    let target = env::var("TARGET").unwrap_or_default();
    let host = env::var("HOST").unwrap_or_default();
    if target != host || target.contains("windows") {
        println!("cargo:warning=skipping fixture provider build for target `{target}`");
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_default());
    let fixture_dir = out_dir.join("fixtures");
    if let Err(err) = std::fs::create_dir_all(&fixture_dir) {
        println!("cargo:warning=failed to create fixture dir: {err}");
        return;
    }
    let source = manifest_dir.join("c").join("fixture_provider.c");

    for (stem, define) in FIXTURES {
        let output = fixture_dir.join(format!("lib{stem}.so"));
        if let Err(err) = compile_shared(&source, &output, *define) {
            println!("cargo:warning=fixture provider `{stem}` not built: {err}");
            return;
        }
    }

    println!("cargo:rustc-env=P11PROBE_FIXTURE_DIR={}", fixture_dir.display());
}

fn compile_shared(source: &Path, output: &Path, define: Option<&str>) -> Result<(), String> {
    let compiler = cc::Build::new()
        .cargo_metadata(false)
        .warnings(false)
        .try_get_compiler()
        .map_err(|err| err.to_string())?;

    let mut command = compiler.to_command();
    command.arg("-shared").arg("-fPIC").arg("-o").arg(output);
    if let Some(define) = define {
        command.arg(format!("-D{define}"));
    }
    command.arg(source);

    let status = command.status().map_err(|err| err.to_string())?;
    if !status.success() {
        return Err(format!("compiler exited with {status}"));
    }
    Ok(())
}
