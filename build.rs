//! Build script for mpibind
//!
//! Without the `bundled` feature nothing is compiled: the wrapping module is
//! loaded at run time. With `bundled` the C wrapping module in `csrc/` is
//! compiled against the MPI installation found below and linked into the
//! crate, together with `libmpi`.
//!
//! MPI is located, in order, from:
//! - `MPIBIND_MPI_PKG_CONFIG`: a pkg-config package name
//! - `MPIBIND_MPI_DIR`: an installation prefix holding `include/mpi.h`
//! - the `ompi`, `mpich` and `mpi` pkg-config packages
//! - the compiler wrapper (`MPICC`, default `mpicc`)

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const PKG_CONFIG_NAMES: [&str; 3] = ["ompi", "mpich", "mpi"];

fn main() {
    if env::var_os("CARGO_FEATURE_BUNDLED").is_none() {
        return;
    }

    println!("cargo:rerun-if-changed=csrc/mpi_library.c");
    println!("cargo:rerun-if-changed=csrc/mpi_library.h");
    for var in ["MPIBIND_MPI_PKG_CONFIG", "MPIBIND_MPI_DIR", "MPICC"] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    let Some(mpi) = locate_mpi() else {
        panic!(
            "mpibind: the `bundled` feature needs an MPI installation (Open MPI or MPICH).\n\
             Point the build at it with one of:\n\
             - MPIBIND_MPI_PKG_CONFIG=<pkg-config package, e.g. ompi>\n\
             - MPIBIND_MPI_DIR=<prefix containing include/mpi.h>\n\
             - MPICC=<path to the mpicc wrapper>\n\
             or build without `bundled` and load libMpiLibrary.so at run time."
        );
    };

    compile_wrapping_module(&mpi);
    link_mpi(&mpi);

    // Surfaced as mpibind::BUNDLED_MPI_VERSION
    if let Some(version) = &mpi.version {
        println!("cargo:rustc-env=MPIBIND_MPI_VERSION={version}");
    }
}

/// Compiler and linker inputs for one MPI installation.
#[derive(Default)]
struct MpiInstall {
    source: String,
    include_paths: Vec<PathBuf>,
    link_paths: Vec<PathBuf>,
    libs: Vec<String>,
    version: Option<String>,
}

fn locate_mpi() -> Option<MpiInstall> {
    let found = env::var("MPIBIND_MPI_PKG_CONFIG")
        .ok()
        .and_then(|name| from_pkg_config(&name))
        .or_else(|| env::var_os("MPIBIND_MPI_DIR").and_then(|dir| from_prefix(Path::new(&dir))))
        .or_else(|| PKG_CONFIG_NAMES.iter().find_map(|name| from_pkg_config(name)))
        .or_else(from_compiler_wrapper)?;

    eprintln!("mpibind: bundling the wrapping module against MPI from {}", found.source);
    Some(found)
}

fn from_pkg_config(name: &str) -> Option<MpiInstall> {
    // Link flags are emitted by link_mpi, together with the rpath
    let lib = pkg_config::Config::new()
        .cargo_metadata(false)
        .probe(name)
        .ok()?;

    Some(MpiInstall {
        source: format!("pkg-config package `{name}`"),
        include_paths: lib.include_paths,
        link_paths: lib.link_paths,
        libs: lib.libs,
        version: Some(lib.version),
    })
}

fn from_prefix(prefix: &Path) -> Option<MpiInstall> {
    let include = prefix.join("include");
    if !include.join("mpi.h").is_file() {
        return None;
    }

    Some(MpiInstall {
        source: prefix.display().to_string(),
        include_paths: vec![include],
        link_paths: vec![prefix.join("lib")],
        libs: vec!["mpi".to_string()],
        version: None,
    })
}

/// Ask the compiler wrapper for its flags. MPICH spells the query `-show`,
/// Open MPI `-showme`.
fn from_compiler_wrapper() -> Option<MpiInstall> {
    let mpicc = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());

    ["-show", "-showme"].iter().find_map(|query| {
        let output = Command::new(&mpicc).arg(query).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let flags = String::from_utf8_lossy(&output.stdout);
        Some(MpiInstall {
            source: format!("`{mpicc} {query}`"),
            ..wrapper_flags(&flags)
        })
    })
}

/// Collect `-I`, `-L` and `-l` flags from a compiler wrapper command line.
fn wrapper_flags(command_line: &str) -> MpiInstall {
    let mut install = MpiInstall::default();

    for flag in command_line.split_whitespace() {
        if let Some(path) = flag.strip_prefix("-I") {
            install.include_paths.push(PathBuf::from(path));
        } else if let Some(path) = flag.strip_prefix("-L") {
            install.link_paths.push(PathBuf::from(path));
        } else if let Some(lib) = flag.strip_prefix("-l") {
            install.libs.push(lib.to_string());
        }
    }

    // Wrappers that link libmpi implicitly print no -l flags at all
    if install.libs.is_empty() {
        install.libs.push("mpi".to_string());
    }
    install
}

fn compile_wrapping_module(mpi: &MpiInstall) {
    let mut build = cc::Build::new();
    build
        .file("csrc/mpi_library.c")
        .include("csrc")
        .includes(&mpi.include_paths)
        .warnings(true)
        .extra_warnings(true);

    if env::var("PROFILE").as_deref() == Ok("release") {
        build.opt_level(3);
    }

    build.compile("mpi_library");
}

fn link_mpi(mpi: &MpiInstall) {
    for path in &mpi.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
        // Run against the libmpi we compiled against, not another soname on the loader path
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", path.display());
    }

    for lib in &mpi.libs {
        println!("cargo:rustc-link-lib={lib}");
    }
}
