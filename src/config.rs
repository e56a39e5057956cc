//! Runtime configuration read from the environment.
//!
//! The soname of the MPI library differs between distributions, so neither
//! it nor the wrapping module path is hard-coded.
//!
//! # Environment Variables
//!
//! | Field | Variable | Default |
//! |-------|----------|---------|
//! | [`library`](Config::library) | `MPIBIND_LIBRARY` | `libMpiLibrary.so` |
//! | [`preload`](Config::preload) | `MPIBIND_PRELOAD` | `libmpi.so.40:libmpi.so.20:libmpi.so.12` |
//! | [`launcher`](Config::launcher) | `MPIBIND_LAUNCHER` | file name of the running executable |

use std::env;

/// Default file name of the native wrapping module.
pub const DEFAULT_LIBRARY: &str = "libMpiLibrary.so";

/// Default preload candidates, newest Open MPI soname first.
pub const DEFAULT_PRELOAD: [&str; 3] = ["libmpi.so.40", "libmpi.so.20", "libmpi.so.12"];

/// Where to find the native libraries and how to build the native argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path or file name of the wrapping module passed to `dlopen`.
    pub library: String,
    /// MPI library candidates; the first loadable one is made global before
    /// the wrapping module is loaded. Empty disables preloading.
    pub preload: Vec<String>,
    /// Token placed at `argv[0]` of the native argument vector.
    pub launcher: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library: DEFAULT_LIBRARY.to_string(),
            preload: DEFAULT_PRELOAD.iter().map(|s| (*s).to_string()).collect(),
            launcher: default_launcher(),
        }
    }
}

impl Config {
    /// Defaults overridden by any `MPIBIND_*` variables that are set.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(library) = env::var("MPIBIND_LIBRARY") {
            if !library.is_empty() {
                config.library = library;
            }
        }
        if let Ok(preload) = env::var("MPIBIND_PRELOAD") {
            config.preload = parse_list(&preload);
        }
        if let Ok(launcher) = env::var("MPIBIND_LAUNCHER") {
            if !launcher.is_empty() {
                config.launcher = launcher;
            }
        }
        config
    }

    /// Set the wrapping module path.
    #[must_use]
    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = library.into();
        self
    }

    /// Replace the preload candidates.
    #[must_use]
    pub fn with_preload<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Set the `argv[0]` token.
    #[must_use]
    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = launcher.into();
        self
    }
}

/// File name of the running executable, or the crate name if unknown.
fn default_launcher() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.library, "libMpiLibrary.so");
        assert_eq!(config.preload, ["libmpi.so.40", "libmpi.so.20", "libmpi.so.12"]);
        assert!(!config.launcher.is_empty());
    }

    #[test]
    fn builder_setters() {
        let config = Config::default()
            .with_library("/opt/lib/libMpiLibrary.so")
            .with_preload(["libmpi.so.12"])
            .with_launcher("solver");
        assert_eq!(config.library, "/opt/lib/libMpiLibrary.so");
        assert_eq!(config.preload, ["libmpi.so.12"]);
        assert_eq!(config.launcher, "solver");
    }

    #[test]
    fn list_parsing_skips_blanks() {
        assert_eq!(parse_list("libmpi.so.40: :libmpi.so.12:"), ["libmpi.so.40", "libmpi.so.12"]);
        assert!(parse_list("").is_empty());
    }

    /// Everything touching `MPIBIND_*` lives in one test so parallel tests do
    /// not race on the process environment.
    #[test]
    fn env_overrides() {
        env::set_var("MPIBIND_LIBRARY", "/tmp/libwrap.so");
        env::set_var("MPIBIND_PRELOAD", "libmpi.so.20");
        env::set_var("MPIBIND_LAUNCHER", "mpibind-test");
        let config = Config::from_env();
        assert_eq!(config.library, "/tmp/libwrap.so");
        assert_eq!(config.preload, ["libmpi.so.20"]);
        assert_eq!(config.launcher, "mpibind-test");

        // An empty preload list disables preloading; empty library keeps the default
        env::set_var("MPIBIND_PRELOAD", "");
        env::set_var("MPIBIND_LIBRARY", "");
        let config = Config::from_env();
        assert!(config.preload.is_empty());
        assert_eq!(config.library, DEFAULT_LIBRARY);

        env::remove_var("MPIBIND_LIBRARY");
        env::remove_var("MPIBIND_PRELOAD");
        env::remove_var("MPIBIND_LAUNCHER");
        assert_eq!(Config::from_env().library, DEFAULT_LIBRARY);
    }
}
