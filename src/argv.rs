//! Native argument vector synthesis.

use crate::error::{Error, Result};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

/// A NUL-terminated `argv` owned by Rust.
///
/// Laid out the way a natively launched process sees it:
/// `[launcher, program, args...]` followed by a null pointer.
pub(crate) struct NativeArgv {
    strings: Vec<CString>,
    ptrs: Vec<*mut c_char>,
}

impl NativeArgv {
    pub(crate) fn new<I, S>(launcher: &str, program: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut strings = Vec::new();
        for arg in [launcher, program]
            .into_iter()
            .map(str::to_string)
            .chain(args.into_iter().map(|a| a.as_ref().to_string()))
        {
            let arg = CString::new(arg).map_err(|e| {
                Error::InvalidArgument(format!(
                    "argument contains a NUL byte at position {}",
                    e.nul_position()
                ))
            })?;
            strings.push(arg);
        }

        if c_int::try_from(strings.len()).is_err() {
            return Err(Error::InvalidArgument("too many arguments".into()));
        }

        let mut ptrs: Vec<*mut c_char> = strings.iter().map(|s| s.as_ptr().cast_mut()).collect();
        ptrs.push(std::ptr::null_mut());
        Ok(NativeArgv { strings, ptrs })
    }

    pub(crate) fn argc(&self) -> c_int {
        self.strings.len() as c_int
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.ptrs.as_mut_ptr()
    }

    pub(crate) fn to_strings(&self) -> Vec<String> {
        self.strings
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }
}

/// Path of the running executable as the native runtime should see it.
pub(crate) fn program_path() -> String {
    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .ok()
        .or_else(|| std::env::args().next())
        .unwrap_or_default()
}
