// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use nix::errno::Errno;
use std::ffi::CString;

/// Argv marshalled into exec-ready form ahead of the fork point.
///
/// Everything here is allocated in the parent; the child branch only reads
/// the prepared pointer table, so it never touches the heap between `fork`
/// and `execv`.
// The args_cstrings field is just storage backing args_ptrs.
#[allow(dead_code)]
#[derive(Debug)]
pub struct PreparedExec {
    binary_path: CString,
    args_cstrings: Vec<CString>,
    args_ptrs: Vec<*const libc::c_char>,
}

#[derive(Debug, thiserror::Error)]
pub enum PreparedExecError {
    #[error("Failed to convert binary path to CString: {0}")]
    BinaryPath(std::ffi::NulError),
    #[error("Failed to convert argument to CString: {0}")]
    Argument(std::ffi::NulError),
}

impl PreparedExec {
    pub fn new(binary_path: &str, args: &[String]) -> Result<Self, PreparedExecError> {
        let binary_path = CString::new(binary_path).map_err(PreparedExecError::BinaryPath)?;

        let args_cstrings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(s.as_str()))
            .collect::<Result<Vec<CString>, std::ffi::NulError>>()
            .map_err(PreparedExecError::Argument)?;
        let args_ptrs: Vec<*const libc::c_char> = args_cstrings
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null())) // Adds a null pointer to the end of the list
            .collect();

        Ok(Self {
            binary_path,
            args_cstrings,
            args_ptrs,
        })
    }

    /// Replaces the current process image; only returns on failure.
    ///
    /// `execv` rather than `execve`: the child keeps an inherited copy of the
    /// caller's environment, descriptor table and working directory from the
    /// moment of the fork.
    pub fn exec(&self) -> Errno {
        // Safety: the only way to make one of these is through `new`, which
        // keeps the pointer table NUL-terminated and backed by live CStrings.
        unsafe {
            libc::execv(self.binary_path.as_ptr(), self.args_ptrs.as_ptr());
        }
        Errno::last()
    }
}
