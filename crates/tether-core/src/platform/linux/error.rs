//! # Linux Error Mapping
//!
//! Converts the errno values of launch and attach failures into
//! [`TetherError`]s with actionable messages.

use std::fs;
use std::io;
use std::path::Path;

use nix::errno::Errno;

use super::constants::YAMA_PTRACE_SCOPE;
use crate::error::TetherError;
use crate::types::ProcessId;

/// Map a failed `PTRACE_ATTACH` (or its initial wait)
///
/// - `EPERM` → [`TetherError::PermissionDenied`], mentioning Yama's
///   `ptrace_scope` when it is what blocks us
/// - `ESRCH` → [`TetherError::ProcessNotFound`]
/// - anything else → [`TetherError::AttachFailed`]
pub fn attach_error(pid: ProcessId, errno: Errno) -> TetherError
{
    match errno {
        Errno::EPERM => {
            let hint = match ptrace_scope() {
                Some(scope) if scope > 0 => {
                    format!("kernel.yama.ptrace_scope is {scope}; set it to 0 or run with CAP_SYS_PTRACE")
                }
                _ => "the process belongs to another user or is already traced".to_string(),
            };
            TetherError::PermissionDenied(format!("cannot trace process {pid}: {hint}"))
        }
        Errno::ESRCH => TetherError::ProcessNotFound(pid.0),
        other => TetherError::AttachFailed {
            pid: pid.0,
            reason: other.desc().to_string(),
        },
    }
}

/// Map an I/O error while inspecting `/proc/<pid>`
pub fn proc_error(pid: ProcessId, err: io::Error) -> TetherError
{
    match err.kind() {
        io::ErrorKind::NotFound => TetherError::ProcessNotFound(pid.0),
        io::ErrorKind::PermissionDenied => {
            TetherError::PermissionDenied(format!("cannot inspect process {pid}: {err}"))
        }
        _ => TetherError::Io(err),
    }
}

/// Map a failure to open a redirection file
pub fn redirect_error(path: &Path, err: &io::Error) -> TetherError
{
    TetherError::SpawnFailed(format!("cannot open {}: {err}", path.display()))
}

/// Current value of Yama's `ptrace_scope`, if the LSM is active
pub fn ptrace_scope() -> Option<u32>
{
    fs::read_to_string(YAMA_PTRACE_SCOPE).ok()?.trim().parse().ok()
}
