//! Socket path discovery
//!
//! Search order:
//!
//! 1. the path given by the caller
//! 2. `$I3SOCK`
//! 3. `$SWAYSOCK`
//! 4. `i3 --get-socketpath`
//! 5. `sway --get-socketpath`
//!
//! Candidates from the environment or a binary are only accepted if the
//! path exists.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::IpcError;

pub const I3SOCK_ENV: &str = "I3SOCK";
pub const SWAYSOCK_ENV: &str = "SWAYSOCK";

const SOCKET_ENV_VARS: [&str; 2] = [I3SOCK_ENV, SWAYSOCK_ENV];
const WM_BINARIES: [&str; 2] = ["i3", "sway"];

/// Find the IPC socket of the running window manager
pub fn find_socket_path(explicit: Option<&Path>) -> Result<PathBuf, IpcError> {
    resolve(explicit, |var| std::env::var_os(var), query_binary)
}

fn resolve<E, B>(explicit: Option<&Path>, env: E, binary: B) -> Result<PathBuf, IpcError>
where
    E: Fn(&str) -> Option<OsString>,
    B: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        tracing::info!(path = %path.display(), "Using provided socket path");
        return Ok(path.to_path_buf());
    }

    for var in SOCKET_ENV_VARS {
        let Some(value) = env(var).filter(|v| !v.is_empty()) else {
            continue;
        };
        let path = PathBuf::from(value);
        if path.exists() {
            tracing::info!(var, path = %path.display(), "Got socket path from environment");
            return Ok(path);
        }
        tracing::warn!(var, path = %path.display(), "Socket path from environment does not exist");
    }

    for name in WM_BINARIES {
        let Some(output) = binary(name) else {
            continue;
        };
        let path = PathBuf::from(output.trim());
        if !path.as_os_str().is_empty() && path.exists() {
            tracing::info!(binary = name, path = %path.display(), "Got socket path from binary");
            return Ok(path);
        }
    }

    tracing::info!("Could not find the i3/sway socket path");
    Err(IpcError::SocketNotFound)
}

/// Run `<binary> --get-socketpath`, returning its stdout on success
fn query_binary(binary: &str) -> Option<String> {
    let output = Command::new(binary)
        .arg("--get-socketpath")
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() && !output.stdout.is_empty() => {
            String::from_utf8(output.stdout).ok()
        }
        Ok(output) => {
            tracing::debug!(
                binary,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Binary did not report a socket path"
            );
            None
        }
        Err(e) => {
            tracing::debug!(binary, error = %e, "Could not run binary");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<OsString> {
        None
    }

    fn no_binary(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_explicit_path_wins_without_existing() {
        let path = resolve(
            Some(Path::new("/nonexistent/ipc.sock")),
            |_| Some(OsString::from("/also/missing")),
            no_binary,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/nonexistent/ipc.sock"));
    }

    #[test]
    fn test_i3sock_before_swaysock() {
        let dir = TempDir::new().unwrap();
        let i3 = dir.path().join("i3.sock");
        let sway = dir.path().join("sway.sock");
        std::fs::write(&i3, b"").unwrap();
        std::fs::write(&sway, b"").unwrap();

        let env = |var: &str| match var {
            I3SOCK_ENV => Some(i3.clone().into_os_string()),
            SWAYSOCK_ENV => Some(sway.clone().into_os_string()),
            _ => None,
        };
        assert_eq!(resolve(None, env, no_binary).unwrap(), i3);
    }

    #[test]
    fn test_missing_env_path_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sway = dir.path().join("sway.sock");
        std::fs::write(&sway, b"").unwrap();

        let env = |var: &str| match var {
            I3SOCK_ENV => Some(OsString::from("/nonexistent/i3.sock")),
            SWAYSOCK_ENV => Some(sway.clone().into_os_string()),
            _ => None,
        };
        assert_eq!(resolve(None, env, no_binary).unwrap(), sway);
    }

    #[test]
    fn test_binary_output_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("ipc.sock");
        std::fs::write(&sock, b"").unwrap();

        let expected = sock.clone();
        let binary = move |name: &str| (name == "sway").then(|| format!("{}\n", sock.display()));
        assert_eq!(resolve(None, no_env, binary).unwrap(), expected);
    }

    #[test]
    fn test_nothing_found() {
        let result = resolve(None, no_env, |_| Some("/nonexistent/sock\n".to_string()));
        assert!(matches!(result, Err(IpcError::SocketNotFound)));
        assert!(matches!(
            resolve(None, no_env, no_binary),
            Err(IpcError::SocketNotFound)
        ));
    }
}
