//! Environment checks run once before a client is created.

use std::path::Path;

use tracing::debug;

use crate::error::{ClientError, Result};

const ORIGIN_SCHEMES: [&str; 3] = ["http", "https", "unix"];
const PROBE_CONTENT: &[u8] = b"polycrypt-probe";

/// Run every precondition check.
pub fn check(state_dir: &Path, backend_origin: &str) -> Result<()> {
    check_state_dir(state_dir)?;
    check_origin(backend_origin)?;
    debug!(state_dir = ?state_dir, backend_origin, "preflight checks passed");
    Ok(())
}

/// The state directory must accept a write, read back, and delete.
pub fn check_state_dir(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".polycrypt-probe-{}", std::process::id()));
    let unusable = |err: std::io::Error| {
        ClientError::Precondition(format!(
            "state directory {} is not writable: {err}",
            dir.display()
        ))
    };

    std::fs::write(&probe, PROBE_CONTENT).map_err(unusable)?;
    let read_back = std::fs::read(&probe);
    let removed = std::fs::remove_file(&probe);
    if read_back.map_err(unusable)? != PROBE_CONTENT {
        return Err(ClientError::Precondition(format!(
            "state directory {} did not return what was written",
            dir.display()
        )));
    }
    removed.map_err(unusable)
}

/// The backend origin must be `scheme://authority` with a network or socket
/// scheme. Opaque origins such as `null` or `file://` are rejected.
pub fn check_origin(origin: &str) -> Result<()> {
    let invalid = |why: &str| ClientError::Precondition(format!("backend origin '{origin}' {why}"));

    let (scheme, rest) = origin
        .split_once("://")
        .ok_or_else(|| invalid("is not of the form scheme://authority"))?;
    if !ORIGIN_SCHEMES.contains(&scheme) {
        return Err(invalid("must use http, https or unix"));
    }
    if rest.is_empty() {
        return Err(invalid("has no authority"));
    }
    if scheme != "unix" && rest.contains('/') {
        return Err(invalid("must not carry a path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_network_and_socket_origins() {
        assert!(check_origin("https://crypto.example.com").is_ok());
        assert!(check_origin("http://127.0.0.1:8001").is_ok());
        assert!(check_origin("unix:///tmp/polycrypt.sock").is_ok());
    }

    #[test]
    fn rejects_opaque_origins() {
        for origin in [
            "null",
            "file://",
            "file:///index.html",
            "https://",
            "https://a.example/path",
            "*",
        ] {
            assert!(
                matches!(check_origin(origin), Err(ClientError::Precondition(_))),
                "{origin} should be rejected"
            );
        }
    }

    #[test]
    fn writable_state_dir_passes_and_leaves_nothing_behind() {
        let dir = std::env::temp_dir().join(format!("polycrypt-preflight-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        check_state_dir(&dir).unwrap();
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_state_dir_fails() {
        let dir = std::env::temp_dir().join("polycrypt-preflight-missing").join("nested");
        assert!(matches!(
            check_state_dir(&dir),
            Err(ClientError::Precondition(_))
        ));
    }
}
