//! On-demand installation of the Piper executable and voice models.

pub mod binary;
pub mod voice;

use std::path::Path;

pub use binary::BinaryProvisioner;
pub use voice::{VoiceModelProvisioner, VoiceName};

/// True when `path` is a regular file the current user may execute.
///
/// Windows has no exec bit, so any regular file qualifies there.
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("piper");
        assert!(!is_executable(&file));

        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_executable(&file));

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&file));
        assert!(!is_executable(dir.path()));
    }
}
