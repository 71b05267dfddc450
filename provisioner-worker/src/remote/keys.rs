//! SSH key helpers used by automators

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::remote::RemoteError;

/// A private key written to disk, removed when dropped
#[derive(Debug)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed ssh key file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove ssh key file {}: {}", self.path.display(), e),
        }
    }
}

/// Decodes base64 key material into `<dir>/<name>` with mode 0600
pub fn write_ssh_key_file(dir: &Path, name: &str, encoded: &str) -> Result<KeyFile, RemoteError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
        return Err(RemoteError::InvalidKey(format!("invalid key file name {name:?}")));
    }

    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| RemoteError::InvalidKey(e.to_string()))?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    debug!("Writing ssh private key to {}", path.display());

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&path)?;
    let guard = KeyFile { path };
    file.write_all(&key)?;
    Ok(guard)
}

/// Fetches the host key of `key_type` ("rsa", "dsa", "ecdsa", ...) via
/// `ssh-keyscan` and returns its base64 body.
pub async fn ssh_keyscan(host: &str, port: u16, key_type: &str) -> Result<String, RemoteError> {
    let output = Command::new("ssh-keyscan")
        .args(keyscan_args(host, port, key_type))
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_keyscan_output(&stdout, key_type).ok_or_else(|| RemoteError::UnknownKeyType {
        host: host.to_string(),
        key_type: key_type.to_string(),
    })
}

fn keyscan_args(host: &str, port: u16, key_type: &str) -> [String; 5] {
    [
        "-p".to_string(),
        port.to_string(),
        "-t".to_string(),
        key_type.to_string(),
        host.to_string(),
    ]
}

/// Extracts the key body from `ssh-keyscan` output lines of the form
/// `<host> ssh-<type> <base64>`.
pub fn parse_keyscan_output(output: &str, key_type: &str) -> Option<String> {
    let wire_type = if key_type == "dsa" { "dss" } else { key_type };

    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.contains(wire_type))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let _host = fields.next()?;
            let algorithm = fields.next()?;
            let key = fields.next()?;
            (algorithm.contains(wire_type) && key != "type").then(|| key.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_file_is_private_and_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let keys = dir.path().join("ssh_keys");
        let encoded = STANDARD.encode("-----BEGIN KEY-----\nabc\n");

        let file = write_ssh_key_file(&keys, "task-1", &encoded).unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-----BEGIN KEY-----\nabc\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_key_material_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            write_ssh_key_file(dir.path(), "t", "***"),
            Err(RemoteError::InvalidKey(_))
        ));
        assert!(matches!(
            write_ssh_key_file(dir.path(), "../t", "YQ=="),
            Err(RemoteError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_keyscan_targets_the_ssh_port() {
        assert_eq!(
            keyscan_args("10.0.0.4", 2222, "rsa"),
            ["-p", "2222", "-t", "rsa", "10.0.0.4"].map(String::from)
        );
    }

    #[test]
    fn test_parse_keyscan_output() {
        let output = "# host:22 SSH-2.0-OpenSSH_8.0\nnode1 ssh-rsa AAAAB3NzaC1yc2E\n";
        assert_eq!(
            parse_keyscan_output(output, "rsa").as_deref(),
            Some("AAAAB3NzaC1yc2E")
        );

        let output = "node1 ssh-dss AAAAB3NzaC1kc3M\n";
        assert_eq!(
            parse_keyscan_output(output, "dsa").as_deref(),
            Some("AAAAB3NzaC1kc3M")
        );
    }

    #[test]
    fn test_unknown_key_type_yields_nothing() {
        assert_eq!(parse_keyscan_output("unknown key type foo\n", "foo"), None);
        assert_eq!(parse_keyscan_output("", "rsa"), None);
    }
}
