//! LUKS operations behind a trait seam, shelling out to `cryptsetup`.

use super::mount::MountError;
use async_trait::async_trait;
use std::{path::Path, process::Stdio};
use tokio::{io::AsyncWriteExt, process::Command};

/// Tuning knobs forwarded to `cryptsetup luksFormat`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LuksConfig {
    pub cipher: Option<String>,
    pub hash: Option<String>,
    pub key_size: Option<String>,
}

/// LUKS capability surface of the node service.
#[async_trait]
pub trait LuksOps: Send + Sync + 'static {
    /// True when the device carries a LUKS header.
    async fn is_luks(&self, device: &Path) -> bool;
    async fn format(
        &self,
        device: &Path,
        passphrase: &str,
        config: &LuksConfig,
    ) -> Result<(), MountError>;
    /// Verifies the passphrase without opening the mapping.
    async fn check_passphrase(&self, device: &Path, passphrase: &str) -> Result<(), MountError>;
    async fn open(&self, device: &Path, name: &str, passphrase: &str) -> Result<(), MountError>;
    async fn close(&self, name: &str) -> Result<(), MountError>;
    async fn resize(&self, name: &str, passphrase: &str) -> Result<(), MountError>;
    /// True when the mapping is currently open.
    async fn is_open(&self, name: &str) -> bool;
}

/// Production implementation over `cryptsetup`.
#[derive(Debug, Default, Clone)]
pub struct Cryptsetup;

impl Cryptsetup {
    pub fn new() -> Self {
        if which::which("cryptsetup").is_err() {
            tracing::warn!("cryptsetup not found in PATH, encrypted volumes will fail");
        }
        Self
    }

    /// Runs cryptsetup with the passphrase written to stdin
    /// (`--key-file -`), so the secret never lands on the command line.
    async fn run(args: &[&str], stdin: Option<&str>) -> Result<(), MountError> {
        let rendered = format!("cryptsetup {}", args.join(" "));
        let mut command = Command::new("cryptsetup");
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let mut child = command.spawn().map_err(|source| MountError::CommandSpawn {
            command: rendered.clone(),
            source,
        })?;
        if let (Some(mut handle), Some(passphrase)) = (child.stdin.take(), stdin) {
            handle
                .write_all(passphrase.as_bytes())
                .await
                .map_err(|source| MountError::CommandSpawn {
                    command: rendered.clone(),
                    source,
                })?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| MountError::CommandSpawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MountError::CommandFailed {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LuksOps for Cryptsetup {
    async fn is_luks(&self, device: &Path) -> bool {
        let device = device.to_string_lossy().to_string();
        Self::run(&["isLuks", device.as_str()], None).await.is_ok()
    }

    async fn format(
        &self,
        device: &Path,
        passphrase: &str,
        config: &LuksConfig,
    ) -> Result<(), MountError> {
        let device = device.to_string_lossy().to_string();
        let mut args = vec!["luksFormat", "--batch-mode", "--key-file", "-"];
        if let Some(cipher) = &config.cipher {
            args.extend(&["--cipher", cipher.as_str()]);
        }
        if let Some(hash) = &config.hash {
            args.extend(&["--hash", hash.as_str()]);
        }
        if let Some(key_size) = &config.key_size {
            args.extend(&["--key-size", key_size.as_str()]);
        }
        args.push(device.as_str());
        Self::run(&args, Some(passphrase)).await
    }

    async fn check_passphrase(&self, device: &Path, passphrase: &str) -> Result<(), MountError> {
        let device = device.to_string_lossy().to_string();
        Self::run(
            &[
                "open",
                "--test-passphrase",
                "--key-file",
                "-",
                device.as_str(),
            ],
            Some(passphrase),
        )
        .await
    }

    async fn open(&self, device: &Path, name: &str, passphrase: &str) -> Result<(), MountError> {
        let device = device.to_string_lossy().to_string();
        Self::run(
            &["open", "--key-file", "-", device.as_str(), name],
            Some(passphrase),
        )
        .await
    }

    async fn close(&self, name: &str) -> Result<(), MountError> {
        Self::run(&["close", name], None).await
    }

    async fn resize(&self, name: &str, passphrase: &str) -> Result<(), MountError> {
        Self::run(&["resize", "--key-file", "-", name], Some(passphrase)).await
    }

    async fn is_open(&self, name: &str) -> bool {
        Self::run(&["status", name], None).await.is_ok()
    }
}

/// `/dev/mapper` name for an encrypted device, `<basename>_crypt`.
pub fn encrypted_name(device: &Path) -> String {
    let base = device
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}_crypt", base)
}

/// Mapped path for an encrypted device name.
pub fn mapped_path(name: &str) -> std::path::PathBuf {
    Path::new("/dev/mapper").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_names_follow_the_device() {
        assert_eq!(encrypted_name(Path::new("/dev/xvdb")), "xvdb_crypt");
        assert_eq!(
            mapped_path(&encrypted_name(Path::new("/dev/xvdb"))),
            Path::new("/dev/mapper/xvdb_crypt")
        );
    }
}
