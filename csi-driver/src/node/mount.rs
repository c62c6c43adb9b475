//! Filesystem and mount operations behind a trait seam.
//!
//! The node service never shells out directly: everything goes through
//! [`Mounter`] so tests can inject a fake. The production implementation
//! wraps the usual node tooling (`mount`, `umount`, `blkid`, `mkfs.*`,
//! `resize2fs`/`xfs_growfs`, `blockdev`, `stat`).

use async_trait::async_trait;
use snafu::Snafu;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum MountError {
    #[snafu(display("'{}' failed: {}", command, stderr))]
    CommandFailed { command: String, stderr: String },

    #[snafu(display("could not run '{}': {}", command, source))]
    CommandSpawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("io error on '{}': {}", path, source))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("unexpected output from '{}': {}", command, output))]
    BadOutput { command: String, output: String },
}

/// One line of the mount table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MountPoint {
    pub device: String,
    pub path: String,
    pub fs_type: String,
}

/// Filesystem usage of a mounted volume.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub used_inodes: u64,
}

/// Capability surface the node service is written against.
#[async_trait]
pub trait Mounter: Send + Sync + 'static {
    fn path_exists(&self, path: &Path) -> bool;
    fn make_dir_all(&self, path: &Path) -> Result<(), MountError>;
    fn make_file(&self, path: &Path) -> Result<(), MountError>;
    fn remove_path(&self, path: &Path) -> Result<(), MountError>;
    /// Resolves symlinks down to the canonical path.
    fn resolve_link(&self, path: &Path) -> Result<PathBuf, MountError>;
    fn is_block_device(&self, path: &Path) -> Result<bool, MountError>;
    /// The full mount table.
    fn list_mounts(&self) -> Result<Vec<MountPoint>, MountError>;

    /// The mount entry whose mount point is `target`, if any.
    fn mount_at(&self, target: &Path) -> Result<Option<MountPoint>, MountError> {
        let target = target.to_string_lossy().to_string();
        Ok(self
            .list_mounts()?
            .into_iter()
            .find(|mount| mount.path == target))
    }

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<&str>,
        flags: &[String],
    ) -> Result<(), MountError>;
    async fn unmount(&self, target: &Path) -> Result<(), MountError>;
    /// Filesystem currently on the device, `None` when unformatted.
    async fn get_disk_format(&self, device: &Path) -> Result<Option<String>, MountError>;
    async fn mkfs(&self, device: &Path, fs_type: &str) -> Result<(), MountError>;
    /// Formats the device when it carries no filesystem, then mounts it.
    async fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> Result<(), MountError>;
    async fn resize_fs(
        &self,
        device: &Path,
        mount_path: &Path,
        fs_type: &str,
    ) -> Result<(), MountError>;
    async fn block_size_bytes(&self, device: &Path) -> Result<u64, MountError>;
    async fn fs_stats(&self, path: &Path) -> Result<FsStats, MountError>;
}

/// Production mounter shelling out to the node tooling.
#[derive(Debug, Default, Clone)]
pub struct ShellMounter;

impl ShellMounter {
    pub fn new() -> Self {
        // missing tools are only fatal once the operation needing them runs
        for tool in &["mount", "umount", "blkid", "blockdev"] {
            if which::which(tool).is_err() {
                tracing::warn!(tool, "node tool not found in PATH");
            }
        }
        Self
    }

    async fn run(command: &str, args: &[&str]) -> Result<String, MountError> {
        let rendered = format!("{} {}", command, args.join(" "));
        let output = Command::new(command)
            .args(args)
            .output()
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
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn io_err(path: &Path, source: std::io::Error) -> MountError {
        MountError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Mounter for ShellMounter {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn make_dir_all(&self, path: &Path) -> Result<(), MountError> {
        std::fs::create_dir_all(path).map_err(|err| Self::io_err(path, err))
    }

    fn make_file(&self, path: &Path) -> Result<(), MountError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| Self::io_err(parent, err))?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map(|_| ())
            .map_err(|err| Self::io_err(path, err))
    }

    fn remove_path(&self, path: &Path) -> Result<(), MountError> {
        let result = if path.is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(path, err)),
        }
    }

    fn resolve_link(&self, path: &Path) -> Result<PathBuf, MountError> {
        std::fs::canonicalize(path).map_err(|err| Self::io_err(path, err))
    }

    fn is_block_device(&self, path: &Path) -> Result<bool, MountError> {
        use std::os::unix::fs::FileTypeExt;
        let metadata = std::fs::metadata(path).map_err(|err| Self::io_err(path, err))?;
        Ok(metadata.file_type().is_block_device())
    }

    fn list_mounts(&self) -> Result<Vec<MountPoint>, MountError> {
        let table = std::fs::read_to_string("/proc/mounts")
            .map_err(|err| Self::io_err(Path::new("/proc/mounts"), err))?;
        Ok(table
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                Some(MountPoint {
                    device: fields.next()?.to_string(),
                    path: fields.next()?.to_string(),
                    fs_type: fields.next()?.to_string(),
                })
            })
            .collect())
    }

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<&str>,
        flags: &[String],
    ) -> Result<(), MountError> {
        let source = source.to_string_lossy().to_string();
        let target = target.to_string_lossy().to_string();
        let options = flags.join(",");
        let mut args: Vec<&str> = Vec::new();
        if let Some(fs_type) = fs_type {
            args.extend(&["-t", fs_type]);
        }
        if !options.is_empty() {
            args.extend(&["-o", options.as_str()]);
        }
        args.push(source.as_str());
        args.push(target.as_str());
        Self::run("mount", &args).await.map(|_| ())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let target = target.to_string_lossy().to_string();
        Self::run("umount", &[target.as_str()]).await.map(|_| ())
    }

    async fn get_disk_format(&self, device: &Path) -> Result<Option<String>, MountError> {
        let device = device.to_string_lossy().to_string();
        match Self::run("blkid", &["-p", "-s", "TYPE", "-o", "value", device.as_str()]).await {
            Ok(output) => {
                let fs_type = output.trim().to_string();
                Ok(if fs_type.is_empty() {
                    None
                } else {
                    Some(fs_type)
                })
            }
            // blkid exits non-zero with no output for an unformatted device
            Err(MountError::CommandFailed { stderr, .. }) if stderr.is_empty() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn mkfs(&self, device: &Path, fs_type: &str) -> Result<(), MountError> {
        let device = device.to_string_lossy().to_string();
        let command = format!("mkfs.{}", fs_type);
        let args: Vec<&str> = match fs_type {
            "ext3" | "ext4" => vec!["-F", "-m0", device.as_str()],
            _ => vec![device.as_str()],
        };
        Self::run(&command, &args).await.map(|_| ())
    }

    async fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> Result<(), MountError> {
        if self.get_disk_format(device).await?.is_none() {
            self.mkfs(device, fs_type).await?;
        }
        self.mount(device, target, Some(fs_type), flags).await
    }

    async fn resize_fs(
        &self,
        device: &Path,
        mount_path: &Path,
        fs_type: &str,
    ) -> Result<(), MountError> {
        let device = device.to_string_lossy().to_string();
        let mount_path = mount_path.to_string_lossy().to_string();
        match fs_type {
            "xfs" => Self::run("xfs_growfs", &[mount_path.as_str()]).await.map(|_| ()),
            _ => Self::run("resize2fs", &[device.as_str()]).await.map(|_| ()),
        }
    }

    async fn block_size_bytes(&self, device: &Path) -> Result<u64, MountError> {
        let device = device.to_string_lossy().to_string();
        let output = Self::run("blockdev", &["--getsize64", device.as_str()]).await?;
        output
            .trim()
            .parse()
            .map_err(|_| MountError::BadOutput {
                command: format!("blockdev --getsize64 {}", device),
                output: output.trim().to_string(),
            })
    }

    async fn fs_stats(&self, path: &Path) -> Result<FsStats, MountError> {
        let path = path.to_string_lossy().to_string();
        let command = format!("stat -f -c %S;%b;%f;%a;%c;%d {}", path);
        let output = Self::run(
            "stat",
            &["-f", "-c", "%S;%b;%f;%a;%c;%d", path.as_str()],
        )
        .await?;
        let fields: Vec<u64> = output
            .trim()
            .split(';')
            .map(|field| field.parse().ok())
            .collect::<Option<Vec<_>>>()
            .ok_or(MountError::BadOutput {
                command,
                output: output.trim().to_string(),
            })?;
        if fields.len() != 6 {
            return Err(MountError::BadOutput {
                command: format!("stat -f {}", path),
                output: output.trim().to_string(),
            });
        }
        let (block_size, blocks, blocks_free, blocks_available) =
            (fields[0], fields[1], fields[2], fields[3]);
        let (inodes, inodes_free) = (fields[4], fields[5]);
        Ok(FsStats {
            total_bytes: block_size * blocks,
            available_bytes: block_size * blocks_available,
            used_bytes: block_size * (blocks - blocks_free),
            total_inodes: inodes,
            free_inodes: inodes_free,
            used_inodes: inodes - inodes_free,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_table_parsing() {
        // shape check against a real-looking table rather than /proc
        let table = "\
/dev/xvda1 / ext4 rw,relatime 0 0
tmpfs /run tmpfs rw,nosuid 0 0
/dev/xvdb /var/lib/kubelet/pods/x/volumes/kubernetes.io~csi/pvc-1/mount ext4 rw 0 0";
        let mounts: Vec<MountPoint> = table
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                Some(MountPoint {
                    device: fields.next()?.to_string(),
                    path: fields.next()?.to_string(),
                    fs_type: fields.next()?.to_string(),
                })
            })
            .collect();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[2].device, "/dev/xvdb");
        assert_eq!(mounts[2].fs_type, "ext4");
    }

    #[test]
    fn remove_path_ignores_missing_targets() {
        let mounter = ShellMounter::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        mounter.remove_path(&path).unwrap();

        mounter.make_file(&path).unwrap();
        assert!(mounter.path_exists(&path));
        mounter.remove_path(&path).unwrap();
        assert!(!mounter.path_exists(&path));
    }
}
