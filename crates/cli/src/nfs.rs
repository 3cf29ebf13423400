use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// An NFS share mounted with `sudo mount`; unmounted when dropped.
pub struct NfsMount {
    mount_point: PathBuf,
}

impl NfsMount {
    pub fn mount(
        share: &str,
        mount_point: &Path,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if !mount_point.exists() {
            log::debug!("Creating mount point {}", mount_point.display());
            fs::create_dir_all(mount_point)?;
        }

        log::info!("Mounting NFS share {share} at {}", mount_point.display());
        let status = Command::new("sudo")
            .args(mount_args(share, mount_point, username, password))
            .status()
            .map_err(|e| format!("Failed to run mount for {share}: {e}"))?;
        if !status.success() {
            return Err(format!("Could not mount NFS share {share} ({status})").into());
        }

        log::debug!("NFS share mounted");
        Ok(Self {
            mount_point: mount_point.to_path_buf(),
        })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

impl Drop for NfsMount {
    fn drop(&mut self) {
        match Command::new("sudo")
            .arg("umount")
            .arg(&self.mount_point)
            .status()
        {
            Ok(status) if status.success() => log::debug!("NFS share unmounted"),
            Ok(status) => log::error!(
                "Failed to unmount {} ({status})",
                self.mount_point.display()
            ),
            Err(e) => log::error!("Failed to unmount {}: {e}", self.mount_point.display()),
        }
    }
}

fn mount_args(
    share: &str,
    mount_point: &Path,
    username: Option<&str>,
    password: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["mount".to_string(), "-t".to_string(), "nfs".to_string()];
    if let (Some(user), Some(pass)) = (username, password) {
        args.push("-o".to_string());
        args.push(format!("username={user},password={pass}"));
    }
    args.push(share.to_string());
    args.push(mount_point.to_string_lossy().into_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_args_without_credentials() {
        assert_eq!(
            mount_args("host:/videos", Path::new("./videos"), None, None),
            vec!["mount", "-t", "nfs", "host:/videos", "./videos"]
        );
    }

    #[test]
    fn test_mount_args_with_credentials() {
        let args = mount_args("host:/videos", Path::new("./videos"), Some("ana"), Some("pw"));
        assert_eq!(args[3], "-o");
        assert_eq!(args[4], "username=ana,password=pw");
        assert_eq!(args.len(), 7);
    }

    #[test]
    fn test_username_without_password_is_ignored() {
        let args = mount_args("host:/videos", Path::new("./videos"), Some("ana"), None);
        assert_eq!(args.len(), 5);
    }
}
