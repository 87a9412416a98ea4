//! schroot configuration files for a build session.
//!
//! Writes the chroot definition (`<conf>/chroot.d/<name>`) and its profile
//! directory (`<conf>/<name>/{fstab,copyfiles,nssdatabases}`). Rendering is a
//! pure function of [`SessionEnvironment`], and every file is written to a
//! temporary sibling first and renamed into place, so rewriting the same
//! configuration is harmless to concurrent readers.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{SessionEnvironment, SESSION_DOWNLOADS, SESSION_HOME};

impl SessionEnvironment {
    pub fn chroot_file(&self) -> PathBuf {
        self.conf_dir.join("chroot.d").join(&self.chroot)
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.conf_dir.join(&self.chroot)
    }

    pub fn render_chroot(&self) -> String {
        let user = &self.user;
        format!(
            "[{name}]\n\
             type=directory\n\
             directory={rootfs}\n\
             profile={profile}\n\
             users={user}\n\
             groups=root,sbuild\n\
             root-users={user}\n\
             root-groups=root,sbuild\n\
             source-root-users={user}\n\
             source-root-groups=root,sbuild\n\
             union-type=overlay\n\
             preserve-environment=true\n",
            name = self.chroot,
            rootfs = self.rootfs.display(),
            profile = self.profile_dir().display(),
        )
    }

    pub fn render_fstab(&self) -> String {
        let mut fstab = String::from(
            "# <file system> <mount point> <type> <options> <dump> <pass>\n\
             /proc /proc none rw,bind 0 0\n\
             /sys /sys none rw,bind 0 0\n\
             /dev/pts /dev/pts none rw,bind 0 0\n\
             tmpfs /dev/shm tmpfs defaults 0 0\n",
        );
        fstab.push_str(&format!(
            "{} {} none rw,bind 0 0\n",
            self.downloads.display(),
            SESSION_DOWNLOADS
        ));
        fstab.push_str(&format!(
            "{} {} none rw,bind 0 0\n",
            self.workdir.display(),
            SESSION_HOME
        ));
        fstab
    }

    /// Write all configuration files.
    pub fn write_files(&self) -> Result<()> {
        write_atomic(&self.chroot_file(), &self.render_chroot())?;
        let profile = self.profile_dir();
        write_atomic(&profile.join("fstab"), &self.render_fstab())?;
        write_atomic(&profile.join("copyfiles"), "/etc/resolv.conf\n")?;
        write_atomic(
            &profile.join("nssdatabases"),
            "passwd\nshadow\ngroup\ngshadow\n",
        )?;
        Ok(())
    }

    /// Remove everything [`Self::write_files`] created. Missing files are fine.
    pub fn remove_files(&self) -> Result<()> {
        let chroot_file = self.chroot_file();
        match fs::remove_file(&chroot_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("removing chroot definition '{}'", chroot_file.display())
                })
            }
        }

        let profile = self.profile_dir();
        if profile.exists() {
            fs::remove_dir_all(&profile)
                .with_context(|| format!("removing schroot profile '{}'", profile.display()))?;
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("'{}' has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating config directory '{}'", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("config");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = parent.join(format!(".{file_name}.{}-{nanos}.tmp", std::process::id()));

    fs::write(&tmp, contents).with_context(|| format!("writing '{}'", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e)
            .with_context(|| format!("renaming '{}' -> '{}'", tmp.display(), path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Proxies;
    use tempfile::TempDir;

    fn environment(root: &Path) -> SessionEnvironment {
        SessionEnvironment {
            chroot: "isar-debian-bookworm-amd64".into(),
            rootfs: root.join("rootfs"),
            conf_dir: root.join("schroot"),
            user: "builder".into(),
            downloads: root.join("downloads"),
            workdir: root.join("work"),
            proxies: Proxies::default(),
        }
    }

    #[test]
    fn test_write_files_layout() {
        let temp = TempDir::new().unwrap();
        let env = environment(temp.path());
        env.write_files().unwrap();

        let chroot = fs::read_to_string(env.chroot_file()).unwrap();
        assert!(chroot.starts_with("[isar-debian-bookworm-amd64]\n"));
        assert!(chroot.contains(&format!("directory={}", temp.path().join("rootfs").display())));
        assert!(chroot.contains("root-users=builder"));

        let fstab = fs::read_to_string(env.profile_dir().join("fstab")).unwrap();
        assert!(fstab.contains(&format!(
            "{} /downloads none rw,bind 0 0",
            temp.path().join("downloads").display()
        )));
        assert!(fstab.contains(&format!(
            "{} /home/builder none rw,bind 0 0",
            temp.path().join("work").display()
        )));
        assert!(env.profile_dir().join("nssdatabases").is_file());
    }

    #[test]
    fn test_write_files_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let env = environment(temp.path());
        env.write_files().unwrap();
        let first = fs::read(env.chroot_file()).unwrap();
        env.write_files().unwrap();
        let second = fs::read(env.chroot_file()).unwrap();
        assert_eq!(first, second);

        let leftovers: Vec<_> = fs::read_dir(env.chroot_file().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_files_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let env = environment(temp.path());
        env.remove_files().unwrap();

        env.write_files().unwrap();
        env.remove_files().unwrap();
        assert!(!env.chroot_file().exists());
        assert!(!env.profile_dir().exists());
    }
}
