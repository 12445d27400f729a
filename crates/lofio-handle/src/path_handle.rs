//! Open directory handles for race-free directory-relative operations.

use std::ffi::OsStr;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;

use crate::caching::Caching;
use crate::error::HandleResult;
use crate::handle::{Handle, HandleFlags};
use crate::native::{Behaviour, NativeHandle};
use crate::sys::{system_ops, FileOps};

/// A handle to an open directory, used purely for lookups and
/// directory-relative rename/unlink.
///
/// Because every operation goes through the held descriptor rather than a
/// path string, a concurrent rename of any ancestor directory cannot
/// redirect it to a different directory.
#[derive(Debug)]
pub struct PathHandle {
    handle: Handle,
}

impl PathHandle {
    /// Opens a directory by path.
    pub fn open(path: &Path) -> HandleResult<Self> {
        Self::open_with_ops(path, system_ops())
    }

    /// Opens a directory by path, routing syscalls through the given
    /// primitive layer.
    pub fn open_with_ops(path: &Path, ops: Arc<dyn FileOps>) -> HandleResult<Self> {
        let fd = ops.open_directory(path)?;
        let behaviour = Behaviour::DIRECTORY | Behaviour::PATH | Behaviour::READABLE;
        Ok(Self {
            handle: Handle::from_native_with_ops(
                NativeHandle::new(fd, behaviour),
                Caching::All,
                HandleFlags::NONE,
                ops,
            ),
        })
    }

    /// The `(device, inode)` identity of `name` within this directory.
    /// A trailing symlink is reported as itself, not followed.
    pub fn lookup_inode(&self, name: &OsStr) -> HandleResult<(u64, u64)> {
        self.handle.ops().stat_inode_at(self.fd(), name)
    }

    /// Renames `old_name` within this directory to `new_path`, resolved
    /// relative to `base` (or the working directory when `base` is
    /// `None`). With `atomic_replace` any existing destination entry is
    /// silently replaced; without it the rename fails if the destination
    /// exists.
    pub fn rename_into(
        &self,
        old_name: &OsStr,
        base: Option<&PathHandle>,
        new_path: &Path,
        atomic_replace: bool,
    ) -> HandleResult<()> {
        self.handle.ops().rename_at(
            self.fd(),
            old_name,
            base.map(PathHandle::fd),
            new_path,
            atomic_replace,
        )
    }

    /// Removes `name` from this directory.
    pub fn unlink_entry(&self, name: &OsStr, remove_directory: bool) -> HandleResult<()> {
        self.handle.ops().unlink_at(self.fd(), name, remove_directory)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Closes the directory handle.
    pub fn close(&mut self) -> HandleResult<()> {
        self.handle.close()
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.handle.native().fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_open_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("entry");
        std::fs::File::create(&file).unwrap();

        let ph = PathHandle::open(dir.path()).unwrap();
        assert!(ph.handle().is_directory());

        let (dev, ino) = ph.lookup_inode(OsStr::new("entry")).unwrap();
        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(dev, meta.dev());
        assert_eq!(ino, meta.ino());
    }

    #[test]
    fn test_lookup_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ph = PathHandle::open(dir.path()).unwrap();
        let err = ph.lookup_inode(OsStr::new("absent")).unwrap_err();
        assert!(err.is_errno(libc::ENOENT));
    }

    #[test]
    fn test_lookup_does_not_follow_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::File::create(&target).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let ph = PathHandle::open(dir.path()).unwrap();
        let (_, link_ino) = ph.lookup_inode(OsStr::new("link")).unwrap();
        let target_ino = std::fs::metadata(&target).unwrap().ino();
        assert_ne!(link_ino, target_ino);
    }

    #[test]
    fn test_rename_within_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("old")).unwrap();

        let ph = PathHandle::open(dir.path()).unwrap();
        ph.rename_into(OsStr::new("old"), Some(&ph), Path::new("new"), true)
            .unwrap();

        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("new").exists());
    }

    #[test]
    fn test_rename_across_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::File::create(dir.path().join("f")).unwrap();

        let src = PathHandle::open(dir.path()).unwrap();
        let dst = PathHandle::open(&sub).unwrap();
        src.rename_into(OsStr::new("f"), Some(&dst), Path::new("f"), true)
            .unwrap();

        assert!(!dir.path().join("f").exists());
        assert!(sub.join("f").exists());
    }

    #[test]
    fn test_unlink_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("f")).unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();

        let ph = PathHandle::open(dir.path()).unwrap();
        ph.unlink_entry(OsStr::new("f"), false).unwrap();
        ph.unlink_entry(OsStr::new("d"), true).unwrap();

        assert!(!dir.path().join("f").exists());
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = PathHandle::open(dir.path()).unwrap();
        ph.close().unwrap();
        ph.close().unwrap();
        assert!(!ph.handle().is_valid());
    }
}
