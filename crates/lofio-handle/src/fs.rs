//! Handles to filesystem entries with a stable `(device, inode)` identity.
//!
//! POSIX only offers path-indirect rename and unlink, and paths race with
//! every other process on the machine. An [`FsHandle`] therefore samples
//! the `(device, inode)` pair at open and re-verifies, immediately before
//! every relink or unlink, that the directory entry it is about to touch
//! still leads to that inode. Verification retries under a caller-supplied
//! [`Deadline`] and gives up with [`HandleError::TimedOut`], so a burst of
//! concurrent renames can delay the operation but never redirect it onto
//! an unrelated file.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::caching::Caching;
use crate::deadline::Deadline;
use crate::error::{HandleError, HandleResult};
use crate::handle::{Creation, Handle, HandleFlags, OpenMode};
use crate::native::{Behaviour, NativeHandle};
use crate::path_handle::PathHandle;
use crate::sys::{system_ops, FileOps};

/// A handle to a filesystem entry, carrying the `(device, inode)` pair
/// sampled when it was opened.
///
/// The identity is read-only after construction: relink renames the entry
/// without changing the inode, and unlink detaches the entry while the
/// handle stays open and usable.
#[derive(Debug)]
pub struct FsHandle {
    handle: Handle,
    devid: u64,
    inode: u64,
}

impl FsHandle {
    /// Opens a filesystem entry.
    ///
    /// Unless [`HandleFlags::DISABLE_SAFETY_UNLINKS`] is set, the entry's
    /// `(device, inode)` identity is sampled from the open descriptor
    /// before this returns.
    pub fn open(
        path: &Path,
        mode: OpenMode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
    ) -> HandleResult<Self> {
        Self::open_with_ops(path, mode, creation, caching, flags, system_ops())
    }

    /// Opens a filesystem entry, routing syscalls through the given
    /// primitive layer.
    pub fn open_with_ops(
        path: &Path,
        mode: OpenMode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
        ops: Arc<dyn FileOps>,
    ) -> HandleResult<Self> {
        let request = caching.kernel_request();
        let fd = ops.open_file(path, mode, creation, &request)?;

        let mut behaviour =
            Behaviour::FILE | Behaviour::SEEKABLE | Behaviour::READABLE | caching.behaviour_bits();
        if mode.is_writable() {
            behaviour.insert(Behaviour::WRITABLE);
        }
        if mode == OpenMode::Append {
            behaviour.insert(Behaviour::APPEND_ONLY);
        }
        if request.aligned_io {
            behaviour.insert(Behaviour::ALIGNED_IO);
        }

        let handle =
            Handle::from_native_with_ops(NativeHandle::new(fd, behaviour), caching, flags, ops);
        let mut fs = FsHandle {
            handle,
            devid: 0,
            inode: 0,
        };
        if !flags.contains(HandleFlags::DISABLE_SAFETY_UNLINKS) {
            fs.fetch_inode()?;
        }
        debug!(
            "opened {} (dev={}, ino={})",
            path.display(),
            fs.devid,
            fs.inode
        );
        Ok(fs)
    }

    /// Re-samples the `(device, inode)` identity from the open
    /// descriptor. Openers call this once at construction.
    pub fn fetch_inode(&mut self) -> HandleResult<()> {
        let (devid, inode) = self.handle.ops().stat_inode(self.handle.native().fd())?;
        self.devid = devid;
        self.inode = inode;
        Ok(())
    }

    /// The device id sampled when the entry was opened.
    pub fn st_dev(&self) -> u64 {
        self.devid
    }

    /// The inode number sampled when the entry was opened. Together with
    /// [`st_dev`](FsHandle::st_dev) this identifies the file system-wide.
    pub fn st_ino(&self) -> u64 {
        self.inode
    }

    /// A system-wide unique identifier: the device id in the high 64 bits,
    /// the inode in the low. Stable across relink; usable as a hash key.
    pub fn unique_id(&self) -> u128 {
        ((self.devid as u128) << 64) | self.inode as u128
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Mutable access to the underlying handle.
    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    /// True if this handle refers to a live OS resource.
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// The path currently binding this handle; empty once the entry has
    /// been unlinked.
    pub fn current_path(&self) -> HandleResult<std::path::PathBuf> {
        self.handle.current_path()
    }

    /// Duplicates the OS handle, producing a second independently-owned
    /// handle to the same inode.
    pub fn try_clone(&self) -> HandleResult<FsHandle> {
        Ok(FsHandle {
            handle: self.handle.try_clone()?,
            devid: self.devid,
            inode: self.inode,
        })
    }

    /// Obtains a handle to the directory currently containing this
    /// entry, verified to hold this handle's inode under `d`.
    ///
    /// Racy by nature: the result can be stale the moment it returns.
    /// The verification loop retries while the containing directory
    /// keeps changing and fails with [`HandleError::TimedOut`] once `d`
    /// expires. Under [`HandleFlags::DISABLE_SAFETY_UNLINKS`] the lookup
    /// and comparison are skipped entirely; with verification enabled
    /// but no identity sampled, this fails with
    /// [`HandleError::OperationNotSupported`]. Expensive: each attempt
    /// retrieves the current path and allocates.
    pub fn parent_path_handle(&self, d: Deadline) -> HandleResult<PathHandle> {
        self.verified_parent(Instant::now(), d).map(|(dir, _)| dir)
    }

    /// Renames this entry to `new_path`, resolved relative to `base` (or
    /// the working directory when `None`).
    ///
    /// With `atomic_replace` any entry already at the destination is
    /// silently replaced. Without it the rename fails if the destination
    /// exists, and on kernels lacking an atomic no-replace rename both
    /// names may briefly refer to this inode. The containing directory
    /// is re-verified against this handle's inode, retrying under `d`.
    pub fn relink(
        &mut self,
        base: Option<&PathHandle>,
        new_path: &Path,
        atomic_replace: bool,
        d: Deadline,
    ) -> HandleResult<()> {
        let begun = Instant::now();
        loop {
            let (dir, leaf) = self.verified_parent(begun, d)?;
            match dir.rename_into(&leaf, base, new_path, atomic_replace) {
                Ok(()) => {
                    debug!(
                        "relinked ino {} from {:?} to {}",
                        self.inode,
                        leaf,
                        new_path.display()
                    );
                    return Ok(());
                }
                // The entry moved between verification and rename; take
                // it from the top.
                Err(e) if e.is_errno(libc::ENOENT) => {
                    if d.expired_since(begun) {
                        return Err(HandleError::TimedOut);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Removes this entry from the directory tree.
    ///
    /// The handle stays open and usable; the inode lives on until the
    /// last handle to it closes. The containing directory is re-verified
    /// against this handle's inode, retrying under `d`.
    pub fn unlink(&mut self, d: Deadline) -> HandleResult<()> {
        let remove_directory = self.handle.is_directory();
        let begun = Instant::now();
        loop {
            let (dir, leaf) = self.verified_parent(begun, d)?;
            match dir.unlink_entry(&leaf, remove_directory) {
                Ok(()) => {
                    debug!("unlinked ino {} ({:?})", self.inode, leaf);
                    return Ok(());
                }
                Err(e) if e.is_errno(libc::ENOENT) => {
                    if d.expired_since(begun) {
                        return Err(HandleError::TimedOut);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Closes the handle, honouring
    /// [`HandleFlags::UNLINK_ON_FIRST_CLOSE`].
    pub fn close(&mut self) -> HandleResult<()> {
        self.unlink_on_first_close();
        self.handle.close()
    }

    fn unlink_on_first_close(&mut self) {
        if !self.handle.is_valid()
            || !self
                .handle
                .flags()
                .contains(HandleFlags::UNLINK_ON_FIRST_CLOSE)
            || self
                .handle
                .native()
                .behaviour()
                .contains(Behaviour::CLOSE_EXECUTED)
        {
            return;
        }
        self.handle
            .native_mut()
            .behaviour_mut()
            .insert(Behaviour::CLOSE_EXECUTED);
        if let Err(e) = self.unlink(Deadline::default()) {
            warn!("unlink on first close of ino {} failed: {}", self.inode, e);
        }
    }

    fn verified_parent(
        &self,
        begun: Instant,
        d: Deadline,
    ) -> HandleResult<(PathHandle, OsString)> {
        let verify = !self
            .handle
            .flags()
            .contains(HandleFlags::DISABLE_SAFETY_UNLINKS);
        // Verification against an unsampled identity can never match.
        if verify && self.devid == 0 && self.inode == 0 {
            return Err(HandleError::OperationNotSupported);
        }
        loop {
            let current = self.handle.current_path()?;
            // An empty path means the entry vanished or was replaced out
            // from under us; it may reappear under another name, so this
            // counts as non-convergence rather than a hard failure.
            if !current.as_os_str().is_empty() {
                if let Some(leaf) = current.file_name() {
                    let leaf = leaf.to_os_string();
                    let parent = current.parent().unwrap_or_else(|| Path::new("/"));
                    match PathHandle::open_with_ops(parent, Arc::clone(self.handle.ops())) {
                        Ok(dir) => {
                            if !verify {
                                return Ok((dir, leaf));
                            }
                            match dir.lookup_inode(&leaf) {
                                Ok((dev, ino)) if dev == self.devid && ino == self.inode => {
                                    return Ok((dir, leaf));
                                }
                                Ok(_) => {}
                                Err(e) if e.is_errno(libc::ENOENT) => {}
                                Err(e) => return Err(e),
                            }
                        }
                        Err(e) if e.is_errno(libc::ENOENT) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            if d.expired_since(begun) {
                warn!(
                    "containing directory of ino {} would not converge, giving up",
                    self.inode
                );
                return Err(HandleError::TimedOut);
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for FsHandle {
    fn drop(&mut self) {
        self.unlink_on_first_close();
    }
}

/// Renames the entry behind an open handle; equivalent to
/// [`FsHandle::relink`].
pub fn relink(
    handle: &mut FsHandle,
    base: Option<&PathHandle>,
    new_path: &Path,
    atomic_replace: bool,
    d: Deadline,
) -> HandleResult<()> {
    handle.relink(base, new_path, atomic_replace, d)
}

/// Removes the entry behind an open handle; equivalent to
/// [`FsHandle::unlink`].
pub fn unlink(handle: &mut FsHandle, d: Deadline) -> HandleResult<()> {
    handle.unlink(d)
}
