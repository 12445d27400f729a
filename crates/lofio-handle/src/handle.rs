//! The owning handle over an OS resource.
//!
//! A [`Handle`] pairs a [`NativeHandle`] with its caching mode and open
//! flags and manages the resource's whole lifetime: cloning, attribute
//! changes, path retrieval and close. A handle is not internally
//! synchronised; concurrent mutation of one handle from several threads is
//! the caller's bug. Transfer between threads is by move.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::caching::Caching;
use crate::error::{HandleError, HandleResult};
use crate::native::{Behaviour, NativeHandle};
use crate::sys::{system_ops, FileOps, FlushKind};

/// Access requested when opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OpenMode {
    /// Read-only access.
    #[default]
    Read,
    /// Read and write access.
    Write,
    /// Read and write access with all writes going to the end.
    Append,
}

impl OpenMode {
    /// True if this mode permits writing.
    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Append)
    }
}

/// What to do about the file's existence when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Creation {
    /// Fail unless the file already exists.
    #[default]
    OpenExisting,
    /// Create the file if it does not exist.
    CreateIfNeeded,
    /// Fail if the file already exists.
    CreateOnly,
    /// Open an existing file and discard its contents.
    TruncateExisting,
}

/// Open-time policy flags for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct HandleFlags(u32);

impl HandleFlags {
    /// No flags.
    pub const NONE: HandleFlags = HandleFlags(0);
    /// Skip the inode re-verification normally performed before
    /// relink and unlink. Faster, but a concurrent rename can make
    /// those operations act on the wrong entry.
    pub const DISABLE_SAFETY_UNLINKS: HandleFlags = HandleFlags(1 << 0);
    /// The handle will be registered with an I/O multiplexer.
    pub const MULTIPLEXABLE: HandleFlags = HandleFlags(1 << 1);
    /// Unlink the entry the first time the handle is closed.
    pub const UNLINK_ON_FIRST_CLOSE: HandleFlags = HandleFlags(1 << 2);
    /// On platforms without native POSIX unlink semantics, suppress the
    /// rename-to-random-name emulation.
    pub const WIN_DISABLE_UNLINK_EMULATION: HandleFlags = HandleFlags(1 << 3);

    /// True if every bit of `other` is set.
    pub fn contains(self, other: HandleFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// The raw bit pattern.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for HandleFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        HandleFlags(self.0 | rhs.0)
    }
}

/// An owning handle to an open OS resource.
///
/// A non-empty handle refers to a live resource until [`close`](Handle::close)
/// succeeds or the handle is dropped. Dropping a handle whose close fails
/// terminates the process: the alternative is silently leaking a kernel
/// resource. An explicit `close` instead returns the error and leaves the
/// handle non-empty so the caller can retry.
#[derive(Debug)]
pub struct Handle {
    native: NativeHandle,
    caching: Caching,
    flags: HandleFlags,
    ops: Arc<dyn FileOps>,
}

impl Handle {
    /// Takes ownership of an already-open native handle.
    pub fn from_native(native: NativeHandle, caching: Caching, flags: HandleFlags) -> Self {
        Self::from_native_with_ops(native, caching, flags, system_ops())
    }

    /// Takes ownership of a native handle, routing syscalls through the
    /// given primitive layer.
    pub fn from_native_with_ops(
        native: NativeHandle,
        caching: Caching,
        flags: HandleFlags,
        ops: Arc<dyn FileOps>,
    ) -> Self {
        Self {
            native,
            caching,
            flags,
            ops,
        }
    }

    pub(crate) fn ops(&self) -> &Arc<dyn FileOps> {
        &self.ops
    }

    /// Closes the handle.
    ///
    /// Closing an empty handle is a successful no-op. When the caching
    /// mode issues safety fsyncs, a durability flush precedes the close.
    /// On failure of either step the handle is left non-empty so the
    /// caller can retry.
    pub fn close(&mut self) -> HandleResult<()> {
        if !self.native.is_valid() {
            return Ok(());
        }
        if self.are_safety_fsyncs_issued() && self.is_writable() {
            self.ops.flush(self.native.fd(), FlushKind::DataAndMetadata)?;
        }
        self.ops.close(self.native.fd())?;
        let fd = self.native.release();
        debug!("closed fd {}", fd);
        Ok(())
    }

    /// Duplicates the OS handle, producing a second independently-owned
    /// handle with the same caching mode, flags and behaviour.
    pub fn try_clone(&self) -> HandleResult<Handle> {
        if !self.native.is_valid() {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        let fd = self.ops.duplicate(self.native.fd())?;
        Ok(Handle {
            native: NativeHandle::new(fd, self.native.behaviour()),
            caching: self.caching,
            flags: self.flags,
            ops: Arc::clone(&self.ops),
        })
    }

    /// The path currently binding this handle.
    ///
    /// An unlinked handle yields an empty path, not an error. Expensive;
    /// always allocates.
    pub fn current_path(&self) -> HandleResult<PathBuf> {
        if !self.native.is_valid() {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        self.ops.current_path(self.native.fd())
    }

    /// Atomically sets or clears append-only mode on the open handle.
    pub fn set_append_only(&mut self, enable: bool) -> HandleResult<()> {
        if !self.native.is_valid() {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        self.ops.set_append(self.native.fd(), enable)?;
        self.native.behaviour_mut().set(Behaviour::APPEND_ONLY, enable);
        Ok(())
    }

    /// Changes the kernel caching mode of the open handle.
    ///
    /// The synchronous-write and direct-I/O attributes are cleared, then
    /// the subset the new mode requires is set. `Caching::Unchanged`
    /// therefore leaves the handle with everything cleared while keeping
    /// the stored mode and cache behaviour bits as they were.
    pub fn set_kernel_caching(&mut self, mode: Caching) -> HandleResult<()> {
        if !self.native.is_valid() {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        let request = mode.kernel_request();
        self.ops.apply_cache_request(self.native.fd(), &request)?;
        self.native
            .behaviour_mut()
            .set(Behaviour::ALIGNED_IO, request.aligned_io);
        if mode != Caching::Unchanged {
            self.native.behaviour_mut().remove(Behaviour::CACHE_MASK);
            self.native.behaviour_mut().insert(mode.behaviour_bits());
            self.caching = mode;
        }
        debug!("fd {}: caching now {:?}", self.native.fd(), self.caching);
        Ok(())
    }

    /// True if this handle refers to a live OS resource.
    pub fn is_valid(&self) -> bool {
        self.native.is_valid()
    }

    /// The native handle.
    pub fn native(&self) -> &NativeHandle {
        &self.native
    }

    pub(crate) fn native_mut(&mut self) -> &mut NativeHandle {
        &mut self.native
    }

    /// Relinquishes ownership of the native handle, leaving this handle
    /// empty. The caller becomes responsible for closing it.
    pub fn release(&mut self) -> NativeHandle {
        self.native.take()
    }

    /// The caching mode the handle currently reports.
    pub fn caching(&self) -> Caching {
        self.caching
    }

    /// The open-time policy flags.
    pub fn flags(&self) -> HandleFlags {
        self.flags
    }

    /// True if closing this handle issues a durability flush first.
    pub fn are_safety_fsyncs_issued(&self) -> bool {
        self.caching.safety_fsyncs_issued()
    }

    /// True if reads are served from the kernel cache.
    pub fn are_reads_cached(&self) -> bool {
        self.native.behaviour().contains(Behaviour::CACHE_READS)
    }

    /// True if writes are buffered in the kernel cache.
    pub fn are_writes_cached(&self) -> bool {
        self.native.behaviour().contains(Behaviour::CACHE_WRITES)
    }

    /// True if the handle is readable.
    pub fn is_readable(&self) -> bool {
        self.native.behaviour().contains(Behaviour::READABLE)
    }

    /// True if the handle is writable.
    pub fn is_writable(&self) -> bool {
        self.native.behaviour().contains(Behaviour::WRITABLE)
    }

    /// True if the handle is append-only.
    pub fn is_append_only(&self) -> bool {
        self.native.behaviour().contains(Behaviour::APPEND_ONLY)
    }

    /// True if the handle is nonblocking.
    pub fn is_nonblocking(&self) -> bool {
        self.native.behaviour().contains(Behaviour::NONBLOCKING)
    }

    /// True if I/O through this handle must be sector aligned.
    pub fn requires_aligned_io(&self) -> bool {
        self.native.behaviour().contains(Behaviour::ALIGNED_IO)
    }

    /// True if this is a regular file.
    pub fn is_regular(&self) -> bool {
        self.native.behaviour().contains(Behaviour::FILE)
    }

    /// True if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.native.behaviour().contains(Behaviour::DIRECTORY)
    }

    /// True if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.native.behaviour().contains(Behaviour::SYMLINK)
    }

    /// True if this is a pipe.
    pub fn is_pipe(&self) -> bool {
        self.native.behaviour().contains(Behaviour::PIPE)
    }

    /// True if this is a socket.
    pub fn is_socket(&self) -> bool {
        self.native.behaviour().contains(Behaviour::SOCKET)
    }

    /// True if this is an I/O readiness multiplexer.
    pub fn is_multiplexer(&self) -> bool {
        self.native.behaviour().contains(Behaviour::MULTIPLEXER)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.native.is_valid() {
            return;
        }
        if let Err(e) = self.close() {
            // A handle we cannot close is a kernel resource leaked for the
            // rest of the process lifetime.
            tracing::error!(
                "failed to close fd {} during teardown: {}",
                self.native.fd(),
                e
            );
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::MockFileOps;
    use std::path::Path;

    fn mock_handle(ops: &Arc<MockFileOps>, caching: Caching) -> Handle {
        let fd = ops
            .open_file(
                Path::new("/t/file"),
                OpenMode::Write,
                Creation::CreateIfNeeded,
                &caching.kernel_request(),
            )
            .unwrap();
        let behaviour = Behaviour::FILE
            | Behaviour::READABLE
            | Behaviour::WRITABLE
            | Behaviour::SEEKABLE
            | caching.behaviour_bits();
        let ops: Arc<dyn FileOps> = Arc::clone(ops) as Arc<dyn FileOps>;
        Handle::from_native_with_ops(NativeHandle::new(fd, behaviour), caching, HandleFlags::NONE, ops)
    }

    #[test]
    fn test_close_empties_and_is_idempotent() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        assert!(h.is_valid());

        h.close().unwrap();
        assert!(!h.is_valid());

        h.close().unwrap();
        assert_eq!(ops.stats().closes, 1);
    }

    #[test]
    fn test_safety_fsyncs_flush_once_at_close() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::SafetyFsyncs);
        assert!(h.are_safety_fsyncs_issued());

        h.close().unwrap();
        let stats = ops.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.closes, 1);
    }

    #[test]
    fn test_plain_close_does_not_flush() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        h.close().unwrap();
        assert_eq!(ops.stats().flushes, 0);
    }

    #[test]
    fn test_failed_flush_leaves_handle_open_for_retry() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::SafetyFsyncs);

        ops.fail_flushes(true);
        let err = h.close().unwrap_err();
        assert!(err.is_errno(libc::EIO));
        assert!(h.is_valid());

        ops.fail_flushes(false);
        h.close().unwrap();
        assert!(!h.is_valid());
    }

    #[test]
    fn test_try_clone_copies_state() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        let mut dup = h.try_clone().unwrap();

        assert!(dup.is_valid());
        assert_ne!(h.native().fd(), dup.native().fd());
        assert_eq!(h.native().behaviour(), dup.native().behaviour());
        assert_eq!(h.caching(), dup.caching());

        h.close().unwrap();
        assert!(dup.is_valid());
        assert!(ops.is_open(dup.native().fd()));
        assert!(ops.stat_inode(dup.native().fd()).is_ok());
        dup.close().unwrap();
        assert_eq!(ops.stats().closes, 2);
    }

    #[test]
    fn test_try_clone_of_empty_handle_fails() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        h.close().unwrap();
        assert!(h.try_clone().unwrap_err().is_errno(libc::EBADF));
    }

    #[test]
    fn test_set_append_only_toggles_behaviour() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        let original = h.native().behaviour();

        h.set_append_only(true).unwrap();
        assert!(h.is_append_only());

        h.set_append_only(false).unwrap();
        assert!(!h.is_append_only());
        assert_eq!(h.native().behaviour(), original);
        assert_eq!(ops.stats().append_changes, 2);
        h.close().unwrap();
    }

    #[test]
    fn test_set_kernel_caching_none_requires_alignment() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);

        h.set_kernel_caching(Caching::None).unwrap();
        assert!(h.requires_aligned_io());
        assert!(!h.are_reads_cached());
        assert!(!h.are_writes_cached());
        assert_eq!(h.caching(), Caching::None);

        let req = ops.last_cache_request().unwrap();
        assert!(req.direct_io);
        h.close().unwrap();
    }

    #[test]
    fn test_set_kernel_caching_is_idempotent() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);

        h.set_kernel_caching(Caching::Reads).unwrap();
        let behaviour = h.native().behaviour();
        let caching = h.caching();
        let request = ops.last_cache_request();

        h.set_kernel_caching(Caching::Reads).unwrap();
        assert_eq!(h.native().behaviour(), behaviour);
        assert_eq!(h.caching(), caching);
        assert_eq!(ops.last_cache_request(), request);
        h.close().unwrap();
    }

    #[test]
    fn test_set_kernel_caching_unchanged_preserves_mode() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        assert!(h.are_reads_cached());

        h.set_kernel_caching(Caching::Unchanged).unwrap();
        assert_eq!(h.caching(), Caching::All);
        assert!(h.are_reads_cached());
        assert!(!h.requires_aligned_io());
        h.close().unwrap();
    }

    #[test]
    fn test_release_transfers_ownership() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        let native = h.release();
        assert!(!h.is_valid());
        drop(h);
        assert_eq!(ops.stats().closes, 0);

        ops.close(native.fd()).unwrap();
    }

    #[test]
    fn test_drop_closes_handle() {
        let ops = Arc::new(MockFileOps::new());
        let h = mock_handle(&ops, Caching::All);
        let fd = h.native().fd();
        drop(h);
        assert_eq!(ops.stats().closes, 1);
        assert!(!ops.is_open(fd));
    }

    #[test]
    fn test_current_path_reports_binding() {
        let ops = Arc::new(MockFileOps::new());
        let mut h = mock_handle(&ops, Caching::All);
        assert_eq!(h.current_path().unwrap(), PathBuf::from("/t/file"));
        h.close().unwrap();
        assert!(h.current_path().unwrap_err().is_errno(libc::EBADF));
    }

    #[test]
    fn test_handle_flags_bits() {
        let f = HandleFlags::DISABLE_SAFETY_UNLINKS | HandleFlags::UNLINK_ON_FIRST_CLOSE;
        assert!(f.contains(HandleFlags::DISABLE_SAFETY_UNLINKS));
        assert!(f.contains(HandleFlags::UNLINK_ON_FIRST_CLOSE));
        assert!(!f.contains(HandleFlags::MULTIPLEXABLE));
        assert_eq!(HandleFlags::NONE.bits(), 0);
    }

    #[test]
    fn test_open_mode_writability() {
        assert!(!OpenMode::Read.is_writable());
        assert!(OpenMode::Write.is_writable());
        assert!(OpenMode::Append.is_writable());
    }
}
