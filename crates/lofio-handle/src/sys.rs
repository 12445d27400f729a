//! The platform primitive layer.
//!
//! Everything the core needs from the operating system goes through the
//! [`FileOps`] trait: descriptor duplication, close, durability flushes,
//! status-flag changes, path retrieval, and the directory-relative
//! lookup/rename/unlink family. The retry loops and caching mapping live
//! above this seam; [`SystemFileOps`] supplies the libc implementation and
//! [`MockFileOps`] an instrumented in-memory one for tests.
//!
//! Every directory-relative primitive takes an open directory descriptor,
//! never a path string, so renames of ancestor directories cannot redirect
//! the call mid-flight.

use std::collections::HashMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::caching::{KernelCacheRequest, SyncWrites};
use crate::error::{HandleError, HandleResult};
use crate::handle::{Creation, OpenMode};

/// Which durability barrier a flush asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushKind {
    /// Data plus all metadata.
    DataAndMetadata,
    /// Data plus only the metadata needed to read it back.
    DataOnly,
}

/// The platform syscall surface the handle core is written against.
///
/// Platforms with race-free rename/unlink-by-handle primitives implement
/// `rename_at`/`unlink_at` in terms of those and never need the inode
/// re-verification performed above this trait; the POSIX implementation
/// here exposes only the directory-relative forms.
pub trait FileOps: Send + Sync + std::fmt::Debug {
    /// Opens a file, combining access mode, creation disposition and the
    /// kernel cache request into the platform's open flags.
    fn open_file(
        &self,
        path: &Path,
        mode: OpenMode,
        creation: Creation,
        cache: &KernelCacheRequest,
    ) -> HandleResult<RawFd>;

    /// Opens a directory for lookups and directory-relative operations.
    fn open_directory(&self, path: &Path) -> HandleResult<RawFd>;

    /// Duplicates a descriptor. The duplicate shares the open file
    /// description, so status flags carry over.
    fn duplicate(&self, fd: RawFd) -> HandleResult<RawFd>;

    /// Closes a descriptor.
    fn close(&self, fd: RawFd) -> HandleResult<()>;

    /// Issues a durability flush on a descriptor.
    fn flush(&self, fd: RawFd, kind: FlushKind) -> HandleResult<()>;

    /// Atomically sets or clears the append-only status flag.
    fn set_append(&self, fd: RawFd, enable: bool) -> HandleResult<()>;

    /// Clears the synchronous-write and direct-I/O status flags, then
    /// sets the subset the request asks for.
    fn apply_cache_request(&self, fd: RawFd, request: &KernelCacheRequest) -> HandleResult<()>;

    /// The path currently binding a descriptor.
    ///
    /// Returns an empty path, not an error, when the kernel reports the
    /// entry as deleted or no longer resolvable. Expensive; always
    /// allocates.
    fn current_path(&self, fd: RawFd) -> HandleResult<PathBuf>;

    /// The `(device, inode)` identity of an open descriptor.
    fn stat_inode(&self, fd: RawFd) -> HandleResult<(u64, u64)>;

    /// The `(device, inode)` identity of a name within an open directory,
    /// without following a final symlink.
    fn stat_inode_at(&self, dirfd: RawFd, name: &OsStr) -> HandleResult<(u64, u64)>;

    /// Renames `old_name` in `old_dirfd` to `new_path` relative to
    /// `new_dirfd` (the working directory when `None`).
    ///
    /// `atomic_replace` silently replaces any destination entry. The
    /// fail-if-exists form is atomic where the kernel offers it; on older
    /// kernels it degrades to a link-then-unlink sequence that transiently
    /// binds both names to the inode.
    fn rename_at(
        &self,
        old_dirfd: RawFd,
        old_name: &OsStr,
        new_dirfd: Option<RawFd>,
        new_path: &Path,
        atomic_replace: bool,
    ) -> HandleResult<()>;

    /// Removes `name` from an open directory.
    fn unlink_at(&self, dirfd: RawFd, name: &OsStr, remove_directory: bool) -> HandleResult<()>;
}

/// The shared live-syscall implementation.
pub fn system_ops() -> Arc<dyn FileOps> {
    static OPS: OnceLock<Arc<SystemFileOps>> = OnceLock::new();
    OPS.get_or_init(|| Arc::new(SystemFileOps)).clone()
}

fn cstr(bytes: &OsStr) -> HandleResult<CString> {
    CString::new(bytes.as_bytes()).map_err(|_| HandleError::IllegalByteSequence)
}

#[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "macos"))]
const DATA_SYNC_FLAG: libc::c_int = libc::O_DSYNC;
#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "macos")))]
const DATA_SYNC_FLAG: libc::c_int = libc::O_SYNC;

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
const DIRECT_FLAG: libc::c_int = libc::O_DIRECT;
#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
const DIRECT_FLAG: libc::c_int = 0;

fn sync_flag(level: SyncWrites) -> libc::c_int {
    match level {
        SyncWrites::NotRequired => 0,
        SyncWrites::DataOnly => DATA_SYNC_FLAG,
        SyncWrites::DataAndMetadata => libc::O_SYNC,
    }
}

/// Live implementation of [`FileOps`] over libc.
#[derive(Debug, Default)]
pub struct SystemFileOps;

impl SystemFileOps {
    fn fstat(fd: RawFd) -> HandleResult<libc::stat> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(st)
    }

    // macOS has no O_DIRECT; page-cache bypass is a per-fd toggle.
    #[cfg(target_os = "macos")]
    fn set_nocache(fd: RawFd, enable: bool) -> HandleResult<()> {
        if unsafe { libc::fcntl(fd, libc::F_NOCACHE, libc::c_int::from(enable)) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }
}

impl FileOps for SystemFileOps {
    fn open_file(
        &self,
        path: &Path,
        mode: OpenMode,
        creation: Creation,
        cache: &KernelCacheRequest,
    ) -> HandleResult<RawFd> {
        let mut flags = libc::O_CLOEXEC;
        flags |= match mode {
            OpenMode::Read => libc::O_RDONLY,
            OpenMode::Write => libc::O_RDWR,
            OpenMode::Append => libc::O_RDWR | libc::O_APPEND,
        };
        flags |= match creation {
            Creation::OpenExisting => 0,
            Creation::CreateIfNeeded => libc::O_CREAT,
            Creation::CreateOnly => libc::O_CREAT | libc::O_EXCL,
            Creation::TruncateExisting => libc::O_TRUNC,
        };
        flags |= sync_flag(cache.sync_writes);
        if cache.direct_io {
            flags |= DIRECT_FLAG;
        }

        let c = cstr(path.as_os_str())?;
        let fd = unsafe { libc::open(c.as_ptr(), flags, 0o666 as libc::c_uint) };
        if fd < 0 {
            return Err(HandleError::last_os_error());
        }
        #[cfg(target_os = "macos")]
        if cache.direct_io {
            Self::set_nocache(fd, true)?;
        }
        debug!("opened {} as fd {}", path.display(), fd);
        Ok(fd)
    }

    fn open_directory(&self, path: &Path) -> HandleResult<RawFd> {
        #[cfg(target_os = "linux")]
        let flags = libc::O_PATH | libc::O_DIRECTORY | libc::O_CLOEXEC;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;

        let c = cstr(path.as_os_str())?;
        let fd = unsafe { libc::open(c.as_ptr(), flags) };
        if fd < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(fd)
    }

    fn duplicate(&self, fd: RawFd) -> HandleResult<RawFd> {
        let new = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        if new < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(new)
    }

    fn close(&self, fd: RawFd) -> HandleResult<()> {
        if unsafe { libc::close(fd) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }

    fn flush(&self, fd: RawFd, kind: FlushKind) -> HandleResult<()> {
        let rc = match kind {
            FlushKind::DataAndMetadata => unsafe { libc::fsync(fd) },
            #[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "macos"))]
            FlushKind::DataOnly => unsafe { libc::fdatasync(fd) },
            #[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "macos")))]
            FlushKind::DataOnly => unsafe { libc::fsync(fd) },
        };
        if rc < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }

    fn set_append(&self, fd: RawFd, enable: bool) -> HandleResult<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(HandleError::last_os_error());
        }
        let new = if enable {
            flags | libc::O_APPEND
        } else {
            flags & !libc::O_APPEND
        };
        if new != flags && unsafe { libc::fcntl(fd, libc::F_SETFL, new) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }

    fn apply_cache_request(&self, fd: RawFd, request: &KernelCacheRequest) -> HandleResult<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(HandleError::last_os_error());
        }
        // Linux accepts O_DIRECT changes here but silently ignores O_SYNC
        // and O_DSYNC ones; callers wanting sync writes from the start
        // must open with the mode rather than mutate into it.
        let mut new = flags & !(libc::O_SYNC | DATA_SYNC_FLAG | DIRECT_FLAG);
        new |= sync_flag(request.sync_writes);
        if request.direct_io {
            new |= DIRECT_FLAG;
        }
        if new != flags && unsafe { libc::fcntl(fd, libc::F_SETFL, new) } < 0 {
            return Err(HandleError::last_os_error());
        }
        #[cfg(target_os = "macos")]
        Self::set_nocache(fd, request.direct_io)?;
        debug!("fd {}: cache request {:?} applied", fd, request);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn current_path(&self, fd: RawFd) -> HandleResult<PathBuf> {
        const DELETED: &[u8] = b" (deleted)";
        let link = format!("/proc/self/fd/{fd}");
        let path = std::fs::read_link(&link).map_err(HandleError::from)?;
        let bytes = path.as_os_str().as_bytes();
        // The kernel appends the marker after an unlink; a leading marker
        // means the whole name was the marker, which is just as gone.
        if bytes.ends_with(DELETED) || bytes.starts_with(DELETED) {
            return Ok(PathBuf::new());
        }
        Ok(path)
    }

    #[cfg(target_os = "macos")]
    fn current_path(&self, fd: RawFd) -> HandleResult<PathBuf> {
        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        if unsafe { libc::fcntl(fd, libc::F_GETPATH, buf.as_mut_ptr()) } < 0 {
            return Err(HandleError::last_os_error());
        }
        let len = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(HandleError::IllegalByteSequence)?;
        let path = PathBuf::from(OsStr::from_bytes(&buf[..len]).to_os_string());

        // The kernel reports the path the descriptor was opened with; it
        // may have been renamed or unlinked since, so re-stat and make
        // sure it still leads to this inode.
        let ours = Self::fstat(fd)?;
        let c = CString::new(&buf[..len]).map_err(|_| HandleError::IllegalByteSequence)?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::lstat(c.as_ptr(), &mut st) } < 0 {
            return Ok(PathBuf::new());
        }
        if st.st_dev != ours.st_dev || st.st_ino != ours.st_ino {
            return Ok(PathBuf::new());
        }
        Ok(path)
    }

    #[cfg(target_os = "freebsd")]
    fn current_path(&self, fd: RawFd) -> HandleResult<PathBuf> {
        // Walk the kernel's per-process descriptor table. Known kernel
        // defect: regular files frequently come back with an empty
        // kf_path, which we report as unsupported rather than guessing.
        let mut mib = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_FILEDESC,
            unsafe { libc::getpid() },
        ];
        let mut len: libc::size_t = 0;
        if unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                std::ptr::null_mut(),
                &mut len,
                std::ptr::null_mut(),
                0,
            )
        } < 0
        {
            return Err(HandleError::last_os_error());
        }
        let mut buf = vec![0u8; len];
        if unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                buf.as_mut_ptr().cast(),
                &mut len,
                std::ptr::null_mut(),
                0,
            )
        } < 0
        {
            return Err(HandleError::last_os_error());
        }

        let mut offset = 0usize;
        while offset + std::mem::size_of::<libc::c_int>() <= len {
            let kf = unsafe { &*(buf.as_ptr().add(offset) as *const libc::kinfo_file) };
            let size = kf.kf_structsize as usize;
            if size == 0 {
                break;
            }
            if kf.kf_fd == fd {
                let path_bytes: &[u8] =
                    unsafe { std::slice::from_raw_parts(kf.kf_path.as_ptr().cast(), kf.kf_path.len()) };
                let end = path_bytes.iter().position(|&b| b == 0).unwrap_or(0);
                if end == 0 {
                    return Err(HandleError::FunctionNotSupported);
                }
                return Ok(PathBuf::from(
                    OsStr::from_bytes(&path_bytes[..end]).to_os_string(),
                ));
            }
            offset += size;
        }
        Err(HandleError::FunctionNotSupported)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "freebsd")))]
    fn current_path(&self, _fd: RawFd) -> HandleResult<PathBuf> {
        Err(HandleError::FunctionNotSupported)
    }

    fn stat_inode(&self, fd: RawFd) -> HandleResult<(u64, u64)> {
        let st = Self::fstat(fd)?;
        Ok((st.st_dev as u64, st.st_ino as u64))
    }

    fn stat_inode_at(&self, dirfd: RawFd, name: &OsStr) -> HandleResult<(u64, u64)> {
        let c = cstr(name)?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstatat(dirfd, c.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok((st.st_dev as u64, st.st_ino as u64))
    }

    fn rename_at(
        &self,
        old_dirfd: RawFd,
        old_name: &OsStr,
        new_dirfd: Option<RawFd>,
        new_path: &Path,
        atomic_replace: bool,
    ) -> HandleResult<()> {
        let old_c = cstr(old_name)?;
        let new_c = cstr(new_path.as_os_str())?;
        let new_dirfd = new_dirfd.unwrap_or(libc::AT_FDCWD);

        if atomic_replace {
            if unsafe { libc::renameat(old_dirfd, old_c.as_ptr(), new_dirfd, new_c.as_ptr()) } < 0 {
                return Err(HandleError::last_os_error());
            }
            return Ok(());
        }

        #[cfg(target_os = "linux")]
        {
            let rc = unsafe {
                libc::renameat2(
                    old_dirfd,
                    old_c.as_ptr(),
                    new_dirfd,
                    new_c.as_ptr(),
                    libc::RENAME_NOREPLACE as libc::c_uint,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = HandleError::last_os_error();
            if !err.is_errno(libc::EINVAL) && !err.is_errno(libc::ENOSYS) {
                return Err(err);
            }
            // Pre-3.15 kernels and some filesystems lack the no-replace
            // form; fall through to the two-step sequence.
        }

        // Not atomic: both names refer to the inode until the unlink.
        if unsafe { libc::linkat(old_dirfd, old_c.as_ptr(), new_dirfd, new_c.as_ptr(), 0) } < 0 {
            return Err(HandleError::last_os_error());
        }
        if unsafe { libc::unlinkat(old_dirfd, old_c.as_ptr(), 0) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }

    fn unlink_at(&self, dirfd: RawFd, name: &OsStr, remove_directory: bool) -> HandleResult<()> {
        let c = cstr(name)?;
        let flags = if remove_directory {
            libc::AT_REMOVEDIR
        } else {
            0
        };
        if unsafe { libc::unlinkat(dirfd, c.as_ptr(), flags) } < 0 {
            return Err(HandleError::last_os_error());
        }
        Ok(())
    }
}

/// Per-operation counters kept by [`MockFileOps`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOpsStats {
    /// Files and directories opened.
    pub opens: u64,
    /// Descriptors duplicated.
    pub duplicates: u64,
    /// Descriptors closed.
    pub closes: u64,
    /// Durability flushes issued.
    pub flushes: u64,
    /// Append-only toggles applied.
    pub append_changes: u64,
    /// Cache requests applied.
    pub cache_changes: u64,
    /// Renames performed.
    pub renames: u64,
    /// Unlinks performed.
    pub unlinks: u64,
}

#[derive(Debug, Clone)]
struct MockFd {
    path: PathBuf,
    dev: u64,
    ino: u64,
    append: bool,
}

#[derive(Debug)]
struct MockState {
    stats: FileOpsStats,
    next_fd: RawFd,
    next_inode: u64,
    fds: HashMap<RawFd, MockFd>,
    entries: HashMap<OsString, (u64, u64)>,
    last_cache_request: Option<KernelCacheRequest>,
    fail_flushes: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            stats: FileOpsStats::default(),
            next_fd: 1000,
            next_inode: 1,
            fds: HashMap::new(),
            entries: HashMap::new(),
            last_cache_request: None,
            fail_flushes: false,
        }
    }
}

/// In-memory [`FileOps`] implementation that counts every primitive it is
/// asked for. Lets tests assert, for instance, that exactly one flush was
/// issued on the way to a close.
#[derive(Debug, Default)]
pub struct MockFileOps {
    state: Mutex<MockState>,
}

impl MockFileOps {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> FileOpsStats {
        self.state.lock().map(|s| s.stats.clone()).unwrap_or_default()
    }

    /// Plants a directory entry visible to `stat_inode_at`.
    pub fn set_entry(&self, name: &OsStr, dev: u64, ino: u64) {
        if let Ok(mut s) = self.state.lock() {
            s.entries.insert(name.to_os_string(), (dev, ino));
        }
    }

    /// The most recent cache request applied through the mock.
    pub fn last_cache_request(&self) -> Option<KernelCacheRequest> {
        self.state.lock().ok().and_then(|s| s.last_cache_request)
    }

    /// Makes every subsequent flush fail with `EIO`.
    pub fn fail_flushes(&self, fail: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_flushes = fail;
        }
    }

    /// True if the mock believes the descriptor is in append mode.
    pub fn is_append(&self, fd: RawFd) -> bool {
        self.state
            .lock()
            .map(|s| s.fds.get(&fd).map(|f| f.append).unwrap_or(false))
            .unwrap_or(false)
    }

    /// True if the mock believes the descriptor is open.
    pub fn is_open(&self, fd: RawFd) -> bool {
        self.state
            .lock()
            .map(|s| s.fds.contains_key(&fd))
            .unwrap_or(false)
    }

    fn alloc(state: &mut MockState, path: &Path) -> RawFd {
        let fd = state.next_fd;
        state.next_fd += 1;
        let leaf = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let (dev, ino) = match state.entries.get(&leaf) {
            Some(&id) => id,
            None => {
                let ino = state.next_inode;
                state.next_inode += 1;
                state.entries.insert(leaf, (1, ino));
                (1, ino)
            }
        };
        state.fds.insert(
            fd,
            MockFd {
                path: path.to_path_buf(),
                dev,
                ino,
                append: false,
            },
        );
        fd
    }

    fn locked(&self) -> HandleResult<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| HandleError::from_errno(libc::EIO))
    }
}

impl FileOps for MockFileOps {
    fn open_file(
        &self,
        path: &Path,
        _mode: OpenMode,
        _creation: Creation,
        _cache: &KernelCacheRequest,
    ) -> HandleResult<RawFd> {
        let mut s = self.locked()?;
        s.stats.opens += 1;
        Ok(Self::alloc(&mut s, path))
    }

    fn open_directory(&self, path: &Path) -> HandleResult<RawFd> {
        let mut s = self.locked()?;
        s.stats.opens += 1;
        Ok(Self::alloc(&mut s, path))
    }

    fn duplicate(&self, fd: RawFd) -> HandleResult<RawFd> {
        let mut s = self.locked()?;
        let entry = s
            .fds
            .get(&fd)
            .cloned()
            .ok_or(HandleError::from_errno(libc::EBADF))?;
        s.stats.duplicates += 1;
        let new = s.next_fd;
        s.next_fd += 1;
        s.fds.insert(new, entry);
        Ok(new)
    }

    fn close(&self, fd: RawFd) -> HandleResult<()> {
        let mut s = self.locked()?;
        if s.fds.remove(&fd).is_none() {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        s.stats.closes += 1;
        Ok(())
    }

    fn flush(&self, fd: RawFd, _kind: FlushKind) -> HandleResult<()> {
        let mut s = self.locked()?;
        if !s.fds.contains_key(&fd) {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        if s.fail_flushes {
            return Err(HandleError::from_errno(libc::EIO));
        }
        s.stats.flushes += 1;
        Ok(())
    }

    fn set_append(&self, fd: RawFd, enable: bool) -> HandleResult<()> {
        let mut s = self.locked()?;
        s.stats.append_changes += 1;
        match s.fds.get_mut(&fd) {
            Some(f) => {
                f.append = enable;
                Ok(())
            }
            None => Err(HandleError::from_errno(libc::EBADF)),
        }
    }

    fn apply_cache_request(&self, fd: RawFd, request: &KernelCacheRequest) -> HandleResult<()> {
        let mut s = self.locked()?;
        if !s.fds.contains_key(&fd) {
            return Err(HandleError::from_errno(libc::EBADF));
        }
        s.stats.cache_changes += 1;
        s.last_cache_request = Some(*request);
        Ok(())
    }

    fn current_path(&self, fd: RawFd) -> HandleResult<PathBuf> {
        let s = self.locked()?;
        s.fds
            .get(&fd)
            .map(|f| f.path.clone())
            .ok_or(HandleError::from_errno(libc::EBADF))
    }

    fn stat_inode(&self, fd: RawFd) -> HandleResult<(u64, u64)> {
        let s = self.locked()?;
        s.fds
            .get(&fd)
            .map(|f| (f.dev, f.ino))
            .ok_or(HandleError::from_errno(libc::EBADF))
    }

    fn stat_inode_at(&self, _dirfd: RawFd, name: &OsStr) -> HandleResult<(u64, u64)> {
        let s = self.locked()?;
        s.entries
            .get(name)
            .copied()
            .ok_or(HandleError::from_errno(libc::ENOENT))
    }

    fn rename_at(
        &self,
        _old_dirfd: RawFd,
        old_name: &OsStr,
        _new_dirfd: Option<RawFd>,
        new_path: &Path,
        atomic_replace: bool,
    ) -> HandleResult<()> {
        let mut s = self.locked()?;
        let new_leaf = new_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        if !atomic_replace && s.entries.contains_key(&new_leaf) {
            return Err(HandleError::from_errno(libc::EEXIST));
        }
        let id = s
            .entries
            .remove(old_name)
            .ok_or(HandleError::from_errno(libc::ENOENT))?;
        s.entries.insert(new_leaf.clone(), id);
        for f in s.fds.values_mut() {
            if f.path.file_name() == Some(old_name) {
                f.path.set_file_name(&new_leaf);
            }
        }
        s.stats.renames += 1;
        Ok(())
    }

    fn unlink_at(&self, _dirfd: RawFd, name: &OsStr, _remove_directory: bool) -> HandleResult<()> {
        let mut s = self.locked()?;
        if s.entries.remove(name).is_none() {
            return Err(HandleError::from_errno(libc::ENOENT));
        }
        s.stats.unlinks += 1;
        Ok(())
    }
}
