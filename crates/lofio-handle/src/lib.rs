#![warn(missing_docs)]

//! LOFIO handle core: failure-safe ownership of OS file descriptors and
//! race-aware filesystem operations.
//!
//! This crate provides the handle lifecycle layer of LOFIO. A [`Handle`]
//! owns exactly one OS descriptor and manages cloning, kernel caching
//! modes, append-only toggling, current-path retrieval and close. An
//! [`FsHandle`] adds the `(device, inode)` identity of the entry behind
//! the descriptor and uses it to relink and unlink *that specific inode*
//! even while other processes rename things underneath it. All syscalls
//! flow through the [`FileOps`] trait, so the verification and caching
//! logic is testable against an instrumented mock.

pub mod caching;
pub mod deadline;
pub mod error;
pub mod fs;
pub mod handle;
pub mod native;
pub mod path_handle;
pub mod sys;

pub use caching::{Caching, KernelCacheRequest, SyncWrites};
pub use deadline::Deadline;
pub use error::{ErrorCategory, HandleError, HandleResult};
pub use fs::{relink, unlink, FsHandle};
pub use handle::{Creation, Handle, HandleFlags, OpenMode};
pub use native::{Behaviour, NativeHandle};
pub use path_handle::PathHandle;
pub use sys::{system_ops, FileOps, FileOpsStats, FlushKind, MockFileOps, SystemFileOps};
