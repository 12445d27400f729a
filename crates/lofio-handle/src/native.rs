//! The raw OS handle wrapper and its behaviour bitfield.
//!
//! [`NativeHandle`] is a plain owning value type: it never performs a
//! syscall itself. Releasing or closing the descriptor is the job of the
//! owning [`Handle`](crate::handle::Handle).

use std::os::unix::io::RawFd;

use serde::{Deserialize, Serialize};

/// What a native handle is, and how it behaves.
///
/// A handle carries both its disposition (file, directory, socket, ...)
/// and its current kernel-cache interaction bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Behaviour(u32);

impl Behaviour {
    /// No bits set.
    pub const NONE: Behaviour = Behaviour(0);
    /// Handle can be read from.
    pub const READABLE: Behaviour = Behaviour(1 << 0);
    /// Handle can be written to.
    pub const WRITABLE: Behaviour = Behaviour(1 << 1);
    /// All writes go to the end of the file.
    pub const APPEND_ONLY: Behaviour = Behaviour(1 << 2);
    /// Operations on the handle do not block.
    pub const NONBLOCKING: Behaviour = Behaviour(1 << 4);
    /// The handle has a file position that can be moved.
    pub const SEEKABLE: Behaviour = Behaviour(1 << 5);
    /// I/O must be aligned to the device sector size.
    pub const ALIGNED_IO: Behaviour = Behaviour(1 << 6);
    /// A regular file.
    pub const FILE: Behaviour = Behaviour(1 << 8);
    /// A directory.
    pub const DIRECTORY: Behaviour = Behaviour(1 << 9);
    /// A symbolic link.
    pub const SYMLINK: Behaviour = Behaviour(1 << 10);
    /// A pipe or FIFO.
    pub const PIPE: Behaviour = Behaviour(1 << 11);
    /// A socket.
    pub const SOCKET: Behaviour = Behaviour(1 << 12);
    /// An I/O readiness multiplexer (epoll, kqueue).
    pub const MULTIPLEXER: Behaviour = Behaviour(1 << 13);
    /// A path-only handle: usable for lookups, not for byte I/O.
    pub const PATH: Behaviour = Behaviour(1 << 17);
    /// A durability flush is issued before the handle closes.
    pub const SAFETY_FSYNCS: Behaviour = Behaviour(1 << 20);
    /// Metadata is served from the kernel cache.
    pub const CACHE_METADATA: Behaviour = Behaviour(1 << 21);
    /// Reads are served from the kernel cache.
    pub const CACHE_READS: Behaviour = Behaviour(1 << 22);
    /// Writes are buffered in the kernel cache rather than written through.
    pub const CACHE_WRITES: Behaviour = Behaviour(1 << 23);
    /// Writes may never reach storage at all (temporary files).
    pub const CACHE_TEMPORARY: Behaviour = Behaviour(1 << 24);
    /// A subtype's close path has already run for this handle.
    pub const CLOSE_EXECUTED: Behaviour = Behaviour(1 << 31);

    /// All kernel-cache interaction bits, cleared and re-derived whenever
    /// the caching mode changes.
    pub const CACHE_MASK: Behaviour = Behaviour(
        Self::SAFETY_FSYNCS.0
            | Self::CACHE_METADATA.0
            | Self::CACHE_READS.0
            | Self::CACHE_WRITES.0
            | Self::CACHE_TEMPORARY.0,
    );

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: Behaviour) -> bool {
        (self.0 & other.0) == other.0
    }

    /// True if any bit of `other` is set in `self`.
    pub fn intersects(self, other: Behaviour) -> bool {
        (self.0 & other.0) != 0
    }

    /// True if no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Behaviour) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Behaviour) {
        self.0 &= !other.0;
    }

    /// Sets or clears the bits of `other`.
    pub fn set(&mut self, other: Behaviour, enabled: bool) {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// The raw bit pattern.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Behaviour {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Behaviour(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Behaviour {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for Behaviour {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Behaviour(self.0 & rhs.0)
    }
}

/// An owned reference to an OS resource plus its behaviour bits.
///
/// Exactly one owner holds a non-empty `NativeHandle` at a time; transfer
/// is by move, and [`take`](NativeHandle::take) or
/// [`release`](NativeHandle::release) leave the source empty. The type is
/// deliberately inert: closing the descriptor is the owner's job.
#[derive(Debug)]
pub struct NativeHandle {
    fd: RawFd,
    behaviour: Behaviour,
}

impl NativeHandle {
    /// Wraps an already-open descriptor.
    pub fn new(fd: RawFd, behaviour: Behaviour) -> Self {
        Self { fd, behaviour }
    }

    /// An empty handle referring to nothing.
    pub fn empty() -> Self {
        Self {
            fd: -1,
            behaviour: Behaviour::NONE,
        }
    }

    /// True if this handle refers to an OS resource.
    pub fn is_valid(&self) -> bool {
        self.fd >= 0 && !self.behaviour.is_empty()
    }

    /// The raw descriptor, `-1` when empty.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The behaviour bits.
    pub fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    /// Mutable access to the behaviour bits.
    pub fn behaviour_mut(&mut self) -> &mut Behaviour {
        &mut self.behaviour
    }

    /// Relinquishes ownership of the descriptor, leaving this handle
    /// empty. The caller becomes responsible for closing it.
    pub fn release(&mut self) -> RawFd {
        let fd = self.fd;
        self.fd = -1;
        self.behaviour = Behaviour::NONE;
        fd
    }

    /// Moves the handle out, leaving this one empty.
    pub fn take(&mut self) -> NativeHandle {
        std::mem::replace(self, NativeHandle::empty())
    }
}

impl Default for NativeHandle {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behaviour_insert_remove() {
        let mut b = Behaviour::NONE;
        assert!(b.is_empty());

        b.insert(Behaviour::FILE | Behaviour::READABLE);
        assert!(b.contains(Behaviour::FILE));
        assert!(b.contains(Behaviour::READABLE));
        assert!(!b.contains(Behaviour::FILE | Behaviour::WRITABLE));
        assert!(b.intersects(Behaviour::FILE | Behaviour::WRITABLE));

        b.remove(Behaviour::FILE);
        assert!(!b.contains(Behaviour::FILE));
        assert!(b.contains(Behaviour::READABLE));
    }

    #[test]
    fn test_behaviour_set_toggles() {
        let mut b = Behaviour::NONE;
        b.set(Behaviour::APPEND_ONLY, true);
        assert!(b.contains(Behaviour::APPEND_ONLY));
        b.set(Behaviour::APPEND_ONLY, false);
        assert!(!b.contains(Behaviour::APPEND_ONLY));
    }

    #[test]
    fn test_cache_mask_covers_cache_bits() {
        assert!(Behaviour::CACHE_MASK.contains(Behaviour::CACHE_READS));
        assert!(Behaviour::CACHE_MASK.contains(Behaviour::CACHE_WRITES));
        assert!(Behaviour::CACHE_MASK.contains(Behaviour::CACHE_METADATA));
        assert!(Behaviour::CACHE_MASK.contains(Behaviour::CACHE_TEMPORARY));
        assert!(Behaviour::CACHE_MASK.contains(Behaviour::SAFETY_FSYNCS));
        assert!(!Behaviour::CACHE_MASK.intersects(Behaviour::ALIGNED_IO));
    }

    #[test]
    fn test_empty_native_handle_invalid() {
        let h = NativeHandle::empty();
        assert!(!h.is_valid());
        assert_eq!(h.fd(), -1);

        let h = NativeHandle::default();
        assert!(!h.is_valid());
    }

    #[test]
    fn test_handle_without_behaviour_invalid() {
        let h = NativeHandle::new(3, Behaviour::NONE);
        assert!(!h.is_valid());
    }

    #[test]
    fn test_release_empties() {
        let mut h = NativeHandle::new(7, Behaviour::FILE | Behaviour::READABLE);
        assert!(h.is_valid());

        let fd = h.release();
        assert_eq!(fd, 7);
        assert!(!h.is_valid());
        assert_eq!(h.fd(), -1);
        assert!(h.behaviour().is_empty());
    }

    #[test]
    fn test_take_moves_ownership() {
        let mut a = NativeHandle::new(9, Behaviour::DIRECTORY);
        let b = a.take();

        assert!(!a.is_valid());
        assert!(b.is_valid());
        assert_eq!(b.fd(), 9);
        assert!(b.behaviour().contains(Behaviour::DIRECTORY));
    }
}
