//! Kernel cache interaction modes.
//!
//! A single [`Caching`] enumeration expresses how much of the kernel page
//! and metadata cache a handle participates in, from fully synchronous
//! direct I/O up to write-back caching with no durability at all.

use serde::{Deserialize, Serialize};

use crate::native::Behaviour;

/// How the kernel is asked to cache a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Caching {
    /// Leave the handle's current kernel flags as they are.
    Unchanged,
    /// No caching whatsoever: synchronous writes plus direct I/O.
    /// I/O must then be sector aligned.
    None,
    /// Only metadata is cached; data goes direct. I/O must be sector
    /// aligned.
    OnlyMetadata,
    /// Reads are cached, writes are written through synchronously.
    Reads,
    /// Reads are cached; writes are data-synchronous, deferring the
    /// metadata not needed to read the data back.
    ReadsAndMetadata,
    /// Full kernel caching, the platform default.
    #[default]
    All,
    /// Full kernel caching, plus a durability flush when the handle
    /// closes.
    SafetyFsyncs,
    /// Full kernel caching with the kernel told the data is disposable.
    Temporary,
}

/// Synchronous-write level requested from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncWrites {
    /// Writes complete when buffered.
    #[default]
    NotRequired,
    /// Writes complete when the data, plus the metadata strictly needed
    /// to read it back, is durable. Platforms without a data-only sync
    /// flag fall back to full synchronisation.
    DataOnly,
    /// Writes complete when data and all metadata are durable.
    DataAndMetadata,
}

/// The platform-neutral flag set a caching mode asks the kernel for.
///
/// The syscall layer translates this into the platform's open or
/// status-flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KernelCacheRequest {
    /// Synchronous-write level.
    pub sync_writes: SyncWrites,
    /// Bypass the kernel page cache entirely.
    pub direct_io: bool,
    /// Whether the resulting handle requires sector-aligned I/O.
    pub aligned_io: bool,
}

impl Caching {
    /// True iff closing a handle in this mode issues a durability flush
    /// first.
    pub fn safety_fsyncs_issued(self) -> bool {
        self == Caching::SafetyFsyncs
    }

    /// The kernel flag set this mode asks for.
    ///
    /// `Unchanged` requests nothing; when applied to an already-open
    /// handle the sync and direct bits are cleared first, so `Unchanged`
    /// results in a clear-only transition.
    pub fn kernel_request(self) -> KernelCacheRequest {
        match self {
            Caching::None => KernelCacheRequest {
                sync_writes: SyncWrites::DataAndMetadata,
                direct_io: true,
                aligned_io: true,
            },
            Caching::OnlyMetadata => KernelCacheRequest {
                sync_writes: SyncWrites::NotRequired,
                direct_io: true,
                aligned_io: true,
            },
            Caching::Reads => KernelCacheRequest {
                sync_writes: SyncWrites::DataAndMetadata,
                direct_io: false,
                aligned_io: false,
            },
            Caching::ReadsAndMetadata => KernelCacheRequest {
                sync_writes: SyncWrites::DataOnly,
                direct_io: false,
                aligned_io: false,
            },
            Caching::Unchanged
            | Caching::All
            | Caching::SafetyFsyncs
            | Caching::Temporary => KernelCacheRequest::default(),
        }
    }

    /// The cache-related behaviour bits a handle in this mode reports.
    pub fn behaviour_bits(self) -> Behaviour {
        match self {
            Caching::Unchanged | Caching::None => Behaviour::NONE,
            Caching::OnlyMetadata => Behaviour::CACHE_METADATA,
            Caching::Reads => Behaviour::CACHE_READS,
            Caching::ReadsAndMetadata => Behaviour::CACHE_READS | Behaviour::CACHE_METADATA,
            Caching::All => {
                Behaviour::CACHE_READS | Behaviour::CACHE_WRITES | Behaviour::CACHE_METADATA
            }
            Caching::SafetyFsyncs => {
                Behaviour::CACHE_READS
                    | Behaviour::CACHE_WRITES
                    | Behaviour::CACHE_METADATA
                    | Behaviour::SAFETY_FSYNCS
            }
            Caching::Temporary => {
                Behaviour::CACHE_READS
                    | Behaviour::CACHE_WRITES
                    | Behaviour::CACHE_METADATA
                    | Behaviour::CACHE_TEMPORARY
            }
        }
    }
}
