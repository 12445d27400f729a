//! Handle lifecycle scenarios over real files.

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use lofio_handle::{
        Caching, Creation, Deadline, FileOps, FsHandle, HandleFlags, MockFileOps, OpenMode,
    };

    use crate::harness::{init_tracing, TestEnv};

    fn open_rw(path: &std::path::Path) -> FsHandle {
        FsHandle::open(
            path,
            OpenMode::Write,
            Creation::OpenExisting,
            Caching::All,
            HandleFlags::NONE,
        )
        .unwrap()
    }

    #[test]
    fn test_close_then_close_again_is_noop() {
        init_tracing();
        let env = TestEnv::new("double_close");
        let path = env.create_file("a");
        let mut f = open_rw(&path);

        f.close().unwrap();
        assert!(!f.is_valid());
        f.close().unwrap();
        assert!(!f.is_valid());
    }

    #[test]
    fn test_clone_survives_original_close() {
        init_tracing();
        let env = TestEnv::new("clone_outlives");
        let path = env.create_file("a");

        let mut original = open_rw(&path);
        let mut clone = original.try_clone().unwrap();
        assert_eq!(clone.unique_id(), original.unique_id());

        original.close().unwrap();

        assert!(clone.is_valid());
        #[cfg(target_os = "linux")]
        assert_eq!(clone.current_path().unwrap(), path);
        clone.close().unwrap();
    }

    #[test]
    fn test_clone_refers_to_same_inode() {
        let env = TestEnv::new("clone_identity");
        let path = env.create_file("a");

        let original = open_rw(&path);
        let clone = original.try_clone().unwrap();

        assert_eq!(original.st_dev(), clone.st_dev());
        assert_eq!(original.st_ino(), clone.st_ino());
        assert_eq!(
            original.handle().native().behaviour(),
            clone.handle().native().behaviour()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_external_rename_is_visible_in_current_path() {
        let env = TestEnv::new("external_rename");
        let path = env.create_file("a");
        let f = open_rw(&path);

        let new_path = env.tempdir().join("b");
        std::fs::rename(&path, &new_path).unwrap();

        assert_eq!(f.current_path().unwrap(), new_path);
    }

    #[test]
    fn test_append_only_toggle_restores_behaviour() {
        let env = TestEnv::new("append_toggle");
        let path = env.create_file("a");
        let mut f = open_rw(&path);
        let original_behaviour = f.handle().native().behaviour();
        let fd = f.handle().native().fd();

        f.handle_mut().set_append_only(true).unwrap();
        assert!(f.handle().is_append_only());
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(flags & libc::O_APPEND, 0);

        f.handle_mut().set_append_only(false).unwrap();
        assert!(!f.handle().is_append_only());
        assert_eq!(f.handle().native().behaviour(), original_behaviour);
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_eq!(flags & libc::O_APPEND, 0);
    }

    #[test]
    fn test_set_kernel_caching_is_idempotent_on_real_files() {
        let env = TestEnv::new("caching_idempotent");
        let path = env.create_file("a");
        let mut f = open_rw(&path);

        for mode in [Caching::Reads, Caching::All, Caching::SafetyFsyncs] {
            f.handle_mut().set_kernel_caching(mode).unwrap();
            let first = f.handle().native().behaviour();
            f.handle_mut().set_kernel_caching(mode).unwrap();
            assert_eq!(f.handle().native().behaviour(), first, "{mode:?}");
            assert_eq!(f.handle().caching(), mode);
        }
    }

    #[test]
    fn test_safety_fsyncs_flush_exactly_once_at_close() {
        let ops = Arc::new(MockFileOps::new());
        let mut f = FsHandle::open_with_ops(
            std::path::Path::new("/scratch/file"),
            OpenMode::Write,
            Creation::CreateIfNeeded,
            Caching::SafetyFsyncs,
            HandleFlags::NONE,
            Arc::clone(&ops) as Arc<dyn FileOps>,
        )
        .unwrap();

        assert!(f.handle().are_safety_fsyncs_issued());
        f.close().unwrap();

        let stats = ops.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.closes, 1);
    }

    #[test]
    fn test_plain_caching_never_flushes_at_close() {
        let ops = Arc::new(MockFileOps::new());
        let mut f = FsHandle::open_with_ops(
            std::path::Path::new("/scratch/file"),
            OpenMode::Write,
            Creation::CreateIfNeeded,
            Caching::All,
            HandleFlags::NONE,
            Arc::clone(&ops) as Arc<dyn FileOps>,
        )
        .unwrap();

        f.close().unwrap();
        assert_eq!(ops.stats().flushes, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unlink_leaves_empty_current_path() {
        let env = TestEnv::new("unlink_path");
        let path = env.create_file("a");
        let mut f = open_rw(&path);

        f.unlink(Deadline::default()).unwrap();

        assert!(f.is_valid());
        assert_eq!(f.current_path().unwrap(), PathBuf::new());
    }
}
