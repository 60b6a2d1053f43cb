//! POSIX storage
//!
//! Runs the harness against a directory on a local filesystem. Each core gets
//! its own sub-directory (`<root>/lcore<N>`), so cores never contend on a
//! directory and a core's leftovers are easy to spot after a crash.
//!
//! - Files are opened `O_RDWR` (+`O_CREAT`, +`O_DIRECT` as requested)
//! - Space is reserved with `posix_fallocate`, falling back to `ftruncate`
//!   on filesystems that cannot allocate
//! - `flush` is `fsync`
//! - Free space comes from `statvfs` on the root, reported in clusters

use super::{
    DeviceCounters, FileAttr, FileHandle, FsStat, MeteredEngine, OpenFlags, StorageApi, CLUSTER_SIZE,
};
use crate::engine::{create_engine, EngineKind, IOEngine, OperationType};
use crate::error::HarnessError;
use crate::stats::{DeviceStat, IpcStat};
use crate::Result;
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunk size of `mkfile` writes
const MKFILE_CHUNK: usize = 1024 * 1024;

pub struct PosixStorage {
    root: PathBuf,
    counters: Arc<DeviceCounters>,
    /// Remove `root` on drop (only for roots this storage created)
    owns_root: bool,
}

impl PosixStorage {
    /// Use `root` as is; it must already exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = std::fs::metadata(&root).map_err(|e| HarnessError::resource("stat", &root, e))?;
        if !meta.is_dir() {
            return Err(HarnessError::argument(format!("{} is not a directory", root.display())).into());
        }

        Ok(Self {
            root,
            counters: Arc::new(DeviceCounters::new()),
            owns_root: false,
        })
    }

    /// Storage for one core: `<base>/lcore<core_id>`, created if needed
    pub fn for_core(base: &Path, core_id: usize) -> Result<Self> {
        let root = base.join(format!("lcore{}", core_id));
        let created = match std::fs::create_dir(&root) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(HarnessError::resource("mkdir", &root, e).into()),
        };

        let mut storage = Self::new(root)?;
        storage.owns_root = created;
        debug!(root = %storage.root.display(), "storage ready");
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl StorageApi for PosixStorage {
    fn open_or_create(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle> {
        let full = self.resolve(path);

        let mut options = OpenOptions::new();
        options.read(true).write(true).mode(0o644);
        if flags.create {
            options.create(true);
        }
        if flags.direct {
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options
            .open(&full)
            .map_err(|e| HarnessError::resource("open", &full, e))?;

        Ok(FileHandle {
            fd: file.into_raw_fd(),
            path: path.to_path_buf(),
        })
    }

    fn preallocate(&self, path: &Path, offset: u64, length: u64) -> Result<()> {
        let full = self.resolve(path);
        let file = OpenOptions::new()
            .write(true)
            .open(&full)
            .map_err(|e| HarnessError::resource("preallocate", &full, e))?;

        let result = unsafe { libc::posix_fallocate(file.as_raw_fd(), offset as i64, length as i64) };
        if result == 0 {
            return Ok(());
        }

        if result == libc::EOPNOTSUPP || result == libc::EINVAL {
            // No block allocation on this filesystem; settle for the size
            warn!(path = %full.display(), "posix_fallocate unsupported, extending with ftruncate");
            let current = file
                .metadata()
                .map_err(|e| HarnessError::resource("preallocate", &full, e))?
                .len();
            let end = offset + length;
            if end > current {
                file.set_len(end)
                    .map_err(|e| HarnessError::resource("preallocate", &full, e))?;
            }
            return Ok(());
        }

        Err(HarnessError::resource("preallocate", &full, std::io::Error::from_raw_os_error(result)).into())
    }

    fn stat(&self, path: &Path) -> Result<FileAttr> {
        let full = self.resolve(path);
        let meta = std::fs::metadata(&full).map_err(|e| HarnessError::resource("stat", &full, e))?;
        Ok(FileAttr {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn flush(&self, file: &FileHandle) -> Result<()> {
        let result = unsafe { libc::fsync(file.fd) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            return Err(HarnessError::resource("fsync", self.resolve(&file.path), err).into());
        }
        Ok(())
    }

    fn close(&self, file: FileHandle) -> Result<()> {
        let result = unsafe { libc::close(file.fd) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            return Err(HarnessError::resource("close", self.resolve(&file.path), err).into());
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        std::fs::remove_file(&full).map_err(|e| HarnessError::resource("remove", &full, e))?;
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        std::fs::create_dir(&full).map_err(|e| HarnessError::resource("mkdir", &full, e))?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        std::fs::remove_dir(&full).map_err(|e| HarnessError::resource("rmdir", &full, e))?;
        Ok(())
    }

    fn mkfile(&self, path: &Path, size: u64) -> Result<()> {
        use rand::RngCore;

        let full = self.resolve(path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&full)
            .map_err(|e| HarnessError::resource("mkfile", &full, e))?;

        let mut chunk = vec![0u8; (size as usize).min(MKFILE_CHUNK)];
        rand::thread_rng().fill_bytes(&mut chunk);

        let mut written = 0u64;
        while written < size {
            let len = ((size - written) as usize).min(chunk.len());
            file.write_all(&chunk[..len])
                .map_err(|e| HarnessError::resource("mkfile", &full, e))?;
            written += len as u64;
        }
        file.sync_all().map_err(|e| HarnessError::resource("fsync", &full, e))?;

        self.counters.record(OperationType::Write, size);
        Ok(())
    }

    fn statvfs(&self) -> Result<FsStat> {
        let c_path = std::ffi::CString::new(self.root.as_os_str().as_bytes())
            .with_context(|| format!("storage root {} contains a NUL byte", self.root.display()))?;

        let mut buf: libc::statvfs = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::statvfs(c_path.as_ptr(), &mut buf) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            return Err(HarnessError::resource("statvfs", &self.root, err).into());
        }

        let free_bytes = buf.f_bavail as u64 * buf.f_frsize as u64;
        Ok(FsStat {
            free_blocks: free_bytes / CLUSTER_SIZE,
            free_inodes: buf.f_favail as u64,
        })
    }

    fn queue_init(&self, kind: EngineKind) -> Result<Box<dyn IOEngine>> {
        let backend = create_engine(kind)?;
        Ok(Box::new(MeteredEngine::new(backend, self.counters.clone())))
    }

    fn device_counters(&self) -> DeviceStat {
        self.counters.snapshot()
    }

    fn ipc_counters(&self) -> Option<IpcStat> {
        None
    }
}

impl Drop for PosixStorage {
    fn drop(&mut self) {
        if self.owns_root {
            // Only succeeds when the core cleaned up after itself
            if let Err(e) = std::fs::remove_dir(&self.root) {
                debug!(root = %self.root.display(), "storage root left behind: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use std::fs::File;
    use std::io::Read;
    use std::os::unix::io::FromRawFd;
    use tempfile::TempDir;

    /// View an fd as a `File` without taking ownership of it
    fn borrow_file(fd: i32) -> std::mem::ManuallyDrop<File> {
        std::mem::ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
    }

    #[test]
    fn test_for_core_creates_and_removes_subdir() {
        let temp_dir = TempDir::new().unwrap();
        let sub = temp_dir.path().join("lcore3");
        {
            let storage = PosixStorage::for_core(temp_dir.path(), 3).unwrap();
            assert_eq!(storage.root(), sub.as_path());
            assert!(sub.is_dir());
        }
        assert!(!sub.exists());
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = PosixStorage::new(temp_dir.path().join("missing")).err().unwrap();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
    }

    #[test]
    fn test_file_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let storage = PosixStorage::new(temp_dir.path()).unwrap();
        let path = Path::new("data.file");

        let file = storage
            .open_or_create(path, OpenFlags { create: true, direct: false })
            .unwrap();
        storage.preallocate(path, 0, 1 << 20).unwrap();
        assert_eq!(storage.stat(path).unwrap(), FileAttr { size: 1 << 20, is_dir: false });

        storage.flush(&file).unwrap();
        storage.close(file).unwrap();
        storage.remove(path).unwrap();
        assert!(!temp_dir.path().join("data.file").exists());
    }

    #[test]
    fn test_open_without_create_fails_as_resource_error() {
        let temp_dir = TempDir::new().unwrap();
        let storage = PosixStorage::new(temp_dir.path()).unwrap();

        let err = storage
            .open_or_create(Path::new("absent"), OpenFlags::default())
            .unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
        assert!(format!("{:#}", err).contains("open failed"));
    }

    #[test]
    fn test_directories_and_mkfile() {
        let temp_dir = TempDir::new().unwrap();
        let storage = PosixStorage::new(temp_dir.path()).unwrap();

        storage.mkdir(Path::new("dir0")).unwrap();
        assert!(storage.stat(Path::new("dir0")).unwrap().is_dir);
        assert!(storage.mkdir(Path::new("dir0")).is_err());
        storage.rmdir(Path::new("dir0")).unwrap();

        storage.mkfile(Path::new("small"), 4096).unwrap();
        assert_eq!(storage.stat(Path::new("small")).unwrap().size, 4096);
        assert!(storage.mkfile(Path::new("small"), 4096).is_err());
        assert_eq!(storage.device_counters().write_io_count, 1);
    }

    #[test]
    fn test_statvfs_reports_space() {
        let temp_dir = TempDir::new().unwrap();
        let storage = PosixStorage::new(temp_dir.path()).unwrap();
        let stat = storage.statvfs().unwrap();
        assert!(stat.free_blocks > 0);
        assert!(storage.ipc_counters().is_none());
    }

    #[test]
    fn test_metered_queue_counts_device_io() {
        use crate::engine::{EngineConfig, IOOperation};

        let temp_dir = TempDir::new().unwrap();
        let storage = PosixStorage::new(temp_dir.path()).unwrap();
        let path = Path::new("metered");
        let file = storage
            .open_or_create(path, OpenFlags { create: true, direct: false })
            .unwrap();

        let mut engine = storage.queue_init(EngineKind::Sync).unwrap();
        engine.init(&EngineConfig { queue_depth: 2 }).unwrap();

        let mut data = vec![7u8; 8192];
        let op = IOOperation {
            op_type: OperationType::Write,
            target_fd: file.fd,
            offset: 0,
            buffer: data.as_mut_ptr(),
            length: data.len(),
            user_data: 0,
        };
        engine.submit(&[op]).unwrap();
        let mut completions = Vec::new();
        engine.poll(1, 2, &mut completions).unwrap();
        engine.cleanup().unwrap();

        let mut readback = Vec::new();
        let mut reader = borrow_file(file.fd);
        reader.read_to_end(&mut readback).unwrap();
        assert_eq!(readback, data);

        assert_eq!(storage.device_counters().write_io_count, 2);
        storage.close(file).unwrap();
    }
}
