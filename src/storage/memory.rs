//! In-memory storage for tests
//!
//! A flat namespace of files and directories behind a mutex. Queues handed
//! out by [`MemStorage`] are clones of one [`MockEngine`], so a test can steer
//! and inspect them through [`MemStorage::engine`].
//!
//! Any operation can be made to fail by name with [`MemStorage::fail_on`];
//! the failure is reported as a resource error, like a real one.

use super::{DeviceCounters, FileAttr, FileHandle, FsStat, MeteredEngine, OpenFlags, StorageApi};
use crate::engine::mock::MockEngine;
use crate::engine::{EngineKind, IOEngine, OperationType};
use crate::error::HarnessError;
use crate::stats::{DeviceStat, IpcStat};
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
struct Entry {
    size: u64,
    is_dir: bool,
}

#[derive(Default)]
struct Namespace {
    entries: HashMap<PathBuf, Entry>,
    open_fds: HashSet<i32>,
    next_fd: i32,
    fail_ops: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
}

pub struct MemStorage {
    ns: Mutex<Namespace>,
    engine: MockEngine,
    counters: Arc<DeviceCounters>,
    fs_stat: FsStat,
    ipc: Option<IpcStat>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            ns: Mutex::new(Namespace {
                next_fd: 100,
                ..Default::default()
            }),
            engine: MockEngine::new(),
            counters: Arc::new(DeviceCounters::new()),
            fs_stat: FsStat {
                free_blocks: 1 << 20,
                free_inodes: 1 << 16,
            },
            ipc: None,
        }
    }

    pub fn with_fs_stat(mut self, fs_stat: FsStat) -> Self {
        self.fs_stat = fs_stat;
        self
    }

    pub fn with_ipc(mut self, ipc: IpcStat) -> Self {
        self.ipc = Some(ipc);
        self
    }

    fn ns(&self) -> MutexGuard<'_, Namespace> {
        self.ns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle on the mock every queue from this storage shares
    pub fn engine(&self) -> &MockEngine {
        &self.engine
    }

    /// Make every later call of `op` fail
    pub fn fail_on(&self, op: &'static str) {
        self.ns().fail_ops.insert(op);
    }

    pub fn clear_failures(&self) {
        self.ns().fail_ops.clear();
    }

    /// How many times `op` was called, failed calls included
    pub fn calls(&self, op: &str) -> usize {
        self.ns().calls.get(op).copied().unwrap_or(0)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.ns().entries.contains_key(path)
    }

    pub fn open_count(&self) -> usize {
        self.ns().open_fds.len()
    }

    /// Count the call and apply injected failure
    fn enter(&self, ns: &mut Namespace, op: &'static str, path: &Path) -> Result<()> {
        *ns.calls.entry(op).or_insert(0) += 1;
        if ns.fail_ops.contains(op) {
            return Err(HarnessError::resource(op, path, std::io::Error::from_raw_os_error(libc::EIO)).into());
        }
        Ok(())
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(op: &'static str, path: &Path) -> anyhow::Error {
    HarnessError::resource(op, path, std::io::Error::from_raw_os_error(libc::ENOENT)).into()
}

fn exists(op: &'static str, path: &Path) -> anyhow::Error {
    HarnessError::resource(op, path, std::io::Error::from_raw_os_error(libc::EEXIST)).into()
}

impl StorageApi for MemStorage {
    fn open_or_create(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle> {
        let mut ns = self.ns();
        self.enter(&mut ns, "open", path)?;

        match ns.entries.get(path).copied() {
            Some(entry) if entry.is_dir => {
                return Err(HarnessError::resource("open", path, std::io::Error::from_raw_os_error(libc::EISDIR)).into())
            }
            Some(_) => {}
            None if flags.create => {
                ns.entries.insert(path.to_path_buf(), Entry { size: 0, is_dir: false });
            }
            None => return Err(not_found("open", path)),
        }

        let fd = ns.next_fd;
        ns.next_fd += 1;
        ns.open_fds.insert(fd);
        Ok(FileHandle {
            fd,
            path: path.to_path_buf(),
        })
    }

    fn preallocate(&self, path: &Path, offset: u64, length: u64) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "preallocate", path)?;
        let entry = ns.entries.get_mut(path).ok_or_else(|| not_found("preallocate", path))?;
        entry.size = entry.size.max(offset + length);
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileAttr> {
        let mut ns = self.ns();
        self.enter(&mut ns, "stat", path)?;
        let entry = ns.entries.get(path).ok_or_else(|| not_found("stat", path))?;
        Ok(FileAttr {
            size: entry.size,
            is_dir: entry.is_dir,
        })
    }

    fn flush(&self, file: &FileHandle) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "fsync", &file.path)?;
        anyhow::ensure!(ns.open_fds.contains(&file.fd), "fsync on closed fd {}", file.fd);
        Ok(())
    }

    fn close(&self, file: FileHandle) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "close", &file.path)?;
        anyhow::ensure!(ns.open_fds.remove(&file.fd), "close of unknown fd {}", file.fd);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "remove", path)?;
        match ns.entries.get(path).copied() {
            Some(entry) if !entry.is_dir => {
                ns.entries.remove(path);
                Ok(())
            }
            Some(_) => Err(HarnessError::resource("remove", path, std::io::Error::from_raw_os_error(libc::EISDIR)).into()),
            None => Err(not_found("remove", path)),
        }
    }

    fn mkdir(&self, path: &Path) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "mkdir", path)?;
        if ns.entries.contains_key(path) {
            return Err(exists("mkdir", path));
        }
        ns.entries.insert(path.to_path_buf(), Entry { size: 0, is_dir: true });
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "rmdir", path)?;
        match ns.entries.get(path).copied() {
            Some(entry) if entry.is_dir => {
                ns.entries.remove(path);
                Ok(())
            }
            Some(_) => Err(HarnessError::resource("rmdir", path, std::io::Error::from_raw_os_error(libc::ENOTDIR)).into()),
            None => Err(not_found("rmdir", path)),
        }
    }

    fn mkfile(&self, path: &Path, size: u64) -> Result<()> {
        let mut ns = self.ns();
        self.enter(&mut ns, "mkfile", path)?;
        if ns.entries.contains_key(path) {
            return Err(exists("mkfile", path));
        }
        ns.entries.insert(path.to_path_buf(), Entry { size, is_dir: false });
        self.counters.record(OperationType::Write, size);
        Ok(())
    }

    fn statvfs(&self) -> Result<FsStat> {
        let mut ns = self.ns();
        self.enter(&mut ns, "statvfs", Path::new("/"))?;
        Ok(self.fs_stat)
    }

    fn queue_init(&self, _kind: EngineKind) -> Result<Box<dyn IOEngine>> {
        let mut ns = self.ns();
        self.enter(&mut ns, "queue_init", Path::new("/"))?;
        Ok(Box::new(MeteredEngine::new(Box::new(self.engine.clone()), self.counters.clone())))
    }

    fn device_counters(&self) -> DeviceStat {
        self.counters.snapshot()
    }

    fn ipc_counters(&self) -> Option<IpcStat> {
        self.ipc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_file_lifecycle() {
        let storage = MemStorage::new();
        let path = Path::new("file0");

        let file = storage
            .open_or_create(path, OpenFlags { create: true, direct: true })
            .unwrap();
        storage.preallocate(path, 0, 8192).unwrap();
        assert_eq!(storage.stat(path).unwrap().size, 8192);
        assert_eq!(storage.open_count(), 1);

        storage.flush(&file).unwrap();
        storage.close(file).unwrap();
        storage.remove(path).unwrap();
        assert!(!storage.exists(path));
        assert_eq!(storage.open_count(), 0);
    }

    #[test]
    fn test_open_missing_without_create() {
        let storage = MemStorage::new();
        let err = storage.open_or_create(Path::new("nope"), OpenFlags::default()).unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
    }

    #[test]
    fn test_injected_failure_counts_call() {
        let storage = MemStorage::new();
        storage.fail_on("mkdir");

        let err = storage.mkdir(Path::new("d")).unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
        assert_eq!(storage.calls("mkdir"), 1);

        storage.clear_failures();
        storage.mkdir(Path::new("d")).unwrap();
        assert!(storage.mkdir(Path::new("d")).is_err());
        assert!(storage.remove(Path::new("d")).is_err());
        storage.rmdir(Path::new("d")).unwrap();
    }

    #[test]
    fn test_mkfile_and_counters() {
        let storage = MemStorage::new().with_ipc(IpcStat::default());
        storage.mkfile(Path::new("f"), 4096).unwrap();
        assert!(storage.mkfile(Path::new("f"), 4096).is_err());
        assert_eq!(storage.device_counters().write_io_count, 1);
        assert!(storage.ipc_counters().is_some());
    }

    #[test]
    fn test_queues_share_the_mock() {
        let storage = MemStorage::new();
        let mut engine = storage.queue_init(EngineKind::Libaio).unwrap();
        engine.init(&crate::engine::EngineConfig { queue_depth: 2 }).unwrap();
        assert_eq!(storage.engine().init_calls(), 1);
    }
}
