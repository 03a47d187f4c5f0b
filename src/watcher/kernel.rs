//! Thin binding over the Linux inotify interface.
//!
//! Open a descriptor, add or remove a directory watch, and read raw
//! `{watch-id, mask, name}` records. Everything above this layer works with
//! [`RawRecord`] and never touches the syscalls.
//!
//! Only Linux provides inotify. On other unix targets [`Inotify::init`]
//! fails with [`std::io::ErrorKind::Unsupported`].

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::unix::AsyncFd;

/// File in a watched directory was written.
pub const IN_MODIFY: u32 = 0x0000_0002;
/// Entry moved out of a watched directory.
pub const IN_MOVED_FROM: u32 = 0x0000_0040;
/// Entry moved into a watched directory.
pub const IN_MOVED_TO: u32 = 0x0000_0080;
/// Entry created in a watched directory.
pub const IN_CREATE: u32 = 0x0000_0100;
/// The watched directory itself was deleted.
pub const IN_DELETE_SELF: u32 = 0x0000_0400;
/// The watched directory itself was moved.
pub const IN_MOVE_SELF: u32 = 0x0000_0800;
/// Event queue overflowed; the record carries no watch.
pub const IN_Q_OVERFLOW: u32 = 0x0000_4000;
/// Watch was removed by the kernel.
pub const IN_IGNORED: u32 = 0x0000_8000;
/// Subject of the event is a directory.
pub const IN_ISDIR: u32 = 0x4000_0000;

/// Mask registered for every watched directory.
///
/// A watch follows its inode, so moves of the directory itself and of
/// subdirectories into it are requested too.
#[cfg(not(feature = "move-events"))]
pub const WATCH_MASK: u32 = IN_MODIFY | IN_CREATE | IN_DELETE_SELF | IN_MOVE_SELF | IN_MOVED_TO;

/// Mask registered for every watched directory.
#[cfg(feature = "move-events")]
pub const WATCH_MASK: u32 =
    IN_MODIFY | IN_CREATE | IN_DELETE_SELF | IN_MOVE_SELF | IN_MOVED_FROM | IN_MOVED_TO;

/// Size of `struct inotify_event` without the trailing name.
pub const HEADER_LEN: usize = 16;

/// Large enough for a few thousand records with short names.
pub const READ_BUFFER_LEN: usize = HEADER_LEN * 4096;

/// Kernel watch identifier, echoed back on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub i32);

/// One record as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub wd: WatchId,
    pub mask: u32,
    /// Entry name relative to the watched directory, trailing NULs removed.
    /// Empty for events about the watched directory itself.
    pub name: OsString,
}

impl RawRecord {
    pub fn has(&self, bit: u32) -> bool {
        self.mask & bit == bit
    }
}

/// Parse records packed back to back in `buf`.
///
/// A buffer shorter than one header yields nothing. A truncated trailing
/// name is clamped to the buffer end.
pub fn parse_records(buf: &[u8]) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + HEADER_LEN <= buf.len() {
        let header = &buf[offset..offset + HEADER_LEN];
        let wd = i32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
        let mask = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
        // header[8..12] is the rename cookie, unused here.
        let name_len = u32::from_ne_bytes([header[12], header[13], header[14], header[15]]) as usize;

        let name_start = offset + HEADER_LEN;
        let name_end = name_start.saturating_add(name_len).min(buf.len());
        let raw_name = &buf[name_start..name_end];
        let trimmed = match raw_name.iter().position(|b| *b == 0) {
            Some(nul) => &raw_name[..nul],
            None => raw_name,
        };

        records.push(RawRecord {
            wd: WatchId(wd),
            mask,
            name: OsString::from_vec(trimmed.to_vec()),
        });

        offset = name_end;
    }

    records
}

/// Subscription surface the watch registry talks to.
pub trait WatchBackend: Send + Sync {
    /// Register `path` with [`WATCH_MASK`].
    fn add_watch(&self, path: &Path) -> io::Result<WatchId>;

    /// Drop a registration.
    fn remove_watch(&self, wd: WatchId) -> io::Result<()>;
}

impl<B: WatchBackend + ?Sized> WatchBackend for Arc<B> {
    fn add_watch(&self, path: &Path) -> io::Result<WatchId> {
        (**self).add_watch(path)
    }

    fn remove_watch(&self, wd: WatchId) -> io::Result<()> {
        (**self).remove_watch(wd)
    }
}

/// Owned inotify descriptor registered with the Tokio reactor.
///
/// The descriptor is closed when the value is dropped.
#[derive(Debug)]
pub struct Inotify {
    fd: AsyncFd<OwnedFd>,
}

impl Inotify {
    /// Open a non-blocking descriptor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init() -> io::Result<Self> {
        let fd = sys::init()?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Wait until records are available and return them.
    ///
    /// Short reads are discarded and the wait resumes.
    pub async fn read_records(&self, buf: &mut [u8]) -> io::Result<Vec<RawRecord>> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| sys::read(inner.as_raw_fd(), buf)) {
                Ok(Ok(n)) if n < HEADER_LEN => continue,
                Ok(Ok(n)) => return Ok(parse_records(&buf[..n])),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl WatchBackend for Inotify {
    fn add_watch(&self, path: &Path) -> io::Result<WatchId> {
        sys::add_watch(self.as_raw_fd(), path, WATCH_MASK).map(WatchId)
    }

    fn remove_watch(&self, wd: WatchId) -> io::Result<()> {
        sys::rm_watch(self.as_raw_fd(), wd.0)
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::ffi::CString;
    use std::io;
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub fn init() -> io::Result<OwnedFd> {
        // SAFETY: takes only integer flags and touches no caller memory.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn add_watch(fd: RawFd, path: &Path, mask: u32) -> io::Result<i32> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: `c_path` is a NUL-terminated string that outlives the call.
        let wd = unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    pub fn rm_watch(fd: RawFd, wd: i32) -> io::Result<()> {
        // SAFETY: takes only integers; a stale `wd` is reported as EINVAL.
        let res = unsafe { libc::inotify_rm_watch(fd, wd) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: pointer and length come from a live `&mut [u8]`, so the
        // kernel writes at most `buf.len()` bytes into memory we own.
        let res = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::os::fd::{OwnedFd, RawFd};
    use std::path::Path;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "inotify is only available on Linux")
    }

    pub fn init() -> io::Result<OwnedFd> {
        Err(unsupported())
    }

    pub fn add_watch(_fd: RawFd, _path: &Path, _mask: u32) -> io::Result<i32> {
        Err(unsupported())
    }

    pub fn rm_watch(_fd: RawFd, _wd: i32) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn read(_fd: RawFd, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(wd: i32, mask: u32, name: &[u8], padded_len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&wd.to_ne_bytes());
        bytes.extend_from_slice(&mask.to_ne_bytes());
        bytes.extend_from_slice(&0u32.to_ne_bytes());
        bytes.extend_from_slice(&(padded_len as u32).to_ne_bytes());
        let mut padded = name.to_vec();
        padded.resize(padded_len, 0);
        bytes.extend_from_slice(&padded);
        bytes
    }

    #[test]
    fn test_parse_single_record_trims_nuls() {
        let buf = record_bytes(3, IN_MODIFY, b"main.go", 16);
        let records = parse_records(&buf);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].wd, WatchId(3));
        assert!(records[0].has(IN_MODIFY));
        assert_eq!(records[0].name, OsString::from("main.go"));
    }

    #[test]
    fn test_parse_packed_records_in_order() {
        let mut buf = record_bytes(1, IN_CREATE | IN_ISDIR, b"sub", 16);
        buf.extend(record_bytes(1, IN_MODIFY, b"a.go", 16));
        buf.extend(record_bytes(2, IN_DELETE_SELF, b"", 0));

        let records = parse_records(&buf);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, OsString::from("sub"));
        assert!(records[0].has(IN_ISDIR));
        assert_eq!(records[1].name, OsString::from("a.go"));
        assert_eq!(records[2].wd, WatchId(2));
        assert!(records[2].name.is_empty());
    }

    #[test]
    fn test_parse_short_buffer_yields_nothing() {
        let buf = record_bytes(1, IN_MODIFY, b"", 0);
        assert!(parse_records(&buf[..HEADER_LEN - 1]).is_empty());
        assert!(parse_records(&[]).is_empty());
    }

    #[test]
    fn test_parse_truncated_name_is_clamped() {
        let mut buf = record_bytes(7, IN_MODIFY, b"abcdef", 16);
        buf.truncate(HEADER_LEN + 3);

        let records = parse_records(&buf);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, OsString::from("abc"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_inotify_reports_modify() {
        let dir = tempfile::TempDir::new().unwrap();
        let inotify = Inotify::init().unwrap();
        let wd = inotify.add_watch(dir.path()).unwrap();

        std::fs::write(dir.path().join("x.go"), "package main").unwrap();

        let mut buf = vec![0u8; READ_BUFFER_LEN];
        let found = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                let records = inotify.read_records(&mut buf).await.unwrap();
                if records
                    .iter()
                    .any(|r| r.wd == wd && r.has(IN_MODIFY) && r.name == OsString::from("x.go"))
                {
                    return true;
                }
            }
        })
        .await
        .unwrap_or(false);

        assert!(found, "expected an IN_MODIFY record for x.go");
        inotify.remove_watch(wd).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_inotify_reports_move_of_watched_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let inotify = Inotify::init().unwrap();
        let wd = inotify.add_watch(&src).unwrap();

        std::fs::rename(&src, dir.path().join("vendor")).unwrap();

        let mut buf = vec![0u8; READ_BUFFER_LEN];
        let found = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                let records = inotify.read_records(&mut buf).await.unwrap();
                if records.iter().any(|r| r.wd == wd && r.has(IN_MOVE_SELF)) {
                    return true;
                }
            }
        })
        .await
        .unwrap_or(false);

        assert!(found, "expected an IN_MOVE_SELF record for the moved directory");
        // A moved directory keeps its watch until it is removed explicitly
        inotify.remove_watch(wd).unwrap();
    }
}
