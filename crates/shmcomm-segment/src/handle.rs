//! Named shared-memory segment lifecycle: create/open, size, map, unmap,
//! unlink.
//!
//! Every participant maps its segment read-write, even read-only
//! subscribers (see `shmcomm`'s design notes) — the ring buffer's slot
//! reservation is a writer-side CAS on an atomic timestamp that lives in
//! the mapped region, and nothing in this crate distinguishes "I will only
//! read" callers from "I will CAS" callers. This mirrors the behavior of
//! the POSIX original this crate's contract is modeled on.

use std::ffi::CString;
use std::fs::File;
use std::os::unix::io::FromRawFd;
use std::time::{Duration, Instant};

use memmap2::MmapMut;

use crate::error::Error;
use crate::path::canonical_path;
use crate::permissions::Permissions;

/// Byte offset of the `init_flag` field shared by every segment layout in
/// this workspace (ring, service, action). `shmcomm-core`'s layout
/// calculators are required to place `init_flag` here so that `exists`
/// can poll the handshake without any layout-specific knowledge.
pub const INIT_FLAG_OFFSET: usize = 0;

/// How `SegmentHandle::open` should treat a missing segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the segment if it doesn't exist; open it if it does.
    CreateReadWrite,
    /// Fail if the segment doesn't already exist.
    OpenReadWrite,
}

enum Mapping {
    Unmapped,
    Mapped(MmapMut),
}

/// Owns a named POSIX shared-memory object: its descriptor and, once
/// `connect`ed, its memory mapping.
pub struct SegmentHandle {
    /// Canonical path, e.g. `/shm_odom`.
    name: String,
    /// `None` once disconnected; `Some` holds the open descriptor.
    file: Option<File>,
    mapping: Mapping,
    /// Whether this handle created the segment (vs. attached to one).
    created: bool,
}

impl SegmentHandle {
    /// Resolves `name` to its canonical path; does not touch the
    /// filesystem.
    pub fn canonical_name(name: &str) -> String {
        canonical_path(name)
    }

    /// Creates or opens the named segment, per `mode`. Does not map it —
    /// call `connect` next.
    pub fn open(name: &str, mode: OpenMode, perms: Permissions) -> Result<Self, Error> {
        if !crate::path::is_valid_logical_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        let canonical = canonical_path(name);
        let cname = CString::new(canonical.clone()).map_err(|_| Error::InvalidName(name.to_string()))?;

        let (oflag, created) = match mode {
            OpenMode::CreateReadWrite => (libc::O_CREAT | libc::O_RDWR, true),
            OpenMode::OpenReadWrite => (libc::O_RDWR, false),
        };

        let fd = unsafe { libc::shm_open(cname.as_ptr(), oflag, perms.as_mode() as libc::c_uint) };
        if fd < 0 {
            return Err(Error::SegmentOpen {
                name: canonical,
                source: std::io::Error::last_os_error(),
            });
        }
        let file = unsafe { File::from_raw_fd(fd) };

        Ok(Self {
            name: canonical,
            file: Some(file),
            mapping: Mapping::Unmapped,
            created,
        })
    }

    /// Maps the segment into memory, growing it first if necessary.
    ///
    /// If `required_size > 0` and the current size is smaller, the
    /// segment is truncated up to `required_size` before mapping. If
    /// `required_size == 0`, the segment is mapped at its current size —
    /// which fails if that size is zero (the segment exists but was
    /// never sized by its creator).
    pub fn connect(&mut self, required_size: usize) -> Result<(), Error> {
        let file = self.file.as_ref().ok_or(Error::NotConnected)?;
        let current_len = file
            .metadata()
            .map_err(|source| Error::Mapping {
                name: self.name.clone(),
                source,
            })?
            .len();

        if required_size > 0 && current_len < required_size as u64 {
            file.set_len(required_size as u64).map_err(|_| Error::SegmentSize {
                name: self.name.clone(),
            })?;
        } else if required_size == 0 && current_len == 0 {
            return Err(Error::SegmentSize {
                name: self.name.clone(),
            });
        }

        let mmap = unsafe { MmapMut::map_mut(file) }.map_err(|source| Error::Mapping {
            name: self.name.clone(),
            source,
        })?;
        self.mapping = Mapping::Mapped(mmap);
        Ok(())
    }

    /// Raw pointer to the start of the mapped region.
    ///
    /// # Panics
    /// Panics if the handle has not been `connect`ed.
    pub fn base_ptr(&mut self) -> *mut u8 {
        match &mut self.mapping {
            Mapping::Mapped(m) => m.as_mut_ptr(),
            Mapping::Unmapped => panic!("SegmentHandle::base_ptr called before connect()"),
        }
    }

    /// Size in bytes of the mapped region, or 0 if unmapped.
    pub fn len(&self) -> usize {
        match &self.mapping {
            Mapping::Mapped(m) => m.len(),
            Mapping::Unmapped => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_segment(&self) -> bool {
        self.created
    }

    /// `true` if this handle has no live descriptor, or the segment's
    /// link count has already dropped to zero (another process unlinked
    /// it out from under us).
    pub fn is_disconnected(&self) -> bool {
        match &self.file {
            None => true,
            Some(f) => match f.metadata() {
                Ok(meta) => {
                    use std::os::unix::fs::MetadataExt;
                    meta.nlink() == 0
                }
                Err(_) => true,
            },
        }
    }

    /// Opens `name` read-only-ish (read-write, per the workspace-wide RW
    /// convention) and polls `init_flag` until it observes `1` or
    /// `timeout` elapses.
    pub fn exists(name: &str, timeout: Duration) -> bool {
        Self::exists_at(name, timeout, INIT_FLAG_OFFSET)
    }

    /// Same as `exists`, but the init-flag offset is caller-supplied —
    /// used by layouts that, for some reason, cannot honor the
    /// `INIT_FLAG_OFFSET` convention.
    pub fn exists_at(name: &str, timeout: Duration, init_flag_offset: usize) -> bool {
        let mut handle = match Self::open(name, OpenMode::OpenReadWrite, Permissions::default()) {
            Ok(h) => h,
            Err(_) => return false,
        };
        if handle.connect(0).is_err() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let ptr = handle.base_ptr();
            if handle.len() >= init_flag_offset + 4 {
                let flag = unsafe {
                    (*(ptr.add(init_flag_offset) as *const std::sync::atomic::AtomicU32))
                        .load(std::sync::atomic::Ordering::Acquire)
                };
                if flag == 1 {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    /// Unmaps and closes the descriptor. Does **not** unlink the name.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        self.mapping = Mapping::Unmapped;
        self.file = None;
    }

    /// Unmaps, closes, and unlinks the name iff this handle's view of the
    /// link count was `<= 1` at the moment of the decision (i.e. no other
    /// process still holds the segment open, to the best of our
    /// knowledge). Idempotent: calling this on an already-disconnected
    /// handle is a no-op.
    pub fn disconnect_and_unlink(&mut self) {
        let should_unlink = match &self.file {
            Some(f) => {
                use std::os::unix::fs::MetadataExt;
                f.metadata().map(|m| m.nlink() <= 1).unwrap_or(false)
            }
            None => false,
        };
        let name = self.name.clone();
        self.disconnect();
        if should_unlink {
            unlink(&name);
        }
    }
}

/// Removes the named segment so future opens create fresh memory.
/// Existing mappings remain valid (standard POSIX unlink semantics).
pub fn unlink(name: &str) {
    if let Ok(cname) = CString::new(name.to_string()) {
        unsafe {
            libc::shm_unlink(cname.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "shmcomm_test_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn create_connect_roundtrip() {
        let name = unique_name("roundtrip");
        let mut h = SegmentHandle::open(&name, OpenMode::CreateReadWrite, Permissions::default())
            .expect("open");
        h.connect(4096).expect("connect");
        assert_eq!(h.len(), 4096);
        unsafe {
            *h.base_ptr() = 0xAB;
        }
        h.disconnect_and_unlink();
    }

    #[test]
    fn open_without_create_fails_if_missing() {
        let name = unique_name("missing");
        let r = SegmentHandle::open(&name, OpenMode::OpenReadWrite, Permissions::default());
        assert!(r.is_err());
    }

    #[test]
    fn connect_with_zero_size_and_unsized_segment_fails() {
        let name = unique_name("unsized");
        let mut h = SegmentHandle::open(&name, OpenMode::CreateReadWrite, Permissions::default())
            .expect("open");
        let r = h.connect(0);
        assert!(r.is_err());
        h.disconnect_and_unlink();
    }

    #[test]
    fn disconnect_is_idempotent() {
        let name = unique_name("idempotent");
        let mut h = SegmentHandle::open(&name, OpenMode::CreateReadWrite, Permissions::default())
            .expect("open");
        h.connect(128).expect("connect");
        h.disconnect();
        h.disconnect();
        assert!(h.is_disconnected());
        unlink(&canonical_path(&name));
    }

    #[test]
    fn invalid_name_rejected() {
        let r = SegmentHandle::open("", OpenMode::CreateReadWrite, Permissions::default());
        assert!(matches!(r, Err(Error::InvalidName(_))));
    }
}
