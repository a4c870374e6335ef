// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory segment backing.
//!
//! Production maps a POSIX shm segment (`shm_open` + `mmap`); tests and
//! single-process embedding use a heap allocation with the same interface.
//! Segment names must start with `/` and contain no other `/`,
//! e.g. `/hpnc_state`.

use super::{ShmError, ShmResult};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Raw memory a state block or ring lives in.
pub trait Segment: Send + Sync {
    fn ptr(&self) -> *mut u8;
    fn len(&self) -> usize;
}

/// POSIX shared memory segment wrapper.
///
/// Automatically unmaps the region on drop. Unlinking is the writer's
/// responsibility (`unlink()` on orderly shutdown).
#[cfg(target_os = "linux")]
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the pointer targets shared memory accessed by multiple
// threads/processes; all concurrent access goes through atomics (seqlock,
// ring indices) per the layout contract.
#[cfg(target_os = "linux")]
unsafe impl Send for ShmSegment {}
#[cfg(target_os = "linux")]
unsafe impl Sync for ShmSegment {}

#[cfg(target_os = "linux")]
impl ShmSegment {
    /// Create (or replace) a segment of `size` bytes, zero-initialized.
    pub fn create(name: &str, size: usize) -> ShmResult<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink on a
        // missing segment just fails, which we ignore; shm_open with
        // O_CREAT|O_RDWR|O_EXCL either creates fresh or errors (checked).
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is valid from the successful shm_open above.
        let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: close a valid fd once on the error path.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        // SAFETY: null hint, valid prot/flags, fd valid, offset 0; result
        // checked against MAP_FAILED below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: the mapping holds its own reference; fd can close.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        // SAFETY: ptr is a fresh MAP_SHARED mapping of exactly `size`
        // writable bytes with no other references yet.
        unsafe {
            ptr::write_bytes(ptr as *mut u8, 0, size);
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    /// Map an existing segment read-write (collaborator side).
    pub fn open(name: &str, size: usize) -> ShmResult<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: valid NUL-terminated name; result checked.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(ShmError::SegmentOpen(io::Error::last_os_error()));
        }

        // SAFETY: as in create(); result checked below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: mapping keeps its reference.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    /// Remove the name from the namespace (mapping stays valid until drop).
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_str()) {
            // SAFETY: valid NUL-terminated name; errors ignored (segment
            // may already be unlinked).
            unsafe {
                libc::shm_unlink(c_name.as_ptr());
            }
        }
    }

    fn validate_name(name: &str) -> ShmResult<()> {
        if !name.starts_with('/') || name.len() < 2 || name[1..].contains('/') || name.len() > 255 {
            return Err(ShmError::InvalidName(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Segment for ShmSegment {
    fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.size
    }
}

#[cfg(target_os = "linux")]
impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the live mapping created in
        // create()/open(); unmapped exactly once here.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

/// Heap-backed segment for tests and single-process use.
pub struct HeapSegment {
    // Box keeps the allocation alive; the raw pointer side-steps aliasing
    // with the atomics carved out of it.
    buf: Box<[u8]>,
}

// SAFETY: same contract as ShmSegment -- all concurrent access to the
// region goes through atomics per the layout.
unsafe impl Send for HeapSegment {}
unsafe impl Sync for HeapSegment {}

impl HeapSegment {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
        }
    }
}

impl Segment for HeapSegment {
    fn ptr(&self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_segment_zeroed() {
        let segment = HeapSegment::new(4096);
        assert_eq!(segment.len(), 4096);
        // SAFETY: ptr/len describe the live allocation.
        let slice = unsafe { std::slice::from_raw_parts(segment.ptr(), segment.len()) };
        assert!(slice.iter().all(|b| *b == 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_shm_name_validation() {
        assert!(ShmSegment::validate_name("/hpnc_state").is_ok());
        assert!(ShmSegment::validate_name("hpnc_state").is_err());
        assert!(ShmSegment::validate_name("/hpnc/state").is_err());
        assert!(ShmSegment::validate_name("/").is_err());
    }
}
