// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the shared memory segment and the named counting
// semaphore used as cross-process signal.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::naming;

// ---------------------------------------------------------------------------
// Layout helpers: the mapping carries a leading reference counter
// ---------------------------------------------------------------------------

// The mapping starts with an `AtomicI32` reference counter, padded to 8 bytes
// so the usable region stays 8-aligned. Its position does not depend on the
// object size, which attach-side size queries may report page-rounded.
const ACC_SIZE: usize = 8;

pub(crate) fn calc_size(user_size: usize) -> usize {
    user_size + ACC_SIZE
}

/// # Safety
/// `mem` must point to the start of a live mapping.
unsafe fn acc_of<'a>(mem: *mut u8) -> &'a AtomicI32 {
    &*(mem as *const AtomicI32)
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(naming::make_os_name(name).into_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,      // total mapped size (including ref counter)
    user_size: usize, // usable size
    name: String,     // POSIX name (with leading '/')
    prev_ref: i32,    // ref count *before* our fetch_add (0 means we were first)
}

// Safety: the shared memory region is mapped by every handle; all
// concurrent access goes through atomics or disjoint spans.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Create a fresh named region of `user_size` usable bytes; fails if an
    /// object with this name already exists.
    pub fn create(name: &str, user_size: usize) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = naming::make_os_name(name);
        let c_name = c_name(name)?;

        let perms: libc::mode_t = 0o666;
        let total_size = calc_size(user_size);

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::fchmod(fd, perms) };

        let ret = unsafe { libc::ftruncate(fd, total_size as libc::off_t) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        Self::mmap_and_finish(fd, total_size, user_size, posix_name)
    }

    /// Attach to an existing region, discovering its size from the object.
    pub fn attach(name: &str) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        let posix_name = naming::make_os_name(name);
        let c_name = c_name(name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666 as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let total_size = match object_size(fd) {
            Ok(sz) => sz,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };
        if total_size <= ACC_SIZE {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("segment {posix_name} is empty or not yet sized"),
            ));
        }
        Self::mmap_and_finish(fd, total_size, total_size - ACC_SIZE, posix_name)
    }

    fn mmap_and_finish(
        fd: i32,
        total_size: usize,
        user_size: usize,
        posix_name: String,
    ) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let prev = unsafe { acc_of(mem as *mut u8).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem: mem as *mut u8,
            size: total_size,
            user_size,
            name: posix_name,
            prev_ref: prev,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        unsafe { self.mem.add(ACC_SIZE) }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { self.mem.add(ACC_SIZE) }
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    /// Ref count before our own increment; 0 means this handle mapped first.
    pub fn prev_ref_count(&self) -> i32 {
        self.prev_ref
    }

    pub fn ref_count(&self) -> i32 {
        if self.mem.is_null() || self.size == 0 {
            return 0;
        }
        unsafe { acc_of(self.mem).load(Ordering::Acquire) }
    }

    /// Remove the backing object (shm_unlink). Existing mappings stay valid.
    fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c_name) = c_name(name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        // The last side to detach removes the backing object.
        let prev = unsafe { acc_of(self.mem).fetch_sub(1, Ordering::AcqRel) };
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if prev <= 1 {
            self.unlink();
        }
    }
}

fn object_size(fd: i32) -> io::Result<usize> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as usize)
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: POSIX named counting semaphore
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// Safety: sem_t operations are thread-safe and the handle is process-shared.
unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Create a new semaphore; fails if one with this name already exists.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Open an existing semaphore; fails if it does not exist.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = c_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, count: u32) -> io::Result<()> {
        for _ in 0..count {
            if unsafe { libc::sem_post(self.sem) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Decrement without blocking. `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let e = io::Error::last_os_error();
            match e.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(e),
            }
        }
    }

    /// Decrement, blocking for at most `timeout_ms` (forever if `None`).
    /// Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        match timeout_ms {
            None => loop {
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let e = io::Error::last_os_error();
                if e.raw_os_error() != Some(libc::EINTR) {
                    return Err(e);
                }
            },
            Some(0) => self.try_wait(),
            Some(ms) => self.timed_wait(ms),
        }
    }

    #[cfg(target_os = "macos")]
    fn timed_wait(&self, ms: u64) -> io::Result<bool> {
        // macOS lacks sem_timedwait; poll try_wait instead.
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(ms);
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            backoff.snooze();
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn timed_wait(&self, ms: u64) -> io::Result<bool> {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        let ns_total = ts.tv_nsec as u64 + (ms % 1000) * 1_000_000;
        ts.tv_sec += (ms / 1000) as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
        ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
        loop {
            if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                return Ok(true);
            }
            let e = io::Error::last_os_error();
            match e.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(e),
            }
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c_name) = c_name(name) {
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}
