// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the shared memory segment (pagefile-backed file
// mapping) and the named counting semaphore.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use windows_sys::Win32::Foundation::HANDLE;

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

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

// ---------------------------------------------------------------------------
// PlatformShm: Windows shared memory via file mapping
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
    user_size: usize,
    prev_ref: i32,
}

unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn create(name: &str, user_size: usize) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::System::Memory::*;

        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let wide_name = to_wide(name);
        let total_size = calc_size(user_size);
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE | SEC_COMMIT,
                0,
                total_size as u32,
                wide_name.as_ptr(),
            )
        };
        let err = unsafe { GetLastError() };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        if err == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "shm already exists"));
        }
        Self::map(handle, Some((total_size, user_size)))
    }

    pub fn attach(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Memory::*;

        let wide_name = to_wide(name);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Self::map(handle, None)
    }

    fn map(handle: HANDLE, sizes: Option<(usize, usize)>) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::*;

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        let mem = view.Value as *mut u8;
        if mem.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }

        let (total, user) = match sizes {
            Some(s) => s,
            None => {
                let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
                let ret = unsafe {
                    VirtualQuery(
                        mem as *const _,
                        &mut info,
                        std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                    )
                };
                if ret == 0 || info.RegionSize <= ACC_SIZE {
                    let e = io::Error::last_os_error();
                    unsafe {
                        UnmapViewOfFile(view);
                        CloseHandle(handle);
                    }
                    return Err(e);
                }
                (info.RegionSize, info.RegionSize - ACC_SIZE)
            }
        };

        let prev = unsafe { acc_of(mem).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            handle,
            mem,
            size: total,
            user_size: user,
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

    pub fn prev_ref_count(&self) -> i32 {
        self.prev_ref
    }

    pub fn ref_count(&self) -> i32 {
        if self.mem.is_null() || self.size == 0 {
            return 0;
        }
        unsafe { acc_of(self.mem).load(Ordering::Acquire) }
    }

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};

        if !self.mem.is_null() && self.size > 0 {
            unsafe {
                acc_of(self.mem).fetch_sub(1, Ordering::AcqRel);
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.mem as *mut _,
                });
            }
        }
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: Windows named semaphore
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    handle: HANDLE,
    name: String,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::System::Threading::CreateSemaphoreW;

        let wide_name = to_wide(name);
        let h = unsafe {
            CreateSemaphoreW(ptr::null(), initial as i32, i32::MAX, wide_name.as_ptr())
        };
        let err = unsafe { GetLastError() };
        if h.is_null() {
            return Err(io::Error::last_os_error());
        }
        if err == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(h) };
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "semaphore already exists"));
        }
        Ok(Self {
            handle: h,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Threading::{OpenSemaphoreW, SEMAPHORE_ALL_ACCESS};

        let wide_name = to_wide(name);
        let h = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if h.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            handle: h,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, count: u32) -> io::Result<()> {
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;

        if count == 0 {
            return Ok(());
        }
        if unsafe { ReleaseSemaphore(self.handle, count as i32, ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn try_wait(&self) -> io::Result<bool> {
        self.wait(Some(0))
    }

    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        use windows_sys::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT};
        use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

        let ms = match timeout_ms {
            None => INFINITE,
            Some(ms) => ms.min((INFINITE - 1) as u64) as u32,
        };
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn unlink_by_name(_name: &str) {
        // Kernel objects vanish with their last handle.
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}
