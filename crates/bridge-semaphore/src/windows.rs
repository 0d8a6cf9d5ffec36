use std::os::windows::ffi::OsStrExt;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0};
use windows_sys::Win32::System::Threading::{
    OpenSemaphoreW, ReleaseSemaphore, WaitForSingleObject, INFINITE, SEMAPHORE_ALL_ACCESS,
};

use crate::error::SemaphoreError;

/// Opens an existing named Win32 semaphore. Never creates or unlinks,
/// mirroring the Unix wrapper's contract.
pub struct NamedSemaphore {
    name: String,
    handle: HANDLE,
}

// SAFETY: a Win32 semaphore HANDLE is a stable kernel-object reference and
// is safe to use from any thread.
unsafe impl Send for NamedSemaphore {}

fn wide_name(name: &str) -> Vec<u16> {
    std::ffi::OsStr::new(name)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

impl NamedSemaphore {
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let wide = wide_name(name);

        // SAFETY: `wide` is a valid, NUL-terminated UTF-16 string that
        // outlives this call.
        let handle = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, 0, wide.as_ptr()) };

        if handle == 0 {
            return Err(SemaphoreError::Open {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn acquire(&self) -> Result<(), SemaphoreError> {
        // SAFETY: `self.handle` is a valid semaphore handle owned by `self`.
        let result = unsafe { WaitForSingleObject(self.handle, INFINITE) };
        if result == WAIT_FAILED || result != WAIT_OBJECT_0 {
            return Err(SemaphoreError::Acquire {
                name: self.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn release(&self) -> Result<(), SemaphoreError> {
        // SAFETY: see `acquire`.
        let ok = unsafe { ReleaseSemaphore(self.handle, 1, std::ptr::null_mut()) };
        if ok == 0 {
            return Err(SemaphoreError::Release {
                name: self.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn close(self) -> Result<(), SemaphoreError> {
        drop(self);
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `self.handle` is only ever closed once, here.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
