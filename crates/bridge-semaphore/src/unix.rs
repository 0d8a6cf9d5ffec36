use std::ffi::CString;

use crate::error::SemaphoreError;

/// Opens an existing named POSIX semaphore.
///
/// Never creates or unlinks: the host is assumed to already own the
/// semaphore's lifecycle, matching the contract that the child only ever
/// opens a semaphore whose name arrived through the bundle's `KVPairs`.
pub struct NamedSemaphore {
    name: String,
    handle: *mut libc::sem_t,
}

// SAFETY: `sem_t*` returned by `sem_open` is a stable kernel-object handle;
// POSIX semaphore operations are safe to call from any thread.
unsafe impl Send for NamedSemaphore {}

impl NamedSemaphore {
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        // SAFETY: `c_name` is a valid, NUL-terminated C string that outlives
        // this call; we pass no O_CREAT flag so no variadic mode/value
        // arguments are required.
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if handle.is_null() || handle as isize == -1 {
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
        // SAFETY: `self.handle` was returned by a successful `sem_open` and
        // is not shared with any other owner.
        let result = unsafe { libc::sem_wait(self.handle) };
        if result != 0 {
            return Err(SemaphoreError::Acquire {
                name: self.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn release(&self) -> Result<(), SemaphoreError> {
        // SAFETY: see `acquire`.
        let result = unsafe { libc::sem_post(self.handle) };
        if result != 0 {
            return Err(SemaphoreError::Release {
                name: self.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn close(self) -> Result<(), SemaphoreError> {
        // `Drop` performs the actual close; consuming `self` here just
        // gives callers an explicit, fallible close point.
        drop(self);
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `self.handle` is only ever closed once, here.
        unsafe {
            libc::sem_close(self.handle);
        }
    }
}
