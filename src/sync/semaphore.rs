//! Named POSIX semaphore, used only to serialize shared-segment creation:
//! the same `sem_open`/`sem_wait`/`sem_post`/`sem_close`/`sem_unlink` calls
//! as any libc-level semaphore wrapper, returning the crate's typed
//! [`Error`] and exposing the create-xor-open race the coordinator protocol
//! needs.

use crate::error::{Error, Result};
use libc::{sem_t, O_CREAT, O_EXCL};
use std::ffi::CString;
use std::ptr;

fn last_os_error(context: &str) -> Error {
    Error::system(context, std::io::Error::last_os_error())
}

pub struct NamedSemaphore {
    handle: *mut sem_t,
    name: String,
}

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Creates the semaphore exclusively (`O_CREAT | O_EXCL`). Returns
    /// `Ok(None)` if it already existed instead of erroring, so the caller
    /// can fall back to [`NamedSemaphore::open`] and wait on the winner's
    /// creation instead.
    pub fn create_exclusive(name: &str, initial_value: u32) -> Result<Option<Self>> {
        let cname = CString::new(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let handle = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                O_CREAT | O_EXCL,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
                initial_value as libc::c_uint,
            )
        };
        if handle == libc::SEM_FAILED {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Ok(None);
            }
            return Err(Error::system(format!("sem_open(create) {}", name), err));
        }
        Ok(Some(NamedSemaphore {
            handle,
            name: name.to_string(),
        }))
    }

    pub fn open(name: &str) -> Result<Self> {
        let cname = CString::new(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let handle = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if handle == libc::SEM_FAILED {
            return Err(last_os_error(&format!("sem_open(open) {}", name)));
        }
        Ok(NamedSemaphore {
            handle,
            name: name.to_string(),
        })
    }

    pub fn wait(&self) -> Result<()> {
        if unsafe { libc::sem_wait(self.handle) } != 0 {
            return Err(last_os_error(&format!("sem_wait {}", self.name)));
        }
        Ok(())
    }

    pub fn post(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.handle) } != 0 {
            return Err(last_os_error(&format!("sem_post {}", self.name)));
        }
        Ok(())
    }

    pub fn unlink(name: &str) -> Result<()> {
        let cname = CString::new(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if unsafe { libc::sem_unlink(cname.as_ptr()) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(Error::system(format!("sem_unlink {}", name), err));
            }
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if unsafe { libc::sem_close(self.handle) } != 0 {
            log::warn!(
                "failed to close named semaphore {}: {}",
                self.name,
                std::io::Error::last_os_error()
            );
        }
        self.handle = ptr::null_mut();
    }
}
