//! Handle surface: the thin layer pairing an OS descriptor with a reference
//! to its [`SharedFile`], plus duplication.
//!
//! This is a thin external-collaborator layer kept here only so the crate
//! is usable end to end -- `request` (the core) does not depend on any of
//! the `open()` flag/mode choices made below.

use crate::error::{Error, Result};
use crate::fork;
use crate::lock_table::TableSnapshot;
use crate::owner::Owner;
use crate::region_mutator::{duplicate_owner, strip_owner};
use crate::segment::SharedFile;
use std::ffi::CString;
use std::sync::Arc;

/// An externally visible `(descriptor, SharedFile reference)` pair -- the
/// unit of ownership: two handles on the same underlying file have
/// independent lock claims even though they share one mapped segment.
pub struct Handle {
    pub descriptor: libc::c_int,
    pub(crate) file: Arc<SharedFile>,
}

impl Handle {
    pub(crate) fn owner(&self) -> Owner {
        Owner::new(unsafe { libc::getpid() }, self.descriptor)
    }
}

fn fstat_identity(fd: libc::c_int) -> Result<(u64, u64)> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(Error::system("fstat", std::io::Error::last_os_error()));
    }
    Ok((st.st_dev as u64, st.st_ino as u64))
}

/// Opens `path` (creating it if absent) and attaches it to the shared lock
/// table for its `(device, inode)` identity.
pub fn attach(path: &str) -> Result<Handle> {
    let cpath = CString::new(path).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o644) };
    if fd < 0 {
        return Err(Error::system(format!("open {}", path), std::io::Error::last_os_error()));
    }

    let (dev, ino) = match fstat_identity(fd) {
        Ok(id) => id,
        Err(e) => {
            unsafe { libc::close(fd) };
            return Err(e);
        }
    };

    let file = match fork::open_or_attach(dev, ino) {
        Ok(file) => file,
        Err(e) => {
            unsafe { libc::close(fd) };
            return Err(e);
        }
    };

    Ok(Handle { descriptor: fd, file })
}

/// Closes `handle`: strips its ownership from every record (no splitting),
/// closes the OS descriptor, and releases the segment's shared reference,
/// unlinking it if this was the last one.
pub fn detach(handle: Handle) -> Result<()> {
    let owner = handle.owner();
    {
        let mut guard = handle.file.sync().lock()?;
        strip_owner(&mut guard, owner);
    }
    if unsafe { libc::close(handle.descriptor) } != 0 {
        return Err(Error::system("close", std::io::Error::last_os_error()));
    }
    handle.file.release_ref()
}

/// Duplicates `handle` onto the lowest available descriptor (`dup(2)`
/// semantics), carrying over ownership of every region `handle` currently
/// holds.
pub fn duplicate(handle: &Handle) -> Result<Handle> {
    let newfd = unsafe { libc::dup(handle.descriptor) };
    if newfd < 0 {
        return Err(Error::system("dup", std::io::Error::last_os_error()));
    }
    finish_duplicate(handle, newfd)
}

/// Duplicates `handle` onto the specific descriptor `newfd` (`dup2(2)`
/// semantics): if `newfd` was already open it is closed first.
pub fn duplicate_to(handle: &Handle, newfd: libc::c_int) -> Result<Handle> {
    let result = unsafe { libc::dup2(handle.descriptor, newfd) };
    if result < 0 {
        return Err(Error::system("dup2", std::io::Error::last_os_error()));
    }
    finish_duplicate(handle, newfd)
}

/// A point-in-time copy of `handle`'s table for diagnostics, e.g. printing
/// from a caller's own CLI. Takes the table mutex briefly; never blocks on
/// anything but that.
pub fn snapshot(handle: &Handle) -> Result<TableSnapshot> {
    let guard = handle.file.sync().lock()?;
    Ok(guard.snapshot())
}

/// Carries `newfd` over as a new `Handle` onto `handle.file`, duplicating
/// ownership of every region `handle` holds onto it. On failure -- most
/// likely an owner-set at capacity -- the ref count bump and the new
/// descriptor are both rolled back so no partial state survives the error.
fn finish_duplicate(handle: &Handle, newfd: libc::c_int) -> Result<Handle> {
    handle.file.bump_ref_count()?;

    let from = handle.owner();
    let to = Owner::new(unsafe { libc::getpid() }, newfd);
    let duplicated = {
        let mut guard = handle.file.sync().lock()?;
        duplicate_owner(&mut guard, from, to)
    };

    if let Err(e) = duplicated {
        let _ = handle.file.release_ref();
        unsafe { libc::close(newfd) };
        return Err(e);
    }

    Ok(Handle {
        descriptor: newfd,
        file: Arc::clone(&handle.file),
    })
}
