//! Process-local open-file registry and fork-time ownership inheritance.
//!
//! The original C library keeps this as a single static array, reset once
//! by `rl_init_library()`. The Rust equivalent needs no explicit init call:
//! [`registry`] lazily constructs itself on first use via [`OnceLock`].

use crate::error::Result;
use crate::owner::Owner;
use crate::segment::SharedFile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

type Registry = Mutex<HashMap<(u64, u64), Weak<SharedFile>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns this process's existing mapping for `(dev, ino)` if still live,
/// otherwise runs the creation/attach protocol and caches the result.
pub(crate) fn open_or_attach(dev: u64, ino: u64) -> Result<Arc<SharedFile>> {
    let mut reg = registry().lock().expect("registry mutex poisoned");

    if let Some(existing) = reg.get(&(dev, ino)).and_then(Weak::upgrade) {
        existing.bump_ref_count()?;
        return Ok(existing);
    }

    let file = Arc::new(SharedFile::open(dev, ino)?);
    reg.insert((dev, ino), Arc::downgrade(&file));
    Ok(file)
}

/// Drops dead entries. Called opportunistically; a stale `Weak` left behind
/// is harmless (the next `open_or_attach` on that key just re-creates it).
fn prune(reg: &mut HashMap<(u64, u64), Weak<SharedFile>>) {
    reg.retain(|_, weak| weak.strong_count() > 0);
}

/// Every currently-mapped `(dev, ino)` in this process, for inheritance.
fn live_files() -> Vec<Arc<SharedFile>> {
    let mut reg = registry().lock().expect("registry mutex poisoned");
    prune(&mut reg);
    reg.values().filter_map(Weak::upgrade).collect()
}

/// Duplicates the calling process's lock ownership into a freshly forked
/// child: walks every currently open shared file and duplicates each owner
/// entry `(parent_pid, d)` to `(child_pid, d)`. No separate list of open
/// descriptors is needed: every record already names the descriptors that
/// own it, so the child just promotes whichever of those belong to
/// `parent_pid`.
///
/// Returns the pid seen by the caller: the child's pid in the parent, `0`
/// in the child, matching `fork(2)`.
pub fn inherit_on_fork() -> Result<libc::pid_t> {
    let parent_pid = unsafe { libc::getpid() };
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        return Err(crate::error::Error::system(
            "fork",
            std::io::Error::last_os_error(),
        ));
    }

    if pid == 0 {
        let child_pid = unsafe { libc::getpid() };
        for file in live_files() {
            let guard_result = file.sync().lock();
            let mut guard = match guard_result {
                Ok(g) => g,
                Err(_) => continue,
            };
            for idx in guard.active_indices() {
                let parent_descriptors: Vec<libc::c_int> = guard.slots[idx]
                    .owners
                    .iter()
                    .filter(|o| o.pid == parent_pid)
                    .map(|o| o.descriptor)
                    .collect();
                for d in parent_descriptors {
                    let _ = guard.slots[idx].owners.add(Owner::new(child_pid, d));
                }
            }
            drop(guard);
            let _ = file.bump_ref_count();
        }
        return Ok(0);
    }

    Ok(pid)
}
