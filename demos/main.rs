//! Demonstrates a write lock held by a parent process, inherited across
//! `fork`, and contended by the blocking child until the parent releases it.

use anyhow::{anyhow, Context};
use rlock_core::{attach, detach, inherit_on_fork, request, snapshot, LockMode, LockSpec, RequestKind, Whence};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let path = args.get(1).cloned().unwrap_or_else(|| "/tmp/rlock-demo.dat".to_string());

    let handle = attach(&path).with_context(|| format!("attaching {}", path))?;

    request(
        &handle,
        LockMode::NonBlocking,
        LockSpec {
            kind: RequestKind::Write,
            whence: Whence::Begin,
            start: 0,
            len: 100,
        },
    )
    .context("parent acquiring initial write lock")?;
    println!("parent: holds WRITE [0,100)");
    print!("{}", snapshot(&handle).context("snapshot")?);

    let pid = inherit_on_fork().context("fork")?;

    if pid == 0 {
        println!("child: requesting WRITE [0,100) (blocking)");
        request(
            &handle,
            LockMode::Blocking,
            LockSpec {
                kind: RequestKind::Write,
                whence: Whence::Begin,
                start: 0,
                len: 100,
            },
        )
        .context("child acquiring write lock")?;
        println!("child: acquired WRITE [0,100) after parent released it");
        detach(handle).context("child detach")?;
        return Ok(());
    }

    std::thread::sleep(Duration::from_millis(300));
    println!("parent: releasing WRITE [0,100)");
    request(
        &handle,
        LockMode::NonBlocking,
        LockSpec {
            kind: RequestKind::Unlock,
            whence: Whence::Begin,
            start: 0,
            len: 100,
        },
    )
    .context("parent releasing write lock")?;

    let mut status = 0;
    if unsafe { libc::waitpid(pid, &mut status, 0) } < 0 {
        return Err(anyhow!("waitpid failed"));
    }

    detach(handle).context("parent detach")?;
    println!("parent: done");
    Ok(())
}
