// Foreground -> detached process transition
//
// The OS primitives sit behind `ProcessOps` so the step ordering and the
// abort-on-first-failure rule can be exercised without forking the caller.

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, close, dup2, fork, setsid, ForkResult};
use std::os::unix::io::RawFd;
use std::path::Path;
use tracing::debug;

use crate::errors::ProcessTransitionError;

const STD_STREAMS: [RawFd; 3] = [0, 1, 2];

/// Result of duplicating the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    /// The original process; `child` is the continuation's pid
    Parent { child: i32 },
    /// The continuation
    Child,
}

/// OS operations needed to detach a process
pub trait ProcessOps {
    fn fork(&mut self) -> Result<Fork, Errno>;
    fn new_session(&mut self) -> Result<(), Errno>;
    fn change_dir(&mut self, path: &Path) -> Result<(), Errno>;
    fn detach_std_streams(&mut self) -> Result<(), Errno>;
}

/// Outcome of a successful [`daemonize`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Running in the original process, which must exit immediately with status 0
    Parent { child: i32 },
    /// Running in the detached continuation
    Daemon,
}

/// Detach the calling process from its terminal
///
/// Steps, in order: fork (the parent returns [`Detached::Parent`]), start a
/// new session, change to `working_dir`, close stdin/stdout/stderr. The first
/// failing step aborts the transition; nothing is retried.
pub fn daemonize<P: ProcessOps>(
    ops: &mut P,
    working_dir: &Path,
) -> Result<Detached, ProcessTransitionError> {
    match ops.fork().map_err(ProcessTransitionError::Fork)? {
        Fork::Parent { child } => return Ok(Detached::Parent { child }),
        Fork::Child => {}
    }

    ops.new_session().map_err(ProcessTransitionError::Session)?;

    ops.change_dir(working_dir)
        .map_err(|source| ProcessTransitionError::ChangeDirectory {
            path: working_dir.to_path_buf(),
            source,
        })?;

    ops.detach_std_streams()
        .map_err(ProcessTransitionError::StdStreams)?;

    Ok(Detached::Daemon)
}

/// `ProcessOps` backed by the real POSIX calls
#[derive(Debug, Default)]
pub struct NixProcess;

impl ProcessOps for NixProcess {
    fn fork(&mut self) -> Result<Fork, Errno> {
        // SAFETY: called from main before any threads or the async runtime
        // exist, so the child inherits no locks held by other threads.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(Fork::Parent {
                child: child.as_raw(),
            }),
            ForkResult::Child => Ok(Fork::Child),
        }
    }

    fn new_session(&mut self) -> Result<(), Errno> {
        let sid = setsid()?;
        debug!(sid = sid.as_raw(), "New session created");
        Ok(())
    }

    fn change_dir(&mut self, path: &Path) -> Result<(), Errno> {
        chdir(path)
    }

    fn detach_std_streams(&mut self) -> Result<(), Errno> {
        for fd in STD_STREAMS {
            match close(fd) {
                Ok(()) | Err(Errno::EBADF) => {}
                Err(e) => return Err(e),
            }
        }

        // Park 0-2 on /dev/null so later descriptors never take their slots.
        let null = open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
        for fd in STD_STREAMS {
            if fd != null {
                dup2(null, fd)?;
            }
        }
        if !STD_STREAMS.contains(&null) {
            close(null)?;
        }
        Ok(())
    }
}
