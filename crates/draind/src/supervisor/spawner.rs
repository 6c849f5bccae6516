//! Process spawning seam
//!
//! The supervisor only talks to workers through [`ProcessSpawner`] and
//! [`WorkerProcess`], so tests can substitute fakes for real OS processes.

use drain_common::{PayloadCommand, WorkerRole};
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Whether a worker is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited on its own, with the exit code when one was reported
    Exited(Option<i32>),
}

/// A spawned worker the supervisor can poll and kill
pub trait WorkerProcess {
    fn id(&self) -> u32;

    /// Forceful termination of the worker and everything it started.
    /// Must also clean up after a worker whose leader already exited.
    fn kill(&mut self) -> io::Result<()>;

    /// Non-blocking liveness check
    fn poll(&mut self) -> io::Result<Liveness>;
}

/// Starts worker processes
pub trait ProcessSpawner {
    type Process: WorkerProcess;

    fn spawn(
        &mut self,
        role: WorkerRole,
        command: &PayloadCommand,
        scratch_dir: &Path,
    ) -> io::Result<Self::Process>;
}

/// Spawns real child processes
#[derive(Debug, Default)]
pub struct OsSpawner;

/// A real child process in its own process group
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    /// Group already killed and leader reaped
    terminated: bool,
}

impl ProcessSpawner for OsSpawner {
    type Process = OsProcess;

    fn spawn(
        &mut self,
        role: WorkerRole,
        command: &PayloadCommand,
        scratch_dir: &Path,
    ) -> io::Result<OsProcess> {
        let working_dir = command.working_dir.as_deref().unwrap_or(scratch_dir);

        let mut cmd = Command::new(&command.program);
        cmd.args(command.resolved_args(scratch_dir))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            // own group so the whole payload tree can be killed at once
            cmd.process_group(0);

            #[cfg(target_os = "linux")]
            die_with_parent(&mut cmd);
        }

        let child = cmd.spawn()?;
        debug!(role = %role, pid = child.id(), command = %command.display(), "Spawned worker");
        Ok(OsProcess {
            child,
            terminated: false,
        })
    }
}

/// Workers get SIGKILL if the supervisor dies without cleaning up
#[cfg(target_os = "linux")]
fn die_with_parent(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: prctl is async-signal-safe and touches no parent memory
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

impl WorkerProcess for OsProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.terminated {
            return Ok(());
        }

        // the group outlives its leader, so it is signalled even after the leader exited
        #[cfg(unix)]
        {
            let pgid = self.child.id() as libc::pid_t;
            // SAFETY: plain syscall on a process group this supervisor created
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                // ESRCH: every member is already gone
                if err.raw_os_error() != Some(libc::ESRCH) {
                    debug!(pid = pgid, "Process group kill failed ({}), killing leader", err);
                    if self.child.try_wait()?.is_none() {
                        self.child.kill()?;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }

        self.child.wait()?;
        self.terminated = true;
        Ok(())
    }

    fn poll(&mut self) -> io::Result<Liveness> {
        Ok(match self.child.try_wait()? {
            Some(status) => Liveness::Exited(status.code()),
            None => Liveness::Running,
        })
    }
}
