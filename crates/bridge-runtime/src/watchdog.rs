use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// Polls the parent process's liveness at `interval` and terminates the
/// process the moment it's gone, mirroring the original bootstrap's
/// zero-signal/ppid-changed watchdog thread.
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawns the poll loop as a tokio task. The process exits with status
    /// 1 the moment the parent is no longer reachable.
    pub fn spawn(interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !parent_is_alive().await {
                    warn!("parent process is gone, terminating");
                    std::process::exit(1);
                }
            }
        });
        Self { handle }
    }

    pub fn abort(self) {
        self.handle.abort();
    }
}

#[cfg(unix)]
async fn parent_is_alive() -> bool {
    tokio::task::spawn_blocking(unix::probe_parent)
        .await
        .unwrap_or(false)
}

#[cfg(windows)]
async fn parent_is_alive() -> bool {
    tokio::task::spawn_blocking(windows::probe_parent)
        .await
        .unwrap_or(false)
}

#[cfg(unix)]
mod unix {
    /// `kill(ppid, 0)` raises no error iff the parent still exists and is
    /// signalable; a dead or reparented-to-init parent means exit.
    pub fn probe_parent() -> bool {
        let ppid = unsafe { libc::getppid() };
        if ppid <= 1 {
            return false;
        }
        unsafe { libc::kill(ppid, 0) == 0 }
    }
}

#[cfg(windows)]
mod windows {
    use std::sync::OnceLock;

    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE, STILL_ACTIVE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    /// Whether the parent pid recorded at start-up is still a live process.
    /// Cheaper than re-walking a snapshot every tick: one `OpenProcess` +
    /// `GetExitCodeProcess` pair, mirroring the unix zero-signal probe.
    pub fn probe_parent() -> bool {
        let Some(pid) = startup_parent_pid() else {
            return true;
        };

        let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if handle == 0 {
            return false;
        }

        let mut exit_code: u32 = 0;
        let ok = unsafe { GetExitCodeProcess(handle, &mut exit_code) };
        unsafe { CloseHandle(handle) };

        ok != 0 && exit_code == STILL_ACTIVE as u32
    }

    fn startup_parent_pid() -> Option<u32> {
        static PARENT: OnceLock<Option<u32>> = OnceLock::new();
        *PARENT.get_or_init(find_parent_pid_via_snapshot)
    }

    fn find_parent_pid_via_snapshot() -> Option<u32> {
        let current_pid = std::process::id();
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if snapshot == INVALID_HANDLE_VALUE {
            return None;
        }

        let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut result = None;
        let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) } != 0;
        while ok {
            if entry.th32ProcessID == current_pid {
                result = Some(entry.th32ParentProcessID);
                break;
            }
            ok = unsafe { Process32NextW(snapshot, &mut entry) } != 0;
        }
        unsafe { CloseHandle(snapshot) };
        result
    }
}
