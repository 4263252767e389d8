//! Process-wide `SIGSEGV` routing.

use log::{error, trace};
use pagestep_core::{FaultHandler, OracleError};
use std::ffi::c_void;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

/// Serializes sessions; only one handler can be installed at a time.
static SESSION: Mutex<()> = Mutex::new(());

/// The handler of the running session, null outside of sessions.
static ACTIVE: AtomicPtr<Slot> = AtomicPtr::new(ptr::null_mut());

struct Slot {
    handler: *mut (dyn FaultHandler + 'static),
    /// First fatal error of the session, returned once the victim call ends
    fatal: Option<OracleError>,
}

extern "C" fn handle_sigsegv(_signal: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    // SAFETY: the kernel passes a valid siginfo_t for SA_SIGINFO handlers
    let address = unsafe { (*info).si_addr() } as usize;
    let slot = ACTIVE.load(Ordering::SeqCst);
    if slot.is_null() {
        reset_default();
        return;
    }
    // SAFETY: `ACTIVE` only points to the slot of the running session, which
    // outlives the victim call. The victim runs on this thread and does not
    // hold a reference to the handler or the slot.
    let slot = unsafe { &mut *slot };
    if slot.fatal.is_some() {
        // pages were released; this fault is not ours
        reset_default();
        return;
    }
    // SAFETY: as above
    let handler = unsafe { &mut *slot.handler };
    match handler.on_fault(address) {
        Ok(decision) => trace!("SIGSEGV at 0x{:x}: {:?}", address, decision),
        Err(e @ OracleError::UnknownPage { .. }) => {
            error!("Fatal fault at 0x{:x}: {}", address, e);
            reset_default();
        }
        Err(e) => {
            error!("Fatal fault at 0x{:x}: {}", address, e);
            if let Err(release) = handler.release() {
                error!("Failed to release monitored pages: {}", release);
                reset_default();
            }
            slot.fatal = Some(e);
        }
    }
}

fn reset_default() {
    // SAFETY: restoring the default disposition is always valid
    unsafe {
        libc::signal(libc::SIGSEGV, libc::SIG_DFL);
    }
}

fn sigaction(action: &libc::sigaction) -> io::Result<libc::sigaction> {
    // SAFETY: zeroed sigaction is a valid out-parameter
    let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers are valid for the duration of the call
    let ret = unsafe { libc::sigaction(libc::SIGSEGV, action, &mut previous) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(previous)
}

/// The installed handler; restores the previous disposition on removal.
struct Installed {
    previous: libc::sigaction,
    removed: bool,
}

impl Installed {
    fn new() -> io::Result<Self> {
        // SAFETY: zeroed sigaction is valid; every field we need is set below
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = handle_sigsegv
            as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void)
            as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO;
        // SAFETY: sa_mask is a valid sigset_t
        unsafe { libc::sigemptyset(&mut action.sa_mask) };
        let previous = sigaction(&action)?;
        Ok(Self {
            previous,
            removed: false,
        })
    }

    fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);
        sigaction(&self.previous).map(|_| ())
    }
}

impl Drop for Installed {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);
        if let Err(e) = sigaction(&self.previous) {
            error!("Failed to restore SIGSEGV disposition: {}", e);
        }
    }
}

/// Runs `run` with `handler` receiving every `SIGSEGV` of this process.
pub(crate) fn deliver<R>(
    handler: &mut dyn FaultHandler,
    run: impl FnOnce() -> R,
) -> Result<R, OracleError> {
    let _session = SESSION.lock().unwrap_or_else(PoisonError::into_inner);
    let raw: *mut (dyn FaultHandler + '_) = handler;
    let mut slot = Slot {
        // SAFETY: only the lifetime is erased; the slot is withdrawn from
        // `ACTIVE` before this function returns or unwinds.
        handler: unsafe { std::mem::transmute(raw) },
        fatal: None,
    };
    ACTIVE.store(&mut slot, Ordering::SeqCst);
    let installed = match Installed::new() {
        Ok(installed) => installed,
        Err(e) => {
            ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);
            return Err(OracleError::TrapInstall(e));
        }
    };
    let result = run();
    let removed = installed.remove().map_err(OracleError::TrapInstall);
    if let Some(fatal) = slot.fatal.take() {
        return Err(fatal);
    }
    removed?;
    Ok(result)
}
