//! Reclaims exited handler processes.
//!
//! A `SIGCHLD` handler reaps every child that has exited so far with
//! non-blocking `waitpid` calls. Signals coalesce, so one invocation may
//! have to collect several children. The handler only calls `waitpid` and
//! bumps an atomic counter; it never allocates or blocks.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Children reaped since the handler was installed.
static REAPED: AtomicUsize = AtomicUsize::new(0);

/// Install the `SIGCHLD` handler for the whole process.
///
/// Calling this more than once is harmless; the first outcome is reused.
pub fn install() -> io::Result<()> {
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

    INSTALLED
        .get_or_init(|| {
            // SAFETY: the action is fully initialised before use and the
            // handler only performs async-signal-safe calls.
            unsafe {
                let handler: extern "C" fn(libc::c_int) = on_child_exit;
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = handler as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
                libc::sigemptyset(&mut action.sa_mask);

                if libc::sigaction(libc::SIGCHLD, &action, ptr::null_mut()) == -1 {
                    let err = io::Error::last_os_error();
                    return Err(err.raw_os_error().unwrap_or(libc::EINVAL));
                }
            }
            Ok(())
        })
        .map_err(io::Error::from_raw_os_error)
}

/// Number of handler processes reaped so far.
pub fn reaped_count() -> usize {
    REAPED.load(Ordering::Relaxed)
}

/// Reap every exited child without blocking. Returns how many were reaped.
pub fn reap_exited() -> usize {
    let mut count = 0;
    loop {
        // SAFETY: waitpid with a null status pointer is always valid.
        let pid = unsafe { libc::waitpid(-1, ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        count += 1;
    }
    REAPED.fetch_add(count, Ordering::Relaxed);
    count
}

extern "C" fn on_child_exit(_signal: libc::c_int) {
    // waitpid clobbers errno, which the interrupted code may be about to read.
    // SAFETY: errno_location points at this thread's errno.
    let saved = unsafe { *errno_location() };
    reap_exited();
    unsafe { *errno_location() = saved };
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

/// Holds `SIGCHLD` blocked on the current thread until dropped.
///
/// Process creation may wait on its own child internally; the reaper
/// must not collect that child first.
pub struct Deferred {
    previous: libc::sigset_t,
}

/// Block `SIGCHLD` for the current thread.
pub fn defer() -> io::Result<Deferred> {
    // SAFETY: both sets are initialised by sigemptyset / pthread_sigmask
    // before being read.
    unsafe {
        let mut blocked: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut blocked);
        libc::sigaddset(&mut blocked, libc::SIGCHLD);

        let mut previous: libc::sigset_t = mem::zeroed();
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &blocked, &mut previous);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(Deferred { previous })
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        // SAFETY: restores the mask captured in `defer`.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}
