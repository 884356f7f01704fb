//! Stdout isolation for worker processes.
//!
//! The worker's fd 1 is the response channel. Anything else printing to
//! stdout (handler code, libraries, child processes) would be spliced into the
//! response frame. Before handler logic runs we keep a private duplicate of
//! fd 1 for the frame and point fd 1 at stderr, so stray output ends up in the
//! parent's stderr capture instead.
//!
//! Must be called before any threads or child processes that write to stdout
//! are started.

use std::io;

/// Writable end of the response channel.
#[cfg(unix)]
pub type ResponseChannel = std::fs::File;

#[cfg(not(unix))]
pub type ResponseChannel = io::Stdout;

/// Take ownership of the response channel and redirect fd 1 to stderr.
#[cfg(unix)]
pub fn isolate_stdout() -> io::Result<ResponseChannel> {
    use std::io::Write;
    use std::os::fd::{AsFd, FromRawFd, OwnedFd};

    use nix::unistd::{dup, dup2};

    // Anything already buffered belongs on the original channel.
    io::stdout().flush()?;

    let channel = dup(io::stdout().as_fd())
        .map_err(|e| io::Error::other(format!("dup(stdout) failed: {e}")))?;

    // Safety: fd 1 is open for the whole process lifetime. The OwnedFd is only
    // used as a dup2 target and forgotten afterwards, so fd 1 is never closed.
    let mut target = unsafe { OwnedFd::from_raw_fd(1) };
    let redirected = dup2(io::stderr().as_fd(), &mut target)
        .map_err(|e| io::Error::other(format!("dup2(stderr -> stdout) failed: {e}")));
    std::mem::forget(target);
    redirected?;

    tracing::trace!("Moved response channel off fd 1");
    Ok(std::fs::File::from(channel))
}

/// Without fd duplication the channel stays on stdout.
#[cfg(not(unix))]
pub fn isolate_stdout() -> io::Result<ResponseChannel> {
    tracing::debug!("Stdout isolation unavailable on this platform");
    Ok(io::stdout())
}
