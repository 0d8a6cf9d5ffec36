//! Construction of a [`FramedTransport`] from raw inherited pipe file
//! descriptors, the shape the host handshake hands the child.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use tokio::net::unix::pipe;

use crate::error::TransportError;
use crate::transport::FramedTransport;

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: `fd` is a valid, open descriptor owned by the caller for the
    // duration of this call; fcntl with F_GETFL/F_SETFL does not take
    // ownership of it.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// A `tokio::net::unix::pipe` pair built from raw inherited descriptors.
pub type UnixFramedTransport = FramedTransport<pipe::Receiver, pipe::Sender>;

/// Switches `pipe_in_fd`/`pipe_out_fd` to non-blocking mode and wraps each
/// in its `tokio::net::unix::pipe` half, without bundling them into a
/// [`FramedTransport`]; callers that need the halves separately (e.g. to
/// hand a reader and a writer to two independent tasks) use this directly.
/// [`from_raw_fds`] is the common case that wants them paired.
pub fn raw_pipe_pair(
    pipe_in_fd: RawFd,
    pipe_out_fd: RawFd,
) -> Result<(pipe::Receiver, pipe::Sender), TransportError> {
    set_nonblocking(pipe_in_fd)?;
    set_nonblocking(pipe_out_fd)?;

    // SAFETY: the host handshake contract guarantees these descriptors
    // are open, inherited, and not used elsewhere once handed to the
    // child.
    let read_file: std::fs::File = unsafe { OwnedFd::from_raw_fd(pipe_in_fd) }.into();
    let write_file: std::fs::File = unsafe { OwnedFd::from_raw_fd(pipe_out_fd) }.into();

    let receiver = pipe::Receiver::from_file(read_file)?;
    let sender = pipe::Sender::from_file(write_file)?;

    Ok((receiver, sender))
}

/// Wraps the child's inherited `pipe_in`/`pipe_out` descriptors into a
/// [`FramedTransport`]. Each descriptor is switched to non-blocking mode,
/// as tokio's pipe wrapper requires, then handed to the reactor.
pub fn from_raw_fds(
    pipe_in_fd: RawFd,
    pipe_out_fd: RawFd,
) -> Result<UnixFramedTransport, TransportError> {
    let (receiver, sender) = raw_pipe_pair(pipe_in_fd, pipe_out_fd)?;
    Ok(FramedTransport::new(receiver, sender))
}

/// Wraps a single inherited descriptor as a write-only status channel.
pub fn status_sender_from_raw_fd(status_fd: RawFd) -> Result<pipe::Sender, TransportError> {
    set_nonblocking(status_fd)?;
    let owned: std::fs::File = unsafe { OwnedFd::from_raw_fd(status_fd) }.into();
    Ok(pipe::Sender::from_file(owned)?)
}
