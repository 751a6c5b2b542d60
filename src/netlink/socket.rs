//! Generic netlink socket management
//!
//! Safe wrapper around the `AF_NETLINK` / `NETLINK_GENERIC` socket lifecycle.
//! The socket is opened in [`NetlinkSocket::new`] and closed in `Drop`, so a
//! query that fails halfway through still releases its descriptor.
//!
//! # Platform Support
//!
//! **Linux only.** Generic netlink is a Linux kernel interface.
//!
//! # Educational Notes
//!
//! ## One socket per query
//!
//! Every kernel query opens its own socket, resolves the family, runs one
//! dump and drops the socket. Nothing is pooled or shared between workers:
//!
//! ```text
//! worker A: socket ─ GETFAMILY ─ GET_STATION(dump) ─ close
//! worker B: socket ─ GETFAMILY ─ GET_SURVEY(dump)  ─ close
//! ```
//!
//! ## Detecting oversized datagrams
//!
//! Netlink is datagram based. If a reply is larger than the receive buffer,
//! a plain `recv()` silently discards the tail. Passing `MSG_TRUNC` makes the
//! kernel return the *real* datagram length instead, so the caller can
//! compare it with the buffer size and report truncation.
//!
//! ## Receive timeout
//!
//! `SO_RCVTIMEO` makes a blocked `recv()` fail with `EAGAIN` once the timeout
//! elapses. The dump loop maps that to a deadline error instead of hanging a
//! worker on a kernel that never sends `NLMSG_DONE`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use thiserror::Error;

use crate::NETLINK_BUFFER_SIZE;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Socket-level failure with the syscall that produced it
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct SocketError {
    context: &'static str,
    #[source]
    source: io::Error,
}

impl SocketError {
    #[must_use]
    pub fn new(context: &'static str, source: io::Error) -> Self {
        Self { context, source }
    }

    fn last_os_error(context: &'static str) -> Self {
        Self::new(context, io::Error::last_os_error())
    }

    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// True when a blocking receive ran into `SO_RCVTIMEO`
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

// ============================================================================
// TRANSPORT SEAM
// ============================================================================

/// Datagram transport to the kernel
///
/// Implemented by [`NetlinkSocket`] and, in tests, by a scripted replay.
pub trait Transport {
    /// Send one complete netlink request
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError>;

    /// Receive one datagram into `buffer`
    ///
    /// Returns the full datagram length, which may exceed `buffer.len()` when
    /// the datagram did not fit.
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError>;

    /// Bound how long the next `recv()` may block
    fn set_recv_timeout(&mut self, timeout: Duration) -> Result<(), SocketError>;
}

// ============================================================================
// NETLINK SOCKET
// ============================================================================

/// RAII wrapper around a generic netlink socket
#[derive(Debug)]
pub struct NetlinkSocket {
    fd: RawFd,
}

impl NetlinkSocket {
    /// Open and bind a `NETLINK_GENERIC` socket
    ///
    /// Send and receive buffers are sized to [`NETLINK_BUFFER_SIZE`], and
    /// `recv_timeout` is installed as `SO_RCVTIMEO`.
    ///
    /// # Errors
    ///
    /// Returns `SocketError` when any of `socket()`, `bind()` or
    /// `setsockopt()` fails. The descriptor is closed before returning.
    pub fn new(recv_timeout: Duration) -> Result<Self, SocketError> {
        // SAFETY: plain syscall with constant arguments; the result is checked.
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_GENERIC,
            )
        };
        if fd < 0 {
            return Err(SocketError::last_os_error("socket(NETLINK_GENERIC) failed"));
        }
        // From here on Drop closes fd on every error path.
        let socket = Self { fd };

        // SAFETY: sockaddr_nl is plain old data, all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: addr outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                socket.fd,
                (&raw const addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os_error("bind() failed"));
        }

        let bufsize = NETLINK_BUFFER_SIZE as libc::c_int;
        socket.set_option(libc::SO_RCVBUF, &bufsize, "setsockopt(SO_RCVBUF) failed")?;
        socket.set_option(libc::SO_SNDBUF, &bufsize, "setsockopt(SO_SNDBUF) failed")?;

        socket.install_recv_timeout(recv_timeout)?;

        Ok(socket)
    }

    fn install_recv_timeout(&self, timeout: Duration) -> Result<(), SocketError> {
        // A zero timeval means "block forever".
        let timeout = timeout.max(Duration::from_micros(1));
        let timeval = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
        };
        self.set_option(libc::SO_RCVTIMEO, &timeval, "setsockopt(SO_RCVTIMEO) failed")
    }

    fn set_option<T>(
        &self,
        option: libc::c_int,
        value: &T,
        context: &'static str,
    ) -> Result<(), SocketError> {
        // SAFETY: value points to a live T and the length is size_of::<T>().
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                option,
                (value as *const T).cast::<libc::c_void>(),
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os_error(context));
        }
        Ok(())
    }
}

impl Transport for NetlinkSocket {
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        // SAFETY: sockaddr_nl is plain old data; nl_pid 0 addresses the kernel.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        // SAFETY: data and addr are valid for the lengths passed.
        let ret = unsafe {
            libc::sendto(
                self.fd,
                data.as_ptr().cast::<libc::c_void>(),
                data.len(),
                0,
                (&raw const addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::last_os_error("sendto() failed"));
        }
        if ret as usize != data.len() {
            return Err(SocketError::new(
                "sendto() short write",
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sent {} of {} bytes", ret, data.len()),
                ),
            ));
        }
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        loop {
            // SAFETY: buffer is valid for buffer.len() writable bytes.
            let ret = unsafe {
                libc::recv(
                    self.fd,
                    buffer.as_mut_ptr().cast::<libc::c_void>(),
                    buffer.len(),
                    libc::MSG_TRUNC,
                )
            };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(SocketError::new("recv() failed", err));
            }
        }
    }

    fn set_recv_timeout(&mut self, timeout: Duration) -> Result<(), SocketError> {
        self.install_recv_timeout(timeout)
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // SAFETY: fd was returned by socket() and is closed exactly once here.
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
