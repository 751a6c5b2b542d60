//! Listener setup and the accept loop
//!
//! # Educational Notes
//!
//! ## Several listeners, one loop
//!
//! The exporter listens on `[::]:9100` and `0.0.0.0:9100` by default. With
//! `IPV6_V6ONLY` set on the IPv6 socket the two bindings do not collide, and
//! either family can be missing on a host without taking the other down.
//!
//! All listeners are non-blocking and watched with a single `poll(2)`:
//!
//! ```text
//! loop {
//!     poll(listeners, 500 ms)        ◄── wakes up to check the shutdown flag
//!     for each readable listener:
//!         accept() until WouldBlock  ◄── drains bursts in one wakeup
//!         hand each stream to the pool
//!     accept() failed (EMFILE...)?   ◄── sleep one interval before polling
//! }
//! ```
//!
//! ## Backing off on accept failures
//!
//! When `accept()` fails with something like `EMFILE`, the pending
//! connection stays in the backlog and the listener stays readable. Polling
//! again right away would spin, so the loop sleeps for one poll interval
//! first, and the warning is logged at most once per
//! [`ACCEPT_WARN_INTERVAL`] with a count of the failures in between.
//!
//! ## Why raw sockets for listeners
//!
//! `std::net::TcpListener::bind` offers no way to set `IPV6_V6ONLY` or the
//! backlog before `listen()`. The socket is therefore created with `libc` and
//! wrapped in a `TcpListener` right away, which owns and closes the fd.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use threadpool::ThreadPool;
use tracing::{debug, info, info_span, warn};

use crate::http::handle_connection;
use crate::netlink::{Connector, Nl80211Client};

/// How often the accept loop re-checks the shutdown flag
pub const POLL_INTERVAL_MS: libc::c_int = 500;

/// Pause after a failed `accept()` before polling again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(POLL_INTERVAL_MS as u64);

/// Minimum gap between two "accept failed" warnings
pub const ACCEPT_WARN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("none of the listen addresses could be bound")]
    NoListeners,

    #[error("poll() failed: {0}")]
    Poll(#[source] io::Error),
}

// ============================================================================
// LISTENERS
// ============================================================================

fn set_flag(fd: RawFd, level: libc::c_int, option: libc::c_int) -> io::Result<()> {
    let one: libc::c_int = 1;
    // SAFETY: `one` lives across the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            (&raw const one).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_raw(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    let ret = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_in is plain old data, all-zero is valid.
            let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            raw.sin_family = libc::AF_INET as libc::sa_family_t;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            // SAFETY: raw outlives the call and the length matches its type.
            unsafe {
                libc::bind(
                    fd,
                    (&raw const raw).cast::<libc::sockaddr>(),
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            // SAFETY: sockaddr_in6 is plain old data, all-zero is valid.
            let mut raw: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            raw.sin6_port = v6.port().to_be();
            raw.sin6_flowinfo = v6.flowinfo();
            raw.sin6_addr.s6_addr = v6.ip().octets();
            raw.sin6_scope_id = v6.scope_id();
            // SAFETY: raw outlives the call and the length matches its type.
            unsafe {
                libc::bind(
                    fd,
                    (&raw const raw).cast::<libc::sockaddr>(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Create a non-blocking listener with `SO_REUSEADDR` (and `IPV6_V6ONLY`
/// for IPv6 addresses)
///
/// # Errors
///
/// Returns the failing syscall's error; the socket is closed on failure.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    // SAFETY: plain syscall with constant arguments; the result is checked.
    let fd = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a fresh socket nobody else owns; the listener closes it.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
    if addr.is_ipv6() {
        set_flag(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY)?;
    }
    bind_raw(fd, addr)?;

    // SAFETY: fd is a bound stream socket.
    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(listener)
}

/// Bind every address that can be bound
///
/// # Errors
///
/// `ServerError::NoListeners` when all of them fail.
pub fn bind_listeners(addrs: &[SocketAddr], backlog: i32) -> Result<Vec<TcpListener>, ServerError> {
    let mut listeners = Vec::with_capacity(addrs.len());
    for addr in addrs {
        match bind_listener(*addr, backlog) {
            Ok(listener) => {
                info!(address = %addr, "listening");
                listeners.push(listener);
            }
            Err(e) => warn!(address = %addr, error = %e, "cannot listen on address"),
        }
    }
    if listeners.is_empty() {
        return Err(ServerError::NoListeners);
    }
    Ok(listeners)
}

// ============================================================================
// SERVER
// ============================================================================

/// Accept loop plus worker pool
pub struct Server<C> {
    listeners: Vec<TcpListener>,
    client: Nl80211Client<C>,
    pool: ThreadPool,
    client_timeout: Duration,
}

impl<C> Server<C>
where
    C: Connector + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        listeners: Vec<TcpListener>,
        client: Nl80211Client<C>,
        workers: usize,
        client_timeout: Duration,
    ) -> Self {
        Self {
            listeners,
            client,
            pool: ThreadPool::with_name("scrape-worker".to_owned(), workers.max(1)),
            client_timeout,
        }
    }

    /// Addresses actually bound (resolves port 0)
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Serve until `running` is cleared, then wait for in-flight requests
    ///
    /// # Errors
    ///
    /// `ServerError::Poll` when `poll(2)` fails with anything but `EINTR`.
    pub fn run(self, running: &Arc<AtomicBool>) -> Result<(), ServerError> {
        let mut fds: Vec<libc::pollfd> = self
            .listeners
            .iter()
            .map(|listener| libc::pollfd {
                fd: listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let mut failures = AcceptFailures::default();
        let result = loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }

            // SAFETY: fds is a valid array of fds.len() pollfd entries.
            let ready = unsafe {
                libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_INTERVAL_MS)
            };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(ServerError::Poll(err));
            }
            if ready == 0 {
                continue;
            }

            let mut backoff = false;
            for (listener, pfd) in self.listeners.iter().zip(fds.iter_mut()) {
                if pfd.revents & libc::POLLIN != 0
                    && self.drain(|| listener.accept(), &mut failures) == Drained::Failed
                {
                    backoff = true;
                }
                pfd.revents = 0;
            }
            if backoff {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
        };

        debug!("accept loop stopped, waiting for workers");
        self.pool.join();
        result
    }

    /// Accept until the listener is empty or `accept()` fails for real
    fn drain<A>(&self, mut accept: A, failures: &mut AcceptFailures) -> Drained
    where
        A: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
    {
        loop {
            match accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Drained::Empty,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) => {}
                Err(e) => {
                    failures.record(&e, Instant::now());
                    return Drained::Failed;
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let timeout = Some(self.client_timeout).filter(|t| !t.is_zero());
        let prepared = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_read_timeout(timeout))
            .and_then(|()| stream.set_write_timeout(timeout));
        if let Err(e) = prepared {
            warn!(peer = %peer, error = %e, "cannot configure accepted connection");
            return;
        }

        let client = self.client.clone();
        self.pool.execute(move || {
            let span = info_span!("connection", peer = %peer);
            let _entered = span.enter();
            handle_connection(stream, &client);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    Empty,
    Failed,
}

/// Rate limit for persistent `accept()` failures
#[derive(Debug, Default)]
struct AcceptFailures {
    last_warned: Option<Instant>,
    suppressed: u64,
}

impl AcceptFailures {
    /// Returns whether this failure was logged
    fn record(&mut self, err: &io::Error, now: Instant) -> bool {
        if let Some(at) = self.last_warned {
            if now.saturating_duration_since(at) < ACCEPT_WARN_INTERVAL {
                self.suppressed += 1;
                return false;
            }
        }
        warn!(error = %err, suppressed = self.suppressed, "accept failed, backing off");
        self.last_warned = Some(now);
        self.suppressed = 0;
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ROOT_PAGE;
    use crate::netlink::testing::ScriptedConnector;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(loopback(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_listeners_skips_failures() {
        let taken = bind_listener(loopback(), 16).unwrap();
        let busy = taken.local_addr().unwrap();
        // Without SO_REUSEPORT a second listener on the same port fails.
        let listeners = bind_listeners(&[busy, loopback()], 16).unwrap();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_bind_listeners_none_bound() {
        let taken = bind_listener(loopback(), 16).unwrap();
        let busy = taken.local_addr().unwrap();
        assert!(matches!(
            bind_listeners(&[busy], 16),
            Err(ServerError::NoListeners)
        ));
    }

    #[test]
    fn test_serves_root_page_end_to_end() {
        let listener = bind_listener(loopback(), 16).unwrap();
        let client = Nl80211Client::new(ScriptedConnector::new(), Duration::from_secs(1));
        let server = Server::new(vec![listener], client, 2, Duration::from_secs(5));
        let addr = server.local_addrs()[0];

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || server.run(&flag));

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"GET / HTTP/1.0\r\nHost: test\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.ends_with(ROOT_PAGE));
    }

    fn idle_server() -> Server<ScriptedConnector> {
        let listener = bind_listener(loopback(), 16).unwrap();
        let client = Nl80211Client::new(ScriptedConnector::new(), Duration::from_secs(1));
        Server::new(vec![listener], client, 1, Duration::from_secs(5))
    }

    #[test]
    fn test_drain_stops_on_persistent_accept_error() {
        let server = idle_server();
        let mut failures = AcceptFailures::default();
        let mut calls = 0;

        let drained = server.drain(
            || {
                calls += 1;
                Err(io::Error::from_raw_os_error(libc::EMFILE))
            },
            &mut failures,
        );

        assert_eq!(drained, Drained::Failed);
        assert_eq!(calls, 1);
        assert!(failures.last_warned.is_some());
    }

    #[test]
    fn test_drain_retries_transient_errors_until_empty() {
        let server = idle_server();
        let mut failures = AcceptFailures::default();
        let mut script = vec![
            io::ErrorKind::WouldBlock,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::Interrupted,
        ];

        let drained = server.drain(
            || Err(io::Error::from(script.pop().unwrap_or(io::ErrorKind::WouldBlock))),
            &mut failures,
        );

        assert_eq!(drained, Drained::Empty);
        assert!(script.is_empty());
        assert!(failures.last_warned.is_none());
    }

    #[test]
    fn test_accept_failure_warnings_are_rate_limited() {
        let mut failures = AcceptFailures::default();
        let err = io::Error::from_raw_os_error(libc::EMFILE);
        let start = Instant::now();

        assert!(failures.record(&err, start));
        assert!(!failures.record(&err, start + Duration::from_secs(1)));
        assert!(!failures.record(&err, start + Duration::from_secs(9)));
        assert_eq!(failures.suppressed, 2);

        assert!(failures.record(&err, start + ACCEPT_WARN_INTERVAL + Duration::from_secs(1)));
        assert_eq!(failures.suppressed, 0);
    }

    #[test]
    fn test_backoff_matches_poll_interval() {
        assert_eq!(ACCEPT_BACKOFF, Duration::from_millis(500));
    }
}
