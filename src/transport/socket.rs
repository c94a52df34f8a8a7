//! Non-blocking TCP plumbing for the network transport.
//!
//! The daemon never blocks on a socket for longer than one poll interval:
//! the listening socket is non-blocking and polled with a zero timeout, and
//! sends wait for writability in bounded polls so the running flag is
//! re-checked at least once a second.
//!
//! [`is_net_down`] classifies the `EAGAIN` that accept reports after the
//! device wakes from sleep with its network stack reset. The listening
//! socket must then be recreated.

use crate::core::running::RunFlag;
use crate::error::{Error, Result};
use crate::streaming::PacketSink;
use std::io::{self, ErrorKind, Read, Write};
use std::mem;
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

/// Delay between failed listen attempts
pub const LISTEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Send timeout applied to accepted connections
pub const ACCEPTED_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Listen backlog: one client at a time
const LISTEN_BACKLOG: libc::c_int = 1;

/// Retry budget of [`send_all`] while the peer is not draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    /// Longest single wait for writability
    pub poll_timeout: Duration,
    /// Polls allowed per stall before giving up
    pub max_polls: u32,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_polls: 10,
        }
    }
}

/// Readiness of a socket during a write stall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Nothing happened within the poll timeout
    Timeout,
    /// Hang-up or socket error
    Disconnected,
    /// Send buffer has room again
    CanWrite,
    /// Readable while waiting to write: the peer is closing
    CanRead,
}

/// Result of a non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Bytes were read
    Bytes(usize),
    /// Nothing available right now
    Empty,
    /// Orderly shutdown by the peer
    Closed,
}

/// Whether `err` means the network went away while the device slept
pub fn is_net_down(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
}

/// Set `O_NONBLOCK` on `fd`
pub fn make_non_blocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-owned descriptor; no memory is passed.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Create a non-blocking listening socket on `addr:port`.
///
/// Every failed attempt is logged and retried after
/// [`LISTEN_RETRY_DELAY`]; only shutdown stops the retries.
pub fn listen(addr: Ipv4Addr, port: u16, running: &RunFlag) -> Result<TcpListener> {
    let mut attempts: u64 = 0;
    loop {
        match try_listen(addr, port) {
            Ok(listener) => {
                log::info!("Listening on {}:{}", addr, port);
                return Ok(listener);
            }
            Err(e) => {
                attempts += 1;
                if attempts == 1 || attempts % 50 == 0 {
                    log::warn!("Listen on {}:{} failed (attempt {}): {}", addr, port, attempts, e);
                }
            }
        }

        if !running.is_running() {
            return Err(Error::ShuttingDown);
        }
        thread::sleep(LISTEN_RETRY_DELAY);
    }
}

fn try_listen(addr: Ipv4Addr, port: u16) -> io::Result<TcpListener> {
    // SAFETY: plain socket(2) call.
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
    // Dropping `fd` closes it on every early return below.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    make_non_blocking(fd.as_raw_fd())?;

    let enable: libc::c_int = 1;
    // SAFETY: option value points to a live c_int of the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &enable as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: sockaddr_in is plain data; all-zero is a valid value.
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    };
    // SAFETY: `sa` is a fully initialised sockaddr_in of the advertised size.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: listen(2) on an owned, bound socket.
    if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(TcpListener::from(fd))
}

/// Poll `fd` once for `events`, returning the reported events (0 on timeout)
fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<libc::c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    match rc {
        rc if rc < 0 => Err(io::Error::last_os_error()),
        0 => Ok(0),
        _ => Ok(pfd.revents),
    }
}

/// Accept a pending client without blocking.
///
/// Returns `Ok(None)` when no connection is pending. Accepted streams are
/// non-blocking with a capped send timeout.
pub fn accept(listener: &TcpListener) -> io::Result<Option<TcpStream>> {
    let revents = poll_fd(listener.as_raw_fd(), libc::POLLIN, Duration::ZERO)?;
    if revents & libc::POLLIN == 0 {
        return Ok(None);
    }

    let (stream, peer) = listener.accept()?;
    if let Err(e) = stream.set_write_timeout(Some(ACCEPTED_SEND_TIMEOUT)) {
        log::warn!("Failed to cap send timeout for {}: {}", peer, e);
    }
    stream.set_nonblocking(true)?;
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    log::info!("Accepted connection from {}", peer);
    Ok(Some(stream))
}

/// Wait up to `timeout` for `stream` to become writable
pub fn poll_writable(stream: &TcpStream, timeout: Duration) -> PollResult {
    let revents = match poll_fd(stream.as_raw_fd(), libc::POLLOUT | libc::POLLHUP, timeout) {
        Ok(revents) => revents,
        Err(e) => {
            log::trace!("poll failed: {}", e);
            return PollResult::Timeout;
        }
    };

    if revents & libc::POLLOUT != 0 {
        PollResult::CanWrite
    } else if revents & libc::POLLHUP != 0 {
        PollResult::Disconnected
    } else if revents & libc::POLLIN != 0 {
        PollResult::CanRead
    } else if revents & libc::POLLERR != 0 {
        PollResult::Disconnected
    } else {
        PollResult::Timeout
    }
}

/// Write all of `buf` to a non-blocking stream.
///
/// Each stall gets at most `policy.max_polls` write polls; the stall fails
/// on the last one even if the socket became writable. A cleared running
/// flag aborts immediately.
pub fn send_all(
    stream: &TcpStream,
    buf: &[u8],
    running: &RunFlag,
    policy: &SendPolicy,
) -> Result<()> {
    let mut writer = stream;
    let mut sent = 0;

    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => wait_writable(stream, running, policy)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn wait_writable(stream: &TcpStream, running: &RunFlag, policy: &SendPolicy) -> Result<()> {
    let mut polls = 0;
    loop {
        let readiness = poll_writable(stream, policy.poll_timeout);

        if !running.is_running() {
            return Err(Error::ShuttingDown);
        }

        polls += 1;
        if polls >= policy.max_polls {
            log::warn!("Peer not draining, giving up after {} polls", polls);
            return Err(Error::Backpressure { polls });
        }

        match readiness {
            PollResult::CanWrite => return Ok(()),
            PollResult::Timeout => continue,
            PollResult::Disconnected | PollResult::CanRead => return Err(Error::Disconnected),
        }
    }
}

/// Single non-blocking read
pub fn recv(stream: &TcpStream, buf: &mut [u8]) -> io::Result<Received> {
    let mut reader = stream;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(Received::Closed),
            Ok(n) => return Ok(Received::Bytes(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Received::Empty),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Shut down both halves of a finished session, logging failure
pub fn close_stream(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        log::debug!("Socket shutdown failed: {}", e);
    }
}

/// [`PacketSink`] over one accepted client.
///
/// Clients never send anything, so any readable data is discarded and an
/// orderly close ends the session before the next packet is written.
pub struct TcpSink {
    stream: TcpStream,
    running: RunFlag,
    policy: SendPolicy,
    scratch: [u8; 64],
}

impl TcpSink {
    pub fn new(stream: TcpStream, running: RunFlag, policy: SendPolicy) -> Self {
        Self {
            stream,
            running,
            policy,
            scratch: [0; 64],
        }
    }

    fn check_peer(&mut self) -> Result<()> {
        loop {
            match recv(&self.stream, &mut self.scratch)? {
                Received::Closed => return Err(Error::Disconnected),
                Received::Bytes(n) => log::trace!("Discarding {} bytes from client", n),
                Received::Empty => return Ok(()),
            }
        }
    }
}

impl PacketSink for TcpSink {
    fn send_packet(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_peer()?;
        send_all(&self.stream, bytes, &self.running, &self.policy)
    }
}

impl Drop for TcpSink {
    fn drop(&mut self) {
        close_stream(&self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn local_listener() -> (TcpListener, u16) {
        let listener = listen(Ipv4Addr::LOCALHOST, 0, &RunFlag::new()).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn accept_blocking(listener: &TcpListener) -> TcpStream {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(stream) = accept(listener).unwrap() {
                return stream;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_accept_without_client_is_none() {
        let (listener, _) = local_listener();
        assert!(accept(&listener).unwrap().is_none());
    }

    #[test]
    fn test_accept_and_send() {
        let (listener, port) = local_listener();
        let mut client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        let server = accept_blocking(&listener);

        send_all(&server, b"hello", &RunFlag::new(), &SendPolicy::default()).unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_recv_states() {
        let (listener, port) = local_listener();
        let mut client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        let server = accept_blocking(&listener);

        let mut buf = [0u8; 16];
        assert_eq!(recv(&server, &mut buf).unwrap(), Received::Empty);

        client.write_all(b"abc").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recv(&server, &mut buf).unwrap(), Received::Bytes(3));

        drop(client);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recv(&server, &mut buf).unwrap(), Received::Closed);
    }

    #[test]
    fn test_send_gives_up_on_stalled_peer() {
        let (listener, port) = local_listener();
        let _client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        let server = accept_blocking(&listener);

        let policy = SendPolicy {
            poll_timeout: Duration::from_millis(50),
            max_polls: 10,
        };
        let payload = vec![0u8; 64 * 1024 * 1024];

        let start = Instant::now();
        let result = send_all(&server, &payload, &RunFlag::new(), &policy);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(Error::Backpressure { polls: 10 })));
        assert!(elapsed >= Duration::from_millis(450));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_send_aborts_on_shutdown() {
        let (listener, port) = local_listener();
        let _client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        let server = accept_blocking(&listener);

        let running = RunFlag::new();
        running.stop();
        let policy = SendPolicy {
            poll_timeout: Duration::from_millis(100),
            max_polls: 10,
        };
        let payload = vec![0u8; 64 * 1024 * 1024];

        let start = Instant::now();
        let result = send_all(&server, &payload, &running, &policy);
        assert!(matches!(result, Err(Error::ShuttingDown)));
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn test_sink_detects_closed_peer() {
        let (listener, port) = local_listener();
        let client = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).unwrap();
        let server = accept_blocking(&listener);

        drop(client);
        thread::sleep(Duration::from_millis(50));

        let mut sink = TcpSink::new(server, RunFlag::new(), SendPolicy::default());
        assert!(matches!(sink.send_packet(b"x"), Err(Error::Disconnected)));
    }

    #[test]
    fn test_listen_retries_until_port_frees() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            drop(blocker);
        });

        let start = Instant::now();
        let listener = listen(Ipv4Addr::LOCALHOST, port, &RunFlag::new()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(listener.local_addr().unwrap().port(), port);
        releaser.join().unwrap();
    }

    #[test]
    fn test_listen_stops_on_shutdown() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();

        let running = RunFlag::new();
        running.stop();
        assert!(matches!(
            listen(Ipv4Addr::LOCALHOST, port, &running),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn test_net_down_classification() {
        assert!(is_net_down(&io::Error::from(ErrorKind::WouldBlock)));
        assert!(!is_net_down(&io::Error::from(ErrorKind::ConnectionReset)));
    }
}
