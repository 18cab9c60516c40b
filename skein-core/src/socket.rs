//! TCP socket wrappers.
//!
//! `Listener` and `Connection` are thin, `Clone`-able (via `Rc`) handles
//! around a non-blocking `std::net` socket. They never perform I/O
//! themselves outside of construction: every read, write, accept, and
//! connect is expressed as an `Event` that the scheduler fires on their
//! behalf once the socket is actually ready. That split is what lets
//! the same handle be registered in a readiness wait and safely handed
//! across fiber suspension points.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, SchedulerError};
use crate::event::Event;
use crate::fiber::yield_event;

struct ConnectionInner {
    stream: RefCell<TcpStream>,
    peer: SocketAddr,
    buf: RefCell<BytesMut>,
}

/// One end of a TCP connection.
///
/// Cheap to clone: every clone shares the same underlying socket and
/// read buffer, which is what lets a single `Connection` be captured by
/// both a fiber body and the `Event` it is currently parked on.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            inner: Rc::new(ConnectionInner {
                stream: RefCell::new(stream),
                peer,
                buf: RefCell::new(BytesMut::new()),
            }),
        }
    }

    /// Connects to `host:port`, suspending the calling fiber until the
    /// connection completes or fails.
    pub async fn connect(host: &str, port: u16) -> Result<Connection> {
        let addr = resolve_one(host, port)?;
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        sock.set_nonblocking(true)?;
        match sock.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(SchedulerError::from(e)),
        }
        let socket = Rc::new(RefCell::new(sock));
        let value = yield_event(Event::Connect { socket }).await?;
        Ok(value.into_connection())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Reads up to `n` bytes. Bytes left over from a previous
    /// `readline` are drained first; only once that leftover is
    /// exhausted does this suspend on the socket becoming readable.
    /// Returns an empty `Bytes` at end-of-stream.
    pub async fn recv(&self, n: usize) -> Result<Bytes> {
        {
            let mut buf = self.inner.buf.borrow_mut();
            if !buf.is_empty() {
                let take = n.min(buf.len());
                return Ok(buf.split_to(take).freeze());
            }
        }
        let value = yield_event(Event::Readable {
            conn: self.clone(),
            bufsize: n,
        })
        .await?;
        Ok(value.into_bytes())
    }

    /// Writes `data`, resuming as soon as the kernel has accepted
    /// *some* of it. The returned count may be less than `data.len()`.
    pub async fn send(&self, data: Bytes) -> Result<usize> {
        let value = yield_event(Event::Writable {
            conn: self.clone(),
            data,
            sendall: false,
        })
        .await?;
        Ok(value.into_count())
    }

    /// Writes all of `data`, internally retrying partial writes until
    /// every byte has been accepted by the kernel.
    pub async fn sendall(&self, data: Bytes) -> Result<()> {
        let value = yield_event(Event::Writable {
            conn: self.clone(),
            data,
            sendall: true,
        })
        .await?;
        value.into_unit();
        Ok(())
    }

    /// Reads until `sentinel` is found, returning everything up to and
    /// including it. At end-of-stream with no sentinel found, returns
    /// whatever bytes remain (possibly empty).
    pub async fn readline(&self, sentinel: &[u8]) -> Result<Bytes> {
        loop {
            let found = find_subslice(&self.inner.buf.borrow(), sentinel);
            if let Some(pos) = found {
                let end = pos + sentinel.len();
                let mut buf = self.inner.buf.borrow_mut();
                return Ok(buf.split_to(end).freeze());
            }
            let chunk_size = crate::config::current().read_buf_size;
            let chunk = self.recv(chunk_size).await?;
            if chunk.is_empty() {
                let mut buf = self.inner.buf.borrow_mut();
                let len = buf.len();
                return Ok(buf.split_to(len).freeze());
            }
            self.inner.buf.borrow_mut().extend_from_slice(&chunk);
        }
    }

    /// Shuts down both halves of the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.inner.stream.borrow().shutdown(std::net::Shutdown::Both);
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.inner.stream.borrow().as_raw_fd()
    }

    pub(crate) fn read_into(&self, bufsize: usize) -> std::io::Result<Bytes> {
        use std::io::Read;
        let mut buf = vec![0u8; bufsize];
        let n = self.inner.stream.borrow_mut().read(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    pub(crate) fn write_some(&self, data: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        self.inner.stream.borrow_mut().write(data)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn resolve_one(host: &str, port: u16) -> Result<SocketAddr> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| SchedulerError::from(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        )))
}

struct ListenerInner {
    // `None` once `close` has run; every operation on a closed listener
    // reports `NotConnected` rather than panicking, so a fiber racing
    // its own teardown sees an ordinary I/O error instead of a panic.
    sock: RefCell<Option<TcpListener>>,
    fd: RawFd,
}

/// A bound, listening TCP socket.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerInner>,
}

impl Listener {
    /// Binds and listens on `host:port`. An empty `host` binds every
    /// interface.
    pub fn bind(host: &str, port: u16, backlog: i32) -> Result<Self> {
        let addr = resolve_one(host, port)?;
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(backlog)?;
        sock.set_nonblocking(true)?;
        let listener: TcpListener = sock.into();
        let fd = listener.as_raw_fd();
        Ok(Self {
            inner: Rc::new(ListenerInner {
                sock: RefCell::new(Some(listener)),
                fd,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self.inner.sock.borrow().as_ref() {
            Some(l) => Ok(l.local_addr()?),
            None => Err(SchedulerError::from(closed_error())),
        }
    }

    /// Suspends until a connection is pending, then accepts it.
    pub async fn accept(&self) -> Result<Connection> {
        let value = yield_event(Event::Accept {
            listener: self.clone(),
        })
        .await?;
        Ok(value.into_connection())
    }

    /// Stops accepting new connections and drops the underlying socket.
    /// Idempotent; a pending `accept()` that was already queued against
    /// the scheduler fails with `NotConnected` the next time it fires.
    pub fn close(&self) {
        self.inner.sock.borrow_mut().take();
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.inner.fd
    }

    pub(crate) fn try_accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        match self.inner.sock.borrow_mut().as_mut() {
            Some(l) => l.accept(),
            None => Err(closed_error()),
        }
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "listener closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subslice_locates_the_sentinel() {
        assert_eq!(find_subslice(b"GET / HTTP/1.1\r\n", b"\r\n"), Some(14));
    }

    #[test]
    fn find_subslice_is_none_when_absent() {
        assert_eq!(find_subslice(b"no newline here", b"\r\n"), None);
    }

    #[test]
    fn find_subslice_rejects_an_empty_needle() {
        assert_eq!(find_subslice(b"anything", b""), None);
    }

    #[test]
    fn find_subslice_handles_a_needle_longer_than_the_haystack() {
        assert_eq!(find_subslice(b"hi", b"\r\n\r\n"), None);
    }

    #[test]
    fn find_subslice_finds_the_first_occurrence() {
        assert_eq!(find_subslice(b"a\r\nb\r\n", b"\r\n"), Some(1));
    }
}
