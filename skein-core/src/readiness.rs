//! The scheduler's readiness-notification primitive.
//!
//! This is deliberately the simplest thing that works: a single
//! `select(2)` call per turn. It does not scale past `FD_SETSIZE`
//! (1024 on Linux) file descriptors, which is a real limitation, but
//! swapping it for an epoll/kqueue-based primitive is an
//! implementation detail invisible to fibers; nothing above this
//! module knows or cares how readiness is actually observed.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// Blocks until one of `read_fds`/`write_fds` is ready or `timeout`
/// elapses (`None` waits indefinitely; `Some(Duration::ZERO)` polls
/// without blocking). Returns the subset of each that is ready.
pub(crate) fn wait(
    read_fds: &[RawFd],
    write_fds: &[RawFd],
    timeout: Option<Duration>,
) -> io::Result<(Vec<RawFd>, Vec<RawFd>)> {
    unsafe {
        let mut read_set: libc::fd_set = std::mem::zeroed();
        let mut write_set: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut read_set);
        libc::FD_ZERO(&mut write_set);

        let mut max_fd: RawFd = -1;
        for &fd in read_fds {
            libc::FD_SET(fd, &mut read_set);
            max_fd = max_fd.max(fd);
        }
        for &fd in write_fds {
            libc::FD_SET(fd, &mut write_set);
            max_fd = max_fd.max(fd);
        }

        let mut tv;
        let tv_ptr: *mut libc::timeval = match timeout {
            None => ptr::null_mut(),
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv
            }
        };

        let n = libc::select(
            max_fd + 1,
            &mut read_set,
            &mut write_set,
            ptr::null_mut(),
            tv_ptr,
        );

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ready_read = Vec::new();
        let mut ready_write = Vec::new();
        for &fd in read_fds {
            if libc::FD_ISSET(fd, &read_set) {
                ready_read.push(fd);
            }
        }
        for &fd in write_fds {
            if libc::FD_ISSET(fd, &write_set) {
                ready_write.push(fd);
            }
        }
        Ok((ready_read, ready_write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn zero_timeout_returns_promptly_with_nothing_ready() {
        let (r, w) = wait(&[], &[], Some(Duration::ZERO)).unwrap();
        assert!(r.is_empty());
        assert!(w.is_empty());
    }

    #[test]
    fn a_listener_becomes_readable_once_connected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();
        // give the kernel a moment to complete the handshake
        std::thread::sleep(Duration::from_millis(20));
        let fd = listener.as_raw_fd();
        let (r, _w) = wait(&[fd], &[], Some(Duration::from_secs(1))).unwrap();
        assert_eq!(r, vec![fd]);
    }
}
