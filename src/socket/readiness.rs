//! Readiness multiplexing over sockets that may hold decoded frames.
//!
//! One device read can yield several frames; those still queued are
//! invisible to `poll(2)`. [`select`] therefore reports sockets with queued
//! frames as ready up front and only polls the rest.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::config::DEFAULT_SELECT_TIMEOUT_MS;
use crate::error::Result;

/// Poll timeout used when the caller gives none.
pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_SELECT_TIMEOUT_MS);

/// Anything [`select`] can wait on.
pub trait Selectable {
    /// Descriptor to poll, `None` once closed.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Frames already decoded and waiting to be consumed.
    fn buffered_frames(&self) -> usize {
        0
    }
}

/// Return the sockets that can yield data without blocking.
///
/// Sockets with queued frames come first, in input order, followed by the
/// sockets `poll(2)` reports readable. The poll waits up to `timeout`
/// ([`DEFAULT_SELECT_TIMEOUT`] when `None`), or not at all when some socket
/// already has queued frames. Closed sockets are never ready.
pub fn select<'a, S>(sockets: &[&'a S], timeout: Option<Duration>) -> Result<Vec<&'a S>>
where
    S: Selectable + ?Sized,
{
    let (mut ready, pending): (Vec<&'a S>, Vec<&'a S>) = sockets
        .iter()
        .copied()
        .partition(|socket| socket.buffered_frames() > 0);

    let polled: Vec<(&'a S, RawFd)> = pending
        .into_iter()
        .filter_map(|socket| socket.raw_fd().map(|fd| (socket, fd)))
        .collect();
    if polled.is_empty() {
        return Ok(ready);
    }

    let timeout = if ready.is_empty() {
        timeout.unwrap_or(DEFAULT_SELECT_TIMEOUT)
    } else {
        Duration::ZERO
    };

    let mut fds: Vec<libc::pollfd> = polled
        .iter()
        .map(|&(_, fd)| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: `fds` is a valid array of `fds.len()` pollfd entries.
    match unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, poll_timeout(timeout)) } {
        ..=-1 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(ready);
            }
            return Err(err.into());
        }
        0 => return Ok(ready),
        _ => {}
    }

    ready.extend(
        polled
            .iter()
            .zip(&fds)
            .filter(|(_, pfd)| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|(&(socket, _), _)| socket),
    );
    Ok(ready)
}

/// Milliseconds for `poll(2)`, rounded up so short waits do not become
/// busy polls.
fn poll_timeout(timeout: Duration) -> libc::c_int {
    let millis = timeout.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixDatagram;
    use std::time::Instant;

    struct Fake {
        sock: Option<UnixDatagram>,
        queued: usize,
    }

    impl Fake {
        fn new(queued: usize) -> (Self, UnixDatagram) {
            let (sock, peer) = UnixDatagram::pair().unwrap();
            (
                Self {
                    sock: Some(sock),
                    queued,
                },
                peer,
            )
        }
    }

    impl Selectable for Fake {
        fn raw_fd(&self) -> Option<RawFd> {
            self.sock.as_ref().map(|s| s.as_raw_fd())
        }

        fn buffered_frames(&self) -> usize {
            self.queued
        }
    }

    #[test]
    fn test_poll_timeout_rounding() {
        assert_eq!(poll_timeout(Duration::ZERO), 0);
        assert_eq!(poll_timeout(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout(Duration::from_millis(50)), 50);
        assert_eq!(poll_timeout(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_buffered_socket_short_circuits_large_timeout() {
        let (buffered, _p1) = Fake::new(2);
        let (idle, _p2) = Fake::new(0);

        let start = Instant::now();
        let ready = select(&[&idle, &buffered], Some(Duration::from_secs(30))).unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ready.len(), 1);
        assert!(std::ptr::eq(ready[0], &buffered));
    }

    #[test]
    fn test_buffered_first_then_readable() {
        let (readable, peer) = Fake::new(0);
        let (buffered, _p) = Fake::new(1);
        peer.send(b"x").unwrap();

        let ready = select(&[&readable, &buffered], None).unwrap();
        assert_eq!(ready.len(), 2);
        assert!(std::ptr::eq(ready[0], &buffered));
        assert!(std::ptr::eq(ready[1], &readable));
    }

    #[test]
    fn test_nothing_ready_waits_for_timeout() {
        let (idle, _p) = Fake::new(0);
        let start = Instant::now();
        let ready = select(&[&idle], Some(Duration::from_millis(20))).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_closed_sockets_are_skipped() {
        let closed = Fake {
            sock: None,
            queued: 0,
        };
        let ready = select(&[&closed], Some(Duration::from_secs(30))).unwrap();
        assert!(ready.is_empty());
    }
}
