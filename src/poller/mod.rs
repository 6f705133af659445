//! Readiness multiplexer over the in-flight probe sockets.
//!
//! Level-triggered semantics on every backend: an event that is not acted
//! upon is delivered again on the next wait. Waiting with no registered
//! descriptors is a plain bounded sleep, which is how the engine serves
//! its rate-governor delays.

mod poll;

#[cfg(target_os = "linux")]
mod epoll;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::input::PollType;

/// Event flags reported for one socket. A socket may carry several at
/// once; the engine treats the pending socket error as authoritative and
/// these flags as the fallback signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

/// The chosen readiness backend. The engine neither knows nor cares which
/// one is active.
#[derive(Debug)]
pub enum Poller {
    Poll(poll::PollSet),
    #[cfg(target_os = "linux")]
    Epoll(epoll::EpollSet),
}

impl Poller {
    /// Builds the requested backend. `Auto` prefers epoll where present
    /// and falls back to `poll(2)`.
    pub fn new(kind: PollType) -> io::Result<Self> {
        match kind {
            PollType::Poll => Ok(Poller::Poll(poll::PollSet::new())),
            #[cfg(target_os = "linux")]
            PollType::Epoll => Ok(Poller::Epoll(epoll::EpollSet::new()?)),
            #[cfg(not(target_os = "linux"))]
            PollType::Epoll => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "the epoll backend is only available on Linux",
            )),
            #[cfg(target_os = "linux")]
            PollType::Auto => match epoll::EpollSet::new() {
                Ok(set) => Ok(Poller::Epoll(set)),
                Err(_) => Ok(Poller::Poll(poll::PollSet::new())),
            },
            #[cfg(not(target_os = "linux"))]
            PollType::Auto => Ok(Poller::Poll(poll::PollSet::new())),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Poller::Poll(_) => "poll",
            #[cfg(target_os = "linux")]
            Poller::Epoll(_) => "epoll",
        }
    }

    /// Arms interest in write-readiness and error/hang-up for `fd`.
    pub fn register(&mut self, fd: RawFd) -> io::Result<()> {
        match self {
            Poller::Poll(set) => {
                set.register(fd);
                Ok(())
            }
            #[cfg(target_os = "linux")]
            Poller::Epoll(set) => set.register(fd),
        }
    }

    /// Drops interest in `fd`. Must be called before the socket is closed
    /// so the poll backend's descriptor list stays valid.
    pub fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self {
            Poller::Poll(set) => {
                set.unregister(fd);
                Ok(())
            }
            #[cfg(target_os = "linux")]
            Poller::Epoll(set) => set.unregister(fd),
        }
    }

    /// Waits up to `timeout` and fills `events` with the ready sockets.
    /// An interrupted wait returns successfully with no events.
    pub fn wait(
        &mut self,
        timeout: Duration,
        events: &mut Vec<(RawFd, Readiness)>,
    ) -> io::Result<()> {
        events.clear();
        match self {
            Poller::Poll(set) => set.wait(timeout, events),
            #[cfg(target_os = "linux")]
            Poller::Epoll(set) => set.wait(timeout, events),
        }
    }
}

/// Milliseconds for the C interfaces, rounded up so a sub-millisecond
/// deadline still sleeps rather than spinning.
pub(crate) fn timeout_ms(timeout: Duration) -> i32 {
    let micros = timeout.as_micros();
    let ms = micros.div_ceil(1_000);
    ms.min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::{timeout_ms, Poller};
    use crate::input::PollType;
    use crate::platform::{self, ConnectStart};
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};

    fn backends() -> Vec<PollType> {
        #[cfg(target_os = "linux")]
        return vec![PollType::Poll, PollType::Epoll];
        #[cfg(not(target_os = "linux"))]
        return vec![PollType::Poll];
    }

    #[test]
    fn timeout_rounds_up_to_a_millisecond() {
        assert_eq!(timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(5)), 5);
        assert_eq!(timeout_ms(Duration::ZERO), 0);
    }

    #[test]
    fn auto_picks_a_backend() {
        let poller = Poller::new(PollType::Auto).unwrap();
        #[cfg(target_os = "linux")]
        assert_eq!(poller.backend_name(), "epoll");
        #[cfg(not(target_os = "linux"))]
        assert_eq!(poller.backend_name(), "poll");
    }

    #[test]
    fn empty_wait_sleeps_for_the_timeout() {
        for kind in backends() {
            let mut poller = Poller::new(kind).unwrap();
            let mut events = Vec::new();
            let start = Instant::now();
            poller.wait(Duration::from_millis(50), &mut events).unwrap();
            assert!(start.elapsed() >= Duration::from_millis(45));
            assert!(events.is_empty());
        }
    }

    #[test]
    fn loopback_connect_becomes_writable() {
        for kind in backends() {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = match listener.local_addr().unwrap() {
                std::net::SocketAddr::V4(v4) => v4,
                _ => unreachable!(),
            };

            let socket = match platform::connect_nonblocking(addr).unwrap() {
                ConnectStart::Pending(socket) => socket,
                // The handshake finished inside connect; nothing to wait on.
                ConnectStart::Connected => continue,
                other => panic!("unexpected connect outcome: {other:?}"),
            };

            let mut poller = Poller::new(kind).unwrap();
            let fd = socket.as_raw_fd();
            poller.register(fd).unwrap();

            let mut events = Vec::new();
            poller.wait(Duration::from_secs(2), &mut events).unwrap();

            let (event_fd, readiness) = events[0];
            assert_eq!(event_fd, fd);
            assert!(readiness.writable);
            assert!(platform::pending_error(&socket).unwrap().is_none());

            poller.unregister(fd).unwrap();
        }
    }
}
