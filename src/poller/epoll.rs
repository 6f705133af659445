//! Scalable Linux readiness backend over `epoll(7)`.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use super::{timeout_ms, Readiness};

const MAX_EVENTS: usize = 1024;

/// One epoll instance holding every in-flight probe socket. Interest is
/// write-readiness plus `EPOLLRDHUP`; `EPOLLERR` and `EPOLLHUP` are always
/// reported without being requested.
pub struct EpollSet {
    epfd: RawFd,
    buf: Vec<libc::epoll_event>,
}

impl std::fmt::Debug for EpollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollSet").field("epfd", &self.epfd).finish()
    }
}

impl EpollSet {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        })
    }

    pub fn register(&mut self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: (libc::EPOLLOUT | libc::EPOLLRDHUP) as u32,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn wait(
        &mut self,
        timeout: Duration,
        events: &mut Vec<(RawFd, Readiness)>,
    ) -> io::Result<()> {
        let ready = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.buf.as_mut_ptr(),
                MAX_EVENTS as i32,
                timeout_ms(timeout),
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for slot in self.buf.iter().take(ready as usize) {
            let event = *slot;
            let flags = event.events;
            events.push((
                event.u64 as RawFd,
                Readiness {
                    writable: flags & libc::EPOLLOUT as u32 != 0,
                    error: flags & libc::EPOLLERR as u32 != 0,
                    hup: flags & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0,
                },
            ));
        }
        Ok(())
    }
}

impl Drop for EpollSet {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
