//! Portable readiness backend over `poll(2)`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_ms, Readiness};

/// A flat descriptor list handed to `poll(2)` on every wait. Fine for the
/// pool sizes this scanner runs with; the epoll backend exists for the
/// rest.
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl std::fmt::Debug for PollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSet").field("fds", &self.fds.len()).finish()
    }
}

impl PollSet {
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    pub fn register(&mut self, fd: RawFd) {
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        });
    }

    pub fn unregister(&mut self, fd: RawFd) {
        if let Some(pos) = self.fds.iter().position(|pfd| pfd.fd == fd) {
            self.fds.swap_remove(pos);
        }
    }

    pub fn wait(
        &mut self,
        timeout: Duration,
        events: &mut Vec<(RawFd, Readiness)>,
    ) -> io::Result<()> {
        let ready = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
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
        if ready == 0 {
            return Ok(());
        }

        for pfd in &self.fds {
            if pfd.revents == 0 {
                continue;
            }
            events.push((
                pfd.fd,
                Readiness {
                    writable: pfd.revents & libc::POLLOUT != 0,
                    error: pfd.revents & libc::POLLERR != 0,
                    hup: pfd.revents & libc::POLLHUP != 0,
                },
            ));
        }
        Ok(())
    }
}
