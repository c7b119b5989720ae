//! Thin safe wrapper over `epoll_create1`/`epoll_ctl`/`epoll_wait`.
//!
//! Unlike `mio`, which always arms descriptors edge-triggered internally and hides `ONESHOT` and
//! `EPOLLRDHUP` behind its own interest model, the reactor needs direct control over all four
//! listener/connection trigger-mode combinations, so this wraps the raw syscalls the way `mio`'s
//! own `sys::unix::selector::epoll` does internally.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bitflags::bitflags;

bitflags! {
    /// Interest mask for a registered descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u32 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const EDGE = 0b0000_0100;
        const ONESHOT = 0b0000_1000;
        const RDHUP = 0b0001_0000;
    }
}

fn to_epoll_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.contains(Interest::READ) {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITE) {
        bits |= libc::EPOLLOUT as u32;
    }
    if interest.contains(Interest::EDGE) {
        bits |= libc::EPOLLET as u32;
    }
    if interest.contains(Interest::ONESHOT) {
        bits |= libc::EPOLLONESHOT as u32;
    }
    if interest.contains(Interest::RDHUP) {
        bits |= libc::EPOLLRDHUP as u32;
    }
    bits
}

/// A single readiness notification returned from `Poller::wait`.
#[derive(Debug, Clone, Copy)]
pub struct Event(libc::epoll_event);

impl Event {
    /// The `u64` token supplied at registration time; the reactor uses this as the connection-
    /// table key (or the sentinel listener/wake tokens).
    pub fn token(&self) -> u64 {
        self.0.u64
    }

    pub fn readable(&self) -> bool {
        self.0.events as i32 & libc::EPOLLIN != 0
    }

    pub fn writable(&self) -> bool {
        self.0.events as i32 & libc::EPOLLOUT != 0
    }

    pub fn read_closed(&self) -> bool {
        self.0.events as i32 & (libc::EPOLLRDHUP | libc::EPOLLHUP) != 0
    }

    pub fn error(&self) -> bool {
        self.0.events as i32 & libc::EPOLLERR != 0
    }
}

/// Thin, owning wrapper around an `epoll` instance.
pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `epoll_create1` returned a valid, owned fd on success.
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { epfd })
    }

    /// Registers `fd` with `token` as its readiness identity and `interest` as its mask.
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Rearms `fd` with a new interest mask (needed after every `ONESHOT` delivery).
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: to_epoll_bits(interest),
            u64: token,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until at least one registered descriptor is ready or `timeout` elapses.
    /// `timeout = None` blocks indefinitely.
    pub fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout.map_or(-1, |d| d.as_millis().min(i32::MAX as u128) as i32);

        let mut raw: Vec<libc::epoll_event> = Vec::with_capacity(events.capacity().max(1024));
        let cap = raw.capacity();
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                raw.as_mut_ptr(),
                cap as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                events.clear();
                return Ok(());
            }
            return Err(err);
        }
        // SAFETY: `epoll_wait` initialized the first `n` elements.
        unsafe { raw.set_len(n as usize) };

        events.clear();
        events.extend(raw.into_iter().map(Event));
        Ok(())
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn readable_event_fires_after_write() {
        let (mut a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let poller = Poller::new().unwrap();
        poller
            .add(b.as_raw_fd(), 42, Interest::READ)
            .expect("register");

        a.write_all(b"hi").unwrap();

        let mut events = Vec::new();
        poller
            .wait(&mut events, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), 42);
        assert!(events[0].readable());
    }

    #[test]
    fn removed_fd_no_longer_reports_events() {
        let (mut a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let poller = Poller::new().unwrap();
        poller.add(b.as_raw_fd(), 1, Interest::READ).unwrap();
        poller.remove(b.as_raw_fd()).unwrap();

        a.write_all(b"hi").unwrap();
        let mut events = Vec::new();
        poller
            .wait(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(events.is_empty());
    }
}
