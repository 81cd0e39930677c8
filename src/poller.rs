//! Thin epoll wrapper plus eventfd wakeup helpers.
//!
//! One [`Poller`] per I/O worker. Registration is keyed by raw fd; readiness
//! comes back as [`Event`]s classified into readable/writable/hangup.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

const MAX_EVENTS: usize = 64;

/// Readiness interest for a registered fd.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
    pub(crate) oneshot: bool,
}

impl Interest {
    pub(crate) fn read() -> Self {
        Interest {
            read: true,
            write: false,
            oneshot: false,
        }
    }

    pub(crate) fn read_write() -> Self {
        Interest {
            read: true,
            write: true,
            oneshot: false,
        }
    }

    pub(crate) fn write_oneshot() -> Self {
        Interest {
            read: false,
            write: true,
            oneshot: true,
        }
    }

    fn bits(self) -> u32 {
        let mut events = 0u32;
        if self.read {
            events |= libc::EPOLLIN as u32;
        }
        if self.write {
            events |= libc::EPOLLOUT as u32;
        }
        if self.oneshot {
            events |= libc::EPOLLONESHOT as u32;
        }
        events
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) hangup: bool,
}

pub(crate) struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Poller { epfd })
    }

    pub(crate) fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest.bits())
    }

    pub(crate) fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest.bits())
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until at least one fd is ready, filling `events`.
    pub(crate) fn wait(&self, events: &mut Vec<Event>) -> io::Result<()> {
        events.clear();
        let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe { libc::epoll_wait(self.epfd, raw.as_mut_ptr(), MAX_EVENTS as i32, -1) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            for item in raw.iter().take(n as usize) {
                let bits = item.events;
                events.push(Event {
                    fd: item.u64 as RawFd,
                    readable: bits & libc::EPOLLIN as u32 != 0,
                    writable: bits & libc::EPOLLOUT as u32 != 0,
                    hangup: bits & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0,
                });
            }
            return Ok(());
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Create a non-blocking eventfd for cross-thread wakeups.
pub(crate) fn create_eventfd() -> io::Result<RawFd> {
    let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if efd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(efd)
}

/// Wake the worker owning `efd`.
pub(crate) fn eventfd_wake(efd: RawFd) {
    let val: u64 = 1;
    unsafe {
        libc::write(efd, &val as *const u64 as *const libc::c_void, 8);
    }
}

/// Clear a fired eventfd so level-triggered epoll stops reporting it.
pub(crate) fn eventfd_drain(efd: RawFd) {
    let mut val: u64 = 0;
    unsafe {
        libc::read(efd, &mut val as *mut u64 as *mut libc::c_void, 8);
    }
}

/// Convert a `SocketAddr` into sockaddr storage for `connect(2)`.
pub(crate) fn socket_addr_to_sockaddr(
    addr: SocketAddr,
    storage: &mut libc::sockaddr_storage,
) -> libc::socklen_t {
    // Zero the storage to avoid uninitialised padding bytes.
    unsafe {
        std::ptr::write_bytes(
            storage as *mut _ as *mut u8,
            0,
            std::mem::size_of::<libc::sockaddr_storage>(),
        );
    }
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

/// Read back the local address of a connected socket.
pub(crate) fn local_socket_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    sockaddr_to_socket_addr(&storage)
}

fn sockaddr_to_socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::new(ip.into(), u16::from_be(sa.sin_port)))
        }
        libc::AF_INET6 => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(sa.sin6_addr.s6_addr);
            Ok(SocketAddr::new(ip.into(), u16::from_be(sa.sin6_port)))
        }
        other => Err(io::Error::other(format!("unsupported address family {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventfd_wakes_poller() {
        let poller = Poller::new().unwrap();
        let efd = create_eventfd().unwrap();
        poller.register(efd, Interest::read()).unwrap();

        eventfd_wake(efd);

        let mut events = Vec::new();
        poller.wait(&mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, efd);
        assert!(events[0].readable);

        eventfd_drain(efd);
        unsafe {
            libc::close(efd);
        }
    }

    #[test]
    fn sockaddr_round_trip_v4() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = socket_addr_to_sockaddr(addr, &mut storage);
        assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in>());
        assert_eq!(sockaddr_to_socket_addr(&storage).unwrap(), addr);
    }
}
