//! Reusable one-shot timers backed by timerfd.
//!
//! Each connection owns a small pool; a picked timer is armed for one
//! request, registered with the owning transport's epoll, then disarmed and
//! returned for reuse. A timer fd therefore only ever meets a single epoll
//! instance.

use std::io;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Error;

/// A leased one-shot timer. Not shared; exactly one in-flight request may
/// hold it.
pub(crate) struct TimerHandle {
    fd: RawFd,
}

impl TimerHandle {
    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Schedule a single firing after `duration`.
    pub(crate) fn arm(&self, duration: Duration) -> io::Result<()> {
        self.settime(duration)
    }

    /// Cancel any pending firing. A firing already delivered to epoll is
    /// filtered by the transport instead.
    pub(crate) fn disarm(&self) {
        let _ = self.settime(Duration::ZERO);
    }

    fn settime(&self, duration: Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: duration.as_secs() as libc::time_t,
                tv_nsec: duration.subsec_nanos() as libc::c_long,
            },
        };
        let ret = unsafe { libc::timerfd_settime(self.fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Free-list of parked timer fds.
pub(crate) struct TimerPool {
    free: Mutex<Vec<RawFd>>,
}

impl TimerPool {
    pub(crate) fn new() -> Self {
        TimerPool {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Lease a timer, creating a timerfd when the pool is empty.
    pub(crate) fn pick(&self) -> Result<TimerHandle, Error> {
        if let Some(fd) = self.free.lock().unwrap().pop() {
            return Ok(TimerHandle { fd });
        }
        let fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(TimerHandle { fd })
    }

    /// Return a disarmed timer for reuse.
    pub(crate) fn release(&self, handle: TimerHandle) {
        self.free.lock().unwrap().push(handle.fd);
    }
}

impl Drop for TimerPool {
    fn drop(&mut self) {
        for fd in self.free.lock().unwrap().drain(..) {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_readable(fd: RawFd, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        ret == 1 && pfd.revents & libc::POLLIN != 0
    }

    #[test]
    fn armed_timer_fires() {
        let pool = TimerPool::new();
        let timer = pool.pick().unwrap();
        timer.arm(Duration::from_millis(5)).unwrap();
        assert!(poll_readable(timer.fd(), 1000));
        pool.release(timer);
    }

    #[test]
    fn disarmed_timer_does_not_fire() {
        let pool = TimerPool::new();
        let timer = pool.pick().unwrap();
        timer.arm(Duration::from_millis(50)).unwrap();
        timer.disarm();
        assert!(!poll_readable(timer.fd(), 100));
        pool.release(timer);
    }

    #[test]
    fn released_timer_is_reused() {
        let pool = TimerPool::new();
        let timer = pool.pick().unwrap();
        let fd = timer.fd();
        pool.release(timer);
        let again = pool.pick().unwrap();
        assert_eq!(again.fd(), fd);
        pool.release(again);
    }
}
