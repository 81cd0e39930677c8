//! I/O worker: one epoll instance driving connects, sends, receives, and
//! timer firings for the connections assigned to it.
//!
//! Cross-thread work arrives on two MPSC queues, each paired with an
//! eventfd registered for read readiness: one for pending `connect(2)`
//! calls, one for request submissions. Everything touching a connection's
//! fd runs on the worker thread that owns it; the submission fast path
//! executes inline when the caller already is that thread.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::connection::Connection;
use crate::error::Error;
use crate::metrics;
use crate::poller::{
    Event, Interest, Poller, create_eventfd, eventfd_drain, eventfd_wake, socket_addr_to_sockaddr,
};

/// Stack buffer for the recv loop. A response larger than this is flushed
/// into the resumable parser in slices.
const RECV_BUFFER: usize = 16384;

struct ConnectRequest {
    connection: Weak<Connection>,
    addr: SocketAddr,
}

struct SendRequest {
    connection: Weak<Connection>,
    timer_fd: Option<RawFd>,
    buffer: Vec<u8>,
    written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Connected,
}

struct ConnectionEntry {
    connection: Weak<Connection>,
    phase: Phase,
}

pub(crate) struct Transport {
    poller: Poller,
    connect_wake: RawFd,
    submit_wake: RawFd,
    connect_tx: Sender<ConnectRequest>,
    connect_rx: Receiver<ConnectRequest>,
    submit_tx: Sender<SendRequest>,
    submit_rx: Receiver<SendRequest>,
    /// Connections in Connecting/Connected phase owned by this worker.
    connections: Mutex<HashMap<RawFd, ConnectionEntry>>,
    /// Partially written requests waiting for write readiness.
    pending_sends: Mutex<HashMap<RawFd, SendRequest>>,
    /// Armed request timers; other workers touch this during timer
    /// registration, hence the lock.
    timeouts: Mutex<HashMap<RawFd, Weak<Connection>>>,
    thread: OnceLock<ThreadId>,
    shutdown: AtomicBool,
}

impl Transport {
    pub(crate) fn new() -> Result<Self, Error> {
        let poller = Poller::new().map_err(Error::Io)?;
        let connect_wake = create_eventfd().map_err(Error::Io)?;
        let submit_wake = create_eventfd().map_err(Error::Io)?;
        poller.register(connect_wake, Interest::read()).map_err(Error::Io)?;
        poller.register(submit_wake, Interest::read()).map_err(Error::Io)?;
        let (connect_tx, connect_rx) = unbounded();
        let (submit_tx, submit_rx) = unbounded();
        Ok(Transport {
            poller,
            connect_wake,
            submit_wake,
            connect_tx,
            connect_rx,
            submit_tx,
            submit_rx,
            connections: Mutex::new(HashMap::new()),
            pending_sends: Mutex::new(HashMap::new()),
            timeouts: Mutex::new(HashMap::new()),
            thread: OnceLock::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Event loop. Runs until shutdown is signaled.
    pub(crate) fn run(&self) {
        let _ = self.thread.set(thread::current().id());
        let mut events: Vec<Event> = Vec::with_capacity(64);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if self.poller.wait(&mut events).is_err() {
                break;
            }
            for event in &events {
                self.dispatch(*event);
            }
        }
    }

    /// Signal the worker to exit its loop.
    pub(crate) fn initiate_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        eventfd_wake(self.connect_wake);
        eventfd_wake(self.submit_wake);
    }

    fn dispatch(&self, event: Event) {
        if event.fd == self.connect_wake {
            eventfd_drain(self.connect_wake);
            self.process_connect_queue();
        } else if event.fd == self.submit_wake {
            eventfd_drain(self.submit_wake);
            self.process_submission_queue();
        } else if event.readable {
            self.handle_readable(event.fd);
        } else if event.writable {
            self.handle_writable(event.fd);
        } else if event.hangup {
            self.handle_hangup(event.fd);
        } else {
            panic!("unexpected event for fd {}", event.fd);
        }
    }

    // ── Cross-thread entry points ───────────────────────────────────

    /// Queue a `connect(2)` to be initiated on the worker thread.
    pub(crate) fn async_connect(&self, connection: Weak<Connection>, addr: SocketAddr) {
        let _ = self.connect_tx.send(ConnectRequest { connection, addr });
        eventfd_wake(self.connect_wake);
    }

    /// Send a serialized request: inline when already on the owning worker
    /// thread, otherwise enqueued with a wakeup.
    pub(crate) fn async_send_request(
        &self,
        conn: &Arc<Connection>,
        timer_fd: Option<RawFd>,
        buffer: Vec<u8>,
    ) {
        let entry = SendRequest {
            connection: Arc::downgrade(conn),
            timer_fd,
            buffer,
            written: 0,
        };
        if self.thread.get().copied() == Some(thread::current().id()) {
            self.perform_send(entry, false);
        } else {
            let _ = self.submit_tx.send(entry);
            eventfd_wake(self.submit_wake);
        }
    }

    /// Drop an armed timer: no longer tracked, no longer polled.
    pub(crate) fn forget_timer(&self, timer_fd: RawFd) {
        self.timeouts.lock().unwrap().remove(&timer_fd);
        let _ = self.poller.delete(timer_fd);
    }

    /// Drop all per-fd state for a socket being torn down. Leaving a stale
    /// pending send behind would replay its buffer if the fd number is
    /// reused.
    fn forget_socket(&self, fd: RawFd) {
        self.connections.lock().unwrap().remove(&fd);
        self.pending_sends.lock().unwrap().remove(&fd);
    }

    // ── Queue processing ────────────────────────────────────────────

    fn process_connect_queue(&self) {
        while let Ok(req) = self.connect_rx.try_recv() {
            let Some(conn) = req.connection.upgrade() else {
                continue;
            };
            let fd = conn.raw_fd();
            if fd < 0 {
                continue;
            }

            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let len = socket_addr_to_sockaddr(req.addr, &mut storage);
            let ret = unsafe {
                libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len)
            };
            if ret == 0 {
                // Completed synchronously; proceed as if writable fired.
                self.connections.lock().unwrap().insert(
                    fd,
                    ConnectionEntry {
                        connection: req.connection.clone(),
                        phase: Phase::Connected,
                    },
                );
                if self.poller.register(fd, Interest::read()).is_err() {
                    self.connections.lock().unwrap().remove(&fd);
                    conn.handle_connect_failure("could not register socket");
                    continue;
                }
                conn.mark_connected();
            } else {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINPROGRESS) {
                    if self.poller.register(fd, Interest::write_oneshot()).is_err() {
                        conn.handle_connect_failure("could not register socket");
                        continue;
                    }
                    self.connections.lock().unwrap().insert(
                        fd,
                        ConnectionEntry {
                            connection: req.connection,
                            phase: Phase::Connecting,
                        },
                    );
                } else {
                    conn.handle_connect_failure(&err.to_string());
                }
            }
        }
    }

    fn process_submission_queue(&self) {
        while let Ok(entry) = self.submit_rx.try_recv() {
            self.perform_send(entry, false);
        }
    }

    // ── Send path ───────────────────────────────────────────────────

    fn perform_send(&self, mut entry: SendRequest, resumed: bool) {
        let Some(conn) = entry.connection.upgrade() else {
            return;
        };
        let fd = conn.raw_fd();
        if fd < 0 {
            conn.handle_error(Error::Send(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            )));
            return;
        }

        loop {
            let remaining = &entry.buffer[entry.written..];
            let n = unsafe {
                libc::send(
                    fd,
                    remaining.as_ptr() as *const libc::c_void,
                    remaining.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if err.kind() == io::ErrorKind::WouldBlock {
                    // Persist progress and resume on the next writable event.
                    if !resumed {
                        let _ = self.poller.modify(fd, Interest::read_write());
                    }
                    self.pending_sends.lock().unwrap().insert(fd, entry);
                } else {
                    if resumed {
                        let _ = self.poller.modify(fd, Interest::read());
                    }
                    conn.handle_error(Error::Send(err));
                }
                return;
            }

            entry.written += n as usize;
            metrics::BYTES_SENT.add(n as u64);
            if entry.written == entry.buffer.len() {
                if resumed {
                    let _ = self.poller.modify(fd, Interest::read());
                }
                if let Some(timer_fd) = entry.timer_fd {
                    self.timeouts
                        .lock()
                        .unwrap()
                        .insert(timer_fd, entry.connection.clone());
                    let _ = self.poller.register(timer_fd, Interest::read());
                }
                return;
            }
        }
    }

    // ── Readiness handlers ──────────────────────────────────────────

    fn handle_readable(&self, fd: RawFd) {
        let known = {
            let connections = self.connections.lock().unwrap();
            connections.get(&fd).map(|entry| entry.connection.clone())
        };
        if let Some(weak) = known {
            match weak.upgrade() {
                Some(conn) => self.handle_incoming(&conn),
                None => {
                    self.connections.lock().unwrap().remove(&fd);
                    let _ = self.poller.delete(fd);
                }
            }
            return;
        }

        // A request timer fired. Firings whose timer was recycled earlier
        // in this batch are stale and ignored.
        let target = self.timeouts.lock().unwrap().remove(&fd);
        if let Some(weak) = target {
            let mut expirations: u64 = 0;
            unsafe {
                libc::read(fd, &mut expirations as *mut u64 as *mut libc::c_void, 8);
            }
            let _ = self.poller.delete(fd);
            if let Some(conn) = weak.upgrade() {
                conn.handle_timeout();
            }
        }
    }

    fn handle_writable(&self, fd: RawFd) {
        if let Some(entry) = self.pending_sends.lock().unwrap().remove(&fd) {
            self.perform_send(entry, true);
            return;
        }

        let connecting = {
            let mut connections = self.connections.lock().unwrap();
            match connections.get_mut(&fd) {
                Some(entry) if entry.phase == Phase::Connecting => {
                    entry.phase = Phase::Connected;
                    Some(entry.connection.clone())
                }
                // Stale writable after a resumed send completed; read-only
                // interest was already restored.
                Some(_) => None,
                None => panic!("writable event for unknown fd {fd}"),
            }
        };
        if let Some(weak) = connecting {
            self.finish_connect(fd, weak);
        }
    }

    fn handle_hangup(&self, fd: RawFd) {
        let entry = self.connections.lock().unwrap().remove(&fd);
        match entry {
            Some(entry) => {
                let _ = self.poller.delete(fd);
                self.pending_sends.lock().unwrap().remove(&fd);
                let Some(conn) = entry.connection.upgrade() else {
                    return;
                };
                match entry.phase {
                    Phase::Connecting => conn.handle_connect_failure("could not connect"),
                    Phase::Connected => {
                        conn.close();
                        conn.handle_error(Error::PeerClosed);
                    }
                }
            }
            None => panic!("hangup event for unknown fd {fd}"),
        }
    }

    /// A Connecting fd became writable: check SO_ERROR, then either mark
    /// the connection Connected and switch to level-triggered reads, or
    /// fail the connect.
    fn finish_connect(&self, fd: RawFd, weak: Weak<Connection>) {
        let Some(conn) = weak.upgrade() else {
            self.connections.lock().unwrap().remove(&fd);
            let _ = self.poller.delete(fd);
            return;
        };
        let pending = socket_error(fd);
        if pending != 0 {
            self.connections.lock().unwrap().remove(&fd);
            let _ = self.poller.delete(fd);
            let reason = io::Error::from_raw_os_error(pending);
            conn.handle_connect_failure(&reason.to_string());
            return;
        }
        let _ = self.poller.modify(fd, Interest::read());
        conn.mark_connected();
    }

    /// Drain the socket into a stack buffer, flushing to the connection's
    /// parser at would-block, buffer-full, and orderly-close boundaries.
    fn handle_incoming(&self, conn: &Arc<Connection>) {
        let fd = conn.raw_fd();
        if fd < 0 {
            return;
        }

        let mut buffer = [0u8; RECV_BUFFER];
        let mut total = 0usize;

        loop {
            let n = unsafe {
                libc::recv(
                    fd,
                    buffer[total..].as_mut_ptr() as *mut libc::c_void,
                    RECV_BUFFER - total,
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if err.kind() == io::ErrorKind::WouldBlock {
                    if total > 0 {
                        conn.handle_response_packet(&buffer[..total]);
                    }
                } else {
                    // Abortive peer close (e.g. ECONNRESET): tear the fd
                    // down like an orderly close so the slot reconnects.
                    self.forget_socket(fd);
                    conn.close();
                    conn.handle_error(Error::Recv(err));
                }
                return;
            }
            if n == 0 {
                // Orderly close. Tear the fd down before settling so a
                // drain triggered by the completion sees NotConnected.
                self.forget_socket(fd);
                conn.close();
                if total > 0 {
                    conn.handle_response_packet(&buffer[..total]);
                } else {
                    conn.handle_error(Error::PeerClosed);
                }
                return;
            }

            total += n as usize;
            metrics::BYTES_RECEIVED.add(n as u64);
            if total == RECV_BUFFER {
                // Buffer full; the parser is resumable, keep reading.
                conn.handle_response_packet(&buffer[..total]);
                total = 0;
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.connect_wake);
            libc::close(self.submit_wake);
        }
    }
}

/// Fetch and clear the pending socket error after a non-blocking connect.
fn socket_error(fd: RawFd) -> libc::c_int {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 { libc::EIO } else { err }
}
