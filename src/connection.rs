//! A pooled connection: one socket, at most one in-flight request.
//!
//! Lease state (Idle/Used) is arbitrated by the pool with a CAS and is
//! independent of link state (NotConnected/Connecting/Connected), which
//! tracks the socket itself. Requests submitted while the socket is still
//! connecting park on the deferred queue and drain FIFO once the connect
//! completes.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::completion::{Completion, CompletionHandle, completion};
use crate::error::Error;
use crate::metrics;
use crate::parser::{ParseStatus, ResponseParser};
use crate::request::{Request, serialize};
use crate::response::Response;
use crate::timer::{TimerHandle, TimerPool};
use crate::transport::Transport;

const LEASE_IDLE: u32 = 0;
const LEASE_USED: u32 = 1;

const LINK_NOT_CONNECTED: u32 = 0;
const LINK_CONNECTING: u32 = 1;
const LINK_CONNECTED: u32 = 2;

/// Callback run after an in-flight entry settles; releases the pool lease
/// and drains the pending queues. Must run outside all engine locks.
pub(crate) type OnDone = Box<dyn FnOnce() + Send + 'static>;

/// A submission parked while the connection is Connecting, or on a per-host
/// pending queue while no connection is Idle.
pub(crate) struct RequestData {
    pub(crate) handle: CompletionHandle<Response>,
    pub(crate) request: Request,
    pub(crate) timeout: Duration,
    pub(crate) on_done: Option<OnDone>,
}

/// The single in-flight request of a connection.
struct RequestEntry {
    handle: CompletionHandle<Response>,
    timer: Option<TimerHandle>,
    on_done: Option<OnDone>,
}

pub(crate) struct Connection {
    fd: AtomicI32,
    local_addr: Mutex<Option<SocketAddr>>,
    lease: AtomicU32,
    link: AtomicU32,
    transport: OnceLock<Arc<Transport>>,
    in_flight: Mutex<Option<RequestEntry>>,
    deferred_tx: Sender<RequestData>,
    deferred_rx: Receiver<RequestData>,
    timers: TimerPool,
    parser: Mutex<ResponseParser>,
    tcp_nodelay: bool,
}

impl Connection {
    pub(crate) fn new(tcp_nodelay: bool) -> Self {
        let (deferred_tx, deferred_rx) = unbounded();
        Connection {
            fd: AtomicI32::new(-1),
            local_addr: Mutex::new(None),
            lease: AtomicU32::new(LEASE_IDLE),
            link: AtomicU32::new(LINK_NOT_CONNECTED),
            transport: OnceLock::new(),
            in_flight: Mutex::new(None),
            deferred_tx,
            deferred_rx,
            timers: TimerPool::new(),
            parser: Mutex::new(ResponseParser::new()),
            tcp_nodelay,
        }
    }

    // ── Lease state (pool arbitration) ──────────────────────────────

    /// Attempt the Idle→Used lease transition.
    pub(crate) fn try_lease(&self) -> bool {
        self.lease
            .compare_exchange(LEASE_IDLE, LEASE_USED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return the lease to Idle. No notification; draining is the client's.
    pub(crate) fn release_lease(&self) {
        self.lease.store(LEASE_IDLE, Ordering::Release);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.lease.load(Ordering::Acquire) == LEASE_IDLE
    }

    // ── Link state ──────────────────────────────────────────────────

    pub(crate) fn is_connected(&self) -> bool {
        self.link.load(Ordering::Acquire) == LINK_CONNECTED
    }

    /// Raw socket fd, or -1 when no socket is open.
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// Local address once the connect has completed.
    #[allow(dead_code)]
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    // ── Transport affinity ──────────────────────────────────────────

    pub(crate) fn has_transport(&self) -> bool {
        self.transport.get().is_some()
    }

    /// Bind this connection to an I/O worker. Assigned exactly once.
    pub(crate) fn associate_transport(&self, transport: Arc<Transport>) {
        if self.transport.set(transport).is_err() {
            panic!("a transport has already been associated to the connection");
        }
    }

    fn transport(&self) -> &Arc<Transport> {
        self.transport
            .get()
            .expect("connection has no associated transport")
    }

    // ── Connect ─────────────────────────────────────────────────────

    /// Open a non-blocking socket for the first viable candidate and hand
    /// the connect to the owning transport. Called at most once per lease
    /// that found the connection NotConnected.
    pub(crate) fn connect(self: &Arc<Self>, addrs: Vec<SocketAddr>) -> Result<(), Error> {
        let mut last_err = io::Error::other("no address candidates");
        for addr in addrs {
            let domain = if addr.is_ipv4() {
                libc::AF_INET
            } else {
                libc::AF_INET6
            };
            let fd = unsafe {
                libc::socket(
                    domain,
                    libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    0,
                )
            };
            if fd < 0 {
                last_err = io::Error::last_os_error();
                continue;
            }
            if self.tcp_nodelay {
                let optval: libc::c_int = 1;
                unsafe {
                    libc::setsockopt(
                        fd,
                        libc::IPPROTO_TCP,
                        libc::TCP_NODELAY,
                        &optval as *const _ as *const libc::c_void,
                        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                    );
                }
            }
            self.fd.store(fd, Ordering::Release);
            self.link.store(LINK_CONNECTING, Ordering::Release);
            self.transport().async_connect(Arc::downgrade(self), addr);
            return Ok(());
        }
        Err(Error::SocketCreation(last_err))
    }

    /// Connect completed on the owning worker: record the local address,
    /// flip to Connected, and drain the deferred queue FIFO.
    pub(crate) fn mark_connected(self: &Arc<Self>) {
        let fd = self.raw_fd();
        if let Ok(addr) = crate::poller::local_socket_addr(fd) {
            *self.local_addr.lock().unwrap() = Some(addr);
        }
        self.link.store(LINK_CONNECTED, Ordering::Release);
        metrics::CONNECTIONS_OPENED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();
        self.process_deferred();
    }

    /// Connect failed (or the peer hung up while connecting): close the
    /// socket and reject every deferred submission with `Connect`.
    pub(crate) fn handle_connect_failure(&self, reason: &str) {
        self.fail_deferred(|| Error::Connect(reason.to_string()));
    }

    /// Close the socket and reject every deferred submission, running each
    /// release callback so leases and pending queues make progress.
    pub(crate) fn fail_deferred(&self, make_err: impl Fn() -> Error) {
        self.close();
        while let Ok(data) = self.deferred_rx.try_recv() {
            data.handle.reject(make_err());
            metrics::TRANSPORT_ERRORS.increment();
            if let Some(on_done) = data.on_done {
                on_done();
            }
        }
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Submit on a Connected connection.
    pub(crate) fn perform(
        self: &Arc<Self>,
        request: Request,
        timeout: Duration,
        on_done: OnDone,
    ) -> Completion<Response> {
        let (handle, result) = completion();
        self.perform_impl(request, timeout, handle, Some(on_done));
        result
    }

    /// Submit while the connection is still Connecting: park on the
    /// deferred queue without serializing or sending.
    pub(crate) fn async_perform(
        &self,
        request: Request,
        timeout: Duration,
        on_done: OnDone,
    ) -> Completion<Response> {
        let (handle, result) = completion();
        self.defer(RequestData {
            handle,
            request,
            timeout,
            on_done: Some(on_done),
        });
        result
    }

    pub(crate) fn defer(&self, data: RequestData) {
        // Receiver lives as long as the connection, so send cannot fail.
        let _ = self.deferred_tx.send(data);
    }

    /// Serialize, arm the optional timer, install the in-flight entry, and
    /// ask the transport to send.
    pub(crate) fn perform_impl(
        self: &Arc<Self>,
        request: Request,
        timeout: Duration,
        handle: CompletionHandle<Response>,
        on_done: Option<OnDone>,
    ) {
        let buffer = match serialize(&request) {
            Ok(buffer) => buffer,
            Err(err) => {
                handle.reject(err);
                metrics::TRANSPORT_ERRORS.increment();
                if let Some(on_done) = on_done {
                    on_done();
                }
                return;
            }
        };

        let timer = if timeout > Duration::ZERO {
            match self.timers.pick().and_then(|timer| {
                timer.arm(timeout).map_err(Error::Io)?;
                Ok(timer)
            }) {
                Ok(timer) => Some(timer),
                Err(err) => {
                    handle.reject(err);
                    metrics::TRANSPORT_ERRORS.increment();
                    if let Some(on_done) = on_done {
                        on_done();
                    }
                    return;
                }
            }
        } else {
            None
        };
        let timer_fd = timer.as_ref().map(|t| t.fd());

        *self.in_flight.lock().unwrap() = Some(RequestEntry {
            handle,
            timer,
            on_done,
        });
        self.transport().async_send_request(self, timer_fd, buffer);
    }

    /// Drain requests parked while Connecting. Runs on the owning worker.
    fn process_deferred(self: &Arc<Self>) {
        while let Ok(data) = self.deferred_rx.try_recv() {
            self.perform_impl(data.request, data.timeout, data.handle, data.on_done);
        }
    }

    // ── Completion paths ────────────────────────────────────────────

    /// Feed response bytes into the parser; on a complete message, settle
    /// the in-flight entry and reset the parser.
    pub(crate) fn handle_response_packet(&self, data: &[u8]) {
        let response = {
            let mut parser = self.parser.lock().unwrap();
            parser.feed(data);
            if parser.parse() != ParseStatus::Done {
                return;
            }
            let response = parser.take_response();
            parser.reset();
            response
        };
        if let Some(response) = response {
            metrics::RESPONSES_RECEIVED.increment();
            self.settle(Ok(response));
        }
    }

    /// Reject the in-flight entry with a transport error, if any.
    pub(crate) fn handle_error(&self, err: Error) {
        if self.settle(Err(err)) {
            metrics::TRANSPORT_ERRORS.increment();
        }
    }

    /// Reject the in-flight entry with a timeout.
    pub(crate) fn handle_timeout(&self) {
        if self.settle(Err(Error::Timeout)) {
            metrics::REQUEST_TIMEOUTS.increment();
        }
    }

    /// Consume the in-flight entry exactly once: disarm and recycle the
    /// timer, settle the completion, then run `on_done` outside all locks.
    fn settle(&self, result: Result<Response, Error>) -> bool {
        let entry = self.in_flight.lock().unwrap().take();
        let Some(entry) = entry else { return false };

        if let Some(timer) = entry.timer {
            timer.disarm();
            if let Some(transport) = self.transport.get() {
                transport.forget_timer(timer.fd());
            }
            self.timers.release(timer);
        }

        match result {
            Ok(response) => entry.handle.resolve(response),
            Err(err) => entry.handle.reject(err),
        }

        if let Some(on_done) = entry.on_done {
            on_done();
        }
        true
    }

    /// Tear down the socket. The next lease that observes NotConnected
    /// reconnects.
    pub(crate) fn close(&self) {
        let was_connected = self.link.swap(LINK_NOT_CONNECTED, Ordering::AcqRel) == LINK_CONNECTED;
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
            metrics::CONNECTIONS_CLOSED.increment();
            if was_connected {
                metrics::CONNECTIONS_ACTIVE.decrement();
            }
        }
        *self.local_addr.lock().unwrap() = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
