//! Client front door: request dispatch, per-host pending queues, and worker
//! lifecycle.
//!
//! `do_request` never blocks: it either leases a connection and hands the
//! submission to a transport, or parks it on a bounded per-host queue.
//! Completion callbacks release the lease and drain those queues as
//! connections free up.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use crate::completion::{Completion, CompletionHandle, completion};
use crate::config::{Config, ConfigBuilder, num_cpus};
use crate::connection::{Connection, OnDone, RequestData};
use crate::error::Error;
use crate::metrics;
use crate::pool::ConnectionPool;
use crate::request::{Method, Request, RequestBuilder, split_url};
use crate::resolver;
use crate::response::Response;
use crate::transport::Transport;

struct PendingQueues {
    by_host: HashMap<String, VecDeque<RequestData>>,
    stopped: bool,
}

struct ClientInner {
    pool: ConnectionPool,
    transports: Vec<Arc<Transport>>,
    io_index: AtomicUsize,
    queues: Mutex<PendingQueues>,
    pending_queue_depth: usize,
}

/// An asynchronous HTTP/1.1 client multiplexing requests over pooled
/// connections.
///
/// # Example
///
/// ```rust,no_run
/// use fetchline::Client;
///
/// let client = Client::init(Client::options().threads(2).build()?)?;
/// let response = client.get("http://example.com/hello").send().wait()?;
/// assert_eq!(response.status(), 200);
/// # Ok::<(), fetchline::Error>(())
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Client {
    /// Builder for client configuration.
    pub fn options() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Create the pool and spawn the I/O workers.
    pub fn init(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let threads = if config.threads == 0 {
            num_cpus()
        } else {
            config.threads
        };

        let mut transports = Vec::with_capacity(threads);
        for _ in 0..threads {
            transports.push(Arc::new(Transport::new()?));
        }

        let mut handles = Vec::with_capacity(threads);
        for (i, transport) in transports.iter().enumerate() {
            let transport = transport.clone();
            let handle = thread::Builder::new()
                .name(format!("fetchline-worker-{i}"))
                .spawn(move || transport.run())
                .map_err(Error::Io)?;
            handles.push(handle);
        }

        let inner = Arc::new(ClientInner {
            pool: ConnectionPool::new(config.max_connections_per_host, config.tcp_nodelay),
            transports,
            io_index: AtomicUsize::new(0),
            queues: Mutex::new(PendingQueues {
                by_host: HashMap::new(),
                stopped: false,
            }),
            pending_queue_depth: config.pending_queue_depth,
        });

        Ok(Client { inner, handles })
    }

    // ── Request builders ────────────────────────────────────────────

    /// Build a GET request.
    pub fn get(&self, resource: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Get, resource)
    }

    /// Build a POST request.
    pub fn post(&self, resource: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Post, resource)
    }

    /// Build a PUT request.
    pub fn put(&self, resource: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Put, resource)
    }

    /// Build a PATCH request.
    pub fn patch(&self, resource: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Patch, resource)
    }

    /// Build a DELETE request.
    pub fn delete(&self, resource: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Delete, resource)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Submit a request. Returns immediately with a completion that settles
    /// with the parsed response, a transport error, or a timeout.
    pub fn do_request(&self, mut request: Request, timeout: Duration) -> Completion<Response> {
        metrics::REQUESTS_SUBMITTED.increment();
        request.strip_user_agent();

        let (host, _) = split_url(request.resource());
        if host.is_empty() {
            let (handle, result) = completion();
            handle.reject(Error::InvalidUrl(request.resource().to_string()));
            return result;
        }
        let host = host.to_string();

        let Some(conn) = self.inner.pool.pick_connection(&host) else {
            let (handle, result) = completion();
            let mut queues = self.inner.queues.lock().unwrap();
            let queue = queues.by_host.entry(host).or_default();
            if queue.len() >= self.inner.pending_queue_depth {
                drop(queues);
                metrics::REQUESTS_REJECTED.increment();
                handle.reject(Error::QueueFull);
            } else {
                metrics::REQUESTS_QUEUED.increment();
                queue.push_back(RequestData {
                    handle,
                    request,
                    timeout,
                    on_done: None,
                });
            }
            return result;
        };

        if !conn.has_transport() {
            let index =
                self.inner.io_index.fetch_add(1, Ordering::Relaxed) % self.inner.transports.len();
            conn.associate_transport(self.inner.transports[index].clone());
        }

        let on_done = release_and_drain(Arc::downgrade(&self.inner), Arc::downgrade(&conn));

        if conn.is_connected() {
            conn.perform(request, timeout, on_done)
        } else {
            let result = conn.async_perform(request, timeout, on_done);
            start_connect(&conn, &host);
            result
        }
    }

    /// Best-effort count of Used connection slots for `host`.
    pub fn used_connections(&self, host: &str) -> usize {
        self.inner.pool.used_connections(host)
    }

    /// Best-effort count of Idle connection slots for `host`.
    pub fn idle_connections(&self, host: &str) -> usize {
        self.inner.pool.idle_connections(host)
    }

    /// Stop the pending queues and join the I/O workers. Idempotent;
    /// outstanding completions settle with `Canceled` once the client is
    /// dropped.
    pub fn shutdown(&mut self) {
        {
            let mut queues = self.inner.queues.lock().unwrap();
            if queues.stopped {
                return;
            }
            queues.stopped = true;
        }
        for transport in &self.inner.transports {
            transport.initiate_shutdown();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Submit a drained pending entry on a freshly leased connection: bind a
/// transport on first use, then either send directly (Connected) or defer
/// and kick off the connect.
fn submit_drained(
    inner: &Arc<ClientInner>,
    conn: Arc<Connection>,
    host: &str,
    request: Request,
    timeout: Duration,
    handle: CompletionHandle<Response>,
) {
    if !conn.has_transport() {
        let index = inner.io_index.fetch_add(1, Ordering::Relaxed) % inner.transports.len();
        conn.associate_transport(inner.transports[index].clone());
    }

    let on_done = release_and_drain(Arc::downgrade(inner), Arc::downgrade(&conn));

    if conn.is_connected() {
        conn.perform_impl(request, timeout, handle, Some(on_done));
        return;
    }

    // A never-connected slot can be claimed here; follow the same
    // defer-then-connect path as a direct submission.
    conn.defer(RequestData {
        handle,
        request,
        timeout,
        on_done: Some(on_done),
    });
    start_connect(&conn, host);
}

/// Resolve the host and kick off the asynchronous connect; failures reject
/// everything deferred on the connection with the matching error kind.
fn start_connect(conn: &Arc<Connection>, host: &str) {
    match resolver::resolve(host) {
        Ok(addrs) => {
            if let Err(err) = conn.connect(addrs) {
                let errno = match &err {
                    Error::SocketCreation(io_err) => io_err.raw_os_error(),
                    _ => None,
                };
                conn.fail_deferred(move || {
                    Error::SocketCreation(match errno {
                        Some(code) => std::io::Error::from_raw_os_error(code),
                        None => std::io::Error::other("no viable socket candidate"),
                    })
                });
            }
        }
        Err(_) => {
            let host = host.to_string();
            conn.fail_deferred(move || Error::AddressResolution(host.clone()));
        }
    }
}

/// The completion callback for a leased submission: return the connection
/// to Idle and give parked submissions a chance to run. Holds only weak
/// references so outstanding callbacks never keep the engine alive.
fn release_and_drain(inner: Weak<ClientInner>, conn: Weak<Connection>) -> OnDone {
    Box::new(move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Some(conn) = conn.upgrade() {
            inner.pool.release_connection(&conn);
        }
        process_pending_queues(&inner);
    })
}

/// Drain per-host pending queues onto Idle connections, one submission per
/// claim. The queues lock is released before each submission so completion
/// callbacks may re-enter safely.
fn process_pending_queues(inner: &Arc<ClientInner>) {
    loop {
        let claimed = {
            let mut queues = inner.queues.lock().unwrap();
            if queues.stopped {
                return;
            }
            let mut claimed = None;
            for (host, queue) in queues.by_host.iter_mut() {
                if queue.is_empty() {
                    continue;
                }
                if let Some(conn) = inner.pool.pick_connection(host) {
                    let data = queue.pop_front();
                    claimed = data.map(|data| (host.clone(), conn, data));
                    break;
                }
            }
            claimed
        };

        let Some((host, conn, data)) = claimed else {
            return;
        };
        submit_drained(inner, conn, &host, data.request, data.timeout, data.handle);
    }
}
