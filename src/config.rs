/// Configuration for the client engine.
#[derive(Clone)]
pub struct Config {
    /// Number of I/O worker threads. 0 = number of CPUs.
    pub threads: usize,
    /// Fixed number of connection slots per host.
    pub max_connections_per_host: usize,
    /// Capacity of each per-host pending queue. Submissions beyond this
    /// reject immediately with `QueueFull`.
    pub pending_queue_depth: usize,
    /// Accepted for API compatibility; connection reuse is attempted
    /// regardless and server behavior governs actual reuse.
    pub keep_alive: bool,
    /// Enable TCP_NODELAY on outbound sockets.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 1,
            max_connections_per_host: 8,
            pending_queue_depth: 128,
            keep_alive: true,
            tcp_nodelay: true,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_connections_per_host == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "max_connections_per_host must be > 0".into(),
            ));
        }
        if self.pending_queue_depth == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "pending_queue_depth must be > 0".into(),
            ));
        }
        if self.threads > 1024 {
            return Err(crate::error::Error::InvalidConfig(
                "threads must be <= 1024".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use fetchline::ConfigBuilder;
///
/// let config = ConfigBuilder::default()
///     .threads(2)
///     .max_connections_per_host(4)
///     .pending_queue_depth(64)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of I/O worker threads. 0 = number of CPUs.
    pub fn threads(mut self, n: usize) -> Self {
        self.config.threads = n;
        self
    }

    /// Set the fixed number of connection slots per host.
    pub fn max_connections_per_host(mut self, n: usize) -> Self {
        self.config.max_connections_per_host = n;
        self
    }

    /// Set the capacity of each per-host pending queue.
    pub fn pending_queue_depth(mut self, n: usize) -> Self {
        self.config.pending_queue_depth = n;
        self
    }

    /// Enable or disable the keep-alive option.
    pub fn keep_alive(mut self, enable: bool) -> Self {
        self.config.keep_alive = enable;
        self
    }

    /// Enable or disable TCP_NODELAY on outbound sockets.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Get the number of available CPU cores.
pub(crate) fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = ConfigBuilder::new()
            .threads(3)
            .max_connections_per_host(2)
            .pending_queue_depth(16)
            .keep_alive(false)
            .tcp_nodelay(false)
            .build()
            .unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.max_connections_per_host, 2);
        assert_eq!(config.pending_queue_depth, 16);
        assert!(!config.keep_alive);
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn zero_slots_rejected() {
        assert!(
            ConfigBuilder::new()
                .max_connections_per_host(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn zero_queue_depth_rejected() {
        assert!(ConfigBuilder::new().pending_queue_depth(0).build().is_err());
    }
}
