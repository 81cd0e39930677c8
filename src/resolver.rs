//! Host-name resolution for request targets.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::Error;

const HTTP_PORT: u16 = 80;

/// Resolve a `host` or `host:port` target into socket address candidates.
/// Defaults to port 80 when no port is given.
pub(crate) fn resolve(host: &str) -> Result<Vec<SocketAddr>, Error> {
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port_str)) if !name.is_empty() && !name.contains(':') => {
            match port_str.parse::<u16>() {
                Ok(port) => (name, port),
                Err(_) => return Err(Error::AddressResolution(host.to_string())),
            }
        }
        _ => (host, HTTP_PORT),
    };

    let addrs: Vec<SocketAddr> = (name, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddressResolution(host.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::AddressResolution(host.to_string()));
    }
    Ok(addrs)
}
