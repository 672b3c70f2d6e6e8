//! Listening-socket provisioning.
//!
//! Turns a [`Config`] into one bound, listening, non-blocking
//! [`mio::net::TcpListener`], or reports why it could not.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};

use mio::net::TcpListener;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Errors produced while provisioning the listening socket.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{host}:{port} resolved to no addresses")]
    NoAddress { host: String, port: u16 },

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Binds the first address `config.host:config.port` resolves to and starts listening.
///
/// Addresses are tried in resolution order; the error from the last failed
/// bind is returned if none succeeds.
pub fn provision(config: &Config) -> Result<TcpListener, ProvisionError> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|source| ProvisionError::Resolve {
            host: config.host.clone(),
            port: config.port,
            source,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match bind_one(addr, config.backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(%addr, error = %e, "bind attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProvisionError::NoAddress {
        host: config.host.clone(),
        port: config.port,
    }))
}

fn bind_one(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ProvisionError> {
    let std_listener =
        StdTcpListener::bind(addr).map_err(|source| ProvisionError::Bind { addr, source })?;
    set_backlog(&std_listener, backlog).map_err(|source| ProvisionError::Listen { addr, source })?;
    std_listener
        .set_nonblocking(true)
        .map_err(|source| ProvisionError::Listen { addr, source })?;

    debug!(%addr, backlog, "listener provisioned");
    Ok(TcpListener::from_std(std_listener))
}

// The std listener is created with a fixed backlog; calling listen(2) again
// on a listening socket replaces it.
#[cfg(unix)]
fn set_backlog(listener: &StdTcpListener, backlog: u32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
    // SAFETY: the descriptor is owned by `listener` and open for the whole call.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_backlog(_listener: &StdTcpListener, _backlog: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Config {
        Config {
            host: "127.0.0.1".to_owned(),
            port: 0,
            ..Config::default()
        }
    }

    #[test]
    fn provisions_an_ephemeral_port() {
        let listener = provision(&loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn accepted_connections_are_reachable() {
        let listener = provision(&loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();

        // Non-blocking accept: retry until the handshake lands in the queue.
        let mut accepted = None;
        for _ in 0..200 {
            match listener.accept() {
                Ok(pair) => {
                    accepted = Some(pair);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
        assert!(accepted.is_some());
    }

    #[test]
    fn port_in_use_is_a_bind_error() {
        let first = provision(&loopback()).unwrap();
        let taken = Config {
            port: first.local_addr().unwrap().port(),
            ..loopback()
        };
        assert!(matches!(provision(&taken), Err(ProvisionError::Bind { .. })));
    }

    #[test]
    fn unresolvable_host_is_a_resolve_error() {
        let config = Config {
            host: "host.invalid.".to_owned(),
            ..loopback()
        };
        assert!(matches!(
            provision(&config),
            Err(ProvisionError::Resolve { .. } | ProvisionError::NoAddress { .. })
        ));
    }
}
