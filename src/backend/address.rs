//! Backend address parsing and resolution.
//!
//! Backend specs come from the administrative layer as plain strings:
//! `host:port`, `[v6addr]:port`, a bare IP or hostname (default port), or an
//! absolute Unix socket path. Read-only specs may carry a `@weight` suffix.

use crate::backend::{BackendRole, RegistryError};
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Port used when a spec carries none.
pub const DEFAULT_PORT: u16 = 3306;

/// Weight given to a read-only backend without a `@weight` suffix.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Largest accepted read-only weight.
pub const MAX_WEIGHT: u32 = 10_000;

/// A resolved backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendAddress {
    /// TCP endpoint.
    Tcp(SocketAddr),
    /// Unix domain socket.
    Unix(PathBuf),
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddress::Tcp(addr) => write!(f, "{}", addr),
            BackendAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Turns an address spec into a [`BackendAddress`].
///
/// Resolution may block on name lookup, so the registry always calls it
/// before taking its lock.
pub trait AddressResolver: Send + Sync {
    /// Resolve `spec` or fail with [`RegistryError::InvalidAddress`].
    fn resolve(&self, spec: &str) -> Result<BackendAddress, RegistryError>;
}

/// Resolver backed by the operating system's name lookup.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    default_port: u16,
}

impl SystemResolver {
    /// Create a resolver that fills in [`DEFAULT_PORT`].
    pub fn new() -> Self {
        Self::with_default_port(DEFAULT_PORT)
    }

    /// Create a resolver with a custom default port.
    pub fn with_default_port(default_port: u16) -> Self {
        Self { default_port }
    }

    /// The port used when a spec has none.
    pub fn default_port(&self) -> u16 {
        self.default_port
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressResolver for SystemResolver {
    fn resolve(&self, spec: &str) -> Result<BackendAddress, RegistryError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::invalid_address(spec, "address is empty"));
        }

        if trimmed.starts_with('/') {
            return Ok(BackendAddress::Unix(PathBuf::from(trimmed)));
        }

        let addr = if let Ok(addr) = trimmed.parse::<SocketAddr>() {
            addr
        } else if let Ok(ip) = trimmed.parse::<IpAddr>() {
            SocketAddr::new(ip, self.default_port)
        } else {
            let (host, port) = split_host_port(trimmed, self.default_port)
                .map_err(|reason| RegistryError::invalid_address(spec, reason))?;

            match host.parse::<IpAddr>() {
                Ok(ip) => SocketAddr::new(ip, port),
                Err(_) => (host, port)
                    .to_socket_addrs()
                    .map_err(|e| {
                        RegistryError::invalid_address(spec, format!("could not resolve host: {}", e))
                    })?
                    .next()
                    .ok_or_else(|| {
                        RegistryError::invalid_address(spec, "host resolved to no addresses")
                    })?,
            }
        };

        if addr.port() == 0 {
            return Err(RegistryError::invalid_address(spec, "port must be non-zero"));
        }

        Ok(BackendAddress::Tcp(addr))
    }
}

/// Split a backend spec into its address part and weight.
///
/// Only read-only specs carry a weight. The suffix after the last `@` is the
/// weight; a missing or empty suffix means [`DEFAULT_WEIGHT`]. Weights outside
/// `1..=MAX_WEIGHT` are rejected. Read-write
/// specs are returned whole with weight 0.
pub fn split_weight(spec: &str, role: BackendRole) -> Result<(&str, u32), RegistryError> {
    if role == BackendRole::ReadWrite {
        return Ok((spec, 0));
    }

    match spec.rsplit_once('@') {
        None => Ok((spec, DEFAULT_WEIGHT)),
        Some((address, "")) => Ok((address, DEFAULT_WEIGHT)),
        Some((address, weight)) => match weight.trim().parse::<u32>() {
            Ok(w) if (1..=MAX_WEIGHT).contains(&w) => Ok((address, w)),
            _ => Err(RegistryError::InvalidWeight {
                spec: spec.to_string(),
                weight: weight.to_string(),
            }),
        },
    }
}

fn split_host_port(spec: &str, default_port: u16) -> Result<(&str, u16), String> {
    if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| "missing closing ']'".to_string())?;
        let port = match tail {
            "" => default_port,
            tail => {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| format!("unexpected '{}' after ']'", tail))?;
                parse_port(port)?
            }
        };
        return Ok((host, port));
    }

    match spec.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => {
            Err("IPv6 addresses with a port must be bracketed".to_string())
        }
        Some(("", _)) => Err("host is empty".to_string()),
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((spec, default_port)),
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port '{}'", port))
}
