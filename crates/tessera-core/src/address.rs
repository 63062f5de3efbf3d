// Cluster member address
// Identity is host + port; the self/internal flags are annotations only

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    net::{IpAddr, Ipv6Addr},
    str::FromStr,
};

use crate::error::ClusterError;

#[derive(Clone, Debug)]
pub struct Address {
    host: String,
    port: u16,
    is_internal: bool,
    is_self: bool,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            is_internal: false,
            is_self: false,
        }
    }

    /// An address advertised for cluster-internal communication
    pub fn internal(host: impl Into<String>, port: u16) -> Self {
        Self {
            is_internal: true,
            ..Self::new(host, port)
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn is_self(&self) -> bool {
        self.is_self
    }

    pub fn set_self(&mut self, is_self: bool) {
        self.is_self = is_self;
    }

    pub fn set_internal(&mut self, is_internal: bool) {
        self.is_internal = is_internal;
    }

    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Parse `host[:port]`, using `default_port` when no port is given.
    /// IPv6 hosts are written `[v6]:port`, or bare without a port.
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self, ClusterError> {
        let (host, port) = Self::split_host_port(s)?;
        Ok(Self::new(host, port.unwrap_or(default_port)))
    }

    fn split_host_port(s: &str) -> Result<(&str, Option<u16>), ClusterError> {
        let s = s.trim();
        let invalid = || ClusterError::InvalidAddress(s.to_string());
        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid());

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            if host.parse::<Ipv6Addr>().is_err() {
                return Err(invalid());
            }
            return match tail {
                "" => Ok((host, None)),
                _ => {
                    let port = tail.strip_prefix(':').ok_or_else(invalid)?;
                    Ok((host, Some(parse_port(port)?)))
                }
            };
        }

        if s.parse::<Ipv6Addr>().is_ok() {
            return Ok((s, None));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || host.contains(':') {
                    return Err(invalid());
                }
                Ok((host, Some(parse_port(port)?)))
            }
            None if s.is_empty() => Err(invalid()),
            None => Ok((s, None)),
        }
    }
}

impl FromStr for Address {
    type Err = ClusterError;

    /// Parse `host:port`; the port is required.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::split_host_port(s)? {
            (host, Some(port)) => Ok(Self::new(host, port)),
            (_, None) => Err(ClusterError::InvalidAddress(s.to_string())),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.port.cmp(&other.port))
    }
}
