//! Managed virtual subnet
//!
//! A CIDR whose host addresses are handed out one at a time. The network and
//! broadcast addresses are never assignable, and the first assignable host is
//! reserved as the gateway by convention. Allocation always returns the
//! lowest free address, so released addresses are refilled before fresh ones.

use crate::nat::NatError;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::sync::Mutex;

pub struct ManagedSubnet {
    net: Ipv4Net,
    gateway: Ipv4Addr,
    in_use: Mutex<BTreeSet<Ipv4Addr>>,
}

impl ManagedSubnet {
    pub fn new(cidr: &str) -> Result<Self, NatError> {
        let net: Ipv4Net = cidr
            .parse()
            .map_err(|_| NatError::Cidr(cidr.to_string()))?;
        // a usable subnet needs at least a gateway and one assignable host
        let mut hosts = net.hosts();
        let gateway = hosts.next().ok_or_else(|| NatError::Cidr(cidr.to_string()))?;
        if hosts.next().is_none() {
            return Err(NatError::Cidr(cidr.to_string()));
        }
        Ok(Self {
            net,
            gateway,
            in_use: Mutex::new(BTreeSet::new()),
        })
    }

    /// Marks and returns the lowest free host address
    ///
    /// Never returns the network, broadcast, or gateway address.
    pub fn take(&self) -> Result<Ipv4Addr, NatError> {
        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        for host in self.net.hosts() {
            if host == self.gateway || in_use.contains(&host) {
                continue;
            }
            in_use.insert(host);
            return Ok(host);
        }
        Err(NatError::Exhausted)
    }

    /// Releases an address; releasing twice or out of range is a no-op
    pub fn remove(&self, ip: Ipv4Addr) {
        self.in_use
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ip);
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.net.netmask()
    }

    pub fn cidr(&self) -> String {
        self.net.trunc().to_string()
    }
}

impl Display for ManagedSubnet {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} gw {}", self.net.trunc(), self.gateway)
    }
}
