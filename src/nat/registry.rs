//! Connection registry
//!
//! One table, keyed by virtual IP, holding everything the return path needs:
//! the origin address to restore and the queue into the connection's writer.
//! Keeping both in a single entry means they can never disagree after a
//! partial failure. Lookups happen once per packet on the TUN read path;
//! mutations only at connection setup and teardown, so a reader/writer lock
//! fits the access pattern.

use crate::codec::packet::IpPacket;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Return route for one connected client
#[derive(Clone)]
pub struct RouteEntry {
    /// Source address latched from the client's first packet
    pub origin: Ipv4Addr,
    /// Bounded queue consumed by the connection's writer arm
    pub outbound: mpsc::Sender<IpPacket>,
    /// Packets discarded because the queue was full
    pub dropped: Arc<AtomicU64>,
}

impl RouteEntry {
    pub fn new(origin: Ipv4Addr, outbound: mpsc::Sender<IpPacket>) -> Self {
        Self {
            origin,
            outbound,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub struct ConnectionRegistry {
    routes: RwLock<HashMap<Ipv4Addr, RouteEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, vip: Ipv4Addr, entry: RouteEntry) {
        tracing::debug!("register {} -> {}", vip, entry.origin);
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vip, entry);
    }

    pub fn lookup(&self, vip: Ipv4Addr) -> Option<RouteEntry> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&vip)
            .cloned()
    }

    pub fn origin(&self, vip: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&vip)
            .map(|entry| entry.origin)
    }

    /// Idempotent removal
    pub fn remove(&self, vip: Ipv4Addr) {
        if self
            .routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&vip)
            .is_some()
        {
            tracing::debug!("unregister {}", vip);
        }
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
