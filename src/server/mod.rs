//! Server data-plane
//!
//! One accept loop, one TUN-read loop, one handler task per client. The
//! handlers translate client traffic onto the managed subnet; the TUN-read
//! loop translates it back and fans replies out to the per-connection
//! queues, so no peer can block the device or another flow.

pub mod handler;

use crate::codec::tun_frame;
use crate::config::Config;
use crate::crypto::{self, Cipher};
use crate::nat::registry::ConnectionRegistry;
use crate::nat::subnet::ManagedSubnet;
use crate::network::listener::PacketListener;
use crate::platform;
use crate::server::handler::Handler;
use crate::utils::device::{DeviceConfig, DeviceHandler};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Managed subnet clients are represented on; the gateway slot stays
/// reserved and the server takes the first assignable host for its TUN.
const SERVER_SUBNET: &str = "10.152.219.0/24";
const MTU: u16 = 1500;

pub struct Server {
    address: String,
    cipher: Arc<Box<dyn Cipher>>,
    subnet: Arc<ManagedSubnet>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
}

impl Server {
    pub fn new(config: &Config) -> crate::Result<Server> {
        let cipher: Arc<Box<dyn Cipher>> =
            Arc::new(crypto::new_cipher(&config.cipher, &config.passwd)?);
        tracing::info!("using cipher: {}", config.cipher);

        let subnet = Arc::new(ManagedSubnet::new(SERVER_SUBNET)?);
        tracing::info!("managed network created: {}", subnet);

        Ok(Server {
            address: config.address.clone(),
            cipher,
            subnet,
            registry: Arc::new(ConnectionRegistry::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        tracing::info!("server stopping");
        self.cancel.cancel();
    }

    pub async fn run(&mut self) -> crate::Result<()> {
        let server_ip = self.subnet.take()?;

        let mut device = DeviceHandler::new();
        let name = device
            .run(
                DeviceConfig {
                    ip: server_ip,
                    mask: self.subnet.netmask(),
                    gateway: self.subnet.gateway(),
                    mtu: MTU,
                },
                self.cancel.clone(),
            )
            .await?;
        tracing::info!("TUN device created: {} ({})", name, server_ip);

        platform::server_setup(&name, &self.subnet.cidr())?;

        let listener = PacketListener::bind(&self.address, self.cipher.clone()).await?;
        let tun_tx = device.frame_sender()?;

        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tun_read_loop(device, registry, cancel).await;
        });

        let mut failure = None;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                accepted = listener.accept() => {
                    let (reader, writer, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!("accept failed: {}", e);
                            failure = Some(e);
                            break;
                        }
                    };
                    tracing::info!("new connection: {}", peer);

                    let mut handler = Handler::new(
                        reader,
                        writer,
                        peer,
                        self.subnet.clone(),
                        self.registry.clone(),
                        tun_tx.clone(),
                        self.cancel.clone(),
                    );
                    tokio::spawn(async move {
                        let result = handler.run().await;
                        tracing::debug!("handler for {} stopped: {:?}", peer, result);
                    });
                }
            }
        }

        if let Err(e) = platform::server_teardown(&name, &self.subnet.cidr()) {
            tracing::warn!("server teardown: {}", e);
        }
        self.subnet.remove(server_ip);
        tracing::info!("server stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Reads frames from the TUN and fans them out to connection queues
async fn tun_read_loop(
    mut device: DeviceHandler,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = device.recv() => {
                let Some(frame) = frame else { break };
                dispatch_frame(&frame, &registry);
            }
        }
    }
    tracing::debug!("tun read loop stopped");
}

/// Routes one TUN frame back to the client its destination VIP stands for
///
/// Frames with no registered route are dropped; a full outbound queue drops
/// the newest packet and counts it rather than blocking the device.
pub fn dispatch_frame(frame: &[u8], registry: &ConnectionRegistry) {
    let mut packet = match tun_frame::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!("undeliverable tun frame: {}", e);
            return;
        }
    };
    if packet.version() != 4 {
        return;
    }
    let Some(dst) = packet.destination_v4() else {
        return;
    };

    let Some(entry) = registry.lookup(dst) else {
        tracing::debug!("no route to {}", dst);
        return;
    };

    if let Err(e) = packet.set_destination_v4(entry.origin) {
        tracing::warn!("rewrite for {} failed: {}", dst, e);
        return;
    }

    match entry.outbound.try_send(packet) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let dropped = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!("outbound queue full for {}, {} dropped so far", dst, dropped);
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("connection behind {} is gone", dst);
        }
    }
}
