//! Client data-plane
//!
//! Two loops around one TCP connection: uplink moves TUN frames onto the
//! cipher stream, downlink moves stream packets back into the TUN. Both
//! watch a shared cancellation token; whichever loop dies first cancels the
//! token so its partner unblocks, and `run` returns once both have reported
//! through the rendezvous channel.

use crate::codec::tun_frame;
use crate::config::Config;
use crate::crypto::{self, Cipher};
use crate::nat::subnet::ManagedSubnet;
use crate::network;
use crate::network::stream::{PacketReader, PacketWriter};
use crate::platform::{self, SavedGateway};
use crate::utils::device::{DeviceConfig, DeviceHandler};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point-to-point net between the client TUN and the server side: the
/// gateway slot is the server, the one assignable host is ours.
const CLIENT_SUBNET: &str = "10.152.219.0/30";
const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const MTU: u16 = 1500;

pub struct Client {
    subnet: ManagedSubnet,
    local_vip: Ipv4Addr,
    device: Option<DeviceHandler>,
    reader: Option<PacketReader<OwnedReadHalf>>,
    writer: Option<PacketWriter<OwnedWriteHalf>>,
    saved: Option<SavedGateway>,
    cancel: CancellationToken,
}

impl Client {
    /// Brings the whole client up; any failure here aborts startup
    pub async fn new(config: &Config) -> crate::Result<Client> {
        let cipher: Arc<Box<dyn Cipher>> =
            Arc::new(crypto::new_cipher(&config.cipher, &config.passwd)?);
        tracing::info!("using cipher: {}", config.cipher);

        let subnet = ManagedSubnet::new(CLIENT_SUBNET)?;
        let local_vip = subnet.take()?;
        let peer = subnet.gateway();
        tracing::info!("point-to-point net {}: local {}", subnet, local_vip);

        let cancel = CancellationToken::new();
        let mut device = DeviceHandler::new();
        let name = device
            .run(
                DeviceConfig {
                    ip: local_vip,
                    mask: NETMASK,
                    gateway: peer,
                    mtu: MTU,
                },
                cancel.clone(),
            )
            .await?;
        tracing::info!("TUN device created: {}", name);

        let (reader, writer) = network::connect(&config.address, cipher).await?;
        tracing::info!("connected to {}", config.address);

        let saved = platform::client_setup(&name, peer)?;

        Ok(Client {
            subnet,
            local_vip,
            device: Some(device),
            reader: Some(reader),
            writer: Some(writer),
            saved: Some(saved),
            cancel,
        })
    }

    /// Token observed by every task this client owns
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels both loops; pending I/O errors after this are benign
    pub fn stop(&self) {
        tracing::info!("client stopping");
        self.cancel.cancel();
    }

    /// Runs both loops until the tunnel ends, then restores the host routes
    pub async fn run(&mut self) -> crate::Result<()> {
        let mut device = self.device.take().ok_or("client already ran")?;
        let mut reader = self.reader.take().ok_or("client already ran")?;
        let mut writer = self.writer.take().ok_or("client already ran")?;
        let tun_tx = device.frame_sender()?;

        let (done_tx, mut done_rx) = mpsc::channel::<&'static str>(2);

        // uplink: TUN frames out to the server
        let cancel = self.cancel.clone();
        let done = done_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = device.recv() => {
                        let Some(frame) = frame else { break };
                        let packet = match tun_frame::decode(&frame) {
                            Ok(packet) => packet,
                            Err(e) => {
                                // a single bad frame is not worth the tunnel
                                tracing::warn!("bad tun frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = writer.write_packet(&packet).await {
                            if !cancel.is_cancelled() {
                                tracing::error!("uplink write failed: {}", e);
                            }
                            break;
                        }
                    }
                }
            }
            writer.close().await;
            let _ = done.send("uplink").await;
        });

        // downlink: stream packets back into the TUN
        let cancel = self.cancel.clone();
        let done = done_tx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = reader.read_packet() => {
                        match result {
                            Ok(packet) => {
                                if tun_tx.send(tun_frame::encode(&packet)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                if !cancel.is_cancelled() {
                                    tracing::error!("downlink read failed: {}", e);
                                }
                                break;
                            }
                        }
                    }
                }
            }
            let _ = done.send("downlink").await;
        });

        // first loop down takes the other with it; wait for both
        if let Some(side) = done_rx.recv().await {
            tracing::debug!("{} loop finished", side);
        }
        self.cancel.cancel();
        if let Some(side) = done_rx.recv().await {
            tracing::debug!("{} loop finished", side);
        }

        if let Some(saved) = self.saved.take() {
            if let Err(e) = platform::client_teardown(&saved) {
                tracing::warn!("could not restore default route ({}): {}", saved, e);
            }
        }
        self.subnet.remove(self.local_vip);
        tracing::info!("client stopped");
        Ok(())
    }
}
