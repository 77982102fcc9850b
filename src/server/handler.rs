//! Per-connection handler
//!
//! Consumes packets from one client in stream order, assigns the virtual IP
//! on the first packet, and rewrites every source address before forwarding
//! to the TUN. The same task drains the connection's outbound queue, so
//! return packets for this client keep their order and a stalled peer only
//! ever stalls itself.

use crate::codec::packet::IpPacket;
use crate::codec::tun_frame;
use crate::nat::registry::{ConnectionRegistry, RouteEntry};
use crate::nat::subnet::ManagedSubnet;
use crate::network::stream::{PacketReader, PacketWriter};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const OUTBOUND_BUFFER_SIZE: usize = 1000;

/// NAT state fixed by the client's first packet
struct Latch {
    vip: Ipv4Addr,
    origin: Ipv4Addr,
}

pub struct Handler<R, W> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
    peer: SocketAddr,
    subnet: Arc<ManagedSubnet>,
    registry: Arc<ConnectionRegistry>,
    /// Frames bound for the shared TUN device
    tun_tx: mpsc::Sender<Vec<u8>>,
    outbound_tx: mpsc::Sender<IpPacket>,
    outbound_rx: mpsc::Receiver<IpPacket>,
    cancel: CancellationToken,
    latch: Option<Latch>,
}

impl<R, W> Handler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: PacketReader<R>,
        writer: PacketWriter<W>,
        peer: SocketAddr,
        subnet: Arc<ManagedSubnet>,
        registry: Arc<ConnectionRegistry>,
        tun_tx: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Handler<R, W> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        Self {
            reader,
            writer,
            peer,
            subnet,
            registry,
            tun_tx,
            outbound_tx,
            outbound_rx,
            cancel,
            latch: None,
        }
    }

    /// Serves the connection, then releases its NAT state exactly once
    pub async fn run(&mut self) -> crate::Result<()> {
        let result = self.serve().await;

        if let Some(latch) = self.latch.take() {
            self.registry.remove(latch.vip);
            self.subnet.remove(latch.vip);
            tracing::info!("released vip {} for {}", latch.vip, self.peer);
        }
        self.writer.close().await;
        result
    }

    async fn serve(&mut self) -> crate::Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                result = self.reader.read_packet() => {
                    match result {
                        Ok(packet) => self.handle_packet(packet).await?,
                        Err(e) => {
                            if self.cancel.is_cancelled() {
                                return Ok(());
                            }
                            tracing::debug!("read from {} failed: {}", self.peer, e);
                            return Err(e);
                        }
                    }
                }

                packet = self.outbound_rx.recv() => {
                    if let Some(packet) = packet {
                        if let Err(e) = self.writer.write_packet(&packet).await {
                            if self.cancel.is_cancelled() {
                                return Ok(());
                            }
                            tracing::debug!("write to {} failed: {}", self.peer, e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_packet(&mut self, mut packet: IpPacket) -> crate::Result<()> {
        if packet.version() != 4 {
            return Err("only ipv4 is tunneled".into());
        }
        let src = packet.source_v4().ok_or("missing ipv4 source")?;

        let vip = match &self.latch {
            None => {
                let vip = self.subnet.take()?;
                self.registry
                    .insert(vip, RouteEntry::new(src, self.outbound_tx.clone()));
                self.latch = Some(Latch { vip, origin: src });
                tracing::info!("{}: origin {} assigned vip {}", self.peer, src, vip);
                vip
            }
            Some(latch) => {
                // clients do not get to move mid-session
                if src != latch.origin {
                    return Err(
                        format!("source changed: {} -> {}", latch.origin, src).into()
                    );
                }
                latch.vip
            }
        };

        packet.set_source_v4(vip)?;
        self.tun_tx
            .send(tun_frame::encode(&packet))
            .await
            .map_err(|_| "tun device is gone")?;
        Ok(())
    }
}
