//! TUN device task
//!
//! The device handle is owned by one task for its whole life: reads are
//! single-consumer and writes are serialized through the outbound channel,
//! which keeps frames whole without a lock around the handle. Frames cross
//! the channels with their 4-byte prefix already attached, so everything
//! outside this module speaks the TUN frame format.

use crate::codec::tun_frame;
use std::net::Ipv4Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tun::AbstractDevice;

const CHANNEL_DEPTH: usize = 1000;
/// One read buffer per device, sized for the largest datagram
const READ_BUF_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mtu: u16,
}

pub struct Device {
    config: DeviceConfig,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
}

impl Device {
    pub fn new(
        config: DeviceConfig,
        inbound_tx: mpsc::Sender<Vec<u8>>,
        outbound_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            inbound_tx,
            outbound_rx,
            cancel,
        }
    }

    pub async fn run(&mut self, ready: oneshot::Sender<String>) -> crate::Result<()> {
        let mut config = tun::Configuration::default();
        config
            .address(self.config.ip)
            .netmask(self.config.mask)
            .destination(self.config.gateway)
            .mtu(self.config.mtu)
            .up();

        #[cfg(target_os = "linux")]
        config.platform_config(|config| {
            config.ensure_root_privileges(true);
        });

        let mut dev = match tun::create_as_async(&config) {
            Ok(dev) => dev,
            Err(e) => {
                return Err(e.into());
            }
        };

        let name = dev.tun_name()?;
        let _ = ready.send(name);

        let mut buf = vec![0; READ_BUF_LEN];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("device task stopping");
                    break;
                }
                amount = dev.read(&mut buf) => {
                    let amount = match amount {
                        Ok(amount) => amount,
                        Err(e) => {
                            if !self.cancel.is_cancelled() {
                                tracing::error!("read device fail: {:?}", e);
                            }
                            break;
                        }
                    };
                    if self.inbound_tx.send(tun_frame::wrap_raw(&buf[..amount])).await.is_err() {
                        break;
                    }
                }
                frame = self.outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let payload = match tun_frame::payload(&frame) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!("dropping runt frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = dev.write(payload).await {
                        if !self.cancel.is_cancelled() {
                            tracing::error!("write device fail: {:?}", e);
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Handle to the device task's channels
pub struct DeviceHandler {
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl DeviceHandler {
    pub fn new() -> Self {
        Self {
            inbound_rx: None,
            outbound_tx: None,
        }
    }

    /// Spawns the device task and waits for the interface to exist
    ///
    /// # Returns
    /// The OS-assigned interface name (e.g. `tun0`, `utun3`)
    pub async fn run(
        &mut self,
        cfg: DeviceConfig,
        cancel: CancellationToken,
    ) -> crate::Result<String> {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        self.inbound_rx = Some(inbound_rx);
        self.outbound_tx = Some(outbound_tx);

        let mut dev = Device::new(cfg, inbound_tx, outbound_rx, cancel);
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Err(e) = dev.run(ready_tx).await {
                tracing::error!("device task fail: {:?}", e);
            }
        });

        match ready_rx.await {
            Ok(name) => Ok(name),
            Err(_) => Err("device did not come up".into()),
        }
    }

    /// Next frame read from the device; `None` once the task is gone
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match self.inbound_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Queues a frame for the device to write
    pub async fn send(&self, frame: Vec<u8>) -> crate::Result<()> {
        let outbound_tx = match self.outbound_tx.as_ref() {
            Some(tx) => tx,
            None => return Err("device not running".into()),
        };
        outbound_tx.send(frame).await.map_err(|e| e.into())
    }

    /// Clonable sender for tasks that write frames concurrently
    pub fn frame_sender(&self) -> crate::Result<mpsc::Sender<Vec<u8>>> {
        self.outbound_tx
            .clone()
            .ok_or_else(|| "device not running".into())
    }
}

impl Default for DeviceHandler {
    fn default() -> Self {
        Self::new()
    }
}
