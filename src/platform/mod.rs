//! Host network configuration
//!
//! Small shell-outs that install the tunnel into the host's routing setup:
//! the client swaps its default route for the TUN peer and restores the
//! saved gateway on shutdown; the server enables forwarding and masquerades
//! the managed subnet. The routing table is read through `ip route` /
//! `route -n get` rather than scraped from setup-script output.
//!
//! Address, netmask, and MTU of the interface itself are configured by the
//! TUN driver at creation time, so none of that is repeated here.

use std::fmt;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::process::Command;

#[derive(Debug, Clone)]
pub struct PlatformError {
    command: String,
    detail: String,
}

impl PlatformError {
    fn new(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

impl std::error::Error for PlatformError {}

impl Display for PlatformError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "`{}` failed: {}", self.command, self.detail)
    }
}

/// The default route in place before the tunnel took over
///
/// Held in memory only. If the process dies without running teardown the
/// host keeps routing into the dead TUN and needs manual repair.
#[derive(Debug, Clone)]
pub struct SavedGateway {
    gateway: String,
}

impl Display for SavedGateway {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.gateway.fmt(fmt)
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    let rendered = format!("{} {}", program, args.join(" "));
    tracing::debug!("exec {}", rendered);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| PlatformError::new(&rendered, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlatformError::new(&rendered, stderr.trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pulls the gateway address out of `ip route show default` output
#[allow(dead_code)]
fn parse_linux_default(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    while let Some(word) = words.next() {
        if word == "via" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// Pulls the gateway address out of `route -n get default` output
#[allow(dead_code)]
fn parse_darwin_default(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim() == "gateway" {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
pub fn default_gateway() -> Result<String, PlatformError> {
    let output = run("ip", &["route", "show", "default"])?;
    parse_linux_default(&output)
        .ok_or_else(|| PlatformError::new("ip route show default", "no default route"))
}

#[cfg(target_os = "macos")]
pub fn default_gateway() -> Result<String, PlatformError> {
    let output = run("route", &["-n", "get", "default"])?;
    parse_darwin_default(&output)
        .ok_or_else(|| PlatformError::new("route -n get default", "no default route"))
}

/// Saves the current default route and points it at the TUN peer
#[cfg(target_os = "linux")]
pub fn client_setup(device: &str, peer: Ipv4Addr) -> Result<SavedGateway, PlatformError> {
    let gateway = default_gateway()?;
    run(
        "ip",
        &[
            "route",
            "replace",
            "default",
            "via",
            &peer.to_string(),
            "dev",
            device,
        ],
    )?;
    tracing::info!("default route now {} via {}, saved {}", device, peer, gateway);
    Ok(SavedGateway { gateway })
}

#[cfg(target_os = "macos")]
pub fn client_setup(device: &str, peer: Ipv4Addr) -> Result<SavedGateway, PlatformError> {
    let gateway = default_gateway()?;
    run("route", &["delete", "default"])?;
    run("route", &["add", "default", &peer.to_string()])?;
    tracing::info!("default route now {} via {}, saved {}", device, peer, gateway);
    Ok(SavedGateway { gateway })
}

/// Puts the saved default route back
#[cfg(target_os = "linux")]
pub fn client_teardown(saved: &SavedGateway) -> Result<(), PlatformError> {
    run("ip", &["route", "replace", "default", "via", &saved.gateway])?;
    tracing::info!("default route restored to {}", saved);
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn client_teardown(saved: &SavedGateway) -> Result<(), PlatformError> {
    let _ = run("route", &["delete", "default"]);
    run("route", &["add", "default", &saved.gateway])?;
    tracing::info!("default route restored to {}", saved);
    Ok(())
}

/// Enables forwarding and masquerades the managed subnet
#[cfg(target_os = "linux")]
pub fn server_setup(device: &str, cidr: &str) -> Result<(), PlatformError> {
    run("sysctl", &["-w", "net.ipv4.ip_forward=1"])?;
    run(
        "iptables",
        &[
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-s",
            cidr,
            "!",
            "-o",
            device,
            "-j",
            "MASQUERADE",
        ],
    )?;
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn server_setup(_device: &str, _cidr: &str) -> Result<(), PlatformError> {
    Err(PlatformError::new(
        "server setup",
        "server mode is not supported on macos",
    ))
}

#[cfg(target_os = "linux")]
pub fn server_teardown(device: &str, cidr: &str) -> Result<(), PlatformError> {
    run(
        "iptables",
        &[
            "-t",
            "nat",
            "-D",
            "POSTROUTING",
            "-s",
            cidr,
            "!",
            "-o",
            device,
            "-j",
            "MASQUERADE",
        ],
    )?;
    Ok(())
}

#[cfg(target_os = "macos")]
pub fn server_teardown(_device: &str, _cidr: &str) -> Result<(), PlatformError> {
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported {
    use super::*;

    pub fn default_gateway() -> Result<String, PlatformError> {
        Err(PlatformError::new("default_gateway", "unsupported platform"))
    }

    pub fn client_setup(_device: &str, _peer: Ipv4Addr) -> Result<SavedGateway, PlatformError> {
        Err(PlatformError::new("client setup", "unsupported platform"))
    }

    pub fn client_teardown(_saved: &SavedGateway) -> Result<(), PlatformError> {
        Err(PlatformError::new("client teardown", "unsupported platform"))
    }

    pub fn server_setup(_device: &str, _cidr: &str) -> Result<(), PlatformError> {
        Err(PlatformError::new("server setup", "unsupported platform"))
    }

    pub fn server_teardown(_device: &str, _cidr: &str) -> Result<(), PlatformError> {
        Err(PlatformError::new("server teardown", "unsupported platform"))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub use unsupported::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_route_output() {
        let out = "default via 192.168.1.1 dev wlan0 proto dhcp metric 600\n";
        assert_eq!(parse_linux_default(out), Some("192.168.1.1".to_string()));
        assert_eq!(parse_linux_default(""), None);
    }

    #[test]
    fn parses_darwin_route_output() {
        let out = "   route to: default\ndestination: default\n    gateway: 10.0.1.1\n  interface: en0\n";
        assert_eq!(parse_darwin_default(out), Some("10.0.1.1".to_string()));
        assert_eq!(parse_darwin_default("destination: default\n"), None);
    }
}
