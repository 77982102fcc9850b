//! Tunnel configuration
//!
//! A single URL carries everything both endpoints need:
//! `tcp://password@host:port?cipher=NAME`. The scheme selects the transport
//! (only TCP is supported), the userinfo field is the shared passphrase, and
//! the `cipher` query parameter names the cipher suite.

use std::fmt;
use std::fmt::Display;

pub const DEFAULT_CIPHER: &str = "chacha20-poly1305";

/// Configuration URL failures, all fatal at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingScheme,
    UnsupportedScheme(String),
    MissingPassword,
    BadAddress(String),
    BadQuery(String),
}

impl std::error::Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::MissingScheme => "url has no scheme".fmt(fmt),
            ConfigError::UnsupportedScheme(s) => write!(fmt, "unsupported scheme: {}", s),
            ConfigError::MissingPassword => "url has no password".fmt(fmt),
            ConfigError::BadAddress(a) => write!(fmt, "bad address: {}", a),
            ConfigError::BadQuery(q) => write!(fmt, "bad query parameter: {}", q),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bind address (server) or connect address (client), `host:port`
    pub address: String,
    /// Shared passphrase the cipher key is derived from
    pub passwd: String,
    /// Cipher suite name, defaults to chacha20-poly1305
    pub cipher: String,
}

impl Config {
    pub fn from_url(url: &str) -> Result<Config, ConfigError> {
        let (scheme, rest) = url.split_once("://").ok_or(ConfigError::MissingScheme)?;
        if scheme != "tcp" {
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }

        let (passwd, rest) = rest.split_once('@').ok_or(ConfigError::MissingPassword)?;
        if passwd.is_empty() {
            return Err(ConfigError::MissingPassword);
        }

        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::BadAddress(address.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(ConfigError::BadAddress(address.to_string()));
        }

        let mut cipher = DEFAULT_CIPHER.to_string();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some(("cipher", value)) if !value.is_empty() => cipher = value.to_string(),
                    Some(("cipher", _)) => return Err(ConfigError::BadQuery(pair.to_string())),
                    // unrecognized parameters are ignored
                    Some(_) => {}
                    None => return Err(ConfigError::BadQuery(pair.to_string())),
                }
            }
        }

        Ok(Config {
            address: address.to_string(),
            passwd: passwd.to_string(),
            cipher,
        })
    }
}

impl Display for Config {
    // passphrase deliberately omitted
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "tcp://{} cipher={}", self.address, self.cipher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_parses() {
        let cfg = Config::from_url("tcp://hunter2@vpn.example.com:7000?cipher=aes256-gcm").unwrap();
        assert_eq!(cfg.address, "vpn.example.com:7000");
        assert_eq!(cfg.passwd, "hunter2");
        assert_eq!(cfg.cipher, "aes256-gcm");
    }

    #[test]
    fn cipher_defaults_when_absent() {
        let cfg = Config::from_url("tcp://pw@127.0.0.1:7000").unwrap();
        assert_eq!(cfg.cipher, DEFAULT_CIPHER);
    }

    #[test]
    fn rejects_udp_scheme() {
        assert_eq!(
            Config::from_url("udp://pw@h:1?cipher=plain"),
            Err(ConfigError::UnsupportedScheme("udp".to_string()))
        );
    }

    #[test]
    fn rejects_missing_password() {
        assert_eq!(
            Config::from_url("tcp://127.0.0.1:7000"),
            Err(ConfigError::MissingPassword)
        );
        assert_eq!(
            Config::from_url("tcp://@127.0.0.1:7000"),
            Err(ConfigError::MissingPassword)
        );
    }

    #[test]
    fn rejects_bad_port() {
        assert!(matches!(
            Config::from_url("tcp://pw@127.0.0.1:notaport"),
            Err(ConfigError::BadAddress(_))
        ));
        assert!(matches!(
            Config::from_url("tcp://pw@hostonly"),
            Err(ConfigError::BadAddress(_))
        ));
    }

    #[test]
    fn display_hides_password() {
        let cfg = Config::from_url("tcp://secret@10.0.0.1:7000").unwrap();
        assert!(!format!("{}", cfg).contains("secret"));
    }
}
