pub mod codec;
pub mod config;
pub mod crypto;
pub mod nat;
pub mod network;
pub mod client;
pub mod server;
pub mod platform;
pub mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
