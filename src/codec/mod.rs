pub mod errors;
pub mod packet;
pub mod parser;
pub mod tun_frame;
