//! Decoded packet representation and frame decoding.

pub mod packet;
pub mod parser;

pub use packet::{AppLayer, DnsQueryInfo, HttpRequestInfo, IpProtocol, Packet, TcpFlags};
pub use parser::decode_frame;
