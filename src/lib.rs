pub mod cache;
pub mod config;
pub mod control;
pub mod forwarder;
pub mod listener;
pub mod persistence;
pub mod server;
pub mod sweeper;

pub use cache::{CacheStore, CachedRecord};
pub use config::{Config, Opt};
pub use dnsparse::{
    write_packet, DnsHeader, DnsPacket, DnsQuestion, DnsRecord, QueryType, RecordData, ResponseCode,
};
pub use forwarder::{ForwardError, Forwarder, Upstream};
pub use listener::{DropReason, Listener, Outcome, Resolver};
pub use server::Server;
pub use sweeper::Sweeper;

/// Largest DNS message carried over plain UDP.
pub const MAX_PACKET_SIZE: usize = 512;
