mod parser;
mod types;
mod writer;

pub use types::{
    DnsHeader, DnsPacket, DnsQuestion, DnsRecord, QueryType, RecordData, ResponseCode, CLASS_IN,
};

pub use writer::write as write_packet;
