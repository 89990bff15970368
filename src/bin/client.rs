use log::debug;
use std::{
    convert::TryFrom,
    net::{SocketAddr, UdpSocket},
    time::Duration,
};
use structopt::StructOpt;

use fwdns::{write_packet, DnsHeader, DnsPacket, DnsQuestion, QueryType, MAX_PACKET_SIZE};

fn mk_query(id: u16, qname: &str, qtype: QueryType) -> DnsPacket {
    let header = DnsHeader::builder()
        .id(id)
        .questions(1)
        .recursion_desired(true)
        .build();

    let question = DnsQuestion::builder().name(qname).qtype(qtype).build();

    DnsPacket::builder()
        .header(header)
        .questions(vec![question])
        .build()
}

#[derive(Debug, StructOpt)]
#[structopt(name = "fwdns-query", about = "Ask a DNS server for the records of a name")]
struct Opt {
    #[structopt(short, long, default_value = "google.com")]
    query: String,

    /// Record type, by mnemonic (A, AAAA, MX, ...) or number
    #[structopt(short = "t", long, default_value = "A")]
    qtype: QueryType,

    #[structopt(short, long, default_value = "127.0.0.1:53")]
    server: SocketAddr,

    /// Seconds to wait for the answer
    #[structopt(long, default_value = "5")]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    debug!("parsing args");

    let opt = Opt::from_args();
    debug!("args {:?}", opt);

    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_read_timeout(Some(Duration::from_secs(opt.timeout)))?;

    let request = mk_query(rand::random(), &opt.query, opt.qtype);
    debug!("Request: {:#?}", request);

    let mut req_buffer = vec![0u8; MAX_PACKET_SIZE];
    let size = write_packet(&mut req_buffer, &request)?;

    socket.send_to(&req_buffer[..size], opt.server)?;

    let mut response_buffer = vec![0u8; MAX_PACKET_SIZE];
    let (size, _src) = socket.recv_from(&mut response_buffer)?;

    let response = DnsPacket::try_from(&response_buffer[..size]).map_err(anyhow::Error::msg)?;

    print_packet(&response);

    Ok(())
}

pub fn print_packet(packet: &DnsPacket) {
    println!("{:#?}", packet.header);

    for q in &packet.questions {
        println!("{:#?}", q);
    }
    for rec in &packet.answers {
        println!("{:#?}", rec);
    }
    for rec in &packet.authorities {
        println!("{:#?}", rec);
    }
    for rec in &packet.resources {
        println!("{:#?}", rec);
    }
}
