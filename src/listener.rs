use std::{
    convert::TryFrom,
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use dnsparse::{write_packet, DnsHeader, DnsPacket, DnsRecord, QueryType, RecordData};
use log::{debug, error, info, warn};

use crate::{
    cache::{normalize_name, CacheStore, CachedRecord},
    forwarder::{is_timeout, ForwardError, Upstream},
    MAX_PACKET_SIZE,
};

/// PTR query stub resolvers send for the loopback address. Never answered.
pub const REVERSE_LOCALHOST: &str = "1.0.0.127.in-addr.arpa.";

// How often a blocked receive wakes up to look at the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Vec<u8>),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    NoQuestion,
    ReverseLocalhost,
    UpstreamTimeout,
    UpstreamError,
    BadUpstreamResponse,
}

pub fn to_cached(record: &DnsRecord) -> anyhow::Result<CachedRecord> {
    Ok(CachedRecord {
        name: record.domain.clone(),
        rtype: record.qtype().to_num(),
        class: record.class,
        ttl: record.ttl,
        data: record.data.to_rdata()?,
    })
}

pub fn from_cached(record: &CachedRecord) -> anyhow::Result<DnsRecord> {
    let data = RecordData::from_rdata(record.rtype, &record.data).map_err(anyhow::Error::msg)?;

    Ok(DnsRecord {
        domain: record.name.clone(),
        class: record.class,
        ttl: record.ttl,
        data,
    })
}

/// Answers a single query packet from the cache, or from the upstream on a miss.
pub struct Resolver<U> {
    cache: Arc<CacheStore>,
    upstream: U,
}

impl<U: Upstream> Resolver<U> {
    pub fn new(cache: Arc<CacheStore>, upstream: U) -> Self {
        Self { cache, upstream }
    }

    pub fn process(&self, data: &[u8]) -> Outcome {
        let query = match DnsPacket::try_from(data) {
            Ok(query) => query,
            Err(e) => {
                warn!("Dropping malformed query: {}", e);
                return Outcome::Dropped(DropReason::Malformed);
            }
        };
        debug!("Request: {:?}", query);

        let (qname, qtype) = match query.first_question() {
            Some(question) => (normalize_name(&question.name), question.qtype),
            None => {
                warn!("Dropping query {} without a question", query.header.id);
                return Outcome::Dropped(DropReason::NoQuestion);
            }
        };

        if qtype == QueryType::PTR && qname == REVERSE_LOCALHOST {
            debug!("Ignoring reverse lookup of localhost");
            return Outcome::Dropped(DropReason::ReverseLocalhost);
        }

        // A cached entry that can't be turned into a reply is treated as a miss, and the upstream
        // answer replaces it.
        match self.cache.get(&qname, qtype.to_num()) {
            Some(records) => match reply_from_cache(&query, &records) {
                Ok(reply) => {
                    info!("Cache hit: {} ({:?})", qname, qtype);
                    return Outcome::Reply(reply);
                }
                Err(e) => warn!("Couldn't answer {} ({:?}) from cache: {:#}", qname, qtype, e),
            },
            None => info!("Cache miss: {} ({:?})", qname, qtype),
        }

        let response_bytes = match self.upstream.forward(data) {
            Ok(bytes) => bytes,
            Err(ForwardError::Timeout) => {
                warn!("Timeout waiting for upstream on {} ({:?})", qname, qtype);
                return Outcome::Dropped(DropReason::UpstreamTimeout);
            }
            Err(e) => {
                error!("Forwarding {} ({:?}) failed: {}", qname, qtype, e);
                return Outcome::Dropped(DropReason::UpstreamError);
            }
        };

        let response = match DnsPacket::try_from(&response_bytes[..]) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping unparseable upstream response: {}", e);
                return Outcome::Dropped(DropReason::BadUpstreamResponse);
            }
        };
        debug!("Response: {:?}", response);

        self.remember(&qname, qtype, &response);

        Outcome::Reply(response_bytes)
    }

    // All answers share the ttl of the first one. Mixed-ttl answer sets live as long as that
    // first record says.
    fn remember(&self, qname: &str, qtype: QueryType, response: &DnsPacket) {
        if response.header.truncated_message {
            debug!("Not caching truncated response for {} ({:?})", qname, qtype);
            return;
        }

        let ttl = match response.answers.first() {
            Some(first) => first.ttl,
            None => return,
        };

        match response.answers.iter().map(to_cached).collect::<anyhow::Result<Vec<_>>>() {
            Ok(records) => self.cache.put(qname, qtype.to_num(), records, ttl),
            Err(e) => warn!("Not caching {} ({:?}): {:#}", qname, qtype, e),
        }
    }
}

fn reply_from_cache(query: &DnsPacket, records: &[CachedRecord]) -> anyhow::Result<Vec<u8>> {
    let answers = records
        .iter()
        .map(from_cached)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let header = DnsHeader::builder()
        .id(query.header.id)
        .response(true)
        .opcode(query.header.opcode)
        .recursion_desired(query.header.recursion_desired)
        .recursion_available(true)
        .build();

    let reply = DnsPacket::builder()
        .header(header)
        .questions(query.questions.clone())
        .answers(answers)
        .build();
    debug!("Reply: {:?}", reply);

    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    let size = write_packet(&mut buffer, &reply)?;
    buffer.truncate(size);

    Ok(buffer)
}

/// Receives queries on one UDP socket and answers them one at a time.
pub struct Listener<U> {
    socket: UdpSocket,
    resolver: Resolver<U>,
}

impl<U: Upstream> Listener<U> {
    pub fn bind(addr: SocketAddr, resolver: Resolver<U>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(SHUTDOWN_POLL))?;

        Ok(Self { socket, resolver })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until `shutdown` is raised. Per-packet failures are logged and skipped.
    pub fn run(&self, shutdown: &AtomicBool) {
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        while !shutdown.load(Ordering::SeqCst) {
            let (size, src) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    continue;
                }
            };

            match self.resolver.process(&buffer[..size]) {
                Outcome::Reply(reply) => {
                    if let Err(e) = self.socket.send_to(&reply, src) {
                        warn!("Couldn't reply to {}: {}", src, e);
                    }
                }
                Outcome::Dropped(reason) => debug!("Dropped query from {}: {:?}", src, reason),
            }
        }

        info!("Listener on {:?} stopped", self.local_addr().ok());
    }
}
