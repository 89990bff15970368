use std::{
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};
use typed_builder::TypedBuilder;

// A message is a header followed by four sections, any of which may be empty:
//
//     Header | Question | Answer | Authority | Additional
//
// The section lengths live in the header counts. When writing, the counts are derived from the
// vectors below, so the header count fields only matter for packets that were parsed.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct DnsPacket {
    pub header: DnsHeader,

    #[builder(default = vec![])]
    pub questions: Vec<DnsQuestion>,
    #[builder(default = vec![])]
    pub answers: Vec<DnsRecord>,
    #[builder(default = vec![])]
    pub authorities: Vec<DnsRecord>,
    #[builder(default = vec![])]
    pub resources: Vec<DnsRecord>,
}

//                                  1  1  1  1  1  1
//    0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                      ID                       |
//  |QR|   Opcode  |AA|TC|RD|RA| Z|AD|CD|   RCODE   |
//  |                    QDCOUNT                    |
//  |                    ANCOUNT                    |
//  |                    NSCOUNT                    |
//  |                    ARCOUNT                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct DnsHeader {
    // Replies carry the id of the query they answer; it is the only thing tying the two together
    // over UDP.
    pub id: u16,

    #[builder(default = false)]
    pub response: bool,
    // 0 QUERY, 1 IQUERY, 2 STATUS. Copied from query to response.
    #[builder(default = 0)]
    pub opcode: u8,
    #[builder(default = false)]
    pub authoritative_answer: bool,
    #[builder(default = false)]
    pub truncated_message: bool,
    #[builder(default = false)]
    pub recursion_desired: bool,
    #[builder(default = false)]
    pub recursion_available: bool,
    #[builder(default = false)]
    pub z: bool,
    #[builder(default = false)]
    pub authed_data: bool,
    #[builder(default = false)]
    pub checking_disabled: bool,
    #[builder(default = ResponseCode::NOERROR)]
    pub rescode: ResponseCode, // 4 bits

    #[builder(default = 0)]
    pub questions: u16,
    #[builder(default = 0)]
    pub answers: u16,
    #[builder(default = 0)]
    pub authoritative_entries: u16,
    #[builder(default = 0)]
    pub resource_entries: u16,
}

impl DnsHeader {
    pub fn flags(&self) -> u16 {
        (self.rescode as u16)
            | ((self.checking_disabled as u16) << 4)
            | ((self.authed_data as u16) << 5)
            | ((self.z as u16) << 6)
            | ((self.recursion_available as u16) << 7)
            | ((self.recursion_desired as u16) << 8)
            | ((self.truncated_message as u16) << 9)
            | ((self.authoritative_answer as u16) << 10)
            | (((self.opcode & 0x0F) as u16) << 11)
            | ((self.response as u16) << 15)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    NOERROR = 0,
    // The name server was unable to interpret the query.
    FORMERR = 1,
    SERVFAIL = 2,
    // The name referenced in the query does not exist.
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResponseCode {
    // Codes 6-15 are folded into NOERROR; nothing here needs to tell them apart.
    pub fn from_num(num: u8) -> ResponseCode {
        match num {
            1 => ResponseCode::FORMERR,
            2 => ResponseCode::SERVFAIL,
            3 => ResponseCode::NXDOMAIN,
            4 => ResponseCode::NOTIMP,
            5 => ResponseCode::REFUSED,
            _ => ResponseCode::NOERROR,
        }
    }
}

// Each question entry is a QNAME (label sequence), a 16 bit QTYPE and a 16 bit QCLASS.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct DnsQuestion {
    // Owner name without the trailing dot; the root is the empty string.
    #[builder(setter(into))]
    pub name: String,
    pub qtype: QueryType,
    // Echoed back verbatim in replies, so it is kept even though it is almost always IN.
    #[builder(default = CLASS_IN)]
    pub qclass: u16,
}

pub const CLASS_IN: u16 = 1;

#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryType {
    UNKNOWN(u16),
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    AAAA,
}

impl QueryType {
    pub fn to_num(self) -> u16 {
        match self {
            QueryType::UNKNOWN(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::SOA => 6,
            QueryType::PTR => 12,
            QueryType::MX => 15,
            QueryType::AAAA => 28,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            12 => QueryType::PTR,
            15 => QueryType::MX,
            28 => QueryType::AAAA,
            _ => QueryType::UNKNOWN(num),
        }
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(QueryType::A),
            "NS" => Ok(QueryType::NS),
            "CNAME" => Ok(QueryType::CNAME),
            "SOA" => Ok(QueryType::SOA),
            "PTR" => Ok(QueryType::PTR),
            "MX" => Ok(QueryType::MX),
            "AAAA" => Ok(QueryType::AAAA),
            other => other
                .parse::<u16>()
                .map(QueryType::from_num)
                .map_err(|_| format!("Unknown query type: {}", s)),
        }
    }
}

// The answer, authority, and additional sections all share the same format: a variable number of
// resource records, where the number of records is specified in the corresponding count field in
// the header.  Each resource record has the following format:
//
//     NAME | TYPE (16) | CLASS (16) | TTL (32) | RDLENGTH (16) | RDATA
//
// | ID | Name  | RDATA                                                   |
// |----+-------+---------------------------------------------------------|
// | 1  | A     | Four bytes for IPv4 adress                              |
// | 2  | NS    | Label Sequence                                          |
// | 5  | CNAME | Label Sequence                                          |
// | 6  | SOA   | Two Label Sequences + five 32 bit counters              |
// | 12 | PTR   | Label Sequence                                          |
// | 15 | MX    | 2-bytes for priority + Label Sequence                   |
// | 28 | AAAA  | Sixteen bytes for IPv6 adress                           |
//
// Anything else is carried as opaque bytes. Only the types above may use name compression inside
// RDATA (RFC 3597 §4), so opaque bytes are always safe to copy between packets.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct DnsRecord {
    #[builder(setter(into))]
    pub domain: String,
    #[builder(default = CLASS_IN)]
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData,
}

impl DnsRecord {
    pub fn qtype(&self) -> QueryType {
        self.data.qtype()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordData {
    A {
        addr: Ipv4Addr,
    },
    NS {
        host: String,
    },
    CNAME {
        host: String,
    },
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    PTR {
        host: String,
    },
    MX {
        priority: u16,
        host: String,
    },
    AAAA {
        addr: Ipv6Addr,
    },
    UNKNOWN {
        qtype: u16,
        data: Vec<u8>,
    },
}

impl RecordData {
    pub fn qtype(&self) -> QueryType {
        match self {
            RecordData::A { .. } => QueryType::A,
            RecordData::NS { .. } => QueryType::NS,
            RecordData::CNAME { .. } => QueryType::CNAME,
            RecordData::SOA { .. } => QueryType::SOA,
            RecordData::PTR { .. } => QueryType::PTR,
            RecordData::MX { .. } => QueryType::MX,
            RecordData::AAAA { .. } => QueryType::AAAA,
            RecordData::UNKNOWN { qtype, .. } => QueryType::UNKNOWN(*qtype),
        }
    }
}

impl DnsPacket {
    pub fn first_question(&self) -> Option<&DnsQuestion> {
        self.questions.get(0)
    }

    pub fn qtype(&self) -> Option<QueryType> {
        self.first_question().map(|q| q.qtype)
    }

    pub fn qname(&self) -> Option<&str> {
        self.first_question().map(|q| q.name.as_str())
    }

    pub fn first_a(&self) -> Option<Ipv4Addr> {
        self.answers.iter().find_map(|r| match r.data {
            RecordData::A { addr } => Some(addr),
            _ => None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_type_numbers_round_trip() {
        for num in [1, 2, 5, 6, 12, 15, 28, 16, 33, 255].iter() {
            assert_eq!(QueryType::from_num(*num).to_num(), *num);
        }
        assert_eq!(QueryType::from_num(16), QueryType::UNKNOWN(16));
    }

    #[test]
    fn query_type_parses_mnemonics_and_numbers() {
        assert_eq!("aaaa".parse::<QueryType>(), Ok(QueryType::AAAA));
        assert_eq!("PTR".parse::<QueryType>(), Ok(QueryType::PTR));
        assert_eq!("16".parse::<QueryType>(), Ok(QueryType::UNKNOWN(16)));
        assert!("BOGUS".parse::<QueryType>().is_err());
    }

    #[test]
    fn first_a_skips_other_records() {
        let header = DnsHeader::builder().id(10).response(true).build();
        let answers = vec![
            DnsRecord::builder()
                .domain("www.yahoo.com")
                .ttl(19)
                .data(RecordData::CNAME {
                    host: "new-fp-shed.wg1.b.yahoo.com".to_string(),
                })
                .build(),
            DnsRecord::builder()
                .domain("new-fp-shed.wg1.b.yahoo.com")
                .ttl(20)
                .data(RecordData::A {
                    addr: Ipv4Addr::new(202, 165, 107, 50),
                })
                .build(),
        ];

        let pack = DnsPacket::builder().header(header).answers(answers).build();

        assert_eq!(Some(Ipv4Addr::new(202, 165, 107, 50)), pack.first_a());
        assert_eq!(QueryType::CNAME, pack.answers[0].qtype());
    }
}
