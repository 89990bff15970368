use std::{
    convert::TryFrom,
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::types::{DnsHeader, DnsPacket, DnsQuestion, DnsRecord, QueryType, RecordData, ResponseCode};
use log::trace;
use nom::{
    bytes::complete::take as take_bytes,
    error::{ErrorKind, ParseError},
    multi::count,
    number::complete::{be_u16, be_u32, be_u8},
    IResult,
};

const POINTER_FLAG: u8 = 0xc0;
const NULL_BYTE: u8 = 0x00;
// Longest legal chain of compression pointers is bounded by the packet size; anything past this is
// a loop.
const MAX_JUMPS: usize = 64;

fn fail<'a, E: ParseError<&'a [u8]>>(input: &'a [u8], kind: ErrorKind) -> nom::Err<E> {
    nom::Err::Failure(E::from_error_kind(input, kind))
}

fn ipv4<'a, E>() -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Ipv4Addr, E>
where
    E: ParseError<&'a [u8]>,
{
    |rest| {
        let (rest, octets) = take_bytes(4usize)(rest)?;
        let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);

        Ok((rest, ip))
    }
}

#[allow(clippy::many_single_char_names)]
fn ipv6<'a, E>() -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Ipv6Addr, E>
where
    E: ParseError<&'a [u8]>,
{
    |rest| {
        let (rest, a) = be_u16(rest)?;
        let (rest, b) = be_u16(rest)?;
        let (rest, c) = be_u16(rest)?;
        let (rest, d) = be_u16(rest)?;
        let (rest, e) = be_u16(rest)?;
        let (rest, f) = be_u16(rest)?;
        let (rest, g) = be_u16(rest)?;
        let (rest, h) = be_u16(rest)?;

        let ip = Ipv6Addr::new(a, b, c, d, e, f, g, h);

        Ok((rest, ip))
    }
}

// Labels are arbitrary bytes. Dots and backslashes inside a label are escaped with a backslash,
// anything outside printable ASCII becomes `\DDD`, so the text maps back to the same bytes.
fn escape_label(label: &[u8]) -> String {
    let mut text = String::with_capacity(label.len());
    for &b in label {
        match b {
            b'.' | b'\\' => {
                text.push('\\');
                text.push(b as char);
            }
            0x21..=0x7e => text.push(b as char),
            _ => text.push_str(&format!("\\{:03}", b)),
        }
    }
    text
}

fn domain_fragment<'a, E>() -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], String, E>
where
    E: ParseError<&'a [u8]>,
{
    |input| {
        let (rest, size) = be_u8(input)?;
        let (rest, label) = take_bytes(size as usize)(rest)?;

        Ok((rest, escape_label(label)))
    }
}

// A name is a run of length-prefixed labels ending either in a null byte or in a two byte pointer
// (top two bits set, remaining 14 bits an offset into `original`) to the rest of the name. The
// returned remainder is always the input just after the first terminator, wherever the pointers
// led.
fn domain_name<'a, E>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], String, E>
where
    E: ParseError<&'a [u8]>,
{
    move |input| {
        let mut fragments = Vec::new();
        let mut cursor = input;
        let mut resume_at = None;
        let mut jumps = 0;

        loop {
            let (after_len, len) = be_u8(cursor)?;

            if len & POINTER_FLAG == POINTER_FLAG {
                let (after_pointer, low) = be_u8(after_len)?;
                let offset = (((len & !POINTER_FLAG) as usize) << 8) | low as usize;
                trace!("jumping to {}", offset);

                jumps += 1;
                if jumps > MAX_JUMPS {
                    return Err(fail(cursor, ErrorKind::TooLarge));
                }
                if resume_at.is_none() {
                    resume_at = Some(after_pointer);
                }
                cursor = original
                    .get(offset..)
                    .ok_or_else(|| fail::<E>(cursor, ErrorKind::Eof))?;
            } else if len & POINTER_FLAG != 0 {
                // 0x40 and 0x80 label types are reserved.
                return Err(fail(cursor, ErrorKind::Tag));
            } else if len == NULL_BYTE {
                let domain = fragments.join(".");
                trace!("domain: {}", domain);

                return Ok((resume_at.unwrap_or(after_len), domain));
            } else {
                let (rest, fragment) = domain_fragment()(cursor)?;
                fragments.push(fragment);
                cursor = rest;
            }
        }
    }
}

fn header<'a, E>() -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], DnsHeader, E>
where
    E: ParseError<&'a [u8]>,
{
    |input| {
        // network order is big endian
        let (rest, id) = be_u16(input)?;

        let (rest, a) = be_u8(rest)?;
        let (rest, b) = be_u8(rest)?;

        let recursion_desired = (a & (1 << 0)) > 0;
        let truncated_message = (a & (1 << 1)) > 0;
        let authoritative_answer = (a & (1 << 2)) > 0;
        let opcode = (a >> 3) & 0x0F;
        let response = (a & (1 << 7)) > 0;
        let rescode = ResponseCode::from_num(b & 0x0F);
        let checking_disabled = (b & (1 << 4)) > 0;
        let authed_data = (b & (1 << 5)) > 0;
        let z = (b & (1 << 6)) > 0;
        let recursion_available = (b & (1 << 7)) > 0;

        let (rest, questions) = be_u16(rest)?;
        let (rest, answers) = be_u16(rest)?;
        let (rest, authoritative_entries) = be_u16(rest)?;
        let (rest, resource_entries) = be_u16(rest)?;

        let dns_header = DnsHeader {
            id,

            response,
            opcode,
            authoritative_answer,
            truncated_message,
            recursion_desired,

            recursion_available,
            z,
            authed_data,
            checking_disabled,
            rescode,

            questions,
            answers,
            authoritative_entries,
            resource_entries,
        };

        Ok((rest, dns_header))
    }
}

fn question<'a, E>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], DnsQuestion, E>
where
    E: ParseError<&'a [u8]>,
{
    move |input| {
        let (rest, name) = domain_name(original)(input)?;
        let (rest, qtype) = be_u16(rest)?;
        let (rest, qclass) = be_u16(rest)?;

        let question = DnsQuestion {
            name,
            qtype: QueryType::from_num(qtype),
            qclass,
        };

        Ok((rest, question))
    }
}

// Names inside RDATA may point anywhere in `original`. Passing the rdata itself as `original`
// parses self-contained rdata, where pointers can only resolve inside the rdata.
fn record_data<'a, E>(
    original: &'a [u8],
    qnum: u16,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], RecordData, E>
where
    E: ParseError<&'a [u8]>,
{
    move |record_bytes| {
        let data = match QueryType::from_num(qnum) {
            QueryType::UNKNOWN(_) => RecordData::UNKNOWN {
                qtype: qnum,
                data: record_bytes.to_vec(),
            },
            QueryType::A => {
                let (_rest, addr) = ipv4()(record_bytes)?;
                RecordData::A { addr }
            }
            QueryType::NS => {
                let (_rest, host) = domain_name(original)(record_bytes)?;
                RecordData::NS { host }
            }
            QueryType::CNAME => {
                let (_rest, host) = domain_name(original)(record_bytes)?;
                RecordData::CNAME { host }
            }
            QueryType::SOA => {
                let (rest, mname) = domain_name(original)(record_bytes)?;
                let (rest, rname) = domain_name(original)(rest)?;
                let (rest, serial) = be_u32(rest)?;
                let (rest, refresh) = be_u32(rest)?;
                let (rest, retry) = be_u32(rest)?;
                let (rest, expire) = be_u32(rest)?;
                let (_rest, minimum) = be_u32(rest)?;
                RecordData::SOA {
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                }
            }
            QueryType::PTR => {
                let (_rest, host) = domain_name(original)(record_bytes)?;
                RecordData::PTR { host }
            }
            QueryType::MX => {
                let (rest, priority) = be_u16(record_bytes)?;
                let (_rest, host) = domain_name(original)(rest)?;
                RecordData::MX { priority, host }
            }
            QueryType::AAAA => {
                let (_rest, addr) = ipv6()(record_bytes)?;
                RecordData::AAAA { addr }
            }
        };

        Ok((&record_bytes[record_bytes.len()..], data))
    }
}

fn answer<'a, E>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], DnsRecord, E>
where
    E: ParseError<&'a [u8]>,
{
    move |input| {
        let (rest, domain) = domain_name(original)(input)?;
        let (rest, qnum) = be_u16(rest)?;
        let (rest, class) = be_u16(rest)?;
        let (rest, ttl) = be_u32(rest)?;
        let (rest, data_len) = be_u16(rest)?;
        let (rest, record_bytes) = take_bytes(data_len as usize)(rest)?;

        let (_, data) = record_data(original, qnum)(record_bytes)?;

        let record = DnsRecord {
            domain,
            class,
            ttl,
            data,
        };

        Ok((rest, record))
    }
}

fn packet<'a>(input: &'a [u8], original: &'a [u8]) -> IResult<&'a [u8], DnsPacket> {
    let (rest, header) = header()(input)?;
    let (rest, questions) = count(question(original), header.questions as usize)(rest)?;
    let (rest, answers) = count(answer(original), header.answers as usize)(rest)?;
    let (rest, authorities) = count(answer(original), header.authoritative_entries as usize)(rest)?;
    let (rest, resources) = count(answer(original), header.resource_entries as usize)(rest)?;

    let dns_packet = DnsPacket {
        header,
        questions,
        answers,
        authorities,
        resources,
    };

    Ok((rest, dns_packet))
}

impl RecordData {
    /// Decodes self-contained RDATA as produced by [`RecordData::to_rdata`].
    pub fn from_rdata(qtype: u16, rdata: &[u8]) -> Result<RecordData, String> {
        let parsed: IResult<&[u8], RecordData> = record_data(rdata, qtype)(rdata);
        match parsed {
            Ok((_, data)) => Ok(data),
            Err(e) => Err(format!("Parsing Error: {:?}", e)),
        }
    }
}

impl<'a> TryFrom<&'a [u8]> for DnsPacket {
    type Error = String;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        match packet(value, value) {
            Ok(([], cl)) => Ok(cl),
            Ok((s, _)) => Err(format!(
                "Parsing Error: Unable to parse the whole dns packet\nRemaining Tokens: {:?}",
                s
            )),
            Err(e) => Err(format!("Parsing Error: {:?}", e)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(input: &[u8]) -> IResult<&[u8], DnsHeader> {
        super::header()(input)
    }

    fn question(input: &[u8]) -> IResult<&[u8], DnsQuestion> {
        super::question(input)(input)
    }

    fn answer<'a>(input: &'a [u8], original: &'a [u8]) -> IResult<&'a [u8], DnsRecord> {
        super::answer(original)(input)
    }

    fn fragment(input: &[u8]) -> IResult<&[u8], String> {
        super::domain_fragment()(input)
    }

    fn domain(input: &[u8]) -> IResult<&[u8], String> {
        super::domain_name(input)(input)
    }

    #[rustfmt::skip]
    fn google_query() -> [u8; 28] {
        [
            0xa8, 0x4f, // identifier
            0x01, 0x20, // flags
            0x00, 0x01, // question count
            0x00, 0x00, // answer count
            0x00, 0x00, // authority count
            0x00, 0x00, // additional count
            0x06, 0x67, 0x6f, 0x6f, 0x67, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, // google.com
            0x00, 0x01, // query type
            0x00, 0x01, // query class
        ]
    }

    #[rustfmt::skip]
    fn google_answer() -> [u8; 44] {
        [
            0xa8, 0x4f, // identifier
            0x01, 0x20, // flags
            0x00, 0x01, // question count
            0x00, 0x01, // answer count
            0x00, 0x00, // authority count
            0x00, 0x00, // additional count
            0x06, 0x67, 0x6f, 0x6f, 0x67, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, // google.com
            0x00, 0x01, // query type
            0x00, 0x01, // query class
            0xc0, 0x0c, // name (Jump point)
            0x00, 0x01, // query type
            0x00, 0x01, // query class
            0x00, 0x00, 0x01, 0x25, // ttl
            0x00, 0x04, // len
            0xd8, 0x3a, 0xd3, 0x8e, // ip
        ]
    }

    fn google_header(answers: u16) -> DnsHeader {
        DnsHeader::builder()
            .id(43087)
            .recursion_desired(true)
            .authed_data(true)
            .questions(1)
            .answers(answers)
            .build()
    }

    fn google_question() -> DnsQuestion {
        DnsQuestion::builder()
            .name("google.com")
            .qtype(QueryType::A)
            .build()
    }

    fn google_record() -> DnsRecord {
        DnsRecord::builder()
            .domain("google.com")
            .ttl(293)
            .data(RecordData::A {
                addr: Ipv4Addr::new(216, 58, 211, 142),
            })
            .build()
    }

    #[test]
    fn dns_header_parsing_works() {
        let (_, result) = header(&google_query()[..12]).unwrap();

        assert_eq!(result, google_header(0));
    }

    #[test]
    fn single_fragment_parsing_works() {
        let (_, result) = fragment(&google_query()[12..]).unwrap();

        assert_eq!(result, "google");
    }

    #[test]
    fn domain_name_parsing_works() {
        let query = google_query();
        let (rest, result) = domain(&query[12..]).unwrap();

        assert_eq!(result, "google.com");
        assert_eq!(rest, &[0x00, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn root_domain_is_empty() {
        let (_, result) = domain(&[0x00]).unwrap();

        assert_eq!(result, "");
    }

    #[test]
    fn dns_question_parsing_works() {
        let (_, result) = question(&google_query()[12..]).unwrap();

        assert_eq!(result, google_question());
    }

    #[test]
    fn dns_answer_parsing_works() {
        let packet = google_answer();
        let (rest, result) = answer(&packet[28..], &packet).unwrap();

        assert_eq!(result, google_record());
        assert!(rest.is_empty());
    }

    #[test]
    fn dns_packet_parsing_works_on_answer() {
        let dns_packet = DnsPacket::builder()
            .header(google_header(1))
            .questions(vec![google_question()])
            .answers(vec![google_record()])
            .build();

        let result = DnsPacket::try_from(&google_answer()[..]).unwrap();

        assert_eq!(result, dns_packet);
    }

    #[test]
    fn dns_packet_parsing_works_on_question() {
        let dns_packet = DnsPacket::builder()
            .header(google_header(0))
            .questions(vec![google_question()])
            .build();

        let result = DnsPacket::try_from(&google_query()[..]).unwrap();

        assert_eq!(result, dns_packet);
    }

    #[rustfmt::skip]
    fn yahoo_packet() -> [u8; 95] {
         [
            0x03, 0x32, 0x81, 0x80, 0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, // header
            0x03, 0x77, 0x77, 0x77, 0x05, 0x79, 0x61, 0x68, 0x6f, 0x6f, 0x03, 0x63, 0x6f, 0x6d, 0x00, // www.yahoo.com
            0x00, 0x01, 0x00, 0x01, // query type and query class
            // answers 1
            0xc0, 0x0c, //jump_location
            0x00, 0x05, 0x00, 0x01, // query type and query class
            0x00, 0x00, 0x00, 0x13, // ttl
            0x00, 0x14, // len
            // canonical name, jumps to yahoo.com just after www
            0x0b, 0x6e, 0x65, 0x77, 0x2d, 0x66, 0x70, 0x2d, 0x73, 0x68, 0x65, 0x64, 0x03, 0x77, 0x67, 0x31, 0x01, 0x62, 0xc0, 0x10,
            // answer 2
            0xc0, 0x2b, // jump location
            0x00, 0x01, 0x00, 0x01, // query type and query class
            0x00, 0x00, 0x00, 0x14, // ttl
            0x00, 0x04, // len
            0xca, 0xa5, 0x6b, 0x32, // ip
            // answer 3
            0xc0, 0x2b, // jump location
            0x00, 0x01, 0x00, 0x01, // query type and query class
            0x00, 0x00, 0x00, 0x14, // ttl
            0x00, 0x04, // len
            0xca, 0xa5, 0x6b, 0x31, // ip
        ]
    }

    #[test]
    fn dns_answer_complicated_parse() {
        let header = DnsHeader::builder()
            .id(818)
            .response(true)
            .recursion_desired(true)
            .recursion_available(true)
            .questions(1)
            .answers(3)
            .build();
        let question = DnsQuestion::builder()
            .name("www.yahoo.com")
            .qtype(QueryType::A)
            .build();
        let target = "new-fp-shed.wg1.b.yahoo.com";
        let records = vec![
            DnsRecord::builder()
                .domain("www.yahoo.com")
                .ttl(19)
                .data(RecordData::CNAME {
                    host: target.to_string(),
                })
                .build(),
            DnsRecord::builder()
                .domain(target)
                .ttl(20)
                .data(RecordData::A {
                    addr: Ipv4Addr::new(202, 165, 107, 50),
                })
                .build(),
            DnsRecord::builder()
                .domain(target)
                .ttl(20)
                .data(RecordData::A {
                    addr: Ipv4Addr::new(202, 165, 107, 49),
                })
                .build(),
        ];

        let pack = DnsPacket::builder()
            .header(header)
            .questions(vec![question])
            .answers(records)
            .build();

        let result = DnsPacket::try_from(&yahoo_packet()[..]).unwrap();

        assert_eq!(pack, result);
    }

    #[rustfmt::skip]
    fn ptr_answer() -> Vec<u8> {
        vec![
            0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, // header
            0x01, 0x31, 0x01, 0x30, 0x01, 0x30, 0x03, 0x31, 0x32, 0x37, // 1.0.0.127
            0x07, 0x69, 0x6e, 0x2d, 0x61, 0x64, 0x64, 0x72, 0x04, 0x61, 0x72, 0x70, 0x61, 0x00, // in-addr.arpa
            0x00, 0x0c, 0x00, 0x01, // query type and query class
            0xc0, 0x0c, // name
            0x00, 0x0c, 0x00, 0x01, // query type and query class
            0x00, 0x00, 0x0e, 0x10, // ttl
            0x00, 0x0b, // len
            0x09, 0x6c, 0x6f, 0x63, 0x61, 0x6c, 0x68, 0x6f, 0x73, 0x74, 0x00, // localhost
        ]
    }

    #[test]
    fn ptr_record_parsing_works() {
        let result = DnsPacket::try_from(&ptr_answer()[..]).unwrap();

        assert_eq!(result.qname(), Some("1.0.0.127.in-addr.arpa"));
        assert_eq!(result.qtype(), Some(QueryType::PTR));
        assert_eq!(
            result.answers[0].data,
            RecordData::PTR {
                host: "localhost".to_string()
            }
        );
        assert_eq!(result.answers[0].ttl, 3600);
    }

    #[test]
    fn unknown_records_keep_their_bytes() {
        #[rustfmt::skip]
        let txt = [
            0x00, // root
            0x00, 0x10, 0x00, 0x01, // TXT, IN
            0x00, 0x00, 0x00, 0x3c, // ttl
            0x00, 0x03, // len
            0x02, 0x68, 0x69, // "hi"
        ];

        let (_, result) = answer(&txt, &txt).unwrap();

        assert_eq!(
            result.data,
            RecordData::UNKNOWN {
                qtype: 16,
                data: vec![0x02, 0x68, 0x69]
            }
        );
    }

    #[test]
    fn truncated_packet_is_an_error() {
        assert!(DnsPacket::try_from(&google_answer()[..40]).is_err());
        assert!(DnsPacket::try_from(&[0xa8][..]).is_err());
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let mut bytes = google_query().to_vec();
        bytes.push(0xff);

        assert!(DnsPacket::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn pointer_loop_is_an_error() {
        let mut bytes = google_query()[..12].to_vec();
        // question name pointing at itself
        bytes.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01]);

        assert!(DnsPacket::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn pointer_past_the_end_is_an_error() {
        let mut bytes = google_query()[..12].to_vec();
        bytes.extend_from_slice(&[0xc1, 0xff, 0x00, 0x01, 0x00, 0x01]);

        assert!(DnsPacket::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn reserved_label_type_is_an_error() {
        let mut bytes = google_query()[..12].to_vec();
        bytes.extend_from_slice(&[0x41, 0x61, 0x00, 0x00, 0x01, 0x00, 0x01]);

        assert!(DnsPacket::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn labels_keep_their_bytes() {
        let (_, dotted) = domain(&[3, b'a', b'.', b'b', 3, b'c', b'o', b'm', 0]).unwrap();
        let (_, split) = domain(&[1, b'a', 1, b'b', 3, b'c', b'o', b'm', 0]).unwrap();
        let (_, binary) = domain(&[2, 0xff, b' ', 1, b'\\', 0]).unwrap();

        assert_eq!(dotted, r"a\.b.com");
        assert_eq!(split, "a.b.com");
        assert_eq!(binary, r"\255\032.\\");
    }

    #[test]
    fn odd_labels_are_written_back_unchanged() {
        let mut bytes = google_query()[..12].to_vec();
        bytes.extend_from_slice(&[3, b'a', b'.', b'b', 2, 0xc3, 0x28, 3, b'c', b'o', b'm', 0]);
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);

        let parsed = DnsPacket::try_from(&bytes[..]).unwrap();
        let mut written = vec![0u8; 512];
        let size = crate::writer::write(&mut written, &parsed).unwrap();

        assert_eq!(parsed.questions[0].name, r"a\.b.\195(.com");
        assert_eq!(&written[..size], &bytes[..]);
    }

    #[test]
    fn self_contained_rdata_parses() {
        let rdata = [
            0x00, 0x0a, 0x04, 0x6d, 0x61, 0x69, 0x6c, 0x07, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c,
            0x65, 0x00,
        ];

        let result = RecordData::from_rdata(15, &rdata).unwrap();

        assert_eq!(
            result,
            RecordData::MX {
                priority: 10,
                host: "mail.example".to_string()
            }
        );
        assert!(RecordData::from_rdata(1, &[127, 0]).is_err());
    }
}
