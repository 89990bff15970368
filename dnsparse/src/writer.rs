use std::collections::HashMap;

use crate::types::{DnsHeader, DnsPacket, DnsQuestion, DnsRecord, RecordData};

const MAX_LABEL_LEN: usize = 0x3f;
const POINTER_FLAG: u16 = 0xc000;
// Pointers carry 14 bits of offset.
const MAX_POINTER_OFFSET: usize = 0x3fff;
// Largest self-contained rdata any typed variant can produce (SOA: two 255 byte names + 20 bytes).
const MAX_TYPED_RDATA: usize = 2 * 255 + 20;

struct BytePacketBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    // wire form of every name suffix written so far -> its offset. `None` disables compression.
    names: Option<HashMap<Vec<u8>, usize>>,
}

impl<'a> BytePacketBuffer<'a> {
    fn new(buffer: &'a mut [u8]) -> BytePacketBuffer<'a> {
        BytePacketBuffer {
            buf: buffer,
            pos: 0,
            names: None,
        }
    }

    fn compressing(buffer: &'a mut [u8]) -> BytePacketBuffer<'a> {
        BytePacketBuffer {
            names: Some(HashMap::new()),
            ..BytePacketBuffer::new(buffer)
        }
    }

    fn write(&mut self, val: u8) -> anyhow::Result<()> {
        match self.buf.get_mut(self.pos) {
            Some(slot) => *slot = val,
            None => anyhow::bail!("End of buffer"),
        }
        self.pos += 1;
        Ok(())
    }

    fn write_u8(&mut self, val: u8) -> anyhow::Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> anyhow::Result<()> {
        self.write_bytes(&val.to_be_bytes())
    }

    fn write_u32(&mut self, val: u32) -> anyhow::Result<()> {
        self.write_bytes(&val.to_be_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        for b in bytes {
            self.write(*b)?;
        }

        Ok(())
    }

    // Writes the longest suffix already in the packet as a pointer to it.
    fn write_qname(&mut self, qname: &str) -> anyhow::Result<()> {
        let labels = labels(qname)?;

        for i in 0..labels.len() {
            let suffix = wire_form(&labels[i..]);
            let known = self
                .names
                .as_ref()
                .and_then(|names| names.get(&suffix).copied());
            if let Some(offset) = known {
                return self.write_u16(POINTER_FLAG | offset as u16);
            }

            let pos = self.pos;
            if let Some(names) = self.names.as_mut() {
                if pos <= MAX_POINTER_OFFSET {
                    names.insert(suffix, pos);
                }
            }

            self.write_u8(labels[i].len() as u8)?;
            self.write_bytes(&labels[i])?;
        }

        self.write_u8(0)?;

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> anyhow::Result<()> {
        match self.buf.get_mut(pos..pos + 2) {
            Some(slot) => slot.copy_from_slice(&val.to_be_bytes()),
            None => anyhow::bail!("End of buffer"),
        }

        Ok(())
    }
}

/// Splits a name in presentation form into raw labels. `\.` and `\\` stand for a literal dot and
/// backslash inside a label, `\DDD` for the byte with that decimal value.
fn labels(name: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut bytes = name.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'.' => {
                if !label.is_empty() {
                    labels.push(std::mem::take(&mut label));
                }
            }
            b'\\' => match bytes.next() {
                Some(d) if d.is_ascii_digit() => label.push(escaped_byte(d, &mut bytes)?),
                Some(escaped) => label.push(escaped),
                None => anyhow::bail!("Name {:?} ends in a lone backslash", name),
            },
            _ => label.push(b),
        }
    }
    if !label.is_empty() {
        labels.push(label);
    }

    if labels.iter().any(|label| label.len() > MAX_LABEL_LEN) {
        anyhow::bail!("Single label exceeds 63 characters")
    }

    Ok(labels)
}

fn escaped_byte(first: u8, rest: &mut impl Iterator<Item = u8>) -> anyhow::Result<u8> {
    let mut value = u16::from(first - b'0');
    for _ in 0..2 {
        match rest.next() {
            Some(d) if d.is_ascii_digit() => value = value * 10 + u16::from(d - b'0'),
            _ => anyhow::bail!("Escape \\DDD needs three digits"),
        }
    }
    if value > u16::from(u8::MAX) {
        anyhow::bail!("Escape \\{} is not a byte", value)
    }

    Ok(value as u8)
}

fn wire_form(labels: &[Vec<u8>]) -> Vec<u8> {
    let mut wire = Vec::new();
    for label in labels {
        wire.push(label.len() as u8);
        wire.extend_from_slice(label);
    }
    wire
}

/// Serializes `packet` into `buf` and returns the number of bytes written.
///
/// Repeated names are compressed. Section counts come from the section vectors, not from the
/// header.
pub fn write(buf: &mut [u8], packet: &DnsPacket) -> anyhow::Result<usize> {
    let mut buffer = BytePacketBuffer::compressing(buf);

    write_header(packet, &mut buffer)?;

    for question in &packet.questions {
        write_question(question, &mut buffer)?;
    }

    for rec in &packet.answers {
        write_record(rec, &mut buffer)?;
    }
    for rec in &packet.authorities {
        write_record(rec, &mut buffer)?;
    }
    for rec in &packet.resources {
        write_record(rec, &mut buffer)?;
    }

    Ok(buffer.pos)
}

fn section_len<T>(section: &[T]) -> anyhow::Result<u16> {
    if section.len() > u16::MAX as usize {
        anyhow::bail!("Section holds more than {} entries", u16::MAX)
    }

    Ok(section.len() as u16)
}

fn write_header(packet: &DnsPacket, buffer: &mut BytePacketBuffer) -> anyhow::Result<()> {
    let header: &DnsHeader = &packet.header;

    buffer.write_u16(header.id)?;
    buffer.write_u16(header.flags())?;
    buffer.write_u16(section_len(&packet.questions)?)?;
    buffer.write_u16(section_len(&packet.answers)?)?;
    buffer.write_u16(section_len(&packet.authorities)?)?;
    buffer.write_u16(section_len(&packet.resources)?)?;

    Ok(())
}

fn write_question(question: &DnsQuestion, buffer: &mut BytePacketBuffer) -> anyhow::Result<()> {
    buffer.write_qname(&question.name)?;
    buffer.write_u16(question.qtype.to_num())?;
    buffer.write_u16(question.qclass)?;

    Ok(())
}

fn write_record(record: &DnsRecord, buffer: &mut BytePacketBuffer) -> anyhow::Result<usize> {
    let start_pos = buffer.pos;

    buffer.write_qname(&record.domain)?;
    buffer.write_u16(record.qtype().to_num())?;
    buffer.write_u16(record.class)?;
    buffer.write_u32(record.ttl)?;

    let len_pos = buffer.pos;
    buffer.write_u16(0)?;

    write_rdata(&record.data, buffer)?;

    let size = buffer.pos - (len_pos + 2);
    if size > u16::MAX as usize {
        anyhow::bail!("Record data exceeds {} bytes", u16::MAX)
    }
    buffer.set_u16(len_pos, size as u16)?;

    Ok(buffer.pos - start_pos)
}

fn write_rdata(data: &RecordData, buffer: &mut BytePacketBuffer) -> anyhow::Result<()> {
    match data {
        RecordData::A { addr } => buffer.write_bytes(&addr.octets())?,
        RecordData::NS { host } | RecordData::CNAME { host } | RecordData::PTR { host } => {
            buffer.write_qname(host)?
        }
        RecordData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            buffer.write_qname(mname)?;
            buffer.write_qname(rname)?;
            for counter in &[*serial, *refresh, *retry, *expire, *minimum] {
                buffer.write_u32(*counter)?;
            }
        }
        RecordData::MX { priority, host } => {
            buffer.write_u16(*priority)?;
            buffer.write_qname(host)?;
        }
        RecordData::AAAA { addr } => buffer.write_bytes(&addr.octets())?,
        RecordData::UNKNOWN { data, .. } => buffer.write_bytes(data)?,
    }

    Ok(())
}

impl RecordData {
    /// Encodes the data as RDATA that does not depend on any surrounding packet.
    pub fn to_rdata(&self) -> anyhow::Result<Vec<u8>> {
        if let RecordData::UNKNOWN { data, .. } = self {
            return Ok(data.clone());
        }

        let mut buf = vec![0u8; MAX_TYPED_RDATA];
        let mut buffer = BytePacketBuffer::new(&mut buf);
        write_rdata(self, &mut buffer)?;
        let size = buffer.pos;
        buf.truncate(size);

        Ok(buf)
    }
}
