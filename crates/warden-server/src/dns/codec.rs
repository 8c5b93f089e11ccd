//! DNS wire format (RFC 1035).
//!
//! Only what the filter needs: query parsing with compression-pointer
//! support, sinkhole and error response construction, TTL extraction from
//! upstream responses and transaction-id patching for cached answers.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

/// QTYPE for an IPv4 host address.
pub const QTYPE_A: u16 = 1;
/// QTYPE for an IPv6 host address.
pub const QTYPE_AAAA: u16 = 28;
/// The Internet class.
pub const CLASS_IN: u16 = 1;

/// RCODE: no error.
pub const RCODE_NOERROR: u8 = 0;
/// RCODE: format error.
pub const RCODE_FORMERR: u8 = 1;
/// RCODE: server failure.
pub const RCODE_SERVFAIL: u8 = 2;

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 32;

/// A failed parse, with the transaction id when it was recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Transaction id, present when at least the header id was readable
    pub id: Option<u16>,
    /// What went wrong
    pub reason: String,
}

impl ParseError {
    fn new(id: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for ParseError {}

/// The question the filter answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Transaction id
    pub id: u16,
    /// RD flag from the request, echoed in responses
    pub recursion_desired: bool,
    /// QNAME, lowercased with a single trailing dot stripped
    pub qname: String,
    /// Question type
    pub qtype: u16,
    /// Question class
    pub qclass: u16,
}

/// Parse a query message far enough to answer it.
///
/// # Errors
///
/// Returns a [`ParseError`] carrying the transaction id when the header
/// was readable (FORMERR is possible) and `None` otherwise (drop).
pub fn parse_query(buf: &[u8]) -> Result<ParsedQuery, ParseError> {
    if buf.len() < 2 {
        return Err(ParseError::new(None, "message shorter than an id"));
    }
    let id = u16::from_be_bytes([buf[0], buf[1]]);
    if buf.len() < HEADER_LEN {
        return Err(ParseError::new(Some(id), "truncated header"));
    }
    let flags = u16::from_be_bytes([buf[2], buf[3]]);
    if flags & 0x8000 != 0 {
        return Err(ParseError::new(Some(id), "QR set on a query"));
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
    if qdcount != 1 {
        return Err(ParseError::new(Some(id), format!("qdcount {qdcount}")));
    }

    let (name, offset) = read_name(buf, HEADER_LEN).map_err(|r| ParseError::new(Some(id), r))?;
    if buf.len() < offset + 4 {
        return Err(ParseError::new(Some(id), "truncated question"));
    }
    let qtype = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    let qclass = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);

    if name.bytes().any(|b| b.is_ascii_control()) {
        return Err(ParseError::new(Some(id), "control characters in qname"));
    }

    Ok(ParsedQuery {
        id,
        recursion_desired: flags & 0x0100 != 0,
        qname: normalize_qname(&name),
        qtype,
        qclass,
    })
}

/// Lowercase and strip one trailing dot.
#[must_use]
pub fn normalize_qname(name: &str) -> String {
    let name = name.strip_suffix('.').unwrap_or(name);
    name.to_ascii_lowercase()
}

/// Decode a possibly compressed name starting at `offset`; returns the
/// dotted name and the offset just past its in-place encoding.
fn read_name(buf: &[u8], start: usize) -> Result<(String, usize), String> {
    let mut name = String::new();
    let mut offset = start;
    let mut end_offset = None;
    let mut hops = 0usize;

    loop {
        let len = *buf.get(offset).ok_or("name runs past the message")? as usize;
        match len {
            0 => {
                offset += 1;
                break;
            }
            l if l & 0xc0 == 0xc0 => {
                let next = *buf.get(offset + 1).ok_or("truncated compression pointer")?;
                let target = ((l & 0x3f) << 8) | next as usize;
                if end_offset.is_none() {
                    end_offset = Some(offset + 2);
                }
                if target >= offset {
                    return Err("forward compression pointer".to_owned());
                }
                offset = target;
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err("compression pointer loop".to_owned());
                }
            }
            l if l & 0xc0 != 0 => return Err(format!("reserved label type {l:#x}")),
            l => {
                let label = buf
                    .get(offset + 1..offset + 1 + l)
                    .ok_or("label runs past the message")?;
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(&String::from_utf8_lossy(label));
                offset += 1 + l;
                if name.len() > MAX_NAME_LEN {
                    return Err("name exceeds 255 octets".to_owned());
                }
            }
        }
    }

    Ok((name, end_offset.unwrap_or(offset)))
}

/// Least TTL across answer and authority records, for cache expiry.
/// `None` when the message carries no records or does not parse.
#[must_use]
pub fn response_min_ttl(buf: &[u8]) -> Option<u32> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;
    let nscount = u16::from_be_bytes([buf[8], buf[9]]) as usize;

    let mut offset = HEADER_LEN;
    for _ in 0..qdcount {
        let (_, next) = read_name(buf, offset).ok()?;
        offset = next + 4;
    }

    let mut min_ttl: Option<u32> = None;
    for _ in 0..ancount + nscount {
        let (_, next) = read_name(buf, offset).ok()?;
        offset = next;
        if buf.len() < offset + 10 {
            return min_ttl;
        }
        let ttl = u32::from_be_bytes([
            buf[offset + 4],
            buf[offset + 5],
            buf[offset + 6],
            buf[offset + 7],
        ]);
        let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;
        offset += 10 + rdlength;
        min_ttl = Some(min_ttl.map_or(ttl, |m| m.min(ttl)));
    }
    min_ttl
}

/// Response RCODE, when the header is readable.
#[must_use]
pub fn response_rcode(buf: &[u8]) -> Option<u8> {
    (buf.len() >= HEADER_LEN).then(|| buf[3] & 0x0f)
}

/// Overwrite the transaction id of a serialized message in place.
pub fn patch_id(buf: &mut [u8], id: u16) {
    if buf.len() >= 2 {
        buf[0..2].copy_from_slice(&id.to_be_bytes());
    }
}

fn write_header(
    out: &mut BytesMut,
    id: u16,
    recursion_desired: bool,
    authoritative: bool,
    rcode: u8,
    qdcount: u16,
    ancount: u16,
) {
    out.put_u16(id);
    let mut flags: u16 = 0x8000; // QR
    if authoritative {
        flags |= 0x0400; // AA
    }
    if recursion_desired {
        flags |= 0x0100; // RD
    }
    flags |= 0x0080; // RA
    flags |= u16::from(rcode & 0x0f);
    out.put_u16(flags);
    out.put_u16(qdcount);
    out.put_u16(ancount);
    out.put_u16(0); // NSCOUNT
    out.put_u16(0); // ARCOUNT
}

fn write_name(out: &mut BytesMut, name: &str) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = label.as_bytes();
        let len = bytes.len().min(63);
        out.put_u8(len as u8);
        out.put_slice(&bytes[..len]);
    }
    out.put_u8(0);
}

fn write_question(out: &mut BytesMut, query: &ParsedQuery) {
    write_name(out, &query.qname);
    out.put_u16(query.qtype);
    out.put_u16(query.qclass);
}

/// The sinkhole address pair answers are built from.
#[derive(Debug, Clone, Copy)]
pub struct SinkholeAddrs {
    /// Answer for A queries
    pub ipv4: Ipv4Addr,
    /// Answer for AAAA queries
    pub ipv6: Ipv6Addr,
}

/// Build a sinkhole response: an authoritative NOERROR answer carrying
/// the configured address for A/AAAA queries and NODATA for every other
/// type. The TTL is the (short) sinkhole TTL, never the cache's.
#[must_use]
pub fn build_sinkhole_response(query: &ParsedQuery, addrs: SinkholeAddrs, ttl: u32) -> Vec<u8> {
    let answered = matches!(query.qtype, QTYPE_A | QTYPE_AAAA) && query.qclass == CLASS_IN;
    let mut out = BytesMut::with_capacity(128);
    write_header(
        &mut out,
        query.id,
        query.recursion_desired,
        true,
        RCODE_NOERROR,
        1,
        u16::from(answered),
    );
    write_question(&mut out, query);
    if answered {
        write_name(&mut out, &query.qname);
        out.put_u16(query.qtype);
        out.put_u16(CLASS_IN);
        out.put_u32(ttl);
        match query.qtype {
            QTYPE_A => {
                out.put_u16(4);
                out.put_slice(&addrs.ipv4.octets());
            }
            _ => {
                out.put_u16(16);
                out.put_slice(&addrs.ipv6.octets());
            }
        }
    }
    out.to_vec()
}

/// Build an error response (FORMERR / SERVFAIL), echoing the question
/// when one was parsed.
#[must_use]
pub fn build_error_response(id: u16, query: Option<&ParsedQuery>, rcode: u8) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(64);
    let rd = query.is_some_and(|q| q.recursion_desired);
    write_header(&mut out, id, rd, false, rcode, u16::from(query.is_some()), 0);
    if let Some(q) = query {
        write_question(&mut out, q);
    }
    out.to_vec()
}
