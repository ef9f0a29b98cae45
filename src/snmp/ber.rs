//! Minimal BER encoding for SNMP v1/v2c messages.
//!
//! Only the subset needed to walk interface tables is supported: the universal
//! types SNMP uses, the SMIv2 application types, the v2 exception values and the
//! GetNext/GetBulk/Response PDUs.
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIMETICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;
    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BerError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("expected tag 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("unsupported length encoding")]
    UnsupportedLength,
    #[error("invalid length {len} for tag 0x{tag:02x}")]
    InvalidLength { tag: u8, len: usize },
    #[error("integer does not fit in {0} bytes")]
    IntegerOverflow(usize),
    #[error("invalid object identifier: {0}")]
    InvalidOid(String),
    #[error("unknown PDU type 0x{0:02x}")]
    UnknownPdu(u8),
    #[error("unsupported SNMP message version {0}")]
    UnsupportedVersion(i64),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// An OBJECT IDENTIFIER, ordered arc by arc the same way agents order a walk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Result<Self, BerError> {
        let valid = matches!(
            arcs.as_slice(),
            [first, second, ..] if *first <= 2 && (*first == 2 || *second < 40)
        );
        if !valid {
            return Err(BerError::InvalidOid(format!("{arcs:?}")));
        }
        Ok(Self(arcs))
    }

    pub(crate) fn from_trusted(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn last_arc(&self) -> Option<u32> {
        self.0.last().copied()
    }

    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }
}

impl FromStr for Oid {
    type Err = BerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .trim()
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BerError::InvalidOid(s.to_string()))?;
        Oid::new(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

/// Value half of a variable binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other { tag: u8, data: Vec<u8> },
}

impl ObjectValue {
    /// Numeric reading of the value. Negative integers and non-numeric types read as 0.
    pub fn as_u64(&self) -> u64 {
        match self {
            ObjectValue::Integer(v) => u64::try_from(*v).unwrap_or(0),
            ObjectValue::Counter32(v) | ObjectValue::Gauge32(v) | ObjectValue::TimeTicks(v) => {
                u64::from(*v)
            }
            ObjectValue::Counter64(v) => *v,
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ObjectValue::Integer(v) => Some(*v),
            ObjectValue::Counter32(v) | ObjectValue::Gauge32(v) | ObjectValue::TimeTicks(v) => {
                Some(i64::from(*v))
            }
            ObjectValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Textual reading of the value. Octet strings are decoded as (lossy) UTF-8.
    pub fn to_text(&self) -> String {
        match self {
            ObjectValue::OctetString(bytes) | ObjectValue::Opaque(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            other => other.to_string(),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            ObjectValue::NoSuchObject | ObjectValue::NoSuchInstance | ObjectValue::EndOfMibView
        )
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            ObjectValue::Integer(v) => put_tlv(buf, tag::INTEGER, &integer_content(*v)),
            ObjectValue::OctetString(bytes) => put_tlv(buf, tag::OCTET_STRING, bytes),
            ObjectValue::Null => put_tlv(buf, tag::NULL, &[]),
            ObjectValue::ObjectId(oid) => put_tlv(buf, tag::OBJECT_IDENTIFIER, &oid_content(oid)),
            ObjectValue::IpAddress(octets) => put_tlv(buf, tag::IP_ADDRESS, octets),
            ObjectValue::Counter32(v) => {
                put_tlv(buf, tag::COUNTER32, &unsigned_content(u64::from(*v)))
            }
            ObjectValue::Gauge32(v) => put_tlv(buf, tag::GAUGE32, &unsigned_content(u64::from(*v))),
            ObjectValue::TimeTicks(v) => {
                put_tlv(buf, tag::TIMETICKS, &unsigned_content(u64::from(*v)))
            }
            ObjectValue::Opaque(bytes) => put_tlv(buf, tag::OPAQUE, bytes),
            ObjectValue::Counter64(v) => put_tlv(buf, tag::COUNTER64, &unsigned_content(*v)),
            ObjectValue::NoSuchObject => put_tlv(buf, tag::NO_SUCH_OBJECT, &[]),
            ObjectValue::NoSuchInstance => put_tlv(buf, tag::NO_SUCH_INSTANCE, &[]),
            ObjectValue::EndOfMibView => put_tlv(buf, tag::END_OF_MIB_VIEW, &[]),
            ObjectValue::Other { tag, data } => put_tlv(buf, *tag, data),
        }
    }

    fn decode(value_tag: u8, content: &[u8]) -> Result<Self, BerError> {
        Ok(match value_tag {
            tag::INTEGER => ObjectValue::Integer(decode_integer(content)?),
            tag::OCTET_STRING => ObjectValue::OctetString(content.to_vec()),
            tag::NULL => ObjectValue::Null,
            tag::OBJECT_IDENTIFIER => ObjectValue::ObjectId(decode_oid(content)?),
            tag::IP_ADDRESS => {
                let octets: [u8; 4] = content.try_into().map_err(|_| BerError::InvalidLength {
                    tag: value_tag,
                    len: content.len(),
                })?;
                ObjectValue::IpAddress(octets)
            }
            tag::COUNTER32 => ObjectValue::Counter32(decode_u32(content)?),
            tag::GAUGE32 => ObjectValue::Gauge32(decode_u32(content)?),
            tag::TIMETICKS => ObjectValue::TimeTicks(decode_u32(content)?),
            tag::OPAQUE => ObjectValue::Opaque(content.to_vec()),
            tag::COUNTER64 => ObjectValue::Counter64(decode_unsigned(content)?),
            tag::NO_SUCH_OBJECT => ObjectValue::NoSuchObject,
            tag::NO_SUCH_INSTANCE => ObjectValue::NoSuchInstance,
            tag::END_OF_MIB_VIEW => ObjectValue::EndOfMibView,
            other => ObjectValue::Other {
                tag: other,
                data: content.to_vec(),
            },
        })
    }
}

impl fmt::Display for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectValue::Integer(v) => write!(f, "{v}"),
            ObjectValue::OctetString(bytes) | ObjectValue::Opaque(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(bytes))
            }
            ObjectValue::Null => f.write_str("<nil>"),
            ObjectValue::ObjectId(oid) => write!(f, "{oid}"),
            ObjectValue::IpAddress([a, b, c, d]) => write!(f, "{a}.{b}.{c}.{d}"),
            ObjectValue::Counter32(v) | ObjectValue::Gauge32(v) | ObjectValue::TimeTicks(v) => {
                write!(f, "{v}")
            }
            ObjectValue::Counter64(v) => write!(f, "{v}"),
            ObjectValue::NoSuchObject => f.write_str("noSuchObject"),
            ObjectValue::NoSuchInstance => f.write_str("noSuchInstance"),
            ObjectValue::EndOfMibView => f.write_str("endOfMibView"),
            ObjectValue::Other { tag, data } => write!(f, "[0x{tag:02x}; {} bytes]", data.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: ObjectValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: ObjectValue) -> Self {
        Self { oid, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    GetRequest,
    GetNextRequest,
    Response,
    GetBulkRequest,
}

impl PduKind {
    fn tag(self) -> u8 {
        match self {
            PduKind::GetRequest => 0xa0,
            PduKind::GetNextRequest => 0xa1,
            PduKind::Response => 0xa2,
            PduKind::GetBulkRequest => 0xa5,
        }
    }

    fn from_tag(value: u8) -> Result<Self, BerError> {
        match value {
            0xa0 => Ok(PduKind::GetRequest),
            0xa1 => Ok(PduKind::GetNextRequest),
            0xa2 => Ok(PduKind::Response),
            0xa5 => Ok(PduKind::GetBulkRequest),
            other => Err(BerError::UnknownPdu(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub kind: PduKind,
    pub request_id: i32,
    /// error-status for responses, non-repeaters for GET-BULK.
    pub error_status: i64,
    /// error-index for responses, max-repetitions for GET-BULK.
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn get_next(request_id: i32, oids: &[Oid]) -> Self {
        Self::request(PduKind::GetNextRequest, request_id, 0, 0, oids)
    }

    pub fn get_bulk(
        request_id: i32,
        non_repeaters: u32,
        max_repetitions: u32,
        oids: &[Oid],
    ) -> Self {
        Self::request(
            PduKind::GetBulkRequest,
            request_id,
            i64::from(non_repeaters),
            i64::from(max_repetitions),
            oids,
        )
    }

    pub fn response(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            kind: PduKind::Response,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    fn request(kind: PduKind, request_id: i32, status: i64, index: i64, oids: &[Oid]) -> Self {
        Self {
            kind,
            request_id,
            error_status: status,
            error_index: index,
            varbinds: oids
                .iter()
                .map(|oid| VarBind::new(oid.clone(), ObjectValue::Null))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }

    fn from_wire(value: i64) -> Result<Self, BerError> {
        match value {
            0 => Ok(SnmpVersion::V1),
            1 => Ok(SnmpVersion::V2c),
            other => Err(BerError::UnsupportedVersion(other)),
        }
    }
}

/// A community-based SNMP message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: SnmpVersion,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn encode(&self) -> Bytes {
        let mut varbinds = BytesMut::new();
        for varbind in &self.pdu.varbinds {
            let mut entry = BytesMut::new();
            put_tlv(&mut entry, tag::OBJECT_IDENTIFIER, &oid_content(&varbind.oid));
            varbind.value.encode(&mut entry);
            put_tlv(&mut varbinds, tag::SEQUENCE, &entry);
        }

        let mut pdu = BytesMut::new();
        put_tlv(&mut pdu, tag::INTEGER, &integer_content(i64::from(self.pdu.request_id)));
        put_tlv(&mut pdu, tag::INTEGER, &integer_content(self.pdu.error_status));
        put_tlv(&mut pdu, tag::INTEGER, &integer_content(self.pdu.error_index));
        put_tlv(&mut pdu, tag::SEQUENCE, &varbinds);

        let mut body = BytesMut::new();
        put_tlv(&mut body, tag::INTEGER, &integer_content(self.version.wire_value()));
        put_tlv(&mut body, tag::OCTET_STRING, &self.community);
        put_tlv(&mut body, self.pdu.kind.tag(), &pdu);

        let mut message = BytesMut::with_capacity(body.len() + 4);
        put_tlv(&mut message, tag::SEQUENCE, &body);
        message.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, BerError> {
        let mut outer = Reader::new(data);
        let body = outer.expect(tag::SEQUENCE)?;
        if !outer.is_empty() {
            return Err(BerError::TrailingBytes(outer.remaining()));
        }

        let mut body = Reader::new(body);
        let version = SnmpVersion::from_wire(decode_integer(body.expect(tag::INTEGER)?)?)?;
        let community = body.expect(tag::OCTET_STRING)?.to_vec();
        let (pdu_tag, pdu_content) = body.read_tlv()?;
        let kind = PduKind::from_tag(pdu_tag)?;

        let mut pdu = Reader::new(pdu_content);
        let request_id = decode_integer(pdu.expect(tag::INTEGER)?)?;
        let request_id = i32::try_from(request_id).map_err(|_| BerError::IntegerOverflow(4))?;
        let error_status = decode_integer(pdu.expect(tag::INTEGER)?)?;
        let error_index = decode_integer(pdu.expect(tag::INTEGER)?)?;

        let mut list = Reader::new(pdu.expect(tag::SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut entry = Reader::new(list.expect(tag::SEQUENCE)?);
            let oid = decode_oid(entry.expect(tag::OBJECT_IDENTIFIER)?)?;
            let (value_tag, value_content) = entry.read_tlv()?;
            varbinds.push(VarBind::new(oid, ObjectValue::decode(value_tag, value_content)?));
        }

        Ok(Self {
            version,
            community,
            pdu: Pdu {
                kind,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let (&found_tag, rest) = self.data.split_first().ok_or(BerError::Truncated)?;
        let (&first, mut rest) = rest.split_first().ok_or(BerError::Truncated)?;

        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7f);
            // 0 is the indefinite form, which SNMP never uses.
            if count == 0 || count > 4 {
                return Err(BerError::UnsupportedLength);
            }
            if rest.len() < count {
                return Err(BerError::Truncated);
            }
            let (len_bytes, tail) = rest.split_at(count);
            rest = tail;
            len_bytes
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
        };

        if rest.len() < len {
            return Err(BerError::Truncated);
        }
        let (content, tail) = rest.split_at(len);
        self.data = tail;
        Ok((found_tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.read_tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.put_u8(0x80 | significant.len() as u8);
    buf.put_slice(significant);
}

fn put_tlv(buf: &mut BytesMut, tlv_tag: u8, content: &[u8]) {
    buf.put_u8(tlv_tag);
    put_length(buf, content.len());
    buf.put_slice(content);
}

fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(bytes.len() - 1);
    let mut content = Vec::with_capacity(bytes.len() + 1);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    content
}

fn oid_content(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut content = Vec::with_capacity(arcs.len() + 4);
    push_base128(&mut content, u64::from(arcs[0]) * 40 + u64::from(arcs[1]));
    for arc in &arcs[2..] {
        push_base128(&mut content, u64::from(*arc));
    }
    content
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut count = 0;
    loop {
        groups[count] = (value & 0x7f) as u8;
        count += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0x00 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    let Some(first) = content.first() else {
        return Err(BerError::Truncated);
    };
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow(8));
    }
    let seed: i64 = if first & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(seed, |acc, b| (acc << 8) | i64::from(*b)))
}

fn decode_unsigned(content: &[u8]) -> Result<u64, BerError> {
    if content.is_empty() {
        return Err(BerError::Truncated);
    }
    let skip = content.iter().take_while(|b| **b == 0).count();
    let significant = &content[skip..];
    if significant.len() > 8 {
        return Err(BerError::IntegerOverflow(8));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| BerError::IntegerOverflow(4))
}

fn decode_oid(content: &[u8]) -> Result<Oid, BerError> {
    if content.is_empty() {
        return Err(BerError::InvalidOid("empty".to_string()));
    }

    let mut sub_ids = Vec::with_capacity(content.len() + 1);
    let mut current: u64 = 0;
    let mut pending = false;
    for byte in content {
        if current > u64::MAX >> 7 {
            return Err(BerError::InvalidOid("sub-identifier overflow".to_string()));
        }
        current = (current << 7) | u64::from(byte & 0x7f);
        pending = byte & 0x80 != 0;
        if !pending {
            sub_ids.push(current);
            current = 0;
        }
    }
    if pending {
        return Err(BerError::Truncated);
    }

    let first = sub_ids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };

    let mut arcs = Vec::with_capacity(sub_ids.len() + 1);
    arcs.push(a);
    arcs.push(to_arc(b)?);
    for sub_id in &sub_ids[1..] {
        arcs.push(to_arc(*sub_id)?);
    }
    Ok(Oid(arcs))
}

fn to_arc(value: u64) -> Result<u32, BerError> {
    u32::try_from(value).map_err(|_| BerError::InvalidOid(format!("arc {value} exceeds 32 bits")))
}
