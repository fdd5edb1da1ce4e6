//! DNS query parser
//!
//! Decodes the DNS header and first question from UDP payloads. Only
//! queries (qr=0) are surfaced to the pipeline; responses are ignored.
//! The name decoder handles label compression and is shared with the
//! discovery resolvers, which parse PTR answers.

use crate::core::packet::DnsQueryInfo;

/// Parse a DNS query from a UDP payload.
pub fn parse_query(payload: &[u8]) -> Option<DnsQueryInfo> {
    if payload.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let is_response = (flags & 0x8000) != 0;
    if is_response {
        return None;
    }

    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let (qname, offset) = decode_name(payload, 12)?;
    if offset + 4 > payload.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);

    Some(DnsQueryInfo { qname, qtype })
}

/// Decode a DNS name starting at `offset`, following compression
/// pointers. Returns the dotted name (lossy UTF-8) and the offset just
/// past the name in the original stream.
pub(crate) fn decode_name(payload: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut jumped = false;
    let mut return_offset = offset;
    let mut depth = 0;

    loop {
        if offset >= payload.len() || depth > 10 {
            break;
        }

        let len = payload[offset] as usize;

        if len == 0 {
            if !jumped {
                return_offset = offset + 1;
            }
            break;
        }

        // Compression pointer
        if len & 0xC0 == 0xC0 {
            if offset + 1 >= payload.len() {
                return None;
            }
            let pointer = (((len & 0x3F) as usize) << 8) | (payload[offset + 1] as usize);
            if !jumped {
                return_offset = offset + 2;
            }
            offset = pointer;
            jumped = true;
            depth += 1;
            continue;
        }

        offset += 1;
        if offset + len > payload.len() {
            return None;
        }

        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&payload[offset..offset + len]));
        offset += len;
    }

    Some((name, return_offset))
}

/// Encode a dotted name into DNS label format.
pub(crate) fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = label.as_bytes();
        out.push(bytes.len().min(63) as u8);
        out.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_payload(qname: &str, qtype: u16) -> Vec<u8> {
        let mut payload = vec![
            0x12, 0x34, // id
            0x01, 0x00, // flags: standard query, RD
            0x00, 0x01, // qdcount
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        payload.extend_from_slice(&encode_name(qname));
        payload.extend_from_slice(&qtype.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes()); // class IN
        payload
    }

    #[test]
    fn test_parse_a_query() {
        let payload = query_payload("www.example.com", 1);
        let query = parse_query(&payload).unwrap();
        assert_eq!(query.qname, "www.example.com");
        assert_eq!(query.qtype, 1);
    }

    #[test]
    fn test_responses_are_ignored() {
        let mut payload = query_payload("www.example.com", 1);
        payload[2] = 0x81; // QR bit set
        assert!(parse_query(&payload).is_none());
    }

    #[test]
    fn test_no_questions_is_ignored() {
        let mut payload = query_payload("www.example.com", 1);
        payload[5] = 0;
        assert!(parse_query(&payload).is_none());
    }

    #[test]
    fn test_short_payload_is_ignored() {
        assert!(parse_query(&[0x12, 0x34, 0x01]).is_none());
    }

    #[test]
    fn test_name_compression() {
        // Name at offset 12, then a second name that points back to it
        let mut payload = query_payload("example.com", 1);
        let pointer_at = payload.len();
        payload.extend_from_slice(&[0x03, b'f', b't', b'p', 0xC0, 12]);

        let (name, next) = decode_name(&payload, pointer_at).unwrap();
        assert_eq!(name, "ftp.example.com");
        assert_eq!(next, pointer_at + 6);
    }

    #[test]
    fn test_invalid_name_bytes_are_replaced() {
        let mut payload = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        payload.extend_from_slice(&[2, 0xff, 0xfe, 0]);
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());

        let query = parse_query(&payload).unwrap();
        assert_eq!(query.qname.chars().count(), 2);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoded = encode_name("host.local");
        let (decoded, _) = decode_name(&encoded, 0).unwrap();
        assert_eq!(decoded, "host.local");
    }
}
