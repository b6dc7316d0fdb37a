//! Minimal DER encoding and decoding.
//!
//! The CMS builder, the CMS parser and the RFC 3161 codec all work on raw
//! DER. This module provides the byte-level helpers: a writer for the
//! handful of universal types we emit and a cursor-based TLV reader for
//! everything we parse. Definite lengths only, at most four length bytes.

use crate::infra::error::{SignError, SignResult};

// ---- writer ---------------------------------------------------------------

/// Encode a definite length.
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else if len <= 0xffff {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    } else if len <= 0xff_ffff {
        vec![0x83, (len >> 16) as u8, (len >> 8) as u8, (len & 0xff) as u8]
    } else {
        vec![
            0x84,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            (len & 0xff) as u8,
        ]
    }
}

/// Frame `content` under `tag`.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    out.extend_from_slice(&encode_len(content.len()));
    out.extend_from_slice(content);
    out
}

pub fn sequence(items: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = items.iter().flat_map(|i| i.iter().copied()).collect();
    tlv(0x30, &content)
}

/// SET with caller-provided (already ordered) content.
pub fn set(content: &[u8]) -> Vec<u8> {
    tlv(0x31, content)
}

/// SET OF: elements sorted by their encoded bytes, as DER requires.
pub fn set_of(mut items: Vec<Vec<u8>>) -> Vec<u8> {
    items.sort();
    let content: Vec<u8> = items.into_iter().flatten().collect();
    tlv(0x31, &content)
}

pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(0x06, content)
}

/// INTEGER from magnitude bytes; prepends 0x00 when the high bit is set.
pub fn integer(value: &[u8]) -> Vec<u8> {
    let mut bytes = value;
    while bytes.len() > 1 && bytes[0] == 0 && bytes[1] & 0x80 == 0 {
        bytes = &bytes[1..];
    }
    if bytes.is_empty() {
        return tlv(0x02, &[0]);
    }
    if bytes[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0);
        padded.extend_from_slice(bytes);
        tlv(0x02, &padded)
    } else {
        tlv(0x02, bytes)
    }
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(0x04, content)
}

pub fn utf8_string(s: &str) -> Vec<u8> {
    tlv(0x0c, s.as_bytes())
}

pub fn boolean(value: bool) -> Vec<u8> {
    tlv(0x01, &[if value { 0xff } else { 0x00 }])
}

/// `[n]` EXPLICIT (constructed context-specific).
pub fn context(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0xa0 | n, content)
}

// ---- reader ---------------------------------------------------------------

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// Content octets (without tag and length)
    pub content: &'a [u8],
    /// The full encoding including tag and length
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Descend into a constructed value.
    pub fn reader(&self) -> DerReader<'a> {
        DerReader::new(self.content)
    }
}

/// Parse a length at the start of `data`: returns (length, header bytes).
pub fn parse_len(data: &[u8]) -> SignResult<(usize, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| SignError::Asn1Error("empty length".to_string()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let n = (first & 0x7f) as usize;
    if n == 0 || n > 4 {
        return Err(SignError::Asn1Error(format!(
            "unsupported length-of-length {n}"
        )));
    }
    if data.len() < 1 + n {
        return Err(SignError::Asn1Error("truncated length".to_string()));
    }
    let mut len = 0usize;
    for &b in &data[1..=n] {
        len = (len << 8) | b as usize;
    }
    Ok((len, 1 + n))
}

/// Sequential TLV cursor.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Tag of the next element, if any.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next TLV element.
    pub fn read(&mut self) -> SignResult<Tlv<'a>> {
        let start = self.pos;
        let tag = *self
            .data
            .get(self.pos)
            .ok_or_else(|| SignError::Asn1Error("unexpected end of DER input".to_string()))?;
        let (len, header) = parse_len(&self.data[self.pos + 1..])?;
        let content_start = self.pos + 1 + header;
        let end = content_start
            .checked_add(len)
            .ok_or_else(|| SignError::Asn1Error("length overflow".to_string()))?;
        if end > self.data.len() {
            return Err(SignError::Asn1Error(format!(
                "element of {len} bytes exceeds input"
            )));
        }
        self.pos = end;
        Ok(Tlv {
            tag,
            content: &self.data[content_start..end],
            raw: &self.data[start..end],
        })
    }

    /// Read the next element and require `tag`.
    pub fn expect(&mut self, tag: u8) -> SignResult<Tlv<'a>> {
        let element = self.read()?;
        if element.tag != tag {
            return Err(SignError::Asn1Error(format!(
                "expected tag 0x{tag:02x}, found 0x{:02x}",
                element.tag
            )));
        }
        Ok(element)
    }

    /// Read the next element if its tag matches; leave the cursor alone otherwise.
    pub fn read_optional(&mut self, tag: u8) -> SignResult<Option<Tlv<'a>>> {
        if self.peek_tag() == Some(tag) {
            Ok(Some(self.read()?))
        } else {
            Ok(None)
        }
    }
}

/// Size of the outermost TLV starting at `data[0]`, padding excluded.
/// `/Contents` placeholders are zero-padded past the DER, so parsers use
/// this to find where the real encoding ends.
pub fn outer_tlv_len(data: &[u8]) -> SignResult<usize> {
    if data.is_empty() {
        return Err(SignError::Asn1Error("empty input".to_string()));
    }
    let (len, header) = parse_len(&data[1..])?;
    let total = 1 + header + len;
    if total > data.len() {
        return Err(SignError::Asn1Error("outer element exceeds input".to_string()));
    }
    Ok(total)
}
