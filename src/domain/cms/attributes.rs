//! Signed attributes of the SignerInfo.
//!
//! The attribute set is built once and framed two ways: `[0] IMPLICIT`
//! inside the SignerInfo and `SET OF` for the bytes that actually get
//! signed. Attributes are sorted by their encoding, as DER requires of a
//! SET OF, which also makes repeated embedding byte-stable.

use crate::domain::constants;
use crate::domain::der;
use crate::infra::error::{SignError, SignResult};
use sha2::{Digest, Sha256};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

/// Revocation material embedded at signing time under
/// `adbe-revocationInfoArchival`.
#[derive(Debug, Clone, Default)]
pub struct RevocationArchival {
    /// DER-encoded OCSPResponse structures
    pub ocsp: Vec<Vec<u8>>,
    /// DER-encoded CRLs
    pub crl: Vec<Vec<u8>>,
}

impl RevocationArchival {
    pub fn is_empty(&self) -> bool {
        self.ocsp.is_empty() && self.crl.is_empty()
    }
}

/// Inputs for the signed-attribute block.
pub struct AttributeParams<'a> {
    pub message_digest: &'a [u8],
    pub signing_time: OffsetDateTime,
    pub signer_cert_der: &'a [u8],
    pub revocation: Option<&'a RevocationArchival>,
}

/// The encoded attribute set, ready for either framing.
pub struct EncodedAttributes {
    content: Vec<u8>,
}

impl EncodedAttributes {
    /// `[0] IMPLICIT` framing used inside the SignerInfo.
    pub fn implicit_block(&self) -> Vec<u8> {
        der::tlv(constants::tag_context(0), &self.content)
    }

    /// `SET OF` framing: the bytes the signature is computed over.
    pub fn signed_form(&self) -> Vec<u8> {
        der::tlv(constants::TAG_SET, &self.content)
    }
}

/// Build the signed attributes for one SignerInfo.
pub fn build_signed_attributes(params: &AttributeParams<'_>) -> EncodedAttributes {
    let mut attributes = vec![
        attribute(
            constants::OID_CONTENT_TYPE,
            der::oid(constants::OID_DATA),
        ),
        attribute(
            constants::OID_SIGNING_TIME,
            encode_der_time(params.signing_time),
        ),
        attribute(
            constants::OID_MESSAGE_DIGEST,
            der::octet_string(params.message_digest),
        ),
        attribute(
            constants::OID_SIGNING_CERTIFICATE_V2,
            signing_certificate_v2(params.signer_cert_der),
        ),
    ];

    if let Some(revocation) = params.revocation.filter(|r| !r.is_empty()) {
        attributes.push(attribute(
            constants::OID_ADBE_REVOCATION_ARCHIVAL,
            revocation_archival(revocation),
        ));
    }

    attributes.sort();
    EncodedAttributes {
        content: attributes.into_iter().flatten().collect(),
    }
}

/// Attribute ::= SEQUENCE { attrType OID, attrValues SET OF AttributeValue }
fn attribute(oid: &[u8], value: Vec<u8>) -> Vec<u8> {
    der::sequence(&[&der::oid(oid), &der::set(&value)])
}

/// SigningCertificateV2 with a single ESSCertIDv2 over the signer leaf.
/// The certificate hash is SHA-256 (the ESSCertIDv2 default), stated
/// explicitly.
fn signing_certificate_v2(cert_der: &[u8]) -> Vec<u8> {
    let cert_hash: [u8; 32] = Sha256::digest(cert_der).into();
    let hash_alg = der::sequence(&[&der::oid(constants::OID_SHA256), constants::ASN1_NULL]);
    let ess_cert_id = der::sequence(&[&hash_alg, &der::octet_string(&cert_hash)]);
    let certs = der::sequence(&[&ess_cert_id]);
    der::sequence(&[&certs])
}

/// RevocationInfoArchival ::= SEQUENCE {
///     crl  [0] EXPLICIT SEQUENCE OF CRL OPTIONAL,
///     ocsp [1] EXPLICIT SEQUENCE OF OCSPResponse OPTIONAL }
fn revocation_archival(revocation: &RevocationArchival) -> Vec<u8> {
    let mut body = Vec::new();
    if !revocation.crl.is_empty() {
        let crls: Vec<u8> = revocation.crl.iter().flat_map(|c| c.iter().copied()).collect();
        body.extend_from_slice(&der::context(0, &der::tlv(constants::TAG_SEQUENCE, &crls)));
    }
    if !revocation.ocsp.is_empty() {
        let ocsps: Vec<u8> = revocation.ocsp.iter().flat_map(|o| o.iter().copied()).collect();
        body.extend_from_slice(&der::context(1, &der::tlv(constants::TAG_SEQUENCE, &ocsps)));
    }
    der::tlv(constants::TAG_SEQUENCE, &body)
}

/// Encode a time value: UTCTime up to 2049, GeneralizedTime beyond.
pub fn encode_der_time(datetime: OffsetDateTime) -> Vec<u8> {
    let utc = datetime.to_offset(time::UtcOffset::UTC);
    if utc.year() < 2050 {
        let text = format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            utc.year() % 100,
            utc.month() as u8,
            utc.day(),
            utc.hour(),
            utc.minute(),
            utc.second()
        );
        der::tlv(constants::TAG_UTC_TIME, text.as_bytes())
    } else {
        let text = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}Z",
            utc.year(),
            utc.month() as u8,
            utc.day(),
            utc.hour(),
            utc.minute(),
            utc.second()
        );
        der::tlv(constants::TAG_GENERALIZED_TIME, text.as_bytes())
    }
}

/// Decode a UTCTime or GeneralizedTime content string.
pub fn parse_der_time(tag: u8, content: &[u8]) -> SignResult<OffsetDateTime> {
    let text = std::str::from_utf8(content)
        .map_err(|_| SignError::Asn1Error("time value is not ASCII".to_string()))?;

    let (year, rest) = match tag {
        constants::TAG_UTC_TIME => {
            let two: i32 = text
                .get(0..2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SignError::Asn1Error(format!("bad UTCTime {text}")))?;
            let year = if two >= 50 { 1900 + two } else { 2000 + two };
            (year, text.get(2..).unwrap_or(""))
        }
        constants::TAG_GENERALIZED_TIME => {
            let four: i32 = text
                .get(0..4)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SignError::Asn1Error(format!("bad GeneralizedTime {text}")))?;
            (four, text.get(4..).unwrap_or(""))
        }
        other => {
            return Err(SignError::Asn1Error(format!(
                "unexpected time tag 0x{other:02x}"
            )))
        }
    };

    let field = |range: std::ops::Range<usize>| -> SignResult<u8> {
        rest.get(range.clone())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SignError::Asn1Error(format!("truncated time value {text}")))
    };

    let month = Month::try_from(field(0..2)?)
        .map_err(|_| SignError::Asn1Error(format!("bad month in {text}")))?;
    let date = Date::from_calendar_date(year, month, field(2..4)?)
        .map_err(|_| SignError::Asn1Error(format!("bad date in {text}")))?;
    let seconds = if rest.len() >= 10 { field(8..10)? } else { 0 };
    let clock = Time::from_hms(field(4..6)?, field(6..8)?, seconds)
        .map_err(|_| SignError::Asn1Error(format!("bad time of day in {text}")))?;

    Ok(PrimitiveDateTime::new(date, clock).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::der::DerReader;
    use time::macros::datetime;

    fn params<'a>(digest: &'a [u8], cert: &'a [u8]) -> AttributeParams<'a> {
        AttributeParams {
            message_digest: digest,
            signing_time: datetime!(2025-06-01 12:00:00 UTC),
            signer_cert_der: cert,
            revocation: None,
        }
    }

    #[test]
    fn attributes_are_sorted_set_of() {
        let encoded = build_signed_attributes(&params(&[0xab; 32], b"cert"));
        let signed = encoded.signed_form();

        let mut reader = DerReader::new(&signed);
        let set = reader.expect(0x31).unwrap();

        let mut previous: Option<Vec<u8>> = None;
        let mut inner = set.reader();
        let mut count = 0;
        while !inner.is_empty() {
            let attr = inner.expect(0x30).unwrap();
            if let Some(prev) = &previous {
                assert!(prev.as_slice() <= attr.raw, "attributes not in DER order");
            }
            previous = Some(attr.raw.to_vec());
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn both_framings_share_content() {
        let encoded = build_signed_attributes(&params(&[1; 32], b"cert"));
        let implicit = encoded.implicit_block();
        let signed = encoded.signed_form();
        assert_eq!(implicit[0], 0xa0);
        assert_eq!(signed[0], 0x31);
        assert_eq!(implicit[1..], signed[1..]);
    }

    #[test]
    fn revocation_embedding_is_idempotent() {
        let archival = RevocationArchival {
            ocsp: vec![vec![0x30, 0x03, 0x02, 0x01, 0x00]],
            crl: vec![],
        };
        let build = |archival: &RevocationArchival| {
            build_signed_attributes(&AttributeParams {
                message_digest: &[7; 32],
                signing_time: datetime!(2025-06-01 12:00:00 UTC),
                signer_cert_der: b"cert",
                revocation: Some(archival),
            })
            .signed_form()
        };
        assert_eq!(build(&archival), build(&archival.clone()));
    }

    #[test]
    fn utc_time_round_trip() {
        let when = datetime!(2031-12-24 23:59:59 UTC);
        let encoded = encode_der_time(when);
        assert_eq!(encoded[0], constants::TAG_UTC_TIME);
        let decoded = parse_der_time(encoded[0], &encoded[2..]).unwrap();
        assert_eq!(decoded, when);
    }

    #[test]
    fn generalized_time_round_trip() {
        let when = datetime!(2052-01-02 03:04:05 UTC);
        let encoded = encode_der_time(when);
        assert_eq!(encoded[0], constants::TAG_GENERALIZED_TIME);
        let decoded = parse_der_time(encoded[0], &encoded[2..]).unwrap();
        assert_eq!(decoded, when);
    }
}
