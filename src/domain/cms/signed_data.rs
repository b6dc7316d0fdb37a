//! CMS SignedData assembly and parsing.
//!
//! The build side produces the detached SignedData embedded in
//! `/Contents`; the parse side recovers enough structure for granular
//! verification (digest check, signature check, certificate pool,
//! timestamp token) without delegating to an opaque PKCS#7 verify.

use crate::domain::cms::attributes::{parse_der_time, EncodedAttributes, RevocationArchival};
use crate::domain::constants;
use crate::domain::crypto::{DigestAlgorithm, KeyKind};
use crate::domain::der::{self, DerReader};
use crate::infra::error::{SignError, SignResult};
use openssl::x509::X509;
use time::OffsetDateTime;

// ---- build ----------------------------------------------------------------

pub struct SignedDataParams<'a> {
    pub digest: DigestAlgorithm,
    pub key_kind: KeyKind,
    pub signer_cert: &'a X509,
    pub chain: &'a [X509],
    pub signed_attrs: &'a EncodedAttributes,
    pub signature: &'a [u8],
    pub timestamp_token: Option<&'a [u8]>,
}

/// AlgorithmIdentifier; RSA carries NULL parameters, ECDSA omits them.
fn algorithm_identifier(oid: &[u8], with_null: bool) -> Vec<u8> {
    if with_null {
        der::sequence(&[&der::oid(oid), constants::ASN1_NULL])
    } else {
        der::sequence(&[&der::oid(oid)])
    }
}

/// Assemble the outer ContentInfo wrapping a detached SignedData with a
/// single SignerInfo.
pub fn build_signed_data(params: &SignedDataParams<'_>) -> SignResult<Vec<u8>> {
    let issuer_der = params.signer_cert.issuer_name().to_der()?;
    let serial = params.signer_cert.serial_number().to_bn()?.to_vec();
    let issuer_and_serial = der::sequence(&[&issuer_der, &der::integer(&serial)]);

    let digest_alg = algorithm_identifier(params.digest.oid(), true);
    let signature_alg = algorithm_identifier(
        params.key_kind.signature_algorithm_oid(params.digest),
        params.key_kind == KeyKind::Rsa,
    );

    let mut signer_info_content = Vec::new();
    signer_info_content.extend_from_slice(&der::integer(&[1]));
    signer_info_content.extend_from_slice(&issuer_and_serial);
    signer_info_content.extend_from_slice(&digest_alg);
    signer_info_content.extend_from_slice(&params.signed_attrs.implicit_block());
    signer_info_content.extend_from_slice(&signature_alg);
    signer_info_content.extend_from_slice(&der::octet_string(params.signature));
    if let Some(token) = params.timestamp_token {
        let attr = der::sequence(&[
            &der::oid(constants::OID_TIMESTAMP_TOKEN),
            &der::set(token),
        ]);
        signer_info_content.extend_from_slice(&der::tlv(constants::tag_context(1), &attr));
    }
    let signer_info = der::tlv(constants::TAG_SEQUENCE, &signer_info_content);

    let mut certificates = params.signer_cert.to_der()?;
    for cert in params.chain {
        certificates.extend_from_slice(&cert.to_der()?);
    }

    let mut signed_data_content = Vec::new();
    signed_data_content.extend_from_slice(&der::integer(&[1]));
    signed_data_content.extend_from_slice(&der::set(&digest_alg));
    // detached: encapContentInfo has the type but no eContent
    signed_data_content.extend_from_slice(&der::sequence(&[&der::oid(constants::OID_DATA)]));
    signed_data_content.extend_from_slice(&der::tlv(constants::tag_context(0), &certificates));
    signed_data_content.extend_from_slice(&der::set(&signer_info));
    let signed_data = der::tlv(constants::TAG_SEQUENCE, &signed_data_content);

    Ok(der::sequence(&[
        &der::oid(constants::OID_SIGNED_DATA),
        &der::context(0, &signed_data),
    ]))
}

// ---- parse ----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ParsedAttribute {
    pub oid: Vec<u8>,
    /// Content octets of the `SET OF AttributeValue`
    pub values_raw: Vec<u8>,
}

impl ParsedAttribute {
    /// Raw encoding of the first attribute value.
    pub fn first_value(&self) -> SignResult<der::Tlv<'_>> {
        DerReader::new(&self.values_raw).read()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedSignerInfo {
    pub issuer_der: Vec<u8>,
    /// INTEGER content octets of the serial number
    pub serial: Vec<u8>,
    pub digest_algorithm_oid: Vec<u8>,
    pub signature_algorithm_oid: Vec<u8>,
    pub signature: Vec<u8>,
    /// Content of the `[0] IMPLICIT` signed-attribute block, when present
    pub signed_attrs_content: Option<Vec<u8>>,
    pub signed_attrs: Vec<ParsedAttribute>,
    pub unsigned_attrs: Vec<ParsedAttribute>,
}

impl ParsedSignerInfo {
    pub fn find_signed_attr(&self, oid: &[u8]) -> Option<&ParsedAttribute> {
        self.signed_attrs.iter().find(|a| a.oid == oid)
    }

    pub fn find_unsigned_attr(&self, oid: &[u8]) -> Option<&ParsedAttribute> {
        self.unsigned_attrs.iter().find(|a| a.oid == oid)
    }

    /// The `message-digest` attribute value.
    pub fn message_digest(&self) -> Option<Vec<u8>> {
        let attr = self.find_signed_attr(constants::OID_MESSAGE_DIGEST)?;
        let value = attr.first_value().ok()?;
        (value.tag == constants::TAG_OCTET_STRING).then(|| value.content.to_vec())
    }

    /// Signer-claimed `signing-time`, untrusted by itself.
    pub fn signing_time(&self) -> Option<OffsetDateTime> {
        let attr = self.find_signed_attr(constants::OID_SIGNING_TIME)?;
        let value = attr.first_value().ok()?;
        parse_der_time(value.tag, value.content).ok()
    }

    /// RFC 3161 token from the unsigned attributes, when present.
    pub fn timestamp_token(&self) -> Option<Vec<u8>> {
        let attr = self.find_unsigned_attr(constants::OID_TIMESTAMP_TOKEN)?;
        attr.first_value().ok().map(|v| v.raw.to_vec())
    }

    /// Embedded `adbe-revocationInfoArchival` material, when present.
    pub fn revocation_archival(&self) -> Option<RevocationArchival> {
        let attr = self.find_signed_attr(constants::OID_ADBE_REVOCATION_ARCHIVAL)?;
        let value = attr.first_value().ok()?;
        if value.tag != constants::TAG_SEQUENCE {
            return None;
        }

        let mut archival = RevocationArchival::default();
        let mut reader = value.reader();
        while let Some(tag) = reader.peek_tag() {
            let element = reader.read().ok()?;
            let slot = match tag {
                t if t == constants::tag_context(0) => &mut archival.crl,
                t if t == constants::tag_context(1) => &mut archival.ocsp,
                _ => continue,
            };
            let mut list = element.reader();
            let seq = list.read_optional(constants::TAG_SEQUENCE).ok()??;
            let mut items = seq.reader();
            while !items.is_empty() {
                slot.push(items.read().ok()?.raw.to_vec());
            }
        }
        Some(archival)
    }

    /// Signed attributes re-framed as `SET OF` — the signature input.
    pub fn signed_attrs_set_form(&self) -> Option<Vec<u8>> {
        self.signed_attrs_content
            .as_ref()
            .map(|content| der::tlv(constants::TAG_SET, content))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedSignedData {
    pub digest_algorithm_oid: Vec<u8>,
    pub econtent_type: Vec<u8>,
    /// Encapsulated content octets (timestamp tokens carry TSTInfo here;
    /// detached PDF signatures carry nothing)
    pub econtent: Option<Vec<u8>>,
    pub certificates_der: Vec<Vec<u8>>,
    pub signer: ParsedSignerInfo,
    /// Length of the outermost DER element; `/Contents` zero padding
    /// starts after this.
    pub der_len: usize,
}

/// Parse a ContentInfo(SignedData). Trailing bytes beyond the outer TLV
/// (placeholder padding) are ignored.
pub fn parse_signed_data(data: &[u8]) -> SignResult<ParsedSignedData> {
    let der_len = der::outer_tlv_len(data)?;

    let mut top = DerReader::new(&data[..der_len]);
    let content_info = top.expect(constants::TAG_SEQUENCE)?;
    let mut ci = content_info.reader();

    let content_type = ci.expect(constants::TAG_OID)?;
    if content_type.content != constants::OID_SIGNED_DATA {
        return Err(SignError::Pkcs7Error(format!(
            "not a SignedData ContentInfo (type {})",
            hex::encode(content_type.content)
        )));
    }
    let wrapper = ci.expect(constants::tag_context(0))?;
    let signed_data = wrapper.reader().expect(constants::TAG_SEQUENCE)?;
    let mut sd = signed_data.reader();

    sd.expect(constants::TAG_INTEGER)?; // version

    let digest_algorithms = sd.expect(constants::TAG_SET)?;
    let digest_algorithm_oid = digest_algorithms
        .reader()
        .expect(constants::TAG_SEQUENCE)?
        .reader()
        .expect(constants::TAG_OID)?
        .content
        .to_vec();

    let encap = sd.expect(constants::TAG_SEQUENCE)?;
    let mut encap_reader = encap.reader();
    let econtent_type = encap_reader.expect(constants::TAG_OID)?.content.to_vec();
    let econtent = match encap_reader.read_optional(constants::tag_context(0))? {
        Some(wrapper) => {
            let inner = wrapper.reader().expect(constants::TAG_OCTET_STRING)?;
            Some(inner.content.to_vec())
        }
        None => None,
    };

    let mut certificates_der = Vec::new();
    if let Some(certs) = sd.read_optional(constants::tag_context(0))? {
        let mut list = certs.reader();
        while !list.is_empty() {
            certificates_der.push(list.read()?.raw.to_vec());
        }
    }
    sd.read_optional(constants::tag_context(1))?; // crls, unused here

    let signer_infos = sd.expect(constants::TAG_SET)?;
    let signer_info = signer_infos.reader().expect(constants::TAG_SEQUENCE)?;
    let signer = parse_signer_info(&signer_info)?;

    Ok(ParsedSignedData {
        digest_algorithm_oid,
        econtent_type,
        econtent,
        certificates_der,
        signer,
        der_len,
    })
}

fn parse_signer_info(signer_info: &der::Tlv<'_>) -> SignResult<ParsedSignerInfo> {
    let mut si = signer_info.reader();

    si.expect(constants::TAG_INTEGER)?; // version

    let issuer_and_serial = si.expect(constants::TAG_SEQUENCE)?;
    let mut ias = issuer_and_serial.reader();
    let issuer_der = ias.read()?.raw.to_vec();
    let serial = ias.expect(constants::TAG_INTEGER)?.content.to_vec();

    let digest_algorithm_oid = si
        .expect(constants::TAG_SEQUENCE)?
        .reader()
        .expect(constants::TAG_OID)?
        .content
        .to_vec();

    let signed_attrs_content = si
        .read_optional(constants::tag_context(0))?
        .map(|block| block.content.to_vec());

    let signature_algorithm_oid = si
        .expect(constants::TAG_SEQUENCE)?
        .reader()
        .expect(constants::TAG_OID)?
        .content
        .to_vec();

    let signature = si.expect(constants::TAG_OCTET_STRING)?.content.to_vec();

    let unsigned_attrs = match si.read_optional(constants::tag_context(1))? {
        Some(block) => parse_attribute_list(block.content)?,
        None => Vec::new(),
    };
    let signed_attrs = match &signed_attrs_content {
        Some(content) => parse_attribute_list(content)?,
        None => Vec::new(),
    };

    Ok(ParsedSignerInfo {
        issuer_der,
        serial,
        digest_algorithm_oid,
        signature_algorithm_oid,
        signature,
        signed_attrs_content,
        signed_attrs,
        unsigned_attrs,
    })
}

fn parse_attribute_list(content: &[u8]) -> SignResult<Vec<ParsedAttribute>> {
    let mut attributes = Vec::new();
    let mut reader = DerReader::new(content);
    while !reader.is_empty() {
        let attribute = reader.expect(constants::TAG_SEQUENCE)?;
        let mut attr_reader = attribute.reader();
        let oid = attr_reader.expect(constants::TAG_OID)?.content.to_vec();
        let values = attr_reader.expect(constants::TAG_SET)?;
        attributes.push(ParsedAttribute {
            oid,
            values_raw: values.content.to_vec(),
        });
    }
    Ok(attributes)
}

/// Strip leading zero octets so INTEGER content compares with BN bytes.
pub fn normalize_serial(serial: &[u8]) -> &[u8] {
    let mut bytes = serial;
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes = &bytes[1..];
    }
    bytes
}
