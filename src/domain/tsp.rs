//! RFC 3161 request/response codec and TSTInfo handling.

use crate::domain::cms::{attributes::parse_der_time, parse_signed_data};
use crate::domain::constants;
use crate::domain::crypto::DigestAlgorithm;
use crate::domain::der::{self, DerReader};
use crate::infra::error::{SignError, SignResult};
use rand::Rng;
use time::OffsetDateTime;

/// PKIStatus values accepted from a TSA.
const PKI_STATUS_GRANTED: i32 = 0;
const PKI_STATUS_GRANTED_WITH_MODS: i32 = 1;

/// Build a TimeStampReq over `message` (the signer's signature octets).
///
/// TimeStampReq ::= SEQUENCE {
///     version        INTEGER { v1(1) },
///     messageImprint MessageImprint,
///     nonce          INTEGER OPTIONAL,
///     certReq        BOOLEAN DEFAULT FALSE }
pub fn build_timestamp_request(digest: DigestAlgorithm, message: &[u8]) -> Vec<u8> {
    build_timestamp_request_prehashed(digest, &digest.digest(message))
}

/// Like [`build_timestamp_request`] but over an already-computed digest.
/// Document timestamps hash the ByteRange spans through the digest driver
/// and imprint that value directly.
pub fn build_timestamp_request_prehashed(
    digest: DigestAlgorithm,
    imprint_digest: &[u8],
) -> Vec<u8> {
    let algorithm = der::sequence(&[&der::oid(digest.oid()), constants::ASN1_NULL]);
    let imprint = der::sequence(&[&algorithm, &der::octet_string(&imprint_digest)]);

    let nonce: [u8; 8] = rand::thread_rng().gen();

    let mut body = Vec::new();
    body.extend_from_slice(&der::integer(&[1]));
    body.extend_from_slice(&imprint);
    body.extend_from_slice(&der::integer(&nonce));
    body.extend_from_slice(&der::boolean(true));
    der::tlv(constants::TAG_SEQUENCE, &body)
}

/// Parse a TimeStampResp; accept granted/grantedWithMods and return the
/// raw TimeStampToken (a ContentInfo).
pub fn parse_timestamp_response(data: &[u8]) -> SignResult<Vec<u8>> {
    let mut top = DerReader::new(data);
    let response = top
        .expect(constants::TAG_SEQUENCE)
        .map_err(|e| SignError::TsaFailure(format!("malformed TimeStampResp: {e}")))?;
    let mut reader = response.reader();

    let status_info = reader
        .expect(constants::TAG_SEQUENCE)
        .map_err(|e| SignError::TsaFailure(format!("malformed PKIStatusInfo: {e}")))?;
    let status_value = status_info
        .reader()
        .expect(constants::TAG_INTEGER)
        .map_err(|e| SignError::TsaFailure(format!("malformed PKIStatus: {e}")))?;
    let status = status_value
        .content
        .iter()
        .fold(0i32, |acc, &b| (acc << 8) | i32::from(b));
    if status != PKI_STATUS_GRANTED && status != PKI_STATUS_GRANTED_WITH_MODS {
        return Err(SignError::TsaFailure(format!(
            "timestamp request not granted (PKIStatus {status})"
        )));
    }

    let token = reader
        .read_optional(constants::TAG_SEQUENCE)?
        .ok_or_else(|| {
            SignError::TsaFailure("granted response carries no TimeStampToken".to_string())
        })?;
    Ok(token.raw.to_vec())
}

/// Decoded TSTInfo fields the verifier cares about.
#[derive(Debug, Clone)]
pub struct TstInfo {
    pub policy: Vec<u8>,
    pub imprint_algorithm_oid: Vec<u8>,
    pub imprint_digest: Vec<u8>,
    pub serial: Vec<u8>,
    pub gen_time: OffsetDateTime,
}

/// Parse the TSTInfo SEQUENCE (the token's encapsulated content).
///
/// TSTInfo ::= SEQUENCE {
///     version INTEGER, policy OID, messageImprint MessageImprint,
///     serialNumber INTEGER, genTime GeneralizedTime, … }
pub fn parse_tst_info(content: &[u8]) -> SignResult<TstInfo> {
    let mut top = DerReader::new(content);
    let tst = top.expect(constants::TAG_SEQUENCE)?;
    let mut reader = tst.reader();

    reader.expect(constants::TAG_INTEGER)?; // version
    let policy = reader.expect(constants::TAG_OID)?.content.to_vec();

    let imprint = reader.expect(constants::TAG_SEQUENCE)?;
    let mut imprint_reader = imprint.reader();
    let imprint_algorithm_oid = imprint_reader
        .expect(constants::TAG_SEQUENCE)?
        .reader()
        .expect(constants::TAG_OID)?
        .content
        .to_vec();
    let imprint_digest = imprint_reader
        .expect(constants::TAG_OCTET_STRING)?
        .content
        .to_vec();

    let serial = reader.expect(constants::TAG_INTEGER)?.content.to_vec();

    let gen_time_tlv = reader.expect(constants::TAG_GENERALIZED_TIME)?;
    let gen_time = parse_der_time(gen_time_tlv.tag, gen_time_tlv.content)?;

    Ok(TstInfo {
        policy,
        imprint_algorithm_oid,
        imprint_digest,
        serial,
        gen_time,
    })
}

/// Extract the TSTInfo from a full TimeStampToken (ContentInfo/SignedData).
pub fn parse_tst_info_from_token(token: &[u8]) -> SignResult<TstInfo> {
    let signed_data = parse_signed_data(token)
        .map_err(|e| SignError::TsaFailure(format!("token is not a SignedData: {e}")))?;
    if signed_data.econtent_type != constants::OID_TST_INFO {
        return Err(SignError::TsaFailure(
            "token content is not a TSTInfo".to_string(),
        ));
    }
    let econtent = signed_data.econtent.ok_or_else(|| {
        SignError::TsaFailure("token carries no encapsulated TSTInfo".to_string())
    })?;
    parse_tst_info(&econtent)
}

/// Check the token's MessageImprint against the bytes it claims to cover.
pub fn verify_token_imprint(token: &[u8], message: &[u8]) -> SignResult<TstInfo> {
    let tst_info = parse_tst_info_from_token(token)?;
    let algorithm = DigestAlgorithm::from_oid(&tst_info.imprint_algorithm_oid)?;
    let expected = algorithm.digest(message);
    if expected != tst_info.imprint_digest {
        return Err(SignError::TsaFailure(
            "MessageImprint does not match the signed octets".to_string(),
        ));
    }
    Ok(tst_info)
}

/// Check the token's MessageImprint against a pre-computed digest.
pub fn verify_token_imprint_prehashed(token: &[u8], digest: &[u8]) -> SignResult<TstInfo> {
    let tst_info = parse_tst_info_from_token(token)?;
    if tst_info.imprint_digest != digest {
        return Err(SignError::TsaFailure(
            "MessageImprint does not match the document digest".to_string(),
        ));
    }
    Ok(tst_info)
}
