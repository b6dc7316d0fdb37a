//! CMS verification: digest check, signature check, token check.
//!
//! Nothing here fails fast; each check lands in a flag or a warning so the
//! pipeline can assemble a complete verdict.

use crate::domain::cms::{normalize_serial, ParsedSignedData};
use crate::domain::crypto::{digest_byte_ranges, DigestAlgorithm};
use crate::domain::tsp::{self, TstInfo};
use crate::infra::error::SignResult;
use openssl::x509::X509;

/// Outcome of checking one CMS against the file bytes.
pub struct CmsCheck {
    /// message-digest attribute equals the recomputed ByteRange digest
    pub digest_matches: bool,
    /// signer's signature over the signed attributes verifies
    pub signature_valid: bool,
    /// every certificate embedded in the CMS, parsed
    pub certificates: Vec<X509>,
    /// the certificate matching the SignerInfo issuer+serial
    pub signer_cert: Option<X509>,
    pub warnings: Vec<String>,
}

impl CmsCheck {
    pub fn valid_signature(&self) -> bool {
        self.digest_matches && self.signature_valid
    }
}

/// Match a SignerInfo's issuerAndSerialNumber against a certificate pool.
pub fn find_signer_cert(certificates: &[X509], issuer_der: &[u8], serial: &[u8]) -> Option<X509> {
    let wanted_serial = normalize_serial(serial);
    certificates.iter().find_map(|cert| {
        let issuer = cert.issuer_name().to_der().ok()?;
        if issuer != issuer_der {
            return None;
        }
        let cert_serial = cert.serial_number().to_bn().ok()?.to_vec();
        let cert_serial = if cert_serial.is_empty() {
            vec![0]
        } else {
            cert_serial
        };
        (cert_serial == wanted_serial).then(|| cert.clone())
    })
}

/// Parse the certificate pool, warning on (not failing over) bad entries.
pub fn parse_certificates(parsed: &ParsedSignedData, warnings: &mut Vec<String>) -> Vec<X509> {
    let mut certificates = Vec::new();
    for (index, der) in parsed.certificates_der.iter().enumerate() {
        match X509::from_der(der) {
            Ok(cert) => certificates.push(cert),
            Err(e) => warnings.push(format!("certificate {index} does not parse: {e}")),
        }
    }
    certificates
}

/// Verify a detached CMS against the two ByteRange spans of `file`.
pub fn verify_cms(
    parsed: &ParsedSignedData,
    file: &[u8],
    ranges: &[(usize, usize); 2],
) -> SignResult<CmsCheck> {
    let mut warnings = Vec::new();

    let certificates = parse_certificates(parsed, &mut warnings);
    let signer_cert = find_signer_cert(
        &certificates,
        &parsed.signer.issuer_der,
        &parsed.signer.serial,
    );
    if signer_cert.is_none() {
        warnings.push("signer certificate not present in the CMS".to_string());
    }

    let digest_matches = match DigestAlgorithm::from_oid(&parsed.signer.digest_algorithm_oid) {
        Ok(algorithm) => {
            let recomputed = digest_byte_ranges(algorithm, file, ranges)?;
            match parsed.signer.message_digest() {
                Some(claimed) => {
                    let matches = claimed == recomputed;
                    if !matches {
                        warnings.push("message-digest does not match the ByteRange digest".to_string());
                    }
                    matches
                }
                None => {
                    warnings.push("SignerInfo carries no message-digest attribute".to_string());
                    false
                }
            }
        }
        Err(e) => {
            warnings.push(format!("digest algorithm rejected: {e}"));
            false
        }
    };

    let signature_valid = check_signature(parsed, signer_cert.as_ref(), &mut warnings);

    Ok(CmsCheck {
        digest_matches,
        signature_valid,
        certificates,
        signer_cert,
        warnings,
    })
}

fn check_signature(
    parsed: &ParsedSignedData,
    signer_cert: Option<&X509>,
    warnings: &mut Vec<String>,
) -> bool {
    let Some(cert) = signer_cert else {
        return false;
    };
    let Some(signed_attrs) = parsed.signer.signed_attrs_set_form() else {
        warnings.push("SignerInfo has no signed attributes".to_string());
        return false;
    };
    let algorithm = match DigestAlgorithm::from_oid(&parsed.signer.digest_algorithm_oid) {
        Ok(algorithm) => algorithm,
        Err(_) => return false,
    };

    let result = cert.public_key().and_then(|public| {
        let mut verifier = openssl::sign::Verifier::new(algorithm.message_digest(), &public)?;
        verifier.verify_oneshot(&parsed.signer.signature, &signed_attrs)
    });
    match result {
        Ok(true) => true,
        Ok(false) => {
            warnings.push("signature over the signed attributes does not verify".to_string());
            false
        }
        Err(e) => {
            warnings.push(format!("signature verification errored: {e}"));
            false
        }
    }
}

/// Outcome of checking an RFC 3161 token.
pub struct TokenCheck {
    pub valid: bool,
    pub tst_info: Option<TstInfo>,
    pub certificates: Vec<X509>,
    pub signer_cert: Option<X509>,
    pub warnings: Vec<String>,
}

/// What the token's MessageImprint is checked against.
pub enum ImprintSource<'a> {
    /// The signer's signature octets (signature timestamps).
    Octets(&'a [u8]),
    /// The two ByteRange spans of the file (document timestamps).
    Document {
        file: &'a [u8],
        ranges: &'a [(usize, usize); 2],
    },
}

/// Verify a TimeStampToken: imprint over the covered bytes, message-digest
/// over the TSTInfo, and the TSA's signature over its signed attributes.
pub fn verify_timestamp_token(token: &[u8], imprint: ImprintSource<'_>) -> TokenCheck {
    let mut warnings = Vec::new();

    let parsed = match crate::domain::cms::parse_signed_data(token) {
        Ok(parsed) => parsed,
        Err(e) => {
            return TokenCheck {
                valid: false,
                tst_info: None,
                certificates: Vec::new(),
                signer_cert: None,
                warnings: vec![format!("timestamp token does not parse: {e}")],
            }
        }
    };

    let imprint_result = match imprint {
        ImprintSource::Octets(octets) => tsp::verify_token_imprint(token, octets),
        ImprintSource::Document { file, ranges } => tsp::parse_tst_info_from_token(token)
            .and_then(|info| {
                let algorithm = DigestAlgorithm::from_oid(&info.imprint_algorithm_oid)?;
                let digest = digest_byte_ranges(algorithm, file, ranges)?;
                tsp::verify_token_imprint_prehashed(token, &digest)
            }),
    };
    let tst_info = match imprint_result {
        Ok(info) => Some(info),
        Err(e) => {
            warnings.push(e.to_string());
            None
        }
    };

    let certificates = parse_certificates(&parsed, &mut warnings);
    let signer_cert = find_signer_cert(
        &certificates,
        &parsed.signer.issuer_der,
        &parsed.signer.serial,
    );
    if signer_cert.is_none() {
        warnings.push("TSA certificate not present in the token".to_string());
    }

    // the token's message-digest attribute covers the encapsulated TSTInfo
    let econtent_ok = match (&parsed.econtent, parsed.signer.message_digest()) {
        (Some(econtent), Some(claimed)) => {
            match DigestAlgorithm::from_oid(&parsed.signer.digest_algorithm_oid) {
                Ok(algorithm) => {
                    let matches = algorithm.digest(econtent) == claimed;
                    if !matches {
                        warnings.push(
                            "token message-digest does not cover the TSTInfo".to_string(),
                        );
                    }
                    matches
                }
                Err(e) => {
                    warnings.push(format!("token digest algorithm rejected: {e}"));
                    false
                }
            }
        }
        _ => {
            warnings.push("token lacks TSTInfo content or message-digest".to_string());
            false
        }
    };

    let signature_valid = check_signature(&parsed, signer_cert.as_ref(), &mut warnings);

    TokenCheck {
        valid: tst_info.is_some() && econtent_ok && signature_valid,
        tst_info,
        certificates,
        signer_cert,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cms::parse_signed_data;
    use crate::domain::crypto::PKeySigner;
    use crate::services::cms_builder::CmsSigner;
    use crate::testutil::{self_signed_cert, test_key};
    use time::macros::datetime;

    fn build_over(file: &[u8], ranges: &[(usize, usize); 2]) -> (Vec<u8>, X509) {
        let pkey = test_key();
        let cert = self_signed_cert(&pkey, "Verifier Test");
        let signer = PKeySigner::new(pkey).unwrap();

        let digest = digest_byte_ranges(DigestAlgorithm::Sha256, file, ranges).unwrap();
        let builder = CmsSigner::new(DigestAlgorithm::Sha256, &cert, &[]);
        let signed = builder
            .sign_attributes(&signer, &digest, datetime!(2025-06-01 12:00:00 UTC), None)
            .unwrap();
        (signed.assemble(None).unwrap(), cert)
    }

    #[test]
    fn valid_cms_passes_both_checks() {
        let file = b"0123456789abcdefghij".to_vec();
        let ranges = [(0usize, 5usize), (10, 10)];
        let (cms, cert) = build_over(&file, &ranges);

        let parsed = parse_signed_data(&cms).unwrap();
        let check = verify_cms(&parsed, &file, &ranges).unwrap();
        assert!(check.digest_matches);
        assert!(check.signature_valid);
        assert!(check.valid_signature());
        assert_eq!(
            check.signer_cert.unwrap().to_der().unwrap(),
            cert.to_der().unwrap()
        );
    }

    #[test]
    fn altered_file_fails_digest_only() {
        let file = b"0123456789abcdefghij".to_vec();
        let ranges = [(0usize, 5usize), (10, 10)];
        let (cms, _cert) = build_over(&file, &ranges);

        let mut tampered = file.clone();
        tampered[0] = b'X';
        let parsed = parse_signed_data(&cms).unwrap();
        let check = verify_cms(&parsed, &tampered, &ranges).unwrap();
        assert!(!check.digest_matches);
        // the signature over the attributes still verifies
        assert!(check.signature_valid);
        assert!(!check.valid_signature());
    }

    #[test]
    fn corrupted_signature_fails_signature_check() {
        let file = b"0123456789abcdefghij".to_vec();
        let ranges = [(0usize, 5usize), (10, 10)];
        let (mut cms, _cert) = build_over(&file, &ranges);

        // the signature octets sit near the end of the SignerInfo
        let len = cms.len();
        cms[len - 40] ^= 0xff;
        let parsed = parse_signed_data(&cms).unwrap();
        let check = verify_cms(&parsed, &file, &ranges).unwrap();
        assert!(check.digest_matches);
        assert!(!check.signature_valid);
    }
}
