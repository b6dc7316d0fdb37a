//! Revocation evaluation: embedded evidence first, then optional external
//! OCSP/CRL lookups. External failures are warnings on the certificate's
//! slot, never operation-level errors.

use crate::domain::cms::RevocationArchival;
use crate::domain::verification::VerifyOptions;
use der::Decode;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspCertStatus, OcspResponse, OcspResponseStatus};
use openssl::x509::{X509Crl, X509};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{AuthorityInfoAccessSyntax, CrlDistributionPoints};

use crate::domain::constants;

pub const WARN_EXTERNAL_DISABLED: &str = "external revocation checking is disabled";
pub const WARN_NO_OCSP_URLS: &str = "certificate has no OCSP server URLs";
pub const WARN_NO_CRL_URLS: &str = "certificate has no CRL distribution points";

/// One external lookup category (OCSP or CRL).
#[derive(Debug, Clone, Default)]
pub struct ExternalCheck {
    pub checked: bool,
    pub valid: bool,
    pub warning: Option<String>,
}

/// Everything revocation knows about one certificate.
#[derive(Debug, Clone, Default)]
pub struct CertRevocationOutcome {
    pub ocsp_embedded: bool,
    pub crl_embedded: bool,
    pub ocsp_external: ExternalCheck,
    pub crl_external: ExternalCheck,
    pub revoked: bool,
    pub revocation_time: Option<OffsetDateTime>,
    pub warnings: Vec<String>,
}

impl CertRevocationOutcome {
    fn record_revocation(&mut self, revocation_time: Option<OffsetDateTime>) {
        self.revoked = true;
        if self.revocation_time.is_none() {
            self.revocation_time = revocation_time;
        }
    }
}

pub struct RevocationEvaluator<'a> {
    options: &'a VerifyOptions,
    client: Option<reqwest::Client>,
}

impl<'a> RevocationEvaluator<'a> {
    pub fn new(options: &'a VerifyOptions) -> Self {
        let client = if options.enable_external_revocation_check {
            match options.http_client.clone() {
                Some(client) => Some(client),
                None => match options.http.build_client() {
                    Ok(client) => Some(client),
                    Err(e) => {
                        log::warn!("HTTP client unavailable for revocation checks: {e}");
                        None
                    }
                },
            }
        } else {
            None
        };
        Self { options, client }
    }

    /// Evaluate one certificate. `issuer` is needed for OCSP cert ids and
    /// CRL issuer matching; without it only CRL-by-serial applies.
    pub async fn evaluate(
        &self,
        cert: &X509,
        issuer: Option<&X509>,
        embedded: Option<&RevocationArchival>,
    ) -> CertRevocationOutcome {
        let mut outcome = CertRevocationOutcome::default();

        if let Some(archival) = embedded {
            self.check_embedded_ocsp(cert, issuer, archival, &mut outcome);
            self.check_embedded_crl(cert, archival, &mut outcome);
        }

        let ocsp_external = self.external_ocsp(cert, issuer, &mut outcome).await;
        outcome.ocsp_external = ocsp_external;
        let crl_external = self.external_crl(cert, &mut outcome).await;
        outcome.crl_external = crl_external;
        outcome
    }

    fn check_embedded_ocsp(
        &self,
        cert: &X509,
        issuer: Option<&X509>,
        archival: &RevocationArchival,
        outcome: &mut CertRevocationOutcome,
    ) {
        let Some(issuer) = issuer else {
            if !archival.ocsp.is_empty() {
                outcome
                    .warnings
                    .push("embedded OCSP present but the issuer is unknown".to_string());
            }
            return;
        };
        let cert_id = match OcspCertId::from_cert(MessageDigest::sha1(), cert, issuer) {
            Ok(id) => id,
            Err(e) => {
                outcome.warnings.push(format!("cannot build OCSP cert id: {e}"));
                return;
            }
        };

        for der in &archival.ocsp {
            let response = match OcspResponse::from_der(der) {
                Ok(response) => response,
                Err(e) => {
                    outcome
                        .warnings
                        .push(format!("embedded OCSP response does not parse: {e}"));
                    continue;
                }
            };
            if response.status() != OcspResponseStatus::SUCCESSFUL {
                continue;
            }
            let basic = match response.basic() {
                Ok(basic) => basic,
                Err(_) => continue,
            };
            if let Some(status) = basic.find_status(&cert_id) {
                outcome.ocsp_embedded = true;
                if status.status == OcspCertStatus::REVOKED {
                    let when = status
                        .revocation_time
                        .and_then(|t| parse_openssl_time(&t.to_string()));
                    outcome.record_revocation(when);
                }
            }
        }
    }

    fn check_embedded_crl(
        &self,
        cert: &X509,
        archival: &RevocationArchival,
        outcome: &mut CertRevocationOutcome,
    ) {
        for der in &archival.crl {
            let crl = match X509Crl::from_der(der) {
                Ok(crl) => crl,
                Err(e) => {
                    outcome
                        .warnings
                        .push(format!("embedded CRL does not parse: {e}"));
                    continue;
                }
            };
            let issuer_matches = crl.issuer_name().to_der().ok()
                == cert.issuer_name().to_der().ok();
            if !issuer_matches {
                continue;
            }
            outcome.crl_embedded = true;
            self.apply_crl_lookup(&crl, cert, outcome);
        }
    }

    fn apply_crl_lookup(&self, crl: &X509Crl, cert: &X509, outcome: &mut CertRevocationOutcome) {
        use openssl::x509::CrlStatus;
        match crl.get_by_serial(cert.serial_number()) {
            CrlStatus::Revoked(revoked) | CrlStatus::RemoveFromCrl(revoked) => {
                let when = asn1_time_to_datetime(revoked.revocation_date());
                outcome.record_revocation(when);
            }
            CrlStatus::NotRevoked => {}
        }
    }

    async fn external_ocsp(
        &self,
        cert: &X509,
        issuer: Option<&X509>,
        outcome: &mut CertRevocationOutcome,
    ) -> ExternalCheck {
        let mut check = ExternalCheck {
            checked: true,
            ..Default::default()
        };
        if !self.options.enable_external_revocation_check {
            check.warning = Some(WARN_EXTERNAL_DISABLED.to_string());
            return check;
        }

        let urls = ocsp_urls(cert);
        if urls.is_empty() {
            check.warning = Some(WARN_NO_OCSP_URLS.to_string());
            return check;
        }
        let Some(issuer) = issuer else {
            check.warning = Some("issuer unavailable for OCSP request".to_string());
            return check;
        };
        let Some(client) = &self.client else {
            check.warning = Some("HTTP client unavailable".to_string());
            return check;
        };

        let request_der = match build_ocsp_request(cert, issuer) {
            Ok(der) => der,
            Err(e) => {
                check.warning = Some(format!("failed to create OCSP request: {e}"));
                return check;
            }
        };

        let mut last_error = None;
        for url in &urls {
            let response = client
                .post(url)
                .header("Content-Type", "application/ocsp-request")
                .body(request_der.clone())
                .send()
                .await;
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("failed to contact OCSP server {url}: {e}"));
                    continue;
                }
            };
            if !response.status().is_success() {
                last_error = Some(format!(
                    "OCSP server {url} returned status {}",
                    response.status().as_u16()
                ));
                continue;
            }
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(format!("failed to read OCSP response from {url}: {e}"));
                    continue;
                }
            };

            match self.read_ocsp_response(&body, cert, issuer, outcome) {
                Ok(()) => {
                    check.valid = true;
                    return check;
                }
                Err(message) => last_error = Some(format!("{url}: {message}")),
            }
        }

        check.warning = Some(
            last_error
                .unwrap_or_else(|| "failed to retrieve OCSP response from all servers".to_string()),
        );
        check
    }

    fn read_ocsp_response(
        &self,
        body: &[u8],
        cert: &X509,
        issuer: &X509,
        outcome: &mut CertRevocationOutcome,
    ) -> Result<(), String> {
        let response = OcspResponse::from_der(body)
            .map_err(|e| format!("failed to parse OCSP response: {e}"))?;
        if response.status() != OcspResponseStatus::SUCCESSFUL {
            return Err(format!("OCSP responder status {:?}", response.status()));
        }
        let basic = response
            .basic()
            .map_err(|e| format!("OCSP response has no basic data: {e}"))?;
        let cert_id = OcspCertId::from_cert(MessageDigest::sha1(), cert, issuer)
            .map_err(|e| format!("cannot build OCSP cert id: {e}"))?;
        let status = basic
            .find_status(&cert_id)
            .ok_or_else(|| "OCSP response does not cover the certificate".to_string())?;
        if status.status == OcspCertStatus::REVOKED {
            let when = status
                .revocation_time
                .and_then(|t| parse_openssl_time(&t.to_string()));
            outcome.record_revocation(when);
        }
        Ok(())
    }

    async fn external_crl(
        &self,
        cert: &X509,
        outcome: &mut CertRevocationOutcome,
    ) -> ExternalCheck {
        let mut check = ExternalCheck {
            checked: true,
            ..Default::default()
        };
        if !self.options.enable_external_revocation_check {
            check.warning = Some(WARN_EXTERNAL_DISABLED.to_string());
            return check;
        }

        let urls = crl_urls(cert);
        if urls.is_empty() {
            check.warning = Some(WARN_NO_CRL_URLS.to_string());
            return check;
        }
        let Some(client) = &self.client else {
            check.warning = Some("HTTP client unavailable".to_string());
            return check;
        };

        let mut last_error = None;
        for url in &urls {
            let response = match client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("failed to download CRL from {url}: {e}"));
                    continue;
                }
            };
            if !response.status().is_success() {
                last_error = Some(format!(
                    "CRL server {url} returned status {}",
                    response.status().as_u16()
                ));
                continue;
            }
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(format!("failed to read CRL from {url}: {e}"));
                    continue;
                }
            };
            let crl = match X509Crl::from_der(&body) {
                Ok(crl) => crl,
                Err(e) => {
                    last_error = Some(format!("failed to parse CRL from {url}: {e}"));
                    continue;
                }
            };

            check.valid = true;
            self.apply_crl_lookup(&crl, cert, outcome);
            return check;
        }

        check.warning = Some(
            last_error.unwrap_or_else(|| {
                "failed to retrieve CRL from all distribution points".to_string()
            }),
        );
        check
    }
}

/// Build an unsigned OCSPRequest for one certificate.
///
/// OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest }
/// TBSRequest  ::= SEQUENCE { requestList SEQUENCE OF Request }
/// Request     ::= SEQUENCE { reqCert CertID }
/// CertID      ::= SEQUENCE { hashAlgorithm, issuerNameHash, issuerKeyHash,
///                            serialNumber }
///
/// Responders conventionally expect SHA-1 CertID hashes (RFC 6960 §4.1).
fn build_ocsp_request(cert: &X509, issuer: &X509) -> crate::infra::error::SignResult<Vec<u8>> {
    use crate::domain::der as derw;

    let issuer_name_hash =
        openssl::hash::hash(MessageDigest::sha1(), &issuer.subject_name().to_der()?)?;

    let issuer_der = issuer.to_der()?;
    let issuer_parsed = x509_cert::Certificate::from_der(&issuer_der)?;
    let issuer_key_hash = openssl::hash::hash(
        MessageDigest::sha1(),
        issuer_parsed
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes(),
    )?;

    let serial = cert.serial_number().to_bn()?.to_vec();

    let algorithm = derw::sequence(&[&derw::oid(constants::OID_SHA1), constants::ASN1_NULL]);
    let cert_id = derw::sequence(&[
        &algorithm,
        &derw::octet_string(&issuer_name_hash),
        &derw::octet_string(&issuer_key_hash),
        &derw::integer(&serial),
    ]);
    let request = derw::sequence(&[&cert_id]);
    let request_list = derw::sequence(&[&request]);
    let tbs_request = derw::sequence(&[&request_list]);
    Ok(derw::sequence(&[&tbs_request]))
}

/// OCSP responder URLs from the Authority Information Access extension.
pub fn ocsp_urls(cert: &X509) -> Vec<String> {
    extension_value(cert, |ext_der| {
        let aia = AuthorityInfoAccessSyntax::from_der(ext_der).ok()?;
        Some(
            aia.0
                .into_iter()
                .filter(|access| access.access_method == constants::OID_AD_OCSP)
                .filter_map(|access| match access.access_location {
                    GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                    _ => None,
                })
                .collect(),
        )
    }, constants::OID_EXT_AUTHORITY_INFO_ACCESS)
}

/// CRL distribution point URLs.
pub fn crl_urls(cert: &X509) -> Vec<String> {
    extension_value(cert, |ext_der| {
        let points = CrlDistributionPoints::from_der(ext_der).ok()?;
        Some(
            points
                .0
                .into_iter()
                .filter_map(|point| point.distribution_point)
                .filter_map(|name| match name {
                    DistributionPointName::FullName(names) => Some(names),
                    DistributionPointName::NameRelativeToCRLIssuer(_) => None,
                })
                .flatten()
                .filter_map(|name| match name {
                    GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                    _ => None,
                })
                .collect(),
        )
    }, constants::OID_EXT_CRL_DISTRIBUTION_POINTS)
}

fn extension_value<F>(cert: &X509, parse: F, oid: der::oid::ObjectIdentifier) -> Vec<String>
where
    F: Fn(&[u8]) -> Option<Vec<String>>,
{
    let Ok(der) = cert.to_der() else {
        return Vec::new();
    };
    let Ok(parsed) = x509_cert::Certificate::from_der(&der) else {
        return Vec::new();
    };
    parsed
        .tbs_certificate
        .extensions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .find(|ext| ext.extn_id == oid)
        .and_then(|ext| parse(ext.extn_value.as_bytes()))
        .unwrap_or_default()
}

/// `Asn1TimeRef` → `OffsetDateTime` via the seconds-since-epoch diff.
pub(crate) fn asn1_time_to_datetime(value: &Asn1TimeRef) -> Option<OffsetDateTime> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(value).ok()?;
    let seconds = i64::from(diff.days) * 86400 + i64::from(diff.secs);
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

/// Parse OpenSSL's textual time rendering, e.g. `Jan  3 12:00:00 2025 GMT`.
fn parse_openssl_time(text: &str) -> Option<OffsetDateTime> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let month = match parts[0] {
        "Jan" => Month::January,
        "Feb" => Month::February,
        "Mar" => Month::March,
        "Apr" => Month::April,
        "May" => Month::May,
        "Jun" => Month::June,
        "Jul" => Month::July,
        "Aug" => Month::August,
        "Sep" => Month::September,
        "Oct" => Month::October,
        "Nov" => Month::November,
        "Dec" => Month::December,
        _ => return None,
    };
    let day: u8 = parts[1].parse().ok()?;
    let mut clock = parts[2].split(':');
    let hour: u8 = clock.next()?.parse().ok()?;
    let minute: u8 = clock.next()?.parse().ok()?;
    let second: u8 = clock.next()?.parse().ok()?;
    let year: i32 = parts[3].parse().ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self_signed_cert, test_key};

    #[tokio::test]
    async fn disabled_external_checks_report_the_documented_warning() {
        let key = test_key();
        let cert = self_signed_cert(&key, "Revocation Target");
        let options = VerifyOptions::default();
        let evaluator = RevocationEvaluator::new(&options);

        let outcome = evaluator.evaluate(&cert, None, None).await;
        assert!(outcome.ocsp_external.checked);
        assert!(!outcome.ocsp_external.valid);
        assert_eq!(
            outcome.ocsp_external.warning.as_deref(),
            Some(WARN_EXTERNAL_DISABLED)
        );
        assert!(outcome.crl_external.checked);
        assert_eq!(
            outcome.crl_external.warning.as_deref(),
            Some(WARN_EXTERNAL_DISABLED)
        );
        assert!(!outcome.revoked);
    }

    #[tokio::test]
    async fn enabled_checks_without_urls_warn_about_missing_urls() {
        let key = test_key();
        let cert = self_signed_cert(&key, "No URLs");
        let options = VerifyOptions {
            enable_external_revocation_check: true,
            ..Default::default()
        };
        let evaluator = RevocationEvaluator::new(&options);

        let outcome = evaluator.evaluate(&cert, None, None).await;
        assert_eq!(
            outcome.ocsp_external.warning.as_deref(),
            Some(WARN_NO_OCSP_URLS)
        );
        assert_eq!(
            outcome.crl_external.warning.as_deref(),
            Some(WARN_NO_CRL_URLS)
        );
    }

    #[test]
    fn openssl_time_parsing() {
        let parsed = parse_openssl_time("Jan  3 12:00:00 2025 GMT").unwrap();
        assert_eq!(parsed.year(), 2025);
        assert_eq!(parsed.month(), Month::January);
        assert_eq!(parsed.day(), 3);
        assert_eq!(parsed.hour(), 12);

        assert!(parse_openssl_time("not a time").is_none());
    }

    #[test]
    fn ocsp_request_encodes_a_cert_id() {
        let key = test_key();
        let issuer = self_signed_cert(&key, "Issuing CA");
        let cert = self_signed_cert(&key, "Subject");

        let request = build_ocsp_request(&cert, &issuer).unwrap();
        // OCSPRequest > TBSRequest > requestList > Request > CertID
        let mut reader = crate::domain::der::DerReader::new(&request);
        let outer = reader.expect(0x30).unwrap();
        let tbs = outer.reader().expect(0x30).unwrap();
        let list = tbs.reader().expect(0x30).unwrap();
        let one = list.reader().expect(0x30).unwrap();
        let cert_id = one.reader().expect(0x30).unwrap();
        let mut id_reader = cert_id.reader();
        id_reader.expect(0x30).unwrap(); // hashAlgorithm
        assert_eq!(id_reader.expect(0x04).unwrap().content.len(), 20);
        assert_eq!(id_reader.expect(0x04).unwrap().content.len(), 20);
        id_reader.expect(0x02).unwrap(); // serial
        assert!(id_reader.is_empty());
    }

    #[test]
    fn url_extraction_is_empty_without_extensions() {
        let key = test_key();
        let cert = self_signed_cert(&key, "No AIA");
        assert!(ocsp_urls(&cert).is_empty());
        assert!(crl_urls(&cert).is_empty());
    }
}
