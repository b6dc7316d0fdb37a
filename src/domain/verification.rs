//! Verification options and the per-signature verdict model.

use crate::domain::constants;
use crate::infra::http::HttpSettings;
use der::oid::ObjectIdentifier;
use openssl::x509::X509;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Options controlling signature verification.
#[derive(Clone)]
pub struct VerifyOptions {
    /// Extended Key Usages that must be present on the leaf.
    /// Default: Document Signing (RFC 9336).
    pub required_ekus: Vec<ObjectIdentifier>,

    /// Additional EKUs accepted in place of the required ones.
    /// Default: Email Protection and Client Auth.
    pub allowed_ekus: Vec<ObjectIdentifier>,

    /// Require the Digital Signature bit in Key Usage (default true).
    pub require_digital_signature_ku: bool,

    /// Require the Non-Repudiation bit in Key Usage (default false).
    pub require_non_repudiation: bool,

    /// Trust the signer-claimed signing-time when no timestamp is present.
    /// The time is signatory-provided and flagged with a warning.
    pub trust_signature_time: bool,

    /// Validate the timestamp token's certificate chain (default true).
    pub validate_timestamp_certificates: bool,

    /// Promote self-signed certificates embedded in the PDF to trusted
    /// roots. Only for testing or explicitly trusted documents.
    pub allow_untrusted_roots: bool,

    /// Perform OCSP/CRL lookups against the URLs in the certificates.
    pub enable_external_revocation_check: bool,

    /// Timeout and proxy policy for all outbound requests.
    pub http: HttpSettings,

    /// Override transport; when set, `http` only contributes the timeout
    /// semantics already baked into the client.
    pub http_client: Option<reqwest::Client>,

    /// Roots trusted in addition to the system store. Useful for air-gapped
    /// deployments and tests.
    pub extra_trusted_roots: Vec<X509>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            required_ekus: vec![constants::OID_EKU_DOCUMENT_SIGNING],
            allowed_ekus: vec![
                constants::OID_EKU_EMAIL_PROTECTION,
                constants::OID_EKU_CLIENT_AUTH,
            ],
            require_digital_signature_ku: true,
            require_non_repudiation: false,
            trust_signature_time: false,
            validate_timestamp_certificates: true,
            allow_untrusted_roots: false,
            enable_external_revocation_check: false,
            http: HttpSettings::default(),
            http_client: None,
            extra_trusted_roots: Vec::new(),
        }
    }
}

/// Where the verification time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    EmbeddedTimestamp,
    SignatureTime,
    CurrentTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStatus {
    Valid,
    Invalid,
    Missing,
}

/// Per-certificate view in the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateReport {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
    pub self_signed: bool,

    pub ocsp_embedded: bool,
    pub ocsp_external_checked: bool,
    pub ocsp_external_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocsp_external_warning: Option<String>,

    pub crl_embedded: bool,
    pub crl_external_checked: bool,
    pub crl_external_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crl_external_warning: Option<String>,

    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<String>,
}

impl CertificateReport {
    pub fn new(subject: String, issuer: String, serial: String) -> Self {
        Self {
            subject,
            issuer,
            serial,
            not_before: None,
            not_after: None,
            self_signed: false,
            ocsp_embedded: false,
            ocsp_external_checked: false,
            ocsp_external_valid: false,
            ocsp_external_warning: None,
            crl_embedded: false,
            crl_external_checked: false,
            crl_external_valid: false,
            crl_external_warning: None,
            revoked: false,
            revocation_time: None,
        }
    }
}

/// Validation outcome for one signature.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureValidation {
    pub valid_signature: bool,
    pub trusted_issuer: bool,
    pub revoked_certificate: bool,
    pub revoked_before_signing: bool,
    pub key_usage_valid: bool,
    pub ext_key_usage_valid: bool,
    pub certificates: Vec<CertificateReport>,
    pub timestamp_status: TimestampStatus,
    pub timestamp_trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_time: Option<String>,
    pub time_source: TimeSource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub time_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Default for SignatureValidation {
    fn default() -> Self {
        Self {
            valid_signature: false,
            trusted_issuer: false,
            revoked_certificate: false,
            revoked_before_signing: false,
            key_usage_valid: false,
            ext_key_usage_valid: false,
            certificates: Vec::new(),
            timestamp_status: TimestampStatus::Missing,
            timestamp_trusted: false,
            verification_time: None,
            time_source: TimeSource::CurrentTime,
            time_warnings: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Descriptive fields read from the signature dictionary (the signer's
/// claims, distinct from the validation outcome).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignatureInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub sub_filter: String,
    pub cert_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docmdp_permission: Option<u8>,
    /// Set on signatures appended after a certification signature.
    pub post_certification_change: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureReport {
    pub info: SignatureInfo,
    pub validation: SignatureValidation,
}

/// Document-level metadata from the trailer `/Info` dictionary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_date: Option<String>,
    pub pages: usize,
}

/// Full verdict for one document.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub document: DocumentInfo,
    pub signatures: Vec<SignatureReport>,
}

impl VerificationReport {
    /// True when every signature verified and chained to a trusted root.
    pub fn all_valid_and_trusted(&self) -> bool {
        !self.signatures.is_empty()
            && self.signatures.iter().all(|s| {
                s.validation.valid_signature
                    && s.validation.trusted_issuer
                    && !s.validation.revoked_before_signing
            })
    }
}

/// RFC 3339 rendering used for every time field in the verdict.
pub fn format_report_time(datetime: OffsetDateTime) -> Option<String> {
    datetime.format(&Rfc3339).ok()
}
