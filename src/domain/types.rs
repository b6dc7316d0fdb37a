//! Signing-side option types.

use crate::domain::cms::RevocationArchival;
use crate::domain::constants;
use crate::domain::crypto::DigestAlgorithm;
use crate::infra::error::{SignError, SignResult};
use crate::infra::http::HttpSettings;
use std::str::FromStr;
use time::OffsetDateTime;

/// Validated timestamp authority URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsaUrl(String);

impl TsaUrl {
    pub fn new(url: &str) -> SignResult<Self> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(Self(url.to_string()))
        } else {
            Err(SignError::ConfigError(format!(
                "TSA URL must be http(s): {url}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TsaUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of signature being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertType {
    /// Ordinary approval signature; any number may coexist.
    Approval,
    /// Certification signature; first in the document, carries DocMDP.
    Certification,
    /// Usage-rights signature (`/UR3` in the catalog).
    UsageRights,
    /// Document timestamp; `/Contents` holds a bare RFC 3161 token.
    TimeStamp,
}

impl CertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertType::Approval => "Approval",
            CertType::Certification => "Certification",
            CertType::UsageRights => "UsageRights",
            CertType::TimeStamp => "TimeStamp",
        }
    }

    pub fn sub_filter(&self) -> &'static str {
        match self {
            CertType::TimeStamp => "ETSI.RFC3161",
            _ => "adbe.pkcs7.detached",
        }
    }
}

impl FromStr for CertType {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approval" => Ok(CertType::Approval),
            "certification" => Ok(CertType::Certification),
            "usagerights" | "usage-rights" => Ok(CertType::UsageRights),
            "timestamp" | "time-stamp" => Ok(CertType::TimeStamp),
            other => Err(SignError::ConfigError(format!(
                "unknown certification type: {other}"
            ))),
        }
    }
}

/// DocMDP permission level of a certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocMdpPerm {
    /// 1: no changes allowed
    NoChanges,
    /// 2: form filling and signing
    FormFilling,
    /// 3: form filling, signing and annotations
    FormFillingAndAnnotations,
}

impl DocMdpPerm {
    pub fn level(&self) -> i64 {
        match self {
            DocMdpPerm::NoChanges => 1,
            DocMdpPerm::FormFilling => 2,
            DocMdpPerm::FormFillingAndAnnotations => 3,
        }
    }

    pub fn from_level(level: u8) -> SignResult<Self> {
        match level {
            1 => Ok(DocMdpPerm::NoChanges),
            2 => Ok(DocMdpPerm::FormFilling),
            3 => Ok(DocMdpPerm::FormFillingAndAnnotations),
            other => Err(SignError::ConfigError(format!(
                "DocMDP permission must be 1, 2 or 3, got {other}"
            ))),
        }
    }
}

/// The signer's claims written into the signature dictionary.
#[derive(Debug, Clone, Default)]
pub struct SignatureMeta {
    pub name: Option<String>,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub contact_info: Option<String>,
    /// Signing time; `None` means now.
    pub date: Option<OffsetDateTime>,
}

/// Timestamp authority settings.
#[derive(Debug, Clone)]
pub struct TsaOptions {
    pub url: TsaUrl,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Form-fill settings consumed by the field filler stage.
#[derive(Debug, Clone, Default)]
pub struct FieldFillOptions {
    /// UID matched against `…_signer_<uid>` field names; empty disables
    /// the stage.
    pub signer_uid: Option<String>,
    /// Explicit date layout in `time` format-description syntax.
    pub date_format: Option<String>,
    /// BCP 47 tag looked up in the built-in layout table.
    pub locale: Option<String>,
}

/// Visible-appearance settings for the signature widget.
#[derive(Debug, Clone)]
pub struct AppearanceOptions {
    pub visible: bool,
    /// 1-based page number the widget is placed on.
    pub page: u32,
    /// `[lower_left_x, lower_left_y, upper_right_x, upper_right_y]`
    pub rect: [f64; 4],
}

impl Default for AppearanceOptions {
    fn default() -> Self {
        Self {
            visible: false,
            page: 1,
            rect: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Everything controlling one signing operation.
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub digest_algorithm: DigestAlgorithm,
    pub cert_type: CertType,
    pub docmdp_perm: DocMdpPerm,
    pub meta: SignatureMeta,
    pub tsa: Option<TsaOptions>,
    pub appearance: AppearanceOptions,
    pub fields: FieldFillOptions,
    /// CMS capacity reserved in `/Contents`, in bytes.
    pub placeholder_capacity: usize,
    /// OCSP responses / CRLs embedded under adbe-revocationInfoArchival.
    pub revocation: Option<RevocationArchival>,
    /// Timeout/proxy policy for the TSA request.
    pub http: HttpSettings,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            cert_type: CertType::Approval,
            docmdp_perm: DocMdpPerm::FormFilling,
            meta: SignatureMeta::default(),
            tsa: None,
            appearance: AppearanceOptions::default(),
            fields: FieldFillOptions::default(),
            placeholder_capacity: constants::DEFAULT_PLACEHOLDER_CAPACITY,
            revocation: None,
            http: HttpSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsa_url_validation() {
        assert!(TsaUrl::new("http://tsa.example/tsr").is_ok());
        assert!(TsaUrl::new("https://tsa.example").is_ok());
        assert!(TsaUrl::new("ftp://tsa.example").is_err());
        assert!(TsaUrl::new("tsa.example").is_err());
    }

    #[test]
    fn cert_type_parsing() {
        assert_eq!("approval".parse::<CertType>().unwrap(), CertType::Approval);
        assert_eq!(
            "Certification".parse::<CertType>().unwrap(),
            CertType::Certification
        );
        assert_eq!("timestamp".parse::<CertType>().unwrap(), CertType::TimeStamp);
        assert!("banana".parse::<CertType>().is_err());
    }

    #[test]
    fn sub_filter_per_type() {
        assert_eq!(CertType::Approval.sub_filter(), "adbe.pkcs7.detached");
        assert_eq!(CertType::TimeStamp.sub_filter(), "ETSI.RFC3161");
    }

    #[test]
    fn docmdp_levels() {
        assert_eq!(DocMdpPerm::from_level(2).unwrap().level(), 2);
        assert!(DocMdpPerm::from_level(0).is_err());
        assert!(DocMdpPerm::from_level(4).is_err());
    }
}
