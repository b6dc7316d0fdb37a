//! Error types for PDF signing and verification operations.

use thiserror::Error;

/// Result type for signing and verification operations
pub type SignResult<T> = Result<T, SignError>;

/// Error kinds surfaced by the signing and verification engines
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SignError {
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("signature too large: CMS is {got} bytes but the placeholder holds {capacity}")]
    SignatureTooLarge { got: usize, capacity: usize },

    #[error("malformed PDF: {0}")]
    MalformedPdf(String),

    #[error("key capability mismatch: {0}")]
    KeyCapabilityMismatch(String),

    #[error("timestamp authority failure: {0}")]
    TsaFailure(String),

    #[error("certificate error: {0}")]
    CertificateError(String),

    #[error("CMS structure error: {0}")]
    Pkcs7Error(String),

    #[error("ASN.1 encoding/decoding error: {0}")]
    Asn1Error(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<openssl::error::ErrorStack> for SignError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SignError::CertificateError(error.to_string())
    }
}

impl From<der::Error> for SignError {
    fn from(error: der::Error) -> Self {
        SignError::Asn1Error(error.to_string())
    }
}

impl From<reqwest::Error> for SignError {
    fn from(error: reqwest::Error) -> Self {
        SignError::NetworkError(error.to_string())
    }
}

impl From<lopdf::Error> for SignError {
    fn from(error: lopdf::Error) -> Self {
        SignError::MalformedPdf(error.to_string())
    }
}

impl From<std::io::Error> for SignError {
    fn from(error: std::io::Error) -> Self {
        SignError::IoError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SignError::UnsupportedDigest("sha1".to_string());
        assert_eq!(error.to_string(), "unsupported digest algorithm: sha1");

        let error = SignError::SignatureTooLarge {
            got: 5000,
            capacity: 4096,
        };
        assert!(error.to_string().contains("5000"));
        assert!(error.to_string().contains("4096"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pdf");
        let err: SignError = io.into();
        match err {
            SignError::IoError(msg) => assert!(msg.contains("missing.pdf")),
            _ => panic!("wrong error kind"),
        }
    }
}
