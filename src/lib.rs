//! PDF signing and signature verification.
//!
//! The signing engine appends an incremental update with a reserved
//! `/Contents` placeholder, digests the ByteRange halves and patches a CMS
//! SignedData (optionally timestamped via RFC 3161) into the reservation
//! without moving a byte. The verification engine rebuilds the signed
//! ranges, validates the CMS, builds certification paths, evaluates
//! revocation and resolves the trusted time into a per-signature verdict.

pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

#[cfg(test)]
mod testutil;

use std::path::Path;

pub use domain::crypto::{DigestAlgorithm, KeyKind, PKeySigner, RawSigner};
pub use domain::cms::RevocationArchival;
pub use domain::types::{
    AppearanceOptions, CertType, DocMdpPerm, FieldFillOptions, SignOptions, SignatureMeta,
    TsaOptions, TsaUrl,
};
pub use domain::verification::{
    CertificateReport, DocumentInfo, SignatureInfo, SignatureReport, SignatureValidation,
    TimeSource, TimestampStatus, VerificationReport, VerifyOptions,
};
pub use infra::config::SigningProfile;
pub use infra::error::{SignError, SignResult};
pub use infra::http::HttpSettings;
pub use pipelines::{SignWorkflow, VerifyWorkflow};

use openssl::x509::X509;

/// Key and certificates of one signer.
pub struct SigningMaterial {
    pub signer: PKeySigner,
    pub certificate: X509,
    pub chain: Vec<X509>,
}

impl SigningMaterial {
    /// Load PEM-encoded key, leaf certificate and optional chain files.
    pub fn from_pem_files<P: AsRef<Path>>(
        cert_path: P,
        key_path: P,
        chain_path: Option<P>,
    ) -> SignResult<Self> {
        let cert_pem = std::fs::read(cert_path.as_ref()).map_err(|e| {
            SignError::IoError(format!(
                "cannot read certificate {}: {e}",
                cert_path.as_ref().display()
            ))
        })?;
        let certificate = X509::from_pem(&cert_pem)
            .map_err(|e| SignError::CertificateError(format!("invalid certificate: {e}")))?;

        let key_pem = std::fs::read(key_path.as_ref()).map_err(|e| {
            SignError::IoError(format!(
                "cannot read key {}: {e}",
                key_path.as_ref().display()
            ))
        })?;
        let signer = PKeySigner::from_pem(&key_pem)?;

        let chain = match chain_path {
            Some(path) => {
                let chain_pem = std::fs::read(path.as_ref()).map_err(|e| {
                    SignError::IoError(format!(
                        "cannot read chain {}: {e}",
                        path.as_ref().display()
                    ))
                })?;
                X509::stack_from_pem(&chain_pem)
                    .map_err(|e| SignError::CertificateError(format!("invalid chain: {e}")))?
            }
            None => Vec::new(),
        };

        Ok(Self {
            signer,
            certificate,
            chain,
        })
    }
}

/// Sign in-memory PDF bytes.
pub async fn sign_pdf_bytes(
    input: &[u8],
    material: &SigningMaterial,
    options: SignOptions,
) -> SignResult<Vec<u8>> {
    let workflow = SignWorkflow::new(
        &material.signer,
        &material.certificate,
        &material.chain,
        options,
    );
    workflow.run(input).await
}

/// Sign `input_path` into `output_path`. The output file only appears when
/// the whole operation succeeded; partial results are never published.
pub async fn sign_pdf_file<P: AsRef<Path>>(
    input_path: P,
    output_path: P,
    material: &SigningMaterial,
    options: SignOptions,
) -> SignResult<()> {
    log::info!("signing {}", input_path.as_ref().display());
    let input = std::fs::read(input_path.as_ref()).map_err(|e| {
        SignError::IoError(format!(
            "cannot read input {}: {e}",
            input_path.as_ref().display()
        ))
    })?;

    let signed = sign_pdf_bytes(&input, material, options).await?;

    std::fs::write(output_path.as_ref(), signed).map_err(|e| {
        SignError::IoError(format!(
            "cannot write output {}: {e}",
            output_path.as_ref().display()
        ))
    })?;
    log::info!("wrote {}", output_path.as_ref().display());
    Ok(())
}

/// Verify in-memory PDF bytes.
pub async fn verify_pdf_bytes(
    input: &[u8],
    options: VerifyOptions,
) -> SignResult<VerificationReport> {
    VerifyWorkflow::new(options).run(input).await
}

/// Verify all signatures in the file at `path`.
pub async fn verify_pdf_file<P: AsRef<Path>>(
    path: P,
    options: VerifyOptions,
) -> SignResult<VerificationReport> {
    log::info!("verifying {}", path.as_ref().display());
    let input = std::fs::read(path.as_ref()).map_err(|e| {
        SignError::IoError(format!("cannot read {}: {e}", path.as_ref().display()))
    })?;
    verify_pdf_bytes(&input, options).await
}
