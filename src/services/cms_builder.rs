//! CMS construction for one signing operation.
//!
//! Two-step by design: the signed attributes are signed first, because the
//! RFC 3161 request covers the signature octets; the token (when any) is
//! attached as an unsigned attribute during final assembly.

use crate::domain::cms::{
    build_signed_attributes, build_signed_data, AttributeParams, EncodedAttributes,
    RevocationArchival, SignedDataParams,
};
use crate::domain::crypto::{DigestAlgorithm, KeyKind, RawSigner};
use crate::infra::error::SignResult;
use openssl::x509::X509;
use time::OffsetDateTime;

/// Builder bound to the signer certificate and digest of one operation.
pub struct CmsSigner<'a> {
    digest: DigestAlgorithm,
    signer_cert: &'a X509,
    chain: &'a [X509],
}

impl<'a> CmsSigner<'a> {
    pub fn new(digest: DigestAlgorithm, signer_cert: &'a X509, chain: &'a [X509]) -> Self {
        Self {
            digest,
            signer_cert,
            chain,
        }
    }

    /// Build and sign the attribute block over the ByteRange digest.
    pub fn sign_attributes(
        &self,
        signer: &dyn RawSigner,
        message_digest: &[u8],
        signing_time: OffsetDateTime,
        revocation: Option<&RevocationArchival>,
    ) -> SignResult<SignedCms<'a>> {
        let cert_der = self.signer_cert.to_der()?;
        let attrs = build_signed_attributes(&AttributeParams {
            message_digest,
            signing_time,
            signer_cert_der: &cert_der,
            revocation,
        });

        let signature = signer.sign(self.digest, &attrs.signed_form())?;
        log::debug!(
            "signed {} attribute bytes, {} byte signature",
            attrs.signed_form().len(),
            signature.len()
        );

        Ok(SignedCms {
            digest: self.digest,
            key_kind: signer.key_kind(),
            signer_cert: self.signer_cert,
            chain: self.chain,
            attrs,
            signature,
        })
    }
}

/// A signed attribute block awaiting final assembly.
pub struct SignedCms<'a> {
    digest: DigestAlgorithm,
    key_kind: KeyKind,
    signer_cert: &'a X509,
    chain: &'a [X509],
    attrs: EncodedAttributes,
    signature: Vec<u8>,
}

impl SignedCms<'_> {
    /// The raw signature octets — the timestamp request covers these.
    pub fn signature_octets(&self) -> &[u8] {
        &self.signature
    }

    /// Assemble the final ContentInfo, optionally attaching a token.
    pub fn assemble(&self, timestamp_token: Option<&[u8]>) -> SignResult<Vec<u8>> {
        build_signed_data(&SignedDataParams {
            digest: self.digest,
            key_kind: self.key_kind,
            signer_cert: self.signer_cert,
            chain: self.chain,
            signed_attrs: &self.attrs,
            signature: &self.signature,
            timestamp_token,
        })
    }
}
