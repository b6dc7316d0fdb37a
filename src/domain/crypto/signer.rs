//! The raw-signature capability consumed by the CMS builder.

use crate::domain::constants;
use crate::domain::crypto::hash::DigestAlgorithm;
use crate::infra::error::{SignError, SignResult};
use openssl::pkey::{Id, PKey, Private};

/// Key families the CMS builder can derive a signature algorithm for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
}

impl KeyKind {
    /// signatureAlgorithm OID for this key under the given digest.
    /// RSA signatures in CMS are conventionally labelled plain rsaEncryption.
    pub fn signature_algorithm_oid(&self, digest: DigestAlgorithm) -> &'static [u8] {
        match self {
            KeyKind::Rsa => constants::OID_RSA_ENCRYPTION,
            KeyKind::Ec => match digest {
                DigestAlgorithm::Sha256 => constants::OID_ECDSA_SHA256,
                DigestAlgorithm::Sha384 => constants::OID_ECDSA_SHA384,
                DigestAlgorithm::Sha512 => constants::OID_ECDSA_SHA512,
            },
        }
    }
}

/// A private key able to produce raw signatures over a byte string.
/// Hardware tokens or remote KMS backends implement this the same way the
/// default software key does.
pub trait RawSigner {
    fn key_kind(&self) -> KeyKind;

    /// Sign `data` (hashed with `digest` internally) and return the raw
    /// signature bytes: PKCS#1 v1.5 for RSA, DER ECDSA-Sig-Value for EC.
    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> SignResult<Vec<u8>>;
}

/// Software signer backed by an in-memory private key.
pub struct PKeySigner {
    pkey: PKey<Private>,
    kind: KeyKind,
}

impl PKeySigner {
    pub fn new(pkey: PKey<Private>) -> SignResult<Self> {
        let kind = match pkey.id() {
            Id::RSA => KeyKind::Rsa,
            Id::EC => KeyKind::Ec,
            other => {
                return Err(SignError::KeyCapabilityMismatch(format!(
                    "unsupported key type {other:?}; RSA and EC keys are supported"
                )))
            }
        };
        Ok(Self { pkey, kind })
    }

    pub fn from_pem(pem: &[u8]) -> SignResult<Self> {
        let pkey = PKey::private_key_from_pem(pem)
            .map_err(|e| SignError::KeyCapabilityMismatch(format!("cannot load key: {e}")))?;
        Self::new(pkey)
    }

    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }
}

impl RawSigner for PKeySigner {
    fn key_kind(&self) -> KeyKind {
        self.kind
    }

    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> SignResult<Vec<u8>> {
        let mut signer = openssl::sign::Signer::new(digest.message_digest(), &self.pkey)
            .map_err(|e| SignError::KeyCapabilityMismatch(format!("{}/{digest}: {e}", match self.kind {
                KeyKind::Rsa => "RSA",
                KeyKind::Ec => "EC",
            })))?;
        Ok(signer.sign_oneshot_to_vec(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;

    #[test]
    fn rsa_key_signs_and_reports_kind() {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let signer = PKeySigner::new(pkey).unwrap();

        assert_eq!(signer.key_kind(), KeyKind::Rsa);
        let sig = signer.sign(DigestAlgorithm::Sha256, b"payload").unwrap();
        assert_eq!(sig.len(), 256);
    }

    #[test]
    fn ec_key_maps_to_ecdsa_oids() {
        use openssl::ec::{EcGroup, EcKey};
        use openssl::nid::Nid;

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = EcKey::generate(&group).unwrap();
        let signer = PKeySigner::new(PKey::from_ec_key(key).unwrap()).unwrap();

        assert_eq!(signer.key_kind(), KeyKind::Ec);
        assert_eq!(
            signer.key_kind().signature_algorithm_oid(DigestAlgorithm::Sha384),
            constants::OID_ECDSA_SHA384
        );
        assert!(!signer.sign(DigestAlgorithm::Sha256, b"payload").unwrap().is_empty());
    }
}
