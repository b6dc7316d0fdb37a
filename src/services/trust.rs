//! Trust pool, certification path building and KU/EKU policy.

use crate::domain::constants;
use crate::domain::verification::VerifyOptions;
use crate::infra::error::SignResult;
use der::oid::ObjectIdentifier;
use der::Decode;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::{X509VerifyFlags, X509VerifyParam};
use openssl::x509::{X509StoreContext, X509};
use time::OffsetDateTime;
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage, KeyUsages};

/// anyExtendedKeyUsage always satisfies EKU policy.
const OID_ANY_EKU: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");

pub struct TrustEvaluation {
    /// A path to a trusted root was built at the verification time.
    pub trusted: bool,
    /// Validated chain, leaf first; falls back to leaf + pool order when no
    /// path could be built.
    pub chain: Vec<X509>,
    pub key_usage_valid: bool,
    pub ext_key_usage_valid: bool,
    pub warnings: Vec<String>,
}

/// Subject equals issuer.
pub fn is_self_signed(cert: &X509) -> bool {
    match (cert.subject_name().to_der(), cert.issuer_name().to_der()) {
        (Ok(subject), Ok(issuer)) => subject == issuer,
        _ => false,
    }
}

/// Split an embedded pool into self-signed roots and intermediates.
pub fn split_pool(pool: &[X509]) -> (Vec<X509>, Vec<X509>) {
    let mut roots = Vec::new();
    let mut intermediates = Vec::new();
    for cert in pool {
        if is_self_signed(cert) {
            roots.push(cert.clone());
        } else {
            intermediates.push(cert.clone());
        }
    }
    (roots, intermediates)
}

/// Build a path for `leaf` and apply the key-usage policy.
pub fn evaluate_trust(
    leaf: &X509,
    pool: &[X509],
    verification_time: OffsetDateTime,
    options: &VerifyOptions,
) -> SignResult<TrustEvaluation> {
    let mut warnings = Vec::new();
    let (embedded_roots, intermediates) = split_pool(pool);

    let mut builder = X509StoreBuilder::new()?;
    if let Err(e) = builder.set_default_paths() {
        warnings.push(format!("system trust roots unavailable: {e}"));
    }
    for root in &options.extra_trusted_roots {
        builder.add_cert(root.clone())?;
    }
    if options.allow_untrusted_roots {
        for root in &embedded_roots {
            builder.add_cert(root.clone())?;
        }
        if !embedded_roots.is_empty() {
            warnings.push(
                "embedded self-signed certificates were promoted to trusted roots".to_string(),
            );
        }
    }

    let mut param = X509VerifyParam::new()?;
    param.set_time(verification_time.unix_timestamp() as _);
    builder.set_param(&param)?;
    builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;
    let store = builder.build();

    let mut untrusted = Stack::new()?;
    for cert in pool {
        untrusted.push(cert.clone())?;
    }

    let mut context = X509StoreContext::new()?;
    let (trusted, chain) =
        match context.init(&store, leaf, &untrusted, |ctx| {
            let ok = ctx.verify_cert()?;
            let error = (!ok).then(|| ctx.error().error_string().to_string());
            let chain = ctx
                .chain()
                .map(|stack| stack.iter().map(|c| c.to_owned()).collect::<Vec<_>>())
                .unwrap_or_default();
            Ok((ok, error, chain))
        }) {
            Ok((true, _, chain)) => (true, chain),
            Ok((false, error, _)) => {
                warnings.push(format!(
                    "certification path could not be validated: {}",
                    error.unwrap_or_else(|| "unknown error".to_string())
                ));
                (false, Vec::new())
            }
            Err(e) => {
                warnings.push(format!("path building errored: {e}"));
                (false, Vec::new())
            }
        };

    // fall back to an unvalidated leaf + pool ordering so revocation still
    // has something to work on
    let chain = if chain.is_empty() {
        let mut fallback = vec![leaf.clone()];
        fallback.extend(intermediates.iter().cloned());
        fallback.extend(embedded_roots.iter().cloned());
        fallback
    } else {
        chain
    };

    let (key_usage_valid, ext_key_usage_valid) = check_usage_policy(leaf, options, &mut warnings);

    Ok(TrustEvaluation {
        trusted,
        chain,
        key_usage_valid,
        ext_key_usage_valid,
        warnings,
    })
}

/// Issuer of `cert` within `chain`: the next element when the chain is
/// ordered, else the first subject matching the issuer name.
pub fn issuer_of<'a>(cert: &X509, index: usize, chain: &'a [X509]) -> Option<&'a X509> {
    if let Some(next) = chain.get(index + 1) {
        if next.subject_name().to_der().ok() == cert.issuer_name().to_der().ok() {
            return Some(next);
        }
    }
    chain
        .iter()
        .find(|candidate| candidate.subject_name().to_der().ok() == cert.issuer_name().to_der().ok())
}

fn check_usage_policy(
    leaf: &X509,
    options: &VerifyOptions,
    warnings: &mut Vec<String>,
) -> (bool, bool) {
    let der = match leaf.to_der() {
        Ok(der) => der,
        Err(e) => {
            warnings.push(format!("leaf certificate does not re-encode: {e}"));
            return (false, false);
        }
    };
    let parsed = match x509_cert::Certificate::from_der(&der) {
        Ok(parsed) => parsed,
        Err(e) => {
            warnings.push(format!("leaf certificate does not parse: {e}"));
            return (false, false);
        }
    };
    let extensions = parsed.tbs_certificate.extensions.as_deref().unwrap_or(&[]);

    let key_usage = extensions
        .iter()
        .find(|ext| ext.extn_id == constants::OID_EXT_KEY_USAGE)
        .and_then(|ext| KeyUsage::from_der(ext.extn_value.as_bytes()).ok());
    let key_usage_valid = {
        let mut ok = true;
        if options.require_digital_signature_ku {
            let has_bit = key_usage
                .as_ref()
                .is_some_and(|ku| ku.0.contains(KeyUsages::DigitalSignature));
            if !has_bit {
                warnings.push("leaf lacks the Digital Signature key usage".to_string());
                ok = false;
            }
        }
        if options.require_non_repudiation {
            let has_bit = key_usage
                .as_ref()
                .is_some_and(|ku| ku.0.contains(KeyUsages::NonRepudiation));
            if !has_bit {
                warnings.push("leaf lacks the Non-Repudiation key usage".to_string());
                ok = false;
            }
        }
        ok
    };

    let ext_key_usage_valid = if options.required_ekus.is_empty() {
        true
    } else {
        let ekus = extensions
            .iter()
            .find(|ext| ext.extn_id == constants::OID_EXT_EXTENDED_KEY_USAGE)
            .and_then(|ext| ExtendedKeyUsage::from_der(ext.extn_value.as_bytes()).ok());
        match ekus {
            Some(ekus) => {
                let acceptable = ekus.0.iter().any(|oid| {
                    *oid == OID_ANY_EKU
                        || options.required_ekus.contains(oid)
                        || options.allowed_ekus.contains(oid)
                });
                if !acceptable {
                    warnings.push("leaf extended key usage does not permit document signing".to_string());
                }
                acceptable
            }
            None => {
                warnings.push("leaf has no extended key usage extension".to_string());
                false
            }
        }
    };

    (key_usage_valid, ext_key_usage_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self_signed_cert, test_key};

    #[test]
    fn self_signed_detection_and_pool_split() {
        let key = test_key();
        let root = self_signed_cert(&key, "Root");
        assert!(is_self_signed(&root));

        let (roots, intermediates) = split_pool(&[root.clone()]);
        assert_eq!(roots.len(), 1);
        assert!(intermediates.is_empty());
    }

    #[test]
    fn untrusted_root_rejected_by_default() {
        let key = test_key();
        let leaf = self_signed_cert(&key, "Self Signed Leaf");
        let options = VerifyOptions::default();

        let eval = evaluate_trust(&leaf, &[leaf.clone()], OffsetDateTime::now_utc(), &options)
            .unwrap();
        assert!(!eval.trusted);
        // KU/EKU of the test cert still pass policy
        assert!(eval.key_usage_valid);
        assert!(eval.ext_key_usage_valid);
        assert!(!eval.chain.is_empty());
    }

    #[test]
    fn allow_untrusted_roots_promotes_embedded_with_warning() {
        let key = test_key();
        let leaf = self_signed_cert(&key, "Self Signed Leaf");
        let options = VerifyOptions {
            allow_untrusted_roots: true,
            ..Default::default()
        };

        let eval = evaluate_trust(&leaf, &[leaf.clone()], OffsetDateTime::now_utc(), &options)
            .unwrap();
        assert!(eval.trusted);
        assert!(eval
            .warnings
            .iter()
            .any(|w| w.contains("promoted to trusted roots")));
    }

    #[test]
    fn extra_trusted_roots_build_a_path() {
        let key = test_key();
        let leaf = self_signed_cert(&key, "Pinned Leaf");
        let options = VerifyOptions {
            extra_trusted_roots: vec![leaf.clone()],
            ..Default::default()
        };
        let eval =
            evaluate_trust(&leaf, &[], OffsetDateTime::now_utc(), &options).unwrap();
        assert!(eval.trusted);
    }

    #[test]
    fn expired_path_fails_at_resolved_time() {
        let key = test_key();
        let leaf = self_signed_cert(&key, "Expired At Time");
        let options = VerifyOptions {
            allow_untrusted_roots: true,
            ..Default::default()
        };
        // ten years from now the one-year certificate is long expired
        let future = OffsetDateTime::now_utc() + time::Duration::days(3650);
        let eval = evaluate_trust(&leaf, &[leaf.clone()], future, &options).unwrap();
        assert!(!eval.trusted);
    }

    #[test]
    fn non_repudiation_policy_applies() {
        let key = test_key();
        let leaf = self_signed_cert(&key, "NR Leaf");
        let options = VerifyOptions {
            require_non_repudiation: true,
            ..Default::default()
        };
        let eval = evaluate_trust(&leaf, &[leaf.clone()], OffsetDateTime::now_utc(), &options)
            .unwrap();
        // the test certificate sets the bit
        assert!(eval.key_usage_valid);
    }
}
