//! The verification workflow.
//!
//! Locates every signature dictionary, rebuilds the signed byte range,
//! validates the CMS, builds certification paths, evaluates revocation and
//! resolves the verification time. Nothing short-circuits: every status
//! and warning lands in the per-signature verdict.

use crate::domain::cms::{parse_signed_data, RevocationArchival};
use crate::domain::pdf::{self, decode_pdf_text};
use crate::domain::verification::{
    format_report_time, CertificateReport, DocumentInfo, SignatureInfo, SignatureReport,
    SignatureValidation, TimestampStatus, VerificationReport, VerifyOptions,
};
use crate::infra::error::{SignError, SignResult};
use crate::services::cms_verifier::{self, ImprintSource, TokenCheck};
use crate::services::revocation::{asn1_time_to_datetime, RevocationEvaluator};
use crate::services::time_resolver::resolve_time;
use crate::services::trust::{self, is_self_signed};
use lopdf::{Dictionary, Document, Object, ObjectId};
use openssl::x509::{X509NameRef, X509};
use time::OffsetDateTime;

/// Orchestrates verification of all signatures in one document.
pub struct VerifyWorkflow {
    options: VerifyOptions,
}

/// One signature dictionary as found in the document.
struct FoundSignature {
    sig_id: Option<ObjectId>,
    sub_filter: String,
    byte_range: Option<[i64; 4]>,
    contents: Vec<u8>,
    info: SignatureInfo,
}

impl VerifyWorkflow {
    pub fn new(options: VerifyOptions) -> Self {
        Self { options }
    }

    pub async fn run(&self, file: &[u8]) -> SignResult<VerificationReport> {
        let doc = Document::load_mem(file)?;
        let document = document_info(&doc);
        let mut found = find_signatures(&doc)?;
        mark_post_certification_changes(&mut found);
        log::info!("verifying {} signature(s)", found.len());

        let mut signatures = Vec::with_capacity(found.len());
        for signature in found {
            let validation = self.verify_one(file, &signature).await;
            signatures.push(SignatureReport {
                info: signature.info,
                validation,
            });
        }

        Ok(VerificationReport {
            document,
            signatures,
        })
    }

    async fn verify_one(&self, file: &[u8], found: &FoundSignature) -> SignatureValidation {
        let mut validation = SignatureValidation::default();

        let Some(ranges) = checked_ranges(found, file, &mut validation.warnings) else {
            return validation;
        };

        if found.sub_filter == "ETSI.RFC3161" {
            return self.verify_document_timestamp(file, found, ranges, validation).await;
        }

        // --- CMS ----------------------------------------------------------
        let parsed = match parse_signed_data(&found.contents) {
            Ok(parsed) => parsed,
            Err(e) => {
                validation
                    .warnings
                    .push(format!("signature contents do not parse as CMS: {e}"));
                return validation;
            }
        };
        let check = match cms_verifier::verify_cms(&parsed, file, &ranges) {
            Ok(check) => check,
            Err(e) => {
                validation.warnings.push(e.to_string());
                return validation;
            }
        };
        validation.warnings.extend(check.warnings.clone());
        validation.valid_signature = check.valid_signature();

        // --- timestamp ----------------------------------------------------
        let token = parsed.signer.timestamp_token();
        let token_check = token
            .as_deref()
            .map(|t| cms_verifier::verify_timestamp_token(t, ImprintSource::Octets(&parsed.signer.signature)));
        let (timestamp_time, timestamp_trusted) =
            self.evaluate_token(&token_check, &mut validation).await;

        // --- time resolution ---------------------------------------------
        let trusted_timestamp = timestamp_time.filter(|_| {
            !self.options.validate_timestamp_certificates || timestamp_trusted
        });
        let resolved = resolve_time(
            trusted_timestamp,
            parsed.signer.signing_time(),
            self.options.trust_signature_time,
        );
        validation.time_source = resolved.source;
        validation.time_warnings = resolved.warnings;
        validation.verification_time = format_report_time(resolved.time);
        validation.timestamp_trusted = timestamp_trusted;

        // --- trust & revocation ------------------------------------------
        match &check.signer_cert {
            Some(leaf) => {
                self.evaluate_chain(
                    leaf,
                    &check.certificates,
                    parsed.signer.revocation_archival(),
                    resolved.time,
                    &mut validation,
                )
                .await;
            }
            None => validation
                .warnings
                .push("no signer certificate; trust not evaluated".to_string()),
        }

        validation
    }

    /// ETSI.RFC3161 document timestamps: the token *is* the signature.
    async fn verify_document_timestamp(
        &self,
        file: &[u8],
        found: &FoundSignature,
        ranges: [(usize, usize); 2],
        mut validation: SignatureValidation,
    ) -> SignatureValidation {
        let token_check = Some(cms_verifier::verify_timestamp_token(
            &found.contents,
            ImprintSource::Document {
                file,
                ranges: &ranges,
            },
        ));
        let (timestamp_time, timestamp_trusted) =
            self.evaluate_token(&token_check, &mut validation).await;
        let token_check = token_check.expect("just constructed");

        validation.valid_signature = token_check.valid;
        validation.timestamp_trusted = timestamp_trusted;
        validation.trusted_issuer = timestamp_trusted;

        let resolved = resolve_time(timestamp_time, None, false);
        validation.time_source = resolved.source;
        validation.time_warnings = resolved.warnings;
        validation.verification_time = format_report_time(resolved.time);

        if let (Some(leaf), time) = (&token_check.signer_cert, resolved.time) {
            self.evaluate_chain(leaf, &token_check.certificates, None, time, &mut validation)
                .await;
            // trusted_issuer for a timestamp signature tracks the TSA chain
            validation.trusted_issuer = validation.trusted_issuer || timestamp_trusted;
        }
        validation
    }

    /// Common token handling: status flags, TSA chain validation, genTime.
    async fn evaluate_token(
        &self,
        token_check: &Option<TokenCheck>,
        validation: &mut SignatureValidation,
    ) -> (Option<OffsetDateTime>, bool) {
        let Some(check) = token_check else {
            validation.timestamp_status = TimestampStatus::Missing;
            return (None, false);
        };
        validation.warnings.extend(check.warnings.clone());
        validation.timestamp_status = if check.valid {
            TimestampStatus::Valid
        } else {
            TimestampStatus::Invalid
        };

        let gen_time = check.tst_info.as_ref().map(|info| info.gen_time);
        if !check.valid {
            return (None, false);
        }

        let trusted = if self.options.validate_timestamp_certificates {
            match (&check.signer_cert, gen_time) {
                (Some(tsa_cert), Some(at)) => {
                    match trust::evaluate_trust(tsa_cert, &check.certificates, at, &self.options) {
                        Ok(eval) => {
                            for warning in eval.warnings {
                                validation.warnings.push(format!("timestamp: {warning}"));
                            }
                            eval.trusted
                        }
                        Err(e) => {
                            validation
                                .warnings
                                .push(format!("timestamp chain validation errored: {e}"));
                            false
                        }
                    }
                }
                _ => false,
            }
        } else {
            false
        };

        (gen_time, trusted)
    }

    /// Path building, KU/EKU policy and revocation for one leaf.
    async fn evaluate_chain(
        &self,
        leaf: &X509,
        pool: &[X509],
        embedded: Option<RevocationArchival>,
        verification_time: OffsetDateTime,
        validation: &mut SignatureValidation,
    ) {
        let eval = match trust::evaluate_trust(leaf, pool, verification_time, &self.options) {
            Ok(eval) => eval,
            Err(e) => {
                validation
                    .warnings
                    .push(format!("trust evaluation errored: {e}"));
                return;
            }
        };
        validation.trusted_issuer = eval.trusted;
        validation.key_usage_valid = eval.key_usage_valid;
        validation.ext_key_usage_valid = eval.ext_key_usage_valid;
        validation.warnings.extend(eval.warnings.clone());

        let evaluator = RevocationEvaluator::new(&self.options);
        for (index, cert) in eval.chain.iter().enumerate() {
            let mut report = certificate_report(cert);
            if !is_self_signed(cert) {
                let issuer = trust::issuer_of(cert, index, &eval.chain);
                let outcome = evaluator.evaluate(cert, issuer, embedded.as_ref()).await;

                report.ocsp_embedded = outcome.ocsp_embedded;
                report.crl_embedded = outcome.crl_embedded;
                report.ocsp_external_checked = outcome.ocsp_external.checked;
                report.ocsp_external_valid = outcome.ocsp_external.valid;
                report.ocsp_external_warning = outcome.ocsp_external.warning;
                report.crl_external_checked = outcome.crl_external.checked;
                report.crl_external_valid = outcome.crl_external.valid;
                report.crl_external_warning = outcome.crl_external.warning;
                validation.warnings.extend(outcome.warnings);

                if outcome.revoked {
                    report.revoked = true;
                    report.revocation_time =
                        outcome.revocation_time.and_then(format_report_time);
                    // only revocation at or before the verification time
                    // invalidates the signature
                    let before = outcome
                        .revocation_time
                        .map_or(true, |at| at <= verification_time);
                    if before {
                        validation.revoked_certificate = true;
                        validation.revoked_before_signing = true;
                    } else {
                        validation.warnings.push(
                            "certificate revoked after the verification time".to_string(),
                        );
                    }
                }
            }
            validation.certificates.push(report);
        }
    }
}

// ---- discovery ------------------------------------------------------------

fn text_of(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    pdf::opt_dict_get(doc, dict, key)
        .and_then(|obj| obj.as_str().ok())
        .map(decode_pdf_text)
}

fn document_info(doc: &Document) -> DocumentInfo {
    let mut info = DocumentInfo {
        pages: doc.get_pages().len(),
        ..Default::default()
    };
    if let Some(Object::Dictionary(dict)) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| pdf::resolve(doc, obj).ok())
    {
        info.title = text_of(doc, dict, b"Title");
        info.author = text_of(doc, dict, b"Author");
        info.subject = text_of(doc, dict, b"Subject");
        info.creator = text_of(doc, dict, b"Creator");
        info.producer = text_of(doc, dict, b"Producer");
        info.creation_date = text_of(doc, dict, b"CreationDate");
        info.mod_date = text_of(doc, dict, b"ModDate");
    }
    info
}

fn find_signatures(doc: &Document) -> SignResult<Vec<FoundSignature>> {
    let mut found = Vec::new();
    let Ok(catalog) = doc.catalog() else {
        return Err(SignError::MalformedPdf("document has no catalog".to_string()));
    };
    let Some(acroform) =
        pdf::opt_dict_get(doc, catalog, b"AcroForm").and_then(|obj| obj.as_dict().ok())
    else {
        return Ok(found);
    };
    let Some(Object::Array(fields)) = pdf::opt_dict_get(doc, acroform, b"Fields") else {
        return Ok(found);
    };

    for field_ref in fields {
        let Ok(field) = pdf::resolve(doc, field_ref).and_then(|obj| {
            obj.as_dict()
                .map_err(|_| SignError::MalformedPdf("field is not a dictionary".to_string()))
        }) else {
            continue;
        };
        let is_sig_field = pdf::opt_dict_get(doc, field, b"FT")
            .and_then(|obj| obj.as_name().ok())
            .is_some_and(|name| name == b"Sig");
        if !is_sig_field {
            continue;
        }
        let Some(value) = field.get(b"V").ok() else {
            continue;
        };
        let sig_id = value.as_reference().ok();
        let Ok(Object::Dictionary(sig)) = pdf::resolve(doc, value) else {
            continue;
        };
        found.push(read_signature(doc, catalog, sig, sig_id));
    }
    Ok(found)
}

fn read_signature(
    doc: &Document,
    catalog: &Dictionary,
    sig: &Dictionary,
    sig_id: Option<ObjectId>,
) -> FoundSignature {
    let sub_filter = pdf::opt_dict_get(doc, sig, b"SubFilter")
        .and_then(|obj| obj.as_name().ok())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default();

    let byte_range = pdf::opt_dict_get(doc, sig, b"ByteRange").and_then(|obj| {
        let items = obj.as_array().ok()?;
        if items.len() != 4 {
            return None;
        }
        let mut out = [0i64; 4];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = item.as_i64().ok()?;
        }
        Some(out)
    });

    let contents = pdf::opt_dict_get(doc, sig, b"Contents")
        .and_then(|obj| obj.as_str().ok())
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default();

    let docmdp_permission = docmdp_permission(doc, sig);
    let cert_type = if sub_filter == "ETSI.RFC3161" {
        "TimeStamp"
    } else if docmdp_permission.is_some() {
        "Certification"
    } else if is_usage_rights(doc, catalog, sig_id) {
        "UsageRights"
    } else {
        "Approval"
    };

    let info = SignatureInfo {
        name: text_of(doc, sig, b"Name"),
        reason: text_of(doc, sig, b"Reason"),
        location: text_of(doc, sig, b"Location"),
        contact_info: text_of(doc, sig, b"ContactInfo"),
        date: text_of(doc, sig, b"M"),
        sub_filter: sub_filter.clone(),
        cert_type: cert_type.to_string(),
        docmdp_permission,
        post_certification_change: false,
    };

    FoundSignature {
        sig_id,
        sub_filter,
        byte_range,
        contents,
        info,
    }
}

fn docmdp_permission(doc: &Document, sig: &Dictionary) -> Option<u8> {
    let Some(Object::Array(references)) = pdf::opt_dict_get(doc, sig, b"Reference") else {
        return None;
    };
    for reference in references {
        let Ok(Object::Dictionary(reference)) = pdf::resolve(doc, reference) else {
            continue;
        };
        let is_docmdp = pdf::opt_dict_get(doc, reference, b"TransformMethod")
            .and_then(|obj| obj.as_name().ok())
            .is_some_and(|name| name == b"DocMDP");
        if !is_docmdp {
            continue;
        }
        let permission = pdf::opt_dict_get(doc, reference, b"TransformParams")
            .and_then(|obj| obj.as_dict().ok())
            .and_then(|params| pdf::opt_dict_get(doc, params, b"P"))
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(2);
        return Some(permission.clamp(1, 3) as u8);
    }
    None
}

fn is_usage_rights(doc: &Document, catalog: &Dictionary, sig_id: Option<ObjectId>) -> bool {
    let Some(sig_id) = sig_id else {
        return false;
    };
    let Some(perms) = pdf::opt_dict_get(doc, catalog, b"Perms").and_then(|obj| obj.as_dict().ok())
    else {
        return false;
    };
    perms
        .get(b"UR3")
        .ok()
        .and_then(|obj| obj.as_reference().ok())
        .is_some_and(|id| id == sig_id)
}

/// Flag signatures whose coverage extends past a certification signature.
fn mark_post_certification_changes(found: &mut [FoundSignature]) {
    let certification_end = found
        .iter()
        .filter(|s| s.info.cert_type == "Certification")
        .filter_map(|s| s.byte_range.map(|[_, _, c, d]| c + d))
        .min();
    let Some(certification_end) = certification_end else {
        return;
    };
    for signature in found.iter_mut() {
        if signature.info.cert_type == "Certification" {
            continue;
        }
        if let Some([_, _, c, d]) = signature.byte_range {
            if c + d > certification_end {
                signature.info.post_certification_change = true;
            }
        }
    }
}

/// Sanity-check the ByteRange against the file and return digestable spans.
fn checked_ranges(
    found: &FoundSignature,
    file: &[u8],
    warnings: &mut Vec<String>,
) -> Option<[(usize, usize); 2]> {
    let Some([a, b, c, d]) = found.byte_range else {
        warnings.push("signature has no usable /ByteRange".to_string());
        return None;
    };
    if a != 0 {
        warnings.push(format!("ByteRange does not start at offset 0 (starts at {a})"));
    }
    if a < 0 || b < 0 || c < 0 || d < 0 {
        warnings.push("ByteRange contains negative values".to_string());
        return None;
    }
    let (a, b, c, d) = (a as usize, b as usize, c as usize, d as usize);
    if a + b > file.len() || c + d > file.len() || c < a + b {
        warnings.push("ByteRange exceeds the file or overlaps itself".to_string());
        return None;
    }
    if c + d != file.len() {
        warnings.push(
            "signature does not cover the end of the file; later revisions exist".to_string(),
        );
    }
    if found.contents.is_empty() {
        warnings.push("signature has no /Contents".to_string());
        return None;
    }
    Some([(a, b), (c, d)])
}

// ---- certificate reporting ------------------------------------------------

fn name_to_string(name: &X509NameRef) -> String {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let key = entry
            .object()
            .nid()
            .short_name()
            .unwrap_or("UNKNOWN")
            .to_string();
        let value = entry
            .data()
            .as_utf8()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| hex::encode(entry.data().as_slice()));
        parts.push(format!("{key}={value}"));
    }
    parts.join(", ")
}

fn certificate_report(cert: &X509) -> CertificateReport {
    let serial = cert
        .serial_number()
        .to_bn()
        .ok()
        .and_then(|bn| bn.to_hex_str().ok().map(|s| s.to_string()))
        .unwrap_or_default();
    let mut report = CertificateReport::new(
        name_to_string(cert.subject_name()),
        name_to_string(cert.issuer_name()),
        serial,
    );
    report.self_signed = is_self_signed(cert);
    report.not_before = asn1_time_to_datetime(cert.not_before()).and_then(format_report_time);
    report.not_after = asn1_time_to_datetime(cert.not_after()).and_then(format_report_time);
    report
}
