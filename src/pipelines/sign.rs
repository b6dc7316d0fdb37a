//! The signing workflow.
//!
//! Fixed order: optional field fill → placeholder emission → ByteRange
//! patch → digest → CMS build (or bare timestamp token) → optional
//! timestamp fetch → `/Contents` patch. Everything after placeholder
//! emission works on offsets recorded once; nothing is recomputed.

use crate::domain::crypto::{digest_byte_ranges, RawSigner};
use crate::domain::pdf::{self, format_pdf_date, PdfAtom, PdfDict};
use crate::domain::types::{CertType, SignOptions};
use crate::infra::error::{SignError, SignResult};
use crate::services::appearance::signature_appearance;
use crate::services::cms_builder::CmsSigner;
use crate::services::fields::fill_fields;
use crate::services::increment::{
    self, raw_byte_range_placeholder, raw_contents_placeholder, IncrementalUpdate, PlacementPlan,
};
use crate::services::timestamp::TimestampClient;
use lopdf::{Dictionary, Document, Object, ObjectId};
use openssl::x509::X509;
use time::OffsetDateTime;

/// Orchestrates one signing operation over in-memory PDF bytes.
pub struct SignWorkflow<'a> {
    signer: &'a dyn RawSigner,
    certificate: &'a X509,
    chain: &'a [X509],
    options: SignOptions,
}

impl<'a> SignWorkflow<'a> {
    pub fn new(
        signer: &'a dyn RawSigner,
        certificate: &'a X509,
        chain: &'a [X509],
        options: SignOptions,
    ) -> Self {
        Self {
            signer,
            certificate,
            chain,
            options,
        }
    }

    pub async fn run(&self, input: &[u8]) -> SignResult<Vec<u8>> {
        let signing_time = self
            .options
            .meta
            .date
            .unwrap_or_else(OffsetDateTime::now_utc);

        // stage 1: form fill, its own incremental update
        let doc = Document::load_mem(input)?;
        let mut meta = self.options.meta.clone();
        meta.date = Some(signing_time);
        let working = match fill_fields(input, &doc, &self.options.fields, &meta)? {
            Some(filled) => {
                log::info!("form fields filled (+{} bytes)", filled.len() - input.len());
                filled
            }
            None => input.to_vec(),
        };
        let doc = Document::load_mem(&working)?;

        if self.options.cert_type == CertType::Certification
            && count_signatures(&doc) > 0
        {
            return Err(SignError::ValidationError(
                "certification signatures must be the first signature in the document"
                    .to_string(),
            ));
        }

        // stage 2: emit the signature objects with placeholders
        let (mut rendered, mut plan) = self.emit_placeholder_update(&working, &doc, signing_time)?;

        // stage 3: final ByteRange, then the digest over both halves
        increment::patch_byte_range(&mut rendered, &mut plan)?;
        let digest = digest_byte_ranges(
            self.options.digest_algorithm,
            &rendered,
            &plan.digest_ranges(),
        )?;
        log::debug!(
            "byte range {:?}, {} digest computed",
            plan.byte_range,
            self.options.digest_algorithm
        );

        // stages 4–5: CMS (optionally timestamped) or a bare token
        let contents = match self.options.cert_type {
            CertType::TimeStamp => {
                let tsa = self.options.tsa.as_ref().ok_or_else(|| {
                    SignError::ConfigError(
                        "timestamp signatures require a TSA URL".to_string(),
                    )
                })?;
                let client = TimestampClient::new(tsa.clone(), &self.options.http)?;
                client
                    .request_token_for_digest(self.options.digest_algorithm, &digest)
                    .await?
            }
            _ => {
                let builder =
                    CmsSigner::new(self.options.digest_algorithm, self.certificate, self.chain);
                let signed = builder.sign_attributes(
                    self.signer,
                    &digest,
                    signing_time,
                    self.options.revocation.as_ref(),
                )?;

                let token = match &self.options.tsa {
                    Some(tsa) => {
                        let client = TimestampClient::new(tsa.clone(), &self.options.http)?;
                        Some(
                            client
                                .request_token(
                                    self.options.digest_algorithm,
                                    signed.signature_octets(),
                                )
                                .await?,
                        )
                    }
                    None => None,
                };
                signed.assemble(token.as_deref())?
            }
        };

        // stage 6: patch the placeholder in place
        increment::patch_contents(&mut rendered, &plan, &contents)?;
        log::info!(
            "signature applied ({} byte CMS in a {} byte reservation)",
            contents.len(),
            plan.contents_hex_len / 2
        );
        Ok(rendered)
    }

    fn emit_placeholder_update(
        &self,
        working: &[u8],
        doc: &Document,
        signing_time: OffsetDateTime,
    ) -> SignResult<(Vec<u8>, PlacementPlan)> {
        let mut update = IncrementalUpdate::new(working, doc)?;

        let sig_id = update.add_object(PdfAtom::Dict(self.signature_dictionary(signing_time)));

        let appearance_ref = if self.options.appearance.visible {
            let lines = self.appearance_lines(signing_time);
            match signature_appearance(&lines, self.options.appearance.rect) {
                Ok(xobject) => Some(update.add_object(xobject)),
                Err(e) => {
                    log::warn!("visible appearance skipped: {e}");
                    None
                }
            }
        } else {
            None
        };

        let page_id = self.target_page(doc)?;
        let field_name = format!("Signature{}", count_signatures(doc) + 1);
        let mut widget = PdfDict::new();
        widget.set(b"Type", PdfAtom::name("Annot"));
        widget.set(b"Subtype", PdfAtom::name("Widget"));
        widget.set(b"FT", PdfAtom::name("Sig"));
        widget.set(b"T", PdfAtom::literal(&field_name));
        widget.set(b"V", PdfAtom::Ref(sig_id, 0));
        widget.set(
            b"Rect",
            PdfAtom::Array(
                self.options
                    .appearance
                    .rect
                    .iter()
                    .map(|&v| PdfAtom::Real(v))
                    .collect(),
            ),
        );
        widget.set(b"F", PdfAtom::Int(4));
        widget.set(b"P", PdfAtom::Ref(page_id.0, page_id.1));
        if let Some(ap_id) = appearance_ref {
            let mut ap = PdfDict::new();
            ap.set(b"N", PdfAtom::Ref(ap_id, 0));
            widget.set(b"AP", PdfAtom::Dict(ap));
        }
        let field_id = update.add_object(PdfAtom::Dict(widget));

        attach_to_page(doc, page_id, field_id, &mut update)?;
        self.update_acroform_and_catalog(doc, field_id, sig_id, &mut update)?;

        let appended_from = working.len();
        let rendered = update.render()?;
        let plan = increment::locate_plan(
            &rendered,
            appended_from,
            self.options.placeholder_capacity,
        )?;
        Ok((rendered, plan))
    }

    fn signature_dictionary(&self, signing_time: OffsetDateTime) -> PdfDict {
        let mut sig = PdfDict::new();
        if self.options.cert_type == CertType::TimeStamp {
            sig.set(b"Type", PdfAtom::name("DocTimeStamp"));
        } else {
            sig.set(b"Type", PdfAtom::name("Sig"));
        }
        sig.set(b"Filter", PdfAtom::name("Adobe.PPKLite"));
        sig.set(
            b"SubFilter",
            PdfAtom::name(self.options.cert_type.sub_filter()),
        );
        sig.set(
            b"Contents",
            raw_contents_placeholder(self.options.placeholder_capacity),
        );
        sig.set(b"ByteRange", raw_byte_range_placeholder());

        if self.options.cert_type != CertType::TimeStamp {
            sig.set(b"M", PdfAtom::literal(&format_pdf_date(signing_time)));
            let meta = &self.options.meta;
            if let Some(name) = &meta.name {
                sig.set(b"Name", PdfAtom::literal(name));
            }
            if let Some(location) = &meta.location {
                sig.set(b"Location", PdfAtom::literal(location));
            }
            if let Some(reason) = &meta.reason {
                sig.set(b"Reason", PdfAtom::literal(reason));
            }
            if let Some(contact) = &meta.contact_info {
                sig.set(b"ContactInfo", PdfAtom::literal(contact));
            }
        }

        if self.options.cert_type == CertType::Certification {
            let mut params = PdfDict::new();
            params.set(b"Type", PdfAtom::name("TransformParams"));
            params.set(b"P", PdfAtom::Int(self.options.docmdp_perm.level()));
            params.set(b"V", PdfAtom::name("1.2"));
            let mut reference = PdfDict::new();
            reference.set(b"Type", PdfAtom::name("SigRef"));
            reference.set(b"TransformMethod", PdfAtom::name("DocMDP"));
            reference.set(b"TransformParams", PdfAtom::Dict(params));
            sig.set(
                b"Reference",
                PdfAtom::Array(vec![PdfAtom::Dict(reference)]),
            );
        }
        sig
    }

    fn appearance_lines(&self, signing_time: OffsetDateTime) -> Vec<String> {
        let meta = &self.options.meta;
        let mut lines = Vec::new();
        if let Some(name) = &meta.name {
            lines.push(format!("Digitally signed by {name}"));
        }
        if let Some(reason) = &meta.reason {
            lines.push(format!("Reason: {reason}"));
        }
        if let Some(location) = &meta.location {
            lines.push(format!("Location: {location}"));
        }
        lines.push(format_pdf_date(signing_time));
        lines
    }

    fn target_page(&self, doc: &Document) -> SignResult<ObjectId> {
        let pages = doc.get_pages();
        let wanted = self.options.appearance.page.max(1);
        if let Some(id) = pages.get(&wanted) {
            return Ok(*id);
        }
        pages
            .values()
            .next()
            .copied()
            .ok_or_else(|| SignError::MalformedPdf("document has no pages".to_string()))
    }

    fn update_acroform_and_catalog(
        &self,
        doc: &Document,
        field_id: u32,
        sig_id: u32,
        update: &mut IncrementalUpdate<'_>,
    ) -> SignResult<()> {
        let catalog_id = pdf::catalog_id(doc)?;
        let catalog = doc.catalog()?;
        let mut new_catalog = PdfAtom::dict_from_lopdf(catalog);
        let mut catalog_changed = false;

        match catalog.get(b"AcroForm") {
            Ok(Object::Reference(acro_id)) => {
                let acroform = doc.get_dictionary(*acro_id)?;
                let updated = updated_acroform(doc, acroform, field_id, update)?;
                update.update_object(acro_id.0, acro_id.1, PdfAtom::Dict(updated));
            }
            Ok(Object::Dictionary(acroform)) => {
                let updated = updated_acroform(doc, acroform, field_id, update)?;
                new_catalog.set(b"AcroForm", PdfAtom::Dict(updated));
                catalog_changed = true;
            }
            _ => {
                let mut acroform = PdfDict::new();
                acroform.set(b"Fields", PdfAtom::Array(vec![PdfAtom::Ref(field_id, 0)]));
                acroform.set(b"SigFlags", PdfAtom::Int(3));
                let acro_id = update.add_object(PdfAtom::Dict(acroform));
                new_catalog.set(b"AcroForm", PdfAtom::Ref(acro_id, 0));
                catalog_changed = true;
            }
        }

        match self.options.cert_type {
            CertType::Certification => {
                let mut perms = PdfDict::new();
                perms.set(b"DocMDP", PdfAtom::Ref(sig_id, 0));
                new_catalog.set(b"Perms", PdfAtom::Dict(perms));
                catalog_changed = true;
            }
            CertType::UsageRights => {
                let mut perms = PdfDict::new();
                perms.set(b"UR3", PdfAtom::Ref(sig_id, 0));
                new_catalog.set(b"Perms", PdfAtom::Dict(perms));
                catalog_changed = true;
            }
            _ => {}
        }

        if catalog_changed {
            update.update_object(catalog_id.0, catalog_id.1, PdfAtom::Dict(new_catalog));
        }
        Ok(())
    }
}

/// Count signature fields that already hold a value.
pub fn count_signatures(doc: &Document) -> usize {
    let Ok(catalog) = doc.catalog() else {
        return 0;
    };
    let Some(acroform) = pdf::opt_dict_get(doc, catalog, b"AcroForm").and_then(|o| o.as_dict().ok())
    else {
        return 0;
    };
    let Some(Object::Array(fields)) = pdf::opt_dict_get(doc, acroform, b"Fields") else {
        return 0;
    };
    fields
        .iter()
        .filter_map(|field_ref| {
            let field = pdf::resolve(doc, field_ref).ok()?.as_dict().ok()?;
            let ft = pdf::opt_dict_get(doc, field, b"FT")?.as_name().ok()?;
            (ft == b"Sig" && field.has(b"V")).then_some(())
        })
        .count()
}

fn attach_to_page(
    doc: &Document,
    page_id: ObjectId,
    field_id: u32,
    update: &mut IncrementalUpdate<'_>,
) -> SignResult<()> {
    let page = doc.get_dictionary(page_id)?;
    match page.get(b"Annots") {
        Ok(Object::Reference(annots_id)) => {
            let annots = doc.get_object(*annots_id)?.as_array().map_err(|_| {
                SignError::MalformedPdf("page /Annots reference is not an array".to_string())
            })?;
            let mut atoms: Vec<PdfAtom> = annots.iter().map(PdfAtom::from_lopdf).collect();
            atoms.push(PdfAtom::Ref(field_id, 0));
            update.update_object(annots_id.0, annots_id.1, PdfAtom::Array(atoms));
        }
        Ok(Object::Array(annots)) => {
            let mut atoms: Vec<PdfAtom> = annots.iter().map(PdfAtom::from_lopdf).collect();
            atoms.push(PdfAtom::Ref(field_id, 0));
            let mut new_page = PdfAtom::dict_from_lopdf(page);
            new_page.set(b"Annots", PdfAtom::Array(atoms));
            update.update_object(page_id.0, page_id.1, PdfAtom::Dict(new_page));
        }
        _ => {
            let mut new_page = PdfAtom::dict_from_lopdf(page);
            new_page.set(
                b"Annots",
                PdfAtom::Array(vec![PdfAtom::Ref(field_id, 0)]),
            );
            update.update_object(page_id.0, page_id.1, PdfAtom::Dict(new_page));
        }
    }
    Ok(())
}

fn updated_acroform(
    doc: &Document,
    acroform: &Dictionary,
    field_id: u32,
    update: &mut IncrementalUpdate<'_>,
) -> SignResult<PdfDict> {
    let mut out = PdfAtom::dict_from_lopdf(acroform);
    match acroform.get(b"Fields") {
        Ok(Object::Reference(fields_id)) => {
            let fields = doc.get_object(*fields_id)?.as_array().map_err(|_| {
                SignError::MalformedPdf("/Fields reference is not an array".to_string())
            })?;
            let mut atoms: Vec<PdfAtom> = fields.iter().map(PdfAtom::from_lopdf).collect();
            atoms.push(PdfAtom::Ref(field_id, 0));
            update.update_object(fields_id.0, fields_id.1, PdfAtom::Array(atoms));
        }
        Ok(Object::Array(fields)) => {
            let mut atoms: Vec<PdfAtom> = fields.iter().map(PdfAtom::from_lopdf).collect();
            atoms.push(PdfAtom::Ref(field_id, 0));
            out.set(b"Fields", PdfAtom::Array(atoms));
        }
        _ => {
            out.set(b"Fields", PdfAtom::Array(vec![PdfAtom::Ref(field_id, 0)]));
        }
    }
    out.set(b"SigFlags", PdfAtom::Int(3));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::crypto::{DigestAlgorithm, PKeySigner};
    use crate::domain::types::{SignatureMeta, SignOptions};
    use crate::testutil::{minimal_pdf, self_signed_cert, test_key};

    fn options() -> SignOptions {
        SignOptions {
            digest_algorithm: DigestAlgorithm::Sha256,
            meta: SignatureMeta {
                name: Some("Jane Signer".to_string()),
                reason: Some("Approval".to_string()),
                ..Default::default()
            },
            placeholder_capacity: 4096,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn approval_signature_produces_a_parseable_update() {
        let pkey = test_key();
        let cert = self_signed_cert(&pkey, "Sign Workflow");
        let signer = PKeySigner::new(pkey).unwrap();

        let input = minimal_pdf();
        let workflow = SignWorkflow::new(&signer, &cert, &[], options());
        let signed = workflow.run(&input).await.unwrap();

        // the original is an untouched prefix
        assert_eq!(&signed[..input.len()], input.as_slice());

        // the signed file still parses and carries a signature field
        let doc = Document::load_mem(&signed).unwrap();
        assert_eq!(count_signatures(&doc), 1);
    }

    #[tokio::test]
    async fn second_certification_signature_is_rejected() {
        let pkey = test_key();
        let cert = self_signed_cert(&pkey, "Cert Workflow");
        let signer = PKeySigner::new(pkey).unwrap();

        let input = minimal_pdf();
        let mut first = options();
        first.cert_type = CertType::Certification;
        let signed = SignWorkflow::new(&signer, &cert, &[], first)
            .run(&input)
            .await
            .unwrap();

        let mut second = options();
        second.cert_type = CertType::Certification;
        let err = SignWorkflow::new(&signer, &cert, &[], second)
            .run(&signed)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::ValidationError(_)));
    }

    #[tokio::test]
    async fn certification_signature_emits_docmdp() {
        let pkey = test_key();
        let cert = self_signed_cert(&pkey, "DocMDP Workflow");
        let signer = PKeySigner::new(pkey).unwrap();

        let input = minimal_pdf();
        let mut certification = options();
        certification.cert_type = CertType::Certification;
        let signed = SignWorkflow::new(&signer, &cert, &[], certification)
            .run(&input)
            .await
            .unwrap();

        let appended = String::from_utf8_lossy(&signed[input.len()..]).into_owned();
        assert!(appended.contains("/TransformMethod /DocMDP"));
        assert!(appended.contains("/P 2"));
        assert!(appended.contains("/Perms"));
    }

    #[tokio::test]
    async fn oversized_placeholder_capacity_is_enforced() {
        let pkey = test_key();
        let cert = self_signed_cert(&pkey, "Tiny Placeholder");
        let signer = PKeySigner::new(pkey).unwrap();

        let input = minimal_pdf();
        let mut tiny = options();
        tiny.placeholder_capacity = 64; // far too small for any real CMS
        let err = SignWorkflow::new(&signer, &cert, &[], tiny)
            .run(&input)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::SignatureTooLarge { .. }));
    }
}
