//! Field filling as part of the signing workflow.

mod common;

use common::{pdf_with_fields, self_signed_cert, test_key};
use lopdf::Document;
use pdf_signer::{
    sign_pdf_bytes, verify_pdf_bytes, DigestAlgorithm, FieldFillOptions, PKeySigner, SignOptions,
    SignatureMeta, SigningMaterial, VerifyOptions,
};

fn material(common_name: &str) -> SigningMaterial {
    let pkey = test_key();
    let certificate = self_signed_cert(&pkey, common_name);
    SigningMaterial {
        signer: PKeySigner::new(pkey).unwrap(),
        certificate,
        chain: Vec::new(),
    }
}

fn fill_options(uid: &str) -> SignOptions {
    SignOptions {
        digest_algorithm: DigestAlgorithm::Sha256,
        meta: SignatureMeta {
            name: Some("Alice Bravo Carol".to_string()),
            reason: Some("filled".to_string()),
            ..Default::default()
        },
        fields: FieldFillOptions {
            signer_uid: Some(uid.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn field_value(doc: &Document, name_contains: &str) -> Option<String> {
    for (_, object) in doc.objects.iter() {
        let Ok(dict) = object.as_dict() else { continue };
        let Ok(field_name) = dict.get(b"T").and_then(|o| o.as_str()) else {
            continue;
        };
        if String::from_utf8_lossy(field_name).contains(name_contains) {
            if let Ok(value) = dict.get(b"V").and_then(|o| o.as_str()) {
                return Some(String::from_utf8_lossy(value).into_owned());
            }
        }
    }
    None
}

#[tokio::test]
async fn initials_and_date_fields_are_filled_and_covered_by_the_signature() {
    let input = pdf_with_fields(&[
        b"initials_page_1_signer_u77",
        b"date_id_1_signer_u77",
        b"initials_page_1_signer_someoneelse",
    ]);
    let material = material("Field Filler");

    let signed = sign_pdf_bytes(&input, &material, fill_options("u77"))
        .await
        .unwrap();

    let doc = Document::load_mem(&signed).unwrap();
    assert_eq!(
        field_value(&doc, "initials_page_1_signer_u77").as_deref(),
        Some("ABC")
    );
    let date_value = field_value(&doc, "date_id_1_signer_u77").expect("date filled");
    // default layout MM/DD/YYYY HH:MM plus a timezone suffix
    assert!(date_value.ends_with("GMT") || date_value.contains(':'));

    // the other signer's field is untouched
    assert!(field_value(&doc, "someoneelse").is_none());

    // the fill update sits inside the signed range: verification passes
    let report = verify_pdf_bytes(
        &signed,
        VerifyOptions {
            allow_untrusted_roots: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(report.signatures[0].validation.valid_signature);
    assert!(report.signatures[0].validation.trusted_issuer);
}

#[tokio::test]
async fn hex_uid_field_names_match_too() {
    let hex_uid = hex::encode("u77");
    let field_name = format!("initials_page_1_signer_{hex_uid}");
    let input = pdf_with_fields(&[field_name.as_bytes()]);
    let material = material("Hex UID");

    let signed = sign_pdf_bytes(&input, &material, fill_options("u77"))
        .await
        .unwrap();
    let doc = Document::load_mem(&signed).unwrap();
    assert_eq!(field_value(&doc, "initials_page_1").as_deref(), Some("ABC"));
}

#[tokio::test]
async fn without_uid_no_fields_change() {
    let input = pdf_with_fields(&[b"initials_page_1_signer_u77"]);
    let material = material("No UID");

    let mut options = fill_options("u77");
    options.fields = FieldFillOptions::default();
    let signed = sign_pdf_bytes(&input, &material, options).await.unwrap();

    let doc = Document::load_mem(&signed).unwrap();
    assert!(field_value(&doc, "initials_page_1_signer_u77").is_none());
}
