//! Shared fixtures for integration tests.

#![allow(dead_code)]

use lopdf::{dictionary, Document, Object, StringFormat};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509NameBuilder, X509};

/// One-page PDF document with catalog, page tree and trailer.
pub fn minimal_pdf() -> Vec<u8> {
    pdf_with_fields(&[])
}

/// One-page PDF with a text field per given name (merged field/widget).
pub fn pdf_with_fields(field_names: &[&[u8]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut field_ids = Vec::new();
    for (i, name) in field_names.iter().enumerate() {
        let y = 100 + (i as i64) * 40;
        let field_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Tx",
            "T" => Object::String(name.to_vec(), StringFormat::Literal),
            "Rect" => vec![100.into(), y.into(), 260.into(), (y + 30).into()],
            "DA" => Object::String(b"0 0 0 rg /Helvetica 10 Tf".to_vec(), StringFormat::Literal),
            "F" => 4,
        });
        field_ids.push(field_id);
    }

    let annots: Vec<Object> = field_ids.iter().map(|id| (*id).into()).collect();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Annots" => annots,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog = if field_ids.is_empty() {
        doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        })
    } else {
        let fields: Vec<Object> = field_ids.iter().map(|id| (*id).into()).collect();
        let acroform_id = doc.add_object(dictionary! {
            "Fields" => fields,
        });
        doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "AcroForm" => acroform_id,
        })
    };
    doc.trailer.set("Root", catalog);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize test PDF");
    bytes
}

pub fn test_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

/// Self-signed signing certificate: Digital Signature + Non-Repudiation KU,
/// Document Signing EKU.
pub fn self_signed_cert(pkey: &PKey<Private>, common_name: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    name.append_entry_by_text("O", "pdf-signer tests").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(pkey).unwrap();

    let serial = BigNum::from_u32(rand::random::<u32>() | 1)
        .and_then(|bn| bn.to_asn1_integer())
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .non_repudiation()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder
        .append_extension(
            ExtendedKeyUsage::new()
                .other("1.3.6.1.5.5.7.3.36")
                .build()
                .unwrap(),
        )
        .unwrap();

    builder.sign(pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}
