//! Property tests for the placement planner and verdict invariants.

mod common;

use common::{minimal_pdf, self_signed_cert, test_key};
use lopdf::Document;
use pdf_signer::services::increment::{
    locate_plan, patch_byte_range, patch_contents, raw_byte_range_placeholder,
    raw_contents_placeholder, IncrementalUpdate,
};
use pdf_signer::domain::pdf::{PdfAtom, PdfDict};
use proptest::prelude::*;

fn rendered_with_placeholder(capacity: usize) -> (Vec<u8>, usize) {
    let original = minimal_pdf();
    let doc = Document::load_mem(&original).unwrap();
    let mut update = IncrementalUpdate::new(&original, &doc).unwrap();

    let mut sig = PdfDict::new();
    sig.set(b"Type", PdfAtom::name("Sig"));
    sig.set(b"Contents", raw_contents_placeholder(capacity));
    sig.set(b"ByteRange", raw_byte_range_placeholder());
    update.add_object(PdfAtom::Dict(sig));

    let appended_from = original.len();
    (update.render().unwrap(), appended_from)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// ByteRange partition: a = 0, c = a + b + reserved span, d = len − c.
    #[test]
    fn byte_range_partitions_the_file(capacity in 16usize..512) {
        let (mut rendered, appended_from) = rendered_with_placeholder(capacity);
        let mut plan = locate_plan(&rendered, appended_from, capacity).unwrap();
        patch_byte_range(&mut rendered, &mut plan).unwrap();

        let [a, b, c, d] = plan.byte_range;
        prop_assert_eq!(a, 0);
        prop_assert_eq!(c, b + (capacity * 2) as i64 + 2);
        prop_assert_eq!(d, rendered.len() as i64 - c);

        // the two ranges exclude exactly the `<…>` interior and delimiters
        prop_assert_eq!(rendered[b as usize], b'<');
        prop_assert_eq!(rendered[(c - 1) as usize], b'>');
    }

    /// Patching the CMS never alters a byte outside the hex span.
    #[test]
    fn contents_patch_is_contained(
        capacity in 16usize..256,
        payload in prop::collection::vec(any::<u8>(), 1..16),
    ) {
        let (mut rendered, appended_from) = rendered_with_placeholder(capacity);
        let mut plan = locate_plan(&rendered, appended_from, capacity).unwrap();
        patch_byte_range(&mut rendered, &mut plan).unwrap();

        let before = rendered.clone();
        patch_contents(&mut rendered, &plan, &payload).unwrap();

        for (i, (old, new)) in before.iter().zip(rendered.iter()).enumerate() {
            let inside = i >= plan.contents_hex_start
                && i < plan.contents_hex_start + plan.contents_hex_len;
            if !inside {
                prop_assert_eq!(old, new, "byte {} changed outside the placeholder", i);
            }
        }
    }

    /// A payload one byte over capacity is always rejected.
    #[test]
    fn oversize_payload_rejected(capacity in 16usize..64) {
        let (mut rendered, appended_from) = rendered_with_placeholder(capacity);
        let mut plan = locate_plan(&rendered, appended_from, capacity).unwrap();
        patch_byte_range(&mut rendered, &mut plan).unwrap();

        let payload = vec![0u8; capacity + 1];
        prop_assert!(patch_contents(&mut rendered, &plan, &payload).is_err());
    }
}

/// Signing twice with identical embedded revocation data yields identical
/// signed-attribute encodings (SET OF ordering is canonical).
#[test]
fn revocation_embedding_is_deterministic() {
    use pdf_signer::domain::cms::{
        build_signed_attributes, AttributeParams, RevocationArchival,
    };
    use time::macros::datetime;

    let pkey = test_key();
    let cert = self_signed_cert(&pkey, "Deterministic Attrs");
    let cert_der = cert.to_der().unwrap();

    let archival = RevocationArchival {
        ocsp: vec![vec![0x30, 0x03, 0x02, 0x01, 0x00], vec![0x30, 0x03, 0x02, 0x01, 0x01]],
        crl: vec![vec![0x30, 0x03, 0x02, 0x01, 0x02]],
    };

    let build = || {
        build_signed_attributes(&AttributeParams {
            message_digest: &[0x5a; 32],
            signing_time: datetime!(2025-04-01 00:00:00 UTC),
            signer_cert_der: &cert_der,
            revocation: Some(&archival),
        })
        .signed_form()
    };
    assert_eq!(build(), build());
}
