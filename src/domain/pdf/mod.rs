//! PDF primitives: the reader capability layer over `lopdf` plus the
//! object model and codecs used by the incremental writer.

pub mod atom;
pub mod strings;

pub use atom::{serialize_indirect, PdfAtom, PdfDict};
pub use strings::{decode_pdf_text, format_pdf_date, parse_pdf_date};

use crate::infra::error::{SignError, SignResult};
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Follow at most one level of indirection. A reference to a reference is
/// treated as malformed.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> SignResult<&'a Object> {
    match obj {
        Object::Reference(id) => {
            let target = doc.get_object(*id)?;
            if matches!(target, Object::Reference(_)) {
                return Err(SignError::MalformedPdf(format!(
                    "object {} {} is a reference to a reference",
                    id.0, id.1
                )));
            }
            Ok(target)
        }
        other => Ok(other),
    }
}

/// Fetch `key` from `dict`, resolving an indirect value.
pub fn dict_get<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> SignResult<&'a Object> {
    let obj = dict.get(key)?;
    resolve(doc, obj)
}

/// Like [`dict_get`] but absent keys yield `None`.
pub fn opt_dict_get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj).ok())
}

/// Object id of the document catalog from the trailer `/Root`.
pub fn catalog_id(doc: &Document) -> SignResult<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| SignError::MalformedPdf("trailer has no /Root reference".to_string()))
}

/// Byte offset recorded by the last `startxref` keyword in the file.
pub fn last_startxref(bytes: &[u8]) -> SignResult<u64> {
    const KEYWORD: &[u8] = b"startxref";
    let tail_start = bytes.len().saturating_sub(2048);
    let tail = &bytes[tail_start..];
    let pos = tail
        .windows(KEYWORD.len())
        .rposition(|window| window == KEYWORD)
        .ok_or_else(|| SignError::MalformedPdf("startxref not found".to_string()))?;

    let after = &tail[pos + KEYWORD.len()..];
    let digits: String = after
        .iter()
        .copied()
        .skip_while(u8::is_ascii_whitespace)
        .take_while(u8::is_ascii_digit)
        .map(char::from)
        .collect();
    digits
        .parse()
        .map_err(|_| SignError::MalformedPdf("startxref offset is not a number".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startxref_is_found_in_tail() {
        let mut bytes = vec![b'x'; 100];
        bytes.extend_from_slice(b"startxref\n12345\n%%EOF\n");
        assert_eq!(last_startxref(&bytes).unwrap(), 12345);
    }

    #[test]
    fn missing_startxref_is_malformed() {
        assert!(matches!(
            last_startxref(b"%PDF-1.7 no trailer here"),
            Err(SignError::MalformedPdf(_))
        ));
    }

    #[test]
    fn last_startxref_wins() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"startxref\n100\n%%EOF\n");
        bytes.extend_from_slice(b"startxref\n2200\n%%EOF\n");
        assert_eq!(last_startxref(&bytes).unwrap(), 2200);
    }
}
