//! Pre-signature form filling.
//!
//! Fills `initials_page_<page>_signer_<uid>` and `date_id_<id>_signer_<uid>`
//! AcroForm fields for the configured signer UID, locks them read-only and
//! regenerates their appearance. The result is an ordinary incremental
//! update whose bytes are covered by the subsequent signature's ByteRange.

use crate::domain::pdf::{self, decode_pdf_text, PdfAtom, PdfDict};
use crate::domain::types::{FieldFillOptions, SignatureMeta};
use crate::infra::error::{SignError, SignResult};
use crate::services::appearance::{normalize_da, text_field_appearance};
use crate::services::increment::IncrementalUpdate;
use lopdf::{Dictionary, Document, Object};
use regex::Regex;
use std::sync::OnceLock;
use time::OffsetDateTime;

const INITIALS_PATTERN: &str = r"initials_page_(\d+)_signer_(.+)";
const DATE_PATTERN: &str = r"date_id_(\d+)_signer_(.+)";

/// Date fields render slightly larger than their `/DA` size.
const DATE_FIELD_FONT_SCALE: f64 = 1.2;

/// ReadOnly flag value OR-ed into `/Ff` on fill.
const FF_READ_ONLY: i64 = 2;

fn hex_tail_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9a-fA-F]+").unwrap())
}

/// Run the field filler. Returns the updated document bytes, or `None`
/// when nothing matched (no UID configured, no AcroForm, no fields for
/// this signer).
pub fn fill_fields(
    original: &[u8],
    doc: &Document,
    options: &FieldFillOptions,
    meta: &SignatureMeta,
) -> SignResult<Option<Vec<u8>>> {
    let uid = match options.signer_uid.as_deref() {
        Some(uid) if !uid.is_empty() => uid,
        _ => return Ok(None),
    };

    let initials = meta.name.as_deref().map(compute_initials).filter(|i| !i.is_empty());
    let date_value = match meta.date {
        Some(date) => Some(format_date_value(
            date,
            &resolve_date_layout(options.date_format.as_deref(), options.locale.as_deref()),
        )?),
        None => None,
    };
    if initials.is_none() && date_value.is_none() {
        return Ok(None);
    }

    let fields = match acroform_fields(doc) {
        Some(fields) => fields,
        None => return Ok(None),
    };

    let initials_re = Regex::new(INITIALS_PATTERN).expect("static pattern");
    let date_re = Regex::new(DATE_PATTERN).expect("static pattern");

    let mut update = IncrementalUpdate::new(original, doc)?;
    for field_ref in fields {
        let field_id = match field_ref.as_reference() {
            Ok(id) => id,
            Err(_) => continue,
        };
        let field = match doc.get_dictionary(field_id) {
            Ok(dict) => dict,
            Err(_) => continue,
        };
        let name = match pdf::opt_dict_get(doc, field, b"T").and_then(|o| o.as_str().ok()) {
            Some(bytes) => decode_pdf_text(bytes),
            None => continue,
        };

        let (value, font_scale) =
            if matches_signer(&name, &initials_re, "initials_page_", uid) {
                match &initials {
                    Some(initials) => (initials.clone(), 0.0),
                    None => continue,
                }
            } else if matches_signer(&name, &date_re, "date_id_", uid) {
                match &date_value {
                    Some(date) => (date.clone(), DATE_FIELD_FONT_SCALE),
                    None => continue,
                }
            } else {
                continue;
            };

        log::debug!("filling field {name:?} for signer {uid}");
        let rebuilt = rebuild_field(doc, field, &value, font_scale, &mut update)?;
        update.update_object(field_id.0, field_id.1, PdfAtom::Dict(rebuilt));

        // widget kids carry their own value and appearance
        if let Some(Object::Array(kids)) = pdf::opt_dict_get(doc, field, b"Kids") {
            for kid_ref in kids {
                let kid_id = match kid_ref.as_reference() {
                    Ok(id) => id,
                    Err(_) => continue,
                };
                if let Ok(kid) = doc.get_dictionary(kid_id) {
                    let rebuilt = rebuild_field(doc, kid, &value, font_scale, &mut update)?;
                    update.update_object(kid_id.0, kid_id.1, PdfAtom::Dict(rebuilt));
                }
            }
        }
    }

    if update.has_objects() {
        Ok(Some(update.render()?))
    } else {
        Ok(None)
    }
}

/// First character of each whitespace-separated name part, uppercased.
pub fn compute_initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Match a decoded field name against a pattern and compare the signer
/// UID. The UID matches literally, as hex of the UID, or when the field's
/// value hex-decodes to the UID. When the regex fails but the name starts
/// with the pattern prefix, a hex-looking tail after `signer_` is used.
pub fn matches_signer(decoded_name: &str, pattern: &Regex, prefix: &str, uid: &str) -> bool {
    let field_signer = match pattern.captures(decoded_name) {
        Some(captures) => match captures.get(2) {
            Some(m) => m.as_str().to_string(),
            None => return false,
        },
        None => {
            if !decoded_name.starts_with(prefix) {
                return false;
            }
            let Some(idx) = decoded_name.find("signer_") else {
                return false;
            };
            let tail = &decoded_name[idx + "signer_".len()..];
            match hex_tail_pattern().find(tail) {
                Some(m) => m.as_str().to_string(),
                None => return false,
            }
        }
    };

    if field_signer == uid {
        return true;
    }
    if hex::encode(uid.as_bytes()) == field_signer {
        return true;
    }
    if let Ok(decoded) = hex::decode(&field_signer) {
        if decoded == uid.as_bytes() {
            return true;
        }
    }
    false
}

/// Effective `time` format-description layout for the date part.
pub fn resolve_date_layout(date_format: Option<&str>, locale: Option<&str>) -> String {
    if let Some(format) = date_format.map(str::trim).filter(|f| !f.is_empty()) {
        return format.to_string();
    }
    if let Some(locale) = locale.map(str::trim).filter(|l| !l.is_empty()) {
        let normalized = locale.replace('_', "-");
        let layout = match normalized.as_str() {
            "en-US" => Some("[month]/[day]/[year] [hour]:[minute]"),
            "en-GB" | "fr-FR" | "es-ES" | "it-IT" => Some("[day]/[month]/[year] [hour]:[minute]"),
            "de-DE" => Some("[day].[month].[year] [hour]:[minute]"),
            _ => None,
        };
        if let Some(layout) = layout {
            return layout.to_string();
        }
    }
    "[month]/[day]/[year] [hour]:[minute]".to_string()
}

/// Format the signing time with the layout and append the timezone:
/// `GMT` for UTC, `±HH:MM` otherwise.
pub fn format_date_value(date: OffsetDateTime, layout: &str) -> SignResult<String> {
    let format = time::format_description::parse(layout)
        .map_err(|e| SignError::ConfigError(format!("invalid date format {layout:?}: {e}")))?;
    let rendered = date
        .format(&format)
        .map_err(|e| SignError::ConfigError(format!("cannot format date: {e}")))?;

    let offset_minutes = date.offset().whole_minutes();
    let timezone = if offset_minutes == 0 {
        "GMT".to_string()
    } else {
        let sign = if offset_minutes < 0 { '-' } else { '+' };
        let minutes = offset_minutes.abs();
        format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60)
    };
    Ok(format!("{rendered} {timezone}"))
}

fn acroform_fields(doc: &Document) -> Option<&Vec<Object>> {
    let catalog = doc.catalog().ok()?;
    let acroform = pdf::opt_dict_get(doc, catalog, b"AcroForm")?.as_dict().ok()?;
    match pdf::opt_dict_get(doc, acroform, b"Fields")? {
        Object::Array(fields) => Some(fields),
        _ => None,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// `/Rect` of the field itself, else of its first kid widget, else a
/// 100×20 default.
fn field_rect(doc: &Document, field: &Dictionary) -> [f64; 4] {
    let rect_of = |dict: &Dictionary| -> Option<[f64; 4]> {
        let rect = match pdf::opt_dict_get(doc, dict, b"Rect")? {
            Object::Array(items) if items.len() >= 4 => items,
            _ => return None,
        };
        let mut out = [0.0; 4];
        for (slot, item) in out.iter_mut().zip(rect.iter()) {
            *slot = number(item)?;
        }
        Some(out)
    };

    if let Some(rect) = rect_of(field) {
        return rect;
    }
    if let Some(Object::Array(kids)) = pdf::opt_dict_get(doc, field, b"Kids") {
        if let Some(first) = kids.first() {
            if let Ok(Object::Dictionary(kid)) = pdf::resolve(doc, first) {
                if let Some(rect) = rect_of(kid) {
                    return rect;
                }
            }
        }
    }
    [0.0, 0.0, 100.0, 20.0]
}

/// Build the replacement dictionary: new `/V` and `/AS`, ReadOnly `/Ff`,
/// decoded `/T`, normalised `/DA`, fresh `/AP /N` appearance.
fn rebuild_field(
    doc: &Document,
    field: &Dictionary,
    value: &str,
    font_scale: f64,
    update: &mut IncrementalUpdate<'_>,
) -> SignResult<PdfDict> {
    let mut rebuilt = PdfDict::new();
    let mut existing_ff = 0i64;

    for (key, entry) in field.iter() {
        match key.as_slice() {
            b"V" | b"AS" | b"AP" => {}
            b"Ff" => existing_ff = entry.as_i64().unwrap_or(0),
            b"T" => {
                let decoded = entry
                    .as_str()
                    .map(decode_pdf_text)
                    .unwrap_or_default();
                rebuilt.set(b"T", PdfAtom::literal(&decoded));
            }
            b"DA" => {
                let normalized = entry
                    .as_str()
                    .map(|raw| normalize_da(&String::from_utf8_lossy(raw)))
                    .unwrap_or_else(|_| normalize_da(""));
                rebuilt.set(b"DA", PdfAtom::literal(&normalized));
            }
            _ => rebuilt.set(key, PdfAtom::from_lopdf(entry)),
        }
    }

    let rect = field_rect(doc, field);
    let da = rebuilt
        .get(b"DA")
        .and_then(|atom| match atom {
            PdfAtom::LiteralString(s) => Some(String::from_utf8_lossy(s).into_owned()),
            _ => None,
        })
        .unwrap_or_else(|| normalize_da(""));
    match text_field_appearance(value, rect, &da, font_scale) {
        Ok(appearance) => {
            let ap_id = update.add_object(appearance);
            let mut ap = PdfDict::new();
            ap.set(b"N", PdfAtom::Ref(ap_id, 0));
            rebuilt.set(b"AP", PdfAtom::Dict(ap));
        }
        Err(e) => log::warn!("skipping appearance for field: {e}"),
    }

    rebuilt.set(b"Ff", PdfAtom::Int(existing_ff | FF_READ_ONLY));
    rebuilt.set(b"V", PdfAtom::literal(value));
    rebuilt.set(b"AS", PdfAtom::literal(value));
    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pdf_with_text_field;
    use time::macros::datetime;

    #[test]
    fn initials_from_name_parts() {
        assert_eq!(compute_initials("Jane Signer"), "JS");
        assert_eq!(compute_initials("  anna  maria  o'brien "), "AMO");
        assert_eq!(compute_initials(""), "");
        assert_eq!(compute_initials("élodie durand"), "ÉD");
    }

    #[test]
    fn uid_matching_forms() {
        let re = Regex::new(INITIALS_PATTERN).unwrap();
        // literal
        assert!(matches_signer("initials_page_1_signer_u42", &re, "initials_page_", "u42"));
        // hex-encoded uid in the field name
        assert!(matches_signer(
            &format!("initials_page_1_signer_{}", hex::encode("u42")),
            &re,
            "initials_page_",
            "u42"
        ));
        // field signer hex-decodes to the uid
        assert!(matches_signer("initials_page_2_signer_753432", &re, "initials_page_", "u42"));
        // wrong uid
        assert!(!matches_signer("initials_page_1_signer_other", &re, "initials_page_", "u42"));
        // wrong prefix never falls back
        assert!(!matches_signer("unrelated_signer_753432", &re, "initials_page_", "u42"));
    }

    #[test]
    fn layout_resolution_precedence() {
        assert_eq!(
            resolve_date_layout(Some("[year]-[month]-[day]"), Some("de-DE")),
            "[year]-[month]-[day]"
        );
        assert_eq!(
            resolve_date_layout(None, Some("de_DE")),
            "[day].[month].[year] [hour]:[minute]"
        );
        assert_eq!(
            resolve_date_layout(None, Some("xx-XX")),
            "[month]/[day]/[year] [hour]:[minute]"
        );
        assert_eq!(
            resolve_date_layout(None, None),
            "[month]/[day]/[year] [hour]:[minute]"
        );
    }

    #[test]
    fn date_value_gets_timezone_suffix() {
        let utc = datetime!(2025-01-05 09:30:00 UTC);
        let value = format_date_value(utc, "[month]/[day]/[year] [hour]:[minute]").unwrap();
        assert_eq!(value, "01/05/2025 09:30 GMT");

        let offset = datetime!(2025-01-05 09:30:00 +05:30);
        let value = format_date_value(offset, "[day].[month].[year] [hour]:[minute]").unwrap();
        assert_eq!(value, "05.01.2025 09:30 +05:30");

        let negative = datetime!(2025-01-05 09:30:00 -07:00);
        let value = format_date_value(negative, "[month]/[day]/[year] [hour]:[minute]").unwrap();
        assert!(value.ends_with("-07:00"));
    }

    #[test]
    fn matching_field_is_filled_and_locked() {
        let original = pdf_with_text_field(b"initials_page_1_signer_u42");
        let doc = Document::load_mem(&original).unwrap();

        let options = FieldFillOptions {
            signer_uid: Some("u42".to_string()),
            ..Default::default()
        };
        let meta = SignatureMeta {
            name: Some("Jane Signer".to_string()),
            date: Some(datetime!(2025-01-05 09:30:00 UTC)),
            ..Default::default()
        };

        let filled = fill_fields(&original, &doc, &options, &meta)
            .unwrap()
            .expect("field should match");
        assert_eq!(&filled[..original.len()], original.as_slice());

        let updated = Document::load_mem(&filled).unwrap();
        let catalog = updated.catalog().unwrap();
        let acroform = pdf::opt_dict_get(&updated, catalog, b"AcroForm")
            .unwrap()
            .as_dict()
            .unwrap();
        let fields = pdf::opt_dict_get(&updated, acroform, b"Fields").unwrap();
        let field_id = fields.as_array().unwrap()[0].as_reference().unwrap();
        let field = updated.get_dictionary(field_id).unwrap();

        assert_eq!(field.get(b"V").unwrap().as_str().unwrap(), b"JS");
        assert_eq!(field.get(b"AS").unwrap().as_str().unwrap(), b"JS");
        assert_eq!(field.get(b"Ff").unwrap().as_i64().unwrap() & 2, 2);
        assert!(field.get(b"AP").is_ok());
    }

    #[test]
    fn utf16_field_name_matches() {
        let mut name = vec![0xfe, 0xff];
        for unit in "date_id_3_signer_u42".encode_utf16() {
            name.extend_from_slice(&unit.to_be_bytes());
        }
        let original = pdf_with_text_field(&name);
        let doc = Document::load_mem(&original).unwrap();

        let options = FieldFillOptions {
            signer_uid: Some("u42".to_string()),
            locale: Some("de-DE".to_string()),
            ..Default::default()
        };
        let meta = SignatureMeta {
            date: Some(datetime!(2025-02-03 14:00:00 UTC)),
            ..Default::default()
        };

        let filled = fill_fields(&original, &doc, &options, &meta)
            .unwrap()
            .expect("UTF-16 field should match");
        let updated = Document::load_mem(&filled).unwrap();
        let catalog = updated.catalog().unwrap();
        let acroform = pdf::opt_dict_get(&updated, catalog, b"AcroForm")
            .unwrap()
            .as_dict()
            .unwrap();
        let fields = pdf::opt_dict_get(&updated, acroform, b"Fields").unwrap();
        let field_id = fields.as_array().unwrap()[0].as_reference().unwrap();
        let field = updated.get_dictionary(field_id).unwrap();
        assert_eq!(
            field.get(b"V").unwrap().as_str().unwrap(),
            b"03.02.2025 14:00 GMT"
        );
    }

    #[test]
    fn no_uid_is_a_no_op() {
        let original = pdf_with_text_field(b"initials_page_1_signer_u42");
        let doc = Document::load_mem(&original).unwrap();
        let meta = SignatureMeta {
            name: Some("Jane Signer".to_string()),
            date: Some(datetime!(2025-01-05 09:30:00 UTC)),
            ..Default::default()
        };
        let result =
            fill_fields(&original, &doc, &FieldFillOptions::default(), &meta).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn non_matching_uid_is_a_no_op() {
        let original = pdf_with_text_field(b"initials_page_1_signer_someoneelse");
        let doc = Document::load_mem(&original).unwrap();
        let options = FieldFillOptions {
            signer_uid: Some("u42".to_string()),
            ..Default::default()
        };
        let meta = SignatureMeta {
            name: Some("Jane Signer".to_string()),
            ..Default::default()
        };
        assert!(fill_fields(&original, &doc, &options, &meta).unwrap().is_none());
    }
}
