//! Appearance streams: filled form fields and the visible signature block.

use crate::domain::pdf::{PdfAtom, PdfDict};
use crate::infra::error::{SignError, SignResult};
use regex::Regex;
use std::sync::OnceLock;

fn font_size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*Tf").unwrap())
}

/// Normalise a `/DA` string to single-line, font-first form with forced
/// black text: `/F1 <size> Tf 0 0 0 rg`. An existing font size survives;
/// the default is 10.
pub fn normalize_da(raw: &str) -> String {
    let flat = raw.replace(['\r', '\n'], " ");
    let size = font_size_pattern()
        .captures(&flat)
        .and_then(|c| c.get(1))
        .map_or("10", |m| m.as_str());
    format!("/F1 {size} Tf 0 0 0 rg")
}

fn font_size_from_da(da: &str) -> f64 {
    font_size_pattern()
        .captures(da)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(10.0)
}

fn helvetica_resources() -> PdfAtom {
    let mut f1 = PdfDict::new();
    f1.set(b"Type", PdfAtom::name("Font"));
    f1.set(b"Subtype", PdfAtom::name("Type1"));
    f1.set(b"BaseFont", PdfAtom::name("Helvetica"));
    let mut fonts = PdfDict::new();
    fonts.set(b"F1", PdfAtom::Dict(f1));
    let mut resources = PdfDict::new();
    resources.set(b"Font", PdfAtom::Dict(fonts));
    PdfAtom::Dict(resources)
}

fn form_xobject(width: f64, height: f64, content: Vec<u8>) -> PdfAtom {
    let mut dict = PdfDict::new();
    dict.set(b"Type", PdfAtom::name("XObject"));
    dict.set(b"Subtype", PdfAtom::name("Form"));
    dict.set(
        b"BBox",
        PdfAtom::Array(vec![
            PdfAtom::Int(0),
            PdfAtom::Int(0),
            PdfAtom::Real(width),
            PdfAtom::Real(height),
        ]),
    );
    dict.set(b"Resources", helvetica_resources());
    PdfAtom::stream(dict, content)
}

/// Appearance XObject for a filled text field: white background, the value
/// centred in Helvetica. `font_scale` > 0 multiplies the `/DA` size (date
/// fields render at 1.2).
pub fn text_field_appearance(
    text: &str,
    rect: [f64; 4],
    da: &str,
    font_scale: f64,
) -> SignResult<PdfAtom> {
    let width = rect[2] - rect[0];
    let height = rect[3] - rect[1];
    if width <= 0.0 || height <= 0.0 {
        return Err(SignError::ValidationError(format!(
            "invalid field rectangle {rect:?}"
        )));
    }

    let mut font_size = font_size_from_da(da);
    let max_font_size = height * 0.7;
    if font_size > max_font_size {
        font_size = max_font_size;
    }
    if font_scale > 0.0 {
        font_size = (font_size * font_scale).min(max_font_size);
    }

    // rough Helvetica advance, centred with a minimum left margin
    let text_width = text.chars().count() as f64 * font_size * 0.6;
    let text_x = ((width - text_width) / 2.0).max(1.0);
    let text_y = (height - font_size) / 2.0 + font_size * 0.2;

    let mut content = Vec::new();
    content.extend_from_slice(b"q\n");
    content.extend_from_slice(b"1 1 1 rg\n");
    content.extend_from_slice(format!("0 0 {width:.1} {height:.1} re\nf\n").as_bytes());
    content.extend_from_slice(b"BT\n");
    content.extend_from_slice(format!("/F1 {font_size:.1} Tf\n0 0 0 rg\n").as_bytes());
    content.extend_from_slice(format!("{text_x:.1} {text_y:.1} Td\n").as_bytes());
    PdfAtom::literal(text).serialize(&mut content);
    content.extend_from_slice(b" Tj\nET\nQ\n");

    Ok(form_xobject(width, height, content))
}

/// Visible signature block: signer name on top, reason and date below,
/// over a light background with a border.
pub fn signature_appearance(lines: &[String], rect: [f64; 4]) -> SignResult<PdfAtom> {
    let width = rect[2] - rect[0];
    let height = rect[3] - rect[1];
    if width <= 0.0 || height <= 0.0 {
        return Err(SignError::ValidationError(format!(
            "invalid appearance rectangle {rect:?}"
        )));
    }

    let line_count = lines.len().max(1) as f64;
    let font_size = (height / (line_count + 1.0)).clamp(6.0, 12.0);

    let mut content = Vec::new();
    content.extend_from_slice(b"q\n");
    content.extend_from_slice(b"0.94 0.96 1 rg\n");
    content.extend_from_slice(format!("0 0 {width:.1} {height:.1} re\nf\n").as_bytes());
    content.extend_from_slice(b"0.25 0.35 0.6 RG\n0.5 w\n");
    content.extend_from_slice(
        format!("0.5 0.5 {:.1} {:.1} re\nS\n", width - 1.0, height - 1.0).as_bytes(),
    );
    content.extend_from_slice(b"0 0 0 rg\nBT\n");
    content.extend_from_slice(format!("/F1 {font_size:.1} Tf\n").as_bytes());
    let mut y = height - font_size - 2.0;
    for line in lines {
        content.extend_from_slice(format!("1 0 0 1 3 {y:.1} Tm\n").as_bytes());
        PdfAtom::literal(line).serialize(&mut content);
        content.extend_from_slice(b" Tj\n");
        y -= font_size + 2.0;
    }
    content.extend_from_slice(b"ET\nQ\n");

    Ok(form_xobject(width, height, content))
}
