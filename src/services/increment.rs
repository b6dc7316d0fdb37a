//! Incremental update writer, placeholder planner and in-place patcher.
//!
//! The writer only ever appends: object bodies, one classic cross-reference
//! section covering exactly the touched ids, and a trailer chaining to the
//! previous one via `/Prev`. The planner reserves the `/Contents` hex span
//! and four fixed-width `/ByteRange` slots; the patcher overwrites those
//! spans in place and nothing else, so every offset recorded at emission
//! time stays valid.

use crate::domain::constants::BYTE_RANGE_DIGITS;
use crate::domain::pdf::{self, serialize_indirect, PdfAtom, PdfDict};
use crate::infra::error::{SignError, SignResult};
use lopdf::Document;
use std::collections::BTreeMap;
use std::ops::Range;

/// Offsets of the spans reserved for late patching, all absolute.
#[derive(Debug, Clone)]
pub struct PlacementPlan {
    /// First hex digit inside `/Contents <…>`
    pub contents_hex_start: usize,
    /// Number of hex digits reserved
    pub contents_hex_len: usize,
    /// The four numeric `/ByteRange` slots
    pub byte_range_slots: [Range<usize>; 4],
    /// Final `[a b c d]`, available after [`patch_byte_range`]
    pub byte_range: [i64; 4],
}

impl PlacementPlan {
    /// The two `(offset, length)` spans covered by the digest.
    pub fn digest_ranges(&self) -> [(usize, usize); 2] {
        [
            (self.byte_range[0] as usize, self.byte_range[1] as usize),
            (self.byte_range[2] as usize, self.byte_range[3] as usize),
        ]
    }
}

/// Builder for one appended revision.
pub struct IncrementalUpdate<'a> {
    original: &'a [u8],
    prev_xref_offset: u64,
    next_id: u32,
    trailer_root: PdfAtom,
    trailer_info: Option<PdfAtom>,
    trailer_id: Option<PdfAtom>,
    objects: BTreeMap<(u32, u16), PdfAtom>,
}

impl<'a> IncrementalUpdate<'a> {
    pub fn new(original: &'a [u8], doc: &Document) -> SignResult<Self> {
        let catalog = pdf::catalog_id(doc)?;
        let prev_xref_offset = pdf::last_startxref(original)?;
        let trailer_info = doc.trailer.get(b"Info").ok().map(PdfAtom::from_lopdf);
        let trailer_id = doc.trailer.get(b"ID").ok().map(PdfAtom::from_lopdf);
        Ok(Self {
            original,
            prev_xref_offset,
            next_id: doc.max_id + 1,
            trailer_root: PdfAtom::Ref(catalog.0, catalog.1),
            trailer_info,
            trailer_id,
            objects: BTreeMap::new(),
        })
    }

    /// Append a brand-new object; ids are allocated strictly above the
    /// highest existing id.
    pub fn add_object(&mut self, body: PdfAtom) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert((id, 0), body);
        id
    }

    /// Emit a replacement for an existing object.
    pub fn update_object(&mut self, id: u32, generation: u16, body: PdfAtom) {
        self.objects.insert((id, generation), body);
    }

    pub fn has_objects(&self) -> bool {
        !self.objects.is_empty()
    }

    /// Serialise: original bytes, object bodies, xref subsections, trailer.
    pub fn render(self) -> SignResult<Vec<u8>> {
        if self.objects.is_empty() {
            return Err(SignError::ValidationError(
                "incremental update with no objects".to_string(),
            ));
        }

        let mut out = self.original.to_vec();
        if out.last() != Some(&b'\n') {
            out.push(b'\n');
        }

        let mut offsets: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
        for ((id, generation), body) in &self.objects {
            offsets.insert(*id, (*generation, out.len()));
            out.extend_from_slice(&serialize_indirect(*id, *generation, body));
        }

        let xref_offset = out.len();
        out.extend_from_slice(b"xref\n");
        let ids: Vec<u32> = offsets.keys().copied().collect();
        let mut run_start = 0usize;
        for i in 0..ids.len() {
            let run_ends = i + 1 == ids.len() || ids[i + 1] != ids[i] + 1;
            if run_ends {
                let first = ids[run_start];
                let count = i - run_start + 1;
                out.extend_from_slice(format!("{first} {count}\n").as_bytes());
                for id in &ids[run_start..=i] {
                    let (generation, offset) = offsets[id];
                    out.extend_from_slice(
                        format!("{offset:010} {generation:05} n \n").as_bytes(),
                    );
                }
                run_start = i + 1;
            }
        }

        let mut trailer = PdfDict::new();
        trailer.set(b"Size", PdfAtom::Int(i64::from(self.next_id)));
        trailer.set(b"Prev", PdfAtom::Int(self.prev_xref_offset as i64));
        trailer.set(b"Root", self.trailer_root);
        if let Some(info) = self.trailer_info {
            trailer.set(b"Info", info);
        }
        if let Some(id) = self.trailer_id {
            trailer.set(b"ID", id);
        }
        out.extend_from_slice(b"trailer\n");
        PdfAtom::Dict(trailer).serialize(&mut out);
        out.extend_from_slice(format!("\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());

        Ok(out)
    }
}

// ---- placeholder planning -------------------------------------------------

/// `/Contents` placeholder: `<` + `2 × capacity` zero hex digits + `>`.
pub fn raw_contents_placeholder(capacity: usize) -> PdfAtom {
    let mut raw = Vec::with_capacity(capacity * 2 + 2);
    raw.push(b'<');
    raw.resize(capacity * 2 + 1, b'0');
    raw.push(b'>');
    PdfAtom::Raw(raw)
}

/// `/ByteRange` placeholder: four zeroed slots of fixed width.
pub fn raw_byte_range_placeholder() -> PdfAtom {
    let slot = "0".repeat(BYTE_RANGE_DIGITS);
    PdfAtom::Raw(format!("[{slot} {slot} {slot} {slot}]").into_bytes())
}

/// Locate the reserved spans in the rendered bytes. Only the appended
/// revision (`appended_from..`) is searched, so placeholders from earlier
/// signatures are never matched.
pub fn locate_plan(
    bytes: &[u8],
    appended_from: usize,
    capacity: usize,
) -> SignResult<PlacementPlan> {
    let region = &bytes[appended_from..];
    let hex_len = capacity * 2;

    let contents_marker: Vec<u8> = {
        let mut marker = Vec::with_capacity(hex_len + 2);
        marker.push(b'<');
        marker.resize(hex_len + 1, b'0');
        marker.push(b'>');
        marker
    };
    let contents_rel = find(region, &contents_marker).ok_or_else(|| {
        SignError::ValidationError("contents placeholder not found in update".to_string())
    })?;
    let contents_hex_start = appended_from + contents_rel + 1;

    let slot = "0".repeat(BYTE_RANGE_DIGITS);
    let range_marker = format!("[{slot} {slot} {slot} {slot}]").into_bytes();
    let range_rel = find(region, &range_marker).ok_or_else(|| {
        SignError::ValidationError("byte range placeholder not found in update".to_string())
    })?;
    let range_start = appended_from + range_rel + 1;

    let slots = std::array::from_fn(|i| {
        let start = range_start + i * (BYTE_RANGE_DIGITS + 1);
        start..start + BYTE_RANGE_DIGITS
    });

    Ok(PlacementPlan {
        contents_hex_start,
        contents_hex_len: hex_len,
        byte_range_slots: slots,
        byte_range: [0; 4],
    })
}

/// Compute the final `[a b c d]` and write the numbers into their slots.
/// Only bytes inside the four reserved slots change.
pub fn patch_byte_range(bytes: &mut [u8], plan: &mut PlacementPlan) -> SignResult<()> {
    let hex_end = plan.contents_hex_start + plan.contents_hex_len;
    let a = 0i64;
    let b = plan.contents_hex_start as i64 - 1;
    let c = hex_end as i64 + 1;
    let d = bytes.len() as i64 - c;
    if b < 0 || d < 0 {
        return Err(SignError::ValidationError(
            "placeholder spans fall outside the file".to_string(),
        ));
    }
    plan.byte_range = [a, b, c, d];

    for (slot, value) in plan.byte_range_slots.iter().zip(plan.byte_range) {
        let text = format!("{value:>width$}", width = BYTE_RANGE_DIGITS);
        if text.len() != BYTE_RANGE_DIGITS {
            return Err(SignError::ValidationError(format!(
                "byte range value {value} exceeds {BYTE_RANGE_DIGITS} digits"
            )));
        }
        bytes[slot.clone()].copy_from_slice(text.as_bytes());
    }
    Ok(())
}

/// Hex-encode the CMS into the placeholder, zero-padded to its full width.
pub fn patch_contents(bytes: &mut [u8], plan: &PlacementPlan, cms: &[u8]) -> SignResult<()> {
    let hex = hex::encode(cms);
    if hex.len() > plan.contents_hex_len {
        return Err(SignError::SignatureTooLarge {
            got: cms.len(),
            capacity: plan.contents_hex_len / 2,
        });
    }
    let span = &mut bytes[plan.contents_hex_start..plan.contents_hex_start + plan.contents_hex_len];
    span[..hex.len()].copy_from_slice(hex.as_bytes());
    for byte in &mut span[hex.len()..] {
        *byte = b'0';
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
