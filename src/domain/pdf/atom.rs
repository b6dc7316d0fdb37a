//! Object model for the incremental section.
//!
//! The reader side of the engine consumes `lopdf` objects; the writer side
//! never mutates those. Replacement and new objects are built as
//! [`PdfAtom`] values and serialised by this module, so the emitted bytes
//! (and therefore every recorded offset) are fully under our control.
//! `Raw` carries pre-rendered spans such as the `/Contents` placeholder.

use lopdf::{Object as LoObject, StringFormat};

/// Dictionary with insertion-ordered keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfDict(pub Vec<(Vec<u8>, PdfAtom)>);

impl PdfDict {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn set(&mut self, key: &[u8], value: PdfAtom) {
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.0.push((key.to_vec(), value));
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&PdfAtom> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &[u8]) {
        self.0.retain(|(k, _)| k != key);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PdfAtom {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Name(Vec<u8>),
    LiteralString(Vec<u8>),
    HexString(Vec<u8>),
    Array(Vec<PdfAtom>),
    Dict(PdfDict),
    Stream(PdfDict, Vec<u8>),
    Ref(u32, u16),
    /// Pre-rendered bytes emitted verbatim.
    Raw(Vec<u8>),
}

impl PdfAtom {
    pub fn name(n: &str) -> Self {
        PdfAtom::Name(n.as_bytes().to_vec())
    }

    pub fn literal(s: &str) -> Self {
        PdfAtom::LiteralString(s.as_bytes().to_vec())
    }

    /// Stream constructor that keeps `/Length` in sync with the data.
    pub fn stream(mut dict: PdfDict, data: Vec<u8>) -> Self {
        dict.set(b"Length", PdfAtom::Int(data.len() as i64));
        PdfAtom::Stream(dict, data)
    }

    /// Convert a reader-side object, preserving references unresolved.
    pub fn from_lopdf(obj: &LoObject) -> Self {
        match obj {
            LoObject::Null => PdfAtom::Null,
            LoObject::Boolean(b) => PdfAtom::Bool(*b),
            LoObject::Integer(i) => PdfAtom::Int(*i),
            LoObject::Real(r) => PdfAtom::Real(f64::from(*r)),
            LoObject::Name(n) => PdfAtom::Name(n.clone()),
            LoObject::String(s, StringFormat::Hexadecimal) => PdfAtom::HexString(s.clone()),
            LoObject::String(s, StringFormat::Literal) => PdfAtom::LiteralString(s.clone()),
            LoObject::Array(items) => {
                PdfAtom::Array(items.iter().map(PdfAtom::from_lopdf).collect())
            }
            LoObject::Dictionary(dict) => PdfAtom::Dict(Self::dict_from_lopdf(dict)),
            LoObject::Stream(stream) => PdfAtom::Stream(
                Self::dict_from_lopdf(&stream.dict),
                stream.content.clone(),
            ),
            LoObject::Reference((id, generation)) => PdfAtom::Ref(*id, *generation),
        }
    }

    pub fn dict_from_lopdf(dict: &lopdf::Dictionary) -> PdfDict {
        let mut out = PdfDict::new();
        for (key, value) in dict.iter() {
            out.set(key, PdfAtom::from_lopdf(value));
        }
        out
    }

    /// Serialise into `out`, appending.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            PdfAtom::Null => out.extend_from_slice(b"null"),
            PdfAtom::Bool(true) => out.extend_from_slice(b"true"),
            PdfAtom::Bool(false) => out.extend_from_slice(b"false"),
            PdfAtom::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
            PdfAtom::Real(r) => out.extend_from_slice(format_real(*r).as_bytes()),
            PdfAtom::Name(n) => {
                out.push(b'/');
                for &b in n {
                    if is_regular_name_byte(b) {
                        out.push(b);
                    } else {
                        out.extend_from_slice(format!("#{b:02X}").as_bytes());
                    }
                }
            }
            PdfAtom::LiteralString(s) => {
                out.push(b'(');
                for &b in s {
                    match b {
                        b'(' => out.extend_from_slice(b"\\("),
                        b')' => out.extend_from_slice(b"\\)"),
                        b'\\' => out.extend_from_slice(b"\\\\"),
                        b'\r' => out.extend_from_slice(b"\\r"),
                        b'\n' => out.extend_from_slice(b"\\n"),
                        other => out.push(other),
                    }
                }
                out.push(b')');
            }
            PdfAtom::HexString(s) => {
                out.push(b'<');
                out.extend_from_slice(hex::encode(s).as_bytes());
                out.push(b'>');
            }
            PdfAtom::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    item.serialize(out);
                }
                out.push(b']');
            }
            PdfAtom::Dict(dict) => serialize_dict(dict, out),
            PdfAtom::Stream(dict, data) => {
                serialize_dict(dict, out);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\nendstream");
            }
            PdfAtom::Ref(id, generation) => {
                out.extend_from_slice(format!("{id} {generation} R").as_bytes());
            }
            PdfAtom::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }
}

fn serialize_dict(dict: &PdfDict, out: &mut Vec<u8>) {
    out.extend_from_slice(b"<<");
    for (key, value) in &dict.0 {
        out.push(b' ');
        PdfAtom::Name(key.clone()).serialize(out);
        out.push(b' ');
        value.serialize(out);
    }
    out.extend_from_slice(b" >>");
}

fn is_regular_name_byte(b: u8) -> bool {
    (0x21..=0x7e).contains(&b) && !matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#')
}

fn format_real(r: f64) -> String {
    if r.fract() == 0.0 && r.abs() < 1e15 {
        format!("{}", r as i64)
    } else {
        let s = format!("{r:.5}");
        let s = s.trim_end_matches('0');
        s.trim_end_matches('.').to_string()
    }
}

/// Write `id gen obj … endobj` and return the body.
pub fn serialize_indirect(id: u32, generation: u16, body: &PdfAtom) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{id} {generation} obj\n").as_bytes());
    body.serialize(&mut out);
    out.extend_from_slice(b"\nendobj\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(atom: &PdfAtom) -> String {
        let mut out = Vec::new();
        atom.serialize(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn scalar_rendering() {
        assert_eq!(render(&PdfAtom::Null), "null");
        assert_eq!(render(&PdfAtom::Int(-42)), "-42");
        assert_eq!(render(&PdfAtom::Real(10.0)), "10");
        assert_eq!(render(&PdfAtom::Real(10.25)), "10.25");
        assert_eq!(render(&PdfAtom::name("Sig")), "/Sig");
        assert_eq!(render(&PdfAtom::Ref(12, 0)), "12 0 R");
    }

    #[test]
    fn literal_string_escaping() {
        assert_eq!(
            render(&PdfAtom::literal("a(b)c\\d")),
            "(a\\(b\\)c\\\\d)"
        );
    }

    #[test]
    fn name_escaping() {
        assert_eq!(render(&PdfAtom::name("A B#C")), "/A#20B#23C");
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let mut dict = PdfDict::new();
        dict.set(b"Type", PdfAtom::name("Sig"));
        dict.set(b"Filter", PdfAtom::name("Adobe.PPKLite"));
        assert_eq!(
            render(&PdfAtom::Dict(dict)),
            "<< /Type /Sig /Filter /Adobe.PPKLite >>"
        );
    }

    #[test]
    fn stream_carries_length() {
        let atom = PdfAtom::stream(PdfDict::new(), b"q Q".to_vec());
        let rendered = render(&atom);
        assert!(rendered.contains("/Length 3"));
        assert!(rendered.contains("stream\nq Q\nendstream"));
    }

    #[test]
    fn indirect_framing() {
        let body = PdfAtom::Int(7);
        let bytes = serialize_indirect(15, 0, &body);
        assert_eq!(bytes, b"15 0 obj\n7\nendobj\n");
    }
}
