//! CMS SignedData: signed attributes, assembly, parsing.

pub mod attributes;
pub mod signed_data;

pub use attributes::{
    build_signed_attributes, AttributeParams, EncodedAttributes, RevocationArchival,
};
pub use signed_data::{
    build_signed_data, normalize_serial, parse_signed_data, ParsedAttribute, ParsedSignedData,
    ParsedSignerInfo, SignedDataParams,
};
