use xml_c14n::{canonicalize_xml, CanonicalizationMode, CanonicalizationOptions};

use super::Error;

/// Canonical XML 1.0, comments removed.
pub const INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// Exclusive XML Canonicalization 1.0, comments removed.
pub const EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Inclusive canonicalization keeps every in-scope namespace declaration,
/// including ones no element uses.
pub fn inclusive(xml: &[u8]) -> Result<Vec<u8>, Error> {
    canonicalize(xml, CanonicalizationMode::Canonical1_0)
}

pub fn exclusive(xml: &[u8]) -> Result<Vec<u8>, Error> {
    canonicalize(xml, CanonicalizationMode::ExclusiveCanonical1_0)
}

fn canonicalize(xml: &[u8], mode: CanonicalizationMode) -> Result<Vec<u8>, Error> {
    let input = std::str::from_utf8(xml).map_err(|e| Error::Canonicalization(e.to_string()))?;
    let options = CanonicalizationOptions {
        mode,
        keep_comments: false,
        inclusive_ns_prefixes: vec![],
    };
    canonicalize_xml(input, options)
        .map(String::into_bytes)
        .map_err(|e| Error::Canonicalization(e.to_string()))
}
