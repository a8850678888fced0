//! Rewrites applied to the signed document before submission.
//!
//! Only changes that leave every digested byte untouched belong here: the
//! document reference excludes the signature element, and the signed
//! properties are digested in exclusive form, which ignores declarations
//! made on their ancestors.
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::document::XADES_NS;
use super::Error;

const QUALIFYING_PROPERTIES: &[u8] = b"xades:QualifyingProperties";

/// Declare `xmlns:xades` on `xades:QualifyingProperties` if missing.
pub fn declare_qualifying_properties_namespace(xml: &[u8]) -> Result<Vec<u8>, Error> {
    ensure_namespace(xml, QUALIFYING_PROPERTIES, "xmlns:xades", XADES_NS)
}

fn ensure_namespace(
    xml: &[u8],
    element: &[u8],
    attribute: &str,
    namespace: &str,
) -> Result<Vec<u8>, Error> {
    let mut reader = Reader::from_reader(xml);
    {
        let config = reader.config_mut();
        config.trim_text_start = false;
        config.trim_text_end = false;
    }
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + namespace.len() + 16));
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) if start.name().as_ref() == element => {
                Event::Start(declare(start.into_owned(), attribute, namespace))
            }
            Ok(Event::Empty(start)) if start.name().as_ref() == element => {
                Event::Empty(declare(start.into_owned(), attribute, namespace))
            }
            Ok(event) => event.into_owned(),
            Err(e) => return Err(Error::Parse(e.to_string())),
        };
        writer
            .write_event(event)
            .map_err(|e| Error::Xml(e.to_string()))?;
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn declare(
    mut start: BytesStart<'static>,
    attribute: &str,
    namespace: &str,
) -> BytesStart<'static> {
    let declared = start
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == attribute.as_bytes());
    if !declared {
        start.push_attribute((attribute, namespace));
    }
    start
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adds_missing_declaration() {
        let xml = concat!(
            r#"<?xml version="1.0" encoding="utf-8"?><r><ds:Object>"#,
            r##"<xades:QualifyingProperties Target="#S"><x>a &amp; b</x>"##,
            "</xades:QualifyingProperties></ds:Object></r>"
        );
        let out = declare_qualifying_properties_namespace(xml.as_bytes()).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?><r><ds:Object>"#,
                r##"<xades:QualifyingProperties Target="#S" "##,
                r##"xmlns:xades="http://uri.etsi.org/01903/v1.3.2#"><x>a &amp; b</x>"##,
                "</xades:QualifyingProperties></ds:Object></r>"
            )
        );
    }

    #[test]
    fn existing_declaration_is_kept() {
        let xml = concat!(
            r#"<r><xades:QualifyingProperties xmlns:xades="urn:x"/>"#,
            r#"<xades:QualifyingProperties xmlns:xades="urn:x"></xades:QualifyingProperties></r>"#
        );
        let out = declare_qualifying_properties_namespace(xml.as_bytes()).unwrap();
        assert_eq!(out, xml.as_bytes());
    }

    #[test]
    fn empty_element_is_handled() {
        let out =
            declare_qualifying_properties_namespace(br#"<xades:QualifyingProperties/>"#).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<xades:QualifyingProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#"/>"#
        );
    }

    #[test]
    fn malformed_input_is_reported() {
        assert!(matches!(
            declare_qualifying_properties_namespace(b"<r><a></b></r>"),
            Err(Error::Parse(_))
        ));
    }
}
