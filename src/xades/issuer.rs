//! Issuer distinguished name in the layout the Service's parser accepts.
//!
//! The Service matches `X509IssuerName` textually. It expects the personal
//! attributes first, in the order given by [`LEADING`], using the short
//! labels below; any other attribute follows in RFC 4514 order.
use const_oid::db::rfc4519;
use const_oid::ObjectIdentifier;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::der::asn1::{Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef};
use x509_cert::der::{Encode, Tag, Tagged};
use x509_cert::name::Name;

use super::Error;

const ORGANIZATION_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.97");

const LEADING: [ObjectIdentifier; 5] = [
    rfc4519::GIVEN_NAME,
    rfc4519::SURNAME,
    rfc4519::SERIAL_NUMBER,
    rfc4519::COMMON_NAME,
    rfc4519::COUNTRY_NAME,
];

const LABELS: [(ObjectIdentifier, &str); 13] = [
    (rfc4519::GIVEN_NAME, "G"),
    (rfc4519::SURNAME, "SN"),
    (rfc4519::SERIAL_NUMBER, "SERIALNUMBER"),
    (rfc4519::COMMON_NAME, "CN"),
    (rfc4519::COUNTRY_NAME, "C"),
    (rfc4519::ORGANIZATION_NAME, "O"),
    (rfc4519::ORGANIZATIONAL_UNIT_NAME, "OU"),
    (rfc4519::LOCALITY_NAME, "L"),
    (rfc4519::ST, "ST"),
    (rfc4519::STREET, "STREET"),
    (rfc4519::DOMAIN_COMPONENT, "DC"),
    (rfc4519::UID, "UID"),
    (ORGANIZATION_IDENTIFIER, "2.5.4.97"),
];

fn label(oid: &ObjectIdentifier) -> Option<&'static str> {
    LABELS.iter().find(|(known, _)| known == oid).map(|(_, label)| *label)
}

/// Render `name` for `ds:X509IssuerName`.
pub fn format_issuer_name(name: &Name) -> Result<String, Error> {
    // RFC 4514 lists the most specific RDN first.
    let attributes: Vec<&AttributeTypeAndValue> =
        name.0.iter().rev().flat_map(|rdn| rdn.0.iter()).collect();

    let mut parts = Vec::with_capacity(attributes.len());
    for oid in LEADING.iter() {
        for attribute in attributes.iter().filter(|a| a.oid == *oid) {
            parts.push(render(attribute)?);
        }
    }
    for attribute in attributes.iter().filter(|a| !LEADING.contains(&a.oid)) {
        parts.push(render(attribute)?);
    }
    Ok(parts.join(", "))
}

fn render(attribute: &AttributeTypeAndValue) -> Result<String, Error> {
    let key = label(&attribute.oid)
        .map(str::to_string)
        .unwrap_or_else(|| attribute.oid.to_string());
    let value = match string_value(attribute) {
        Some(text) => escape(text),
        None => format!("#{}", hex::encode(attribute.value.to_der()?)),
    };
    Ok(format!("{key}={value}"))
}

fn string_value(attribute: &AttributeTypeAndValue) -> Option<&str> {
    let value = &attribute.value;
    match value.tag() {
        Tag::PrintableString => PrintableStringRef::try_from(value).ok().map(|s| s.as_str()),
        Tag::Utf8String => Utf8StringRef::try_from(value).ok().map(|s| s.as_str()),
        Tag::Ia5String => Ia5StringRef::try_from(value).ok().map(|s| s.as_str()),
        Tag::TeletexString => TeletexStringRef::try_from(value).ok().map(|s| s.as_str()),
        _ => None,
    }
}

/// RFC 4514 section 2.4 escaping.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}
