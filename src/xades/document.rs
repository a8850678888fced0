//! XML assembly for the authentication request and its signature parts.
//!
//! Everything is written compact, without indentation, so the bytes that
//! are digested are exactly the bytes that are sent.
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::c14n;
use super::Error;
use crate::identity::ContextIdentifier;

pub const AUTH_NS: &str = "http://ksef.mf.gov.pl/auth/token/2.0";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";

pub const ROOT: &str = "AuthTokenRequest";

const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";

/// Element-level writer on top of quick-xml.
pub(crate) struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<&mut Self, Error> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::Xml(e.to_string()))?;
        Ok(self)
    }

    pub fn declaration(&mut self) -> Result<&mut Self, Error> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self, Error> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Start(start))
    }

    pub fn end(&mut self, name: &str) -> Result<&mut Self, Error> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self, Error> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Empty(start))
    }

    /// `<name attrs>text</name>`
    pub fn leaf(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> Result<&mut Self, Error> {
        self.start(name, attributes)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Append already serialized XML verbatim.
    pub fn raw(&mut self, xml: &[u8]) -> &mut Self {
        self.writer.get_mut().extend_from_slice(xml);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

/// The unsigned `AuthTokenRequest` document.
pub fn auth_token_request(challenge: &str, identity: &ContextIdentifier) -> Result<Vec<u8>, Error> {
    let mut xml = XmlBuilder::new();
    xml.declaration()?
        .start(
            ROOT,
            &[("xmlns:xsi", XSI_NS), ("xmlns:xsd", XSD_NS), ("xmlns", AUTH_NS)],
        )?
        .leaf("Challenge", &[], challenge)?
        .start("ContextIdentifier", &[])?
        .leaf(identity.element_name(), &[], identity.value())?
        .end("ContextIdentifier")?
        .leaf(
            "SubjectIdentifierType",
            &[],
            identity.subject_identifier_type().as_str(),
        )?
        .end(ROOT)?;
    Ok(xml.finish())
}

/// Fresh element ids for one signature.
#[derive(Debug, Clone)]
pub struct SignatureIds {
    pub signature: String,
    pub signed_properties: String,
}

impl SignatureIds {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4();
        Self {
            signature: format!("Signature-{id}"),
            signed_properties: format!("SignedProperties-{id}"),
        }
    }
}

/// Values bound into `xades:SignedProperties`.
#[derive(Debug, Clone)]
pub struct SignedPropertiesInput<'a> {
    pub signing_time: &'a str,
    /// Base64 SHA-256 of the signing certificate DER.
    pub certificate_digest: &'a str,
    pub issuer_name: &'a str,
    /// Decimal serial number.
    pub serial_number: &'a str,
}

/// Standalone `xades:SignedProperties`, declaring every namespace it uses.
pub fn signed_properties(
    ids: &SignatureIds,
    input: &SignedPropertiesInput<'_>,
) -> Result<Vec<u8>, Error> {
    let mut xml = XmlBuilder::new();
    xml.start(
        "xades:SignedProperties",
        &[
            ("xmlns:xades", XADES_NS),
            ("xmlns:ds", DS_NS),
            ("Id", ids.signed_properties.as_str()),
        ],
    )?
    .start("xades:SignedSignatureProperties", &[])?
    .leaf("xades:SigningTime", &[], input.signing_time)?
    .start("xades:SigningCertificate", &[])?
    .start("xades:Cert", &[])?
    .start("xades:CertDigest", &[])?
    .empty("ds:DigestMethod", &[("Algorithm", SHA256)])?
    .leaf("ds:DigestValue", &[], input.certificate_digest)?
    .end("xades:CertDigest")?
    .start("xades:IssuerSerial", &[])?
    .leaf("ds:X509IssuerName", &[], input.issuer_name)?
    .leaf("ds:X509SerialNumber", &[], input.serial_number)?
    .end("xades:IssuerSerial")?
    .end("xades:Cert")?
    .end("xades:SigningCertificate")?
    .end("xades:SignedSignatureProperties")?
    .end("xades:SignedProperties")?;
    Ok(xml.finish())
}

/// Standalone `ds:SignedInfo` referencing the whole document and the
/// signed properties.
pub fn signed_info(
    ids: &SignatureIds,
    document_digest: &str,
    properties_digest: &str,
) -> Result<Vec<u8>, Error> {
    let properties_uri = format!("#{}", ids.signed_properties);
    let mut xml = XmlBuilder::new();
    xml.start("ds:SignedInfo", &[("xmlns:ds", DS_NS)])?
        .empty("ds:CanonicalizationMethod", &[("Algorithm", c14n::EXCLUSIVE)])?
        .empty("ds:SignatureMethod", &[("Algorithm", RSA_SHA256)])?
        .start("ds:Reference", &[("URI", "")])?
        .start("ds:Transforms", &[])?
        .empty("ds:Transform", &[("Algorithm", ENVELOPED)])?
        .empty("ds:Transform", &[("Algorithm", c14n::INCLUSIVE)])?
        .end("ds:Transforms")?
        .empty("ds:DigestMethod", &[("Algorithm", SHA256)])?
        .leaf("ds:DigestValue", &[], document_digest)?
        .end("ds:Reference")?
        .start(
            "ds:Reference",
            &[("Type", SIGNED_PROPERTIES_TYPE), ("URI", properties_uri.as_str())],
        )?
        .start("ds:Transforms", &[])?
        .empty("ds:Transform", &[("Algorithm", c14n::EXCLUSIVE)])?
        .end("ds:Transforms")?
        .empty("ds:DigestMethod", &[("Algorithm", SHA256)])?
        .leaf("ds:DigestValue", &[], properties_digest)?
        .end("ds:Reference")?
        .end("ds:SignedInfo")?;
    Ok(xml.finish())
}

/// Parts of the finished `ds:Signature`.
pub struct SignatureParts<'a> {
    pub ids: &'a SignatureIds,
    /// Canonical `ds:SignedInfo`, exactly as signed.
    pub signed_info: &'a [u8],
    /// Base64 signature value.
    pub signature_value: &'a str,
    /// Base64 signing certificate DER.
    pub certificate: &'a str,
    /// Canonical `xades:SignedProperties`, exactly as digested.
    pub signed_properties: &'a [u8],
}

/// The `ds:Signature` element. `xades:QualifyingProperties` carries no
/// namespace declaration of its own; see
/// [`declare_qualifying_properties_namespace`].
///
/// [`declare_qualifying_properties_namespace`]: super::postprocess::declare_qualifying_properties_namespace
pub fn signature(parts: &SignatureParts<'_>) -> Result<Vec<u8>, Error> {
    let target = format!("#{}", parts.ids.signature);
    let mut xml = XmlBuilder::new();
    xml.start(
        "ds:Signature",
        &[("xmlns:ds", DS_NS), ("Id", parts.ids.signature.as_str())],
    )?
    .raw(parts.signed_info)
    .leaf("ds:SignatureValue", &[], parts.signature_value)?
    .start("ds:KeyInfo", &[])?
    .start("ds:X509Data", &[])?
    .leaf("ds:X509Certificate", &[], parts.certificate)?
    .end("ds:X509Data")?
    .end("ds:KeyInfo")?
    .start("ds:Object", &[])?
    .start("xades:QualifyingProperties", &[("Target", target.as_str())])?
    .raw(parts.signed_properties)
    .end("xades:QualifyingProperties")?
    .end("ds:Object")?
    .end("ds:Signature")?;
    Ok(xml.finish())
}

/// Insert `signature` as the last child of the root element.
pub fn insert_signature(document: &[u8], signature: &[u8]) -> Result<Vec<u8>, Error> {
    let closing = format!("</{ROOT}>");
    let position = document
        .windows(closing.len())
        .rposition(|window| window == closing.as_bytes())
        .ok_or_else(|| Error::Xml(format!("document has no closing {ROOT} tag")))?;

    let mut signed = Vec::with_capacity(document.len() + signature.len());
    signed.extend_from_slice(&document[..position]);
    signed.extend_from_slice(signature);
    signed.extend_from_slice(&document[position..]);
    Ok(signed)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_document_layout() {
        let xml = auth_token_request("CH-1", &ContextIdentifier::Nip("8126178616".into())).unwrap();

        assert_eq!(
            String::from_utf8(xml).unwrap(),
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<AuthTokenRequest xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
                r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
                r#"xmlns="http://ksef.mf.gov.pl/auth/token/2.0">"#,
                "<Challenge>CH-1</Challenge>",
                "<ContextIdentifier><Nip>8126178616</Nip></ContextIdentifier>",
                "<SubjectIdentifierType>certificateSubject</SubjectIdentifierType>",
                "</AuthTokenRequest>"
            )
        );
    }

    #[test]
    fn eu_vat_identity_uses_fingerprint() {
        let context = ContextIdentifier::NipVatUe("PL8126178616".into());
        let xml = String::from_utf8(auth_token_request("CH-2", &context).unwrap()).unwrap();

        assert!(xml.contains("<ContextIdentifier><NipVatUe>PL8126178616</NipVatUe>"));
        assert!(xml.contains(
            "<SubjectIdentifierType>certificateFingerprint</SubjectIdentifierType>"
        ));
    }

    #[test]
    fn text_is_escaped() {
        let xml = auth_token_request("a<b&c", &ContextIdentifier::InternalId("x".into())).unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("<Challenge>a&lt;b&amp;c</Challenge>"));
    }

    #[test]
    fn signed_info_references_properties() {
        let ids = SignatureIds::generate();
        let xml = String::from_utf8(signed_info(&ids, "DOC", "PROPS").unwrap()).unwrap();

        assert!(xml.contains(&format!(r##"URI="#{}""##, ids.signed_properties)));
        assert!(xml.contains(r#"<ds:Reference URI="">"#));
        assert!(xml.contains("<ds:DigestValue>DOC</ds:DigestValue>"));
        assert!(xml.contains("<ds:DigestValue>PROPS</ds:DigestValue>"));
        assert!(ids.signed_properties.ends_with(ids.signature.trim_start_matches("Signature-")));
    }

    #[test]
    fn signature_goes_last_in_root() {
        let document = b"<AuthTokenRequest><Challenge>c</Challenge></AuthTokenRequest>";
        let signed = insert_signature(document, b"<ds:Signature/>").unwrap();

        assert_eq!(
            signed,
            b"<AuthTokenRequest><Challenge>c</Challenge><ds:Signature/></AuthTokenRequest>".to_vec()
        );
        assert!(insert_signature(b"<Other/>", b"<ds:Signature/>").is_err());
    }
}
