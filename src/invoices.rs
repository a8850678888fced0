//! Invoice metadata queries and invoice download.
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, Result, ValidationError};
use crate::gateway::{self, Gateway};
use crate::http::HttpRequest;
use crate::pagination::OffsetPage;

pub const METADATA_PATH: &str = "/invoices/query/metadata";
pub const DOWNLOAD_PATH: &str = "/invoices/ksef";

pub const DEFAULT_PAGE_SIZE: i32 = 100;

/// Which side of the invoice the querying entity is on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum SubjectType {
    /// Seller: own outgoing invoices.
    #[serde(rename = "Subject1")]
    #[strum(serialize = "Subject1")]
    Seller,
    /// Buyer: own incoming invoices.
    #[serde(rename = "Subject2")]
    #[strum(serialize = "Subject2")]
    Buyer,
    #[serde(rename = "Subject3")]
    #[strum(serialize = "Subject3")]
    ThirdParty,
    /// Acting on behalf of another party.
    #[serde(rename = "SubjectAuthorized")]
    #[strum(serialize = "SubjectAuthorized")]
    Authorized,
}

impl SubjectType {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Self::from_str(value).map_err(|_| ValidationError::InvalidSubjectType(value.to_string()))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Self::from_str(value).map_err(|_| ValidationError::InvalidSortOrder(value.to_string()))
    }
}

/// Filter and paging for a metadata query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceQuery {
    pub subject_type: Option<SubjectType>,
    pub date_from: Option<OffsetDateTime>,
    pub date_to: Option<OffsetDateTime>,
    pub sort_order: Option<SortOrder>,
    /// Zero-based page index.
    pub page_offset: i32,
    pub page_size: i32,
}

impl InvoiceQuery {
    pub fn new(subject_type: SubjectType, date_from: OffsetDateTime) -> Self {
        Self {
            subject_type: Some(subject_type),
            date_from: Some(date_from),
            ..Self::default()
        }
    }

    pub fn date_to(mut self, date_to: OffsetDateTime) -> Self {
        self.date_to = Some(date_to);
        self
    }

    pub fn sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_offset(mut self, page_offset: i32) -> Self {
        self.page_offset = page_offset;
        self
    }

    /// Check mandatory fields and apply defaults, before any request.
    pub fn normalize(&self) -> Result<NormalizedQuery, ValidationError> {
        let subject_type = self.subject_type.ok_or(ValidationError::SubjectTypeRequired)?;
        let date_from = self.date_from.ok_or(ValidationError::DateFromRequired)?;
        let page_size = if self.page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        };

        Ok(NormalizedQuery {
            subject_type,
            date_from,
            date_to: self.date_to,
            sort_order: self.sort_order.unwrap_or_default(),
            page_offset: self.page_offset.max(0),
            page_size,
        })
    }
}

/// A validated [`InvoiceQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub subject_type: SubjectType,
    pub date_from: OffsetDateTime,
    pub date_to: Option<OffsetDateTime>,
    pub sort_order: SortOrder,
    pub page_offset: i32,
    pub page_size: i32,
}

impl NormalizedQuery {
    pub fn path(&self, page_offset: i32) -> String {
        format!(
            "{METADATA_PATH}?sortOrder={}&pageOffset={page_offset}&pageSize={}",
            self.sort_order, self.page_size
        )
    }

    pub fn body(&self) -> Result<MetadataQueryBody> {
        let format = |date: OffsetDateTime| {
            date.format(&Rfc3339)
                .map_err(|e| Error::Protocol(format!("cannot format query date: {e}")))
        };
        Ok(MetadataQueryBody {
            subject_type: self.subject_type,
            date_range: DateRange {
                date_type: "PermanentStorage",
                from: format(self.date_from)?,
                to: self.date_to.map(format).transpose()?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataQueryBody {
    pub subject_type: SubjectType,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub date_type: &'static str,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceMetadata {
    pub ksef_number: String,
    pub permanent_storage_date: String,
}

pub type MetadataPage = OffsetPage<InvoiceMetadata>;

/// One page of metadata at `page_offset`.
pub fn fetch_metadata_page(
    gateway: &Gateway,
    access_token: &str,
    query: &NormalizedQuery,
    page_offset: i32,
) -> Result<MetadataPage> {
    let request = gateway
        .post_json(&query.path(page_offset), &query.body()?)?
        .with_bearer(access_token);
    gateway.send_json(request)
}

/// Raw invoice XML by KSeF number.
pub fn download(gateway: &Gateway, access_token: &str, ksef_number: &str) -> Result<Vec<u8>> {
    validate_ksef_number(ksef_number)?;
    let request = HttpRequest::get(gateway.url(&format!("{DOWNLOAD_PATH}/{ksef_number}")))
        .with_header("Accept", gateway::XML)
        .with_bearer(access_token);
    Ok(gateway.send(request)?.body)
}

/// KSeF numbers go into the URL path unescaped, so only characters that
/// need no escaping are accepted.
pub fn validate_ksef_number(ksef_number: &str) -> Result<(), ValidationError> {
    if ksef_number.is_empty() {
        return Err(ValidationError::KsefNumberRequired);
    }
    if !ksef_number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ValidationError::InvalidKsefNumber(ksef_number.to_string()));
    }
    Ok(())
}
