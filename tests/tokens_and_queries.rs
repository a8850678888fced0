use std::sync::Barrier;
use std::thread;

use serde_json::json;
use time::macros::datetime;
use time::Duration;

use ksef_client::{
    ApiToken, Error, InvoiceQuery, SortOrder, SubjectType, TokenPair, ValidationError,
};

mod common;
use common::*;

fn tokens(access_valid_for: Duration, refresh_valid_for: Duration) -> TokenPair {
    TokenPair {
        access_token: ApiToken::new("ACC1", NOW + access_valid_for),
        refresh_token: ApiToken::new("REF1", NOW + refresh_valid_for),
    }
}

fn script_refresh(http: &MockHttp) {
    let access = json!({"token": "ACC2", "validUntil": rfc3339(NOW + Duration::minutes(15))});
    http.json("POST", "/auth/token/refresh", json!({ "accessToken": access }));
}

#[test]
fn fresh_access_token_needs_no_call() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    let client = client(&http, &clock, Some(tokens(Duration::hours(1), Duration::days(7))));

    assert_eq!(client.access_token().unwrap(), "ACC1");
    assert!(http.requests().is_empty());
}

#[test]
fn expired_access_token_is_refreshed_once() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    script_refresh(&http);
    let client = client(&http, &clock, Some(tokens(-Duration::seconds(1), Duration::days(7))));

    assert_eq!(client.access_token().unwrap(), "ACC2");
    assert_eq!(client.access_token().unwrap(), "ACC2");

    let refreshes = http.requests_to("POST", "/auth/token/refresh");
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].header("authorization"), Some("Bearer REF1"));
}

#[test]
fn concurrent_callers_share_one_refresh() {
    const CALLERS: usize = 8;
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    script_refresh(&http);
    let client = client(&http, &clock, Some(tokens(-Duration::seconds(1), Duration::days(7))));
    let barrier = Barrier::new(CALLERS);

    let tokens: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    client.access_token().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(tokens.iter().all(|t| t == "ACC2"), "{tokens:?}");
    assert_eq!(http.count("POST", "/auth/token/refresh"), 1);
}

#[test]
fn unparseable_expiry_counts_as_expired() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    script_refresh(&http);
    let pair = TokenPair {
        access_token: ApiToken {
            token: "ACC1".into(),
            valid_until: "soon".into(),
        },
        refresh_token: ApiToken::new("REF1", NOW + Duration::days(7)),
    };
    let client = client(&http, &clock, Some(pair));

    assert_eq!(client.access_token().unwrap(), "ACC2");
}

#[test]
fn expired_refresh_token_requires_reauthentication() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    let client = client(&http, &clock, Some(tokens(-Duration::minutes(5), -Duration::seconds(1))));

    assert!(matches!(
        client.access_token(),
        Err(Error::ReauthenticationRequired(_))
    ));
    assert!(http.requests().is_empty());
}

#[test]
fn unauthenticated_client_requires_authentication() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    let client = client(&http, &clock, None);

    assert!(matches!(
        client.access_token(),
        Err(Error::ReauthenticationRequired(_))
    ));
}

#[test]
fn refresh_without_access_token_is_a_protocol_error() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    http.json("POST", "/auth/token/refresh", json!({}));
    let client = client(&http, &clock, Some(tokens(-Duration::seconds(1), Duration::days(7))));

    assert!(matches!(
        client.access_token(),
        Err(Error::MissingToken("access token"))
    ));
}

fn metadata_page(offset: i32, has_more: bool, truncated: bool) -> serde_json::Value {
    json!({
        "hasMore": has_more,
        "isTruncated": truncated,
        "invoices": [{
            "ksefNumber": format!("5265877635-20250601-0000000000{offset:02}-00"),
            "permanentStorageDate": "2025-06-01T10:00:00Z"
        }]
    })
}

#[test]
fn metadata_pages_until_has_more_is_false() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    http.json("POST", "/invoices/query/metadata", metadata_page(0, true, false))
        .json("POST", "/invoices/query/metadata", metadata_page(1, true, false))
        .json("POST", "/invoices/query/metadata", metadata_page(2, false, false));
    let client = client(&http, &clock, Some(fresh_tokens()));

    let query = InvoiceQuery::new(SubjectType::Buyer, datetime!(2025-06-01 0:00 UTC))
        .date_to(datetime!(2025-06-30 0:00 UTC))
        .sort_order(SortOrder::Asc)
        .page_size(10);
    let invoices = client.query_invoice_metadata(&query).unwrap();
    assert_eq!(invoices.len(), 3);

    let requests = http.requests_to("POST", "/invoices/query/metadata");
    let offsets: Vec<_> = requests
        .iter()
        .map(|r| query_param(&r.url, "pageOffset").unwrap())
        .collect();
    assert_eq!(offsets, ["0", "1", "2"]);
    assert_eq!(query_param(&requests[0].url, "pageSize").as_deref(), Some("10"));
    assert_eq!(query_param(&requests[0].url, "sortOrder").as_deref(), Some("asc"));
    assert_eq!(requests[0].header("authorization"), Some("Bearer ACC1"));

    let body: serde_json::Value = serde_json::from_slice(requests[0].body()).unwrap();
    assert_eq!(body["subjectType"], "Subject2");
    assert_eq!(body["dateRange"]["dateType"], "PermanentStorage");
    assert_eq!(body["dateRange"]["to"], "2025-06-30T00:00:00Z");
}

#[test]
fn truncated_metadata_returns_nothing() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    http.json("POST", "/invoices/query/metadata", metadata_page(0, true, false))
        .json("POST", "/invoices/query/metadata", metadata_page(1, true, true));
    let client = client(&http, &clock, Some(fresh_tokens()));

    let query = InvoiceQuery::new(SubjectType::Seller, datetime!(2025-01-01 0:00 UTC));
    assert!(matches!(
        client.query_invoice_metadata(&query),
        Err(Error::TruncatedResult)
    ));
    assert_eq!(http.count("POST", "/invoices/query/metadata"), 2);
}

#[test]
fn single_page_query_uses_the_requested_offset() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    http.json("POST", "/invoices/query/metadata", metadata_page(4, true, false));
    let client = client(&http, &clock, Some(fresh_tokens()));

    let query =
        InvoiceQuery::new(SubjectType::Seller, datetime!(2025-01-01 0:00 UTC)).page_offset(4);
    let page = client.query_invoice_metadata_page(&query).unwrap();
    assert!(page.has_more);
    assert_eq!(page.invoices.len(), 1);

    let request = &http.requests()[0];
    assert_eq!(query_param(&request.url, "pageOffset").as_deref(), Some("4"));
    assert_eq!(query_param(&request.url, "sortOrder").as_deref(), Some("desc"));
    assert_eq!(query_param(&request.url, "pageSize").as_deref(), Some("100"));
}

#[test]
fn incomplete_query_is_rejected_before_any_call() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    let client = client(&http, &clock, Some(fresh_tokens()));

    let query = InvoiceQuery::default();
    assert!(matches!(
        client.query_invoice_metadata(&query),
        Err(Error::Validation(ValidationError::SubjectTypeRequired))
    ));
    assert!(http.requests().is_empty());
}

#[test]
fn invoice_download_returns_raw_xml() {
    let http = MockHttp::new();
    let clock = FakeClock::new(NOW);
    let number = "5265877635-20250626-010080DD2B5E-26";
    http.on("GET", &format!("/invoices/ksef/{number}"), 200, "<Faktura/>");
    let client = client(&http, &clock, Some(fresh_tokens()));

    assert_eq!(client.download_invoice(number).unwrap(), b"<Faktura/>");
    let request = &http.requests()[0];
    assert_eq!(request.header("accept"), Some("application/xml"));
    assert_eq!(request.header("authorization"), Some("Bearer ACC1"));

    assert!(matches!(
        client.download_invoice("a/b"),
        Err(Error::Validation(ValidationError::InvalidKsefNumber(_)))
    ));
    assert_eq!(http.requests().len(), 1);
}
