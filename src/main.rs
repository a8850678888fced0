use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use serde::Serialize;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ksef_client::session::{FailedUploadInvoice, SessionStatus, UploadedInvoice};
use ksef_client::{
    Client, ContextIdentifier, Environment, InvoiceQuery, SigningCredentials, SortOrder,
    SubjectType,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service deployment.
    #[arg(long, env = "KSEF_ENVIRONMENT", default_value = "test")]
    environment: Environment,
    /// Path to the PKCS#12 file holding the signing certificate and key.
    #[arg(long, env = "KSEF_CERTIFICATE")]
    certificate: PathBuf,
    #[arg(long, env = "KSEF_CERTIFICATE_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, env = "KSEF_IDENTIFIER_TYPE", value_enum, default_value = "nip")]
    identifier_type: IdentifierType,
    /// Identifier of the entity to act for.
    #[arg(long, env = "KSEF_IDENTIFIER")]
    identifier: String,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Upload invoice XML files in one session and print the outcome.
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List invoice metadata.
    Invoices {
        #[arg(long, value_enum)]
        subject: Subject,
        /// First day, YYYY-MM-DD.
        #[arg(long, value_parser = parse_date)]
        from: OffsetDateTime,
        /// Last day, YYYY-MM-DD.
        #[arg(long, value_parser = parse_date)]
        to: Option<OffsetDateTime>,
        #[arg(long, value_enum, default_value = "desc")]
        sort: Sort,
        #[arg(long, default_value_t = 100)]
        page_size: i32,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum IdentifierType {
    Nip,
    InternalId,
    NipVatUe,
    PeppolId,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Subject {
    Seller,
    Buyer,
    ThirdParty,
    Authorized,
}

impl From<Subject> for SubjectType {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::Seller => SubjectType::Seller,
            Subject::Buyer => SubjectType::Buyer,
            Subject::ThirdParty => SubjectType::ThirdParty,
            Subject::Authorized => SubjectType::Authorized,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Sort {
    Asc,
    Desc,
}

fn parse_date(value: &str) -> Result<OffsetDateTime, String> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn context(kind: IdentifierType, value: String) -> ContextIdentifier {
    match kind {
        IdentifierType::Nip => ContextIdentifier::Nip(value),
        IdentifierType::InternalId => ContextIdentifier::InternalId(value),
        IdentifierType::NipVatUe => ContextIdentifier::NipVatUe(value),
        IdentifierType::PeppolId => ContextIdentifier::PeppolId(value),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendSummary {
    session_reference_number: String,
    status: SessionStatus,
    uploaded: Vec<UploadedInvoice>,
    failed: Vec<FailedUploadInvoice>,
}

fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let credentials = SigningCredentials::load(&args.certificate, &args.password)
        .with_context(|| format!("could not load {}", args.certificate.display()))?;
    let client = Client::builder()
        .environment(args.environment)
        .credentials(credentials)
        .context(context(args.identifier_type, args.identifier))
        .build()?;
    client.authenticate().context("authentication failed")?;

    match args.action {
        Action::Send { files } => send(&client, files),
        Action::Invoices {
            subject,
            from,
            to,
            sort,
            page_size,
        } => {
            let mut query = InvoiceQuery::new(subject.into(), from)
                .page_size(page_size)
                .sort_order(match sort {
                    Sort::Asc => SortOrder::Asc,
                    Sort::Desc => SortOrder::Desc,
                });
            if let Some(to) = to {
                query = query.date_to(to);
            }
            let invoices = client.query_invoice_metadata(&query)?;
            println!("{}", serde_json::to_string_pretty(&invoices)?);
            Ok(())
        }
    }
}

fn send(client: &Client, files: Vec<PathBuf>) -> Result<(), Error> {
    let invoices = files
        .iter()
        .map(|path| fs::read(path).with_context(|| format!("could not read {}", path.display())))
        .collect::<Result<Vec<_>, _>>()?;

    let mut session = client.open_session()?;
    for (path, invoice) in files.iter().zip(&invoices) {
        session
            .upload_invoice(invoice)
            .with_context(|| format!("upload of {} failed", path.display()))?;
    }
    session.finish()?;
    let status = session.poll_status()?;

    let summary = SendSummary {
        session_reference_number: session.reference_number().to_string(),
        uploaded: session.list_uploaded_invoices()?,
        failed: session.list_failed_uploads()?,
        status,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn dates_are_midnight_utc() {
        let date = parse_date("2025-06-01").unwrap();
        assert_eq!(date, time::macros::datetime!(2025-06-01 0:00 UTC));
        assert!(parse_date("01.06.2025").is_err());
    }
}
