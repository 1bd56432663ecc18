#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Invoice detail export
//!
//! Assembles invoice or credit-note details for a list of invoice ids and
//! writes them to stdout as CSV or JSON. Totals are logged when done.
//!
//! ## Usage
//! ```bash
//! # CSV of invoice details
//! paylens-export iv_1 iv_2 iv_3
//!
//! # Credit notes as JSON, ids read from stdin
//! cat ids.txt | paylens-export --credit-notes --format json
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string (required)
//! - DATABASE_MAX_CONNECTIONS: pool size (default 5)
//! - LOG_FORMAT: `json` or `pretty` (default json)
//! - INVOICE_LINK_BASE_URL, INVOICE_ASSEMBLY_TIMEOUT_MS, INVOICE_BULK_MAX_SIZE

mod config;

use anyhow::{bail, Context};
use std::io::{self, BufRead, Write};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paylens_billing::{
    export_credit_notes_csv, export_details_csv, summarize_details, InvoiceDetailService,
};
use paylens_shared::create_pool;

use crate::config::{LogFormat, WorkerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug)]
struct Args {
    invoice_ids: Vec<String>,
    credit_notes: bool,
    format: OutputFormat,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut args = Args {
        invoice_ids: Vec::new(),
        credit_notes: false,
        format: OutputFormat::Csv,
    };

    let mut raw = raw.into_iter();
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--credit-notes" => args.credit_notes = true,
            "--format" => {
                let value = raw.next().context("--format needs a value")?;
                args.format = match value.as_str() {
                    "csv" => OutputFormat::Csv,
                    "json" => OutputFormat::Json,
                    other => bail!("unknown format {other:?}, expected csv or json"),
                };
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            id => args.invoice_ids.push(id.to_string()),
        }
    }

    Ok(args)
}

fn read_ids_from_stdin() -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read invoice ids from stdin")?;
        let id = line.trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the export
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .json()
                    .flatten_event(true),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("failed to load worker configuration")?;
    init_tracing(config.log_format);

    let mut args = parse_args(std::env::args().skip(1))?;
    if args.invoice_ids.is_empty() {
        args.invoice_ids = read_ids_from_stdin()?;
    }
    if args.invoice_ids.is_empty() {
        bail!("no invoice ids given");
    }

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    let service = InvoiceDetailService::from_env(pool)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling export");
            on_signal.cancel();
        }
    });

    info!(
        invoices = args.invoice_ids.len(),
        credit_notes = args.credit_notes,
        format = ?args.format,
        "Starting export"
    );

    let output = if args.credit_notes {
        let notes = service.credit_note_bulk(&args.invoice_ids, &cancel).await?;
        info!(records = notes.len(), "Credit notes assembled");
        match args.format {
            OutputFormat::Csv => export_credit_notes_csv(&notes),
            OutputFormat::Json => serde_json::to_string_pretty(&notes)?,
        }
    } else {
        let details = service.assemble_bulk(&args.invoice_ids, &cancel).await?;
        let summary = summarize_details(&details);
        info!(
            records = summary.record_count,
            paid = summary.paid_count,
            refunded = summary.refunded_count,
            plan_changes = summary.plan_change_count,
            total_amount = summary.total_amount_total,
            "Invoice details assembled"
        );
        match args.format {
            OutputFormat::Csv => export_details_csv(&details),
            OutputFormat::Json => serde_json::to_string_pretty(&details)?,
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    Ok(())
}
