//! Detail assembly configuration

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_LINK_BASE_URL: &str = "http://localhost:8088";
const DEFAULT_ASSEMBLY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BULK_SIZE: usize = 500;

/// Configuration for invoice detail assembly
#[derive(Debug, Clone)]
pub struct DetailConfig {
    /// Public base URL used to build hosted invoice links
    pub link_base_url: String,
    /// Upper bound for a single assembly call, fetches included
    pub assembly_timeout: Duration,
    /// Largest id list accepted by the bulk entry points
    pub max_bulk_size: usize,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            link_base_url: DEFAULT_LINK_BASE_URL.to_string(),
            assembly_timeout: Duration::from_millis(DEFAULT_ASSEMBLY_TIMEOUT_MS),
            max_bulk_size: DEFAULT_MAX_BULK_SIZE,
        }
    }
}

impl DetailConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let link_base_url = std::env::var("INVOICE_LINK_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_LINK_BASE_URL.to_string());

        let timeout_ms = match std::env::var("INVOICE_ASSEMBLY_TIMEOUT_MS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                BillingError::Config(format!("INVOICE_ASSEMBLY_TIMEOUT_MS is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_ASSEMBLY_TIMEOUT_MS,
        };
        if timeout_ms == 0 {
            return Err(BillingError::Config(
                "INVOICE_ASSEMBLY_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let max_bulk_size = match std::env::var("INVOICE_BULK_MAX_SIZE") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                BillingError::Config(format!("INVOICE_BULK_MAX_SIZE is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_MAX_BULK_SIZE,
        };

        Ok(Self {
            link_base_url: link_base_url.trim_end_matches('/').to_string(),
            assembly_timeout: Duration::from_millis(timeout_ms),
            max_bulk_size,
        })
    }

    /// Hosted invoice page, empty when the invoice has no id yet
    pub fn invoice_link(&self, invoice_id: &str) -> String {
        if invoice_id.is_empty() {
            return String::new();
        }
        format!("{}/in/{}", self.link_base_url, invoice_id)
    }

    /// Hosted invoice PDF
    pub fn invoice_pdf_link(&self, invoice_id: &str) -> String {
        if invoice_id.is_empty() {
            return String::new();
        }
        format!("{}/in/pdf/{}", self.link_base_url, invoice_id)
    }
}
