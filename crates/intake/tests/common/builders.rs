//! Builders for test data.

#![allow(dead_code)]

use intake::config::{load_config_from_str, IntakeConfig};
use intake::results::{Invoice, InvoiceTotals, LineItem};

/// Builder for `IntakeConfig`, starting from a minimal valid config.
pub struct ConfigBuilder {
    storage_root: String,
    database_path: Option<String>,
    principals: Vec<String>,
    max_size_bytes: u64,
    max_retries: u32,
    job_timeout_secs: u64,
    storage_timeout_secs: u64,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            storage_root: "/unused".to_string(),
            database_path: None,
            principals: vec!["ops@example.com".to_string()],
            max_size_bytes: 10 * 1024 * 1024,
            max_retries: 3,
            job_timeout_secs: 15 * 60,
            storage_timeout_secs: 5,
        }
    }

    pub fn storage_root(mut self, root: &str) -> Self {
        self.storage_root = root.to_string();
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn principals(mut self, principals: &[&str]) -> Self {
        self.principals = principals.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn max_size_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = max;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn storage_timeout_secs(mut self, secs: u64) -> Self {
        self.storage_timeout_secs = secs;
        self
    }

    /// Goes through the JSON loader so validation runs as in production.
    pub fn build(self) -> IntakeConfig {
        let json = serde_json::json!({
            "version": "1.0",
            "input_bucket": "facturas-entrada",
            "output_bucket": "facturas-salida",
            "storage_root": self.storage_root,
            "database_path": self.database_path,
            "authorized_principals": self.principals,
            "upload": { "max_size_bytes": self.max_size_bytes },
            "jobs": {
                "max_retries": self.max_retries,
                "job_timeout_secs": self.job_timeout_secs
            },
            "storage_timeout_secs": self.storage_timeout_secs
        });
        load_config_from_str(&json.to_string()).expect("test config should be valid")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A two-line invoice as the extraction worker would report it.
pub fn sample_invoice() -> Invoice {
    Invoice {
        invoice_number: "F-2024-0107".to_string(),
        issue_date: "2024-05-02".to_string(),
        provider: "Papelería Central, S.A.".to_string(),
        totals: InvoiceTotals {
            subtotal: "150.00".to_string(),
            taxes: "31.50".to_string(),
            total: "181.50".to_string(),
        },
        items: vec![
            LineItem {
                description: "Folios A4".to_string(),
                quantity: "10".to_string(),
                unit_price: "5.00".to_string(),
                amount: "50.00".to_string(),
            },
            LineItem {
                description: "Tóner".to_string(),
                quantity: "1".to_string(),
                unit_price: "100.00".to_string(),
                amount: "100.00".to_string(),
            },
        ],
    }
}

/// Bytes that look like a PDF of roughly `size` bytes.
pub fn pdf_bytes(size: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(size.max(bytes.len()), b'0');
    bytes
}
