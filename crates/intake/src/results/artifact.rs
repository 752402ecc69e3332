//! Extracted invoice results and their CSV layout.
//!
//! Artifacts are flattened: one CSV row per line item, with the invoice-level
//! columns repeated on every row. An invoice without items is a single row
//! whose item columns are empty.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::IntakeError;

pub const INVOICE_COLUMNS: [&str; 6] = [
    "invoice_number",
    "issue_date",
    "provider",
    "subtotal",
    "taxes",
    "total",
];

pub const ITEM_COLUMNS: [&str; 4] = [
    "item_description",
    "item_quantity",
    "item_unit_price",
    "item_amount",
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Every column an artifact must carry, in output order.
pub fn columns() -> impl Iterator<Item = &'static str> {
    INVOICE_COLUMNS.iter().chain(ITEM_COLUMNS.iter()).copied()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: String,
    pub taxes: String,
    pub total: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
    pub amount: String,
}

/// Structured extraction output for one invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub invoice_number: String,
    pub issue_date: String,
    pub provider: String,
    pub totals: InvoiceTotals,
    pub items: Vec<LineItem>,
}

impl Invoice {
    /// Flattens the invoice into artifact rows.
    pub fn into_artifact(self, job_id: &str) -> ResultArtifact {
        let mut header = BTreeMap::new();
        header.insert("invoice_number".to_string(), self.invoice_number);
        header.insert("issue_date".to_string(), self.issue_date);
        header.insert("provider".to_string(), self.provider);
        header.insert("subtotal".to_string(), self.totals.subtotal.clone());
        header.insert("taxes".to_string(), self.totals.taxes.clone());
        header.insert("total".to_string(), self.totals.total.clone());

        let items = if self.items.is_empty() {
            vec![LineItem::default()]
        } else {
            self.items
        };

        let rows = items
            .into_iter()
            .map(|item| {
                let mut row = header.clone();
                row.insert("item_description".to_string(), item.description);
                row.insert("item_quantity".to_string(), item.quantity);
                row.insert("item_unit_price".to_string(), item.unit_price);
                row.insert("item_amount".to_string(), item.amount);
                row
            })
            .collect();

        ResultArtifact {
            job_id: job_id.to_string(),
            rows,
            totals: self.totals,
        }
    }
}

/// The extraction result of one job. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultArtifact {
    pub job_id: String,
    pub rows: Vec<BTreeMap<String, String>>,
    pub totals: InvoiceTotals,
}

impl ResultArtifact {
    fn malformed(job_id: &str, err: impl std::fmt::Display) -> IntakeError {
        IntakeError::Conflict {
            job_id: job_id.to_string(),
            reason: format!("malformed result artifact: {}", err),
        }
    }

    /// Header row: the fixed columns, then any extra columns the rows carry
    /// in name order.
    fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = columns().map(str::to_string).collect();
        let mut extra: Vec<&String> = self
            .rows
            .iter()
            .flat_map(|row| row.keys())
            .filter(|k| !header.contains(*k))
            .collect();
        extra.sort();
        extra.dedup();
        header.extend(extra.into_iter().cloned());
        header
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, IntakeError> {
        let header = self.header();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&header)
            .map_err(|e| Self::malformed(&self.job_id, e))?;

        for row in &self.rows {
            let record = header
                .iter()
                .map(|column| row.get(column).map(String::as_str).unwrap_or(""));
            writer
                .write_record(record)
                .map_err(|e| Self::malformed(&self.job_id, e))?;
        }

        writer
            .into_inner()
            .map_err(|e| Self::malformed(&self.job_id, e.error()))
    }

    pub fn from_csv(job_id: &str, bytes: &[u8]) -> Result<Self, IntakeError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| Self::malformed(job_id, e))?
            .iter()
            .map(|h| h.to_lowercase())
            .collect();

        if let Some(missing) = columns().find(|c| !header.iter().any(|h| h == c)) {
            return Err(Self::malformed(
                job_id,
                format!("missing column '{}'", missing),
            ));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Self::malformed(job_id, e))?;
            let row: BTreeMap<String, String> = header
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            rows.push(row);
        }

        let totals = rows
            .first()
            .map(|row| InvoiceTotals {
                subtotal: row.get("subtotal").cloned().unwrap_or_default(),
                taxes: row.get("taxes").cloned().unwrap_or_default(),
                total: row.get("total").cloned().unwrap_or_default(),
            })
            .unwrap_or_default();

        Ok(Self {
            job_id: job_id.to_string(),
            rows,
            totals,
        })
    }

    /// Rows that describe an actual line item.
    pub fn item_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| ITEM_COLUMNS.iter().any(|c| row.get(*c).is_some_and(|v| !v.is_empty())))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(items: Vec<LineItem>) -> Invoice {
        Invoice {
            invoice_number: "F-2024-0031".to_string(),
            issue_date: "2024-03-15".to_string(),
            provider: "Suministros Norte, S.L.".to_string(),
            totals: InvoiceTotals {
                subtotal: "100.00".to_string(),
                taxes: "21.00".to_string(),
                total: "121.00".to_string(),
            },
            items,
        }
    }

    fn item(description: &str, amount: &str) -> LineItem {
        LineItem {
            description: description.to_string(),
            quantity: "1".to_string(),
            unit_price: amount.to_string(),
            amount: amount.to_string(),
        }
    }

    #[test]
    fn test_flattened_rows_repeat_invoice_columns() {
        let artifact =
            invoice(vec![item("Paper", "60.00"), item("Toner", "40.00")]).into_artifact("job-1");

        assert_eq!(artifact.rows.len(), 2);
        assert_eq!(artifact.item_count(), 2);
        for row in &artifact.rows {
            assert_eq!(row["invoice_number"], "F-2024-0031");
            assert_eq!(row["total"], "121.00");
        }
        assert_eq!(artifact.rows[1]["item_description"], "Toner");
    }

    #[test]
    fn test_invoice_without_items_is_single_row() {
        let artifact = invoice(vec![]).into_artifact("job-2");
        assert_eq!(artifact.rows.len(), 1);
        assert_eq!(artifact.item_count(), 0);
        assert_eq!(artifact.rows[0]["item_description"], "");
        assert_eq!(artifact.rows[0]["provider"], "Suministros Norte, S.L.");
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let artifact = invoice(vec![item("Paper", "100.00")]).into_artifact("job-3");
        let csv = String::from_utf8(artifact.to_csv().unwrap()).unwrap();
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            "invoice_number,issue_date,provider,subtotal,taxes,total,item_description,item_quantity,item_unit_price,item_amount"
        );
        assert_eq!(
            lines.next().unwrap(),
            "F-2024-0031,2024-03-15,\"Suministros Norte, S.L.\",100.00,21.00,121.00,Paper,1,100.00,100.00"
        );
    }

    #[test]
    fn test_parse_written_artifact() {
        let artifact = invoice(vec![item("Paper", "60.00"), item("Toner", "40.00")])
            .into_artifact("job-4");
        let parsed = ResultArtifact::from_csv("job-4", &artifact.to_csv().unwrap()).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_parse_worker_output_with_bom_and_extra_column() {
        let csv = "\u{feff}Invoice_Number,issue_date,provider,subtotal,taxes,total,item_description,item_quantity,item_unit_price,item_amount,currency\n\
                   A-1,2024-01-02,Acme,10,2.1,12.1,Bolts,3,2,6,EUR\n";
        let parsed = ResultArtifact::from_csv("job-5", csv.as_bytes()).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0]["invoice_number"], "A-1");
        assert_eq!(parsed.rows[0]["currency"], "EUR");
        assert_eq!(parsed.totals.total, "12.1");

        let rewritten = String::from_utf8(parsed.to_csv().unwrap()).unwrap();
        assert!(rewritten.lines().next().unwrap().ends_with("item_amount,currency"));
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let csv = "invoice_number,total\nA-1,12.1\n";
        let err = ResultArtifact::from_csv("job-6", csv.as_bytes()).unwrap_err();
        match err {
            IntakeError::Conflict { job_id, reason } => {
                assert_eq!(job_id, "job-6");
                assert!(reason.contains("issue_date"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_header_only_artifact_has_no_rows() {
        let header: Vec<&str> = columns().collect();
        let csv = format!("{}\n", header.join(","));
        let parsed = ResultArtifact::from_csv("job-7", csv.as_bytes()).unwrap();
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.totals, InvoiceTotals::default());
    }
}
