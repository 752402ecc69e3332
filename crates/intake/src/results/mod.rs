//! Result artifacts written by the extraction worker, and their listing.

pub mod artifact;
pub mod listing;

pub use artifact::{Invoice, InvoiceTotals, LineItem, ResultArtifact};
pub use listing::{ResultPage, ResultSummary, ResultsQuery};
