//! Concrete implementations of the data source and report sink ports.

pub mod filesystem;
pub mod memory;
pub mod report;

pub use filesystem::{load_portfolio, load_price_table, CsvDirectorySource};
pub use memory::InMemoryMarketData;
pub use report::JsonReportWriter;
