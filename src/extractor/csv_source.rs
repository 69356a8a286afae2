//! Tabular (CSV) source extraction.
//!
//! CSV values are read as strings; `SchemaMapper`'s numeric coercion (called
//! downstream in `map_row`) is what turns `"$50,000"`-style strings into
//! real numbers for the unified numeric fields.

use serde_json::Value;
use tracing::warn;

use crate::models::RawRecord;

pub async fn extract(csv_path: &str, cap: usize) -> Result<Vec<RawRecord>, &'static str> {
    let path = csv_path.to_string();
    tokio::task::spawn_blocking(move || read_rows(&path, cap))
        .await
        .map_err(|_| "data")?
}

fn read_rows(path: &str, cap: usize) -> Result<Vec<RawRecord>, &'static str> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        warn!(path, error = %e, "failed to open csv source");
        "network"
    })?;

    let headers = reader.headers().map_err(|_| "data")?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        if rows.len() >= cap {
            break;
        }
        let record = result.map_err(|e| {
            warn!(path, error = %e, "failed to parse csv row");
            "data"
        })?;

        let mut row = RawRecord::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(value.to_string()));
        }
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_rows_up_to_the_configured_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "symbol,name,price_usd").unwrap();
        for i in 0..10 {
            writeln!(file, "SYM{i},Name{i},{}", 100 + i).unwrap();
        }
        let path = file.path().to_str().unwrap().to_string();

        let rows = extract(&path, 5).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].get("symbol").unwrap().as_str().unwrap(), "SYM0");
    }

    #[tokio::test]
    async fn missing_file_is_a_network_error() {
        let result = extract("/nonexistent/path/source_b.csv", 5).await;
        assert_eq!(result.unwrap_err(), "network");
    }
}
