//! Staging file helpers

use crate::core::error::StepError;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Render a JSON value as a CSV cell
///
/// `null` becomes an empty cell; strings are written without quotes.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Staging file for `prefix`, e.g. `temp/stock_daily_prices_temp.csv`
pub fn staged_path(temp_dir: &Path, prefix: &str) -> PathBuf {
    temp_dir.join(format!("{prefix}_temp.csv"))
}

/// Create the parent directory of `path` if needed
pub fn ensure_parent_dir(path: &Path) -> Result<(), StepError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Append rows to a CSV file, writing `headers` first when the file is new
///
/// Returns the number of rows written.
pub fn append_rows<I, R>(path: &Path, headers: &[String], rows: I) -> Result<usize, StepError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    ensure_parent_dir(path)?;
    let is_new = !path.is_file();

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);

    if is_new {
        writer.write_record(headers)?;
    }

    let mut written = 0;
    for row in rows {
        writer.write_record(row)?;
        written += 1;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = written, "Appended rows");
    Ok(written)
}

/// Append JSON records, one column per header; absent keys become empty cells
pub fn append_records(
    path: &Path,
    headers: &[String],
    records: &[Map<String, Value>],
) -> Result<usize, StepError> {
    let rows = records.iter().map(|record| {
        headers
            .iter()
            .map(|h| record.get(h).map(cell).unwrap_or_default())
            .collect::<Vec<_>>()
    });
    append_rows(path, headers, rows)
}

/// Remove a staging file; a missing file is not an error
///
/// Returns whether a file was removed.
pub fn clean_temp_file(path: &Path) -> Result<bool, StepError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temp file");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers() -> Vec<String> {
        vec!["date".to_string(), "index".to_string(), "value".to_string()]
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp").join("indexes.csv");

        append_rows(&path, &headers(), vec![vec!["2024-01-02", "SP500", "4700.5"]]).unwrap();
        append_rows(&path, &headers(), vec![vec!["2024-01-03", "SP500", ""]]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "date,index,value\n2024-01-02,SP500,4700.5\n2024-01-03,SP500,\n"
        );
    }

    #[test]
    fn test_append_records_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let record = json!({"value": 1.5, "index": "DJIA", "extra": "ignored"});

        let written =
            append_records(&path, &headers(), &[record.as_object().unwrap().clone()]).unwrap();

        assert_eq!(written, 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "date,index,value\n,DJIA,1.5\n");
    }

    #[test]
    fn test_cell() {
        assert_eq!(cell(&json!(null)), "");
        assert_eq!(cell(&json!("a,b")), "a,b");
        assert_eq!(cell(&json!(42)), "42");
        assert_eq!(cell(&json!(true)), "true");
    }

    #[test]
    fn test_clean_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.csv");
        assert!(!clean_temp_file(&path).unwrap());

        std::fs::write(&path, "x").unwrap();
        assert!(clean_temp_file(&path).unwrap());
        assert!(!path.exists());
    }
}
