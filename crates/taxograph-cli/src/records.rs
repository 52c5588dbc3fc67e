//! Record input and result output files

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use taxograph_engine::{BatchReport, MaterialRecord};

/// Load records from a JSON file holding an array or a single object.
///
/// With `index`, only that record is returned (it keeps its position as
/// `MaterialRecord::index`).
pub fn load_records(path: &Path, index: Option<usize>) -> Result<Vec<MaterialRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read records {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("records file {} is not valid JSON", path.display()))?;
    parse_records(value, index)
}

pub fn parse_records(value: serde_json::Value, index: Option<usize>) -> Result<Vec<MaterialRecord>> {
    let records: Vec<MaterialRecord> = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, payload)| MaterialRecord::new(i, payload))
            .collect(),
        obj @ serde_json::Value::Object(_) => vec![MaterialRecord::new(0, obj)],
        other => bail!("expected a record object or an array of records, got {other}"),
    };

    match index {
        None => Ok(records),
        Some(i) => {
            let total = records.len();
            match records.into_iter().nth(i) {
                Some(record) => Ok(vec![record]),
                None => bail!("record index {i} out of range (file holds {total} records)"),
            }
        }
    }
}

/// Write the report to `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.json`.
pub fn write_report(dir: &Path, prefix: &str, report: &BatchReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create results dir {}", dir.display()))?;
    let stamp = report.generated_at.format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{prefix}_{stamp}.json"));
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_array_and_object() {
        let records = parse_records(json!([{"a": 1}, {"a": 2}]), None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, 1);

        let single = parse_records(json!({"a": 1}), None).unwrap();
        assert_eq!(single.len(), 1);
        assert!(parse_records(json!("nope"), None).is_err());
    }

    #[test]
    fn test_index_selection() {
        let records = parse_records(json!([{"a": 1}, {"a": 2}, {"a": 3}]), Some(2)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 2);
        assert_eq!(records[0].payload["a"], 3);
        assert!(parse_records(json!([{"a": 1}]), Some(4)).is_err());
    }

    #[test]
    fn test_load_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("records.json");
        std::fs::write(&input, r#"[{"data": {"MGE18_标题": "CoCrFeMnNi"}}]"#).unwrap();
        let records = load_records(&input, None).unwrap();
        assert_eq!(records.len(), 1);

        let report = BatchReport::new(Vec::new());
        let out = write_report(&dir.path().join("results"), "mount_result", &report).unwrap();
        assert!(out.file_name().unwrap().to_string_lossy().starts_with("mount_result_"));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(written["total"], 0);
        assert!(written["results"].as_array().unwrap().is_empty());
    }
}
