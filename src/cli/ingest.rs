//! Ingest and import-relations command handlers.

use std::path::Path;

use color_eyre::Result;
use serde::de::DeserializeOwned;

use crate::di::FromRef;
use crate::error::AppError;
use crate::models::{RawRow, RelationInput};
use crate::services::{RelationImporter, UpsertWriter};

use super::{cancel_on_ctrl_c, context, print_json, App};

/// Reads a file holding either one JSON array or one JSON value per line.
///
/// Blank lines in JSONL are ignored. Parse errors name the offending line.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                AppError::Validation(format!("{}:{}: {}", path.display(), index + 1, e))
            })
        })
        .collect()
}

impl App {
    pub async fn run_ingest(&self, file: &Path) -> Result<()> {
        let rows: Vec<RawRow> = read_records(file)?;
        tracing::info!(rows = rows.len(), file = %file.display(), "Read entity rows");

        let ctx = context().await?;
        let writer = UpsertWriter::from_ref(&ctx);
        let report = writer.upsert_entities(&rows, &cancel_on_ctrl_c()).await;
        print_json(&report)
    }

    pub async fn run_import_relations(&self, file: &Path, dry_run: bool) -> Result<()> {
        let inputs: Vec<RelationInput> = read_records(file)?;
        tracing::info!(relations = inputs.len(), file = %file.display(), dry_run, "Read relations");

        let ctx = context().await?;
        let importer = RelationImporter::from_ref(&ctx);
        let report = importer
            .import_relations(&inputs, dry_run, &cancel_on_ctrl_c())
            .await;
        print_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_json_array() {
        let file = write_temp(r#"[{"name": "屏幕", "category": "组件"}, {"name": "划伤"}]"#);
        let rows: Vec<RawRow> = read_records(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["category"], "组件");
    }

    #[test]
    fn test_read_jsonl_skips_blank_lines() {
        let file = write_temp(
            "{\"name\": \"a\", \"category\": \"Tool\"}\n\n{\"name\": \"b\", \"category\": \"Tool\"}\n",
        );
        let rows: Vec<RawRow> = read_records(file.path()).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_read_jsonl_reports_line_number() {
        let file = write_temp("{\"name\": \"a\"}\nnot json\n");
        let err = read_records::<RawRow>(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"), "unexpected error: {err}");
    }

    #[test]
    fn test_read_relations() {
        let file = write_temp(
            r#"{"type": "CAUSES", "source": {"name": "虚焊", "category": "RootCause"}, "target": {"name": "无显示", "category": "Symptom"}, "props": {"confidence": 0.85, "evidence": "FA report 2024-117 shows cold joint"}}"#,
        );
        let inputs: Vec<RelationInput> = read_records(file.path()).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].relation_type, "CAUSES");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_records::<RawRow>(Path::new("/nonexistent/qualgraph.jsonl")).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
