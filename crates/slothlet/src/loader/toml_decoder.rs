// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! TOML data-file decoder.

use super::{ExportRecord, ModuleDecoder};
use crate::value::Value;
use async_trait::async_trait;
use std::path::Path;

/// Decodes `.toml` files into a single non-callable default export. The
/// document converts losslessly into a JSON object, so TOML and JSON data
/// files are interchangeable in a loaded directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlDecoder;

#[async_trait]
impl ModuleDecoder for TomlDecoder {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    async fn decode(&self, path: &Path) -> crate::Result<ExportRecord> {
        let text = tokio::fs::read_to_string(path).await?;
        let doc: toml::Value = toml::from_str(&text)?;
        let value = serde_json::to_value(doc)?;
        Ok(ExportRecord::of_default(Value::Data(value)))
    }
}
