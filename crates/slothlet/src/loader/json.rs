// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! JSON data-file decoder.

use super::{ExportRecord, ModuleDecoder};
use crate::value::Value;
use async_trait::async_trait;
use std::path::Path;

/// Decodes `.json` files into a single non-callable default export.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

#[async_trait]
impl ModuleDecoder for JsonDecoder {
    fn extensions(&self) -> &[&str] {
        &["json"]
    }

    async fn decode(&self, path: &Path) -> crate::Result<ExportRecord> {
        let bytes = tokio::fs::read(path).await?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        Ok(ExportRecord::of_default(Value::Data(value)))
    }
}
