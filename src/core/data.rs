/// Data file loading shared by the agent directory and knowledge retriever.
///
/// RON is the native format. Files ending in `.json` are read as JSON so
/// content authored for other front ends can be dropped in unchanged.
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read and deserialize a data file, picking the format from its extension.
pub fn load_data_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataError> {
    let contents = std::fs::read_to_string(path)?;
    parse_data(&contents, is_json(path))
}

/// Deserialize an in-memory document as JSON or RON.
pub fn parse_data<T: DeserializeOwned>(contents: &str, json: bool) -> Result<T, DataError> {
    if json {
        Ok(serde_json::from_str(contents)?)
    } else {
        Ok(ron::from_str(contents)?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
