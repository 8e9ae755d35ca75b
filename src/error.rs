use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Duplicate recommendationId: {0}")]
    DuplicateRecommendation(String),

    #[error("Invalid dependencies:\n{}", .0.join("\n"))]
    InvalidDependencies(Vec<String>),

    #[error("Invalid task DAG:\n{}", .errors.join("\n"))]
    InvalidDag { errors: Vec<String> },

    #[error("DAG validation failed:\n{}", .errors.join("\n"))]
    DagValidation { errors: Vec<String> },

    #[error("File not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
