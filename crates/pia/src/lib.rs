pub mod builder;
pub mod config;
pub mod evidence;
pub mod fdr;
pub mod filter;
pub mod import;
pub mod inference;
pub mod modeller;
pub mod pool;
pub mod protein_grouping;
pub mod score;
pub mod scoring;
pub mod structure;

use evidence::FileId;
use std::io::Read;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no data to build the intermediate structure ({peptides} peptides, {proteins} proteins)")]
    EmptyEvidence { peptides: usize, proteins: usize },
    #[error("the intermediate structure was already created")]
    AlreadyBuilt,
    #[error("the intermediate structure has not been built yet")]
    NotBuilt,
    #[error("worker failed: {0}")]
    WorkerFailed(String),
    #[error("unknown score accession `{0}`, add it to `score_directions`")]
    UnknownScore(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid evidence table: {0}")]
    InvalidTable(String),
    #[error("unknown file id {0:?}")]
    UnknownFile(FileId),
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error reading table: {0}")]
    Csv(#[from] csv::Error),
    #[error("error parsing json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn read_json<S, T>(path: S) -> Result<T>
where
    S: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let mut contents = String::new();
    std::fs::File::open(path)?.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}
