use reqwest::StatusCode;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestFetchError {
    #[error("Update server returned {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ManifestParseError {
    #[error("Manifest is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("Manifest has no title entry")]
    MissingTitle,
    #[error("Package entry is missing its `{0}` attribute")]
    MissingAttribute(&'static str),
    #[error("Package size `{value}` is not a base-10 integer")]
    InvalidSize { value: String, source: ParseIntError },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Fetch(#[from] ManifestFetchError),
    #[error(transparent)]
    Parse(#[from] ManifestParseError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Unable to parse URL")]
    URLParse,
    #[error("Server returned {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("{0}")]
    RequestError(#[from] reqwest::Error),
    #[error("{0}")]
    FileError(#[from] tokio::io::Error),
}
