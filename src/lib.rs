mod downloader;
mod error;
mod manifest;

pub use downloader::{Download, DownloadOutcome, Downloader};
pub use error::{DownloadError, ManifestError, ManifestFetchError, ManifestParseError};
pub use manifest::{format_size, Manifest, ManifestClient, UpdateDescriptor};

#[cfg(feature = "render_progress")]
pub use downloader::Progress;
