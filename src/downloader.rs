mod sanitize;

use crate::error::DownloadError;
use crate::manifest::UpdateDescriptor;
use futures::stream::StreamExt;
#[cfg(feature = "render_progress")]
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use sanitize::{sanitize_directory, sanitize_filename};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs::File, io::AsyncWriteExt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
#[cfg(feature = "render_progress")]
const DEFAULT_TOTAL_PROGRESS: &str = "{elapsed_precise} {bar:30.cyan} {human_pos:>} / {human_len} ({percent}%)";
#[cfg(feature = "render_progress")]
const DEFAULT_INDIVIDUAL_PROGRESS: &str = "{msg} {bar:30.blue/red} ({percent}%) {bytes:>12.green} / {total_bytes:<12.green} {bytes_per_sec:>13.blue}";
#[cfg(feature = "render_progress")]
const PROGRESS_LINE: &str = "━╾╴─";

static CURRENT_DIR: Lazy<PathBuf> = Lazy::new(|| std::env::current_dir().unwrap());

pub struct Downloader {
    downloads: Vec<Download>,
    directory: Option<PathBuf>,
    accept_invalid_certs: bool,
    #[cfg(feature = "render_progress")]
    progress: Option<Progress>,
}

impl Downloader {
    pub fn new(downloads: Vec<Download>) -> Self {
        Self {
            downloads,
            directory: None,
            accept_invalid_certs: false,
            #[cfg(feature = "render_progress")]
            progress: None,
        }
    }
    pub fn new_empty() -> Self {
        Self::new(Vec::new())
    }
    pub fn with_download(mut self, download: Download) -> Self {
        self.downloads.push(download);
        self
    }
    pub fn with_output_dir(mut self, path: PathBuf) -> Self {
        self.directory = Some(path);
        self
    }
    // User-entered destination names pass through `resolve_destination`,
    // which strips everything outside word characters, whitespace, and
    // hyphens and anchors the result under the working directory.
    pub fn with_destination_name(mut self, name: &str) -> Self {
        self.directory = Some(resolve_destination(name));
        self
    }
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
    #[cfg(feature = "render_progress")]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
    pub async fn download_all(self) -> Result<Vec<DownloadOutcome>, DownloadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(DownloadError::RequestError)?;
        let directory = self.directory.unwrap_or_else(|| CURRENT_DIR.clone());
        tokio::fs::create_dir_all(&directory).await.map_err(DownloadError::FileError)?;

        #[cfg(feature = "render_progress")]
        let progress = initialize_progress(self.progress, self.downloads.len());

        let mut outcomes = Vec::with_capacity(self.downloads.len());
        for download in self.downloads {
            let outcome = download
                .run(
                    &client,
                    &directory,
                    #[cfg(feature = "render_progress")]
                    progress.as_ref(),
                )
                .await;
            if let Err(error) = &outcome.status {
                log::warn!("Download of {} failed: {error}", outcome.url);
            }
            #[cfg(feature = "render_progress")]
            if let Some(main) = progress.as_ref().and_then(|state| state.main.as_ref()) {
                main.inc(1);
            }
            outcomes.push(outcome);
        }
        #[cfg(feature = "render_progress")]
        if let Some(main) = progress.and_then(|state| state.main) {
            main.finish();
        }
        Ok(outcomes)
    }
}

fn resolve_destination(name: &str) -> PathBuf {
    let sanitized = sanitize_directory(name);
    if sanitized.trim().is_empty() {
        CURRENT_DIR.clone()
    } else {
        CURRENT_DIR.join(sanitized)
    }
}

#[cfg(feature = "render_progress")]
struct ProgressState {
    multi: MultiProgress,
    main: Option<ProgressBar>,
    individual: Option<ProgressStyle>,
}

#[cfg(feature = "render_progress")]
impl ProgressState {
    fn add_item_bar(&self, name: &str, length: u64) -> Option<ProgressBar> {
        let style = self.individual.as_ref()?;
        let bar = ProgressBar::new(length)
            .with_style(style.clone())
            .with_message(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(self.multi.add(bar))
    }
}

#[cfg(feature = "render_progress")]
fn initialize_progress(progress: Option<Progress>, items: usize) -> Option<ProgressState> {
    let progress = progress?;
    if !progress.is_enabled() {
        return None;
    }
    let multi = MultiProgress::new();
    let main = match (&progress.total, items) {
        (Some(style), 2..) => {
            let bar = ProgressBar::new(items as u64).with_style(style.clone());
            bar.enable_steady_tick(Duration::from_millis(100));
            Some(multi.add(bar))
        }
        _ => None,
    };
    Some(ProgressState {
        multi,
        main,
        individual: progress.individual,
    })
}

pub struct Download {
    url: Url,
    filename: Option<String>,
}

impl Download {
    pub fn new(url: impl AsRef<str>) -> Result<Self, DownloadError> {
        let url = Url::parse(url.as_ref()).map_err(|_| DownloadError::URLParse)?;
        Ok(Self::new_from_url(url))
    }
    pub fn new_from_url(url: Url) -> Self {
        Self { url, filename: None }
    }
    pub fn with_filename(mut self, filename: String) -> Self {
        self.filename = Some(filename);
        self
    }
    pub(crate) fn output_name(&self) -> String {
        let segment = self.filename.as_deref().unwrap_or_else(|| {
            self.url
                .path_segments()
                .and_then(|segments| segments.last())
                .and_then(|name| if name.is_empty() { None } else { Some(name) })
                .unwrap_or("download")
        });
        sanitize_filename(segment)
    }
    async fn run(
        self,
        client: &Client,
        directory: &Path,
        #[cfg(feature = "render_progress")] progress: Option<&ProgressState>,
    ) -> DownloadOutcome {
        let file = directory.join(self.output_name());
        let status = transfer(
            client,
            &self.url,
            &file,
            #[cfg(feature = "render_progress")]
            progress,
        )
        .await;
        DownloadOutcome { url: self.url, file, status }
    }
}

impl TryFrom<&UpdateDescriptor> for Download {
    type Error = DownloadError;

    fn try_from(update: &UpdateDescriptor) -> Result<Self, Self::Error> {
        Self::new(&update.source_url)
    }
}

async fn transfer(
    client: &Client,
    url: &Url,
    file: &Path,
    #[cfg(feature = "render_progress")] progress: Option<&ProgressState>,
) -> Result<u64, DownloadError> {
    let response = client.get(url.clone()).send().await.map_err(DownloadError::RequestError)?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status { url: url.to_string(), status });
    }
    // Declared total for display only; the write loop never checks it
    let expected = response.content_length().unwrap_or(0);
    #[cfg(feature = "render_progress")]
    let bar = progress.and_then(|state| {
        let name = file.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        state.add_item_bar(&name, expected)
    });
    let mut output = File::create(file).await.map_err(DownloadError::FileError)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await.transpose().map_err(DownloadError::RequestError)? {
        output.write_all(&chunk).await.map_err(DownloadError::FileError)?;
        written += chunk.len() as u64;
        #[cfg(feature = "render_progress")]
        if let Some(ref bar) = bar {
            bar.inc(chunk.len() as u64);
        }
    }
    output.flush().await.map_err(DownloadError::FileError)?;
    #[cfg(feature = "render_progress")]
    if let Some(bar) = bar {
        bar.finish();
    }
    log::debug!("Wrote {written} byte(s) to {} (declared {expected})", file.display());
    Ok(written)
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub url: Url,
    pub file: PathBuf,
    pub status: Result<u64, DownloadError>,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(feature = "render_progress")]
pub struct Progress {
    total: Option<ProgressStyle>,
    individual: Option<ProgressStyle>,
}
#[cfg(feature = "render_progress")]
impl Default for Progress {
    fn default() -> Self {
        Self::new().with_default_total().with_default_individual()
    }
}
#[cfg(feature = "render_progress")]
impl Progress {
    pub fn new() -> Self {
        Self { total: None, individual: None }
    }
    pub fn with_default_total(mut self) -> Self {
        self.total = Some(ProgressStyle::with_template(DEFAULT_TOTAL_PROGRESS).unwrap());
        self
    }
    pub fn with_default_individual(mut self) -> Self {
        self.individual = Some(
            ProgressStyle::with_template(DEFAULT_INDIVIDUAL_PROGRESS)
                .unwrap()
                .progress_chars(PROGRESS_LINE),
        );
        self
    }
    pub fn with_total(mut self, style: ProgressStyle) -> Self {
        self.total = Some(style);
        self
    }
    pub fn with_individual(mut self, style: ProgressStyle) -> Self {
        self.individual = Some(style);
        self
    }
    fn is_enabled(&self) -> bool {
        self.total.is_some() || self.individual.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn output_name_uses_final_url_segment() {
        let download = Download::new("http://example.com/cdn/UP9000/patch.pkg").unwrap();
        assert_eq!(download.output_name(), "patch.pkg");
    }

    #[test]
    fn output_name_sanitizes_reserved_characters() {
        let download = Download::new("http://example.com/cdn/a:b*c.pkg").unwrap();
        assert_eq!(download.output_name(), "a_b_c.pkg");
    }

    #[test]
    fn output_name_falls_back_when_path_has_no_segment() {
        let download = Download::new("http://example.com/").unwrap();
        assert_eq!(download.output_name(), "download");
    }

    #[test]
    fn explicit_filename_overrides_url_segment() {
        let download = Download::new("http://example.com/patch.pkg")
            .unwrap()
            .with_filename("renamed.pkg".to_string());
        assert_eq!(download.output_name(), "renamed.pkg");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(Download::new("not a url"), Err(DownloadError::URLParse)));
    }

    #[test]
    fn destination_names_cannot_escape_the_working_directory() {
        let resolved = resolve_destination("../../evil:dir");
        assert_eq!(resolved, CURRENT_DIR.join("evildir"));
        let empty = resolve_destination("../..//");
        assert_eq!(empty, *CURRENT_DIR);
    }

    #[tokio::test]
    async fn batch_continues_past_a_failed_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/updates/one.pkg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAA".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/updates/missing.pkg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/updates/two.pkg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BBBBBB".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let outcomes = Downloader::new_empty()
            .with_download(Download::new(format!("{}/updates/one.pkg", server.uri())).unwrap())
            .with_download(Download::new(format!("{}/updates/missing.pkg", server.uri())).unwrap())
            .with_download(Download::new(format!("{}/updates/two.pkg", server.uri())).unwrap())
            .with_output_dir(dir.path().to_path_buf())
            .download_all()
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].status.as_ref().unwrap(), 3);
        assert!(matches!(outcomes[1].status, Err(DownloadError::Status { status, .. }) if status.as_u16() == 404));
        assert!(outcomes[2].is_success());
        assert_eq!(std::fs::read(dir.path().join("one.pkg")).unwrap(), b"AAA");
        assert_eq!(std::fs::read(dir.path().join("two.pkg")).unwrap(), b"BBBBBB");
        assert!(!dir.path().join("missing.pkg").exists());
    }

    #[tokio::test]
    async fn redownload_overwrites_the_existing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/updates/patch.pkg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"shorter".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patch.pkg"), b"a much longer first version").unwrap();

        for _ in 0..2 {
            let outcomes = Downloader::new_empty()
                .with_download(Download::new(format!("{}/updates/patch.pkg", server.uri())).unwrap())
                .with_output_dir(dir.path().to_path_buf())
                .download_all()
                .await
                .unwrap();
            assert!(outcomes[0].is_success());
        }

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
        assert_eq!(std::fs::read(dir.path().join("patch.pkg")).unwrap(), b"shorter");
    }

    #[tokio::test]
    async fn download_all_creates_missing_destination_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/updates/patch.pkg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("game-updates").join("pkg");
        let outcomes = Downloader::new_empty()
            .with_download(Download::new(format!("{}/updates/patch.pkg", server.uri())).unwrap())
            .with_output_dir(nested.clone())
            .download_all()
            .await
            .unwrap();

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].file, nested.join("patch.pkg"));
        assert_eq!(std::fs::read(nested.join("patch.pkg")).unwrap(), b"data");
    }
}
