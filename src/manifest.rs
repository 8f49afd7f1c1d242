use crate::error::{ManifestError, ManifestFetchError, ManifestParseError};
use roxmltree::{Document, Node};
use std::{fmt, time::Duration};

const DEFAULT_CATALOG_BASE: &str = "https://a0.ww.np.dl.playstation.net";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub version: String,
    pub size_bytes: u64,
    pub source_url: String,
}

impl fmt::Display for UpdateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version: {} - Size: {}", self.version, format_size(self.size_bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub title: String,
    pub updates: Vec<UpdateDescriptor>,
}

impl Manifest {
    pub fn parse(xml: &str) -> Result<Self, ManifestParseError> {
        let doc = Document::parse(xml)?;
        let title = doc
            .descendants()
            .find(|node| node.has_tag_name("paramsfo"))
            .and_then(|node| node.children().find(|child| child.has_tag_name("TITLE")))
            .and_then(|node| node.text())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(ManifestParseError::MissingTitle)?
            .to_string();
        let updates = doc
            .descendants()
            .filter(|node| node.has_tag_name("package"))
            .map(parse_package)
            .collect::<Result<Vec<_>, ManifestParseError>>()?;
        Ok(Self { title, updates })
    }

    pub fn default_directory(&self) -> String {
        format!("./{}-updates", self.title)
    }
}

fn parse_package(node: Node) -> Result<UpdateDescriptor, ManifestParseError> {
    let attribute = |name: &'static str| node.attribute(name).ok_or(ManifestParseError::MissingAttribute(name));
    let version = attribute("version")?.to_string();
    let size = attribute("size")?;
    let size_bytes = size
        .parse::<u64>()
        .map_err(|source| ManifestParseError::InvalidSize { value: size.to_string(), source })?;
    let source_url = attribute("url")?.to_string();
    Ok(UpdateDescriptor { version, size_bytes, source_url })
}

pub struct ManifestClient {
    base: String,
    accept_invalid_certs: bool,
}

impl Default for ManifestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestClient {
    pub fn new() -> Self {
        Self {
            base: DEFAULT_CATALOG_BASE.to_string(),
            accept_invalid_certs: false,
        }
    }
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }
    // The vendor catalog serves certificates that fail normal verification;
    // callers must waive the check explicitly.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
    pub fn manifest_url(&self, product_id: &str) -> String {
        format!("{}/tpl/np/{id}/{id}-ver.xml", self.base, id = product_id)
    }
    pub async fn fetch(&self, product_id: &str) -> Result<Manifest, ManifestError> {
        let url = self.manifest_url(product_id);
        log::info!("Fetching update manifest from {url}");
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(ManifestFetchError::Transport)?;
        let response = client.get(&url).send().await.map_err(ManifestFetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ManifestFetchError::Status { url, status }.into());
        }
        let body = response.text().await.map_err(ManifestFetchError::Transport)?;
        let manifest = Manifest::parse(&body)?;
        log::debug!("Manifest for {product_id} lists {} package(s)", manifest.updates.len());
        Ok(manifest)
    }
}

pub fn format_size(size_in_bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size_in_bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} GB")
}
