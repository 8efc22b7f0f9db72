use std::path::PathBuf;

use url::Url;

/// Default content-server root. Individual books live under
/// `{base}/{ebook_id}/html5/{ebook_id}/OPS/`.
pub const DEFAULT_BASE_URL: &str = "https://www.oxfordeducate.in/ContentServer/mvc/s3view";

/// Everything one download run needs, passed explicitly into each stage so
/// stages can be exercised in isolation against fixed fixtures.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub ebook_id: String,
    pub cookie_path: PathBuf,
    /// Secret used as both AES key and IV for encrypted page payloads.
    /// Absent or empty means encrypted pages cannot be decrypted.
    pub encryption_key: Option<String>,
    pub output_dir: PathBuf,
}

impl Config {
    /// URL of a resource inside the book's OPS directory.
    pub fn ops_url(&self, resource: &str) -> String {
        format!(
            "{}/{id}/html5/{id}/OPS/{resource}",
            self.base_url.as_str().trim_end_matches('/'),
            id = self.ebook_id,
        )
    }

    pub fn package_manifest_url(&self) -> String {
        self.ops_url("content.opf")
    }

    pub fn toc_manifest_url(&self) -> String {
        self.ops_url("toc.xml")
    }
}
