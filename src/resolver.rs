//! Source lookup: image identifier → local file.
//!
//! Renderers work on local paths, so every resolver ends in one:
//!
//! - [`FileSystemResolver`] searches configured base directories for
//!   `<id>.<ext>`, trying extensions in configured order.
//! - [`HttpResolver`] builds a URL from a template, downloads the source once
//!   into a local directory and serves later lookups from that copy.
//!
//! Identifiers come from callers and are untrusted. The filesystem resolver
//! refuses anything that could climb out of its base directories.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("No source image found for '{id}'")]
    NotFound { id: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to fetch {url}: {reason}")]
    Http { url: String, reason: String },
}

/// Finds the local file backing an image identifier.
pub trait FileResolver: Send + Sync {
    fn find(&self, id: &str) -> Result<PathBuf, ResolverError>;
}

/// Whether `id` names a file strictly below a base directory.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains('\0')
        && !id.starts_with(['/', '\\'])
        && !id.split(['/', '\\']).any(|part| part == "..")
}

// ============================================================================
// Filesystem
// ============================================================================

pub struct FileSystemResolver {
    base_paths: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl FileSystemResolver {
    pub fn new(base_paths: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            base_paths,
            extensions,
        }
    }

    /// Every path that would be tried for `id`, in search order.
    pub fn candidates(&self, id: &str) -> Vec<PathBuf> {
        self.base_paths
            .iter()
            .flat_map(|base| {
                self.extensions
                    .iter()
                    .map(move |ext| base.join(format!("{id}.{ext}")))
            })
            .collect()
    }
}

impl FileResolver for FileSystemResolver {
    fn find(&self, id: &str) -> Result<PathBuf, ResolverError> {
        if !is_safe_id(id) {
            debug!(id, "rejected unsafe identifier");
            return Err(ResolverError::NotFound { id: id.to_string() });
        }
        let found = self.candidates(id).into_iter().find(|p| p.is_file());
        match found {
            Some(path) => {
                debug!(id, path = %path.display(), "resolved");
                Ok(path)
            }
            None => Err(ResolverError::NotFound { id: id.to_string() }),
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Characters left unescaped when an id is substituted into a URL
/// (RFC 3986 unreserved).
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct HttpResolver {
    url_template: String,
    download_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl HttpResolver {
    /// `url_template` must contain `{id}`; it is replaced by the
    /// percent-encoded identifier.
    pub fn new(
        url_template: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Result<Self, ResolverError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("iiif-render/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ResolverError::Http {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            url_template: url_template.into(),
            download_dir: download_dir.into(),
            client,
        })
    }

    pub fn url_for(&self, id: &str) -> String {
        let encoded = utf8_percent_encode(id, ID_ENCODE_SET).to_string();
        self.url_template.replace("{id}", &encoded)
    }

    /// Where the download of `url` is kept: SHA-256 of the URL, plus the
    /// URL's file extension when it has a plausible one.
    pub fn local_path(&self, url: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
        match url_extension(url) {
            Some(ext) => self.download_dir.join(format!("{digest}.{ext}")),
            None => self.download_dir.join(digest),
        }
    }

    fn download(&self, id: &str, url: &str, dest: &Path) -> Result<(), ResolverError> {
        let http_error = |reason: String| ResolverError::Http {
            url: url.to_string(),
            reason,
        };
        info!(id, url, "downloading source");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| http_error(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolverError::NotFound { id: id.to_string() });
        }
        if !status.is_success() {
            return Err(http_error(format!("HTTP {status}")));
        }
        let bytes = response.bytes().map_err(|e| http_error(e.to_string()))?;

        std::fs::create_dir_all(&self.download_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.download_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }
}

impl FileResolver for HttpResolver {
    fn find(&self, id: &str) -> Result<PathBuf, ResolverError> {
        let url = self.url_for(id);
        let path = self.local_path(&url);
        if path.is_file() {
            debug!(id, path = %path.display(), "using downloaded copy");
            return Ok(path);
        }
        self.download(id, &url, &path)?;
        Ok(path)
    }
}

/// Extension of the last path segment of `url`, ignoring query and fragment.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let (_, segment) = path.rsplit_once('/')?;
    let (_, ext) = segment.rsplit_once('.')?;
    let plausible =
        !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fs_resolver(tmp: &TempDir) -> FileSystemResolver {
        FileSystemResolver::new(
            vec![tmp.path().join("a"), tmp.path().join("b")],
            vec!["png".into(), "jpg".into(), "jp2".into()],
        )
    }

    fn touch(path: PathBuf) -> PathBuf {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"img").unwrap();
        path
    }

    // =========================================================================
    // Filesystem
    // =========================================================================

    #[test]
    fn finds_by_extension_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path().join("a/world.jp2"));
        let png = touch(tmp.path().join("a/world.png"));
        assert_eq!(fs_resolver(&tmp).find("world").unwrap(), png);
    }

    #[test]
    fn searches_base_paths_in_order() {
        let tmp = TempDir::new().unwrap();
        let second = touch(tmp.path().join("b/moon.jpg"));
        assert_eq!(fs_resolver(&tmp).find("moon").unwrap(), second);

        let first = touch(tmp.path().join("a/moon.jp2"));
        assert_eq!(fs_resolver(&tmp).find("moon").unwrap(), first);
    }

    #[test]
    fn nested_ids_are_allowed() {
        let tmp = TempDir::new().unwrap();
        let nested = touch(tmp.path().join("a/maps/1850.png"));
        assert_eq!(fs_resolver(&tmp).find("maps/1850").unwrap(), nested);
    }

    #[test]
    fn missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = fs_resolver(&tmp).find("nothing").unwrap_err();
        assert!(matches!(err, ResolverError::NotFound { id } if id == "nothing"));
    }

    #[test]
    fn directories_do_not_match() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/dir.png")).unwrap();
        assert!(fs_resolver(&tmp).find("dir").is_err());
    }

    #[test]
    fn rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path().join("secret.png"));
        let resolver = fs_resolver(&tmp);
        for id in ["../secret", "a/../../secret", "/etc/passwd", "", "x\0y", "..\\secret"] {
            assert!(
                matches!(resolver.find(id), Err(ResolverError::NotFound { .. })),
                "{id:?} should be rejected"
            );
        }
    }

    // =========================================================================
    // HTTP (no network: lookups are served from pre-seeded downloads)
    // =========================================================================

    fn http_resolver(tmp: &TempDir) -> HttpResolver {
        HttpResolver::new(
            "https://images.example.org/thumb/{id}.jpg/600px-{id}.jpg",
            tmp.path(),
        )
        .unwrap()
    }

    #[test]
    fn url_substitutes_encoded_id() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            http_resolver(&tmp).url_for("Cave 26,_Ajanta"),
            "https://images.example.org/thumb/Cave%2026%2C_Ajanta.jpg/600px-Cave%2026%2C_Ajanta.jpg"
        );
    }

    #[test]
    fn local_path_is_digest_with_extension() {
        let tmp = TempDir::new().unwrap();
        let resolver = http_resolver(&tmp);
        let url = resolver.url_for("world");
        let path = resolver.local_path(&url);
        assert_eq!(path.parent().unwrap(), tmp.path());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), 64 + ".jpg".len());
        assert_ne!(path, resolver.local_path(&resolver.url_for("moon")));
    }

    #[test]
    fn serves_existing_download_without_fetching() {
        let tmp = TempDir::new().unwrap();
        let resolver = http_resolver(&tmp);
        let cached = touch(resolver.local_path(&resolver.url_for("world")));
        assert_eq!(resolver.find("world").unwrap(), cached);
    }

    #[test]
    fn url_extension_parsing() {
        assert_eq!(url_extension("https://h/a/b.jp2"), Some("jp2"));
        assert_eq!(url_extension("https://h/a/b.png?size=1#top"), Some("png"));
        assert_eq!(url_extension("https://h/a/b"), None);
        assert_eq!(url_extension("https://h/a.b/c"), None);
        assert_eq!(url_extension("https://h/a/b.not-an-ext"), None);
    }
}
