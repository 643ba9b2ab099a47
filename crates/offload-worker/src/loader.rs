//! Dependency loading.
//!
//! Workers load their dependencies synchronously during bootstrap, on the
//! worker's own thread, so loaders are blocking.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use offload_common::{OffloadError, Result};

/// Fetches the source text of a dependency.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<String>;
}

fn load_error(url: &str, reason: impl ToString) -> OffloadError {
    OffloadError::DependencyLoad {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Loads `http://` and `https://` URLs with a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    timeout: Duration,
}

impl HttpLoader {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptLoader for HttpLoader {
    fn load(&self, url: &str) -> Result<String> {
        // Built per load: the blocking client must live on the worker thread,
        // never inside the pool's async runtime
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| load_error(url, e))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| load_error(url, e))?;

        response.text().map_err(|e| load_error(url, e))
    }
}

/// Loads `file://` URLs and plain filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl ScriptLoader for FileLoader {
    fn load(&self, url: &str) -> Result<String> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        std::fs::read_to_string(Path::new(path)).map_err(|e| load_error(url, e))
    }
}

/// Dispatches on the URL scheme: http(s) goes over the network, everything
/// else is read from disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultLoader {
    http: HttpLoader,
    file: FileLoader,
}

impl ScriptLoader for DefaultLoader {
    fn load(&self, url: &str) -> Result<String> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.load(url)
        } else {
            self.file.load(url)
        }
    }
}

/// In-memory table of scripts keyed by URL.
///
/// Useful for embedding known libraries and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    scripts: HashMap<String, String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, url: impl Into<String>, source: impl Into<String>) -> Self {
        self.scripts.insert(url.into(), source.into());
        self
    }
}

impl ScriptLoader for StaticLoader {
    fn load(&self, url: &str) -> Result<String> {
        self.scripts
            .get(url)
            .cloned()
            .ok_or_else(|| load_error(url, "no such script"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_static_loader() {
        let loader = StaticLoader::new().with_script("https://cdn/a.js", "var a = 1;");
        assert_eq!(loader.load("https://cdn/a.js").unwrap(), "var a = 1;");

        let err = loader.load("https://cdn/b.js").unwrap_err();
        assert!(matches!(err, OffloadError::DependencyLoad { ref url, .. } if url == "https://cdn/b.js"));
    }

    #[test]
    fn test_file_loader_accepts_scheme_and_plain_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "var helper = 7;").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert_eq!(FileLoader.load(&path).unwrap(), "var helper = 7;");
        assert_eq!(
            FileLoader.load(&format!("file://{}", path)).unwrap(),
            "var helper = 7;"
        );
    }

    #[test]
    fn test_default_loader_reads_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "var x;").unwrap();
        let loader = DefaultLoader::default();
        assert_eq!(loader.load(file.path().to_str().unwrap()).unwrap(), "var x;");
        assert!(loader.load("/definitely/not/here.js").is_err());
    }
}
