//! Configuration manager for vitrine.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::search::SearchSettings;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the backend anon key.
pub const ANON_KEY_ENV: &str = "BACKEND_ANON_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Listening port.
    #[serde(default = "default_port", skip_serializing)]
    pub port: u16,
    /// Related to the hosted backend. Data stays in memory when missing.
    #[serde(skip_serializing)]
    pub backend: Option<Backend>,
    /// Object storage buckets.
    #[serde(default, skip_serializing)]
    pub storage: Buckets,
    /// Search limits.
    #[serde(default)]
    pub search: SearchSettings,
    /// Text drawn over public images.
    #[serde(default, skip_serializing)]
    pub watermark: Watermark,
    /// Related to OpenTelemetry export.
    #[serde(default, skip_serializing)]
    pub telemetry: Telemetry,
    /// Capacity of the side effect queue.
    #[serde(default = "default_outbox_capacity", skip_serializing)]
    pub outbox_capacity: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_outbox_capacity() -> usize {
    1024
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_CRATE_NAME").to_owned(),
            url: "http://localhost:8080/".to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            port: default_port(),
            backend: None,
            storage: Buckets::default(),
            search: SearchSettings::default(),
            watermark: Watermark::default(),
            telemetry: Telemetry::default(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// Hosted backend configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Base URL, such as `https://project.supabase.co`.
    pub url: String,
    /// Public API key, sent with every request.
    #[serde(default)]
    pub anon_key: String,
    /// Timeout of every backend call, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Bucket names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buckets {
    pub profile_images: String,
    pub fan_media: String,
    /// Private bucket.
    pub verification_documents: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            profile_images: "profile-images".into(),
            fan_media: "fan-post-media".into(),
            verification_documents: "verification-documents".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Watermark {
    pub label: String,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            label: "VITRINE".into(),
        }
    }
}

/// OpenTelemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP collector, such as `http://localhost:4317`.
    pub otlp_endpoint: Option<String>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();

        // normalize URLs.
        config.url = self.normalize_url(&config.url)?;
        if let Some(backend) = config.backend.as_mut() {
            backend.url = self
                .normalize_url(&backend.url)?
                .trim_end_matches('/')
                .to_owned();
        }

        // a secret kept out of the file wins.
        if let Ok(key) = std::env::var(ANON_KEY_ENV) {
            if let Some(backend) = config.backend.as_mut() {
                backend.anon_key = key;
            }
        }

        Ok(Arc::new(config))
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vitrine-{}.yaml", uuid::Uuid::new_v4()));
        File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_read_file() {
        let path = write(
            r#"
name: Vitrine
url: vitrine.example.com
port: 3000
backend:
  url: project.supabase.co/
  anon_key: public
  timeout_ms: 5000
search:
  target_count: 12
  max_candidates: 100
watermark:
  label: EXAMPLE
"#,
        );

        let config = Configuration::default().path(path.clone()).read().unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(config.name, "Vitrine");
        assert_eq!(config.url, "https://vitrine.example.com/");
        assert_eq!(config.port, 3000);
        assert_eq!(config.version(), VERSION);
        assert_eq!(config.search.target_count, 12);
        assert_eq!(config.watermark.label, "EXAMPLE");
        assert_eq!(config.storage, Buckets::default());
        assert_eq!(config.outbox_capacity, 1024);
        let backend = config.backend.as_ref().unwrap();
        assert_eq!(backend.url, "https://project.supabase.co");
        assert_eq!(backend.timeout_ms, Some(5000));
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let path = write("name: [unclosed");

        let config = Configuration::default().path(path.clone()).read().unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(config.name, "vitrine");
        assert!(config.backend.is_none());
        assert_eq!(config.search, SearchSettings::default());
    }
}
