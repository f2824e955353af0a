//! Backend configurator: repository descriptor + credentials to restic settings
//!
//! The result is a [`BackendConfig`] used for exactly one invocation chain.
//! Credentials only ever travel through its environment map; the command line
//! carries the repository location and plain flags.

use crate::api::{Backend, Repository};
use reqwest::Url;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const RESTIC_REPOSITORY: &str = "RESTIC_REPOSITORY";
pub const RESTIC_PASSWORD: &str = "RESTIC_PASSWORD";
pub const RESTIC_PROGRESS_FPS: &str = "RESTIC_PROGRESS_FPS";
pub const TMPDIR: &str = "TMPDIR";
pub const CA_CERT_DATA: &str = "CA_CERT_DATA";

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";

pub const GOOGLE_PROJECT_ID: &str = "GOOGLE_PROJECT_ID";
pub const GOOGLE_SERVICE_ACCOUNT_JSON_KEY: &str = "GOOGLE_SERVICE_ACCOUNT_JSON_KEY";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub const AZURE_ACCOUNT_NAME: &str = "AZURE_ACCOUNT_NAME";
pub const AZURE_ACCOUNT_KEY: &str = "AZURE_ACCOUNT_KEY";

pub const B2_ACCOUNT_ID: &str = "B2_ACCOUNT_ID";
pub const B2_ACCOUNT_KEY: &str = "B2_ACCOUNT_KEY";

pub const REST_SERVER_USERNAME: &str = "REST_SERVER_USERNAME";
pub const REST_SERVER_PASSWORD: &str = "REST_SERVER_PASSWORD";

/// One progress line per minute keeps `--json` output small
const PROGRESS_FPS: &str = "0.016666";
const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
const CACHE_DIR_NAME: &str = "restic-cache";
const CA_CERT_FILE_NAME: &str = "ca.crt";
const GCS_KEY_FILE_NAME: &str = "gcs-service-account.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("storage secret is missing key '{key}' required by the {provider} backend")]
    MissingSecretKey { provider: &'static str, key: &'static str },

    #[error("repository does not declare a storage backend")]
    NoBackend,

    #[error("invalid repository location: {0}")]
    InvalidLocation(String),

    #[error("failed to prepare scratch directory: {0}")]
    Io(#[from] io::Error),
}

/// Runtime knobs that do not come from the repository record
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub scratch_dir: PathBuf,
    pub enable_cache: bool,
    /// Used when the provider block does not set its own limit
    pub max_connections: u32,
    pub nice: Option<i32>,
    /// ionice class and class data
    pub ionice: Option<(u32, u32)>,
}

/// Everything restic needs to reach one repository
#[derive(Clone, Default)]
pub struct BackendConfig {
    pub provider: &'static str,
    pub repository: String,
    pub env: BTreeMap<String, String>,
    pub cache_dir: Option<PathBuf>,
    pub tmp_dir: PathBuf,
    pub ca_cert_file: Option<PathBuf>,
    /// Ready-made `--option` value, e.g. `gs.connections=8`
    pub max_connections_option: Option<String>,
    pub nice: Option<i32>,
    pub ionice: Option<(u32, u32)>,
    /// Values that must never be displayed
    pub secrets: Vec<String>,
}

impl BackendConfig {
    pub fn secret_values(&self) -> &[String] {
        &self.secrets
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("repository", &"<redacted>")
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("cache_dir", &self.cache_dir)
            .field("tmp_dir", &self.tmp_dir)
            .finish()
    }
}

/// Collects required and optional keys out of the secret data
struct Credentials<'a> {
    provider: &'static str,
    data: &'a BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    secrets: Vec<String>,
}

impl<'a> Credentials<'a> {
    fn new(provider: &'static str, data: &'a BTreeMap<String, String>) -> Self {
        Self {
            provider,
            data,
            env: BTreeMap::new(),
            secrets: Vec::new(),
        }
    }

    fn value(&self, key: &'static str) -> Option<&'a str> {
        self.data
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&mut self, key: &'static str) -> Result<&'a str, ConfigurationError> {
        let value = self.value(key).ok_or(ConfigurationError::MissingSecretKey {
            provider: self.provider,
            key,
        })?;
        self.secrets.push(value.to_string());
        Ok(value)
    }

    /// Required key exported under its own name
    fn export(&mut self, key: &'static str) -> Result<(), ConfigurationError> {
        let value = self.require(key)?;
        self.env.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn optional(&mut self, key: &'static str) -> Option<&'a str> {
        let value = self.value(key)?;
        self.secrets.push(value.to_string());
        Some(value)
    }
}

/// Resolve the repository's backend into a ready-to-use restic configuration
pub fn resolve(
    repository: &Repository,
    secret_data: &BTreeMap<String, String>,
    opts: &SetupOptions,
) -> Result<BackendConfig, ConfigurationError> {
    let backend = repository
        .spec
        .backend
        .backend()
        .ok_or(ConfigurationError::NoBackend)?;
    let provider = backend.provider();

    let mut creds = Credentials::new(provider, secret_data);
    creds.export(RESTIC_PASSWORD)?;

    let mut provider_connections = 0;
    let location = match backend {
        Backend::Local(ref local) => {
            if local.mount_path.is_empty() {
                return Err(ConfigurationError::InvalidLocation(
                    "local backend needs a mount path".to_string(),
                ));
            }
            let mut dir = PathBuf::from(&local.mount_path);
            if let Some(ref sub) = local.sub_path {
                dir.push(sub.trim_start_matches('/'));
            }
            fs::create_dir_all(&dir)?;
            dir.display().to_string()
        }
        Backend::S3(ref s3) => {
            creds.export(AWS_ACCESS_KEY_ID)?;
            creds.export(AWS_SECRET_ACCESS_KEY)?;
            if let Some(ref region) = s3.region {
                creds.env.insert(AWS_DEFAULT_REGION.to_string(), region.clone());
            }
            let endpoint = if s3.endpoint.is_empty() {
                DEFAULT_S3_ENDPOINT
            } else {
                s3.endpoint.trim_end_matches('/')
            };
            join_location(&format!("s3:{}/{}", endpoint, s3.bucket), "/", &s3.prefix)
        }
        Backend::Gcs(ref gcs) => {
            creds.export(GOOGLE_PROJECT_ID)?;
            let key = creds.require(GOOGLE_SERVICE_ACCOUNT_JSON_KEY)?;
            let key_file = write_private_file(&opts.scratch_dir, GCS_KEY_FILE_NAME, key)?;
            creds.env.insert(
                GOOGLE_APPLICATION_CREDENTIALS.to_string(),
                key_file.display().to_string(),
            );
            provider_connections = gcs.max_connections;
            join_location(&format!("gs:{}:", gcs.bucket), "/", &gcs.prefix)
        }
        Backend::Azure(ref azure) => {
            creds.export(AZURE_ACCOUNT_NAME)?;
            creds.export(AZURE_ACCOUNT_KEY)?;
            provider_connections = azure.max_connections;
            join_location(&format!("azure:{}:", azure.container), "/", &azure.prefix)
        }
        Backend::Swift(ref swift) => {
            for (key, value) in secret_data {
                if (key.starts_with("OS_") || key.starts_with("ST_")) && !value.is_empty() {
                    creds.env.insert(key.clone(), value.clone());
                    creds.secrets.push(value.clone());
                }
            }
            join_location(&format!("swift:{}:", swift.container), "/", &swift.prefix)
        }
        Backend::B2(ref b2) => {
            creds.export(B2_ACCOUNT_ID)?;
            creds.export(B2_ACCOUNT_KEY)?;
            provider_connections = b2.max_connections;
            join_location(&format!("b2:{}:", b2.bucket), "/", &b2.prefix)
        }
        Backend::Rest(ref rest) => {
            let user = creds.optional(REST_SERVER_USERNAME);
            let password = creds.optional(REST_SERVER_PASSWORD);
            format!("rest:{}", with_userinfo(&rest.url, user, password)?)
        }
    };

    let mut env = creds.env;
    env.insert(RESTIC_REPOSITORY.to_string(), location.clone());
    env.insert(RESTIC_PROGRESS_FPS.to_string(), PROGRESS_FPS.to_string());

    let tmp_dir = opts.scratch_dir.join(format!("tmp-{}", std::process::id()));
    fs::create_dir_all(&tmp_dir)?;
    env.insert(TMPDIR.to_string(), tmp_dir.display().to_string());

    let ca_cert_file = match secret_data.get(CA_CERT_DATA).filter(|v| !v.is_empty()) {
        Some(pem) => Some(write_private_file(&opts.scratch_dir, CA_CERT_FILE_NAME, pem)?),
        None => None,
    };

    let cache_dir = if opts.enable_cache {
        let dir = opts.scratch_dir.join(CACHE_DIR_NAME);
        fs::create_dir_all(&dir)?;
        Some(dir)
    } else {
        None
    };

    let connections = if provider_connections > 0 {
        provider_connections
    } else {
        opts.max_connections
    };
    let max_connections_option = connection_option_prefix(&backend)
        .filter(|_| connections > 0)
        .map(|prefix| format!("{}.connections={}", prefix, connections));

    let mut secrets = creds.secrets;
    // The rest location embeds credentials
    if provider == "rest" && location.contains('@') {
        secrets.push(location.clone());
    }

    debug!(
        "Resolved {} backend for repository {} (cache: {})",
        provider,
        repository.metadata.name,
        cache_dir.is_some()
    );

    Ok(BackendConfig {
        provider,
        repository: location,
        env,
        cache_dir,
        tmp_dir,
        ca_cert_file,
        max_connections_option,
        nice: opts.nice,
        ionice: opts.ionice,
        secrets,
    })
}

/// `--option` namespace of providers with a connection limit
fn connection_option_prefix(backend: &Backend) -> Option<&'static str> {
    match backend {
        Backend::Gcs(_) => Some("gs"),
        Backend::Azure(_) => Some("azure"),
        Backend::B2(_) => Some("b2"),
        Backend::Local(_) | Backend::S3(_) | Backend::Swift(_) | Backend::Rest(_) => None,
    }
}

fn join_location(base: &str, sep: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        // `gs:bucket:` alone is not a valid location, the root is `gs:bucket:/`
        if base.ends_with(':') {
            format!("{}{}", base, sep)
        } else {
            base.to_string()
        }
    } else {
        format!("{}{}{}", base, sep, prefix)
    }
}

/// Set `user[:password]` on the url, percent-encoding both
fn with_userinfo(
    url: &str,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<String, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidLocation(format!("rest url '{}': {}", url, reason));
    let mut parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if let Some(user) = user {
        parsed
            .set_username(user)
            .map_err(|_| invalid("cannot carry credentials".to_string()))?;
        parsed
            .set_password(password)
            .map_err(|_| invalid("cannot carry credentials".to_string()))?;
    }
    Ok(parsed.to_string())
}

/// Write `contents` to `<dir>/<name>` readable only by the owner
fn write_private_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(path)
}
