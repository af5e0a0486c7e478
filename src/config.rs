//! Configuration loading
//!
//! The TOML file is read once at startup and merged with the environment
//! variables of the original env-driven deployment. The result is a fully
//! resolved [`PublishConfig`] that every component receives by reference.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_CONFIG_PATH: &str = "publish_config.toml";
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 16;
pub const DEFAULT_MAX_DELIVERIES: usize = 50;
pub const DEFAULT_ACL: &str = "public-read";
pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Updates";
pub const DEFAULT_COMMIT_PATH: &str = "public/";

/// On-disk layout of the config file. Every field is optional here so that
/// the environment can fill the gaps; [`PublishConfig::resolve`] enforces
/// what is actually required.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub webhook: WebhookSection,
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub storage: StorageSection,
    pub cdn: Option<CdnSection>,
    pub build: Option<BuildSection>,
    pub rate_limit: Option<RateLimitSection>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerSection {
    pub bind_address: Option<String>,
    pub work_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub max_log_files: Option<usize>,
    pub max_concurrent_uploads: Option<usize>,
    pub max_deliveries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookSection {
    pub secret: Option<String>,
    pub allow_missing_secret: Option<bool>,
    pub push_only: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RepositorySection {
    pub full_name: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageSection {
    pub bucket: Option<String>,
    pub acl: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CdnSection {
    pub distribution_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BuildSection {
    pub command: Option<String>,
    pub commit_path: Option<String>,
    pub commit_message: Option<String>,
    pub commit_branch: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub verify_idempotent: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSection {
    pub max_requests: usize,
    pub window_secs: u64,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub bind_address: String,
    pub work_root: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub max_log_files: Option<usize>,
    pub max_concurrent_uploads: usize,
    pub max_deliveries: usize,
    pub webhook: WebhookSettings,
    pub repository: RepositorySettings,
    pub storage: StorageSettings,
    pub cdn: Option<CdnSettings>,
    pub build: Option<BuildSettings>,
    pub rate_limit: Option<RateLimitSection>,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// `None` only when `allow_missing_secret` was set; every delivery is then rejected.
    pub secret: Option<String>,
    pub push_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RepositorySettings {
    pub full_name: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: String,
    pub acl: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub distribution_id: String,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub command: String,
    pub commit_path: Option<String>,
    pub commit_message: String,
    pub commit_branch: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub verify_idempotent: bool,
}

impl BuildSettings {
    /// Path staged by the commit-back step: explicit setting, else the
    /// content prefix, else `public/`.
    pub fn commit_path<'a>(&'a self, prefix: Option<&'a str>) -> &'a str {
        self.commit_path
            .as_deref()
            .or(prefix)
            .unwrap_or(DEFAULT_COMMIT_PATH)
    }
}

/// Load the config file at `path` and merge it with the process environment.
pub fn load_config(path: impl AsRef<Path>) -> Result<PublishConfig, ConfigError> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let file: ConfigFile = toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    PublishConfig::resolve(file, |key| std::env::var(key).ok())
}

impl PublishConfig {
    /// Merge file values with environment overrides and validate.
    ///
    /// `env` is consulted for each recognised variable; empty values count as unset.
    pub fn resolve(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| env(key).filter(|v| !v.is_empty());

        let max_concurrent_uploads = file
            .server
            .max_concurrent_uploads
            .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS);
        if max_concurrent_uploads == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let secret = var("GITHUB_WEBHOOK_SECRET").or(file.webhook.secret);
        if secret.is_none() && !file.webhook.allow_missing_secret.unwrap_or(false) {
            return Err(ConfigError::MissingWebhookSecret);
        }

        let prefix = var("PREFIX").or(file.repository.prefix);
        if let Some(p) = &prefix {
            if p.starts_with('/') || p.ends_with('/') {
                return Err(ConfigError::InvalidPrefix(p.clone()));
            }
        }

        let bucket = var("AWS_S3_BUCKET")
            .or(file.storage.bucket)
            .ok_or(ConfigError::MissingBucket)?;

        let distribution_id = var("AWS_CLOUDFRONT_DISTRIBUTION")
            .or(file.cdn.and_then(|c| c.distribution_id))
            .filter(|d| !d.is_empty());

        let build_file = file.build.unwrap_or_default();
        let build = match var("REGEN_PUBLIC_CMD").or(build_file.command) {
            Some(command) if command.trim().is_empty() => {
                return Err(ConfigError::EmptyBuildCommand);
            }
            Some(command) => Some(BuildSettings {
                command,
                commit_path: build_file.commit_path,
                commit_message: var("GITHUB_COMMIT_MESSAGE")
                    .or(build_file.commit_message)
                    .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
                commit_branch: var("GITHUB_COMMIT_BRANCH").or(build_file.commit_branch),
                user_email: var("GITHUB_USER_EMAIL").or(build_file.user_email),
                user_name: var("GITHUB_USER_NAME").or(build_file.user_name),
                verify_idempotent: build_file.verify_idempotent.unwrap_or(true),
            }),
            None => None,
        };

        Ok(PublishConfig {
            bind_address: var("BIND_ADDRESS")
                .or(file.server.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            work_root: file
                .server
                .work_root
                .unwrap_or_else(|| std::env::temp_dir().join("git_publish")),
            log_dir: file.server.log_dir,
            max_log_files: file.server.max_log_files,
            max_concurrent_uploads,
            max_deliveries: file
                .server
                .max_deliveries
                .unwrap_or(DEFAULT_MAX_DELIVERIES),
            webhook: WebhookSettings {
                secret,
                push_only: file.webhook.push_only.unwrap_or(true),
            },
            repository: RepositorySettings {
                full_name: var("GITHUB_REPO").or(file.repository.full_name),
                user: var("GITHUB_USER").or(file.repository.user),
                token: var("GITHUB_TOKEN").or(file.repository.token),
                branch: file.repository.branch,
                remote_url: file.repository.remote_url,
                prefix,
            },
            storage: StorageSettings {
                bucket,
                acl: var("AWS_S3_ACL")
                    .or(file.storage.acl)
                    .unwrap_or_else(|| DEFAULT_ACL.to_string()),
                region: var("AWS_REGION")
                    .or(file.storage.region)
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            },
            cdn: distribution_id.map(|distribution_id| CdnSettings { distribution_id }),
            build,
            rate_limit: file.rate_limit,
        })
    }

    pub fn prefix(&self) -> Option<&str> {
        self.repository.prefix.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_str: &str) -> ConfigFile {
        toml::from_str(toml_str).unwrap()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const MINIMAL: &str = r#"
        [webhook]
        secret = "s"

        [storage]
        bucket = "my-bucket"
    "#;

    #[test]
    fn minimal_file_gets_defaults() {
        let config = PublishConfig::resolve(parse(MINIMAL), env_of(&[])).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.max_concurrent_uploads, DEFAULT_MAX_CONCURRENT_UPLOADS);
        assert_eq!(config.storage.acl, "public-read");
        assert_eq!(config.storage.region, "eu-west-1");
        assert!(config.webhook.push_only);
        assert!(config.cdn.is_none());
        assert!(config.build.is_none());
        assert!(config.prefix().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let env = env_of(&[
            ("AWS_S3_BUCKET", "from-env"),
            ("PREFIX", "site"),
            ("AWS_CLOUDFRONT_DISTRIBUTION", "E123"),
            ("REGEN_PUBLIC_CMD", "make public"),
            ("GITHUB_COMMIT_BRANCH", "gh-pages"),
        ]);
        let config = PublishConfig::resolve(parse(MINIMAL), env).unwrap();
        assert_eq!(config.storage.bucket, "from-env");
        assert_eq!(config.prefix(), Some("site"));
        assert_eq!(config.cdn.unwrap().distribution_id, "E123");
        let build = config.build.unwrap();
        assert_eq!(build.command, "make public");
        assert_eq!(build.commit_branch.as_deref(), Some("gh-pages"));
        assert_eq!(build.commit_message, "Updates");
        assert!(build.verify_idempotent);
    }

    #[test]
    fn empty_env_values_count_as_unset() {
        let env = env_of(&[("PREFIX", ""), ("AWS_CLOUDFRONT_DISTRIBUTION", "")]);
        let config = PublishConfig::resolve(parse(MINIMAL), env).unwrap();
        assert!(config.prefix().is_none());
        assert!(config.cdn.is_none());
    }

    #[test]
    fn missing_bucket_is_named() {
        let file = parse("[webhook]\nsecret = \"s\"\n");
        let err = PublishConfig::resolve(file, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBucket));
    }

    #[test]
    fn missing_secret_is_named_unless_allowed() {
        let file = parse("[storage]\nbucket = \"b\"\n");
        let err = PublishConfig::resolve(file, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingWebhookSecret));

        let file = parse("[webhook]\nallow_missing_secret = true\n[storage]\nbucket = \"b\"\n");
        let config = PublishConfig::resolve(file, env_of(&[])).unwrap();
        assert!(config.webhook.secret.is_none());
    }

    #[test]
    fn rejects_zero_concurrency_and_bad_prefix() {
        let file = parse(&format!("{MINIMAL}\n[server]\nmax_concurrent_uploads = 0\n"));
        assert!(matches!(
            PublishConfig::resolve(file, env_of(&[])),
            Err(ConfigError::ZeroConcurrency)
        ));

        let err = PublishConfig::resolve(parse(MINIMAL), env_of(&[("PREFIX", "site/")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrefix(p) if p == "site/"));
    }

    #[test]
    fn rejects_blank_build_command() {
        let file = parse(&format!("{MINIMAL}\n[build]\ncommand = \"  \"\n"));
        assert!(matches!(
            PublishConfig::resolve(file, env_of(&[])),
            Err(ConfigError::EmptyBuildCommand)
        ));
    }

    #[test]
    fn commit_path_falls_back_to_prefix_then_public() {
        let mut build = BuildSettings {
            command: "true".into(),
            commit_path: None,
            commit_message: DEFAULT_COMMIT_MESSAGE.into(),
            commit_branch: None,
            user_email: None,
            user_name: None,
            verify_idempotent: true,
        };
        assert_eq!(build.commit_path(None), "public/");
        assert_eq!(build.commit_path(Some("site")), "site");
        build.commit_path = Some("dist".into());
        assert_eq!(build.commit_path(Some("site")), "dist");
    }
}
