use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrateError, Result};
use crate::identity::IdentityResolver;

pub const DEFAULT_CONFIG_FILE: &str = "migrate.yaml";
pub const ACCESS_TOKEN_ENV: &str = "TRAC2LAB_ACCESS_TOKEN";
pub const SOURCE_PASSWORD_ENV: &str = "TRAC2LAB_SOURCE_PASSWORD";

/// Everything one migration run needs, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
    #[serde(default)]
    pub wiki: WikiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// TracRPC endpoint, usually `<trac>/login/jsonrpc`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub method: TargetMethod,
    pub project_name: String,
    /// Clear existing issues and force source numbers. Unset means on for
    /// the direct store and off for the api.
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub usernames: HashMap<String, String>,
    pub default_user: String,
    /// Where the direct store places uploaded files.
    #[serde(default)]
    pub uploads: Option<PathBuf>,
}

impl TargetConfig {
    pub fn overwrite(&self) -> bool {
        self.overwrite
            .unwrap_or(matches!(self.method, TargetMethod::Direct { .. }))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TargetMethod {
    Api { url: String, access_token: String },
    Direct { db_path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesConfig {
    #[serde(default = "enabled")]
    pub migrate: bool,
    #[serde(default)]
    pub only_issues: Option<Vec<u64>>,
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            migrate: true,
            only_issues: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiConfig {
    #[serde(default = "enabled")]
    pub migrate: bool,
    #[serde(default = "default_excluded_authors")]
    pub exclude_authors: Vec<String>,
    #[serde(default)]
    pub target_directory: Option<PathBuf>,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            migrate: true,
            exclude_authors: default_excluded_authors(),
            target_directory: None,
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_excluded_authors() -> Vec<String> {
    vec!["trac".to_string()]
}

/// Command-line adjustments layered over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub only: Option<Vec<u64>>,
    pub no_issues: bool,
    pub no_wiki: bool,
    pub append: bool,
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(MigrateError::Config("configuration is empty".into()));
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Read, apply environment secrets and overrides, then validate.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            MigrateError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(token) = non_empty(ACCESS_TOKEN_ENV)
            && let TargetMethod::Api { access_token, .. } = &mut self.target.method
        {
            *access_token = token;
        }
        if let Some(password) = non_empty(SOURCE_PASSWORD_ENV) {
            self.source.password = Some(password);
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(only) = &overrides.only {
            self.issues.only_issues = Some(only.clone());
        }
        if overrides.no_issues {
            self.issues.migrate = false;
        }
        if overrides.no_wiki {
            self.wiki.migrate = false;
        }
        if overrides.append {
            self.target.overwrite = Some(false);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(MigrateError::Config(msg.to_string()));
        if self.source.url.trim().is_empty() {
            return invalid("source.url must not be empty");
        }
        if self.target.project_name.trim().is_empty() {
            return invalid("target.project_name must not be empty");
        }
        if self.target.default_user.trim().is_empty() {
            return invalid("target.default_user must not be empty");
        }
        if let TargetMethod::Api { url, .. } = &self.target.method
            && url.trim().is_empty()
        {
            return invalid("target.url must not be empty for the api method");
        }
        if self.wiki.migrate && self.wiki.target_directory.is_none() {
            return invalid("wiki.target_directory is required when wiki.migrate is set");
        }
        if matches!(&self.issues.only_issues, Some(only) if only.is_empty()) {
            return invalid("issues.only_issues must list at least one ticket");
        }
        Ok(())
    }

    pub fn identities(&self) -> IdentityResolver {
        IdentityResolver::new(self.target.usernames.clone(), self.target.default_user.clone())
    }

    /// Uploads directory for the direct store: configured, or `uploads/`
    /// next to the database.
    pub fn uploads_dir(&self) -> Option<PathBuf> {
        match &self.target.method {
            TargetMethod::Direct { db_path } => Some(self.target.uploads.clone().unwrap_or_else(|| {
                db_path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("uploads")
            })),
            TargetMethod::Api { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const API: &str = r#"
source:
  url: https://trac.example.org/login/rpc
  username: admin
target:
  method: api
  url: https://gitlab.example.org
  access_token: from-file
  project_name: group/project
  default_user: migration-bot
  usernames:
    alice: alice.smith
wiki:
  target_directory: /tmp/wiki
"#;

    const DIRECT: &str = r#"
source:
  url: https://trac.example.org/rpc
target:
  method: direct
  db_path: /var/lib/gitlab/gitlab.db
  project_name: project
  default_user: root
  overwrite: false
issues:
  only_issues: [5, 7]
wiki:
  migrate: false
"#;

    #[test]
    fn api_target_with_defaults() {
        let config = Config::from_yaml(API).unwrap();
        assert_eq!(
            config.target.method,
            TargetMethod::Api {
                url: "https://gitlab.example.org".into(),
                access_token: "from-file".into(),
            }
        );
        assert!(!config.target.overwrite());
        assert!(config.issues.migrate);
        assert!(config.wiki.migrate);
        assert_eq!(config.wiki.exclude_authors, vec!["trac"]);
        assert_eq!(config.identities().resolve("alice"), "alice.smith");
        assert_eq!(config.identities().resolve("zed"), "migration-bot");
        assert!(config.uploads_dir().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn direct_target_reads_flags() {
        let config = Config::from_yaml(DIRECT).unwrap();
        assert!(!config.target.overwrite());
        assert_eq!(config.issues.only_issues, Some(vec![5, 7]));
        assert_eq!(
            config.uploads_dir(),
            Some(PathBuf::from("/var/lib/gitlab/uploads"))
        );
        config.validate().unwrap();
    }

    #[test]
    fn overwrite_defaults_follow_the_method() {
        let direct = Config::from_yaml(&DIRECT.replace("  overwrite: false\n", "")).unwrap();
        assert_eq!(direct.target.overwrite, None);
        assert!(direct.target.overwrite());

        let api = Config::from_yaml(API).unwrap();
        assert!(!api.target.overwrite());
        let explicit = API.replace("  project_name:", "  overwrite: true\n  project_name:");
        assert!(Config::from_yaml(&explicit).unwrap().target.overwrite());

        let mut direct = direct;
        direct.apply_overrides(&Overrides {
            append: true,
            ..Overrides::default()
        });
        assert!(!direct.target.overwrite());
    }

    #[test]
    fn env_secrets_override_file_values() {
        let mut config = Config::from_yaml(API).unwrap();
        config.apply_env(|key| match key {
            ACCESS_TOKEN_ENV => Some("from-env".into()),
            SOURCE_PASSWORD_ENV => Some(String::new()),
            _ => None,
        });
        assert!(matches!(
            &config.target.method,
            TargetMethod::Api { access_token, .. } if access_token == "from-env"
        ));
        assert_eq!(config.source.password, None);
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = Config::from_yaml(API).unwrap();
        config.apply_overrides(&Overrides {
            only: Some(vec![3]),
            no_issues: false,
            no_wiki: true,
            append: true,
        });
        assert_eq!(config.issues.only_issues, Some(vec![3]));
        assert!(!config.wiki.migrate);
        assert!(!config.target.overwrite());
    }

    #[test]
    fn validation_rejects_incomplete_configs() {
        let mut config = Config::from_yaml(API).unwrap();
        config.wiki.target_directory = None;
        assert_eq!(config.validate().unwrap_err().code(), "config_error");

        let mut config = Config::from_yaml(API).unwrap();
        config.target.default_user = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(DIRECT).unwrap();
        config.issues.only_issues = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let raw = API.replace("method: api", "method: carrier-pigeon");
        assert_eq!(Config::from_yaml(&raw).unwrap_err().code(), "yaml_error");
        assert_eq!(Config::from_yaml("  ").unwrap_err().code(), "config_error");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Path::new("/nonexistent/migrate.yaml"), &Overrides::default())
            .unwrap_err();
        assert_eq!(err.code(), "config_error");
    }
}
