//! Configuration management for cloud-drive-tools
//!
//! The configuration is a flat YAML mapping with a closed key set: every
//! required key must be present and nothing outside the required and
//! optional keys may appear. No defaults are filled in for required keys.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vars.yaml";

/// Keys that must appear in every configuration file
pub const REQUIRED_KEYS: &[&str] = &[
    "cloud_drive_tools_path",
    "data_dir",
    "days_to_keep_local",
    "encfs6_config",
    "encfs_pass",
    "mount_base",
    "path_on_cloud_drive",
    "rclone",
    "rclone_config_path",
    "rclone_remote",
    "verbose",
];

/// Keys that may appear but are not required
pub const OPTIONAL_KEYS: &[&str] = &["http_proxy", "https_proxy", "state_dir"];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to this program, used to launch the background remount keeper
    pub cloud_drive_tools_path: PathBuf,

    /// Where the union view is mounted
    pub data_dir: PathBuf,

    /// Local cache retention window in days
    #[serde(deserialize_with = "scalar::float")]
    pub days_to_keep_local: f64,

    /// encfs configuration file (exported to encfs as ENCFS6_CONFIG)
    pub encfs6_config: PathBuf,

    /// encfs passphrase
    pub encfs_pass: Passphrase,

    /// Base directory for the encrypted/decrypted mountpoints
    pub mount_base: PathBuf,

    /// Sub-path on the cloud remote holding the encrypted data
    #[serde(deserialize_with = "scalar::string")]
    pub path_on_cloud_drive: String,

    /// rclone binary
    pub rclone: PathBuf,

    /// rclone configuration file
    pub rclone_config_path: PathBuf,

    /// rclone remote name (without the trailing colon)
    #[serde(deserialize_with = "scalar::string")]
    pub rclone_remote: String,

    /// Enable debug logging and extra tool verbosity
    #[serde(deserialize_with = "scalar::boolean")]
    pub verbose: bool,

    /// HTTP proxy handed to rclone
    #[serde(default)]
    pub http_proxy: Option<String>,

    /// HTTPS proxy handed to rclone
    #[serde(default)]
    pub https_proxy: Option<String>,

    /// Directory for the upload lock, unmount sentinel and screen log
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// File this configuration was loaded from (absolute when possible)
    #[serde(skip)]
    pub source: PathBuf,
}

/// encfs passphrase; redacted in debug output and wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Passphrase(secret.into())
    }

    /// Expose the secret for handing to an external tool
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

impl<'de> Deserialize<'de> for Passphrase {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        scalar::string(deserializer).map(Passphrase)
    }
}

impl Config {
    /// Load configuration from a file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file \"{}\": {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::parse(&content, &path)?;
        config.source = std::fs::canonicalize(&path).unwrap_or(path);
        Ok(config)
    }

    /// Parse and validate configuration text; `origin` is only used in messages
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file \"{}\": {}",
                origin.display(),
                e
            ))
        })?;

        let mapping = match document {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            _ => {
                return Err(Error::Config(format!(
                    "Config file \"{}\" must contain a mapping of keys to values",
                    origin.display()
                )))
            }
        };

        let present: Vec<String> = mapping.keys().map(key_name).collect();
        check_keys(origin, &present)?;

        let mut config: Config = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|e| {
                Error::Config(format!(
                    "Invalid value in config file \"{}\": {}",
                    origin.display(),
                    e
                ))
            })?;

        config.expand_paths();
        config.source = origin.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.days_to_keep_local.is_finite() || self.days_to_keep_local < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "days_to_keep_local must be a non-negative number, got {}",
                self.days_to_keep_local
            )));
        }

        if self.rclone_remote.is_empty() {
            return Err(Error::InvalidConfig(
                "rclone_remote must not be empty".to_string(),
            ));
        }

        if self.rclone_remote.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "rclone_remote must be a remote name without ':', got \"{}\"",
                self.rclone_remote
            )));
        }

        if self.encfs_pass.is_empty() {
            return Err(Error::InvalidConfig(
                "encfs_pass must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the upload lock and unmount sentinel
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        self.cloud_drive_tools_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Proxy variables to hand to rclone, in both spellings rclone honours
    pub fn proxy_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(proxy) = &self.http_proxy {
            env.push(("http_proxy".to_string(), proxy.clone()));
            env.push(("HTTP_PROXY".to_string(), proxy.clone()));
        }
        if let Some(proxy) = &self.https_proxy {
            env.push(("https_proxy".to_string(), proxy.clone()));
            env.push(("HTTPS_PROXY".to_string(), proxy.clone()));
        }
        env
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.cloud_drive_tools_path,
            &mut self.data_dir,
            &mut self.encfs6_config,
            &mut self.mount_base,
            &mut self.rclone,
            &mut self.rclone_config_path,
        ] {
            *path = expand_tilde(path);
        }
        if let Some(dir) = self.state_dir.as_mut() {
            *dir = expand_tilde(dir);
        }
    }
}

/// Compare the keys present in a document against the allowed key set
pub fn check_keys(origin: &Path, present: &[String]) -> Result<()> {
    let present: BTreeSet<&str> = present.iter().map(String::as_str).collect();

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|key| !present.contains(**key))
        .map(|key| key.to_string())
        .collect();

    let unknown: Vec<String> = present
        .iter()
        .filter(|key| !REQUIRED_KEYS.contains(*key) && !OPTIONAL_KEYS.contains(*key))
        .map(|key| key.to_string())
        .collect();

    if missing.is_empty() && unknown.is_empty() {
        return Ok(());
    }

    Err(Error::ConfigKeys {
        path: origin.to_path_buf(),
        missing,
        unknown,
    })
}

fn key_name(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Expand ~ to home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Lenient scalar deserializers: YAML users rarely quote numbers
mod scalar {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct StringVisitor;

    impl<'de> Visitor<'de> for StringVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string, number or boolean")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StringVisitor)
    }

    struct FloatVisitor;

    impl<'de> Visitor<'de> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number of days")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            v.trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("\"{}\" is not a number", v)))
        }
    }

    pub fn float<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct BoolVisitor;

    impl<'de> Visitor<'de> for BoolVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("true/false, yes/no, on/off or 1/0")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::custom(format!("{} is not a boolean", v))),
            }
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::custom(format!("{} is not a boolean", v))),
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "on" | "1" => Ok(true),
                "false" | "no" | "n" | "off" | "0" => Ok(false),
                _ => Err(E::custom(format!("\"{}\" is not a boolean", v))),
            }
        }
    }

    pub fn boolean<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BoolVisitor)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = "\
cloud_drive_tools_path: /opt/cdt/bin/cloud-drive-tools
data_dir: /srv/media
days_to_keep_local: 2.5
encfs6_config: /etc/cdt/encfs6.xml
encfs_pass: hunter2
mount_base: /mnt/cdt
path_on_cloud_drive: /encrypted
rclone: /usr/bin/rclone
rclone_config_path: /etc/cdt/rclone.conf
rclone_remote: gdrive
verbose: false
";

    pub(crate) fn sample_config() -> Config {
        Config::parse(SAMPLE, Path::new("vars.yaml")).unwrap()
    }

    #[test]
    fn test_parse_valid_config() {
        let config = sample_config();
        assert_eq!(config.data_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.days_to_keep_local, 2.5);
        assert_eq!(config.encfs_pass.expose(), "hunter2");
        assert_eq!(config.rclone_remote, "gdrive");
        assert!(!config.verbose);
        assert!(config.http_proxy.is_none());
        assert_eq!(config.state_dir(), PathBuf::from("/opt/cdt/bin"));
    }

    #[test]
    fn test_missing_keys_are_all_named() {
        let text: String = SAMPLE
            .lines()
            .filter(|l| !l.starts_with("rclone_remote") && !l.starts_with("data_dir"))
            .map(|l| format!("{}\n", l))
            .collect();

        let err = Config::parse(&text, Path::new("vars.yaml")).unwrap_err();
        match &err {
            Error::ConfigKeys {
                missing, unknown, ..
            } => {
                assert_eq!(missing, &vec!["data_dir".to_string(), "rclone_remote".to_string()]);
                assert!(unknown.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("data_dir"));
        assert!(msg.contains("rclone_remote"));
        assert!(msg.contains("vars.yaml"));
    }

    #[test]
    fn test_extra_keys_are_all_named() {
        let text = format!("{}plexdrive: /usr/bin/plexdrive\nchunk_dir: /tmp\n", SAMPLE);
        let err = Config::parse(&text, Path::new("vars.yaml")).unwrap_err();
        match &err {
            Error::ConfigKeys {
                missing, unknown, ..
            } => {
                assert!(missing.is_empty());
                assert_eq!(unknown, &vec!["chunk_dir".to_string(), "plexdrive".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("chunk_dir, plexdrive"));
    }

    #[test]
    fn test_empty_document_reports_every_required_key() {
        let err = Config::parse("", Path::new("empty.yaml")).unwrap_err();
        let msg = err.to_string();
        for key in REQUIRED_KEYS {
            assert!(msg.contains(key), "message should name {}", key);
        }
    }

    #[test]
    fn test_optional_keys_accepted() {
        let text = format!(
            "{}http_proxy: http://proxy:3128\nstate_dir: /var/lib/cdt\n",
            SAMPLE
        );
        let config = Config::parse(&text, Path::new("vars.yaml")).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/cdt"));
        let env = config.proxy_env();
        assert!(env.contains(&("HTTP_PROXY".to_string(), "http://proxy:3128".to_string())));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_numeric_scalars_are_accepted() {
        let text = SAMPLE
            .replace("encfs_pass: hunter2", "encfs_pass: 123456")
            .replace("days_to_keep_local: 2.5", "days_to_keep_local: \"7\"");
        let config = Config::parse(&text, Path::new("vars.yaml")).unwrap();
        assert_eq!(config.encfs_pass.expose(), "123456");
        assert_eq!(config.days_to_keep_local, 7.0);
    }

    #[test]
    fn test_verbose_accepts_textual_booleans() {
        for (value, expected) in [
            ("yes", true),
            ("\"true\"", true),
            ("On", true),
            ("1", true),
            ("no", false),
            ("\"false\"", false),
            ("0", false),
        ] {
            let text = SAMPLE.replace("verbose: false", &format!("verbose: {}", value));
            let config = Config::parse(&text, Path::new("vars.yaml")).unwrap();
            assert_eq!(config.verbose, expected, "verbose: {}", value);
        }

        let bad = SAMPLE.replace("verbose: false", "verbose: sometimes");
        assert!(matches!(
            Config::parse(&bad, Path::new("vars.yaml")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let negative = SAMPLE.replace("days_to_keep_local: 2.5", "days_to_keep_local: -1");
        assert!(matches!(
            Config::parse(&negative, Path::new("vars.yaml")),
            Err(Error::InvalidConfig(_))
        ));

        let colon = SAMPLE.replace("rclone_remote: gdrive", "rclone_remote: \"gdrive:\"");
        assert!(matches!(
            Config::parse(&colon, Path::new("vars.yaml")),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_non_mapping_document_rejected() {
        let err = Config::parse("- a\n- b\n", Path::new("list.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let config = sample_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Passphrase(***)"));
    }

    #[test]
    fn test_load_from_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.source.is_absolute());
        assert!(config.source.ends_with("vars.yaml"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_expand_tilde() {
        let plain = expand_tilde(Path::new("/etc/rclone.conf"));
        assert_eq!(plain, PathBuf::from("/etc/rclone.conf"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x")), home.join("x"));
        }
    }
}
