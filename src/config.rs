use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [auth]
//                    allow_registration = false
//
//   env var:         PLAZA_AUTH__ALLOW_REGISTRATION=false   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub gateway: GatewayFileConfig,
}

/// Server tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
        }
    }
}

/// Auth-related tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            allow_registration: default_allow_registration(),
        }
    }
}

/// Gateway tunables (lives under `[gateway]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

fn default_session_ttl() -> u64 {
    604800
}
fn default_allow_registration() -> bool {
    true
}
fn default_send_channel_capacity() -> usize {
    100
}

/// Build a figment that layers: defaults → config.toml → PLAZA_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PLAZA_AUTH__SESSION_TTL_SECS=3600`  →  `auth.session_ttl_secs = 3600`
///   `PLAZA_SERVER__PORT=8080`            →  `server.port = 8080`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PLAZA_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Authentication configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Session time-to-live in seconds (default: 7 days)
    pub session_ttl_secs: u64,
    /// Whether new user registration is open (default: true)
    pub allow_registration: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            session_ttl_secs: fc.session_ttl_secs,
            allow_registration: fc.allow_registration,
        }
    }
}

/// Gateway configuration (runtime view).
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Per-connection mpsc capacity for messages to the client
    pub send_channel_capacity: usize,
}

impl GatewayConfig {
    pub fn from_file(fc: &GatewayFileConfig) -> Self {
        Self {
            send_channel_capacity: fc.send_channel_capacity,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_file(&GatewayFileConfig::default())
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PlazaConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl PlazaConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = custom_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not find home directory")
                .join(".plaza")
        });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("plaza.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_file_config_defaults() {
        let d = AuthFileConfig::default();
        assert_eq!(d.session_ttl_secs, 604800); // 7 days
        assert!(d.allow_registration);
    }

    #[test]
    fn auth_config_from_file() {
        let fc = AuthFileConfig {
            session_ttl_secs: 3600,
            allow_registration: false,
        };
        let ac = AuthConfig::from_file(&fc);
        assert_eq!(ac.session_ttl_secs, 3600);
        assert!(!ac.allow_registration);
    }

    #[test]
    fn gateway_config_defaults() {
        let gc = GatewayConfig::default();
        assert_eq!(gc.send_channel_capacity, 100);
    }

    #[test]
    fn plaza_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PlazaConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.db_path, tmp.path().join("plaza.db"));
        assert_eq!(config.config_toml_path(), tmp.path().join("config.toml"));
    }

    #[test]
    fn db_url_format() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PlazaConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        let url = config.db_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("plaza.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn reset_database_removes_sidecar_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PlazaConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        std::fs::write(&config.db_path, "fake db").unwrap();
        let wal = config.db_path.with_extension("db-wal");
        std::fs::write(&wal, "wal").unwrap();
        let shm = config.db_path.with_extension("db-shm");
        std::fs::write(&shm, "shm").unwrap();

        config.reset_database().unwrap();

        assert!(!config.db_path.exists());
        assert!(!wal.exists());
        assert!(!shm.exists());
    }

    #[test]
    fn reset_database_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PlazaConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        // Should not error when file doesn't exist
        config.reset_database().unwrap();
    }

    #[test]
    fn load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert!(fc.server.host.is_none());
        assert!(fc.auth.allow_registration);
    }

    #[test]
    fn load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nhost = \"192.168.1.1\"\nport = 8080\n\n[auth]\nallow_registration = false\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.host.as_deref(), Some("192.168.1.1"));
        assert_eq!(fc.server.port, Some(8080));
        assert!(!fc.auth.allow_registration);
    }
}
