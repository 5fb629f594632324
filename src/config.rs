use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

// Range accepted by bcrypt::hash
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

#[derive(Parser, Debug)]
#[command(name = "parklot", about = "Parking lot reservation server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub bcrypt_cost: u32,
}

/// Administrator account created on first start when none exists.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "parklot_session".to_string(),
            session_hours: 720,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin123".to_string(),
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("parklot.db"));
        }

        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&config.auth.bcrypt_cost) {
            anyhow::bail!(
                "auth.bcrypt_cost must be between {} and {}, got {}",
                MIN_BCRYPT_COST,
                MAX_BCRYPT_COST,
                config.auth.bcrypt_cost
            );
        }
        if config.admin.username.trim().is_empty() || config.admin.password.is_empty() {
            anyhow::bail!("admin.username and admin.password must not be empty");
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".parklot")
        })
    }

    /// Database file; `load` always fills this in.
    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("parklot.db"))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn cli_in(dir: &Path) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(dir.to_path_buf()),
        }
    }

    fn write_config(dir: &Path, toml: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, toml).unwrap();
        path
    }

    #[test]
    fn defaults_cover_server_auth_and_admin_seed() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.auth.cookie_name, "parklot_session");
        assert_eq!(config.auth.session_hours, 720);
        assert_eq!(config.auth.bcrypt_cost, 12);
        assert_eq!(config.admin.username, "admin");
        assert_eq!(config.admin.password, "admin123");
        assert!(config.database.path.is_none());
    }

    #[test]
    fn database_defaults_into_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli_in(tmp.path())).unwrap();
        assert_eq!(config.db_path(), tmp.path().join("parklot.db"));
    }

    #[test]
    fn config_toml_in_data_dir_is_picked_up() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
[database]
path = "/var/lib/parklot/lots.db"

[auth]
session_hours = 24
"#,
        );

        let config = Config::load(&cli_in(tmp.path())).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/parklot/lots.db"));
        assert_eq!(config.auth.session_hours, 24);
        // unspecified keys in a present section keep their defaults
        assert_eq!(config.auth.cookie_name, "parklot_session");
        assert_eq!(config.auth.bcrypt_cost, 12);
    }

    #[test]
    fn admin_seed_credentials_come_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[admin]
username = "root"
password = "s3cret"
"#,
        );

        let mut cli = cli_in(tmp.path());
        cli.config = Some(path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.admin.username, "root");
        assert_eq!(config.admin.password, "s3cret");
    }

    #[test]
    fn flags_win_over_file_for_bind_address() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
[server]
host = "192.168.1.1"
port = 9000
"#,
        );

        let mut cli = cli_in(tmp.path());
        cli.port = Some(4000);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.bind_addr(), "192.168.1.1:4000");

        cli.host = Some("127.0.0.1".to_string());
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
    }

    #[test]
    fn out_of_range_bcrypt_cost_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "[auth]\nbcrypt_cost = 2\n");
        assert!(Config::load(&cli_in(tmp.path())).is_err());
    }

    #[test]
    fn blank_admin_password_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "[admin]\npassword = \"\"\n");
        assert!(Config::load(&cli_in(tmp.path())).is_err());
    }
}
