use crate::migrate::BatchOptions;
use ipnetwork::IpNetwork;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub max_connections: u32,
    pub tenants_file: PathBuf,
    pub migrations_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub registry_refresh: Duration,
    pub migration_workers: usize,
    pub fail_fast: bool,
    pub admin_token: Option<String>,
    pub allowed_admin_ips: Vec<IpNetwork>,
    pub trusted_proxies: Vec<IpNetwork>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // DATABASE_URL wins over the individual fields
        let database_url = if let Ok(url) = env::var("DATABASE_URL") {
            url
        } else {
            let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let db_name = env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
            let db_user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
            let db_password = env::var("DB_PASSWORD").unwrap_or_else(|_| "password".to_string());

            let encoded_password = urlencoding::encode(&db_password);

            format!("postgres://{}:{}@{}:{}/{}", db_user, encoded_password, db_host, db_port, db_name)
        };

        let gateway_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let gateway_port = env_parse("GATEWAY_PORT", 9000);
        let max_connections = env_parse("MAX_CONNECTIONS", 16);

        let tenants_file = env::var("TENANTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./tenants.json"));

        let migrations_dir = env::var("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./migrations"));

        // No LOG_DIR means console logging only
        let log_dir = env::var("LOG_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from);

        let registry_refresh_secs: u64 = env_parse("REGISTRY_REFRESH_SECS", 60);
        let migration_workers = env_parse("MIGRATION_WORKERS", 1);
        let fail_fast = env::var("FAIL_FAST").map(|v| parse_flag(&v)).unwrap_or(false);

        let admin_token = env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        let allowed_admin_ips = parse_networks(
            &env::var("ALLOWED_ADMIN_IPS").unwrap_or_else(|_| "10.0.0.0/8".to_string()),
        );
        // Empty: forwarding headers are never believed
        let trusted_proxies = parse_networks(&env::var("TRUSTED_PROXIES").unwrap_or_default());

        Ok(Config {
            database_url,
            gateway_host,
            gateway_port,
            max_connections,
            tenants_file,
            migrations_dir,
            log_dir,
            registry_refresh: Duration::from_secs(registry_refresh_secs.max(1)),
            migration_workers,
            fail_fast,
            admin_token,
            allowed_admin_ips,
            trusted_proxies,
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.gateway_host, self.gateway_port);
        addr.parse().map_err(|e| anyhow::anyhow!("Invalid socket address: {}", e))
    }

    /// Batch defaults for migrations started by the server.
    pub fn batch_options(&self) -> BatchOptions {
        let batch = BatchOptions::default().parallel(self.migration_workers);
        if self.fail_fast {
            batch.fail_fast()
        } else {
            batch
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Comma separated CIDR list; invalid entries are dropped.
fn parse_networks(value: &str) -> Vec<IpNetwork> {
    value
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                IpNetwork::from_str(trimmed).ok()
            }
        })
        .collect()
}
