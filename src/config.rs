use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    /// Refresh lifetime used when the client asked to be remembered.
    pub remember_me_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    /// `None` disables lookups entirely.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub recognition: RecognitionConfig,
    pub geo: GeoConfig,
    pub reset_token_ttl_minutes: i64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;

        let secret = std::env::var("JWT_SECRET")?;
        anyhow::ensure!(!secret.is_empty(), "JWT_SECRET must not be empty");
        let jwt = JwtConfig {
            secret,
            issuer: env_or("JWT_ISSUER", "faceauth"),
            audience: env_or("JWT_AUDIENCE", "faceauth-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
            remember_me_ttl_minutes: env_parse("JWT_REMEMBER_ME_TTL_MINUTES", 60 * 24 * 30),
        };

        let storage = StorageConfig {
            endpoint: env_or("MINIO_ENDPOINT", "http://localhost:9000"),
            bucket: env_or("MINIO_BUCKET", "files"),
            access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            region: env_or("MINIO_REGION", "us-east-1"),
            presign_ttl_secs: env_parse("MINIO_PRESIGN_TTL_SECS", 60 * 60 * 24),
        };

        let recognition = RecognitionConfig {
            base_url: env_or("RECOGNITION_URL", "http://localhost:7777"),
            timeout_secs: env_parse("RECOGNITION_TIMEOUT_SECS", 30),
        };

        let geo = GeoConfig {
            base_url: std::env::var("GEOIP_URL").ok().filter(|v| !v.is_empty()),
            timeout_secs: env_parse("GEOIP_TIMEOUT_SECS", 2),
        };

        Ok(Self {
            database_url,
            jwt,
            storage,
            recognition,
            geo,
            reset_token_ttl_minutes: env_parse("RESET_TOKEN_TTL_MINUTES", 60),
        })
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
