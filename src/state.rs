use std::sync::Arc;

use tracing::info;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::PgTokenStore;
use crate::auth::services::TokenService;
use crate::config::AppConfig;
use crate::db;
use crate::geo::{GeoLocator, HttpGeoLocator, NoopGeoLocator};
use crate::notify::{LogNotifier, Notifier};
use crate::storage::{S3Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};
use crate::verifications::recognition::{FaceRecognizer, HttpFaceRecognizer};
use crate::verifications::repo::{PgVerificationStore, VerificationStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: TokenService,
    pub verifications: Arc<dyn VerificationStore>,
    pub storage: Arc<dyn StorageClient>,
    pub recognizer: Arc<dyn FaceRecognizer>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;

        let s3 = S3Storage::from_config(&config.storage).await?;
        s3.ensure_bucket().await?;
        let storage = Arc::new(s3) as Arc<dyn StorageClient>;

        let geo: Arc<dyn GeoLocator> = match &config.geo.base_url {
            Some(url) => {
                info!(%url, "ip geolocation enabled");
                Arc::new(HttpGeoLocator::new(url, &config.geo)?)
            }
            None => Arc::new(NoopGeoLocator),
        };

        let tokens = TokenService::new(
            JwtKeys::from_config(&config.jwt),
            Arc::new(PgTokenStore::new(pool.clone())),
            geo,
            config.reset_token_ttl_minutes,
        );

        Ok(Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            tokens,
            verifications: Arc::new(PgVerificationStore::new(pool)),
            storage,
            recognizer: Arc::new(HttpFaceRecognizer::new(&config.recognition)?),
            notifier: Arc::new(LogNotifier),
            config,
        })
    }
}
