use std::net::IpAddr;

use anyhow::Context;
use axum::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::GeoConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Location {
    /// `City, Region, Country`, or `None` when neither city nor country is known.
    pub fn describe(&self) -> Option<String> {
        if self.city.is_none() && self.country.is_none() {
            return None;
        }
        Some(format!(
            "{}, {}, {}",
            self.city.as_deref().unwrap_or(""),
            self.region.as_deref().unwrap_or(""),
            self.country.as_deref().unwrap_or(""),
        ))
    }
}

/// Best-effort IP geolocation. Lookups never fail the caller.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Option<Location>;
}

pub struct NoopGeoLocator;

#[async_trait]
impl GeoLocator for NoopGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Option<Location> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    city: Option<String>,
    region_name: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Client for an ip-api compatible `GET {base}/json/{ip}` endpoint.
pub struct HttpGeoLocator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoLocator {
    pub fn new(base_url: &str, cfg: &GeoConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("build geolocation http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<Location>> {
        let res: IpApiResponse = self
            .client
            .get(format!("{}/json/{}", self.base_url, ip))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if res.status != "success" {
            return Ok(None);
        }
        Ok(Some(Location {
            city: res.city,
            region: res.region_name,
            country: res.country,
            lat: res.lat,
            lon: res.lon,
        }))
    }
}

fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Option<Location> {
        if !is_public(ip) {
            return None;
        }
        match self.lookup(ip).await {
            Ok(loc) => loc,
            Err(e) => {
                debug!(error = %e, %ip, "geolocation lookup failed");
                None
            }
        }
    }
}
