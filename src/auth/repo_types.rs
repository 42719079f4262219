use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::user_agent::{DeviceFingerprint, ParsedUserAgent};
use crate::geo::Location;

/// Where a token was issued from. Everything is optional; parsing is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub device_ip: Option<String>,
    pub user_agent: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub device_vendor: Option<String>,
    pub device_model: Option<String>,
    pub location_city: Option<String>,
    pub location_country: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
}

impl DeviceInfo {
    pub fn new(ua: &ParsedUserAgent, ip: Option<String>, location: Option<Location>) -> Self {
        let location = location.unwrap_or_default();
        Self {
            device_name: ua.device_model.clone(),
            device_ip: ip,
            user_agent: Some(ua.raw.clone()).filter(|s| !s.is_empty()),
            browser_name: ua.browser_name.clone(),
            browser_version: ua.browser_version.clone(),
            os_name: ua.os_name.clone(),
            os_version: ua.os_version.clone(),
            device_type: ua.device_type.clone(),
            device_vendor: ua.device_vendor.clone(),
            device_model: ua.device_model.clone(),
            location_city: location.city,
            location_country: location.country,
            location_lat: location.lat,
            location_lon: location.lon,
        }
    }

    pub fn fingerprint(&self) -> DeviceFingerprint {
        DeviceFingerprint {
            browser_name: self.browser_name.clone(),
            os_name: self.os_name.clone(),
            device_type: self.device_type.clone(),
        }
    }
}

/// Row as stored; `type` is a text column.
#[derive(Debug, FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub token: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub scopes: Vec<String>,
    pub session_id: Option<Uuid>,
    pub owned_by_id: Uuid,
    pub device_name: Option<String>,
    pub device_ip: Option<String>,
    pub user_agent: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub device_vendor: Option<String>,
    pub device_model: Option<String>,
    pub location_city: Option<String>,
    pub location_country: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub unavailable_at: Option<OffsetDateTime>,
}

/// An issued credential.
#[derive(Debug, Clone)]
pub struct Token {
    pub id: Uuid,
    pub token: String,
    pub kind: TokenKind,
    pub scopes: Vec<String>,
    pub session_id: Option<Uuid>, // shared by an access/refresh pair; None for reset tokens
    pub owned_by_id: Uuid,
    pub device: DeviceInfo,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub unavailable_at: Option<OffsetDateTime>, // set on revocation
}

impl Token {
    pub fn is_usable(&self, now: OffsetDateTime) -> bool {
        self.unavailable_at.is_none() && now < self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.unavailable_at.is_some()
    }
}

impl TryFrom<TokenRow> for Token {
    type Error = anyhow::Error;

    fn try_from(r: TokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            token: r.token,
            kind: r.kind.parse()?,
            scopes: r.scopes,
            session_id: r.session_id,
            owned_by_id: r.owned_by_id,
            device: DeviceInfo {
                device_name: r.device_name,
                device_ip: r.device_ip,
                user_agent: r.user_agent,
                browser_name: r.browser_name,
                browser_version: r.browser_version,
                os_name: r.os_name,
                os_version: r.os_version,
                device_type: r.device_type,
                device_vendor: r.device_vendor,
                device_model: r.device_model,
                location_city: r.location_city,
                location_country: r.location_country,
                location_lat: r.location_lat,
                location_lon: r.location_lon,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
            expires_at: r.expires_at,
            unavailable_at: r.unavailable_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub token: String,
    pub kind: TokenKind,
    pub scopes: Vec<String>,
    pub session_id: Option<Uuid>,
    pub owned_by_id: Uuid,
    pub device: DeviceInfo,
    pub expires_at: OffsetDateTime,
}
