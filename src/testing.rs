//! In-memory stand-ins for the stores and outbound clients, plus a router harness.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    async_trait,
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use lazy_static::lazy_static;
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use crate::app::build_app;
use crate::auth::claims::TokenKind;
use crate::auth::context::RequestContext;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify};
use crate::auth::repo::TokenStore;
use crate::auth::repo_types::{DeviceInfo, NewToken, Token};
use crate::auth::services::{TokenPair, TokenService};
use crate::config::{AppConfig, GeoConfig, JwtConfig, RecognitionConfig, StorageConfig};
use crate::geo::NoopGeoLocator;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::pagination::{Page, PaginationMeta};
use crate::state::AppState;
use crate::storage::StorageClient;
use crate::users::repo::UserStore;
use crate::users::repo_types::{
    NewUser, Role, RoleSet, User, UserChanges, UserFilters, UserSortField,
};
use crate::verifications::recognition::{FaceRecognizer, RecognitionOutcome};
use crate::verifications::repo::VerificationStore;
use crate::verifications::repo_types::{
    FaceVerification, FaceVerificationWithMedia, Media, NewFaceVerification, NewMedia,
    VerificationFilters,
};

pub const PASSWORD: &str = "Passw0rdOk";

lazy_static! {
    static ref PASSWORD_HASH: String = hash_password(PASSWORD).unwrap();
}

pub fn sample_user(email: &str) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: PASSWORD_HASH.clone(),
        first_name: "Test".into(),
        last_name: "Person".into(),
        roles: RoleSet::default(),
        is_active: true,
        last_login_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

pub fn sample_admin(email: &str) -> User {
    User {
        roles: RoleSet::try_from(vec![Role::User, Role::Admin]).unwrap(),
        ..sample_user(email)
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "faceauth-test".into(),
            audience: "faceauth-test-users".into(),
            ttl_minutes: 15,
            refresh_ttl_minutes: 60,
            remember_me_ttl_minutes: 60 * 24,
        },
        storage: StorageConfig {
            endpoint: "http://storage.test".into(),
            bucket: "test".into(),
            access_key: "test".into(),
            secret_key: "test".into(),
            region: "us-east-1".into(),
            presign_ttl_secs: 3600,
        },
        recognition: RecognitionConfig {
            base_url: "http://recognizer.test".into(),
            timeout_secs: 1,
        },
        geo: GeoConfig {
            base_url: None,
            timeout_secs: 1,
        },
        reset_token_ttl_minutes: 60,
    }
}

pub fn test_token_service(store: Arc<InMemoryTokenStore>) -> TokenService {
    let cfg = test_config();
    TokenService::new(
        JwtKeys::from_config(&cfg.jwt),
        store,
        Arc::new(NoopGeoLocator),
        cfg.reset_token_ttl_minutes,
    )
}

/// Opens a session for `user` as an anonymous client would.
pub async fn seed_session(state: &AppState, user: &User) -> TokenPair {
    state
        .tokens
        .generate_tokens(user, &RequestContext::default(), false)
        .await
        .unwrap()
}

// ---- users ----

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserStore {
    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    fn email_taken(users: &[User], email: &str, except: Option<Uuid>) -> bool {
        users.iter().any(|u| {
            u.deleted_at.is_none()
                && Some(u.id) != except
                && u.email.eq_ignore_ascii_case(email)
        })
    }
}

fn compare_users(a: &User, b: &User, field: UserSortField) -> Ordering {
    match field {
        UserSortField::Email => a.email.cmp(&b.email),
        UserSortField::FirstName => a.first_name.cmp(&b.first_name),
        UserSortField::LastName => a.last_name.cmp(&b.last_name),
        UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        UserSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        UserSortField::LastLoginAt => a.last_login_at.cmp(&b.last_login_at),
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.deleted_at.is_none() && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.deleted_at.is_none() && u.id == id)
            .cloned())
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        anyhow::ensure!(!Self::email_taken(&users, &new.email, None), "duplicate email");
        let user = User {
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            ..sample_user("")
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &changes.email {
            anyhow::ensure!(!Self::email_taken(&users, email, Some(id)), "duplicate email");
        }
        let Some(user) = users.iter_mut().find(|u| u.deleted_at.is_none() && u.id == id) else {
            return Ok(None);
        };
        if let Some(v) = changes.email {
            user.email = v;
        }
        if let Some(v) = changes.first_name {
            user.first_name = v;
        }
        if let Some(v) = changes.last_name {
            user.last_name = v;
        }
        if let Some(v) = changes.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = changes.roles {
            user.roles = v;
        }
        if let Some(v) = changes.is_active {
            user.is_active = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.deleted_at.is_none() && u.id == id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.deleted_at.is_none() && u.id == id) {
            user.last_login_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.iter_mut().find(|u| u.deleted_at.is_none() && u.id == id) {
            Some(user) => {
                user.deleted_at = Some(OffsetDateTime::now_utc());
                user.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_all(
        &self,
        filters: &UserFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<User>> {
        let needle = filters
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut matching: Vec<User> = self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.deleted_at.is_none())
            .filter(|u| match &needle {
                Some(n) => [&u.first_name, &u.last_name, &u.email]
                    .iter()
                    .any(|f| f.to_lowercase().contains(n.as_str())),
                None => true,
            })
            .cloned()
            .collect();

        let sort = filters.sort;
        matching.sort_by(|a, b| {
            let ord = compare_users(a, b, sort.field);
            let ord = if sort.descending { ord.reverse() } else { ord };
            ord.then(a.id.cmp(&b.id))
        });

        let total = matching.len() as i64;
        let data = matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .collect();
        Ok(Page {
            data,
            pagination: PaginationMeta::new(skip, take, total),
        })
    }
}

// ---- tokens ----

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<Vec<Token>>,
}

impl InMemoryTokenStore {
    fn revoke_where(&self, pred: impl Fn(&Token) -> bool) -> u64 {
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for t in self.tokens.lock().unwrap().iter_mut() {
            if t.unavailable_at.is_none() && pred(t) {
                t.unavailable_at = Some(now);
                t.updated_at = now;
                revoked += 1;
            }
        }
        revoked
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn create(&self, new: NewToken) -> anyhow::Result<Token> {
        let now = OffsetDateTime::now_utc();
        let token = Token {
            id: Uuid::new_v4(),
            token: new.token,
            kind: new.kind,
            scopes: new.scopes,
            session_id: new.session_id,
            owned_by_id: new.owned_by_id,
            device: new.device,
            created_at: now,
            updated_at: now,
            expires_at: new.expires_at,
            unavailable_at: None,
        };
        self.tokens.lock().unwrap().push(token.clone());
        Ok(token)
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<Token>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_all_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>> {
        // Insertion order is creation order; newest first.
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|t| t.owned_by_id == user_id)
            .cloned()
            .collect())
    }

    async fn latest_per_browser(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>> {
        let mut seen = HashSet::new();
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|t| t.owned_by_id == user_id && t.kind != TokenKind::ResetPassword)
            .filter(|t| seen.insert(t.device.browser_name.clone()))
            .cloned()
            .collect())
    }

    async fn revoke(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.revoke_where(|t| t.id == id) > 0)
    }

    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<u64> {
        Ok(self.revoke_where(|t| t.session_id == Some(session_id)))
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> anyhow::Result<u64> {
        Ok(self.revoke_where(|t| t.owned_by_id == user_id))
    }

    async fn delete_by_user_and_type(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<u64> {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| !(t.owned_by_id == user_id && t.kind == kind));
        Ok((before - tokens.len()) as u64)
    }
}

// ---- verifications ----

#[derive(Default)]
pub struct InMemoryVerificationStore {
    records: Mutex<Vec<FaceVerificationWithMedia>>,
}

impl InMemoryVerificationStore {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

fn media_row(m: NewMedia) -> Media {
    Media {
        id: Uuid::new_v4(),
        filename: m.filename,
        url: m.url,
        mime_type: m.mime_type,
        size: m.size,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn create_with_media(
        &self,
        reference: Option<NewMedia>,
        uploaded: NewMedia,
        v: NewFaceVerification,
    ) -> anyhow::Result<FaceVerificationWithMedia> {
        let reference = reference.map(media_row);
        let uploaded = media_row(uploaded);
        let record = FaceVerificationWithMedia {
            verification: FaceVerification {
                id: Uuid::new_v4(),
                reference_image_id: reference.as_ref().map(|m| m.id),
                uploaded_image_id: uploaded.id,
                image_type: v.image_type,
                result: v.result,
                confidence: v.confidence,
                duration_ms: v.duration_ms,
                created_at: OffsetDateTime::now_utc(),
            },
            reference,
            uploaded,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.verification.id == id)
            .cloned())
    }

    async fn find_all(
        &self,
        filters: &VerificationFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<FaceVerificationWithMedia>> {
        let matching: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| filters.image_type.map_or(true, |t| r.verification.image_type == t))
            .filter(|r| filters.result.map_or(true, |res| r.verification.result == res))
            .cloned()
            .collect();
        let total = matching.len() as i64;
        Ok(Page {
            data: matching
                .into_iter()
                .skip(skip as usize)
                .take(take as usize)
                .collect(),
            pagination: PaginationMeta::new(skip, take, total),
        })
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>> {
        let mut records = self.records.lock().unwrap();
        let index = records.iter().position(|r| r.verification.id == id);
        Ok(index.map(|i| records.remove(i)))
    }
}

// ---- outbound clients ----

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<BTreeSet<String>>,
}

impl FakeStorage {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String> {
        Ok(format!("https://storage.test/{key}?expires={seconds}"))
    }
}

pub struct FakeRecognizer {
    answer: Option<(bool, f64)>,
    calls: Mutex<Vec<Bytes>>,
}

impl FakeRecognizer {
    pub fn answering(is_same: bool, confidence: f64) -> Self {
        Self {
            answer: Some((is_same, confidence)),
            calls: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<Bytes> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for FakeRecognizer {
    fn default() -> Self {
        Self::answering(true, 0.97)
    }
}

#[async_trait]
impl FaceRecognizer for FakeRecognizer {
    async fn recognize(
        &self,
        image: Bytes,
        _filename: &str,
        _content_type: &str,
    ) -> anyhow::Result<RecognitionOutcome> {
        self.calls.lock().unwrap().push(image);
        let Some((is_same, confidence)) = self.answer else {
            anyhow::bail!("recognizer unavailable");
        };
        Ok(RecognitionOutcome {
            is_same,
            confidence,
            percentage: Some(format!("{:.2}%", confidence * 100.0)),
            message: None,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

// ---- router harness ----

const BOUNDARY: &str = "faceauth-test-boundary";

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                 filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.buf
    }
}

pub struct TestApp {
    pub state: AppState,
    pub users: Arc<InMemoryUserStore>,
    pub tokens: Arc<InMemoryTokenStore>,
    pub verifications: Arc<InMemoryVerificationStore>,
    pub storage: Arc<FakeStorage>,
    pub recognizer: Arc<FakeRecognizer>,
    pub notifier: Arc<RecordingNotifier>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_recognizer(FakeRecognizer::default())
    }

    pub fn with_recognizer(recognizer: FakeRecognizer) -> Self {
        let users = Arc::new(InMemoryUserStore::default());
        let tokens = Arc::new(InMemoryTokenStore::default());
        let verifications = Arc::new(InMemoryVerificationStore::default());
        let storage = Arc::new(FakeStorage::default());
        let recognizer = Arc::new(recognizer);
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState {
            config: Arc::new(test_config()),
            users: users.clone(),
            tokens: test_token_service(tokens.clone()),
            verifications: verifications.clone(),
            storage: storage.clone(),
            recognizer: recognizer.clone(),
            notifier: notifier.clone(),
        };

        Self {
            router: build_app(state.clone()),
            state,
            users,
            tokens,
            verifications,
            storage,
            recognizer,
            notifier,
        }
    }

    pub async fn insert_user(&self, user: User) -> User {
        self.users.insert(user.clone());
        user
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    fn request(
        method: Method,
        uri: &str,
        token: Option<&str>,
        user_agent: Option<&str>,
    ) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, bearer(token));
        }
        if let Some(ua) = user_agent {
            builder = builder.header(header::USER_AGENT, ua);
        }
        builder
    }

    fn json_body(builder: axum::http::request::Builder, body: Option<Value>) -> Request<Body> {
        match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let req = Self::json_body(Self::request(method, uri, token, None), body);
        self.send(req).await
    }

    pub async fn call_with_agent(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        user_agent: &str,
    ) -> (StatusCode, Value) {
        let req = Self::json_body(Self::request(method, uri, token, Some(user_agent)), body);
        self.send(req).await
    }

    pub async fn multipart(
        &self,
        uri: &str,
        body: MultipartBody,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let req = Self::request(Method::POST, uri, token, None)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body.finish()))
            .unwrap();
        self.send(req).await
    }

    /// Lets spawned notification tasks run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pub async fn password_is(&self, user_id: Uuid, password: &str) -> bool {
        let user = self.users.find_by_id(user_id).await.unwrap().unwrap();
        verify(password.to_string(), user.password_hash).await.unwrap()
    }

    /// A reset token for `user_id` that expired a minute ago.
    pub async fn expired_reset_token(&self, user_id: Uuid) -> String {
        self.tokens
            .create(NewToken {
                token: format!("expired-{}", Uuid::new_v4()),
                kind: TokenKind::ResetPassword,
                scopes: TokenKind::ResetPassword.scopes(),
                session_id: None,
                owned_by_id: user_id,
                device: DeviceInfo::default(),
                expires_at: OffsetDateTime::now_utc() - time::Duration::minutes(1),
            })
            .await
            .unwrap()
            .token
    }

    pub async fn token_id(&self, token: &str) -> Uuid {
        self.tokens.find_by_token(token).await.unwrap().unwrap().id
    }
}
