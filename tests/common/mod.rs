//! In-memory fakes of the cluster seams, plus helpers for building runs.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, TimeZone, Utc};
use hkdf::Hkdf;
use sealed_secret_rekeyer::cluster::{
    ClusterError, EncryptedResourceStore, KeySource, PlaintextSource, PublishedKey, ResourcePage,
};
use sealed_secret_rekeyer::config::{RateLimitConfig, RetryPolicy, RunConfig, Scope};
use sealed_secret_rekeyer::controller::key_provider::KeyFetchError;
use sealed_secret_rekeyer::controller::types::{EncryptedResourceRef, KeyMaterial, PlainSnapshot};
use sealed_secret_rekeyer::controller::{Collaborators, Orchestrator, RunSummary};
use sealed_secret_rekeyer::sealing::{
    BindingIdentity, HybridSealer, KeyFingerprint, SealError, Sealer, SealingScope,
};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use x25519_dalek::{PublicKey, StaticSecret};

pub type ResourceKey = (String, String);

pub fn key(namespace: &str, name: &str) -> ResourceKey {
    (namespace.to_string(), name.to_string())
}

// ---------------------------------------------------------------------------
// Keys

/// A key pair standing in for the sealing controller's
pub struct TestKey {
    pub id: String,
    pub secret: StaticSecret,
    pub public: [u8; 32],
    pub rotated_at: DateTime<Utc>,
}

impl TestKey {
    pub fn new(id: &str, seed: u8, month: u32) -> Self {
        let secret = StaticSecret::from([seed; 32]);
        let public = PublicKey::from(&secret).to_bytes();
        Self {
            id: id.to_string(),
            secret,
            public,
            rotated_at: Utc.with_ymd_and_hms(2026, month, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn published(&self) -> PublishedKey {
        PublishedKey {
            id: self.id.clone(),
            public_key: STANDARD.encode(self.public),
            rotated_at: self.rotated_at,
        }
    }

    pub fn material(&self) -> KeyMaterial {
        KeyMaterial::new(self.id.clone(), self.public.to_vec(), self.rotated_at)
    }

    pub fn fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of_public_key(&self.public)
    }

    /// Decrypt a blob produced by the hybrid sealer, authenticated against `binding`
    pub fn open(&self, blob: &str, binding: &BindingIdentity) -> Option<Vec<u8>> {
        const HEADER: usize = 1 + 8 + 32 + 12;
        let raw = STANDARD.decode(blob).ok()?;
        if raw.len() < HEADER || raw[0] != 1 {
            return None;
        }
        let ephemeral: [u8; 32] = raw[9..41].try_into().ok()?;
        let nonce = &raw[41..53];

        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral));
        let mut salt = ephemeral.to_vec();
        salt.extend_from_slice(&self.public);
        let mut field_key = [0u8; 32];
        Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes())
            .expand(b"sealed-secret-rekeyer/v1 field key", &mut field_key)
            .ok()?;

        ChaCha20Poly1305::new(Key::from_slice(&field_key))
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &raw[HEADER..],
                    aad: &binding.associated_data(),
                },
            )
            .ok()
    }
}

pub fn strict_binding(namespace: &str, name: &str) -> BindingIdentity {
    BindingIdentity {
        namespace: namespace.to_string(),
        name: name.to_string(),
        secret_type: "Opaque".to_string(),
        scope: SealingScope::Strict,
    }
}

/// Seal `fields` for `namespace/name` under `key`, the way the controller did originally
pub fn seal_with(
    key: &TestKey,
    namespace: &str,
    name: &str,
    fields: &BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, String> {
    HybridSealer::new()
        .seal(fields, &key.material(), &strict_binding(namespace, name))
        .unwrap()
}

pub fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
        .collect()
}

/// Key endpoint returning a fixed document or error
pub struct StaticKeys {
    response: Result<Vec<PublishedKey>, KeyFetchError>,
    delay: Duration,
    pub calls: AtomicU32,
}

impl StaticKeys {
    pub fn new(keys: &[&TestKey]) -> Self {
        Self::respond(Ok(keys.iter().map(|k| k.published()).collect()))
    }

    pub fn respond(response: Result<Vec<PublishedKey>, KeyFetchError>) -> Self {
        Self {
            response,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn published_keys(&self) -> Result<Vec<PublishedKey>, KeyFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// Encrypted resources

#[derive(Debug, Clone)]
pub struct StoredResource {
    pub version: u64,
    pub encrypted_data: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub scope: SealingScope,
}

#[derive(Default)]
struct StoreState {
    resources: BTreeMap<ResourceKey, StoredResource>,
    /// Every write to these conflicts, as if another actor always wins
    always_conflict: BTreeSet<ResourceKey>,
    /// Remaining writes to conflict before one is accepted
    conflicts_remaining: HashMap<ResourceKey, u32>,
    /// Remaining writes to fail with a transport error
    transport_failures: HashMap<ResourceKey, u32>,
    /// Delete the resource when a write to it conflicts
    delete_on_conflict: BTreeSet<ResourceKey>,
    write_attempts: HashMap<ResourceKey, u32>,
    /// Zero-based page index that fails, and how
    failing_page: Option<(usize, ClusterError)>,
    list_calls: u32,
}

/// In-memory encrypted resource API with resource versions
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, encrypted_data: BTreeMap<String, String>) {
        self.insert_with(namespace, name, encrypted_data, BTreeMap::new(), SealingScope::Strict);
    }

    pub fn insert_with(
        &self,
        namespace: &str,
        name: &str,
        encrypted_data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
        scope: SealingScope,
    ) {
        self.state.lock().unwrap().resources.insert(
            key(namespace, name),
            StoredResource {
                version: 1,
                encrypted_data,
                labels,
                scope,
            },
        );
    }

    pub fn resource(&self, namespace: &str, name: &str) -> Option<StoredResource> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn always_conflict(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .always_conflict
            .insert(key(namespace, name));
    }

    pub fn conflict_times(&self, namespace: &str, name: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .conflicts_remaining
            .insert(key(namespace, name), times);
    }

    pub fn fail_writes_transiently(&self, namespace: &str, name: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .transport_failures
            .insert(key(namespace, name), times);
    }

    pub fn delete_on_conflict(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_on_conflict
            .insert(key(namespace, name));
    }

    pub fn fail_page(&self, page: usize, error: ClusterError) {
        self.state.lock().unwrap().failing_page = Some((page, error));
    }

    pub fn write_attempts(&self, namespace: &str, name: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .write_attempts
            .get(&key(namespace, name))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_write_attempts(&self) -> u32 {
        self.state.lock().unwrap().write_attempts.values().sum()
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }

    fn to_ref(key: &ResourceKey, stored: &StoredResource) -> EncryptedResourceRef {
        EncryptedResourceRef {
            namespace: key.0.clone(),
            name: key.1.clone(),
            resource_version: stored.version.to_string(),
            encrypted_data: stored.encrypted_data.clone(),
            scope: stored.scope,
            template_type: None,
        }
    }
}

fn selector_matches(selector: Option<&str>, labels: &BTreeMap<String, String>) -> bool {
    selector.map_or(true, |selector| {
        selector.split(',').all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).is_some_and(|l| l == v.trim()),
            None => labels.contains_key(term.trim()),
        })
    })
}

#[async_trait]
impl EncryptedResourceStore for FakeStore {
    async fn list_page(
        &self,
        scope: &Scope,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ResourcePage, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        let offset: usize = match continue_token {
            Some(token) => token
                .parse()
                .map_err(|_| ClusterError::Gone(format!("bad continue token {token}")))?,
            None => 0,
        };
        let limit = limit as usize;
        if let Some((page, error)) = &state.failing_page {
            if offset / limit == *page {
                return Err(error.clone());
            }
        }

        let matching: Vec<EncryptedResourceRef> = state
            .resources
            .iter()
            .filter(|(key, _)| scope.namespace.as_ref().map_or(true, |ns| &key.0 == ns))
            .filter(|(_, stored)| selector_matches(scope.label_selector.as_deref(), &stored.labels))
            .map(|(key, stored)| Self::to_ref(key, stored))
            .collect();

        let items: Vec<_> = matching.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + items.len();
        Ok(ResourcePage {
            items,
            continue_token: (next < matching.len()).then(|| next.to_string()),
        })
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EncryptedResourceRef>, ClusterError> {
        let key = key(namespace, name);
        let state = self.state.lock().unwrap();
        Ok(state
            .resources
            .get(&key)
            .map(|stored| Self::to_ref(&key, stored)))
    }

    async fn replace_encrypted_data(
        &self,
        resource: &EncryptedResourceRef,
        encrypted_data: &BTreeMap<String, String>,
        expected_version: &str,
    ) -> Result<String, ClusterError> {
        let key = key(&resource.namespace, &resource.name);
        let mut state = self.state.lock().unwrap();
        *state.write_attempts.entry(key.clone()).or_default() += 1;

        if let Some(remaining) = state.transport_failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Transport("connection reset".to_string()));
            }
        }

        let forced_conflict = state.always_conflict.contains(&key)
            || state
                .conflicts_remaining
                .get_mut(&key)
                .is_some_and(|remaining| {
                    if *remaining > 0 {
                        *remaining -= 1;
                        true
                    } else {
                        false
                    }
                });

        if forced_conflict {
            if state.delete_on_conflict.contains(&key) {
                state.resources.remove(&key);
            } else if let Some(stored) = state.resources.get_mut(&key) {
                // Another actor got there first
                stored.version += 1;
            }
            return Err(ClusterError::Conflict);
        }

        let Some(stored) = state.resources.get_mut(&key) else {
            return Err(ClusterError::NotFound);
        };
        if stored.version.to_string() != expected_version {
            return Err(ClusterError::Conflict);
        }
        stored.encrypted_data = encrypted_data.clone();
        stored.version += 1;
        Ok(stored.version.to_string())
    }
}

// ---------------------------------------------------------------------------
// Plaintext Secrets

#[derive(Default)]
pub struct FakePlaintext {
    secrets: Mutex<BTreeMap<ResourceKey, BTreeMap<String, Vec<u8>>>>,
    unauthorized: Mutex<BTreeSet<ResourceKey>>,
    pub reads: AtomicU32,
}

impl FakePlaintext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.secrets
            .lock()
            .unwrap()
            .insert(key(namespace, name), data);
    }

    pub fn deny(&self, namespace: &str, name: &str) {
        self.unauthorized
            .lock()
            .unwrap()
            .insert(key(namespace, name));
    }
}

#[async_trait]
impl PlaintextSource for FakePlaintext {
    async fn get_plaintext(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PlainSnapshot>, ClusterError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = key(namespace, name);
        if self.unauthorized.lock().unwrap().contains(&key) {
            return Err(ClusterError::Unauthorized(
                "secrets is forbidden: User \"rekeyer\" cannot get resource \"secrets\""
                    .to_string(),
            ));
        }
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&key)
            .map(|data| PlainSnapshot {
                namespace: namespace.to_string(),
                name: name.to_string(),
                secret_type: Some("Opaque".to_string()),
                data: data.clone(),
            }))
    }
}

// ---------------------------------------------------------------------------
// Sealer

/// Hybrid sealer that rejects one resource
pub struct FailingSealer {
    inner: HybridSealer,
    fail_for: ResourceKey,
}

impl FailingSealer {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            inner: HybridSealer::new(),
            fail_for: key(namespace, name),
        }
    }
}

impl Sealer for FailingSealer {
    fn seal(
        &self,
        fields: &BTreeMap<String, Vec<u8>>,
        key: &KeyMaterial,
        binding: &BindingIdentity,
    ) -> Result<BTreeMap<String, String>, SealError> {
        if (binding.namespace.as_str(), binding.name.as_str())
            == (self.fail_for.0.as_str(), self.fail_for.1.as_str())
        {
            return Err(SealError::Encrypt {
                field: fields.keys().next().cloned().unwrap_or_default(),
                message: "sealing backend rejected input".to_string(),
            });
        }
        self.inner.seal(fields, key, binding)
    }

    fn embedded_fingerprint(&self, ciphertext: &str) -> Option<KeyFingerprint> {
        self.inner.embedded_fingerprint(ciphertext)
    }
}

// ---------------------------------------------------------------------------
// Runs

/// Fakes for one test cluster
pub struct World {
    pub store: Arc<FakeStore>,
    pub plaintext: Arc<FakePlaintext>,
    pub keys: Arc<StaticKeys>,
    pub sealer: Arc<dyn Sealer>,
}

impl World {
    pub fn new(keys: StaticKeys) -> Self {
        Self {
            store: Arc::new(FakeStore::new()),
            plaintext: Arc::new(FakePlaintext::new()),
            keys: Arc::new(keys),
            sealer: Arc::new(HybridSealer::new()),
        }
    }

    /// Seed a resource sealed under `sealed_with` plus its plaintext Secret
    pub fn seed(&self, namespace: &str, name: &str, key: &TestKey, pairs: &[(&str, &str)]) {
        let data = fields(pairs);
        self.store
            .insert(namespace, name, seal_with(key, namespace, name, &data));
        self.plaintext.insert(namespace, name, data);
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: Arc::clone(&self.store) as Arc<dyn EncryptedResourceStore>,
            plaintext: Arc::clone(&self.plaintext) as Arc<dyn PlaintextSource>,
            keys: Arc::clone(&self.keys) as Arc<dyn KeySource>,
            sealer: Arc::clone(&self.sealer),
        }
    }

    pub async fn run(&self, config: RunConfig) -> RunSummary {
        Orchestrator::new(Arc::new(config), self.collaborators())
            .run()
            .await
    }
}

/// Cluster-wide run with fast retries
pub fn config() -> RunConfig {
    RunConfig {
        scope: Scope::all_namespaces(),
        concurrency: 4,
        page_size: 10,
        retry: RetryPolicy {
            max_conflict_attempts: 3,
            max_transport_attempts: 5,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            conflict_jitter: Duration::from_millis(2),
        },
        rate_limit: RateLimitConfig {
            qps: 10_000.0,
            burst: 1_000,
        },
        ..RunConfig::default()
    }
}
