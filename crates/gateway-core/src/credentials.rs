//! Credential Verifier (C2).
//!
//! Two verifier types behind a common `CredentialVerifier` trait, the same
//! trait-behind-impl shape as the adjacent tenant module: callers depend on
//! the trait, concrete network calls (Ed25519 verification, JWKS fetch)
//! live in the impls.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use gateway_protocol::GatewayError;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Dashboard,
}

#[derive(Debug, Clone)]
pub struct VerifiedPrincipal {
    pub principal_id: String,
    pub tenant_id: String,
    pub role: Role,
    pub capabilities: Vec<String>,
}

pub enum Credentials<'a> {
    AgentChallenge {
        tenant_id: &'a str,
        principal_id: &'a str,
        challenge: &'a str,
        signature_b64: &'a str,
    },
    DashboardToken {
        token: &'a str,
    },
}

pub trait CredentialVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        credentials: Credentials<'a>,
    ) -> BoxFuture<'a, Result<VerifiedPrincipal, GatewayError>>;
}

/// The external client-credential lookup contract.
pub trait PrincipalDirectory: Send + Sync {
    fn lookup_agent_key(
        &self,
        tenant_id: &str,
        principal_id: &str,
    ) -> BoxFuture<'_, Result<AgentKeyRecord, GatewayError>>;

    /// Enforces single-use and the ≤5-minute TTL on the per-tenant nonce;
    /// owned by the same external store that issued the challenge.
    fn consume_challenge(
        &self,
        tenant_id: &str,
        principal_id: &str,
        challenge: &str,
    ) -> BoxFuture<'_, Result<(), GatewayError>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentKeyRecord {
    pub public_key_b64: String,
    pub capabilities: Vec<String>,
}

pub struct AgentChallengeVerifier<D: PrincipalDirectory> {
    directory: D,
}

impl<D: PrincipalDirectory> AgentChallengeVerifier<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }
}

impl<D: PrincipalDirectory> CredentialVerifier for AgentChallengeVerifier<D> {
    fn verify<'a>(
        &'a self,
        credentials: Credentials<'a>,
    ) -> BoxFuture<'a, Result<VerifiedPrincipal, GatewayError>> {
        Box::pin(async move {
            let Credentials::AgentChallenge {
                tenant_id,
                principal_id,
                challenge,
                signature_b64,
            } = credentials
            else {
                return Err(GatewayError::AuthFailure {
                    reason: "agent verifier invoked with non-agent credentials".into(),
                });
            };

            // Look up the key and consume the challenge regardless of order
            // outcome: a miss on either path takes the same two awaits as a
            // verified failure, so a timing side-channel can't distinguish
            // "unknown principal" from "bad signature".
            let key_record = self
                .directory
                .lookup_agent_key(tenant_id, principal_id)
                .await?;
            self.directory
                .consume_challenge(tenant_id, principal_id, challenge)
                .await?;

            let key_bytes = base64::engine::general_purpose::STANDARD
                .decode(&key_record.public_key_b64)
                .map_err(|e| GatewayError::AuthFailure {
                    reason: format!("malformed public key: {e}"),
                })?;
            let key_bytes: [u8; 32] =
                key_bytes
                    .try_into()
                    .map_err(|_| GatewayError::AuthFailure {
                        reason: "public key is not 32 bytes".into(),
                    })?;
            let verifying_key =
                VerifyingKey::from_bytes(&key_bytes).map_err(|e| GatewayError::AuthFailure {
                    reason: format!("invalid public key: {e}"),
                })?;

            let sig_bytes = base64::engine::general_purpose::STANDARD
                .decode(signature_b64)
                .map_err(|e| GatewayError::AuthFailure {
                    reason: format!("malformed signature: {e}"),
                })?;
            let sig_bytes: [u8; 64] =
                sig_bytes
                    .try_into()
                    .map_err(|_| GatewayError::AuthFailure {
                        reason: "signature is not 64 bytes".into(),
                    })?;
            let signature = Signature::from_bytes(&sig_bytes);

            verifying_key
                .verify_strict(challenge.as_bytes(), &signature)
                .map_err(|_| GatewayError::AuthFailure {
                    reason: "signature verification failed".into(),
                })?;

            Ok(VerifiedPrincipal {
                principal_id: principal_id.to_string(),
                tenant_id: tenant_id.to_string(),
                role: Role::Agent,
                capabilities: key_record.capabilities,
            })
        })
    }
}

/// HTTP-backed `PrincipalDirectory` — the concrete client for the external
/// agent-key-and-nonce store.
pub struct HttpPrincipalDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPrincipalDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl PrincipalDirectory for HttpPrincipalDirectory {
    fn lookup_agent_key(
        &self,
        tenant_id: &str,
        principal_id: &str,
    ) -> BoxFuture<'_, Result<AgentKeyRecord, GatewayError>> {
        let url = format!(
            "{}/tenants/{}/agents/{}/key",
            self.base_url, tenant_id, principal_id
        );
        Box::pin(async move {
            let response =
                self.client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| GatewayError::AuthFailure {
                        reason: format!("agent key lookup failed: {e}"),
                    })?;
            if !response.status().is_success() {
                return Err(GatewayError::AuthFailure {
                    reason: format!("agent key lookup returned {}", response.status()),
                });
            }
            response
                .json::<AgentKeyRecord>()
                .await
                .map_err(|e| GatewayError::AuthFailure {
                    reason: format!("malformed agent key record: {e}"),
                })
        })
    }

    fn consume_challenge(
        &self,
        tenant_id: &str,
        principal_id: &str,
        challenge: &str,
    ) -> BoxFuture<'_, Result<(), GatewayError>> {
        let url = format!(
            "{}/tenants/{}/agents/{}/challenge/consume",
            self.base_url, tenant_id, principal_id
        );
        let body = serde_json::json!({ "challenge": challenge });
        Box::pin(async move {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| GatewayError::AuthFailure {
                    reason: format!("challenge consumption failed: {e}"),
                })?;
            if !response.status().is_success() {
                return Err(GatewayError::AuthFailure {
                    reason: format!("challenge rejected: {}", response.status()),
                });
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
pub struct DashboardTokenConfig {
    pub hmac_secret: Option<String>,
    pub jwks_url: Option<String>,
    pub allowed_algorithms: Vec<Algorithm>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

pub struct DashboardTokenVerifier {
    config: DashboardTokenConfig,
    http: reqwest::Client,
    jwks_cache: RwLock<Option<JwksCache>>,
}

impl DashboardTokenVerifier {
    pub fn new(config: DashboardTokenConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            jwks_cache: RwLock::new(None),
        }
    }

    async fn decoding_key_for(
        &self,
        alg: Algorithm,
        kid: Option<&str>,
    ) -> Result<DecodingKey, GatewayError> {
        match alg {
            Algorithm::HS256 => {
                let secret =
                    self.config
                        .hmac_secret
                        .as_ref()
                        .ok_or_else(|| GatewayError::AuthFailure {
                            reason: "no HMAC secret configured".into(),
                        })?;
                Ok(DecodingKey::from_secret(secret.as_bytes()))
            }
            Algorithm::RS256 | Algorithm::ES256 => {
                let kid = kid.ok_or_else(|| GatewayError::AuthFailure {
                    reason: "token missing kid header".into(),
                })?;
                self.jwks_key(kid).await
            }
            _ => Err(GatewayError::AuthFailure {
                reason: format!("algorithm {alg:?} not on the allowlist"),
            }),
        }
    }

    async fn jwks_key(&self, kid: &str) -> Result<DecodingKey, GatewayError> {
        {
            let cache = self.jwks_cache.read();
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed()
                    < Duration::from_secs(gateway_protocol::constants::JWKS_CACHE_TTL_SECS)
                {
                    if let Some(key) = entry.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let jwks_url = self
            .config
            .jwks_url
            .as_ref()
            .ok_or_else(|| GatewayError::AuthFailure {
                reason: "no JWKS URL configured".into(),
            })?;

        let response = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| GatewayError::AuthFailure {
                reason: format!("JWKS fetch failed: {e}"),
            })?
            .json::<JwksResponse>()
            .await
            .map_err(|e| GatewayError::AuthFailure {
                reason: format!("malformed JWKS response: {e}"),
            })?;

        let mut keys = HashMap::new();
        for jwk in response.keys {
            if let Ok(key) = DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                keys.insert(jwk.kid, key);
            }
        }

        let key = keys
            .get(kid)
            .cloned()
            .ok_or_else(|| GatewayError::AuthFailure {
                reason: format!("no JWKS key for kid {kid}"),
            })?;

        *self.jwks_cache.write() = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(key)
    }
}

impl CredentialVerifier for DashboardTokenVerifier {
    fn verify<'a>(
        &'a self,
        credentials: Credentials<'a>,
    ) -> BoxFuture<'a, Result<VerifiedPrincipal, GatewayError>> {
        Box::pin(async move {
            let Credentials::DashboardToken { token } = credentials else {
                return Err(GatewayError::AuthFailure {
                    reason: "dashboard verifier invoked with non-token credentials".into(),
                });
            };

            let header = decode_header(token).map_err(|e| GatewayError::AuthFailure {
                reason: format!("malformed token header: {e}"),
            })?;

            if !self.config.allowed_algorithms.contains(&header.alg) {
                return Err(GatewayError::AuthFailure {
                    reason: format!("algorithm {:?} not on the allowlist", header.alg),
                });
            }

            let decoding_key = self
                .decoding_key_for(header.alg, header.kid.as_deref())
                .await?;

            let mut validation = Validation::new(header.alg);
            if let Some(iss) = &self.config.issuer {
                validation.set_issuer(&[iss]);
            }
            if let Some(aud) = &self.config.audience {
                validation.set_audience(&[aud]);
            }

            let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
                GatewayError::AuthFailure {
                    reason: format!("token validation failed: {e}"),
                }
            })?;

            Ok(VerifiedPrincipal {
                principal_id: data.claims.sub.clone(),
                tenant_id: data.claims.tenant_id.unwrap_or_default(),
                role: Role::Dashboard,
                capabilities: vec![],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    struct StaticDirectory {
        key_b64: String,
        capabilities: Vec<String>,
    }

    impl PrincipalDirectory for StaticDirectory {
        fn lookup_agent_key(
            &self,
            _tenant_id: &str,
            _principal_id: &str,
        ) -> BoxFuture<'_, Result<AgentKeyRecord, GatewayError>> {
            let record = AgentKeyRecord {
                public_key_b64: self.key_b64.clone(),
                capabilities: self.capabilities.clone(),
            };
            Box::pin(async move { Ok(record) })
        }

        fn consume_challenge(
            &self,
            _tenant_id: &str,
            _principal_id: &str,
            _challenge: &str,
        ) -> BoxFuture<'_, Result<(), GatewayError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn valid_signature_resolves_principal() {
        let signing_key = SigningKey::generate(&mut rand_core::OsRng);
        let challenge = "c-abc";
        let signature = signing_key.sign(challenge.as_bytes());

        let directory = StaticDirectory {
            key_b64: base64::engine::general_purpose::STANDARD
                .encode(signing_key.verifying_key().to_bytes()),
            capabilities: vec!["gpu".into()],
        };
        let verifier = AgentChallengeVerifier::new(directory);

        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        let result = verifier
            .verify(Credentials::AgentChallenge {
                tenant_id: "T1",
                principal_id: "A1",
                challenge,
                signature_b64: &sig_b64,
            })
            .await
            .unwrap();

        assert_eq!(result.principal_id, "A1");
        assert_eq!(result.role, Role::Agent);
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let signing_key = SigningKey::generate(&mut rand_core::OsRng);
        let other_key = SigningKey::generate(&mut rand_core::OsRng);
        let challenge = "c-abc";
        let bad_signature = other_key.sign(challenge.as_bytes());

        let directory = StaticDirectory {
            key_b64: base64::engine::general_purpose::STANDARD
                .encode(signing_key.verifying_key().to_bytes()),
            capabilities: vec![],
        };
        let verifier = AgentChallengeVerifier::new(directory);

        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(bad_signature.to_bytes());
        let result = verifier
            .verify(Credentials::AgentChallenge {
                tenant_id: "T1",
                principal_id: "A1",
                challenge,
                signature_b64: &sig_b64,
            })
            .await;

        assert!(result.is_err());
    }
}
