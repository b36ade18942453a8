//! KMIP JSON client over HTTPS with mutual TLS

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use sealgate_core::config::KmsConfig;
use zeroize::Zeroizing;

use crate::error::{KmsError, KmsResult};
use crate::ttlv::Ttlv;
use crate::{requests, require_hex, require_non_empty, EncryptOutput, KeyPairUids, KeyServer};

/// Single-endpoint KMIP client. Requests are never retried.
pub struct KmipClient {
    http: Client,
    endpoint: String,
}

impl std::fmt::Debug for KmipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmipClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl KmipClient {
    /// Plain client without a client certificate (tests, loopback servers).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> KmsResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KmsError::Transport(format!("building HTTP client: {e}")))?;
        Self::with_http(endpoint, http)
    }

    /// Build from `[kms]` config: loads the PEM client identity and the
    /// optional CA bundle.
    pub fn from_config(cfg: &KmsConfig) -> KmsResult<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .use_rustls_tls();

        match (&cfg.client_cert, &cfg.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = read_pem(cert)?;
                pem.push(b'\n');
                pem.extend_from_slice(&read_pem(key)?);
                let identity = Identity::from_pem(&pem)
                    .map_err(|e| KmsError::InvalidInput(format!("client identity: {e}")))?;
                builder = builder.identity(identity);
            }
            (None, None) => {
                tracing::warn!(endpoint = %cfg.endpoint, "KMS client has no client certificate");
            }
            _ => {
                return Err(KmsError::InvalidInput(
                    "client_cert and client_key must be set together".into(),
                ))
            }
        }

        if let Some(ca) = &cfg.ca_cert {
            let cert = Certificate::from_pem(&read_pem(ca)?)
                .map_err(|e| KmsError::InvalidInput(format!("CA bundle {}: {e}", ca.display())))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| KmsError::Transport(format!("building HTTP client: {e}")))?;
        Self::with_http(cfg.endpoint.clone(), http)
    }

    fn with_http(endpoint: impl Into<String>, http: Client) -> KmsResult<Self> {
        let endpoint = endpoint.into();
        require_non_empty("KMS endpoint", &endpoint)?;
        if endpoint.starts_with("http://") {
            tracing::warn!(endpoint = %endpoint, "KMS endpoint uses plaintext HTTP");
        }
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one KMIP request and parse the reply tree.
    pub async fn send(&self, request: &Ttlv) -> KmsResult<Ttlv> {
        let operation = request.tag.as_str();
        tracing::debug!(operation, "KMS request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| KmsError::Transport(format!("{operation}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KmsError::from_status(status.as_u16(), operation, &body));
        }

        response
            .json::<Ttlv>()
            .await
            .map_err(|e| KmsError::ResponseParse(format!("{operation}: {e}")))
    }
}

fn read_pem(path: &Path) -> KmsResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| KmsError::InvalidInput(format!("reading {}: {e}", path.display())))
}

/// Raw key bytes from an Export reply: either a ByteString `KeyMaterial` or a
/// transparent key structure holding one.
fn exported_key_hex(resp: &Ttlv) -> KmsResult<Zeroizing<String>> {
    let material = resp
        .find("Object/KeyBlock/KeyValue/KeyMaterial")
        .ok_or_else(|| KmsError::ResponseParse("ExportResponse has no KeyMaterial".into()))?;

    let hex = material
        .as_text()
        .or_else(|| material.find("ByteString").and_then(Ttlv::as_text))
        .or_else(|| material.find("Key").and_then(Ttlv::as_text))
        .ok_or_else(|| KmsError::ResponseParse("KeyMaterial holds no byte string".into()))?;
    Ok(Zeroizing::new(hex.to_owned()))
}

#[async_trait]
impl KeyServer for KmipClient {
    async fn generate_symmetric(&self, tag: &str) -> KmsResult<String> {
        require_non_empty("tag", tag)?;
        let resp = self.send(&requests::create_symmetric(tag)).await?;
        Ok(resp.require_text("UniqueIdentifier")?.to_owned())
    }

    async fn generate_keypair(&self, tag: &str) -> KmsResult<KeyPairUids> {
        require_non_empty("tag", tag)?;
        let resp = self.send(&requests::create_keypair(tag)).await?;
        Ok(KeyPairUids {
            private_uid: resp.require_text("PrivateKeyUniqueIdentifier")?.to_owned(),
            public_uid: resp.require_text("PublicKeyUniqueIdentifier")?.to_owned(),
        })
    }

    async fn export(&self, key_uid: &str) -> KmsResult<Zeroizing<String>> {
        require_non_empty("key_uid", key_uid)?;
        let resp = self.send(&requests::export(key_uid)).await?;
        exported_key_hex(&resp)
    }

    async fn locate(&self, tag: &str) -> KmsResult<Vec<String>> {
        require_non_empty("tag", tag)?;
        let resp = self.send(&requests::locate(tag)).await?;
        if resp.find("LocatedItems").and_then(Ttlv::as_i64) == Some(0) {
            return Ok(Vec::new());
        }
        let holder = resp.find("UniqueIdentifiers").unwrap_or(&resp);
        Ok(holder
            .find_all("UniqueIdentifier")
            .filter_map(Ttlv::as_text)
            .map(str::to_owned)
            .collect())
    }

    async fn encrypt(&self, key_uid: &str, plaintext_hex: &str) -> KmsResult<EncryptOutput> {
        require_non_empty("key_uid", key_uid)?;
        require_hex("plaintext", plaintext_hex)?;
        let resp = self.send(&requests::encrypt(key_uid, plaintext_hex)).await?;
        Ok(EncryptOutput {
            ciphertext_hex: resp.require_text("Data")?.to_owned(),
            iv_hex: resp.require_text("IvCounterNonce")?.to_owned(),
            tag_hex: resp.require_text("AuthenticatedEncryptionTag")?.to_owned(),
        })
    }

    async fn decrypt(
        &self,
        key_uid: &str,
        ciphertext_hex: &str,
        iv_hex: &str,
        tag_hex: &str,
    ) -> KmsResult<Zeroizing<String>> {
        require_non_empty("key_uid", key_uid)?;
        require_hex("ciphertext", ciphertext_hex)?;
        require_hex("iv", iv_hex)?;
        require_hex("tag", tag_hex)?;
        let resp = self
            .send(&requests::decrypt(key_uid, ciphertext_hex, iv_hex, tag_hex))
            .await?;
        Ok(Zeroizing::new(resp.require_text("Data")?.to_owned()))
    }

    async fn rekey(&self, key_uid: &str) -> KmsResult<String> {
        require_non_empty("key_uid", key_uid)?;
        let resp = self.send(&requests::rekey(key_uid)).await?;
        Ok(resp.require_text("UniqueIdentifier")?.to_owned())
    }

    async fn revoke(&self, key_uid: &str) -> KmsResult<()> {
        require_non_empty("key_uid", key_uid)?;
        self.send(&requests::revoke(key_uid, "revoked by sealgate"))
            .await
            .map(|_| ())
    }

    async fn destroy(&self, key_uid: &str) -> KmsResult<()> {
        require_non_empty("key_uid", key_uid)?;
        self.send(&requests::destroy(key_uid)).await.map(|_| ())
    }
}
