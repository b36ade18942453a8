use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

/// Logical file owned by an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    /// Original filename as provided by the uploader (display only)
    pub name: String,
    pub app_id: Uuid,
    pub mime_type: String,
    /// Plaintext length in bytes
    pub size: i64,
    /// Object-store URL, empty until the ciphertext has been stored
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Crypto metadata, 1:1 with a [`FileRecord`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoMetadata {
    pub id: Uuid,
    pub file_id: Uuid,
    /// Base64 hash of the plaintext
    pub hash: String,
    /// Base64 hash of the ciphertext, when the policy asks for it
    pub enc_hash: Option<String>,
    /// KMS identifier of the DEK (KMS mode only)
    pub key_uid: Option<String>,
    /// DEK wrapped under the KEK, base64. Empty when the DEK lives only in KMS.
    pub enc_key: String,
    pub key_algo: String,
    /// Object-store version token returned by the put
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CryptoMetadata {
    pub fn has_key_uid(&self) -> bool {
        self.key_uid.as_deref().is_some_and(|uid| !uid.is_empty())
    }

    pub fn has_wrapped_key(&self) -> bool {
        !self.enc_key.is_empty()
    }

    /// Reject rows no decryptor could ever open.
    pub fn ensure_readable(&self) -> GatewayResult<()> {
        if !self.has_key_uid() && !self.has_wrapped_key() {
            return Err(GatewayError::UnreadableRecord);
        }
        Ok(())
    }
}

impl fmt::Debug for CryptoMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoMetadata")
            .field("id", &self.id)
            .field("file_id", &self.file_id)
            .field("hash", &self.hash)
            .field("enc_hash", &self.enc_hash)
            .field("key_uid", &self.key_uid)
            .field("enc_key", &if self.enc_key.is_empty() { "" } else { "[REDACTED]" })
            .field("key_algo", &self.key_algo)
            .field("version_id", &self.version_id)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// A file row joined with its crypto metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file: FileRecord,
    pub meta: CryptoMetadata,
}

/// Registered client application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: Uuid,
    pub client_id: String,
    pub name: String,
    pub is_active: bool,
}

/// Who performed an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Client,
    System,
    Admin,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Client => "client",
            ActorType::System => "system",
            ActorType::Admin => "admin",
        }
    }
}

impl FromStr for ActorType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "client" => Ok(ActorType::Client),
            "system" => Ok(ActorType::System),
            "admin" => Ok(ActorType::Admin),
            other => Err(GatewayError::InvalidInput(format!("unknown actor type: {other}"))),
        }
    }
}

/// Audited pipeline action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "download")]
    Download,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "recover")]
    Recover,
    #[serde(rename = "encrypt")]
    Encrypt,
    #[serde(rename = "decrypt")]
    Decrypt,
    #[serde(rename = "re-key")]
    ReKey,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Upload => "upload",
            AuditAction::Download => "download",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Recover => "recover",
            AuditAction::Encrypt => "encrypt",
            AuditAction::Decrypt => "decrypt",
            AuditAction::ReKey => "re-key",
        }
    }
}

impl FromStr for AuditAction {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(AuditAction::Upload),
            "download" => Ok(AuditAction::Download),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "recover" => Ok(AuditAction::Recover),
            "encrypt" => Ok(AuditAction::Encrypt),
            "decrypt" => Ok(AuditAction::Decrypt),
            "re-key" => Ok(AuditAction::ReKey),
            other => Err(GatewayError::InvalidInput(format!("unknown audit action: {other}"))),
        }
    }
}

/// An audit entry as submitted by the pipeline.
///
/// Carries no timestamp: the log store stamps entries with its own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub actor_type: ActorType,
    pub file_id: Option<Uuid>,
    pub action: AuditAction,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

/// An audit entry as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Request-scoped caller details, passed explicitly through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Content hash algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashMethod {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    /// Legacy compatibility only
    #[serde(rename = "MD5")]
    Md5,
}

impl HashMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashMethod::Sha256 => "SHA-256",
            HashMethod::Md5 => "MD5",
        }
    }
}

impl FromStr for HashMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA-256" | "SHA256" => Ok(HashMethod::Sha256),
            "MD5" => Ok(HashMethod::Md5),
            other => Err(GatewayError::InvalidInput(format!("unknown hash method: {other}"))),
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default and maximum page size for list queries
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Pagination and sort request. `sort_by`/`order` are raw client input and
/// are only ever resolved through a whitelist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub offset: i64,
    pub limit: i64,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

impl ListQuery {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            sort_by: None,
            order: None,
        }
    }

    pub fn sorted(mut self, sort_by: impl Into<String>, order: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self.order = Some(order.into());
        self
    }

    /// Offset clamped to be non-negative
    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    /// Limit clamped to `1..=MAX_PAGE_SIZE`; zero or negative means default
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit.min(MAX_PAGE_SIZE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key_uid: Option<&str>, enc_key: &str) -> CryptoMetadata {
        let now = Utc::now();
        CryptoMetadata {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            hash: "h".into(),
            enc_hash: None,
            key_uid: key_uid.map(String::from),
            enc_key: enc_key.into(),
            key_algo: "AES256-GCM".into(),
            version_id: "null".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_ensure_readable() {
        assert!(meta(Some("uid-1"), "").ensure_readable().is_ok());
        assert!(meta(None, "wrapped").ensure_readable().is_ok());
        assert!(meta(Some("uid-1"), "wrapped").ensure_readable().is_ok());
        assert!(matches!(
            meta(None, "").ensure_readable(),
            Err(GatewayError::UnreadableRecord)
        ));
        assert!(matches!(
            meta(Some(""), "").ensure_readable(),
            Err(GatewayError::UnreadableRecord)
        ));
    }

    #[test]
    fn test_metadata_debug_redacts_wrapped_key() {
        let m = meta(None, "c2VjcmV0LWtleQ==");
        let dbg = format!("{m:?}");
        assert!(!dbg.contains("c2VjcmV0LWtleQ=="));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn test_audit_action_wire_names() {
        assert_eq!(serde_json::to_string(&AuditAction::ReKey).unwrap(), "\"re-key\"");
        assert_eq!("re-key".parse::<AuditAction>().unwrap(), AuditAction::ReKey);
        assert!("rekey".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_hash_method_parse() {
        assert_eq!("sha-256".parse::<HashMethod>().unwrap(), HashMethod::Sha256);
        assert_eq!("MD5".parse::<HashMethod>().unwrap(), HashMethod::Md5);
        assert!("crc32".parse::<HashMethod>().is_err());
    }

    #[test]
    fn test_list_query_clamps() {
        assert_eq!(ListQuery::new(-5, 0).effective_offset(), 0);
        assert_eq!(ListQuery::new(0, 0).effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(ListQuery::new(0, 5000).effective_limit(), MAX_PAGE_SIZE);
        assert_eq!(ListQuery::new(0, 20).effective_limit(), 20);
    }
}
