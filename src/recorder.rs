//! Verification record construction and hand-off to storage

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, VerifierError};
use crate::types::{format_timestamp, UpstreamVerdict, VerificationLevel, VerificationRecord};

/// Prefix of every locally issued verification id
pub const VERIFICATION_ID_PREFIX: &str = "wid_";

/// `wid_` followed by the hex encoding of 16 bytes from the OS CSPRNG
pub fn generate_verification_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", VERIFICATION_ID_PREFIX, hex::encode(bytes))
}

impl VerificationRecord {
    /// Build a fresh record stamped with the current time
    pub fn new(
        app_id: &str,
        nullifier_hash: &str,
        verification_level: VerificationLevel,
        action: &str,
    ) -> Self {
        Self {
            verification_id: generate_verification_id(),
            nullifier_hash: nullifier_hash.to_string(),
            timestamp: Utc::now(),
            verification_level,
            action: action.to_string(),
            app_id: app_id.to_string(),
            verified: true,
        }
    }
}

/// Persistence seam for issued records.
///
/// Implementations decide whether a repeated nullifier hash is a duplicate;
/// the recorder never deduplicates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn store(&self, record: &VerificationRecord) -> Result<()>;
}

/// Store that only emits the record as a structured log event
#[derive(Debug, Default)]
pub struct LogRecordStore;

#[async_trait]
impl RecordStore for LogRecordStore {
    async fn store(&self, record: &VerificationRecord) -> Result<()> {
        info!(
            verification_id = %record.verification_id,
            app_id = %record.app_id,
            action = %record.action,
            verification_level = %record.verification_level,
            timestamp = %format_timestamp(&record.timestamp),
            "Verification record issued"
        );
        debug!("Record nullifier hash: {}", record.nullifier_hash);
        Ok(())
    }
}

pub struct VerificationRecorder {
    app_id: String,
    store: Arc<dyn RecordStore>,
}

impl VerificationRecorder {
    pub fn new(app_id: &str, store: Arc<dyn RecordStore>) -> Self {
        Self {
            app_id: app_id.to_string(),
            store,
        }
    }

    /// Issue and store a record for a verified proof.
    ///
    /// Only a `Verified` verdict produces a record.
    pub async fn record(&self, verdict: &UpstreamVerdict) -> Result<VerificationRecord> {
        let (nullifier_hash, verification_level, action) = match verdict {
            UpstreamVerdict::Verified {
                nullifier_hash,
                verification_level,
                action,
            } => (nullifier_hash, *verification_level, action),
            UpstreamVerdict::Rejected { .. } => {
                return Err(VerifierError::Internal(
                    "refusing to record a rejected verification".to_string(),
                ))
            }
        };

        let record = VerificationRecord::new(&self.app_id, nullifier_hash, verification_level, action);

        self.store.store(&record).await.map_err(|e| match e {
            VerifierError::Internal(_) => e,
            other => VerifierError::Internal(format!("failed to store verification record: {}", other)),
        })?;

        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Keeps every stored record, duplicates included
    #[derive(Default)]
    pub(crate) struct MemoryRecordStore {
        pub records: Mutex<Vec<VerificationRecord>>,
    }

    #[async_trait]
    impl RecordStore for MemoryRecordStore {
        async fn store(&self, record: &VerificationRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn store(&self, _record: &VerificationRecord) -> Result<()> {
            Err(VerifierError::Transport("storage unavailable".to_string()))
        }
    }

    fn verified(nullifier: &str) -> UpstreamVerdict {
        UpstreamVerdict::Verified {
            nullifier_hash: nullifier.to_string(),
            verification_level: VerificationLevel::Orb,
            action: "verify-human".to_string(),
        }
    }

    #[test]
    fn test_verification_id_format() {
        let id = generate_verification_id();
        assert!(id.starts_with(VERIFICATION_ID_PREFIX));
        let digits = &id[VERIFICATION_ID_PREFIX.len()..];
        assert_eq!(digits.len(), 32);
        assert!(digits.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_verification_ids_do_not_collide() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_verification_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_record_fields() {
        let store = Arc::new(MemoryRecordStore::default());
        let recorder = VerificationRecorder::new("app_staging_test", store.clone());

        let before = Utc::now();
        let record = recorder.record(&verified("0xabc")).await.unwrap();

        assert!(record.verified);
        assert_eq!(record.app_id, "app_staging_test");
        assert_eq!(record.nullifier_hash, "0xabc");
        assert_eq!(record.verification_level, VerificationLevel::Orb);
        assert_eq!(record.action, "verify-human");
        assert!(record.timestamp >= before);
        assert_eq!(store.records.lock().unwrap().as_slice(), &[record]);
    }

    #[tokio::test]
    async fn test_replayed_nullifier_gets_new_record() {
        let store = Arc::new(MemoryRecordStore::default());
        let recorder = VerificationRecorder::new("app_staging_test", store.clone());

        let first = recorder.record(&verified("0xsame")).await.unwrap();
        let second = recorder.record(&verified("0xsame")).await.unwrap();

        assert_ne!(first.verification_id, second.verification_id);
        assert_eq!(store.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_verdict_is_not_recorded() {
        let store = Arc::new(MemoryRecordStore::default());
        let recorder = VerificationRecorder::new("app_staging_test", store.clone());

        let rejected = UpstreamVerdict::Rejected {
            reason: "nope".to_string(),
            code: "invalid_proof".to_string(),
        };

        assert!(recorder.record(&rejected).await.is_err());
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_internal() {
        let recorder = VerificationRecorder::new("app_staging_test", Arc::new(FailingStore));
        let err = recorder.record(&verified("0xabc")).await.unwrap_err();
        assert!(matches!(err, VerifierError::Internal(_)));
    }

    #[tokio::test]
    async fn test_log_store_accepts_records() {
        let record = VerificationRecord::new("app", "0xabc", VerificationLevel::Device, "login");
        assert!(LogRecordStore.store(&record).await.is_ok());
    }
}
