//! Dbid registry (spec.md §4.6): maps database identity strings to
//! `{source-prefix, creation-epoch}` records, enabling clone detection and
//! obsolete-data reclamation.

use crate::config::BucketPrefix;
use crate::error::{Error, Result};
use crate::object_store_client::ObjectStoreClient;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DBIDS_DIR: &str = "dbids";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbidRecord {
    pub source_bucket: String,
    pub source_prefix: String,
    pub creation_epoch: String,
}

pub struct DbidRegistry {
    store: Arc<ObjectStoreClient>,
}

impl DbidRegistry {
    pub fn new(store: Arc<ObjectStoreClient>) -> Self {
        DbidRegistry { store }
    }

    fn key(identity: &str) -> String {
        format!("{DBIDS_DIR}/{identity}")
    }

    /// Write `dbids/<identity>` on open-as-writer when the engine reports
    /// a fresh database identity (spec.md §4.6).
    pub async fn register(
        &self,
        prefix: &BucketPrefix,
        identity: &str,
        source: &BucketPrefix,
        creation_epoch: &str,
    ) -> Result<()> {
        let record = DbidRecord {
            source_bucket: source.bucket.clone(),
            source_prefix: source.prefix.clone(),
            creation_epoch: creation_epoch.to_string(),
        };
        let body = serde_json::to_vec(&record).map_err(|e| Error::permanent("dbid::encode", e))?;
        self.store
            .put(prefix, &Self::key(identity), Bytes::from(body))
            .await
    }

    pub async fn lookup(&self, prefix: &BucketPrefix, identity: &str) -> Result<Option<DbidRecord>> {
        match self.store.get_whole(prefix, &Self::key(identity)).await {
            Ok(bytes) => {
                let record: DbidRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Corruption(format!("malformed dbid record: {e}")))?;
                Ok(Some(record))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// All registered identities under `prefix` (the `dbids/` listing).
    pub async fn list_identities(&self, prefix: &BucketPrefix) -> Result<Vec<String>> {
        let page = self.store.list(prefix, DBIDS_DIR, None).await?;
        Ok(page
            .keys
            .into_iter()
            .filter_map(|k| k.rsplit('/').next().map(str::to_string))
            .collect())
    }

    pub async fn purge(&self, prefix: &BucketPrefix, identity: &str) -> Result<()> {
        self.store.delete(prefix, &Self::key(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn registry() -> DbidRegistry {
        DbidRegistry::new(Arc::new(ObjectStoreClient::from_store(
            Arc::new(InMemory::new()),
            50,
        )))
    }

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let reg = registry();
        let prefix = BucketPrefix::new("b", "db");
        let source = BucketPrefix::new("b", "db");
        reg.register(&prefix, "db-identity-1", &source, "epoch-1")
            .await
            .unwrap();

        let record = reg.lookup(&prefix, "db-identity-1").await.unwrap().unwrap();
        assert_eq!(record.creation_epoch, "epoch-1");
    }

    #[tokio::test]
    async fn p8_same_source_and_destination_yields_same_identity_lookup() {
        let reg = registry();
        let prefix = BucketPrefix::new("b", "db");
        reg.register(&prefix, "stable-identity", &prefix, "epoch-1")
            .await
            .unwrap();

        // Opening "from multiple local dirs" maps to independent
        // `DbidRegistry` instances pointed at the same prefix; both must
        // observe the same identity record.
        let reg2 = DbidRegistry::new(reg.store.clone());
        let record = reg2.lookup(&prefix, "stable-identity").await.unwrap().unwrap();
        assert_eq!(record.source_prefix, "db");
    }

    #[tokio::test]
    async fn unregistered_identity_is_none() {
        let reg = registry();
        let prefix = BucketPrefix::new("b", "db");
        assert!(reg.lookup(&prefix, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_identities_reflects_registrations() {
        let reg = registry();
        let prefix = BucketPrefix::new("b", "db");
        reg.register(&prefix, "a", &prefix, "e1").await.unwrap();
        reg.register(&prefix, "b", &prefix, "e2").await.unwrap();
        let mut ids = reg.list_identities(&prefix).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
