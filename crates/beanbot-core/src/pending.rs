//! Drafted-but-unconfirmed ledger entries, persisted per user as JSON state
//! files so Accept/Reject buttons survive a bot restart.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, DraftId, MessageId, UserId},
    Result,
};

/// Cap per user; the oldest records fall off first.
const MAX_RECORDS_PER_USER: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Waiting for the user to accept or reject.
    Pending,
    /// Accept failed ledger validation; auto-fix is on offer.
    Error,
    Accepted,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftSource {
    Text,
    Statement,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftRecord {
    pub id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub entries: Vec<String>,
    pub summary: Option<String>,
    pub original_text: String,
    pub source: DraftSource,
    pub status: DraftStatus,
    pub error_context: Option<String>,
    /// The message carrying the inline keyboard, once known.
    pub message_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl DraftRecord {
    pub fn draft_id(&self) -> DraftId {
        DraftId(self.id.clone())
    }

    pub fn message_ref(&self) -> Option<crate::domain::MessageRef> {
        self.message_id.map(|m| crate::domain::MessageRef {
            chat_id: ChatId(self.chat_id),
            message_id: MessageId(m),
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserDrafts {
    records: Vec<DraftRecord>,
}

/// JSON-file-backed store of draft records, one file per user.
#[derive(Debug)]
pub struct PendingStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl PendingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Short hex id from wall clock + process-local counter.
    pub fn new_id(&self) -> DraftId {
        let millis = Utc::now().timestamp_millis() as u64;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        DraftId(format!("{millis:x}{:02x}", n & 0xff))
    }

    pub fn create(
        &self,
        user: UserId,
        chat: ChatId,
        entries: Vec<String>,
        summary: Option<String>,
        original_text: String,
        source: DraftSource,
    ) -> Result<DraftRecord> {
        let record = DraftRecord {
            id: self.new_id().0,
            user_id: user.0,
            chat_id: chat.0,
            entries,
            summary,
            original_text,
            source,
            status: DraftStatus::Pending,
            error_context: None,
            message_id: None,
            created_at: Utc::now(),
        };
        let mut drafts = self.load(user)?;
        drafts.records.push(record.clone());
        if drafts.records.len() > MAX_RECORDS_PER_USER {
            let excess = drafts.records.len() - MAX_RECORDS_PER_USER;
            drafts.records.drain(..excess);
        }
        self.save(user, &drafts)?;
        Ok(record)
    }

    pub fn get(&self, user: UserId, id: &DraftId) -> Result<Option<DraftRecord>> {
        Ok(self
            .load(user)?
            .records
            .into_iter()
            .find(|r| r.id == id.0))
    }

    /// Apply `f` to the record and persist; returns the updated record, or
    /// `None` when the id is unknown.
    pub fn update<F>(&self, user: UserId, id: &DraftId, f: F) -> Result<Option<DraftRecord>>
    where
        F: FnOnce(&mut DraftRecord),
    {
        let mut drafts = self.load(user)?;
        let Some(record) = drafts.records.iter_mut().find(|r| r.id == id.0) else {
            return Ok(None);
        };
        f(record);
        let updated = record.clone();
        self.save(user, &drafts)?;
        Ok(Some(updated))
    }

    fn user_file(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("pending_{}.json", user.0))
    }

    fn load(&self, user: UserId) -> Result<UserDrafts> {
        let path = self.user_file(user);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserDrafts::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, user: UserId, drafts: &UserDrafts) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.user_file(user);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(drafts)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store(prefix: &str) -> PendingStore {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        PendingStore::new(std::env::temp_dir().join(format!(
            "beanbot-pending-{prefix}-{}-{}",
            std::process::id(),
            millis
        )))
    }

    const USER: UserId = UserId(11);
    const CHAT: ChatId = ChatId(-100);

    #[test]
    fn ids_are_unique() {
        let store = tmp_store("ids");
        let a = store.new_id();
        let b = store.new_id();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn create_get_update_round_trip() {
        let store = tmp_store("crud");
        let record = store
            .create(
                USER,
                CHAT,
                vec!["entry".into()],
                Some("summary".into()),
                "spent 5".into(),
                DraftSource::Text,
            )
            .unwrap();
        let id = record.draft_id();

        let loaded = store.get(USER, &id).unwrap().unwrap();
        assert_eq!(loaded.status, DraftStatus::Pending);
        assert_eq!(loaded.chat_id, CHAT.0);
        // Timestamps must survive the JSON file round trip.
        assert_eq!(loaded.created_at, record.created_at);

        let updated = store
            .update(USER, &id, |r| {
                r.status = DraftStatus::Error;
                r.error_context = Some("does not balance".into());
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, DraftStatus::Error);

        let reloaded = store.get(USER, &id).unwrap().unwrap();
        assert_eq!(reloaded.error_context.as_deref(), Some("does not balance"));
    }

    #[test]
    fn unknown_id_is_none() {
        let store = tmp_store("missing");
        assert!(store.get(USER, &DraftId("nope".into())).unwrap().is_none());
        assert!(store
            .update(USER, &DraftId("nope".into()), |_| {})
            .unwrap()
            .is_none());
    }

    #[test]
    fn records_are_capped_per_user() {
        let store = tmp_store("cap");
        let mut first_id = None;
        for i in 0..(MAX_RECORDS_PER_USER + 5) {
            let r = store
                .create(
                    USER,
                    CHAT,
                    vec![format!("entry {i}")],
                    None,
                    format!("text {i}"),
                    DraftSource::Text,
                )
                .unwrap();
            if i == 0 {
                first_id = Some(r.draft_id());
            }
        }
        assert!(store.get(USER, &first_id.unwrap()).unwrap().is_none());
    }
}
