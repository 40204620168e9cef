//! Per-user custom interpretation instruction (preferred accounts, default
//! currency, language). Injected into every draft prompt.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::UserId, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct InstructionFile {
    instruction: String,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct InstructionStore {
    dir: PathBuf,
}

impl InstructionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The current instruction, if a non-blank one is set.
    pub fn get(&self, user: UserId) -> Result<Option<String>> {
        let path = self.user_file(user);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: InstructionFile = serde_json::from_str(&content)?;
        let trimmed = file.instruction.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    pub fn set(&self, user: UserId, instruction: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.user_file(user);
        let tmp = path.with_extension("json.tmp");
        let file = InstructionFile {
            instruction: instruction.trim().to_string(),
            updated_at: Utc::now(),
        };
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn clear(&self, user: UserId) -> Result<()> {
        match fs::remove_file(self.user_file(user)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn user_file(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("instruction_{}.json", user.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store(prefix: &str) -> InstructionStore {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        InstructionStore::new(std::env::temp_dir().join(format!(
            "beanbot-instr-{prefix}-{}-{}",
            std::process::id(),
            millis
        )))
    }

    const USER: UserId = UserId(3);

    #[test]
    fn set_get_clear() {
        let store = tmp_store("roundtrip");
        assert!(store.get(USER).unwrap().is_none());

        store.set(USER, "  Always use KZT.  ").unwrap();
        assert_eq!(store.get(USER).unwrap().as_deref(), Some("Always use KZT."));

        store.clear(USER).unwrap();
        assert!(store.get(USER).unwrap().is_none());
        // Clearing twice is fine.
        store.clear(USER).unwrap();
    }

    #[test]
    fn blank_instruction_reads_as_unset() {
        let store = tmp_store("blank");
        store.set(USER, "   ").unwrap();
        assert!(store.get(USER).unwrap().is_none());
    }
}
