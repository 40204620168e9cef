use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// LLM backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    DeepSeek,
}

impl LlmProvider {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "" => Ok(LlmProvider::OpenAi),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            other => Err(Error::Config(format!("unknown LLM_PROVIDER: {other}"))),
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }
}

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    /// Empty list means the bot answers anyone.
    pub telegram_allowed_users: Vec<i64>,

    // LLM backend
    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    /// Voice transcription needs the OpenAI audio endpoint.
    pub transcription_available: bool,

    // Ledger storage
    pub ledger_root: PathBuf,
    pub state_dir: PathBuf,
    pub temp_dir: PathBuf,

    // Telegram limits
    /// Chunking threshold for outbound messages, kept under the hard 4096.
    pub telegram_safe_limit: usize,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Media groups
    pub media_group_timeout: Duration,

    // Dashboard (fava)
    pub fava_enabled: bool,
    pub fava_path: Option<PathBuf>,
    pub fava_host: String,
    pub fava_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_allowed_users = parse_csv_i64(env_str("ALLOWED_USERS"));

        let llm_provider = LlmProvider::parse(&env_str("LLM_PROVIDER").unwrap_or_default())?;
        let llm_api_key = env_str("LLM_API_KEY")
            .or_else(|| env_str("OPENAI_API_KEY"))
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("LLM_API_KEY environment variable is required".to_string())
            })?;
        let llm_base_url = env_str("LLM_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| llm_provider.default_base_url().to_string());
        let llm_model = env_str("LLM_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| llm_provider.default_model().to_string());
        let llm_timeout = Duration::from_secs(env_u64("LLM_TIMEOUT_SECS").unwrap_or(120));
        let transcription_available = llm_provider == LlmProvider::OpenAi;

        // Ledger storage (the compose deployment mounts data/beancount here)
        let ledger_root =
            env_path("BEANCOUNT_ROOT").unwrap_or_else(|| PathBuf::from("data/beancount"));
        let state_dir = env_path("STATE_DIR").unwrap_or_else(|| ledger_root.join("state"));
        let temp_dir = PathBuf::from(env_str("TEMP_DIR").unwrap_or("/tmp/beanbot".to_string()));

        fs::create_dir_all(&ledger_root)?;
        fs::create_dir_all(&state_dir)?;
        fs::create_dir_all(&temp_dir)?;

        // Telegram message limits
        let telegram_safe_limit = env_usize("TELEGRAM_SAFE_LIMIT").unwrap_or(4000);

        // Audit logging
        let audit_log_path =
            PathBuf::from(env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/beanbot-audit.log".to_string()));
        let audit_log_json = audit_format_is_json(env_str("AUDIT_LOG_FORMAT"));

        // Rate limiting
        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window =
            Duration::from_secs(env_u64("RATE_LIMIT_WINDOW_SECS").unwrap_or(60));

        // Media groups
        let media_group_timeout =
            Duration::from_millis(env_u64("MEDIA_GROUP_TIMEOUT").unwrap_or(2000));

        // Dashboard
        let fava_enabled = env_bool("FAVA_ENABLED").unwrap_or(true);
        let fava_path = env_path("FAVA_PATH").or_else(|| which_in_path("fava"));
        let fava_host = env_str("HOST").and_then(non_empty).unwrap_or("0.0.0.0".to_string());
        let fava_port = env_u64("PORT").map(|p| p as u16).unwrap_or(5001);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            llm_provider,
            llm_api_key,
            llm_base_url,
            llm_model,
            llm_timeout,
            transcription_available,
            ledger_root,
            state_dir,
            temp_dir,
            telegram_safe_limit,
            audit_log_path,
            audit_log_json,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
            media_group_timeout,
            fava_enabled,
            fava_path,
            fava_host,
            fava_port,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// `AUDIT_LOG_FORMAT=json` selects JSON-lines; anything else is plain text.
fn audit_format_is_json(v: Option<String>) -> bool {
    v.is_some_and(|s| s.trim().eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_format_selects_json_lines() {
        assert!(audit_format_is_json(Some("json".to_string())));
        assert!(audit_format_is_json(Some(" JSON ".to_string())));
        assert!(!audit_format_is_json(Some("text".to_string())));
        assert!(!audit_format_is_json(None));
    }

    #[test]
    fn csv_user_ids_skip_blanks_and_garbage() {
        assert_eq!(
            parse_csv_i64(Some("1, 2,,x, 3".to_string())),
            vec![1, 2, 3]
        );
        assert!(parse_csv_i64(None).is_empty());
    }
}
