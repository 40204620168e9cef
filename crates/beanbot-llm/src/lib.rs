//! OpenAI-compatible adapter: entry drafting over chat completions,
//! statement extraction over the responses API, and voice transcription.
//!
//! DeepSeek speaks the same chat-completions dialect minus structured
//! outputs, so drafting falls back to `json_object` mode there.

mod parse;

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use beanbot_core::{
    config::{Config, LlmProvider},
    errors::Error,
    interpreter::{
        prompt::SYSTEM_PROMPT, BankStatement, DraftRequest, DraftResponse, EntryModel,
        StatementRequest, Transcriber,
    },
    Result,
};

const MAX_ATTEMPTS: u32 = 3;
const MAX_OUTPUT_TOKENS: u32 = 4096;

pub struct OpenAiCompatClient {
    provider: LlmProvider,
    api_key: String,
    /// Without a trailing slash, e.g. `https://api.openai.com/v1`.
    base_url: String,
    model: String,
    http: reqwest::Client,
    /// Uploaded statement files by content digest, so re-sending the same
    /// PDF does not upload it again.
    uploads: Mutex<HashMap<String, String>>,
}

impl OpenAiCompatClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.llm_timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build error: {e}")))?;
        Ok(Self {
            provider: cfg.llm_provider,
            api_key: cfg.llm_api_key.clone(),
            base_url: cfg.llm_base_url.trim_end_matches('/').to_string(),
            model: cfg.llm_model.clone(),
            http,
            uploads: Mutex::new(HashMap::new()),
        })
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("llm request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "llm request failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("llm json error: {e}")))
    }

    async fn chat_draft(&self, prompt: &str) -> Result<DraftResponse> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "response_format": self.draft_response_format(),
            "temperature": 0,
            "max_tokens": MAX_OUTPUT_TOKENS,
        });
        let v = self.post_json("chat/completions", &body).await?;
        let content = parse::extract_chat_content(&v)?;
        parse::parse_draft_content(&content)
    }

    fn draft_response_format(&self) -> Value {
        match self.provider {
            LlmProvider::OpenAi => json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "beancount_response",
                    "schema": {
                        "type": "object",
                        "properties": {
                            "entries": {"type": "array", "items": {"type": "string"}},
                            "summary": {"type": ["string", "null"]},
                        },
                        "required": ["entries", "summary"],
                        "additionalProperties": false,
                    },
                    "strict": true,
                }
            }),
            // DeepSeek has no structured outputs; the system prompt carries
            // the shape.
            LlmProvider::DeepSeek => json!({"type": "json_object"}),
        }
    }

    /// Upload a PDF once and reuse its file id for identical content.
    async fn ensure_uploaded(&self, path: &Path, bytes: Vec<u8>) -> Result<String> {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        {
            let uploads = self.uploads.lock().await;
            if let Some(id) = uploads.get(&digest) {
                return Ok(id.clone());
            }
        }

        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("statement.pdf")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .text("purpose", "user_data")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/pdf")
                    .map_err(|e| Error::External(format!("multipart error: {e}")))?,
            );

        let resp = self
            .http
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("file upload error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "file upload failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("file upload json error: {e}")))?;
        let id = v
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::External("file upload response has no id".to_string()))?
            .to_string();

        self.uploads.lock().await.insert(digest, id.clone());
        Ok(id)
    }

    async fn statement_input_content(&self, path: &Path, prompt: &str) -> Result<Value> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let bytes = tokio::fs::read(path).await.map_err(Error::Io)?;

        match ext.as_str() {
            "pdf" => {
                let file_id = self.ensure_uploaded(path, bytes).await?;
                Ok(json!([
                    {"type": "input_file", "file_id": file_id},
                    {"type": "input_text", "text": prompt},
                ]))
            }
            "png" | "jpg" | "jpeg" => {
                let mime = if ext == "png" { "image/png" } else { "image/jpeg" };
                let data_url = format!("data:{mime};base64,{}", base64_encode(&bytes));
                Ok(json!([
                    {"type": "input_image", "image_url": data_url},
                    {"type": "input_text", "text": prompt},
                ]))
            }
            other => Err(Error::External(format!(
                "unsupported statement file type '.{other}'; use PDF, PNG, or JPG"
            ))),
        }
    }
}

#[async_trait]
impl EntryModel for OpenAiCompatClient {
    async fn draft_entries(&self, req: &DraftRequest) -> Result<DraftResponse> {
        let prompt = req.build_prompt();

        let mut last_err = Error::External("no attempts made".to_string());
        for attempt in 0..MAX_ATTEMPTS {
            match self.chat_draft(&prompt).await {
                Ok(resp) if resp.is_usable() => return Ok(resp),
                Ok(_) => {
                    last_err = Error::External("model returned empty entries".to_string());
                }
                Err(e) => last_err = e,
            }
            if attempt + 1 < MAX_ATTEMPTS {
                let wait = Duration::from_secs(1 << attempt); // 1s, 2s, 4s...
                eprintln!(
                    "[LLM] Attempt {} failed ({last_err}); retrying in {}s",
                    attempt + 1,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            }
        }
        Err(last_err)
    }

    async fn extract_statement(&self, req: &StatementRequest) -> Result<BankStatement> {
        if self.provider != LlmProvider::OpenAi {
            return Err(Error::External(
                "statement extraction requires the OpenAI backend".to_string(),
            ));
        }

        let prompt = req.build_prompt();
        let content = self.statement_input_content(&req.path, &prompt).await?;
        let body = json!({
            "model": self.model,
            "input": [{"role": "user", "content": content}],
            "temperature": 0,
            "top_p": 0.1,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "bank_statement",
                    "schema": bank_statement_schema(),
                    "strict": true,
                }
            },
        });

        let v = self.post_json("responses", &body).await?;
        let text = parse::extract_responses_text(&v)?;
        let mut statement: BankStatement = serde_json::from_str(&text)
            .map_err(|e| Error::External(format!("statement response is not valid JSON: {e}")))?;

        // The model emits newest-first; the ledger wants chronological order.
        statement.transactions.reverse();
        statement.validate(&req.allowed_accounts)?;
        Ok(statement)
    }
}

#[async_trait]
impl Transcriber for OpenAiCompatClient {
    async fn transcribe_file(&self, path: &Path, prompt: &str) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(Error::Io)?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio.ogg")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .text("model", "gpt-4o-transcribe")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("audio/ogg")
                    .map_err(|e| Error::External(format!("multipart error: {e}")))?,
            );
        if !prompt.trim().is_empty() {
            form = form.text("prompt", prompt.to_string());
        }

        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("transcription request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "transcription failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("transcription json error: {e}")))?;
        let text = v
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if text.trim().is_empty() {
            return Err(Error::External(
                "transcription returned empty text".to_string(),
            ));
        }
        Ok(text)
    }
}

fn bank_statement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "institution": {"type": "string"},
            "account_holder": {"type": "string"},
            "account_number": {"type": "string"},
            "currency": {"type": "string"},
            "ledger_account": {"type": "string"},
            "statement_period": {
                "type": "object",
                "properties": {
                    "start_date": {"type": "string"},
                    "end_date": {"type": "string"},
                },
                "required": ["start_date", "end_date"],
                "additionalProperties": false,
            },
            "opening_balance": {"type": "number"},
            "closing_balance": {"type": "number"},
            "transactions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "date": {"type": "string"},
                        "description": {"type": "string"},
                        "amount": {"type": "number"},
                        "debit": {"type": "string"},
                        "credit": {"type": "string"},
                    },
                    "required": ["date", "description", "amount", "debit", "credit"],
                    "additionalProperties": false,
                },
            },
        },
        "required": [
            "institution", "account_holder", "account_number", "currency",
            "ledger_account", "statement_period", "opening_balance",
            "closing_balance", "transactions",
        ],
        "additionalProperties": false,
    })
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(BASE64_ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(BASE64_ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            BASE64_ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            BASE64_ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_matches_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn schema_lists_all_statement_fields() {
        let schema = bank_statement_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 9);
        assert!(schema["properties"]["transactions"]["items"]["properties"]["amount"].is_object());
    }
}
