use std::sync::Arc;

use beanbot_core::{
    config::Config,
    interpreter::{EntryModel, Transcriber},
};
use beanbot_llm::OpenAiCompatClient;

#[tokio::main]
async fn main() -> Result<(), beanbot_core::Error> {
    beanbot_core::logging::init("beanbot")?;

    let cfg = Arc::new(Config::load()?);

    let client = Arc::new(OpenAiCompatClient::from_config(&cfg)?);
    let model: Arc<dyn EntryModel> = client.clone();
    let transcriber: Option<Arc<dyn Transcriber>> = if cfg.transcription_available {
        Some(client)
    } else {
        None
    };

    beanbot_telegram::router::run_polling(cfg, model, transcriber)
        .await
        .map_err(|e| beanbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
