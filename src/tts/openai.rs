//! Модуль для интеграции с OpenAI API
//!
//! Синтез речи через `/v1/audio/speech`. Ответ приходит в MP3 и
//! декодируется в [`AudioClip`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::{DubConfig, TtsModel, TtsVoice};
use crate::error::{DubError, Result, SynthesisError};
use crate::media::audio::{decode_audio_bytes, AudioClip};
use crate::tts::SpeechSynthesizer;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Синтезатор речи на базе OpenAI TTS
pub struct OpenAiSynthesizer {
    client: Client,
    api_key: String,
    model: TtsModel,
    voice: TtsVoice,
    endpoint: String,
}

impl OpenAiSynthesizer {
    /// Создать синтезатор из конфигурации
    pub fn new(config: &DubConfig) -> Result<Self> {
        if config.openai_api_key.trim().is_empty() {
            log::error!("OpenAI API key is empty");
            return Err(DubError::Configuration(
                "OpenAI API key is required for TTS generation".to_string(),
            ));
        }

        log::info!("TTS Configuration:");
        log::info!("  Model: {}", config.openai_model.as_str());
        log::info!("  Voice: {}", config.openai_voice.as_str());

        Ok(Self {
            client: Client::new(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            voice: config.openai_voice.clone(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Использовать другой адрес API (совместимые прокси)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, _lang: &str) -> std::result::Result<AudioClip, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        // Язык модель определяет сама по тексту
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model.as_str(),
                "voice": self.voice.as_str(),
                "input": text,
                "response_format": "mp3",
                "speed": 1.0
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            log::error!("OpenAI API error (status {}): {}", status, error_text);
            return Err(classify_status(status, error_text));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::Decode("empty response body".to_string()));
        }

        decode_audio_bytes(bytes)
    }
}

fn classify_status(status: StatusCode, body: String) -> SynthesisError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => SynthesisError::Quota(body),
        _ => SynthesisError::Network(format!("status {}: {}", status, body)),
    }
}
