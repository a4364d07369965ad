//! Синтез речи через публичный эндпоинт Google Translate TTS
//!
//! Эндпоинт принимает не более ~100 символов за запрос, поэтому текст
//! режется по словам, а полученные MP3-фрагменты декодируются и склеиваются.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::SynthesisError;
use crate::media::audio::{decode_audio_bytes, AudioClip};
use crate::tts::SpeechSynthesizer;

const DEFAULT_ENDPOINT: &str = "https://translate.google.com/translate_tts";
const MAX_CHUNK_CHARS: usize = 100;

/// Синтезатор Google TTS (ключ API не нужен)
pub struct GoogleTtsSynthesizer {
    client: Client,
    endpoint: String,
}

impl GoogleTtsSynthesizer {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch_chunk(&self, chunk: &str, lang: &str, index: usize, total: usize) -> Result<AudioClip, SynthesisError> {
        let index = index.to_string();
        let total = total.to_string();
        let textlen = chunk.chars().count().to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", lang),
                ("q", chunk),
                ("idx", index.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Google TTS returned status {}", status);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                SynthesisError::Quota(format!("status {}", status))
            } else {
                SynthesisError::Network(format!("status {}", status))
            });
        }

        decode_audio_bytes(response.bytes().await?)
    }
}

impl Default for GoogleTtsSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTtsSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<AudioClip, SynthesisError> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let total = chunks.len();
        let mut joined: Option<AudioClip> = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let clip = self.fetch_chunk(chunk, lang, i, total).await?;
            joined = Some(match joined {
                None => clip,
                Some(mut acc) => {
                    let clip = clip
                        .into_rate(acc.sample_rate)
                        .map_err(|e| SynthesisError::Decode(e.to_string()))?;
                    acc.samples.extend_from_slice(&clip.samples);
                    acc
                }
            });
        }

        joined.ok_or(SynthesisError::EmptyText)
    }
}

/// Разбить текст на фрагменты не длиннее `max_chars` символов по границам слов.
/// Слово длиннее лимита режется посимвольно.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if word_len <= max_chars {
            current.push_str(word);
        } else {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
