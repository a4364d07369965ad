//! Модуль для работы с TTS
//!
//! Трейт [`SpeechSynthesizer`] описывает внешний сервис синтеза речи,
//! [`batch::BatchSynthesizer`] распределяет субтитры по пакетам и собирает
//! результаты [`SynthesisResult`].

pub mod batch;
pub mod google;
pub mod openai;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SynthesisError;
use crate::media::audio::AudioClip;

pub use batch::{BatchOutcome, BatchStatus, BatchSynthesizer, TranslationFallback};
pub use google::GoogleTtsSynthesizer;
pub use openai::OpenAiSynthesizer;

/// Сервис синтеза речи
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Синтезировать речь для текста на языке `lang`
    async fn synthesize(&self, text: &str, lang: &str) -> std::result::Result<AudioClip, SynthesisError>;
}

/// Результат синтеза одного субтитра
#[derive(Debug, Clone)]
pub enum SynthesisResult {
    Ok { cue_index: usize, clip: AudioClip },
    Failed { cue_index: usize, reason: String },
}

impl SynthesisResult {
    pub fn cue_index(&self) -> usize {
        match self {
            Self::Ok { cue_index, .. } | Self::Failed { cue_index, .. } => *cue_index,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Подготовка текста для TTS: маркер говорящего `>>`, HTML-теги и
/// сущности удаляются, пробелы нормализуются.
pub fn prepare_text_for_tts(text: &str) -> String {
    let text = text.replace(">>", " ");
    let text = HTML_TAG.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}
