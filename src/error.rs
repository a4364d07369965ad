//! Модуль обработки ошибок библиотеки subdub
//!
//! Фатальные ошибки задания описываются [`DubError`]. Ошибки отдельных
//! субтитров ([`TranslationError`], [`SynthesisError`]) никогда не выходят
//! за пределы пакетного синтезатора: они сохраняются как данные.

use std::path::PathBuf;
use thiserror::Error;

/// Ошибки библиотеки subdub
#[derive(Debug, Error)]
pub enum DubError {
    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка парсинга субтитров
    #[error("Subtitle parsing error: {0}")]
    SubtitleParsing(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Не удалось определить длительность видео (фатально)
    #[error("Media probe error: {0}")]
    MediaProbe(String),

    /// Не удалось заменить аудиодорожку (фатально); готовое аудио сохраняется
    #[error("Mux error: {message} (audio kept at {})", .audio_path.display())]
    Mux {
        message: String,
        audio_path: PathBuf,
    },

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl From<&str> for DubError {
    fn from(s: &str) -> Self {
        DubError::Other(s.to_string())
    }
}

impl From<String> for DubError {
    fn from(s: String) -> Self {
        DubError::Other(s)
    }
}

/// Ошибка перевода одного субтитра
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("translation network error: {0}")]
    Network(String),

    #[error("translation quota exceeded: {0}")]
    Quota(String),

    #[error("unsupported language pair {source_lang} -> {target_lang}")]
    UnsupportedLanguage {
        source_lang: String,
        target_lang: String,
    },

    #[error("unexpected translation response: {0}")]
    InvalidResponse(String),
}

/// Ошибка синтеза речи для одного субтитра
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesis network error: {0}")]
    Network(String),

    #[error("synthesis quota exceeded: {0}")]
    Quota(String),

    #[error("nothing to synthesize: empty text")]
    EmptyText,

    #[error("could not decode synthesized audio: {0}")]
    Decode(String),

    #[error("synthesis timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        SynthesisError::Network(err.to_string())
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        TranslationError::Network(err.to_string())
    }
}

/// Тип Result для библиотеки subdub
pub type Result<T> = std::result::Result<T, DubError>;
