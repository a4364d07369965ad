//! Модуль конфигурации библиотеки subdub
//!
//! Этот модуль содержит структуры и перечисления для настройки задания дубляжа.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{DubError, Result};

/// Движок синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynthesizerKind {
    /// Google Translate TTS (без ключа)
    #[default]
    Google,
    /// OpenAI `/v1/audio/speech`
    OpenAi,
}

/// Алгоритм изменения темпа при сжатии клипа
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StretchMethod {
    /// WSOLA: меняет темп, сохраняя высоту тона
    #[default]
    Wsola,
    /// Sinc-ресемплинг: меняет темп вместе с высотой тона
    Resample,
}

/// Модель TTS для использования с OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TtsModel {
    /// Стандартная модель
    #[default]
    Standard,
    /// Модель высокого качества
    HighDefinition,
}

impl TtsModel {
    /// Получить строковое представление модели
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "tts-1",
            Self::HighDefinition => "tts-1-hd",
        }
    }
}

/// Голос для использования с OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TtsVoice {
    Alloy,
    Echo,
    Fable,
    Onyx,
    #[default]
    Nova,
    Shimmer,
}

impl TtsVoice {
    /// Получить строковое представление голоса
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
        }
    }
}

/// Конфигурация задания
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DubConfig {
    /// Максимальное количество субтитров, обрабатываемых одновременно
    pub batch_size: usize,
    /// Язык субтитров ("auto" для автоопределения)
    pub source_language: String,
    /// Язык озвучки
    pub target_language: String,
    /// Во сколько раз можно ускорить клип, прежде чем допустить выход за окно
    pub max_stretch_ratio: f64,
    /// Директория для результатов (по умолчанию директория видео)
    pub output_directory: Option<PathBuf>,
    /// Частота дискретизации итоговой дорожки
    pub sample_rate: u32,
    /// Алгоритм сжатия клипов
    pub stretch_method: StretchMethod,
    /// Длительность fade in/out на краях клипа, мс
    pub fade_ms: u32,
    /// RMS-порог, ниже которого обрезаемый хвост считается тишиной
    pub silence_threshold: f32,
    /// Таймаут одного обращения к внешнему сервису
    pub request_timeout_secs: u64,
    /// Переводить ли текст перед синтезом
    pub translate: bool,
    /// Движок синтеза
    pub synthesizer: SynthesizerKind,
    /// API ключ для OpenAI
    pub openai_api_key: String,
    /// Модель TTS
    pub openai_model: TtsModel,
    /// Голос TTS
    pub openai_voice: TtsVoice,
    /// Сохранять клипы отдельных субтитров в `<output>/segments`
    pub keep_intermediate_audio: bool,
}

impl Default for DubConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            source_language: "auto".to_string(),
            target_language: "pt".to_string(),
            max_stretch_ratio: 1.5,
            output_directory: None,
            sample_rate: 24_000,
            stretch_method: StretchMethod::default(),
            fade_ms: 10,
            silence_threshold: 0.01,
            request_timeout_secs: 30,
            translate: true,
            synthesizer: SynthesizerKind::default(),
            openai_api_key: String::new(),
            openai_model: TtsModel::default(),
            openai_voice: TtsVoice::default(),
            keep_intermediate_audio: false,
        }
    }
}

impl DubConfig {
    /// Загрузить конфигурацию из JSON-файла; отсутствующие поля берутся по умолчанию
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DubError::FileNotFound(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: DubConfig = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Подставить значения из переменных окружения
    pub fn with_env_overrides(mut self) -> Self {
        if self.openai_api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.openai_api_key = key;
            }
        }
        self
    }

    /// Нужен ли перевод для этой пары языков
    pub fn needs_translation(&self) -> bool {
        self.translate && self.source_language != self.target_language
    }

    /// Проверить корректность настроек
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DubError::Configuration("batch_size must be at least 1".to_string()));
        }
        if !(self.max_stretch_ratio > 1.0) || !self.max_stretch_ratio.is_finite() {
            return Err(DubError::Configuration(format!(
                "max_stretch_ratio must be a finite number greater than 1.0, got {}",
                self.max_stretch_ratio
            )));
        }
        if self.sample_rate == 0 {
            return Err(DubError::Configuration("sample_rate must be positive".to_string()));
        }
        if self.target_language.trim().is_empty() {
            return Err(DubError::Configuration("target_language is required".to_string()));
        }
        if self.synthesizer == SynthesizerKind::OpenAi && self.openai_api_key.trim().is_empty() {
            return Err(DubError::Configuration(
                "OpenAI API key is required for the OpenAI synthesizer".to_string(),
            ));
        }
        Ok(())
    }
}
