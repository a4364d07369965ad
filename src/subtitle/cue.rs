//! Модель субтитра (cue)

use std::time::Duration;

/// Один субтитр: текст и временное окно
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// Порядковый номер (0-based), возрастает вместе со временем начала
    pub index: usize,
    /// Время начала
    pub start: Duration,
    /// Время окончания
    pub end: Duration,
    /// Исходный текст
    pub source_text: String,
    /// Переведенный текст; пуст, пока перевод не выполнен
    pub translated_text: String,
}

impl Cue {
    /// Создать новый субтитр без перевода
    pub fn new(index: usize, start: Duration, end: Duration, source_text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            source_text: source_text.into(),
            translated_text: String::new(),
        }
    }

    /// Целевое окно `end - start`; для некорректного субтитра ноль
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// `end <= start`
    pub fn is_malformed(&self) -> bool {
        self.end <= self.start
    }

    /// Текст для озвучки: перевод, если он есть, иначе исходный текст
    pub fn speech_text(&self) -> &str {
        if self.translated_text.trim().is_empty() {
            &self.source_text
        } else {
            &self.translated_text
        }
    }
}

/// Перевести время в количество семплов с округлением до ближайшего
pub fn duration_to_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize
}

/// Перевести количество семплов во время
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}
