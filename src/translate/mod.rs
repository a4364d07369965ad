//! Модуль перевода текста субтитров
//!
//! Ошибка перевода не фатальна: пакетный синтезатор в этом случае озвучивает
//! исходный текст и записывает предупреждение.

pub mod google;

use async_trait::async_trait;

use crate::error::TranslationError;

pub use google::GoogleTranslator;

/// Сервис перевода
#[async_trait]
pub trait Translator: Send + Sync {
    /// Перевести `text` с языка `source` (`"auto"` для автоопределения) на `target`
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, TranslationError>;
}

/// Переводчик, возвращающий текст без изменений
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, TranslationError> {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_noop_translator_is_identity() {
        let translated = assert_ok!(block_on(NoopTranslator.translate("Hello there", "en", "pt")));
        assert_eq!(translated, "Hello there");
    }
}
