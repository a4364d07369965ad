//! Пакетный синтез речи
//!
//! Субтитры делятся на пакеты по `batch_size`. Внутри пакета каждый субтитр
//! переводится и озвучивается в отдельной задаче Tokio, пакеты идут строго
//! друг за другом. Ошибка одного субтитра превращается в
//! [`SynthesisResult::Failed`] и не влияет на соседей.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::DubConfig;
use crate::error::SynthesisError;
use crate::progress::{self, Phase, ProgressTracker};
use crate::subtitle::cue::Cue;
use crate::translate::Translator;
use crate::tts::{prepare_text_for_tts, SpeechSynthesizer, SynthesisResult};

/// Статус пакетного синтеза
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    /// Задание отменено; часть слотов результатов пуста
    Cancelled,
}

/// Субтитр, озвученный на исходном языке из-за ошибки перевода
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationFallback {
    pub cue_index: usize,
    pub reason: String,
}

/// Итог пакетного синтеза
#[derive(Debug)]
pub struct BatchOutcome {
    /// По одному слоту на субтитр, в порядке индексов
    pub results: Vec<Option<SynthesisResult>>,
    pub status: BatchStatus,
    pub translation_fallbacks: Vec<TranslationFallback>,
}

impl BatchOutcome {
    /// Сколько субтитров получили результат (успешный или нет)
    pub fn resolved(&self) -> usize {
        self.results.iter().filter(|slot| slot.is_some()).count()
    }

    /// Индексы и причины неудачных субтитров
    pub fn failures(&self) -> Vec<(usize, &str)> {
        self.results
            .iter()
            .flatten()
            .filter_map(|result| match result {
                SynthesisResult::Failed { cue_index, reason } => Some((*cue_index, reason.as_str())),
                SynthesisResult::Ok { .. } => None,
            })
            .collect()
    }
}

/// Общие для всех задач параметры
struct CueContext {
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    translate: bool,
    source_language: String,
    target_language: String,
    speech_language: String,
    timeout: Duration,
    cancel: CancellationToken,
}

/// Результат одной задачи
struct CueOutput {
    translated: Option<String>,
    fallback: Option<String>,
    /// `None`, если вызов прерван отменой
    result: Option<SynthesisResult>,
}

enum Interrupted {
    Cancelled,
    TimedOut,
}

/// Пакетный синтезатор
pub struct BatchSynthesizer {
    context: Arc<CueContext>,
    batch_size: usize,
}

impl BatchSynthesizer {
    pub fn new(
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: &DubConfig,
        cancel: CancellationToken,
    ) -> Self {
        let translate = config.needs_translation();
        // Без перевода озвучивается исходный язык, если он известен
        let speech_language = if !translate && config.source_language != "auto" {
            config.source_language.clone()
        } else {
            config.target_language.clone()
        };

        Self {
            context: Arc::new(CueContext {
                translator,
                synthesizer,
                translate,
                source_language: config.source_language.clone(),
                target_language: config.target_language.clone(),
                speech_language,
                timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
                cancel,
            }),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Перевести и озвучить все субтитры.
    ///
    /// `translated_text` субтитров заполняется по мере перевода. Отмена
    /// проверяется перед каждым пакетом; уже идущие вызовы прерываются по
    /// возможности.
    pub async fn run(&self, cues: &mut [Cue], progress: Option<&ProgressTracker>) -> BatchOutcome {
        let total = cues.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut results: Vec<Option<SynthesisResult>> = vec![None; total];
        let mut translation_fallbacks = Vec::new();
        let mut resolved = 0;

        progress::report(progress, Phase::Synthesis, 0, total, None);

        for (batch_no, start) in (0..total).step_by(self.batch_size).enumerate() {
            if self.context.cancel.is_cancelled() {
                log::info!("Cancellation requested, skipping batches {}..={}", batch_no + 1, batch_count);
                break;
            }

            let end = (start + self.batch_size).min(total);
            log::info!("Processing batch {}/{} (cues {}..{})", batch_no + 1, batch_count, start, end);

            let mut in_flight = FuturesUnordered::new();
            for slot in start..end {
                let cue = &cues[slot];
                let handle = tokio::spawn(process_cue(self.context.clone(), cue.index, cue.source_text.clone()));
                in_flight.push(async move { (slot, handle.await) });
            }

            while let Some((slot, joined)) = in_flight.next().await {
                let cue_index = cues[slot].index;
                let output = match joined {
                    Ok(output) => output,
                    Err(e) => {
                        log::error!("Synthesis task for cue {} failed: {}", cue_index, e);
                        CueOutput {
                            translated: None,
                            fallback: None,
                            result: Some(SynthesisResult::Failed {
                                cue_index,
                                reason: format!("task failed: {}", e),
                            }),
                        }
                    }
                };

                if let Some(text) = output.translated {
                    cues[slot].translated_text = text;
                }
                if let Some(reason) = output.fallback {
                    translation_fallbacks.push(TranslationFallback { cue_index, reason });
                }
                if let Some(result) = output.result {
                    results[slot] = Some(result);
                    resolved += 1;
                    progress::report(progress, Phase::Synthesis, resolved, total, None);
                }
            }
        }

        let status = if self.context.cancel.is_cancelled() {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Completed
        };
        translation_fallbacks.sort_by_key(|fallback| fallback.cue_index);

        log::info!("Synthesis finished: {}/{} cues resolved ({:?})", resolved, total, status);
        BatchOutcome {
            results,
            status,
            translation_fallbacks,
        }
    }
}

/// Вызов адаптера с таймаутом и отменой
async fn guarded<F: Future>(context: &CueContext, call: F) -> Result<F::Output, Interrupted> {
    tokio::select! {
        _ = context.cancel.cancelled() => Err(Interrupted::Cancelled),
        outcome = tokio::time::timeout(context.timeout, call) => outcome.map_err(|_| Interrupted::TimedOut),
    }
}

async fn process_cue(context: Arc<CueContext>, cue_index: usize, source_text: String) -> CueOutput {
    let cancelled = CueOutput {
        translated: None,
        fallback: None,
        result: None,
    };
    let failed = |reason: String| SynthesisResult::Failed { cue_index, reason };

    let text = prepare_text_for_tts(&source_text);
    if text.is_empty() {
        log::warn!("Cue {} has no speakable text", cue_index);
        return CueOutput {
            result: Some(failed("empty text".to_string())),
            ..cancelled
        };
    }

    let mut translated = None;
    let mut fallback = None;
    let speech = if context.translate {
        let call = context
            .translator
            .translate(&text, &context.source_language, &context.target_language);
        let translation = guarded(&context, call).await;
        match translation {
            Ok(Ok(result)) if !result.trim().is_empty() => {
                translated = Some(result.clone());
                result
            }
            Ok(Ok(_)) => {
                fallback = Some("empty translation".to_string());
                text
            }
            Ok(Err(e)) => {
                fallback = Some(e.to_string());
                text
            }
            Err(Interrupted::TimedOut) => {
                fallback = Some(format!("translation timed out after {}s", context.timeout.as_secs()));
                text
            }
            Err(Interrupted::Cancelled) => return cancelled,
        }
    } else {
        text
    };

    if let Some(reason) = &fallback {
        log::warn!("Translation failed for cue {}, using source text: {}", cue_index, reason);
    }

    let call = context.synthesizer.synthesize(&speech, &context.speech_language);
    let synthesis = guarded(&context, call).await;
    let result = match synthesis {
        Ok(Ok(clip)) if clip.samples.is_empty() => failed("synthesizer returned no audio".to_string()),
        Ok(Ok(clip)) => {
            log::debug!("Synthesized cue {} ({:.2}s)", cue_index, clip.duration().as_secs_f64());
            SynthesisResult::Ok { cue_index, clip }
        }
        Ok(Err(e)) => {
            log::warn!("Synthesis failed for cue {}: {}", cue_index, e);
            failed(e.to_string())
        }
        Err(Interrupted::TimedOut) => {
            let e = SynthesisError::Timeout(context.timeout.as_secs());
            log::warn!("Synthesis failed for cue {}: {}", cue_index, e);
            failed(e.to_string())
        }
        Err(Interrupted::Cancelled) => {
            return CueOutput {
                translated,
                fallback,
                result: None,
            }
        }
    };

    CueOutput {
        translated,
        fallback,
        result: Some(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslationError;
    use crate::media::audio::AudioClip;
    use crate::notification::CallbackProgressObserver;
    use crate::progress::{DefaultProgressReporter, ProgressReporter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UpperTranslator;

    #[async_trait]
    impl Translator for UpperTranslator {
        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, TranslationError> {
            if text.contains("untranslatable") {
                return Err(TranslationError::Network("offline".to_string()));
            }
            Ok(text.to_uppercase())
        }
    }

    /// Синтезатор: 100 семплов на символ, падает на тексте с "FAIL"
    struct CountingSynthesizer {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSynthesizer {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynthesizer {
        async fn synthesize(&self, text: &str, _lang: &str) -> Result<AudioClip, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if text.contains("FAIL") {
                return Err(SynthesisError::Quota("limit".to_string()));
            }
            Ok(AudioClip::new(vec![0.1; text.len() * 100], 8_000))
        }
    }

    fn cues(texts: &[&str]) -> Vec<Cue> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Cue::new(
                    i,
                    Duration::from_secs(i as u64 * 2),
                    Duration::from_secs(i as u64 * 2 + 1),
                    *text,
                )
            })
            .collect()
    }

    fn config(batch_size: usize) -> DubConfig {
        DubConfig {
            batch_size,
            source_language: "en".to_string(),
            target_language: "pt".to_string(),
            ..DubConfig::default()
        }
    }

    #[tokio::test]
    async fn test_translates_and_synthesizes_every_cue() {
        let synthesizer = Arc::new(CountingSynthesizer::new(Duration::ZERO));
        let batch = BatchSynthesizer::new(
            Arc::new(UpperTranslator),
            synthesizer.clone(),
            &config(2),
            CancellationToken::new(),
        );
        let mut cues = cues(&["one", ">> two", "three"]);

        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.resolved(), 3);
        assert_eq!(cues[1].translated_text, "TWO");
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 3);
        for (i, slot) in outcome.results.iter().enumerate() {
            assert_eq!(slot.as_ref().unwrap().cue_index(), i);
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let batch = BatchSynthesizer::new(
            Arc::new(UpperTranslator),
            Arc::new(CountingSynthesizer::new(Duration::ZERO)),
            &config(5),
            CancellationToken::new(),
        );
        let mut cues = cues(&["a", "b", "fail", "d", "e"]);

        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].0, 2);
        assert!(outcome.results.iter().flatten().filter(|r| r.is_ok()).count() == 4);
    }

    #[tokio::test]
    async fn test_translation_failure_falls_back_to_source_text() {
        let batch = BatchSynthesizer::new(
            Arc::new(UpperTranslator),
            Arc::new(CountingSynthesizer::new(Duration::ZERO)),
            &config(5),
            CancellationToken::new(),
        );
        let mut cues = cues(&["fine", "untranslatable"]);

        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(outcome.translation_fallbacks.len(), 1);
        assert_eq!(outcome.translation_fallbacks[0].cue_index, 1);
        assert!(cues[1].translated_text.is_empty());
        assert_eq!(cues[1].speech_text(), "untranslatable");
        assert!(outcome.results[1].as_ref().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_empty_text_fails_without_calling_adapters() {
        let synthesizer = Arc::new(CountingSynthesizer::new(Duration::ZERO));
        let batch = BatchSynthesizer::new(
            Arc::new(UpperTranslator),
            synthesizer.clone(),
            &config(5),
            CancellationToken::new(),
        );
        let mut cues = cues(&[">>", "<i></i>"]);

        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.failures(), vec![(0, "empty text"), (1, "empty text")]);
    }

    #[tokio::test]
    async fn test_timeout_is_a_per_cue_failure() {
        let config = DubConfig {
            request_timeout_secs: 1,
            ..config(5)
        };
        let batch = BatchSynthesizer::new(
            Arc::new(UpperTranslator),
            Arc::new(CountingSynthesizer::new(Duration::from_secs(5))),
            &config,
            CancellationToken::new(),
        );
        let mut cues = cues(&["slow"]);

        tokio::time::pause();
        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.failures(), vec![(0, "synthesis timed out after 1s")]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatching_batches() {
        let token = CancellationToken::new();
        let synthesizer = Arc::new(CountingSynthesizer::new(Duration::ZERO));
        let batch = BatchSynthesizer::new(Arc::new(UpperTranslator), synthesizer.clone(), &config(2), token.clone());

        let trigger = token.clone();
        let mut reporter = DefaultProgressReporter::new();
        reporter.add_observer(Box::new(CallbackProgressObserver::new(move |info| {
            if info.completed == 2 {
                trigger.cancel();
            }
        })));
        let tracker = ProgressTracker::with_reporter(Box::new(reporter));

        let mut cues = cues(&["a", "b", "c", "d", "e", "f"]);
        let outcome = batch.run(&mut cues, Some(&tracker)).await;

        assert_eq!(outcome.status, BatchStatus::Cancelled);
        assert_eq!(outcome.resolved(), 2);
        assert!(outcome.results[2..].iter().all(Option::is_none));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
    }

    /// Текст субтитра это его индекс; поздние субтитры готовы раньше ранних
    struct StaggeredSynthesizer {
        count: usize,
        finished: parking_lot::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for StaggeredSynthesizer {
        async fn synthesize(&self, text: &str, _lang: &str) -> Result<AudioClip, SynthesisError> {
            let index: usize = text.parse().map_err(|_| SynthesisError::EmptyText)?;
            tokio::time::sleep(Duration::from_millis(((self.count - index) * 40) as u64)).await;
            self.finished.lock().push(index);
            Ok(AudioClip::new(vec![index as f32; 10 + index], 8_000))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slots_follow_cue_order_not_completion_order() {
        let synthesizer = Arc::new(StaggeredSynthesizer {
            count: 5,
            finished: parking_lot::Mutex::new(Vec::new()),
        });
        let batch = BatchSynthesizer::new(
            Arc::new(crate::translate::NoopTranslator),
            synthesizer.clone(),
            &config(5),
            CancellationToken::new(),
        );
        let mut cues = cues(&["0", "1", "2", "3", "4"]);

        let outcome = batch.run(&mut cues, None).await;

        assert_eq!(*synthesizer.finished.lock(), vec![4, 3, 2, 1, 0]);
        for (i, slot) in outcome.results.iter().enumerate() {
            match slot {
                Some(SynthesisResult::Ok { cue_index, clip }) => {
                    assert_eq!(*cue_index, i);
                    assert_eq!(clip.samples.len(), 10 + i);
                    assert!(clip.samples.iter().all(|&s| s == i as f32));
                }
                other => panic!("slot {} holds {:?}", i, other),
            }
        }
    }
}
