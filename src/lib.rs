//! Основной файл библиотеки subdub
//!
//! Замена звуковой дорожки видео речью, синтезированной по (переведенным)
//! субтитрам. Каждая реплика укладывается в окно своего субтитра: короткие
//! дополняются тишиной, длинные ускоряются, а не поместившиеся сдвигают
//! последующие реплики, и этот сдвиг накапливается как drift.

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod notification;
pub mod progress;
pub mod subtitle;
pub mod sync;
pub mod translate;
pub mod tts;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DubConfig, SynthesizerKind};
use crate::error::Result;
use crate::media::{audio, FfmpegTool, MediaTool};
use crate::progress::{Phase, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::sync::{AssemblyConfig, SegmentFit, TrackAdjustment};
use crate::translate::{GoogleTranslator, NoopTranslator, Translator};
use crate::tts::{
    BatchStatus, BatchSynthesizer, GoogleTtsSynthesizer, OpenAiSynthesizer, SpeechSynthesizer, SynthesisResult,
};

pub use crate::config::StretchMethod;
pub use crate::error::DubError;
pub use crate::tts::TranslationFallback;

/// Имя итогового видео
pub const VIDEO_OUTPUT_NAME: &str = "video_with_translated_audio.mp4";

/// Субтитр, вместо которого на дорожке тишина
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueFailure {
    pub cue_index: usize,
    pub reason: String,
}

/// Итог успешно завершенного задания
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cue_count: usize,
    pub failed_cues: Vec<CueFailure>,
    pub translation_fallbacks: Vec<TranslationFallback>,
    /// Субтитры с окном нулевой длины
    pub anomalies: Vec<usize>,
    /// Субтитры, чей клип вышел за окно
    pub overruns: Vec<usize>,
    pub total_drift: Duration,
    pub adjustment: TrackAdjustment,
    pub audio_path: PathBuf,
    pub video_path: PathBuf,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Job {} finished in {:.1}s", self.job_id, self.elapsed().as_secs_f64())?;
        writeln!(f, "  cues:        {}", self.cue_count)?;
        writeln!(f, "  failed:      {}", self.failed_cues.len())?;
        for failure in &self.failed_cues {
            writeln!(f, "    #{}: {}", failure.cue_index, failure.reason)?;
        }
        writeln!(f, "  untranslated: {}", self.translation_fallbacks.len())?;
        for fallback in &self.translation_fallbacks {
            writeln!(f, "    #{}: {}", fallback.cue_index, fallback.reason)?;
        }
        if !self.anomalies.is_empty() {
            writeln!(f, "  anomalies:   {:?}", self.anomalies)?;
        }
        if !self.overruns.is_empty() {
            writeln!(f, "  overruns:    {:?}", self.overruns)?;
        }
        writeln!(f, "  drift:       {:.3}s", self.total_drift.as_secs_f64())?;
        match self.adjustment {
            TrackAdjustment::Exact => writeln!(f, "  length:      exact")?,
            TrackAdjustment::Padded { samples } => writeln!(f, "  length:      padded {} samples", samples)?,
            TrackAdjustment::Truncated { samples, lost_speech } => writeln!(
                f,
                "  length:      truncated {} samples{}",
                samples,
                if lost_speech { " (speech lost)" } else { "" }
            )?,
        }
        writeln!(f, "  audio:       {}", self.audio_path.display())?;
        write!(f, "  video:       {}", self.video_path.display())
    }
}

impl JobReport {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// Итог отмененного задания
#[derive(Debug, Clone)]
pub struct CancelledReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cancelled_at: DateTime<Utc>,
    pub cue_count: usize,
    /// Результаты, полученные до отмены, в порядке индексов субтитров
    pub results: Vec<SynthesisResult>,
    pub translation_fallbacks: Vec<TranslationFallback>,
}

impl CancelledReport {
    fn new(
        job_id: Uuid,
        started_at: DateTime<Utc>,
        cue_count: usize,
        results: impl IntoIterator<Item = SynthesisResult>,
        translation_fallbacks: Vec<TranslationFallback>,
    ) -> Self {
        Self {
            job_id,
            started_at,
            cancelled_at: Utc::now(),
            cue_count,
            results: results.into_iter().collect(),
            translation_fallbacks,
        }
    }

    /// Сколько субтитров успели получить результат
    pub fn resolved(&self) -> usize {
        self.results.len()
    }

    /// Индексы субтитров с результатом (успешным или нет)
    pub fn completed(&self) -> Vec<usize> {
        self.results.iter().map(SynthesisResult::cue_index).collect()
    }

    pub fn failed_cues(&self) -> Vec<CueFailure> {
        self.results
            .iter()
            .filter_map(|result| match result {
                SynthesisResult::Failed { cue_index, reason } => Some(CueFailure {
                    cue_index: *cue_index,
                    reason: reason.clone(),
                }),
                SynthesisResult::Ok { .. } => None,
            })
            .collect()
    }
}

impl fmt::Display for CancelledReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {} cancelled after {}/{} cues; no output written",
            self.job_id,
            self.resolved(),
            self.cue_count
        )?;
        for failure in self.failed_cues() {
            write!(f, "\n    #{}: {}", failure.cue_index, failure.reason)?;
        }
        Ok(())
    }
}

/// Результат задания. Фатальные ошибки возвращаются как `Err`.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(JobReport),
    Cancelled(CancelledReport),
}

impl JobOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Основная структура: одно задание дубляжа
pub struct Dubber {
    config: DubConfig,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaTool>,
    progress_tracker: Option<ProgressTracker>,
}

impl Dubber {
    pub fn new(
        config: DubConfig,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaTool>,
    ) -> Self {
        Self {
            config,
            translator,
            synthesizer,
            media,
            progress_tracker: None,
        }
    }

    /// Собрать задание с адаптерами, выбранными конфигурацией
    pub fn from_config(config: DubConfig) -> Result<Self> {
        config.validate()?;

        let translator: Arc<dyn Translator> = if config.needs_translation() {
            Arc::new(GoogleTranslator::new())
        } else {
            Arc::new(NoopTranslator)
        };
        let synthesizer: Arc<dyn SpeechSynthesizer> = match config.synthesizer {
            SynthesizerKind::Google => Arc::new(GoogleTtsSynthesizer::new()),
            SynthesizerKind::OpenAi => Arc::new(OpenAiSynthesizer::new(&config)?),
        };
        let media = Arc::new(FfmpegTool::locate()?);

        Ok(Self::new(config, translator, synthesizer, media))
    }

    /// Установить репортер прогресса
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress_tracker = Some(ProgressTracker::with_reporter(reporter));
        self
    }

    /// Добавить наблюдателя прогресса; `None`, если репортер не установлен
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> Option<usize> {
        self.progress_tracker.as_mut().and_then(|t| t.add_observer(observer))
    }

    pub fn config(&self) -> &DubConfig {
        &self.config
    }

    /// Каталог результатов: из конфигурации или каталог видео
    pub fn output_dir(&self, video: &Path) -> PathBuf {
        match &self.config.output_directory {
            Some(dir) => dir.clone(),
            None => video.parent().map(Path::to_path_buf).unwrap_or_default(),
        }
    }

    pub fn audio_output_path(&self, video: &Path) -> PathBuf {
        self.output_dir(video)
            .join(format!("audio_{}_sync.wav", self.config.target_language))
    }

    pub fn video_output_path(&self, video: &Path) -> PathBuf {
        self.output_dir(video).join(VIDEO_OUTPUT_NAME)
    }

    /// Выполнить задание.
    ///
    /// Отмена через `token` дает `Ok(JobOutcome::Cancelled)` и ничего не
    /// записывает. Ошибки чтения видео и сборки итогового файла фатальны.
    pub async fn run(&self, video: &Path, subtitles: &Path, token: CancellationToken) -> Result<JobOutcome> {
        self.config.validate()?;

        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let tracker = self.progress_tracker.as_ref();
        log::info!("Starting job {} for {}", job_id, video.display());

        progress::report(tracker, Phase::Parsing, 0, 2, Some("Probing video".to_string()));
        let video_duration = self.media.probe_duration(video).await?;

        let mut cues = subtitle::parse_subtitle_file(subtitles)?;
        progress::report(tracker, Phase::Parsing, 2, 2, Some(format!("{} cues", cues.len())));
        if cues.is_empty() {
            log::warn!("No cues found in {}; the track will be silent", subtitles.display());
        }

        let cancelled = |report: CancelledReport| -> Result<JobOutcome> {
            log::info!("Job {} cancelled with {}/{} cues resolved", job_id, report.resolved(), report.cue_count);
            Ok(JobOutcome::Cancelled(report))
        };

        if token.is_cancelled() {
            return cancelled(CancelledReport::new(job_id, started_at, cues.len(), Vec::new(), Vec::new()));
        }

        let batch = BatchSynthesizer::new(
            self.translator.clone(),
            self.synthesizer.clone(),
            &self.config,
            token.clone(),
        );
        let outcome = batch.run(&mut cues, tracker).await;
        if outcome.status == BatchStatus::Cancelled || token.is_cancelled() {
            return cancelled(CancelledReport::new(
                job_id,
                started_at,
                cues.len(),
                outcome.results.into_iter().flatten(),
                outcome.translation_fallbacks,
            ));
        }

        if self.config.keep_intermediate_audio {
            self.dump_clips(&outcome.results, &self.output_dir(video).join("segments"))
                .await;
        }

        let translation_fallbacks = outcome.translation_fallbacks;
        let results = outcome.results;
        let timeline = sync::assemble(&cues, &results, &AssemblyConfig::from_config(&self.config), tracker)?;

        let failed_cues: Vec<CueFailure> = timeline
            .segments
            .iter()
            .filter_map(|segment| match &segment.fit {
                SegmentFit::Silence { reason } => Some(CueFailure {
                    cue_index: segment.cue_index,
                    reason: reason.clone(),
                }),
                SegmentFit::Fitted(_) => None,
            })
            .collect();
        let anomalies = timeline.anomalies();
        let overruns = timeline.overruns();
        let total_drift = timeline.drift_duration();

        if token.is_cancelled() {
            return cancelled(CancelledReport::new(
                job_id,
                started_at,
                cues.len(),
                results.into_iter().flatten(),
                translation_fallbacks,
            ));
        }
        drop(results);

        progress::report(tracker, Phase::Finalizing, 0, 1, None);
        let finalized = sync::finalize(timeline.into_track(), video_duration, self.config.silence_threshold);
        progress::report(tracker, Phase::Finalizing, 1, 1, None);

        // WAV пишется во временный каталог задания и переносится целиком
        let workspace = tempfile::Builder::new().prefix("subdub-").tempdir()?;
        let audio_path = self.audio_output_path(video);
        let staged = workspace.path().join("track.wav");
        let track = finalized.track;
        let staged_path = staged.clone();
        tokio::task::spawn_blocking(move || audio::encode_wav(&track.samples, track.sample_rate, &staged_path))
            .await
            .map_err(|e| DubError::Other(format!("WAV writer task failed: {}", e)))??;
        if let Some(dir) = audio_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        if tokio::fs::rename(&staged, &audio_path).await.is_err() {
            tokio::fs::copy(&staged, &audio_path).await?;
        }

        progress::report(tracker, Phase::Muxing, 0, 1, None);
        let video_path = self
            .media
            .replace_audio(video, &audio_path, &self.video_output_path(video))
            .await?;
        progress::report(tracker, Phase::Muxing, 1, 1, Some(video_path.display().to_string()));

        let report = JobReport {
            job_id,
            started_at,
            finished_at: Utc::now(),
            cue_count: cues.len(),
            failed_cues,
            translation_fallbacks,
            anomalies,
            overruns,
            total_drift,
            adjustment: finalized.adjustment,
            audio_path,
            video_path,
        };
        log::info!(
            "Job {} completed: {} failed cues, drift {:.3}s",
            job_id,
            report.failed_cues.len(),
            total_drift.as_secs_f64()
        );
        Ok(JobOutcome::Completed(report))
    }

    /// Сохранить клипы отдельных субтитров в `dir`. Ошибки только логируются.
    async fn dump_clips(&self, results: &[Option<SynthesisResult>], dir: &Path) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            log::warn!("Could not create {}: {}", dir.display(), e);
            return;
        }
        for result in results.iter().flatten() {
            if let SynthesisResult::Ok { cue_index, clip } = result {
                let cue_index = *cue_index;
                let clip = clip.clone();
                let path = dir.join(format!("segment_{}.wav", cue_index));
                let written =
                    tokio::task::spawn_blocking(move || audio::encode_wav(&clip.samples, clip.sample_rate, &path)).await;
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("Could not save clip for cue {}: {}", cue_index, e),
                    Err(e) => log::warn!("Clip writer for cue {} failed: {}", cue_index, e),
                }
            }
        }
        log::info!("Intermediate clips saved to {}", dir.display());
    }
}

/// Дубляж видео с адаптерами по умолчанию
pub async fn dub_video(video: &Path, subtitles: &Path, config: DubConfig) -> Result<JobOutcome> {
    Dubber::from_config(config)?
        .run(video, subtitles, CancellationToken::new())
        .await
}
