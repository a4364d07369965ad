//! Сборка дорожки из подогнанных клипов
//!
//! Субтитры обрабатываются строго по индексу. Курсор показывает конец уже
//! собранной дорожки, `drift` накапливает, насколько речь отстает от
//! расписания субтитров из-за клипов, не поместившихся в свое окно:
//!
//! 1. если `start + drift` позже курсора, промежуток заполняется тишиной;
//! 2. клип подгоняется ([`plan_fit`]) или заменяется тишиной длины окна;
//! 3. сегмент ставится в позицию курсора, курсор сдвигается на его длину;
//! 4. `drift += rendered - T`.

use std::time::Duration;

use crate::config::DubConfig;
use crate::error::Result;
use crate::media::audio;
use crate::progress::{self, Phase, ProgressTracker};
use crate::subtitle::cue::{duration_to_samples, samples_to_duration, Cue};
use crate::sync::fit::{plan_fit, render_fit, FitDecision, FitPlan, RenderOptions};
use crate::tts::SynthesisResult;

/// Как сегмент попал на дорожку
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentFit {
    /// Клип подогнан по плану
    Fitted(FitPlan),
    /// Вместо клипа тишина длины окна
    Silence { reason: String },
}

/// Сегмент, размещенный на дорожке
#[derive(Debug, Clone)]
pub struct FittedSegment {
    pub cue_index: usize,
    /// Позиция начала на дорожке, в семплах
    pub placed_start: usize,
    /// Позиция конца (не включительно)
    pub placed_end: usize,
    pub samples: Vec<f32>,
    pub fit: SegmentFit,
}

impl FittedSegment {
    pub fn len(&self) -> usize {
        self.placed_end - self.placed_start
    }

    pub fn is_empty(&self) -> bool {
        self.placed_end == self.placed_start
    }
}

/// Итоговая аудиодорожка (моно)
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Track {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Параметры сборки
#[derive(Debug, Clone, Copy)]
pub struct AssemblyConfig {
    pub max_stretch_ratio: f64,
    pub render: RenderOptions,
}

impl AssemblyConfig {
    pub fn from_config(config: &DubConfig) -> Self {
        Self {
            max_stretch_ratio: config.max_stretch_ratio,
            render: RenderOptions {
                sample_rate: config.sample_rate,
                method: config.stretch_method,
                fade_ms: config.fade_ms,
            },
        }
    }
}

/// Собранная последовательность сегментов
#[derive(Debug, Clone)]
pub struct Timeline {
    pub segments: Vec<FittedSegment>,
    /// Накопленное отставание, в семплах
    pub drift: i64,
    /// Конец дорожки, в семплах
    pub cursor: usize,
    pub sample_rate: u32,
}

impl Timeline {
    fn new(sample_rate: u32) -> Self {
        Self {
            segments: Vec::new(),
            drift: 0,
            cursor: 0,
            sample_rate,
        }
    }

    fn append(&mut self, cue_index: usize, target_len: usize, samples: Vec<f32>, fit: SegmentFit) {
        let len = samples.len();
        self.segments.push(FittedSegment {
            cue_index,
            placed_start: self.cursor,
            placed_end: self.cursor + len,
            samples,
            fit,
        });
        self.cursor += len;
        self.drift += len as i64 - target_len as i64;
    }

    /// Индексы субтитров с окном нулевой длины
    pub fn anomalies(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| matches!(s.fit, SegmentFit::Fitted(FitPlan { decision: FitDecision::Anomaly, .. })))
            .map(|s| s.cue_index)
            .collect()
    }

    /// Индексы субтитров, чей клип вышел за окно
    pub fn overruns(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| matches!(s.fit, SegmentFit::Fitted(FitPlan { decision: FitDecision::Overrun { .. }, .. })))
            .map(|s| s.cue_index)
            .collect()
    }

    /// Накопленное отставание как длительность
    pub fn drift_duration(&self) -> Duration {
        samples_to_duration(self.drift.max(0) as usize, self.sample_rate)
    }

    /// Склеить сегменты в дорожку, заполняя промежутки тишиной
    pub fn into_track(self) -> Track {
        let mut samples = audio::silence(self.cursor);
        for segment in self.segments {
            samples[segment.placed_start..segment.placed_end].copy_from_slice(&segment.samples);
        }
        Track::new(samples, self.sample_rate)
    }
}

/// Собрать дорожку из результатов синтеза.
///
/// `results` адресуется позицией субтитра в `cues`; пустой слот или
/// [`SynthesisResult::Failed`] дают тишину длины окна.
pub fn assemble(
    cues: &[Cue],
    results: &[Option<SynthesisResult>],
    config: &AssemblyConfig,
    progress: Option<&ProgressTracker>,
) -> Result<Timeline> {
    let sample_rate = config.render.sample_rate;
    let total = cues.len();
    let mut timeline = Timeline::new(sample_rate);
    let mut results = results.iter();

    for (position, cue) in cues.iter().enumerate() {
        let start = duration_to_samples(cue.start, sample_rate);
        let end = duration_to_samples(cue.end, sample_rate);
        let target_len = if cue.is_malformed() { 0 } else { end.saturating_sub(start) };

        let scheduled = start as i64 + timeline.drift;
        if scheduled > timeline.cursor as i64 {
            let gap = scheduled as usize - timeline.cursor;
            timeline.cursor += gap;
        }

        let (samples, fit) = match results.next().and_then(Option::as_ref) {
            Some(SynthesisResult::Ok { clip, .. }) => match render_clip(clip, target_len, config) {
                Ok((samples, plan)) => (samples, SegmentFit::Fitted(plan)),
                Err(e) => {
                    log::warn!("Could not fit clip for cue {}: {}", cue.index, e);
                    (audio::silence(target_len), SegmentFit::Silence { reason: e.to_string() })
                }
            },
            Some(SynthesisResult::Failed { reason, .. }) => {
                (audio::silence(target_len), SegmentFit::Silence { reason: reason.clone() })
            }
            None => (
                audio::silence(target_len),
                SegmentFit::Silence {
                    reason: "no synthesis result".to_string(),
                },
            ),
        };

        if let SegmentFit::Fitted(plan) = &fit {
            match plan.decision {
                FitDecision::Overrun { excess } => log::warn!(
                    "Cue {} overruns its window by {:.3}s",
                    cue.index,
                    samples_to_duration(excess, sample_rate).as_secs_f64()
                ),
                FitDecision::Anomaly => log::warn!("Cue {} has an empty window, placed at natural length", cue.index),
                FitDecision::Pad { .. } | FitDecision::Compress { .. } => {}
            }
        }

        timeline.append(cue.index, target_len, samples, fit);
        progress::report(progress, Phase::Assembly, position + 1, total, None);
    }

    log::info!(
        "Assembled {} segments, track length {:.3}s, drift {:.3}s",
        timeline.segments.len(),
        samples_to_duration(timeline.cursor, sample_rate).as_secs_f64(),
        timeline.drift_duration().as_secs_f64()
    );
    Ok(timeline)
}

fn render_clip(
    clip: &audio::AudioClip,
    target_len: usize,
    config: &AssemblyConfig,
) -> Result<(Vec<f32>, FitPlan)> {
    let converted;
    let samples = if clip.sample_rate == config.render.sample_rate {
        &clip.samples
    } else {
        converted = clip.clone().into_rate(config.render.sample_rate)?;
        &converted.samples
    };
    let plan = plan_fit(target_len, samples.len(), config.max_stretch_ratio);
    let rendered = render_fit(&plan, samples, &config.render)?;
    Ok((rendered, plan))
}
