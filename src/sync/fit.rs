//! Подгонка клипа под окно субтитра
//!
//! Планирование ([`plan_fit`]) чистое и детерминированное: по целевой длине
//! окна `T` и естественной длине клипа `D` (обе в семплах) выбирается одно из
//! решений [`FitDecision`]. Рендеринг ([`render_fit`]) применяет решение к
//! семплам клипа.

use crate::config::StretchMethod;
use crate::error::Result;
use crate::media::{audio, stretch};

/// Решение о подгонке клипа
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitDecision {
    /// `D <= T`: клип дополняется тишиной до `T`
    Pad { silence: usize },
    /// `T < D <= T * max_stretch_ratio`: темп ускоряется в `factor = D / T` раз
    Compress { factor: f64 },
    /// `D > T * max_stretch_ratio`: клип выходит за окно на `excess` семплов
    Overrun { excess: usize },
    /// Окно нулевой длины (`end <= start`): клип выводится как есть
    Anomaly,
}

/// План подгонки одного клипа
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPlan {
    pub decision: FitDecision,
    /// Длина окна субтитра `T`
    pub target_len: usize,
    /// Естественная длина клипа `D`
    pub natural_len: usize,
    /// Длина, которую сегмент займет на дорожке
    pub rendered_len: usize,
}

impl FitPlan {
    /// На сколько семплов сегмент сдвигает последующие (`rendered - T`)
    pub fn drift(&self) -> i64 {
        self.rendered_len as i64 - self.target_len as i64
    }
}

/// Выбрать способ подгонки
pub fn plan_fit(target_len: usize, natural_len: usize, max_stretch_ratio: f64) -> FitPlan {
    let decision = if target_len == 0 {
        FitDecision::Anomaly
    } else if natural_len <= target_len {
        FitDecision::Pad { silence: target_len - natural_len }
    } else if natural_len as f64 <= target_len as f64 * max_stretch_ratio {
        FitDecision::Compress { factor: natural_len as f64 / target_len as f64 }
    } else {
        FitDecision::Overrun { excess: natural_len - target_len }
    };

    let rendered_len = match decision {
        FitDecision::Pad { .. } | FitDecision::Compress { .. } => target_len,
        FitDecision::Overrun { .. } | FitDecision::Anomaly => natural_len,
    };

    FitPlan {
        decision,
        target_len,
        natural_len,
        rendered_len,
    }
}

/// Параметры рендеринга
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub method: StretchMethod,
    pub fade_ms: u32,
}

/// Применить план к семплам клипа. Длина результата всегда `plan.rendered_len`.
pub fn render_fit(plan: &FitPlan, clip: &[f32], options: &RenderOptions) -> Result<Vec<f32>> {
    let mut speech = match plan.decision {
        FitDecision::Compress { factor } => {
            log::debug!("Compressing clip by {:.3}x ({} -> {} samples)", factor, plan.natural_len, plan.target_len);
            stretch::stretch_to_length(clip, plan.target_len, options.sample_rate, options.method)?
        }
        FitDecision::Pad { .. } | FitDecision::Overrun { .. } | FitDecision::Anomaly => clip.to_vec(),
    };

    // Fade только на речевой части, чтобы не было щелчков на стыках
    audio::apply_fade(&mut speech, options.fade_ms, options.sample_rate);

    Ok(audio::fit_length(speech, plan.rendered_len))
}
