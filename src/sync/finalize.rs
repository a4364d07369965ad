//! Выравнивание длины дорожки по длительности видео

use std::time::Duration;

use crate::media::audio;
use crate::subtitle::cue::{duration_to_samples, samples_to_duration};
use crate::sync::timeline::Track;

/// Что пришлось сделать с длиной дорожки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackAdjustment {
    Exact,
    /// Дорожка короче видео: дописана тишина
    Padded { samples: usize },
    /// Дорожка длиннее видео: хвост отброшен
    Truncated { samples: usize, lost_speech: bool },
}

/// Дорожка ровно по длине видео
#[derive(Debug, Clone)]
pub struct FinalizedTrack {
    pub track: Track,
    pub adjustment: TrackAdjustment,
}

/// Привести дорожку к длительности видео. Никогда не завершается ошибкой.
///
/// При обрезке хвост проверяется на наличие речи: RMS окон по 10 мс
/// сравнивается с `silence_threshold`.
pub fn finalize(track: Track, video_duration: Duration, silence_threshold: f32) -> FinalizedTrack {
    let sample_rate = track.sample_rate;
    let target = duration_to_samples(video_duration, sample_rate);
    let mut samples = track.samples;
    let len = samples.len();

    let adjustment = if len > target {
        let lost_speech = audio::has_audible_content(&samples[target..], sample_rate, silence_threshold);
        let excess = len - target;
        if lost_speech {
            log::warn!(
                "Track exceeds video by {:.3}s; truncation drops audible speech",
                samples_to_duration(excess, sample_rate).as_secs_f64()
            );
        } else {
            log::info!("Trimming {} trailing silent samples", excess);
        }
        samples.truncate(target);
        TrackAdjustment::Truncated {
            samples: excess,
            lost_speech,
        }
    } else if len < target {
        let missing = target - len;
        log::debug!("Padding track with {} samples of silence", missing);
        samples = audio::fit_length(samples, target);
        TrackAdjustment::Padded { samples: missing }
    } else {
        TrackAdjustment::Exact
    };

    FinalizedTrack {
        track: Track::new(samples, sample_rate),
        adjustment,
    }
}
