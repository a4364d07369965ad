//! Модуль для работы с FFmpeg
//!
//! Длительность видео берется из ffprobe (`format=duration`), замена звука
//! делается ffmpeg с копированием видеопотока и кодированием звука в AAC.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{DubError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Внешний инструмент для работы с медиафайлами
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Длительность видео. Ошибка фатальна для задания.
    async fn probe_duration(&self, video: &Path) -> Result<Duration>;

    /// Заменить аудио в видео на `audio`, сохранив видеопоток без перекодирования
    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<PathBuf>;
}

/// Реализация через бинарники ffmpeg/ffprobe
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTool {
    /// Найти ffmpeg и ffprobe в PATH
    pub fn locate() -> Result<Self> {
        let find = |name: &str| {
            which::which(name).map_err(|e| {
                log::error!("Failed to locate {} executable: {}", name, e);
                DubError::Configuration(format!("{} not found in PATH: {}", name, e))
            })
        };
        let ffmpeg = find("ffmpeg")?;
        let ffprobe = find("ffprobe")?;
        log::info!("Using ffmpeg from path: {}", ffmpeg.display());
        log::info!("Using ffprobe from path: {}", ffprobe.display());
        Ok(Self { ffmpeg, ffprobe })
    }

    pub fn with_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_duration(&self, video: &Path) -> Result<Duration> {
        if !video.exists() {
            return Err(DubError::MediaProbe(format!("video not found: {}", video.display())));
        }

        let started = Instant::now();
        let child = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(video)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match timeout(PROBE_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(DubError::MediaProbe(format!("failed to run ffprobe: {}", e))),
            Err(_) => {
                log::error!("ffprobe timed out after {}s", PROBE_TIMEOUT.as_secs());
                return Err(DubError::MediaProbe("ffprobe timed out".to_string()));
            }
        };
        log::debug!("ffprobe completed in {:?}", started.elapsed());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("ffprobe failed with status {}: {}", output.status, stderr.trim());
            return Err(DubError::MediaProbe(format!("ffprobe exited with {}: {}", output.status, stderr.trim())));
        }

        let duration = parse_duration_output(&String::from_utf8_lossy(&output.stdout))?;
        log::info!("Video duration: {:.3}s", duration.as_secs_f64());
        Ok(duration)
    }

    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<PathBuf> {
        let mux_error = |message: String| DubError::Mux {
            message,
            audio_path: audio.to_path_buf(),
        };

        log::info!("Muxing {} into {}", audio.display(), output.display());
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| mux_error(format!("failed to run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            log::error!("ffmpeg failed with status {}", result.status);
            return Err(mux_error(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        Ok(output.to_path_buf())
    }
}

/// Разобрать вывод ffprobe (секунды в виде числа)
pub fn parse_duration_output(raw: &str) -> Result<Duration> {
    let value = raw.trim();
    let seconds: f64 = value
        .parse()
        .map_err(|_| DubError::MediaProbe(format!("unexpected ffprobe output: {:?}", value)))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(DubError::MediaProbe(format!("invalid video duration: {}", value)));
    }
    Ok(Duration::from_secs_f64(seconds))
}
