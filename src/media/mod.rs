//! Модуль для работы с медиафайлами
//!
//! Декодирование и кодирование аудио, изменение темпа и вызовы FFmpeg.

pub mod audio;
pub mod ffmpeg;
pub mod stretch;

pub use audio::AudioClip;
pub use ffmpeg::{FfmpegTool, MediaTool};
