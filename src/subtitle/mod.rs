//! Модуль для работы с субтитрами
//!
//! Содержит модель субтитра и парсеры SRT/WebVTT.

pub mod cue;
pub mod parser;

pub use cue::Cue;
pub use parser::{parse_srt, parse_subtitle_file, parse_vtt};
