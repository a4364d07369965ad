//! Модуль для парсинга субтитров
//!
//! Поддерживаются SRT и WebVTT. Блоки, которые не удалось разобрать,
//! пропускаются с предупреждением в логе; задание при этом не прерывается.

use std::path::Path;
use std::time::Duration;
use crate::error::{DubError, Result};
use crate::subtitle::cue::Cue;

/// Разобрать файл субтитров, выбрав формат по расширению
pub fn parse_subtitle_file<P: AsRef<Path>>(path: P) -> Result<Vec<Cue>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| DubError::FileNotFound(format!("Failed to open subtitle file {}: {}", path.display(), e)))?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let cues = match extension.as_str() {
        "srt" => parse_srt(&content),
        "vtt" => parse_vtt(&content)?,
        other => {
            return Err(DubError::SubtitleParsing(format!(
                "Unsupported subtitle format '{}' for {}",
                other,
                path.display()
            )))
        }
    };

    log::info!("Parsed {} cues from {}", cues.len(), path.display());
    Ok(cues)
}

/// Парсинг содержимого SRT
pub fn parse_srt(content: &str) -> Vec<Cue> {
    collect_cues(split_blocks(strip_bom(content)))
}

/// Парсинг содержимого WebVTT
pub fn parse_vtt(content: &str) -> Result<Vec<Cue>> {
    let content = strip_bom(content);
    let mut blocks = split_blocks(content);

    // Проверяем заголовок WebVTT
    match blocks.first() {
        Some(header) if header.first().is_some_and(|line| line.trim_start().starts_with("WEBVTT")) => {
            blocks.remove(0);
        }
        _ => {
            return Err(DubError::SubtitleParsing(
                "Invalid VTT file format: missing WEBVTT header".to_string(),
            ))
        }
    }

    // NOTE/STYLE/REGION блоки не содержат реплик
    blocks.retain(|block| {
        !block.first().is_some_and(|line| {
            let line = line.trim_start();
            line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION")
        })
    });

    Ok(collect_cues(blocks))
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Разобрать блоки, отсортировать по времени начала и пронумеровать
fn collect_cues(blocks: Vec<Vec<&str>>) -> Vec<Cue> {
    let mut parsed = Vec::with_capacity(blocks.len());

    for (block_number, block) in blocks.iter().enumerate() {
        match parse_cue_block(block) {
            Some((start, end, text)) => {
                if end <= start {
                    log::warn!(
                        "Subtitle block {} ends before it starts ({:?} -> {:?}); it will get a zero-length slot",
                        block_number + 1,
                        start,
                        end
                    );
                }
                parsed.push((start, end, text));
            }
            None => log::warn!(
                "Skipping malformed subtitle block {}: {:?}",
                block_number + 1,
                block.first().copied().unwrap_or_default()
            ),
        }
    }

    // Стабильная сортировка: при равном начале сохраняется порядок в файле
    parsed.sort_by_key(|(start, _, _)| *start);

    parsed
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, text))| Cue::new(index, start, end, text))
        .collect()
}

/// Парсинг блока субтитра
fn parse_cue_block(lines: &[&str]) -> Option<(Duration, Duration, String)> {
    // Ищем строку с временными метками
    let timing_position = lines.iter().position(|line| line.contains("-->"))?;
    let (left, right) = lines[timing_position].split_once("-->")?;

    let start = parse_time_str(left.trim())?;
    // В VTT после времени окончания могут идти настройки отображения
    let end = parse_time_str(right.split_whitespace().next()?)?;

    // Собираем текст субтитра
    let text = lines[timing_position + 1..]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join(" ");

    if text.is_empty() {
        return None;
    }

    Some((start, end, text))
}

/// Парсинг строки времени в формате HH:MM:SS,mmm (SRT) или [HH:]MM:SS.mmm (VTT)
fn parse_time_str(time_str: &str) -> Option<Duration> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    let (hours, minutes, seconds_part) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };

    let (seconds_str, fraction_str) = match seconds_part.split_once([',', '.']) {
        Some((seconds, fraction)) => (seconds, Some(fraction)),
        None => (seconds_part, None),
    };
    let seconds = seconds_str.parse::<u64>().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    // Доли секунды точнее миллисекунд отбрасываются
    let milliseconds = match fraction_str {
        Some(ms_str) if !ms_str.is_empty() && ms_str.len() <= 9 && ms_str.chars().all(|c| c.is_ascii_digit()) => {
            let digits = &ms_str[..ms_str.len().min(3)];
            let ms = digits.parse::<u64>().ok()?;
            match digits.len() {
                1 => ms * 100,
                2 => ms * 10,
                _ => ms,
            }
        }
        Some(_) => return None,
        None => 0,
    };

    let total = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000)?
        .checked_add(seconds * 1000)?
        .checked_add(milliseconds)?;
    Some(Duration::from_millis(total))
}
