//! Изменение темпа аудио
//!
//! WSOLA (waveform-similarity overlap-add) меняет длительность, сохраняя высоту
//! тона: каждый следующий кадр берется из окрестности номинальной позиции так,
//! чтобы он лучше всего совпадал с естественным продолжением предыдущего.
//! Вариант [`StretchMethod::Resample`] просто пересчитывает частоту, поэтому
//! вместе с темпом меняется и тон.

use crate::config::StretchMethod;
use crate::error::Result;
use crate::media::audio;

/// Длина кадра WSOLA, мс
const FRAME_MS: usize = 20;
/// Радиус поиска наилучшего совпадения, мс
const SEARCH_MS: usize = 5;

/// Изменить длину клипа до `target_len` семплов выбранным методом.
///
/// Результат всегда ровно `target_len` семплов.
pub fn stretch_to_length(
    input: &[f32],
    target_len: usize,
    sample_rate: u32,
    method: StretchMethod,
) -> Result<Vec<f32>> {
    if input.is_empty() || target_len == 0 {
        return Ok(audio::silence(target_len));
    }
    if input.len() == target_len {
        return Ok(input.to_vec());
    }

    // > 1.0 означает ускорение
    let tempo = input.len() as f64 / target_len as f64;
    let stretched = match method {
        StretchMethod::Wsola => wsola(input, tempo, sample_rate)?,
        StretchMethod::Resample => audio::resample(input, 1.0 / tempo)?,
    };

    Ok(audio::fit_length(stretched, target_len))
}

/// Изменение темпа методом WSOLA
pub fn wsola(input: &[f32], tempo: f64, sample_rate: u32) -> Result<Vec<f32>> {
    let frame_len = (sample_rate as usize * FRAME_MS / 1000).max(4);
    let overlap = frame_len / 2;
    let search = sample_rate as usize * SEARCH_MS / 1000;
    let output_len = (input.len() as f64 / tempo).round() as usize;

    if input.len() < frame_len || output_len == 0 {
        // Слишком короткий фрагмент для кадрирования
        return audio::resample(input, 1.0 / tempo);
    }

    let window = hann(frame_len);
    let mut output = vec![0.0f32; output_len + frame_len];
    let mut norm = vec![0.0f32; output_len + frame_len];

    // Вход дополняется нулями, чтобы кадры у границ не выходили за буфер
    let mut padded = Vec::with_capacity(input.len() + 2 * (frame_len + search));
    padded.extend(std::iter::repeat(0.0).take(search));
    padded.extend_from_slice(input);
    padded.extend(std::iter::repeat(0.0).take(frame_len + search + overlap));
    let max_start = padded.len() - frame_len;

    let mut previous: Option<usize> = None;
    let mut out_pos = 0;
    while out_pos < output_len {
        let nominal = search + (out_pos as f64 * tempo).round() as usize;
        let nominal = nominal.min(max_start);

        let chosen = match previous {
            None => nominal,
            Some(prev) => {
                // Естественное продолжение предыдущего кадра
                let natural = (prev + overlap).min(max_start);
                let reference = &padded[natural..natural + overlap];
                let from = nominal.saturating_sub(search);
                let to = (nominal + search).min(max_start);
                best_match(&padded, reference, from, to).unwrap_or(nominal)
            }
        };

        for i in 0..frame_len {
            output[out_pos + i] += padded[chosen + i] * window[i];
            norm[out_pos + i] += window[i];
        }

        previous = Some(chosen);
        out_pos += overlap;
    }

    output.truncate(output_len);
    for (sample, weight) in output.iter_mut().zip(norm.iter()) {
        if *weight > 1e-3 {
            *sample /= *weight;
        }
    }
    Ok(output)
}

/// Позиция в `[from, to]` с максимальной взаимной корреляцией с `reference`
fn best_match(signal: &[f32], reference: &[f32], from: usize, to: usize) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for candidate in from..=to {
        let Some(segment) = signal.get(candidate..candidate + reference.len()) else {
            break;
        };
        let score: f32 = segment.iter().zip(reference).map(|(a, b)| a * b).sum();
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }
    best.map(|(position, _)| position)
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos())
        .collect()
}
