//! Модуль для работы с аудио
//!
//! Декодирование ответов синтезатора (MP3/AAC через symphonia, WAV через hound),
//! приведение частоты дискретизации (rubato), запись итоговой дорожки в WAV
//! и простые операции над PCM-семплами.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use dasp::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{DubError, Result, SynthesisError};
use crate::subtitle::cue::samples_to_duration;

/// Длина sinc-фильтра ресемплера
const SINC_LEN: usize = 128;
/// Размер блока, подаваемого в ресемплер
const RESAMPLE_CHUNK: usize = 1024;

/// Синтезированный клип: моно PCM (f32) и его частота дискретизации
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Естественная длительность клипа
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Привести клип к нужной частоте дискретизации
    pub fn into_rate(self, sample_rate: u32) -> Result<AudioClip> {
        if self.sample_rate == sample_rate {
            return Ok(self);
        }
        let ratio = sample_rate as f64 / self.sample_rate as f64;
        log::debug!(
            "Resampling clip {} Hz -> {} Hz ({} samples)",
            self.sample_rate,
            sample_rate,
            self.samples.len()
        );
        let samples = resample(&self.samples, ratio)?;
        Ok(AudioClip::new(samples, sample_rate))
    }
}

/// Декодировать ответ синтезатора: WAV читается через hound, остальное через symphonia
pub fn decode_audio_bytes(data: Bytes) -> std::result::Result<AudioClip, SynthesisError> {
    if data.is_empty() {
        return Err(SynthesisError::Decode("empty audio payload".to_string()));
    }
    if data.starts_with(b"RIFF") {
        decode_wav_bytes(data)
    } else {
        decode_compressed(data)
    }
}

fn decode_wav_bytes(data: Bytes) -> std::result::Result<AudioClip, SynthesisError> {
    let reader = WavReader::new(Cursor::new(data)).map_err(|e| SynthesisError::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SynthesisError::Decode(e.to_string()))?,
        (SampleFormat::Int, 8) => reader
            .into_samples::<i8>()
            .map(|s| s.map(|v| v.to_sample::<f32>()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SynthesisError::Decode(e.to_string()))?,
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v.to_sample::<f32>()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SynthesisError::Decode(e.to_string()))?,
        (SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SynthesisError::Decode(e.to_string()))?
        }
    };

    Ok(AudioClip::new(downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_compressed(data: Bytes) -> std::result::Result<AudioClip, SynthesisError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SynthesisError::Decode(format!("unrecognized audio format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SynthesisError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SynthesisError::Decode(format!("no decoder: {}", e)))?;

    let mut pcm = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(SynthesisError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                pcm.extend(downmix(buffer.samples(), spec.channels.count()));
            }
            // Битый пакет пропускаем, остальные декодируем
            Err(SymphoniaError::DecodeError(e)) => log::warn!("Skipping undecodable packet: {}", e),
            Err(e) => return Err(SynthesisError::Decode(e.to_string())),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| SynthesisError::Decode("unknown sample rate".to_string()))?;
    log::debug!("Decoded {} samples at {} Hz", pcm.len(), sample_rate);
    Ok(AudioClip::new(pcm, sample_rate))
}

/// Сведение чередующихся каналов в моно
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Ресемплинг с коэффициентом `ratio` (выход/вход).
///
/// Длина результата всегда `round(len * ratio)`; задержка sinc-фильтра
/// компенсируется, хвост дописывается нулями при необходимости.
pub fn resample(input: &[f32], ratio: f64) -> Result<Vec<f32>> {
    let expected = (input.len() as f64 * ratio).round() as usize;
    if input.is_empty() || expected == 0 {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| DubError::AudioProcessing(format!("Failed to create resampler: {}", e)))?;

    let delay = ((SINC_LEN / 2) as f64 * ratio).round() as usize;

    // Входные данные дополняются нулями до целого числа блоков плюс
    // запас, чтобы вытолкнуть из фильтра задержанный хвост
    let flush = SINC_LEN + RESAMPLE_CHUNK;
    let padded_len = (input.len() + flush).div_ceil(RESAMPLE_CHUNK) * RESAMPLE_CHUNK;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(input);
    padded.resize(padded_len, 0.0);

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    for block in padded.chunks(RESAMPLE_CHUNK) {
        let frames = resampler
            .process(&[block], None)
            .map_err(|e| DubError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
    }

    let mut output: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    output.resize(expected, 0.0);
    Ok(output)
}

/// Буфер тишины заданной длины
pub fn silence(len: usize) -> Vec<f32> {
    vec![0.0; len]
}

/// Привести буфер к точной длине: обрезать или дополнить тишиной
pub fn fit_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

/// Применяет линейные fade in/out к фрагменту, не меняя его длину.
///
/// Если фрагмент короче двух fade, длительность fade уменьшается до четверти фрагмента.
pub fn apply_fade(samples: &mut [f32], fade_ms: u32, sample_rate: u32) {
    if samples.is_empty() || fade_ms == 0 {
        return;
    }

    let mut fade_samples = (fade_ms as u64 * sample_rate as u64 / 1000) as usize;
    if fade_samples * 2 >= samples.len() {
        fade_samples = samples.len() / 4;
    }
    if fade_samples == 0 {
        return;
    }

    let len = samples.len();
    for i in 0..fade_samples {
        let factor = i as f32 / fade_samples as f32;
        samples[i] *= factor;
        samples[len - 1 - i] *= factor;
    }
}

/// Вычисляет среднеквадратичное значение (RMS)
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Есть ли в буфере слышимый звук: RMS хотя бы одного окна 10 мс выше порога
pub fn has_audible_content(samples: &[f32], sample_rate: u32, threshold: f32) -> bool {
    let window = (sample_rate as usize / 100).max(1);
    samples.chunks(window).any(|chunk| compute_rms(chunk) > threshold)
}

/// Сохранить дорожку в WAV (моно, 32-bit float)
pub fn encode_wav<P: AsRef<Path>>(samples: &[f32], sample_rate: u32, output_path: P) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(output_path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::info!(
        "Saved WAV {} ({} samples, {} Hz)",
        output_path.as_ref().display(),
        samples.len(),
        sample_rate
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        (0..(seconds * sample_rate as f32) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Bytes {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    #[test]
    fn test_decode_wav_downmixes_stereo() {
        let data = wav_bytes(&[16384, 0, -16384, 0, 0, 0], 16_000, 2);
        let clip = decode_audio_bytes(data).unwrap();

        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), 3);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
        assert!((clip.samples[1] + 0.25).abs() < 1e-3);
        assert_eq!(clip.samples[2], 0.0);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_audio_bytes(Bytes::new()), Err(SynthesisError::Decode(_))));
        assert!(matches!(
            decode_audio_bytes(Bytes::from_static(b"definitely not audio")),
            Err(SynthesisError::Decode(_))
        ));
    }

    #[test]
    fn test_resample_length_is_exact() {
        let input = sine(220.0, 1.0, 22_050);
        let output = resample(&input, 24_000.0 / 22_050.0).unwrap();
        assert_eq!(output.len(), 24_000);

        let halved = resample(&input, 0.5).unwrap();
        assert_eq!(halved.len(), 11_025);
        assert!(resample(&[], 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_resample_preserves_level() {
        let input = sine(200.0, 0.5, 16_000);
        let output = resample(&input, 1.5).unwrap();
        let (rms_in, rms_out) = (compute_rms(&input), compute_rms(&output[2000..10000]));
        assert!((rms_in - rms_out).abs() < 0.05, "rms {} vs {}", rms_in, rms_out);
    }

    #[test]
    fn test_into_rate_is_noop_for_same_rate() {
        let clip = AudioClip::new(vec![0.1, 0.2], 24_000);
        assert_eq!(clip.clone().into_rate(24_000).unwrap(), clip);
    }

    #[test]
    fn test_apply_fade_keeps_length() {
        let mut samples = vec![1.0; 1000];
        apply_fade(&mut samples, 10, 10_000);

        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], 0.0);
        assert!(samples[999] < 0.05);
        assert_eq!(samples[500], 1.0);
    }

    #[test]
    fn test_audible_content_detection() {
        let sr = 8_000;
        assert!(!has_audible_content(&silence(800), sr, 0.01));
        assert!(has_audible_content(&sine(440.0, 0.1, sr), sr, 0.01));
        let mut quiet = vec![0.001; 800];
        quiet[400] = 0.002;
        assert!(!has_audible_content(&quiet, sr, 0.01));
    }

    #[test]
    fn test_wav_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        let samples = sine(440.0, 0.1, 8_000);
        encode_wav(&samples, 8_000, &path).unwrap();

        let data = Bytes::from(std::fs::read(&path).unwrap());
        let clip = decode_audio_bytes(data).unwrap();
        assert_eq!(clip.sample_rate, 8_000);
        assert_eq!(clip.samples, samples);
    }

    #[test]
    fn test_fit_length() {
        assert_eq!(fit_length(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(fit_length(vec![1.0], 3), vec![1.0, 0.0, 0.0]);
    }
}
