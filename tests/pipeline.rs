use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use subdub::config::DubConfig;
use subdub::error::{DubError, SynthesisError};
use subdub::media::{AudioClip, MediaTool};
use subdub::notification::CallbackProgressObserver;
use subdub::progress::{DefaultProgressReporter, Phase, ProgressReporter};
use subdub::sync::TrackAdjustment;
use subdub::translate::NoopTranslator;
use subdub::tts::{SpeechSynthesizer, SynthesisResult};
use subdub::{Dubber, JobOutcome};

const SR: u32 = 24_000;

/// Клип фиксированной длины для каждого текста; "fail" дает ошибку
struct StubSynthesizer {
    durations: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl StubSynthesizer {
    fn new(durations: &[(&str, f64)]) -> Self {
        Self {
            durations: durations.iter().map(|(t, d)| (t.to_string(), *d)).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn synthesize(&self, text: &str, _lang: &str) -> Result<AudioClip, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == "fail" {
            return Err(SynthesisError::Network("connection reset".to_string()));
        }
        let seconds = self.durations.get(text).copied().unwrap_or(1.0);
        let len = (seconds * SR as f64).round() as usize;
        let samples = (0..len)
            .map(|i| (2.0 * PI * 220.0 * i as f32 / SR as f32).sin() * 0.3)
            .collect();
        Ok(AudioClip::new(samples, SR))
    }
}

struct StubMedia {
    duration: Duration,
    fail_probe: bool,
    fail_mux: bool,
    muxed: AtomicUsize,
}

impl StubMedia {
    fn new(seconds: f64) -> Self {
        Self {
            duration: Duration::from_secs_f64(seconds),
            fail_probe: false,
            fail_mux: false,
            muxed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaTool for StubMedia {
    async fn probe_duration(&self, _video: &Path) -> subdub::error::Result<Duration> {
        if self.fail_probe {
            return Err(DubError::MediaProbe("no duration".to_string()));
        }
        Ok(self.duration)
    }

    async fn replace_audio(&self, _video: &Path, audio: &Path, output: &Path) -> subdub::error::Result<PathBuf> {
        if self.fail_mux {
            return Err(DubError::Mux {
                message: "encoder missing".to_string(),
                audio_path: audio.to_path_buf(),
            });
        }
        self.muxed.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(audio, output).await?;
        Ok(output.to_path_buf())
    }
}

fn timestamp(seconds: f64) -> String {
    let ms = (seconds * 1000.0).round() as u64;
    format!("{:02}:{:02}:{:02},{:03}", ms / 3_600_000, ms / 60_000 % 60, ms / 1000 % 60, ms % 1000)
}

/// Каталог с пустым "видео" и SRT из `(start, end, text)`
fn fixture(cues: &[(f64, f64, &str)]) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("input.mp4");
    std::fs::write(&video, b"").unwrap();

    let srt: String = cues
        .iter()
        .enumerate()
        .map(|(i, (start, end, text))| format!("{}\n{} --> {}\n{}\n\n", i + 1, timestamp(*start), timestamp(*end), text))
        .collect();
    let subtitles = dir.path().join("input.srt");
    std::fs::write(&subtitles, srt).unwrap();

    (dir, video, subtitles)
}

fn config(output: &Path) -> DubConfig {
    DubConfig {
        translate: false,
        output_directory: Some(output.to_path_buf()),
        ..DubConfig::default()
    }
}

fn read_wav(path: &Path) -> Vec<f32> {
    hound::WavReader::open(path)
        .unwrap()
        .into_samples::<f32>()
        .map(|s| s.unwrap())
        .collect()
}

fn seconds(s: f64) -> usize {
    (s * SR as f64).round() as usize
}

#[tokio::test]
async fn two_cue_scenario_pads_then_compresses() {
    let (dir, video, subtitles) = fixture(&[(0.0, 2.0, "a"), (2.0, 5.0, "b")]);
    let synthesizer = Arc::new(StubSynthesizer::new(&[("a", 1.5), ("b", 4.0)]));
    let dubber = Dubber::new(
        config(dir.path()),
        Arc::new(NoopTranslator),
        synthesizer,
        Arc::new(StubMedia::new(6.0)),
    );

    let outcome = dubber.run(&video, &subtitles, CancellationToken::new()).await.unwrap();
    let report = match outcome {
        JobOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(report.cue_count, 2);
    assert!(report.failed_cues.is_empty());
    assert!(report.overruns.is_empty());
    assert_eq!(report.total_drift, Duration::ZERO);
    assert_eq!(report.adjustment, TrackAdjustment::Padded { samples: seconds(1.0) });
    assert_eq!(report.audio_path, dir.path().join("audio_pt_sync.wav"));

    let samples = read_wav(&report.audio_path);
    assert_eq!(samples.len(), seconds(6.0));
    // Окно cue0 дополнено тишиной после 1.5 с
    assert!(samples[seconds(1.5)..seconds(2.0)].iter().all(|&s| s == 0.0));
    // Сжатая cue1 занимает окно до 5.0 с, дальше только тишина
    assert!(samples[seconds(4.5)..seconds(4.9)].iter().any(|&s| s.abs() > 0.05));
    assert!(samples[seconds(5.0)..].iter().all(|&s| s == 0.0));
    assert!(report.video_path.exists());
}

#[tokio::test]
async fn rerun_produces_identical_track() {
    let cues = [(0.5, 2.0, "one"), (2.0, 3.0, "two"), (3.0, 3.5, "three")];
    let durations = [("one", 1.2), ("two", 1.4), ("three", 1.1)];
    let (dir, video, subtitles) = fixture(&cues);

    let mut tracks = Vec::new();
    for run in 0..2 {
        let output = dir.path().join(format!("run{}", run));
        let dubber = Dubber::new(
            config(&output),
            Arc::new(NoopTranslator),
            Arc::new(StubSynthesizer::new(&durations)),
            Arc::new(StubMedia::new(5.0)),
        );
        match dubber.run(&video, &subtitles, CancellationToken::new()).await.unwrap() {
            JobOutcome::Completed(report) => tracks.push(std::fs::read(&report.audio_path).unwrap()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(tracks[0], tracks[1]);
}

#[tokio::test]
async fn failing_cue_becomes_silence_in_its_window() {
    let cues = [
        (0.0, 1.5, "a"),
        (2.0, 3.5, "b"),
        (4.0, 5.5, "fail"),
        (6.0, 7.5, "d"),
        (8.0, 9.5, "e"),
    ];
    let (dir, video, subtitles) = fixture(&cues);
    let dubber = Dubber::new(
        config(dir.path()),
        Arc::new(NoopTranslator),
        Arc::new(StubSynthesizer::new(&[])),
        Arc::new(StubMedia::new(10.0)),
    );

    let report = match dubber.run(&video, &subtitles, CancellationToken::new()).await.unwrap() {
        JobOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(report.failed_cues.len(), 1);
    assert_eq!(report.failed_cues[0].cue_index, 2);
    assert!(report.to_string().contains("#2"));

    let samples = read_wav(&report.audio_path);
    assert_eq!(samples.len(), seconds(10.0));
    assert!(samples[seconds(4.0)..seconds(5.5)].iter().all(|&s| s == 0.0));
    for start in [0.0, 2.0, 6.0, 8.0] {
        let window = &samples[seconds(start + 0.2)..seconds(start + 0.8)];
        assert!(window.iter().any(|&s| s.abs() > 0.05), "cue at {}s is silent", start);
    }
}

#[tokio::test]
async fn cancellation_after_first_batch_writes_nothing() {
    let cues: Vec<(f64, f64, &str)> = (0..6).map(|i| (i as f64 * 2.0, i as f64 * 2.0 + 1.5, "x")).collect();
    let (dir, video, subtitles) = fixture(&cues);
    let token = CancellationToken::new();

    let trigger = token.clone();
    let mut reporter = DefaultProgressReporter::new();
    reporter.add_observer(Box::new(CallbackProgressObserver::new(move |info| {
        if info.phase == Phase::Synthesis && info.completed == 2 {
            trigger.cancel();
        }
    })));

    let synthesizer = Arc::new(StubSynthesizer::new(&[]));
    let media = Arc::new(StubMedia::new(12.0));
    let dubber = Dubber::new(
        DubConfig {
            batch_size: 2,
            ..config(dir.path())
        },
        Arc::new(NoopTranslator),
        synthesizer.clone(),
        media.clone(),
    )
    .with_progress_reporter(Box::new(reporter));

    let outcome = dubber.run(&video, &subtitles, token).await.unwrap();

    match outcome {
        JobOutcome::Cancelled(report) => {
            assert_eq!(report.cue_count, 6);
            assert_eq!(report.resolved(), 2);
            assert_eq!(report.completed(), vec![0, 1]);
            assert!(report.results.iter().all(SynthesisResult::is_ok));
            assert!(report.failed_cues().is_empty());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(media.muxed.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("audio_pt_sync.wav").exists());
    assert!(!dir.path().join("video_with_translated_audio.mp4").exists());
}

/// Текст это индекс субтитра: поздние субтитры готовы первыми, уровень
/// сигнала в клипе равен `0.1 * (index + 1)`
struct StaggeredSynthesizer {
    count: usize,
    finished: parking_lot::Mutex<Vec<usize>>,
}

#[async_trait]
impl SpeechSynthesizer for StaggeredSynthesizer {
    async fn synthesize(&self, text: &str, _lang: &str) -> Result<AudioClip, SynthesisError> {
        let index: usize = text.parse().map_err(|_| SynthesisError::EmptyText)?;
        tokio::time::sleep(Duration::from_millis(((self.count - index) * 40) as u64)).await;
        self.finished.lock().push(index);
        let level = 0.1 * (index + 1) as f32;
        Ok(AudioClip::new(vec![level; seconds(0.5)], SR))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn track_follows_cue_order_when_later_cues_finish_first() {
    let cues: Vec<(f64, f64, String)> = (0..5)
        .map(|i| (i as f64 * 2.0, i as f64 * 2.0 + 1.5, i.to_string()))
        .collect();
    let cue_refs: Vec<(f64, f64, &str)> = cues.iter().map(|(s, e, t)| (*s, *e, t.as_str())).collect();
    let (dir, video, subtitles) = fixture(&cue_refs);
    let synthesizer = Arc::new(StaggeredSynthesizer {
        count: 5,
        finished: parking_lot::Mutex::new(Vec::new()),
    });
    let dubber = Dubber::new(
        DubConfig {
            batch_size: 5,
            ..config(dir.path())
        },
        Arc::new(NoopTranslator),
        synthesizer.clone(),
        Arc::new(StubMedia::new(10.0)),
    );

    let report = match dubber.run(&video, &subtitles, CancellationToken::new()).await.unwrap() {
        JobOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(*synthesizer.finished.lock(), vec![4, 3, 2, 1, 0]);
    assert!(report.failed_cues.is_empty());
    assert_eq!(report.total_drift, Duration::ZERO);

    let samples = read_wav(&report.audio_path);
    for i in 0..5 {
        let start = i as f64 * 2.0;
        let expected = 0.1 * (i + 1) as f32;
        let middle = &samples[seconds(start + 0.1)..seconds(start + 0.4)];
        assert!(
            middle.iter().all(|&s| (s - expected).abs() < 1e-6),
            "cue {} window does not carry its own clip",
            i
        );
        assert!(samples[seconds(start + 0.5)..seconds(start + 1.5)].iter().all(|&s| s == 0.0));
    }
}

#[tokio::test]
async fn intermediate_clips_are_saved_per_cue() {
    let (dir, video, subtitles) = fixture(&[(0.0, 1.0, "a"), (1.0, 2.0, "fail"), (2.0, 3.0, "c")]);
    let dubber = Dubber::new(
        DubConfig {
            keep_intermediate_audio: true,
            ..config(dir.path())
        },
        Arc::new(NoopTranslator),
        Arc::new(StubSynthesizer::new(&[("a", 0.5), ("c", 0.75)])),
        Arc::new(StubMedia::new(3.0)),
    );

    let outcome = dubber.run(&video, &subtitles, CancellationToken::new()).await.unwrap();
    assert!(!outcome.is_cancelled());

    let segments = dir.path().join("segments");
    assert_eq!(read_wav(&segments.join("segment_0.wav")).len(), seconds(0.5));
    assert!(!segments.join("segment_1.wav").exists());
    assert_eq!(read_wav(&segments.join("segment_2.wav")).len(), seconds(0.75));
}

#[tokio::test]
async fn probe_failure_is_fatal() {
    let (dir, video, subtitles) = fixture(&[(0.0, 1.0, "a")]);
    let synthesizer = Arc::new(StubSynthesizer::new(&[]));
    let media = StubMedia {
        fail_probe: true,
        ..StubMedia::new(1.0)
    };
    let dubber = Dubber::new(config(dir.path()), Arc::new(NoopTranslator), synthesizer.clone(), Arc::new(media));

    let result = dubber.run(&video, &subtitles, CancellationToken::new()).await;

    assert!(matches!(result, Err(DubError::MediaProbe(_))));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mux_failure_keeps_the_track() {
    let (dir, video, subtitles) = fixture(&[(0.0, 1.0, "a")]);
    let media = StubMedia {
        fail_mux: true,
        ..StubMedia::new(1.0)
    };
    let dubber = Dubber::new(
        config(dir.path()),
        Arc::new(NoopTranslator),
        Arc::new(StubSynthesizer::new(&[("a", 0.5)])),
        Arc::new(media),
    );

    match dubber.run(&video, &subtitles, CancellationToken::new()).await {
        Err(DubError::Mux { audio_path, .. }) => {
            assert!(audio_path.exists());
            assert_eq!(read_wav(&audio_path).len(), SR as usize);
        }
        other => panic!("unexpected result {:?}", other),
    }
}
