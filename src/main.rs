use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use subdub::config::{DubConfig, SynthesizerKind};
use subdub::notification::ConsoleProgressObserver;
use subdub::progress::{AsyncProgressReporter, ProgressReporter};
use subdub::{logger, Dubber, JobOutcome};

/// Replace a video's voice track with speech synthesized from its subtitles
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory with the video and its subtitles
    dir: PathBuf,

    /// Video file (defaults to the first *.mp4 in DIR)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Subtitle file (defaults to the first *.srt or *.vtt in DIR)
    #[arg(long)]
    subtitles: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cues synthesized concurrently
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Source language ("auto" to detect)
    #[arg(long)]
    source: Option<String>,

    /// Target language
    #[arg(short, long)]
    target: Option<String>,

    /// Maximum tempo-up factor before a clip overruns its cue
    #[arg(long)]
    max_stretch: Option<f64>,

    /// Where to write results (defaults to the video's directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Speech engine
    #[arg(long, value_enum)]
    engine: Option<Engine>,

    /// Hide progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    Google,
    Openai,
}

impl From<Engine> for SynthesizerKind {
    fn from(engine: Engine) -> Self {
        match engine {
            Engine::Google => SynthesizerKind::Google,
            Engine::Openai => SynthesizerKind::OpenAi,
        }
    }
}

impl Cli {
    fn build_config(&self) -> Result<DubConfig> {
        let mut config = match &self.config {
            Some(path) => DubConfig::from_json_file(path)?,
            None => DubConfig::default(),
        };

        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(source) = &self.source {
            config.source_language = source.clone();
        }
        if let Some(target) = &self.target {
            config.target_language = target.clone();
        }
        if let Some(ratio) = self.max_stretch {
            config.max_stretch_ratio = ratio;
        }
        if let Some(dir) = &self.output_dir {
            config.output_directory = Some(dir.clone());
        }
        if let Some(engine) = self.engine {
            config.synthesizer = engine.into();
        }

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Первый файл в каталоге (без рекурсии) с одним из расширений
fn find_first(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

async fn run(cli: Cli) -> Result<i32> {
    let config = cli.build_config()?;

    let video = match &cli.video {
        Some(path) => path.clone(),
        None => find_first(&cli.dir, &["mp4"]).ok_or_else(|| anyhow!("no .mp4 file in {}", cli.dir.display()))?,
    };
    let subtitles = match &cli.subtitles {
        Some(path) => path.clone(),
        None => find_first(&cli.dir, &["srt", "vtt"])
            .ok_or_else(|| anyhow!("no .srt or .vtt file in {}", cli.dir.display()))?,
    };
    log::info!("Video: {}", video.display());
    log::info!("Subtitles: {}", subtitles.display());

    let mut dubber = Dubber::from_config(config).context("failed to set up the job")?;
    let mut handler = None;
    if !cli.quiet {
        let (mut reporter, _rx) = AsyncProgressReporter::new();
        reporter.add_observer(Box::new(ConsoleProgressObserver::new()));
        handler = Some(reporter.start_handler());
        dubber = dubber.with_progress_reporter(Box::new(reporter));
    }

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling...");
            ctrl_c_token.cancel();
        }
    });

    let outcome = dubber.run(&video, &subtitles, token).await;
    // Репортер закрывает канал, обработчик дочитывает очередь и завершается
    drop(dubber);
    if let Some(handler) = handler {
        if let Err(e) = handler.await {
            log::debug!("Progress handler stopped abnormally: {}", e);
        }
    }

    match outcome? {
        JobOutcome::Completed(report) => {
            println!("{}", report);
            Ok(0)
        }
        JobOutcome::Cancelled(report) => {
            eprintln!("{}", report);
            Ok(130)
        }
    }
}

#[tokio::main]
async fn main() {
    logger::init_logger();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
