//! music-structure - beat grid, key and chords of a MIDI file as JSON
//!
//! Config is read from `--config`, else from the default config file when it
//! exists; `MUSIC_STRUCTURE_*` variables and flags override it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use midi_timeline::Tone;
use music_structure::config::default_config_path;
use music_structure::{AnalysisConfig, KeyStrategy, StructureEngine};

#[derive(Parser)]
#[command(name = "music-structure")]
#[command(about = "Analyze beats, key and chords of a standard MIDI file")]
#[command(version)]
struct Cli {
    /// Standard MIDI file to analyze
    file: PathBuf,

    /// TOML config file with an [analysis] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip chord analysis
    #[arg(long)]
    no_chords: bool,

    /// Transpose so the key sits on this tone (e.g. C, F#, Bb)
    #[arg(long, value_name = "TONE")]
    transpose: Option<Tone>,

    /// Key strategy: profile, loudness or windowed
    #[arg(long)]
    key_strategy: Option<KeyStrategy>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
}

fn load_config(cli: &Cli) -> Result<AnalysisConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));

    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            AnalysisConfig::from_file(&path)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("applying environment overrides")?;

    if cli.no_chords {
        config.stages.chords = false;
    }
    if let Some(tone) = cli.transpose {
        config.transpose_to = Some(tone);
    }
    if let Some(strategy) = cli.key_strategy {
        config.key.strategy = strategy;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let bytes = std::fs::read(&cli.file)
        .with_context(|| format!("reading MIDI file {}", cli.file.display()))?;

    let engine = StructureEngine::new(config);
    let (_, report) = engine
        .analyze_bytes(&bytes)
        .with_context(|| format!("analyzing {}", cli.file.display()))?;
    info!(
        beats = report.beats.len(),
        notes = report.note_count,
        "analysis complete"
    );

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}
