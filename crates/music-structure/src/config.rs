//! Analysis configuration with file and environment loading.
//!
//! Environment variables:
//! - `MUSIC_STRUCTURE_KEY_STRATEGY`: `profile`, `loudness` or `windowed`
//! - `MUSIC_STRUCTURE_FIT_THRESHOLD`: metre fit above which the file's own grid is used
//! - `MUSIC_STRUCTURE_CHORDS`: set to "false" or "0" to skip chord analysis
//! - `MUSIC_STRUCTURE_TRANSPOSE`: target tone, e.g. `C` or `Eb`
//!
//! Default file: `<config dir>/music-structure/config.toml`

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use midi_timeline::Tone;

use crate::metre::tactus::TactusParams;
use crate::{Error, Result};

const ENV_KEY_STRATEGY: &str = "MUSIC_STRUCTURE_KEY_STRATEGY";
const ENV_FIT_THRESHOLD: &str = "MUSIC_STRUCTURE_FIT_THRESHOLD";
const ENV_CHORDS: &str = "MUSIC_STRUCTURE_CHORDS";
const ENV_TRANSPOSE: &str = "MUSIC_STRUCTURE_TRANSPOSE";

/// Which optional passes run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub sustain: bool,
    pub pitch_bends: bool,
    /// Split bent notes into plain notes and drop the bends.
    pub discretize_bends: bool,
    pub instruments: bool,
    pub chords: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            sustain: true,
            pitch_bends: true,
            discretize_bends: false,
            instruments: true,
            chords: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetreConfig {
    /// The file's own grid is used when its fit is above this.
    pub fit_threshold: f64,
    pub tactus: TactusParams,
}

impl Default for MetreConfig {
    fn default() -> Self {
        Self {
            fit_threshold: 0.4,
            tactus: TactusParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Occurrence-weighted histogram over the whole piece.
    #[default]
    Profile,
    /// Loudness-weighted histogram over the whole piece.
    Loudness,
    /// Pitch classes counted once per time window.
    Windowed,
}

impl std::str::FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "profile" => Ok(Self::Profile),
            "loudness" => Ok(Self::Loudness),
            "windowed" => Ok(Self::Windowed),
            other => Err(format!("unknown key strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub strategy: KeyStrategy,
    /// Prefer a declared key signature over detection.
    pub trust_key_signatures: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            strategy: KeyStrategy::Profile,
            trust_key_signatures: true,
        }
    }
}

/// Everything [`crate::StructureEngine`] can be tuned with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub stages: StageConfig,
    pub metre: MetreConfig,
    pub key: KeyConfig,
    /// Transpose the analyzed piece so its key sits on this tone.
    pub transpose_to: Option<Tone>,
}

impl AnalysisConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load the `[analysis]` section of a TOML file. A file without one
    /// yields the defaults.
    ///
    /// ```toml
    /// [analysis]
    /// transpose_to = "C"
    ///
    /// [analysis.key]
    /// strategy = "windowed"
    ///
    /// [analysis.metre.tactus]
    /// pip_ms = 30
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match table.get("analysis") {
            Some(section) => section
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| Error::ConfigParse {
                    path: path.to_path_buf(),
                    message: format!("[analysis]: {e}"),
                }),
            None => Ok(Self::default()),
        }
    }

    /// Applies `MUSIC_STRUCTURE_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|var| env::var(var).ok())
    }

    /// Applies overrides from any variable source.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let invalid = |var: &str, message: String| Error::ConfigEnv {
            var: var.to_string(),
            message,
        };

        if let Some(value) = lookup(ENV_KEY_STRATEGY) {
            self.key.strategy = value.parse().map_err(|e| invalid(ENV_KEY_STRATEGY, e))?;
        }
        if let Some(value) = lookup(ENV_FIT_THRESHOLD) {
            self.metre.fit_threshold = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid(ENV_FIT_THRESHOLD, e.to_string()))?;
        }
        if let Some(value) = lookup(ENV_CHORDS) {
            self.stages.chords = !matches!(value.trim().to_lowercase().as_str(), "false" | "0" | "no");
        }
        if let Some(value) = lookup(ENV_TRANSPOSE) {
            let tone: Tone = value
                .trim()
                .parse()
                .map_err(|e: midi_timeline::Error| invalid(ENV_TRANSPOSE, e.to_string()))?;
            self.transpose_to = Some(tone);
        }
        Ok(self)
    }
}

/// `<config dir>/music-structure/config.toml`, when a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("music-structure/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert!(config.stages.sustain);
        assert!(!config.stages.discretize_bends);
        assert_eq!(config.metre.fit_threshold, 0.4);
        assert_eq!(config.metre.tactus.pip_ms, 35);
        assert_eq!(config.key.strategy, KeyStrategy::Profile);
        assert!(config.key.trust_key_signatures);
        assert_eq!(config.transpose_to, None);
    }

    #[test]
    fn test_from_file_partial_section() {
        let file = write_config(
            r#"
[other]
name = "ignored"

[analysis]
transpose_to = "D"

[analysis.stages]
chords = false

[analysis.key]
strategy = "windowed"

[analysis.metre.tactus]
pip_ms = 30
"#,
        );
        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.transpose_to, Some(Tone::D));
        assert!(!config.stages.chords);
        assert!(config.stages.sustain);
        assert_eq!(config.key.strategy, KeyStrategy::Windowed);
        assert_eq!(config.metre.tactus.pip_ms, 30);
        assert_eq!(config.metre.tactus.tactus_min_ms, 400.0);
    }

    #[test]
    fn test_from_file_without_section() {
        let file = write_config("[other]\nvalue = 1\n");
        assert_eq!(
            AnalysisConfig::from_file(file.path()).unwrap(),
            AnalysisConfig::default()
        );
    }

    #[test]
    fn test_from_file_errors() {
        let missing = AnalysisConfig::from_file(Path::new("/nonexistent/music-structure.toml"));
        assert!(matches!(missing, Err(Error::ConfigRead { .. })));

        let broken = write_config("[analysis\n");
        assert!(matches!(
            AnalysisConfig::from_file(broken.path()),
            Err(Error::ConfigParse { .. })
        ));

        let wrong_type = write_config("[analysis.metre]\nfit_threshold = \"high\"\n");
        assert!(matches!(
            AnalysisConfig::from_file(wrong_type.path()),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_KEY_STRATEGY, "Loudness"),
            (ENV_FIT_THRESHOLD, "0.6"),
            (ENV_CHORDS, "0"),
            (ENV_TRANSPOSE, "Eb"),
        ]
        .into_iter()
        .collect();
        let config = AnalysisConfig::default()
            .with_overrides(|var| vars.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.key.strategy, KeyStrategy::Loudness);
        assert_eq!(config.metre.fit_threshold, 0.6);
        assert!(!config.stages.chords);
        assert_eq!(config.transpose_to, Some(Tone::DSharp));
    }

    #[test]
    fn test_bad_override_names_the_variable() {
        let result = AnalysisConfig::default().with_overrides(|var| {
            (var == ENV_FIT_THRESHOLD).then(|| "lots".to_string())
        });
        match result {
            Err(Error::ConfigEnv { var, .. }) => assert_eq!(var, ENV_FIT_THRESHOLD),
            other => panic!("expected ConfigEnv, got {other:?}"),
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut config = AnalysisConfig::default();
        config.key.strategy = KeyStrategy::Windowed;
        config.transpose_to = Some(Tone::A);
        let json = serde_json::to_string(&config).unwrap();
        let restored: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
