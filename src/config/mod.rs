use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generative-text models known to work with the script generator
const KNOWN_TEXT_MODELS: &[&str] = &[
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro-latest",
    "gemini-2.0-flash",
    "gemini-2.5-flash",
    "gemini-2.5-pro",
];

/// Fallback text models (Claude-style API)
const KNOWN_FALLBACK_MODELS: &[&str] = &[
    "claude-3-haiku-20240307",
    "claude-3-sonnet-20240229",
    "claude-3-opus-20240229",
    "claude-3-5-haiku-20241022",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider credentials and model selection
    pub providers: ProviderConfig,

    /// Script and pipeline tuning
    pub generation: GenerationConfig,

    /// Stock-media filtering
    pub media: MediaConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for the primary generative-text backend
    pub gemini_api_key: String,

    /// Optional API key for the fallback text backend
    pub claude_api_key: Option<String>,

    /// API key for the stock-media provider
    pub pexels_api_key: String,

    /// Model identifier for the primary text backend
    pub text_model: String,

    /// Model identifier for the fallback text backend
    pub fallback_text_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Average narration rate used to size segments
    pub words_per_minute: u32,

    /// Target words of narration per body segment
    pub words_per_segment: u32,

    /// Fraction of degraded segments above which a run fails (0.0 - 1.0)
    pub max_degraded_fraction: f64,

    /// Use the fallback text backend when the primary is exhausted
    pub enable_fallback: bool,

    /// Ask the text backend to sharpen media search terms before fetching
    pub enhance_search_terms: bool,

    /// Prefer a stock video clip over images for the intro segment
    pub intro_video: bool,

    /// Rotate narration voices across segments
    pub multi_speaker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Minimum acceptable asset width in pixels
    pub min_width: u32,

    /// Minimum acceptable asset height in pixels
    pub min_height: u32,

    /// How many assets to attach per segment
    pub assets_per_segment: usize,

    /// Background music sources, one picked at random per run
    pub background_music: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working directory override for temporary media files
    pub temp_dir: Option<PathBuf>,

    /// Keep the working directory after the run (debugging aid)
    pub keep_workdir: bool,

    /// Per-attempt timeout for external calls in seconds
    pub request_timeout_secs: u64,

    /// Maximum attempts per external call before fallback
    pub max_attempts: u32,

    /// Duration of silent placeholder narration for degraded segments
    pub placeholder_narration_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: ProviderConfig {
                gemini_api_key: "".to_string(),
                claude_api_key: None,
                pexels_api_key: "".to_string(),
                text_model: "gemini-1.5-flash-latest".to_string(),
                fallback_text_model: "claude-3-haiku-20240307".to_string(),
            },
            generation: GenerationConfig {
                words_per_minute: 150,
                words_per_segment: 75,
                max_degraded_fraction: 0.5,
                enable_fallback: true,
                enhance_search_terms: false,
                intro_video: false,
                multi_speaker: false,
            },
            media: MediaConfig {
                min_width: 640,
                min_height: 360,
                assets_per_segment: 6,
                background_music: Vec::new(),
            },
            app: AppConfig {
                temp_dir: None,
                keep_workdir: false,
                request_timeout_secs: 30,
                max_attempts: 3,
                placeholder_narration_secs: 1.5,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate().map_err(|e| anyhow::anyhow!(e))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("tubeforge").join("config.yaml"))
    }

    /// Validate configuration before a run starts
    ///
    /// Unknown model identifiers fail here rather than silently substituting
    /// a different model at request time.
    pub fn validate(&self) -> crate::Result<()> {
        if self.providers.pexels_api_key.trim().is_empty() {
            return Err(crate::VideoError::Configuration(
                "Stock-media API key must be configured (providers.pexels_api_key)".to_string(),
            ));
        }

        if !KNOWN_TEXT_MODELS.contains(&self.providers.text_model.as_str()) {
            return Err(crate::VideoError::Configuration(format!(
                "Unknown text model '{}'. Supported: {}",
                self.providers.text_model,
                KNOWN_TEXT_MODELS.join(", ")
            )));
        }

        if !KNOWN_FALLBACK_MODELS.contains(&self.providers.fallback_text_model.as_str()) {
            return Err(crate::VideoError::Configuration(format!(
                "Unknown fallback text model '{}'. Supported: {}",
                self.providers.fallback_text_model,
                KNOWN_FALLBACK_MODELS.join(", ")
            )));
        }

        if !(0.0..=1.0).contains(&self.generation.max_degraded_fraction) {
            return Err(crate::VideoError::Configuration(format!(
                "generation.max_degraded_fraction must be within 0.0..=1.0, got {}",
                self.generation.max_degraded_fraction
            )));
        }

        if self.generation.words_per_minute == 0 || self.generation.words_per_segment == 0 {
            return Err(crate::VideoError::Configuration(
                "generation.words_per_minute and words_per_segment must be non-zero".to_string(),
            ));
        }

        if self.app.max_attempts == 0 {
            return Err(crate::VideoError::Configuration(
                "app.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Text Model: {}", self.providers.text_model);
        println!("  Fallback Text Model: {}", self.providers.fallback_text_model);
        println!(
            "  Gemini Key: {}",
            if self.providers.gemini_api_key.is_empty() { "(not set)" } else { "(set)" }
        );
        println!(
            "  Pexels Key: {}",
            if self.providers.pexels_api_key.is_empty() { "(not set)" } else { "(set)" }
        );
        println!("  Words/Minute: {}", self.generation.words_per_minute);
        println!("  Degraded Threshold: {}", self.generation.max_degraded_fraction);
        println!("  Assets/Segment: {}", self.media.assets_per_segment);
        println!("  Keep Workdir: {}", self.app.keep_workdir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.providers.pexels_api_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_default_config_validates_with_key() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_media_key_rejected() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(crate::VideoError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let mut config = valid_config();
        config.providers.text_model = "gemini-9000-ultra".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gemini-9000-ultra"));
    }

    #[test]
    fn test_degraded_fraction_bounds() {
        let mut config = valid_config();
        config.generation.max_degraded_fraction = 1.5;
        assert!(config.validate().is_err());

        config.generation.max_degraded_fraction = 0.0;
        assert!(config.validate().is_ok());
    }
}
