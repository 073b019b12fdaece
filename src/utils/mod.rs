use std::path::Path;

/// Normalize a spoken language name or code into a short language code
pub fn language_code(language: &str) -> String {
    let lowercased = language.to_lowercase();
    let normalized = match lowercased.as_str() {
        "en" | "english" => "en",
        "es" | "spanish" => "es",
        "fr" | "french" => "fr",
        "de" | "german" => "de",
        "it" | "italian" => "it",
        "pt" | "portuguese" => "pt",
        "ja" | "japanese" => "ja",
        "ko" | "korean" => "ko",
        "zh" | "chinese" => "zh",
        "ar" | "arabic" => "ar",
        "hi" | "hindi" => "hi",
        "ru" | "russian" => "ru",
        "tr" | "turkish" => "tr",
        other => other,
    };

    normalized.to_string()
}

/// Default TTS locale for a short language code
pub fn tts_locale(code: &str) -> String {
    let locale = match code {
        "en" => "en-US",
        "es" => "es-ES",
        "fr" => "fr-FR",
        "de" => "de-DE",
        "it" => "it-IT",
        "pt" => "pt-BR",
        "ja" => "ja-JP",
        "ko" => "ko-KR",
        "zh" => "zh-CN",
        "ar" => "ar-SA",
        "hi" => "hi-IN",
        "ru" => "ru-RU",
        "tr" => "tr-TR",
        other => return format!("{}-{}", other, other.to_uppercase()),
    };

    locale.to_string()
}

/// Sanitize a topic or title for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, spaces, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format a cumulative offset as an MM:SS chapter timestamp
pub fn chapter_timestamp(seconds: f64) -> String {
    let total = seconds as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Generate a collision-free filename for a downloaded asset
///
/// Segment index plus timestamp and random suffix keeps concurrent
/// downloads in the shared working directory from clobbering each other.
pub fn unique_asset_filename(segment_index: usize, label: &str, extension: &str) -> String {
    let timestamp = chrono::Utc::now().format("%H%M%S");
    let suffix = uuid::Uuid::new_v4().to_string()[..8].to_string();
    format!(
        "seg{}_{}_{}_{}.{}",
        segment_index,
        sanitize_filename(label).replace(' ', "_"),
        timestamp,
        suffix,
        extension
    )
}

/// Word count used for narration duration estimates
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Check if a file exists and is readable
pub fn check_file_accessible(path: &Path) -> crate::Result<()> {
    if !path.exists() {
        return Err(crate::VideoError::Assembly(format!(
            "File does not exist: {}",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(crate::VideoError::Assembly(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    // Check for ffmpeg
    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for video assembly".to_string());
    }

    // Check for ffprobe (used to measure narration duration)
    if !check_command_available("ffprobe").await {
        missing.push("ffprobe - required for audio duration measurement".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("-version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code() {
        assert_eq!(language_code("english"), "en");
        assert_eq!(language_code("English"), "en");
        assert_eq!(language_code("es"), "es");
        assert_eq!(language_code("zh-TW"), "zh-tw"); // Pass through, lowercased
    }

    #[test]
    fn test_tts_locale() {
        assert_eq!(tts_locale("en"), "en-US");
        assert_eq!(tts_locale("pt"), "pt-BR");
        assert_eq!(tts_locale("nl"), "nl-NL");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World!"), "Hello World_");
        assert_eq!(sanitize_filename("test/file?name"), "test_file_name");
        assert_eq!(sanitize_filename("  spaced  "), "spaced");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_chapter_timestamp() {
        assert_eq!(chapter_timestamp(0.0), "00:00");
        assert_eq!(chapter_timestamp(75.4), "01:15");
        assert_eq!(chapter_timestamp(600.0), "10:00");
    }

    #[test]
    fn test_unique_asset_filename() {
        let a = unique_asset_filename(3, "arcade cabinet", "jpg");
        let b = unique_asset_filename(3, "arcade cabinet", "jpg");
        assert!(a.starts_with("seg3_arcade_cabinet_"));
        assert!(a.ends_with(".jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("hello world"), 2);
        assert_eq!(word_count("  spaced   out  "), 2);
        assert_eq!(word_count(""), 0);
    }
}
