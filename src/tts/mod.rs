use async_trait::async_trait;

use crate::retry::RetryPolicy;
use crate::script::{SegmentDescriptor, SegmentRole};
use crate::utils::{language_code, tts_locale, word_count};
use crate::{Result, VideoError};

pub mod backends;

pub use backends::{probe_duration, EdgeTtsBackend, GeminiTtsBackend};

/// Voices rotated across segments in multi-speaker mode
const VOICE_ROTATION: [&str; 4] = ["Aria", "Guy", "Jenny", "Davis"];

/// Which backend produced a narration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendUsed {
    Primary,
    Fallback,
    Placeholder,
}

/// Synthesized narration for one segment
#[derive(Debug, Clone)]
pub struct NarrationResult {
    pub segment_index: usize,
    pub audio: Vec<u8>,
    pub duration_secs: f64,
    pub backend: BackendUsed,
}

/// Request sent to a TTS backend
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice: String,
    pub language: String,
}

/// Raw audio returned by a TTS backend
///
/// `duration_secs` is `None` when the backend does not report timing; the
/// synthesizer then estimates from the configured narration rate.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub duration_secs: Option<f64>,
}

/// Trait for pluggable TTS backends
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio>;

    fn backend_name(&self) -> &'static str;
}

/// Deterministic voice selection from segment position
///
/// Intro and outro get the expressive voice, body segments the narrator
/// voice; a multi-speaker slot overrides both with its rotation entry.
pub fn select_voice(role: SegmentRole, speaker: Option<u8>, locale: &str) -> String {
    if let Some(slot) = speaker {
        let name = VOICE_ROTATION[slot as usize % VOICE_ROTATION.len()];
        return format!("{locale}-{name}Neural");
    }

    match role {
        SegmentRole::Intro | SegmentRole::Outro => format!("{locale}-AriaNeural"),
        SegmentRole::Body { .. } => format!("{locale}-GuyNeural"),
    }
}

/// Narration synthesizer with a primary and a fallback backend
///
/// Fails only after both backends are exhausted; the pipeline then degrades
/// the segment with `placeholder()`.
pub struct NarrationSynthesizer {
    primary: Box<dyn TtsBackend>,
    fallback: Option<Box<dyn TtsBackend>>,
    retry: RetryPolicy,
    words_per_minute: u32,
    placeholder_secs: f64,
}

impl NarrationSynthesizer {
    pub fn new(
        primary: Box<dyn TtsBackend>,
        fallback: Option<Box<dyn TtsBackend>>,
        retry: RetryPolicy,
        words_per_minute: u32,
        placeholder_secs: f64,
    ) -> Self {
        Self {
            primary,
            fallback,
            retry,
            words_per_minute,
            placeholder_secs,
        }
    }

    /// Synthesize narration for a segment
    pub async fn synthesize(
        &self,
        segment: &SegmentDescriptor,
        language: &str,
    ) -> Result<NarrationResult> {
        let locale = tts_locale(&language_code(language));
        let request = TtsRequest {
            text: segment.narration_text.clone(),
            voice: select_voice(segment.role, segment.speaker, &locale),
            language: language_code(language),
        };

        let primary_error = match self.attempt(self.primary.as_ref(), &request, segment).await {
            Ok(mut result) => {
                result.backend = BackendUsed::Primary;
                return Ok(result);
            }
            Err(err) => err,
        };

        let Some(fallback) = self.fallback.as_ref() else {
            return Err(primary_error);
        };

        tracing::warn!(
            "{} exhausted for segment {} ({}). Trying {}",
            self.primary.backend_name(),
            segment.index,
            primary_error,
            fallback.backend_name()
        );

        match self.attempt(fallback.as_ref(), &request, segment).await {
            Ok(mut result) => {
                result.backend = BackendUsed::Fallback;
                Ok(result)
            }
            Err(fallback_error) => Err(VideoError::Synthesis(format!(
                "both TTS backends exhausted for segment {}: {}: {}; {}: {}",
                segment.index,
                self.primary.backend_name(),
                primary_error,
                fallback.backend_name(),
                fallback_error
            ))),
        }
    }

    async fn attempt(
        &self,
        backend: &dyn TtsBackend,
        request: &TtsRequest,
        segment: &SegmentDescriptor,
    ) -> Result<NarrationResult> {
        let synthesized = self
            .retry
            .run(backend.backend_name(), || backend.synthesize(request))
            .await?;

        if synthesized.audio.is_empty() {
            return Err(VideoError::Synthesis(format!(
                "{} produced no audio",
                backend.backend_name()
            )));
        }

        let duration = synthesized
            .duration_secs
            .unwrap_or_else(|| self.estimate_duration(&request.text));
        if duration <= 0.0 {
            return Err(VideoError::Synthesis(format!(
                "{} produced zero-length audio",
                backend.backend_name()
            )));
        }

        Ok(NarrationResult {
            segment_index: segment.index,
            audio: synthesized.audio,
            duration_secs: duration,
            backend: BackendUsed::Primary,
        })
    }

    /// Estimate narration duration from the configured speaking rate
    pub fn estimate_duration(&self, text: &str) -> f64 {
        word_count(text) as f64 * 60.0 / f64::from(self.words_per_minute)
    }

    /// Silent placeholder narration for a degraded segment
    pub fn placeholder(&self, segment_index: usize) -> NarrationResult {
        NarrationResult {
            segment_index,
            audio: silent_wav(self.placeholder_secs),
            duration_secs: self.placeholder_secs,
            backend: BackendUsed::Placeholder,
        }
    }
}

/// Mono 16 kHz silence of the given length as a WAV byte buffer
fn silent_wav(duration_secs: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).expect("in-memory wav write cannot fail");
        let samples = (duration_secs * f64::from(spec.sample_rate)) as usize;
        for _ in 0..samples {
            writer
                .write_sample(0i16)
                .expect("in-memory wav write cannot fail");
        }
        writer.finalize().expect("in-memory wav write cannot fail");
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct StaticBackend {
        name: &'static str,
        duration: Option<f64>,
        audio: Vec<u8>,
    }

    #[async_trait]
    impl TtsBackend for StaticBackend {
        async fn synthesize(&self, _request: &TtsRequest) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio {
                audio: self.audio.clone(),
                duration_secs: self.duration,
            })
        }

        fn backend_name(&self) -> &'static str {
            self.name
        }
    }

    struct RateLimitedBackend {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TtsBackend for RateLimitedBackend {
        async fn synthesize(&self, _request: &TtsRequest) -> Result<SynthesizedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(VideoError::RateLimited {
                backend: "primary".into(),
                message: "quota exceeded".into(),
            })
        }

        fn backend_name(&self) -> &'static str {
            "primary"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn segment() -> SegmentDescriptor {
        SegmentDescriptor {
            index: 2,
            role: SegmentRole::Body { rank: 8 },
            title: "Pick 8".to_string(),
            narration_text: "Number 8: a classic everyone remembers fondly today.".to_string(),
            search_terms: vec!["arcade".to_string()],
            speaker: None,
        }
    }

    fn synthesizer(
        primary: Box<dyn TtsBackend>,
        fallback: Option<Box<dyn TtsBackend>>,
    ) -> NarrationSynthesizer {
        NarrationSynthesizer::new(primary, fallback, fast_retry(), 150, 1.5)
    }

    #[test]
    fn test_voice_selection_is_deterministic() {
        assert_eq!(
            select_voice(SegmentRole::Intro, None, "en-US"),
            "en-US-AriaNeural"
        );
        assert_eq!(
            select_voice(SegmentRole::Outro, None, "en-US"),
            "en-US-AriaNeural"
        );
        assert_eq!(
            select_voice(SegmentRole::Body { rank: 3 }, None, "en-US"),
            "en-US-GuyNeural"
        );
        // Multi-speaker slots override the role mapping
        assert_eq!(
            select_voice(SegmentRole::Body { rank: 3 }, Some(1), "de-DE"),
            "de-DE-GuyNeural"
        );
        assert_eq!(
            select_voice(SegmentRole::Intro, Some(5), "en-US"),
            select_voice(SegmentRole::Intro, Some(1), "en-US")
        );
    }

    #[tokio::test]
    async fn test_primary_success_reports_primary() {
        let primary = StaticBackend {
            name: "primary",
            duration: Some(4.2),
            audio: vec![1, 2, 3],
        };
        let result = synthesizer(Box::new(primary), None)
            .synthesize(&segment(), "english")
            .await
            .unwrap();

        assert_eq!(result.backend, BackendUsed::Primary);
        assert_eq!(result.segment_index, 2);
        assert!((result.duration_secs - 4.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rate_limited_primary_falls_back() {
        let calls = Arc::new(AtomicU32::new(0));
        let primary = RateLimitedBackend {
            calls: Arc::clone(&calls),
        };
        let fallback = StaticBackend {
            name: "fallback",
            duration: Some(3.0),
            audio: vec![9, 9],
        };

        let result = synthesizer(Box::new(primary), Some(Box::new(fallback)))
            .synthesize(&segment(), "english")
            .await
            .unwrap();

        assert_eq!(result.backend, BackendUsed::Fallback);
        assert!(result.duration_secs > 0.0);
        // Primary was retried to exhaustion before the fallback ran
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_duration_counts_as_failure() {
        let primary = StaticBackend {
            name: "primary",
            duration: Some(0.0),
            audio: vec![1],
        };
        let fallback = StaticBackend {
            name: "fallback",
            duration: Some(2.0),
            audio: vec![2],
        };

        let result = synthesizer(Box::new(primary), Some(Box::new(fallback)))
            .synthesize(&segment(), "english")
            .await
            .unwrap();

        assert_eq!(result.backend, BackendUsed::Fallback);
    }

    #[tokio::test]
    async fn test_both_backends_exhausted_is_synthesis_error() {
        let primary = StaticBackend {
            name: "primary",
            duration: Some(1.0),
            audio: Vec::new(),
        };
        let fallback = StaticBackend {
            name: "fallback",
            duration: Some(1.0),
            audio: Vec::new(),
        };

        let err = synthesizer(Box::new(primary), Some(Box::new(fallback)))
            .synthesize(&segment(), "english")
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::Synthesis(_)));
    }

    #[tokio::test]
    async fn test_missing_duration_estimated_from_rate() {
        let primary = StaticBackend {
            name: "primary",
            duration: None,
            audio: vec![1, 2],
        };
        let synth = synthesizer(Box::new(primary), None);
        let result = synth.synthesize(&segment(), "english").await.unwrap();

        // 8 words at 150 wpm
        let expected = 8.0 * 60.0 / 150.0;
        assert!((result.duration_secs - expected).abs() < 1e-9);
    }

    #[test]
    fn test_placeholder_is_silent_and_short() {
        let synth = synthesizer(
            Box::new(StaticBackend {
                name: "primary",
                duration: Some(1.0),
                audio: vec![1],
            }),
            None,
        );
        let placeholder = synth.placeholder(7);

        assert_eq!(placeholder.backend, BackendUsed::Placeholder);
        assert_eq!(placeholder.segment_index, 7);
        assert!((placeholder.duration_secs - 1.5).abs() < f64::EPSILON);
        // RIFF header plus 16 kHz of silent samples
        assert!(placeholder.audio.len() > 44);
        assert_eq!(&placeholder.audio[..4], b"RIFF");
    }
}
