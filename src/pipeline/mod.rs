use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::cache::{ComponentKind, Fingerprint, SegmentCache};
use crate::config::Config;
use crate::media::{MediaFetcher, MediaKind, PexelsBackend, VisualAsset};
use crate::retry::RetryPolicy;
use crate::script::{
    ClaudeTextBackend, GeminiTextBackend, ScriptGenerator, ScriptPlan, SegmentDescriptor,
    SegmentRole, TextBackend,
};
use crate::tts::{EdgeTtsBackend, GeminiTtsBackend, NarrationResult, NarrationSynthesizer};
use crate::{Result, VideoError};

/// Target format of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoKind {
    Long,
    Short,
}

/// Immutable input to one pipeline run
#[derive(Debug, Clone)]
pub struct TopicRequest {
    pub topic: String,
    pub general_topic: String,
    pub target_duration: Duration,
    pub language: String,
    pub multi_speaker: bool,
    pub kind: VideoKind,
}

/// One fully populated segment of the video plan
#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub descriptor: SegmentDescriptor,
    pub narration: NarrationResult,
    pub visuals: Vec<VisualAsset>,
    pub degraded: bool,
}

/// The complete, ordered, in-memory description of all segments, ready for
/// rendering. Sole artifact handed to the video assembler.
#[derive(Debug, Clone)]
pub struct VideoPlan {
    pub title: String,
    pub kind: VideoKind,
    pub segments: Vec<PlannedSegment>,
    pub degraded_count: usize,
}

impl VideoPlan {
    /// Total narration length across all segments
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.narration.duration_secs).sum()
    }

    /// Human-readable run summary
    pub fn summary(&self) -> String {
        format!(
            "{} segments, {} narrated, {} degraded, {} of narration",
            self.segments.len(),
            self.segments.len() - self.degraded_count,
            self.degraded_count,
            crate::utils::format_duration(self.total_duration())
        )
    }
}

/// Pipeline orchestrator
///
/// Runs script generation, then fans out narration synthesis and media
/// acquisition per segment, both gated through the segment cache. Results
/// are aggregated in index order regardless of completion order. The
/// working directory is a scoped temp dir removed when the pipeline is
/// dropped, on every exit path.
pub struct Pipeline {
    config: Config,
    script_generator: ScriptGenerator,
    synthesizer: Arc<NarrationSynthesizer>,
    media: Arc<MediaFetcher>,
    script_cache: SegmentCache<ScriptPlan>,
    narration_cache: SegmentCache<NarrationResult>,
    media_cache: SegmentCache<Vec<VisualAsset>>,
    temp_dir: TempDir,
}

impl Pipeline {
    /// Create a pipeline with real backends resolved from configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let temp_dir = Self::create_workdir(&config)?;
        let retry = RetryPolicy::from_config(&config.app);

        let primary_text: Box<dyn TextBackend> =
            Box::new(GeminiTextBackend::new(&config.providers.gemini_api_key)?);
        let fallback_text: Option<Box<dyn TextBackend>> = match &config.providers.claude_api_key {
            Some(key) => Some(Box::new(ClaudeTextBackend::new(key)?)),
            None => None,
        };

        let script_generator = ScriptGenerator::new(
            primary_text,
            fallback_text,
            config.providers.text_model.clone(),
            config.providers.fallback_text_model.clone(),
            config.generation.clone(),
            retry.clone(),
        );

        let synthesizer = NarrationSynthesizer::new(
            Box::new(EdgeTtsBackend::new(temp_dir.path())),
            Some(Box::new(GeminiTtsBackend::new(
                &config.providers.gemini_api_key,
            )?)),
            retry.clone(),
            config.generation.words_per_minute,
            config.app.placeholder_narration_secs,
        );

        let mut media = MediaFetcher::new(
            Box::new(PexelsBackend::new(&config.providers.pexels_api_key)?),
            retry,
            config.media.min_width,
            config.media.min_height,
        );
        if config.generation.enhance_search_terms {
            media = media.with_enhancer(
                Box::new(GeminiTextBackend::new(&config.providers.gemini_api_key)?),
                config.providers.text_model.clone(),
            );
        }

        Ok(Self::from_parts(config, script_generator, synthesizer, media, temp_dir))
    }

    /// Assemble a pipeline from prebuilt components
    pub fn from_parts(
        config: Config,
        script_generator: ScriptGenerator,
        synthesizer: NarrationSynthesizer,
        media: MediaFetcher,
        temp_dir: TempDir,
    ) -> Self {
        Self {
            config,
            script_generator,
            synthesizer: Arc::new(synthesizer),
            media: Arc::new(media),
            script_cache: SegmentCache::new(),
            narration_cache: SegmentCache::new(),
            media_cache: SegmentCache::new(),
            temp_dir,
        }
    }

    fn create_workdir(config: &Config) -> Result<TempDir> {
        let temp_dir = match &config.app.temp_dir {
            Some(base) => {
                fs_err::create_dir_all(base)?;
                TempDir::new_in(base)
            }
            None => TempDir::new(),
        };
        temp_dir.map_err(|e| {
            VideoError::Pipeline(format!("failed to create working directory: {e}"))
        })
    }

    /// Path of the run-scoped working directory
    pub fn workdir(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Detach the working directory from cleanup and return its path
    pub fn keep_workdir(self) -> PathBuf {
        self.temp_dir.into_path()
    }

    /// Run the pipeline to completion
    pub async fn run(&self, request: TopicRequest) -> Result<VideoPlan> {
        let (_tx, rx) = broadcast::channel(1);
        self.run_with_shutdown(request, rx).await
    }

    /// Run the pipeline, aborting when the shutdown channel fires
    ///
    /// On cancellation all in-flight futures are dropped, their results
    /// discarded; the working directory is still cleaned up when the
    /// pipeline goes out of scope.
    pub async fn run_with_shutdown(
        &self,
        request: TopicRequest,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<VideoPlan> {
        tokio::select! {
            _ = wait_for_shutdown(shutdown) => {
                tracing::warn!("Run cancelled, abandoning in-flight work");
                Err(VideoError::Cancelled)
            }
            result = self.execute(request) => result,
        }
    }

    async fn execute(&self, request: TopicRequest) -> Result<VideoPlan> {
        tracing::info!("Generating script for '{}'", request.topic);
        let script = self.cached_script(&request).await?;
        let total = script.segments.len();
        if total == 0 {
            return Err(VideoError::Pipeline(
                "script generator produced no segments".to_string(),
            ));
        }
        tracing::info!("Script ready: {} segments", total);

        let default_kind = match request.kind {
            VideoKind::Long => MediaKind::Image,
            VideoKind::Short => MediaKind::Video,
        };

        // Per-segment fan-out. join_all polls every segment concurrently and
        // yields results in input order, so assembly order never depends on
        // completion order.
        let processed = futures_util::future::join_all(
            script
                .segments
                .iter()
                .map(|segment| self.process_segment(&request, segment, default_kind)),
        )
        .await;

        let degraded_count = processed.iter().filter(|s| s.degraded).count();
        let fraction = degraded_count as f64 / total as f64;
        if fraction > self.config.generation.max_degraded_fraction {
            return Err(VideoError::Pipeline(format!(
                "{degraded_count} of {total} segments degraded, above the configured threshold of {}",
                self.config.generation.max_degraded_fraction
            )));
        }

        let plan = VideoPlan {
            title: script.title,
            kind: request.kind,
            segments: processed,
            degraded_count,
        };
        tracing::info!("Plan complete: {}", plan.summary());
        Ok(plan)
    }

    async fn process_segment(
        &self,
        request: &TopicRequest,
        segment: &SegmentDescriptor,
        default_kind: MediaKind,
    ) -> PlannedSegment {
        // Narration and visuals race; the join point is per segment
        let (narration_outcome, visuals) = tokio::join!(
            self.cached_narration(request, segment),
            self.fetch_visuals(segment, default_kind),
        );

        let (narration, narration_degraded) = match narration_outcome {
            Ok(narration) => (narration, false),
            Err(err) => {
                tracing::warn!(
                    "Segment {} narration degraded to placeholder: {}",
                    segment.index,
                    err
                );
                (self.synthesizer.placeholder(segment.index), true)
            }
        };

        let (visuals, media_degraded) = if visuals.is_empty() {
            tracing::warn!(
                "Segment {} has no usable media, substituting placeholder",
                segment.index
            );
            let fallback = self.placeholder_asset(segment.index);
            (fallback.into_iter().collect(), true)
        } else {
            (visuals, false)
        };

        PlannedSegment {
            descriptor: segment.clone(),
            narration,
            visuals,
            degraded: narration_degraded || media_degraded,
        }
    }

    async fn cached_script(&self, request: &TopicRequest) -> Result<ScriptPlan> {
        let kind_tag = format!("{:?}", request.kind);
        let duration_tag = request.target_duration.as_secs().to_string();
        let speaker_tag = request.multi_speaker.to_string();
        let fingerprint = Fingerprint::new(
            ComponentKind::Script,
            &[
                &request.topic,
                &request.general_topic,
                &request.language,
                &kind_tag,
                &duration_tag,
                &speaker_tag,
            ],
        );

        self.script_cache
            .get_or_create(fingerprint, || async {
                Ok(self.script_generator.generate(request).await)
            })
            .await
    }

    async fn cached_narration(
        &self,
        request: &TopicRequest,
        segment: &SegmentDescriptor,
    ) -> Result<NarrationResult> {
        let role = format!("{:?}", segment.role);
        let speaker = segment.speaker.map(|s| s.to_string()).unwrap_or_default();
        let fingerprint = Fingerprint::new(
            ComponentKind::Narration,
            &[&segment.narration_text, &request.language, &role, &speaker],
        );

        let result = self
            .narration_cache
            .get_or_create(fingerprint, || {
                self.synthesizer.synthesize(segment, &request.language)
            })
            .await?;

        // Shared cache hits may carry another segment's index
        Ok(NarrationResult {
            segment_index: segment.index,
            ..result
        })
    }

    async fn fetch_visuals(
        &self,
        segment: &SegmentDescriptor,
        default_kind: MediaKind,
    ) -> Vec<VisualAsset> {
        // The intro can prefer one stock clip over a slideshow
        if segment.role == SegmentRole::Intro
            && self.config.generation.intro_video
            && default_kind == MediaKind::Image
        {
            let clips = self.cached_media(segment, MediaKind::Video, 1).await;
            if !clips.is_empty() {
                return clips;
            }
            tracing::warn!("Intro video unavailable, falling back to images");
        }

        self.cached_media(segment, default_kind, self.config.media.assets_per_segment)
            .await
    }

    async fn cached_media(
        &self,
        segment: &SegmentDescriptor,
        kind: MediaKind,
        count: usize,
    ) -> Vec<VisualAsset> {
        let terms = segment.search_terms.join("|");
        let kind_tag = format!("{kind:?}");
        let count_tag = count.to_string();
        let fingerprint =
            Fingerprint::new(ComponentKind::Media, &[&terms, &kind_tag, &count_tag]);

        let result = self
            .media_cache
            .get_or_create(fingerprint, || async {
                Ok(self
                    .media
                    .fetch(
                        segment.index,
                        &segment.search_terms,
                        kind,
                        count,
                        self.temp_dir.path(),
                    )
                    .await)
            })
            .await;

        let mut assets = result.unwrap_or_default();
        for asset in &mut assets {
            asset.segment_index = segment.index;
        }
        assets
    }

    /// Solid placeholder frame used when media acquisition comes up empty
    fn placeholder_asset(&self, segment_index: usize) -> Option<VisualAsset> {
        let path = self
            .temp_dir
            .path()
            .join(format!("placeholder_{segment_index}.jpg"));
        let frame = image::RgbImage::from_pixel(1280, 720, image::Rgb([16, 16, 24]));
        if let Err(err) =
            image::DynamicImage::ImageRgb8(frame).save_with_format(&path, image::ImageFormat::Jpeg)
        {
            tracing::warn!("Failed to write placeholder asset: {}", err);
            return None;
        }

        Some(VisualAsset {
            segment_index,
            kind: MediaKind::Image,
            path,
            width: 1280,
            height: 720,
            source: "placeholder".to_string(),
        })
    }
}

/// Resolve only on an actual cancellation signal
///
/// A dropped sender means no cancellation can ever arrive, so the wait
/// parks forever instead of resolving.
async fn wait_for_shutdown(mut shutdown: broadcast::Receiver<()>) {
    if shutdown.recv().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaBackend;
    use crate::script::TextRequest;
    use crate::tts::{BackendUsed, SynthesizedAudio, TtsBackend, TtsRequest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct DeadTextBackend;

    #[async_trait]
    impl TextBackend for DeadTextBackend {
        async fn generate(&self, _request: &TextRequest) -> Result<String> {
            Err(VideoError::BackendUnavailable {
                backend: "text".into(),
                message: "offline".into(),
            })
        }

        fn backend_name(&self) -> &'static str {
            "text"
        }
    }

    /// Text backend that always returns the same canned tree
    struct CannedTextBackend {
        tree: String,
    }

    #[async_trait]
    impl TextBackend for CannedTextBackend {
        async fn generate(&self, _request: &TextRequest) -> Result<String> {
            Ok(self.tree.clone())
        }

        fn backend_name(&self) -> &'static str {
            "canned"
        }
    }

    /// TTS backend that finishes later for earlier segments, scrambling
    /// completion order
    struct ScrambledTtsBackend;

    #[async_trait]
    impl TtsBackend for ScrambledTtsBackend {
        async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio> {
            let delay = 40u64.saturating_sub(request.text.len() as u64 % 40);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(SynthesizedAudio {
                audio: vec![1, 2, 3],
                duration_secs: Some(3.0),
            })
        }

        fn backend_name(&self) -> &'static str {
            "scrambled"
        }
    }

    /// TTS backend that fails for narrations containing a marker
    struct SelectiveTtsBackend {
        fail_marker: &'static str,
    }

    #[async_trait]
    impl TtsBackend for SelectiveTtsBackend {
        async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio> {
            if request.text.contains(self.fail_marker) {
                return Err(VideoError::Synthesis("marked segment".into()));
            }
            Ok(SynthesizedAudio {
                audio: vec![7],
                duration_secs: Some(2.0),
            })
        }

        fn backend_name(&self) -> &'static str {
            "selective"
        }
    }

    struct FailingTtsBackend;

    #[async_trait]
    impl TtsBackend for FailingTtsBackend {
        async fn synthesize(&self, _request: &TtsRequest) -> Result<SynthesizedAudio> {
            Err(VideoError::Synthesis("down".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    struct SlowTtsBackend;

    #[async_trait]
    impl TtsBackend for SlowTtsBackend {
        async fn synthesize(&self, _request: &TtsRequest) -> Result<SynthesizedAudio> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SynthesizedAudio {
                audio: vec![1],
                duration_secs: Some(1.0),
            })
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    /// Media backend serving one tiny image per query, counting searches
    struct CountingMediaBackend {
        calls: Arc<Mutex<HashMap<String, u32>>>,
        empty: bool,
    }

    impl CountingMediaBackend {
        fn new(empty: bool) -> Self {
            Self {
                calls: Arc::new(Mutex::new(HashMap::new())),
                empty,
            }
        }
    }

    #[async_trait]
    impl MediaBackend for CountingMediaBackend {
        async fn search(
            &self,
            query: &str,
            kind: MediaKind,
            _per_page: usize,
        ) -> Result<Vec<crate::media::MediaCandidate>> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(query.to_string())
                .or_insert(0) += 1;
            // Let every caller queue on the pending cache entry
            tokio::time::sleep(Duration::from_millis(15)).await;

            if self.empty {
                return Ok(Vec::new());
            }
            Ok(vec![crate::media::MediaCandidate {
                url: format!("http://fake/{query}"),
                width: 1280,
                height: 720,
                kind,
            }])
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>> {
            // Unique payload per url so dedup keeps them all
            let img = image::RgbImage::from_pixel(
                1280,
                720,
                image::Rgb([url.len() as u8, 0, 0]),
            );
            let mut cursor = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut cursor, image::ImageFormat::Png)
                .map_err(|e| VideoError::Network {
                    backend: "counting".into(),
                    message: e.to_string(),
                })?;
            Ok(cursor.into_inner())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.providers.pexels_api_key = "test".to_string();
        config.media.assets_per_segment = 1;
        config
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn request() -> TopicRequest {
        TopicRequest {
            topic: "retro arcade games".to_string(),
            general_topic: "video games".to_string(),
            target_duration: Duration::from_secs(300),
            language: "english".to_string(),
            multi_speaker: false,
            kind: VideoKind::Long,
        }
    }

    fn build_pipeline(
        text: Box<dyn TextBackend>,
        tts: Box<dyn TtsBackend>,
        media_backend: Box<dyn MediaBackend>,
    ) -> Pipeline {
        let config = test_config();
        let script_generator = ScriptGenerator::new(
            text,
            None,
            config.providers.text_model.clone(),
            config.providers.fallback_text_model.clone(),
            config.generation.clone(),
            fast_retry(),
        );
        let synthesizer = NarrationSynthesizer::new(
            tts,
            None,
            fast_retry(),
            config.generation.words_per_minute,
            config.app.placeholder_narration_secs,
        );
        let media = MediaFetcher::new(media_backend, fast_retry(), 640, 360);
        let temp_dir = TempDir::new().unwrap();
        Pipeline::from_parts(config, script_generator, synthesizer, media, temp_dir)
    }

    #[tokio::test]
    async fn test_template_run_produces_ordered_twelve_segment_plan() {
        // Text backend down: template path. 5 minutes -> 1 intro + 10 body + 1 outro.
        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(ScrambledTtsBackend),
            Box::new(CountingMediaBackend::new(false)),
        );

        let plan = pipeline.run(request()).await.unwrap();

        assert_eq!(plan.segments.len(), 12);
        for (position, segment) in plan.segments.iter().enumerate() {
            assert_eq!(segment.descriptor.index, position);
            assert_eq!(segment.narration.segment_index, position);
            assert!(!segment.degraded);
            assert!(!segment.visuals.is_empty());
        }
        assert_eq!(plan.degraded_count, 0);
    }

    #[tokio::test]
    async fn test_order_is_stable_under_scrambled_completion() {
        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(ScrambledTtsBackend),
            Box::new(CountingMediaBackend::new(false)),
        );

        let plan = pipeline.run(request()).await.unwrap();
        let indices: Vec<usize> = plan
            .segments
            .iter()
            .map(|s| s.descriptor.index)
            .collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_single_failed_narration_degrades_only_that_segment() {
        // "Number 3" appears only in the rank-3 body segment of the template
        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(SelectiveTtsBackend {
                fail_marker: "Number 3.",
            }),
            Box::new(CountingMediaBackend::new(false)),
        );

        let plan = pipeline.run(request()).await.unwrap();
        assert_eq!(plan.degraded_count, 1);

        let degraded: Vec<&PlannedSegment> =
            plan.segments.iter().filter(|s| s.degraded).collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].narration.backend, BackendUsed::Placeholder);
        assert!(degraded[0].narration.duration_secs > 0.0);
        // Visual placeholder was not needed, media was fine
        assert!(!degraded[0].visuals.is_empty());
    }

    #[tokio::test]
    async fn test_majority_degraded_run_fails() {
        // Narration fails everywhere and media is empty: every segment degrades
        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(FailingTtsBackend),
            Box::new(CountingMediaBackend::new(true)),
        );

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, VideoError::Pipeline(_)));
    }

    #[tokio::test]
    async fn test_empty_media_substitutes_placeholder_asset() {
        let mut config = test_config();
        // Allow every segment to degrade without failing the run
        config.generation.max_degraded_fraction = 1.0;

        let script_generator = ScriptGenerator::new(
            Box::new(DeadTextBackend),
            None,
            config.providers.text_model.clone(),
            config.providers.fallback_text_model.clone(),
            config.generation.clone(),
            fast_retry(),
        );
        let synthesizer = NarrationSynthesizer::new(
            Box::new(ScrambledTtsBackend),
            None,
            fast_retry(),
            config.generation.words_per_minute,
            config.app.placeholder_narration_secs,
        );
        let media = MediaFetcher::new(
            Box::new(CountingMediaBackend::new(true)),
            fast_retry(),
            640,
            360,
        );
        let pipeline = Pipeline::from_parts(
            config,
            script_generator,
            synthesizer,
            media,
            TempDir::new().unwrap(),
        );

        let plan = pipeline.run(request()).await.unwrap();
        assert_eq!(plan.degraded_count, plan.segments.len());
        for segment in &plan.segments {
            assert_eq!(segment.visuals.len(), 1);
            assert_eq!(segment.visuals[0].source, "placeholder");
            assert!(segment.visuals[0].path.exists());
        }
    }

    #[tokio::test]
    async fn test_identical_search_terms_share_one_media_fetch() {
        // Every item carries the same search term; the media cache must
        // collapse all body segments into one backend search.
        let items: Vec<String> = (1..=10)
            .rev()
            .map(|rank| {
                format!(
                    r#"{{"rank": {rank}, "title": "Pick {rank}", "script": "Script for pick {rank}.", "search_terms": ["arcade cabinet neon"]}}"#
                )
            })
            .collect();
        let tree = format!(
            r#"{{"title": "Top Picks", "hook": "Hook!", "thesis": "Thesis.", "items": [{}], "conclusion": "Bye!"}}"#,
            items.join(",")
        );

        let media_backend = CountingMediaBackend::new(false);
        let calls = Arc::clone(&media_backend.calls);

        let pipeline = build_pipeline(
            Box::new(CannedTextBackend { tree }),
            Box::new(ScrambledTtsBackend),
            Box::new(media_backend),
        );

        let plan = pipeline.run(request()).await.unwrap();
        assert_eq!(plan.segments.len(), 12);

        let counts = calls.lock().unwrap();
        assert_eq!(counts.get("arcade cabinet neon"), Some(&1));
        // Every body segment still received the shared asset list
        for segment in &plan.segments[1..11] {
            assert_eq!(segment.visuals.len(), 1);
            assert_eq!(segment.visuals[0].segment_index, segment.descriptor.index);
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_quickly_with_cancelled_error() {
        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(SlowTtsBackend),
            Box::new(CountingMediaBackend::new(false)),
        );

        let (tx, rx) = broadcast::channel(1);
        let started = std::time::Instant::now();

        let run = pipeline.run_with_shutdown(request(), rx);
        tokio::pin!(run);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                tx.send(()).unwrap();
            }
            _ = &mut run => panic!("run finished before cancellation"),
        }

        let result = run.await;
        assert!(matches!(result, Err(VideoError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_concurrent_narration_requests_share_producer() {
        // Two segments with identical narration parameters collapse to one
        // synthesis call through the cache.
        let tts_calls = Arc::new(AtomicU32::new(0));

        struct CountingTts {
            calls: Arc<AtomicU32>,
        }

        #[async_trait]
        impl TtsBackend for CountingTts {
            async fn synthesize(&self, _request: &TtsRequest) -> Result<SynthesizedAudio> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                Ok(SynthesizedAudio {
                    audio: vec![1],
                    duration_secs: Some(1.0),
                })
            }

            fn backend_name(&self) -> &'static str {
                "counting-tts"
            }
        }

        let pipeline = build_pipeline(
            Box::new(DeadTextBackend),
            Box::new(CountingTts {
                calls: Arc::clone(&tts_calls),
            }),
            Box::new(CountingMediaBackend::new(false)),
        );

        let segment = SegmentDescriptor {
            index: 0,
            role: SegmentRole::Body { rank: 1 },
            title: "same".into(),
            narration_text: "identical narration".into(),
            search_terms: vec!["x".into()],
            speaker: None,
        };
        let mut other = segment.clone();
        other.index = 5;

        let req = request();
        let (a, b) = tokio::join!(
            pipeline.cached_narration(&req, &segment),
            pipeline.cached_narration(&req, &other),
        );

        assert_eq!(tts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().segment_index, 0);
        assert_eq!(b.unwrap().segment_index, 5);
    }
}
