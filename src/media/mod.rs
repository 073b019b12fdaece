use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::retry::RetryPolicy;
use crate::script::{TextBackend, TextRequest};
use crate::utils::unique_asset_filename;
use crate::{Result, VideoError};

pub mod pexels;

pub use pexels::PexelsBackend;

/// Kind of visual asset attached to a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// A downloaded, validated visual asset
#[derive(Debug, Clone)]
pub struct VisualAsset {
    pub segment_index: usize,
    pub kind: MediaKind,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub source: String,
}

/// Search hit returned by a stock-media backend, in provider order
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub kind: MediaKind,
}

/// Trait for stock-media search backends
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Search for candidates matching a query
    async fn search(
        &self,
        query: &str,
        kind: MediaKind,
        per_page: usize,
    ) -> Result<Vec<MediaCandidate>>;

    fn backend_name(&self) -> &'static str;

    /// Download a candidate's payload
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VideoError::from_status(self.backend_name(), status, ""));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| VideoError::from_request(self.backend_name(), e))
    }
}

/// Media Provider Adapter
///
/// Fetches, filters, ranks and deduplicates stock media for a segment.
/// Zero usable results yields an empty list, never an error; the pipeline
/// decides whether to degrade the segment.
pub struct MediaFetcher {
    backend: Box<dyn MediaBackend>,
    enhancer: Option<Box<dyn TextBackend>>,
    enhancer_model: String,
    retry: RetryPolicy,
    min_width: u32,
    min_height: u32,
}

impl MediaFetcher {
    pub fn new(
        backend: Box<dyn MediaBackend>,
        retry: RetryPolicy,
        min_width: u32,
        min_height: u32,
    ) -> Self {
        Self {
            backend,
            enhancer: None,
            enhancer_model: String::new(),
            retry,
            min_width,
            min_height,
        }
    }

    /// Enable search-term sharpening through a text backend
    pub fn with_enhancer(mut self, enhancer: Box<dyn TextBackend>, model: String) -> Self {
        self.enhancer = Some(enhancer);
        self.enhancer_model = model;
        self
    }

    /// Fetch up to `count` validated assets for a segment
    ///
    /// Walks the search terms in order until enough assets are collected.
    /// Search failures, download failures and invalid payloads all just
    /// shrink the result.
    pub async fn fetch(
        &self,
        segment_index: usize,
        search_terms: &[String],
        kind: MediaKind,
        count: usize,
        dest_dir: &Path,
    ) -> Vec<VisualAsset> {
        let mut assets = Vec::new();
        let mut seen_hashes = Vec::new();

        for term in search_terms {
            if assets.len() >= count {
                break;
            }

            let query = self.enhance_term(term).await;
            let candidates = match self
                .retry
                .run(self.backend.backend_name(), || {
                    self.backend.search(&query, kind, count * 3)
                })
                .await
            {
                Ok(candidates) => candidates,
                Err(err) => {
                    tracing::warn!("Media search for '{}' failed: {}", query, err);
                    continue;
                }
            };

            let ranked = rank_candidates(candidates, self.min_width, self.min_height);
            tracing::debug!(
                "'{}': {} candidates after resolution filter",
                query,
                ranked.len()
            );

            for candidate in ranked {
                if assets.len() >= count {
                    break;
                }

                if url::Url::parse(&candidate.url).is_err() {
                    tracing::debug!("Skipping candidate with invalid url: {}", candidate.url);
                    continue;
                }

                let bytes = match self.backend.download(&candidate.url).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::debug!("Skipping candidate {}: {}", candidate.url, err);
                        continue;
                    }
                };

                // Duplicate payloads within a segment are discarded
                let fingerprint = content_fingerprint(&bytes);
                if seen_hashes.contains(&fingerprint) {
                    continue;
                }

                let Some((width, height)) =
                    self.validate_payload(&candidate, bytes.clone(), kind).await
                else {
                    continue;
                };

                let filename = unique_asset_filename(segment_index, term, kind.extension());
                let path = dest_dir.join(filename);
                if let Err(err) = fs_err::write(&path, &bytes) {
                    tracing::warn!("Failed to store asset {}: {}", path.display(), err);
                    continue;
                }

                seen_hashes.push(fingerprint);
                assets.push(VisualAsset {
                    segment_index,
                    kind,
                    path,
                    width,
                    height,
                    source: self.backend.backend_name().to_string(),
                });
            }
        }

        assets
    }

    /// Integrity check: corrupt payloads are discarded before attachment
    async fn validate_payload(
        &self,
        candidate: &MediaCandidate,
        bytes: Vec<u8>,
        kind: MediaKind,
    ) -> Option<(u32, u32)> {
        match kind {
            MediaKind::Image => {
                let (min_width, min_height) = (self.min_width, self.min_height);
                // Decoding is CPU-bound; keep it off the run loop
                tokio::task::spawn_blocking(move || decode_image(&bytes, min_width, min_height))
                    .await
                    .ok()
                    .flatten()
            }
            MediaKind::Video => {
                if looks_like_video(&bytes) {
                    Some((candidate.width, candidate.height))
                } else {
                    None
                }
            }
        }
    }

    async fn enhance_term(&self, term: &str) -> String {
        let Some(enhancer) = self.enhancer.as_ref() else {
            return term.to_string();
        };

        let request = TextRequest {
            prompt: format!(
                "Enhance this search term for finding high-quality stock footage or images: \
                 \"{term}\". Return ONLY the enhanced search term as a single line of text, \
                 with no explanation. Focus on adding visual details."
            ),
            model: self.enhancer_model.clone(),
            max_tokens: 64,
        };

        match enhancer.generate(&request).await {
            Ok(response) => {
                let enhanced = response
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
                    .trim()
                    .to_string();
                if enhanced.is_empty() {
                    term.to_string()
                } else {
                    tracing::debug!("Enhanced search term: '{}' -> '{}'", term, enhanced);
                    enhanced
                }
            }
            Err(err) => {
                tracing::debug!("Search term enhancement failed: {}", err);
                term.to_string()
            }
        }
    }
}

/// Drop candidates below the resolution floor, then order by relevance
///
/// Score combines provider order with a resolution bonus; the stable sort
/// keeps provider order for ties.
fn rank_candidates(
    candidates: Vec<MediaCandidate>,
    min_width: u32,
    min_height: u32,
) -> Vec<MediaCandidate> {
    let total = candidates.len();
    let mut scored: Vec<(usize, MediaCandidate)> = candidates
        .into_iter()
        .enumerate()
        .filter(|(_, c)| c.width >= min_width && c.height >= min_height)
        .map(|(position, c)| {
            let provider_score = total - position;
            let resolution_bonus = if c.width >= 1920 && c.height >= 1080 {
                2
            } else if c.width >= 1280 && c.height >= 720 {
                1
            } else {
                0
            };
            (provider_score + resolution_bonus, c)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

fn decode_image(bytes: &[u8], min_width: u32, min_height: u32) -> Option<(u32, u32)> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let (width, height) = (decoded.width(), decoded.height());
    if width >= min_width && height >= min_height {
        Some((width, height))
    } else {
        None
    }
}

/// Container sniff for downloaded video payloads
fn looks_like_video(bytes: &[u8]) -> bool {
    if bytes.len() < 12 {
        return false;
    }
    // MP4/MOV: 'ftyp' box at offset 4
    if &bytes[4..8] == b"ftyp" {
        return true;
    }
    // WebM/MKV: EBML magic
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return true;
    }
    // AVI: RIFF container
    bytes.starts_with(b"RIFF") && &bytes[8..12] == b"AVI "
}

fn content_fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
