use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{Result, VideoError};

use super::{MediaBackend, MediaCandidate, MediaKind};

/// Stock-media backend for the Pexels API
pub struct PexelsBackend {
    client: Client,
    api_key: String,
    photo_url: String,
    video_url: String,
}

impl PexelsBackend {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(VideoError::Configuration(
                "Stock-media API key not found. Set providers.pexels_api_key in the config file"
                    .to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.trim().to_string(),
            photo_url: "https://api.pexels.com/v1/search".to_string(),
            video_url: "https://api.pexels.com/videos/search".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PhotoSearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    width: u32,
    height: u32,
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    large2x: Option<String>,
    original: String,
}

#[derive(Debug, Deserialize)]
struct VideoSearchResponse {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    link: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[async_trait]
impl MediaBackend for PexelsBackend {
    async fn search(
        &self,
        query: &str,
        kind: MediaKind,
        per_page: usize,
    ) -> Result<Vec<MediaCandidate>> {
        let url = match kind {
            MediaKind::Image => &self.photo_url,
            MediaKind::Video => &self.video_url,
        };

        let response = self
            .client
            .get(url)
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", &per_page.to_string()),
                ("orientation", "landscape"),
            ])
            .send()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VideoError::from_status(self.backend_name(), status, &text));
        }

        match kind {
            MediaKind::Image => {
                let parsed: PhotoSearchResponse = response
                    .json()
                    .await
                    .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

                Ok(parsed
                    .photos
                    .into_iter()
                    .map(|photo| MediaCandidate {
                        url: photo.src.large2x.unwrap_or(photo.src.original),
                        width: photo.width,
                        height: photo.height,
                        kind: MediaKind::Image,
                    })
                    .collect())
            }
            MediaKind::Video => {
                let parsed: VideoSearchResponse = response
                    .json()
                    .await
                    .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

                // First file per video is the provider's preferred rendition
                Ok(parsed
                    .videos
                    .into_iter()
                    .filter_map(|video| video.video_files.into_iter().next())
                    .map(|file| MediaCandidate {
                        url: file.link,
                        width: file.width.unwrap_or(0),
                        height: file.height.unwrap_or(0),
                        kind: MediaKind::Video,
                    })
                    .collect())
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "pexels"
    }
}
