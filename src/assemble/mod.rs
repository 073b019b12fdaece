use std::path::{Path, PathBuf};
use std::process::Stdio;

use rand::seq::SliceRandom;
use tempfile::TempDir;
use tokio::process::Command;

use crate::media::MediaKind;
use crate::pipeline::{PlannedSegment, VideoKind, VideoPlan};
use crate::script::SegmentRole;
use crate::utils::chapter_timestamp;
use crate::{Result, VideoError};

/// Output canvas per video kind
fn canvas(kind: VideoKind) -> (u32, u32) {
    match kind {
        VideoKind::Long => (1920, 1080),
        VideoKind::Short => (1080, 1920),
    }
}

/// Video assembler
///
/// Consumes one video plan and renders the final file with ffmpeg. Each
/// segment's visual track is stretched or trimmed to its narration duration,
/// segments are concatenated in plan order, and an optional background music
/// track is mixed underneath at reduced volume.
pub struct VideoAssembler {
    background_music: Vec<String>,
}

impl VideoAssembler {
    pub fn new(background_music: Vec<String>) -> Self {
        Self { background_music }
    }

    /// Render the plan into `output`; returns the written path
    pub async fn render(&self, plan: &VideoPlan, output: &Path) -> Result<PathBuf> {
        if plan.segments.is_empty() {
            return Err(VideoError::Assembly("plan has no segments".to_string()));
        }

        let scratch = TempDir::new()
            .map_err(|e| VideoError::Assembly(format!("failed to create scratch dir: {e}")))?;

        let mut clips = Vec::with_capacity(plan.segments.len());
        for segment in &plan.segments {
            let clip = self.render_segment(plan.kind, segment, scratch.path()).await?;
            clips.push(clip);
        }

        self.concat_segments(&clips, plan, scratch.path(), output)
            .await?;

        if plan.kind == VideoKind::Long {
            let chapters_path = output.with_extension("chapters.txt");
            fs_err::write(&chapters_path, chapter_listing(plan))?;
            tracing::info!("Chapter listing written to {}", chapters_path.display());
        }

        Ok(output.to_path_buf())
    }

    /// Render one segment: visuals matched to the narration duration
    async fn render_segment(
        &self,
        kind: VideoKind,
        segment: &PlannedSegment,
        scratch: &Path,
    ) -> Result<PathBuf> {
        let index = segment.descriptor.index;
        let duration = segment.narration.duration_secs;
        let (width, height) = canvas(kind);

        let audio_path = scratch.join(format!(
            "narration_{index}.{}",
            audio_extension(&segment.narration.audio)
        ));
        fs_err::write(&audio_path, &segment.narration.audio)?;

        let clip_path = scratch.join(format!("segment_{index}.mp4"));
        let scale_filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height}"
        );

        let video_input = segment
            .visuals
            .iter()
            .find(|v| v.kind == MediaKind::Video);

        if let Some(clip) = video_input {
            // Loop the stock clip out to the narration length, then trim
            run_ffmpeg(&[
                "-y".into(),
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                clip.path.to_string_lossy().into_owned(),
                "-i".into(),
                audio_path.to_string_lossy().into_owned(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "1:a".into(),
                "-vf".into(),
                scale_filter,
                "-t".into(),
                format!("{duration:.3}"),
                "-r".into(),
                "30".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                clip_path.to_string_lossy().into_owned(),
            ])
            .await?;
        } else {
            // Slideshow: every image holds an equal share of the narration
            let list_path = scratch.join(format!("images_{index}.txt"));
            fs_err::write(
                &list_path,
                slideshow_list(&segment.visuals, duration),
            )?;

            run_ffmpeg(&[
                "-y".into(),
                "-f".into(),
                "concat".into(),
                "-safe".into(),
                "0".into(),
                "-i".into(),
                list_path.to_string_lossy().into_owned(),
                "-i".into(),
                audio_path.to_string_lossy().into_owned(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "1:a".into(),
                "-vf".into(),
                scale_filter,
                "-t".into(),
                format!("{duration:.3}"),
                "-r".into(),
                "30".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                clip_path.to_string_lossy().into_owned(),
            ])
            .await?;
        }

        Ok(clip_path)
    }

    /// Concatenate segment clips in plan order and mix in background music
    async fn concat_segments(
        &self,
        clips: &[PathBuf],
        plan: &VideoPlan,
        scratch: &Path,
        output: &Path,
    ) -> Result<()> {
        let list_path = scratch.join("segments.txt");
        fs_err::write(&list_path, concat_list(clips))?;

        let music = self.pick_music(scratch).await;

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.to_string_lossy().into_owned(),
        ];

        if let Some(music_path) = &music {
            args.extend([
                "-i".into(),
                music_path.to_string_lossy().into_owned(),
                "-filter_complex".into(),
                "[1:a]volume=0.1[bg];[0:a][bg]amix=inputs=2:duration=first[aout]".into(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[aout]".into(),
            ]);
        } else {
            args.extend(["-c:v".into(), "copy".into()]);
        }

        args.extend([
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ]);

        run_ffmpeg(&args).await?;
        tracing::info!(
            "Rendered {} ({} segments) to {}",
            plan.title,
            plan.segments.len(),
            output.display()
        );
        Ok(())
    }

    /// Download one randomly picked background music track, if configured
    async fn pick_music(&self, scratch: &Path) -> Option<PathBuf> {
        let url = self
            .background_music
            .choose(&mut rand::thread_rng())?
            .clone();

        let path = scratch.join("music.mp3");
        let response = reqwest::get(&url).await.ok()?;
        if !response.status().is_success() {
            tracing::warn!("Background music download failed: HTTP {}", response.status());
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        fs_err::write(&path, &bytes).ok()?;
        Some(path)
    }
}

/// Concat demuxer entry list for the final join
fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", escape_concat_path(clip)))
        .collect()
}

/// Concat demuxer list for an image slideshow
///
/// Each image holds narration_duration / image_count seconds; the last
/// entry is repeated because the demuxer ignores the final duration.
fn slideshow_list(visuals: &[crate::media::VisualAsset], total_duration: f64) -> String {
    let count = visuals.len().max(1);
    let per_image = total_duration / count as f64;

    let mut list = String::new();
    for visual in visuals {
        list.push_str(&format!(
            "file '{}'\nduration {per_image:.3}\n",
            escape_concat_path(&visual.path)
        ));
    }
    if let Some(last) = visuals.last() {
        list.push_str(&format!("file '{}'\n", escape_concat_path(&last.path)));
    }
    list
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Sniff whether narration bytes are a WAV or an mp3 payload
fn audio_extension(audio: &[u8]) -> &'static str {
    if audio.starts_with(b"RIFF") {
        "wav"
    } else {
        "mp3"
    }
}

/// Chapter listing with cumulative narration offsets, one line per segment
pub fn chapter_listing(plan: &VideoPlan) -> String {
    let mut text = String::new();
    let mut offset = 0.0;

    for segment in &plan.segments {
        let label = match segment.descriptor.role {
            SegmentRole::Intro => "intro",
            SegmentRole::Outro => "outro",
            SegmentRole::Body { .. } => segment.descriptor.title.as_str(),
        };
        text.push_str(&format!("{} {}\n", chapter_timestamp(offset), label));
        offset += segment.narration.duration_secs;
    }

    text
}

async fn run_ffmpeg(args: &[String]) -> Result<()> {
    tracing::debug!("ffmpeg {}", args.join(" "));

    let output = Command::new("ffmpeg")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| VideoError::Assembly(format!("failed to launch ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VideoError::Assembly(format!("ffmpeg failed: {stderr}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VisualAsset;
    use crate::script::SegmentDescriptor;
    use crate::tts::{BackendUsed, NarrationResult};

    fn planned_segment(index: usize, role: SegmentRole, title: &str, duration: f64) -> PlannedSegment {
        PlannedSegment {
            descriptor: SegmentDescriptor {
                index,
                role,
                title: title.to_string(),
                narration_text: "text".to_string(),
                search_terms: vec!["term".to_string()],
                speaker: None,
            },
            narration: NarrationResult {
                segment_index: index,
                audio: vec![0xFF, 0xFB, 0x00],
                duration_secs: duration,
                backend: BackendUsed::Primary,
            },
            visuals: Vec::new(),
            degraded: false,
        }
    }

    fn plan() -> VideoPlan {
        VideoPlan {
            title: "Top 2 things".to_string(),
            kind: VideoKind::Long,
            segments: vec![
                planned_segment(0, SegmentRole::Intro, "Intro", 10.0),
                planned_segment(1, SegmentRole::Body { rank: 2 }, "Second best", 65.0),
                planned_segment(2, SegmentRole::Body { rank: 1 }, "The best", 62.0),
                planned_segment(3, SegmentRole::Outro, "Outro", 8.0),
            ],
            degraded_count: 0,
        }
    }

    #[test]
    fn test_chapter_listing_accumulates_offsets() {
        let listing = chapter_listing(&plan());
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(
            lines,
            vec![
                "00:00 intro",
                "00:10 Second best",
                "01:15 The best",
                "02:17 outro",
            ]
        );
    }

    #[test]
    fn test_audio_extension_sniff() {
        assert_eq!(audio_extension(b"RIFF....WAVE"), "wav");
        assert_eq!(audio_extension(&[0xFF, 0xFB, 0x90]), "mp3");
    }

    #[test]
    fn test_slideshow_list_divides_duration() {
        let visuals: Vec<VisualAsset> = (0..4)
            .map(|i| VisualAsset {
                segment_index: 0,
                kind: MediaKind::Image,
                path: PathBuf::from(format!("/tmp/img_{i}.jpg")),
                width: 1280,
                height: 720,
                source: "test".to_string(),
            })
            .collect();

        let list = slideshow_list(&visuals, 10.0);
        assert_eq!(list.matches("duration 2.500").count(), 4);
        // Final frame repeated without a duration entry
        assert_eq!(list.matches("file '/tmp/img_3.jpg'").count(), 2);
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/tmp/it's here.mp4")]);
        assert!(list.contains(r"it'\''s here"));
    }

    #[tokio::test]
    async fn test_render_rejects_empty_plan() {
        let assembler = VideoAssembler::new(Vec::new());
        let empty = VideoPlan {
            title: "empty".to_string(),
            kind: VideoKind::Long,
            segments: Vec::new(),
            degraded_count: 0,
        };

        let err = assembler
            .render(&empty, Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::Assembly(_)));
    }
}
