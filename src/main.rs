use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubeforge::assemble::VideoAssembler;
use tubeforge::error::{Result as VideoResult, VideoError};
use tubeforge::pipeline::{Pipeline, TopicRequest, VideoKind, VideoPlan};
use tubeforge::utils;
use tubeforge::{Cli, Commands, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubeforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Check for required external dependencies (non-fatal, tools may appear later)
    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - rendering will fail without them)");
    }

    let config = Config::load().await?;

    match cli.command {
        Commands::Generate {
            topic,
            general_topic,
            time,
            language,
            multi_speaker,
            output,
        } => {
            let request = TopicRequest {
                topic: topic.clone(),
                general_topic,
                target_duration: Duration::from_secs(time * 60),
                language,
                multi_speaker,
                kind: VideoKind::Long,
            };
            let output = output.unwrap_or_else(|| default_output(&topic, VideoKind::Long));
            run_pipeline(config, request, output, cli.quiet).await?;
        }
        Commands::Short {
            topic,
            time,
            language,
            output,
        } => {
            let request = TopicRequest {
                topic: topic.clone(),
                general_topic: String::new(),
                target_duration: Duration::from_secs(time),
                language,
                multi_speaker: false,
                kind: VideoKind::Short,
            };
            let output = output.unwrap_or_else(|| default_output(&topic, VideoKind::Short));
            run_pipeline(config, request, output, cli.quiet).await?;
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Edit the config file directly:");
                println!("  {}", dirs::config_dir().map(|d| d.join("tubeforge").join("config.yaml").display().to_string()).unwrap_or_else(|| "config.yaml".to_string()));
            }
        }
        Commands::Backends => {
            println!("Pipeline backends:");
            println!("  Script:    Gemini (primary), Claude (fallback), built-in template (last resort)");
            println!("  Narration: edge-tts CLI (primary), Gemini TTS (fallback)");
            println!("  Media:     Pexels (images and video clips)");
            println!("  Assembly:  ffmpeg");
        }
    }

    Ok(())
}

fn default_output(topic: &str, kind: VideoKind) -> PathBuf {
    let suffix = match kind {
        VideoKind::Long => "",
        VideoKind::Short => "_short",
    };
    PathBuf::from(format!(
        "TubeForge_{}{}.mp4",
        utils::sanitize_filename(topic).replace(' ', "_"),
        suffix
    ))
}

async fn run_pipeline(
    config: Config,
    request: TopicRequest,
    output: PathBuf,
    quiet: bool,
) -> Result<()> {
    let keep_workdir = config.app.keep_workdir;
    let music = config.media.background_music.clone();
    let pipeline = Pipeline::new(config)?;

    // Ctrl-C cancels the run; in-flight calls are abandoned and the working
    // directory is still cleaned up.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };

    progress.set_message(format!("Producing video plan for '{}'...", request.topic));
    tracing::info!("Starting {} video run for '{}'", kind_label(request.kind), request.topic);

    let plan: VideoResult<VideoPlan> = pipeline.run_with_shutdown(request, shutdown_rx).await;
    let plan = match plan {
        Ok(plan) => plan,
        Err(VideoError::Cancelled) => {
            progress.finish_with_message("Run cancelled");
            anyhow::bail!("Run cancelled");
        }
        Err(err) => {
            progress.finish_with_message("Run failed");
            return Err(err.into());
        }
    };

    progress.set_message(format!("Rendering {} segments...", plan.segments.len()));

    let assembler = VideoAssembler::new(music);
    let rendered = assembler.render(&plan, &output).await?;

    progress.finish_with_message("Done");
    println!("Video plan: {}", plan.summary());
    if plan.degraded_count > 0 {
        println!(
            "⚠️  {} segments completed with placeholder content",
            plan.degraded_count
        );
    }
    println!("Output saved to: {}", rendered.display());

    if keep_workdir {
        let workdir = pipeline.keep_workdir();
        println!("Working directory kept at: {}", workdir.display());
    }

    Ok(())
}

fn kind_label(kind: VideoKind) -> &'static str {
    match kind {
        VideoKind::Long => "long-form",
        VideoKind::Short => "short",
    }
}
