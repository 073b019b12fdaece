use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tubeforge",
    about = "TubeForge - Turn a topic into a finished video with AI script, stock media, and narration",
    version,
    long_about = "A CLI tool that produces complete videos from a single topic. A generative-text backend writes the script, stock media providers supply the visuals, a TTS backend narrates every segment, and ffmpeg assembles the final file."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a long-form countdown video for a topic
    Generate {
        /// Video topic. Example: "survival video games"
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// General category the topic belongs to. Example: "video games"
        #[arg(short, long, default_value = "")]
        general_topic: String,

        /// Target video length in minutes
        #[arg(short, long, default_value = "5")]
        time: u64,

        /// Narration language
        #[arg(short, long, default_value = "english")]
        language: String,

        /// Rotate narration voices across segments
        #[arg(long)]
        multi_speaker: bool,

        /// Output file path (derived from the topic if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Generate a short vertical video for a topic
    Short {
        /// Video topic. Example: "retro arcade games"
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Target video length in seconds
        #[arg(short, long, default_value = "30")]
        time: u64,

        /// Narration language
        #[arg(short, long, default_value = "english")]
        language: String,

        /// Output file path (derived from the topic if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Configure provider credentials and settings
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List the backends each pipeline stage can use
    Backends,
}
