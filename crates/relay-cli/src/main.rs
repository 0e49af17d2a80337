mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, image::ImageSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ses-relay",
    about = "Synthesize the Fargate SES SMTP relay stack as a CloudFormation template",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from relay.yaml or .git/)
    #[arg(long, global = true, env = "RELAY_ROOT")]
    root: Option<PathBuf>,

    /// Config file (default: <root>/relay.yaml)
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default relay.yaml in the project root
    Init,

    /// Show or validate the relay configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Synthesize the template and asset manifest
    Synth {
        /// Output directory (default: <root>/relay.out)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Synthesize even when validation reports errors
        #[arg(long)]
        skip_validation: bool,

        /// Use this image tag instead of hashing the build context
        #[arg(long)]
        image_tag: Option<String>,
    },

    /// Print resources in deployment order with their dependencies
    Graph,

    /// Build the relay container image
    Image {
        #[command(subcommand)]
        subcommand: ImageSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Image { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let ctx = cmd::Context {
        root,
        config_path: cli.config,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&ctx),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
        Commands::Synth {
            out,
            skip_validation,
            image_tag,
        } => cmd::synth::run(&ctx, out, skip_validation, image_tag),
        Commands::Graph => cmd::graph::run(&ctx),
        Commands::Image { subcommand } => cmd::image::run(&ctx, subcommand),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
