use anyhow::Result;
use clap::{Parser, Subcommand};
use image_resizer::app::App;
use image_resizer::models::{Config, SizeRequest};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "image-resizer")]
#[command(about = "Upload images and render them at requested sizes")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload an image file and render the requested sizes.
    Upload {
        file: PathBuf,
        /// Target size as WIDTHxHEIGHT; may be repeated.
        #[arg(long = "size", value_name = "WxH", value_parser = parse_size_arg)]
        sizes: Vec<SizeRequest>,
        /// Overrides the MIME type guessed from the file extension.
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Render additional sizes for a stored image.
    Resize {
        id: String,
        #[arg(long = "size", value_name = "WxH", value_parser = parse_size_arg)]
        sizes: Vec<SizeRequest>,
    },
    /// List stored images.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

fn parse_size_arg(input: &str) -> std::result::Result<SizeRequest, String> {
    input.parse()
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("image_resizer={}", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(app: &App, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Upload {
            file,
            sizes,
            mime_type,
        } => print_json(&app.upload_file(&file, mime_type, &sizes, cancel).await?),
        Command::Resize { id, sizes } => print_json(&app.resize(&id, &sizes, cancel).await?),
        Command::List { limit, offset } => print_json(&app.list(limit, offset).await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current size");
                cancel.cancel();
            }
        }
    });

    let app = match App::new(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    match run(&app, args.command, &cancel).await {
        Ok(()) => {
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}
