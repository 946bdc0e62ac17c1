use clap::{Parser, Subcommand};
use iiif_render::config::{self, Config};
use iiif_render::image::ImageService;
use iiif_render::imaging::ProcessRunner;
use iiif_render::transform::RenderParams;
use iiif_render::warm;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Request parameters shared by `render` and `plan`.
#[derive(clap::Args, Clone)]
struct RequestArgs {
    /// Source image identifier
    id: String,
    /// full | square | x,y,w,h | pct:x,y,w,h
    #[arg(long)]
    region: Option<String>,
    /// full | w, | ,h | w,h | !w,h | pct:n
    #[arg(long)]
    size: Option<String>,
    /// Clockwise degrees
    #[arg(long)]
    rotation: Option<String>,
    /// default | color | grey | bitonal
    #[arg(long)]
    quality: Option<String>,
    /// Output format, e.g. jpg or png
    #[arg(long)]
    format: String,
}

impl RequestArgs {
    fn params(&self) -> RenderParams {
        RenderParams {
            region: self.region.clone(),
            size: self.size.clone(),
            rotation: self.rotation.clone(),
            quality: self.quality.clone(),
            format: Some(self.format.clone()),
        }
    }
}

/// Shared flag for commands that render.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Bypass the render cache: always run the external tools
    #[arg(long)]
    no_cache: bool,
}

#[derive(Parser)]
#[command(name = "iiif-render")]
#[command(about = "Render IIIF Image API requests with ImageMagick and Kakadu")]
#[command(long_about = "\
Render IIIF Image API requests with ImageMagick and Kakadu

A request names a source image and up to five parameters:

  region    full | square | x,y,w,h | pct:x,y,w,h
  size      full | w, | ,h | w,h | !w,h | pct:n
  rotation  degrees clockwise (0 = none)
  quality   default | color | grey | bitonal
  format    jpg | png | gif | tif | webp (limited by [output] formats)

Sources are looked up by the configured resolver; rendered output is cached.

Run 'iiif-render gen-config' to generate a documented iiif-render.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./iiif-render.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log pipeline steps and executed commands to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one request and write the image
    Render {
        #[command(flatten)]
        request: RequestArgs,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Print source dimensions as JSON
    Info {
        /// Source image identifier
        id: String,
    },
    /// Print the commands a render would run, without running them
    Plan {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// Render a JSON list of requests in parallel to fill the cache
    Warm {
        /// JSON array of {"id", "region", "size", "rotation", "quality", "format"}
        requests: PathBuf,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Print a stock iiif-render.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Render {
            request,
            output,
            cache,
        } => {
            let config = load_config(config_path)?;
            let service = build_service(&config, !cache.no_cache)?;
            let bytes = service.image(request.id.as_str()).render(&request.params())?;
            match output {
                Some(path) => std::fs::write(path, &bytes)?,
                None => io::stdout().lock().write_all(&bytes)?,
            }
        }
        Command::Info { id } => {
            let config = load_config(config_path)?;
            let service = build_service(&config, false)?;
            let info = service.image(id).info()?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Command::Plan { request } => {
            let config = load_config(config_path)?;
            let service = build_service(&config, false)?;
            for command in service.image(request.id.as_str()).plan(&request.params())? {
                println!("{command}");
            }
        }
        Command::Warm { requests, cache } => {
            let config = load_config(config_path)?;
            let requests = warm::load_requests(&requests)?;
            init_thread_pool(&config.processing);
            let service = build_service(&config, !cache.no_cache)?;

            println!("==> Warming {} requests", requests.len());
            let outcomes = warm::warm(&service, requests);
            for outcome in &outcomes {
                println!("{}", warm::format_outcome(outcome));
            }
            println!("Cache: {}", service.stats());

            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            if failed > 0 {
                return Err(format!("{failed} of {} requests failed", outcomes.len()).into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// An explicit `--config` must exist; otherwise `./iiif-render.toml` is
/// optional.
fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    match path {
        Some(path) => config::load_config_file(path),
        None => config::load_config(Path::new(".")),
    }
}

fn build_service(
    config: &Config,
    use_cache: bool,
) -> Result<ImageService, Box<dyn std::error::Error>> {
    Ok(ImageService::from_config(
        config,
        Arc::new(ProcessRunner::new()),
        use_cache,
    )?)
}

/// Logs go to stderr so rendered bytes on stdout stay clean.
fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
