use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use rfshot::server::{self, ServerConfig};
use rfshot::simulated::{SimulatedFactory, SimulatedPage};
use rfshot::{CaptureRequest, CaptureService, PipelineSettings, SessionFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rfshot", version, about = "Full-page scroll-and-stitch screenshots")]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BackendArgs {
    /// Chrome/Chromium executable (auto-detected when omitted)
    #[arg(long, global = true, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Run Chrome with its sandbox enabled
    #[arg(long, global = true)]
    sandbox: bool,

    /// Use Chrome's one-shot full-page capture instead of scrolling and stitching
    #[arg(long, global = true)]
    native_full_page: bool,

    /// Serve from a simulated page of this height instead of launching Chrome
    #[arg(long, global = true, value_name = "HEIGHT_PX")]
    simulate: Option<u32>,

    /// Smallest scroll step before falling back to 3/4 of the viewport
    #[arg(long, global = true, default_value_t = rfshot::scheduler::DEFAULT_MIN_STEP_PX)]
    min_step_px: u32,

    /// Pause between presentation scripts and the asset wait
    #[arg(long, global = true, default_value_t = 600)]
    asset_settle_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP capture service
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Maximum concurrently open browser sessions (defaults to CPU count)
        #[arg(long)]
        max_sessions: Option<usize>,
    },

    /// Capture one page and write the image to disk
    Capture {
        url: String,

        #[arg(short, long, default_value = "screenshot.jpg")]
        out: PathBuf,

        #[arg(long)]
        width: Option<i64>,

        #[arg(long)]
        height: Option<i64>,

        #[arg(long)]
        overlap: Option<i64>,

        #[arg(long)]
        settle_ms: Option<i64>,

        #[arg(long)]
        timeout_ms: Option<i64>,

        /// "jpeg" or "png"; defaults from the output file extension
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        quality: Option<i64>,

        #[arg(long)]
        block_media: bool,
    },
}

impl BackendArgs {
    fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            min_step_px: self.min_step_px,
            asset_settle: Duration::from_millis(self.asset_settle_ms),
            ..Default::default()
        }
    }

    fn factory(&self) -> Result<Arc<dyn SessionFactory>> {
        if let Some(height) = self.simulate {
            log::warn!("Using simulated {}px page instead of Chrome", height);
            return Ok(Arc::new(SimulatedFactory::new(SimulatedPage::new(height))));
        }
        self.chrome()
    }

    #[cfg(feature = "cdp")]
    fn chrome(&self) -> Result<Arc<dyn SessionFactory>> {
        let browser = rfshot::cdp::CdpBrowser::launch(rfshot::cdp::CdpConfig {
            chrome_path: self.chrome_path.clone(),
            sandbox: self.sandbox,
            native_full_page: self.native_full_page,
        })
        .context("Failed to start headless Chrome")?;
        Ok(Arc::new(browser))
    }

    #[cfg(not(feature = "cdp"))]
    fn chrome(&self) -> Result<Arc<dyn SessionFactory>> {
        anyhow::bail!("built without the `cdp` feature; use --simulate <HEIGHT_PX>")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("headless_chrome", log::LevelFilter::Warn)
        .init();

    let cli = Cli::parse();
    let factory = cli.backend.factory()?;
    let settings = cli.backend.settings();

    match cli.command {
        Commands::Serve {
            host,
            port,
            max_sessions,
        } => {
            let max_sessions = max_sessions.unwrap_or_else(num_cpus::get);
            let service = Arc::new(CaptureService::new(factory, max_sessions, settings));
            server::serve(&ServerConfig { host, port }, service).await?;
        }
        Commands::Capture {
            url,
            out,
            width,
            height,
            overlap,
            settle_ms,
            timeout_ms,
            format,
            quality,
            block_media,
        } => {
            let format = format.or_else(|| {
                out.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
            });
            let request = CaptureRequest::from_body(rfshot::request::CaptureRequestBody {
                url: Some(url),
                timeout_ms,
                viewport_width: width,
                viewport_height: height,
                settle_delay_ms: settle_ms,
                overlap_px: overlap,
                image_format: format,
                jpeg_quality: quality,
                block_media: Some(block_media),
                wait_until_netidle: None,
            })?;

            let service = CaptureService::new(factory, 1, settings);
            let result = service.capture(request).await?;

            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&result.screenshot_base64)
                .context("Captured image was not valid base64")?;
            std::fs::write(&out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;

            println!("Title: {}", result.title);
            println!("URL: {}", result.final_url);
            println!("Page height: {}px", result.total_height_px);
            println!("Saved {} ({} bytes) to {}", result.content_type, bytes.len(), out.display());
        }
    }

    Ok(())
}
