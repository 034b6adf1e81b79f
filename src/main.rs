use anyhow::Context;
use clap::Parser;
use scenepress::{RenderConfig, RenderPipeline, ResponseShape, RuntimeMode};
use std::io::Read;
use std::path::PathBuf;

/// Render a scene document to a PNG image.
#[derive(Parser, Debug)]
#[command(name = "scenepress", version, about)]
struct Args {
    /// Path to the scene document JSON (reads stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where to write the response body
    #[arg(long, default_value = "render.png")]
    output: PathBuf,

    /// Emit the structured JSON body instead of raw PNG bytes
    #[arg(long)]
    structured: bool,

    /// API key for the font directory service
    #[arg(long, env = "FONT_DIRECTORY_API_KEY", default_value = "")]
    api_key: String,

    /// Persist fonts under --base-path instead of the process temp directory
    #[arg(long)]
    test_mode: bool,

    /// Root for test-mode font persistence
    #[arg(long, default_value = ".")]
    base_path: PathBuf,

    /// Delay between hydration and text correction, in milliseconds
    #[arg(long, default_value_t = 500)]
    settle_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read document from stdin")?;
            buf
        }
    };
    let document: serde_json::Value =
        serde_json::from_str(&raw).context("document is not valid JSON")?;

    let config = RenderConfig {
        api_key: args.api_key,
        mode: if args.test_mode {
            RuntimeMode::Test
        } else {
            RuntimeMode::Production
        },
        base_path: args.base_path,
        response_shape: if args.structured {
            ResponseShape::Structured
        } else {
            ResponseShape::RawImage
        },
        settle_delay_ms: args.settle_delay_ms,
        ..Default::default()
    };

    let pipeline = RenderPipeline::new(config)?;
    let response = pipeline.render(&document).await;

    for entry in &response.log {
        eprintln!("{entry}");
    }

    if response.status != 200 {
        anyhow::bail!("render failed with status {}", response.status);
    }

    std::fs::write(&args.output, &response.body)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!(
        "{} ({} bytes, {})",
        args.output.display(),
        response.body.len(),
        response.content_type
    );

    Ok(())
}
