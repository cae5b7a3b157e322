use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use retouch_contracts::{Capability, ImageArtifact, Provider};
use retouch_engine::{
    create_image_editor, supported_providers, EditOptions, EditorConfig, EditorContext,
    UnsupportedModelPolicy,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit code for an edit that completed without producing an image.
const EXIT_NO_IMAGE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "retouch-rs", version, about = "Prompt-driven image edits across providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the providers an editor can be built for.
    Providers,
    /// List registered models.
    Models(ModelsArgs),
    /// Edit one image with a prompt and write the result.
    Edit(EditArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CapabilityArg {
    ImageGeneration,
    ImageEdit,
}

impl From<CapabilityArg> for Capability {
    fn from(value: CapabilityArg) -> Self {
        match value {
            CapabilityArg::ImageGeneration => Capability::ImageGeneration,
            CapabilityArg::ImageEdit => Capability::ImageEdit,
        }
    }
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,
    #[arg(long, value_enum)]
    capability: Option<CapabilityArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    prompt: String,
    /// Local path or http(s) URL of the source image.
    #[arg(long)]
    image: String,
    #[arg(long)]
    out: PathBuf,
    /// Provider option as key=value; JSON values are parsed, anything else is a string.
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    options: Vec<(String, Value)>,
    /// Fail instead of warning when the model is not registered for edits.
    #[arg(long)]
    strict_model: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Providers => {
            for provider in supported_providers() {
                println!(
                    "{}\t{}\t{}",
                    provider,
                    provider.display_name(),
                    provider.default_model()
                );
            }
            Ok(0)
        }
        Command::Models(args) => run_models(args),
        Command::Edit(args) => run_edit(args).await,
    }
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let context = EditorContext::from_env();
    let models = context
        .registry
        .list_models(args.provider, args.capability.map(Capability::from));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(0);
    }
    for model in models {
        let capabilities = model
            .capabilities
            .iter()
            .map(Capability::as_str)
            .collect::<Vec<&str>>()
            .join(",");
        println!(
            "{}\t{}\t{}\t{}",
            model.id,
            model.provider,
            model.label(),
            capabilities
        );
    }
    Ok(0)
}

async fn run_edit(args: EditArgs) -> Result<i32> {
    let context = EditorContext::from_env();
    let mut config = EditorConfig::new();
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    if args.strict_model {
        config = config.with_policy(UnsupportedModelPolicy::Reject);
    }
    let editor = create_image_editor(&args.provider, config, &context)?;
    if !editor.is_supported() {
        eprintln!(
            "warning: model '{}' is not registered for image edits on {}",
            editor.model(),
            editor.provider()
        );
    }

    let image = ImageArtifact::from_location(args.image.clone())?;
    let options = args.options.into_iter().collect::<EditOptions>();
    debug!(options = options.len(), "running edit");
    let edited = editor.edit_image(&args.prompt, &image, options).await?;

    let (code, summary) = finish_edit(editor.provider(), editor.model(), &edited, &args.out)?;
    println!("{summary}");
    if code == EXIT_NO_IMAGE {
        eprintln!("retouch-rs: provider returned no image");
    }
    Ok(code)
}

/// Writes a produced image to `out`; returns the exit code and the summary line.
fn finish_edit(
    provider: Provider,
    model: &str,
    edited: &ImageArtifact,
    out: &Path,
) -> Result<(i32, Value)> {
    let summary = |written: Option<&Path>| {
        json!({
            "provider": provider,
            "model": model,
            "out": written.map(|path| path.to_string_lossy().to_string()),
            "metadata": edited.metadata(),
        })
    };
    if edited.is_empty() {
        return Ok((EXIT_NO_IMAGE, summary(None)));
    }
    let bytes = edited.data().unwrap_or_default();
    if let Some(parent) = out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(out, bytes).with_context(|| format!("failed writing {}", out.display()))?;
    Ok((0, summary(Some(out))))
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    value.parse::<Provider>().map_err(|err| err.to_string())
}

fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{raw}'"));
    }
    let value = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
