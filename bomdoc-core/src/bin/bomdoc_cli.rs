//! BomDoc CLI
//!
//! Commands: kits, validate, bind, build
//! Outputs JSON to stdout (bind prints markup)
//! Returns 2 on validation failure, 1 on any other error

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use bomdoc_core::chromium::ChromiumEngine;
use bomdoc_core::{
    AssetSet, KitCatalog, KitDescriptor, Pipeline, PipelineConfig, PipelineError, ResourceKind,
    Result,
};

#[derive(Parser)]
#[command(name = "bomdoc-cli")]
#[command(about = "BomDoc CLI - Kit BOM Document Assembler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Kit catalog (JSON); built-in catalog when omitted
    #[arg(long, global = true)]
    kits: Option<PathBuf>,

    /// Path to templates directory; embedded templates when omitted
    #[arg(short, long, global = true)]
    templates_dir: Option<PathBuf>,

    /// Directory holding logo.png and qr-code.png
    #[arg(short, long, global = true)]
    assets_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available kits
    Kits,

    /// Validate a kit and its assets
    Validate {
        /// Kit ID
        #[arg(short, long)]
        kit: Option<String>,
    },

    /// Print the bound markup of one template
    Bind {
        /// Kit ID
        #[arg(short, long)]
        kit: Option<String>,

        /// Template ID
        #[arg(long, default_value = "table")]
        template: String,
    },

    /// Assemble the BOM document
    Build {
        /// Kit ID
        #[arg(short, long)]
        kit: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chrome/Chromium executable
        #[arg(long)]
        chrome: Option<PathBuf>,

        /// Disable the browser sandbox (containers running as root)
        #[arg(long)]
        no_sandbox: bool,

        /// Block all network name resolution in the browser
        #[arg(long)]
        offline: bool,

        /// Stability timeout per page, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Render pages one after another
        #[arg(long)]
        sequential: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };
    let catalog = match load_catalog(&cli) {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };

    match cli.command {
        Commands::Kits => {
            let kits: Vec<_> = catalog
                .list()
                .iter()
                .map(|k| {
                    serde_json::json!({
                        "id": k.id,
                        "name": k.display_name,
                        "sku": k.sku,
                        "revision": k.revision,
                        "items": k.bom.len(),
                    })
                })
                .collect();
            print_json(&kits)
        }

        Commands::Validate { kit } => {
            let result = select_kit(&catalog, kit.as_deref()).and_then(|kit| {
                let pipeline = pipeline(&config)?;
                let assets = AssetSet::load_from_dir(&config.assets_dir)?;
                Ok(pipeline.validate(&kit, &assets))
            });
            match result {
                Ok(result) => {
                    let code = print_json(&result);
                    if result.valid {
                        code
                    } else {
                        ExitCode::from(2) // Validation failure
                    }
                }
                Err(e) => report_error(&e),
            }
        }

        Commands::Bind { kit, template } => {
            let result = select_kit(&catalog, kit.as_deref()).and_then(|kit| {
                let pipeline = pipeline(&config)?;
                let assets = AssetSet::load_from_dir(&config.assets_dir)?;
                pipeline.bind(&template, &kit, &assets)
            });
            match result {
                Ok(markup) => {
                    println!("{markup}");
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(&e),
            }
        }

        Commands::Build {
            kit,
            output,
            chrome,
            no_sandbox,
            offline,
            timeout_ms,
            sequential,
        } => {
            if let Some(output) = output {
                config.output = output;
            }
            if chrome.is_some() {
                config.engine.executable = chrome;
            }
            if no_sandbox {
                config.engine.sandbox = false;
            }
            if offline {
                config.engine.offline = true;
            }
            if let Some(ms) = timeout_ms {
                config.stability.timeout_ms = ms;
            }
            if sequential {
                config.concurrent_render = false;
            }

            let kit = match select_kit(&catalog, kit.as_deref()) {
                Ok(k) => k,
                Err(e) => return report_error(&e),
            };
            let pipeline = match pipeline(&config) {
                Ok(p) => p,
                Err(e) => return report_error(&e),
            };

            log::info!("Assembling BOM for {} ({})", kit.display_name, kit.id);
            tokio::select! {
                result = pipeline.run(&kit) => match result {
                    Ok(report) => {
                        log::info!(
                            "PDF created: {} ({} pages)",
                            report.output.display(),
                            report.page_count
                        );
                        print_json(&serde_json::json!({
                            "success": true,
                            "report": report,
                        }))
                    }
                    Err(e) => report_error(&e),
                },
                _ = tokio::signal::ctrl_c() => {
                    // dropping the run future drops the session and its browser
                    log::warn!("Interrupted, rendering session torn down");
                    ExitCode::from(130)
                }
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.templates_dir {
        config.templates_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.assets_dir {
        config.assets_dir = dir.clone();
    }
    Ok(config)
}

fn load_catalog(cli: &Cli) -> Result<KitCatalog> {
    match &cli.kits {
        Some(path) => KitCatalog::load_from_file(path),
        None => KitCatalog::builtin(),
    }
}

fn pipeline(config: &PipelineConfig) -> Result<Pipeline<ChromiumEngine>> {
    Pipeline::new(config.clone(), config.engine.clone())
}

/// `--kit` wins; otherwise ask on a terminal, or take the first kit.
fn select_kit(catalog: &KitCatalog, requested: Option<&str>) -> Result<KitDescriptor> {
    match requested {
        Some(id) => catalog.get(id).cloned(),
        None if io::stdin().is_terminal() => prompt_for_kit(catalog),
        None => {
            let kit = catalog.default_kit()?;
            log::info!("No kit given, using {}", kit.id);
            Ok(kit.clone())
        }
    }
}

fn prompt_for_kit(catalog: &KitCatalog) -> Result<KitDescriptor> {
    let stdin_err = |source: io::Error| PipelineError::Io {
        path: PathBuf::from("<stdin>"),
        source,
    };

    let mut stderr = io::stderr();
    for (n, kit) in catalog.list().iter().enumerate() {
        let _ = writeln!(stderr, "  {}) {} ({})", n + 1, kit.display_name, kit.id);
    }
    let _ = write!(stderr, "Select a kit [1-{}]: ", catalog.len());
    let _ = stderr.flush();

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).map_err(stdin_err)?;
    let answer = answer.trim();

    answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| catalog.list().get(i))
        .cloned()
        .ok_or_else(|| PipelineError::not_found(ResourceKind::Kit, answer))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e.into()),
    }
}

fn report_error(err: &PipelineError) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "error": err.to_string(),
    });
    println!("{output}");
    log::error!("{err}");
    match err {
        PipelineError::Validation(_) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
