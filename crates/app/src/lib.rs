use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use videval_core::asset::Asset;
use videval_core::config::{self, AppConfig};
use videval_core::engines::command::CommandEngine;
use videval_core::executor::Executor;
use videval_core::logging::{self, FileSinkPlan, LoggingInitOptions};
use videval_core::store::FileSystemResultStore;

#[derive(Parser)]
#[command(name = "videval", about = "Cached media quality metric runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute (or fetch cached) results for a batch of assets.
    Run(RunArgs),
    /// Delete the cached results for a batch of assets.
    Clean(CleanArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(help = "Path to a JSON file holding the asset batch")]
    batch: PathBuf,
    #[arg(long, help = "Config file (defaults to <data-dir>/config.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Result cache directory (defaults to <data-dir>/results)")]
    store: Option<PathBuf>,
    #[arg(long, help = "Materialize workfiles on disk instead of named pipes")]
    no_fifo: bool,
    #[arg(long, help = "Keep workfiles and log artifacts after each run")]
    keep_workfiles: bool,
    #[arg(long, help = "Fan assets out across a worker pool")]
    parallelize: bool,
    #[arg(long, value_name = "N", help = "Worker pool size")]
    workers: Option<usize>,
}

#[derive(Args)]
struct CleanArgs {
    #[arg(help = "Path to a JSON file holding the asset batch")]
    batch: PathBuf,
    #[arg(long, help = "Config file (defaults to <data-dir>/config.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Result cache directory (defaults to <data-dir>/results)")]
    store: Option<PathBuf>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = config::data_dir(cli.data_dir.as_deref());
    init_logging(&data_dir, cli.verbose, cli.log_filter.as_deref());

    match cli.command {
        Commands::Run(args) => run_batch(args, &data_dir),
        Commands::Clean(args) => clean_batch(args, &data_dir),
    }
}

fn init_logging(data_dir: &Path, verbose: u8, cli_log_filter: Option<&str>) {
    let options = LoggingInitOptions {
        data_dir: Some(data_dir.to_path_buf()),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };

    let filters = logging::compose_logging_filters(&options);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(&filters.console_filter));

    match logging::build_file_sink_plan(&options) {
        FileSinkPlan::Ready(ready) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(ready.appender)
                .with_filter(EnvFilter::new(&filters.file_filter));
            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        FileSinkPlan::Fallback(fallback) => {
            tracing_subscriber::registry().with(console_layer).init();
            warn!("file logging disabled: {}", fallback.reason);
        }
    }
}

fn load_app_config(override_path: Option<&Path>, data_dir: &Path) -> Result<AppConfig> {
    let path = override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config::config_path(data_dir));
    AppConfig::load_from_path(&path)
}

fn load_assets(path: &Path) -> Result<Vec<Asset>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read asset batch: {}", path.display()))?;
    let assets: Vec<Asset> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse asset batch: {}", path.display()))?;
    if assets.is_empty() {
        bail!("asset batch is empty: {}", path.display());
    }
    Ok(assets)
}

fn build_executor(
    mut app_config: AppConfig,
    store_dir: PathBuf,
) -> Result<Executor<CommandEngine>> {
    let spec = app_config.engine.take().context(
        "no [engine] section configured; declare the metric command in config.toml",
    )?;
    let engine = CommandEngine::new(spec);
    let store = FileSystemResultStore::new(store_dir);
    Ok(Executor::new(engine, Some(Box::new(store)), app_config.runner))
}

fn apply_run_overrides(app_config: &mut AppConfig, args: &RunArgs) {
    if args.no_fifo {
        app_config.runner.fifo_mode = false;
    }
    if args.keep_workfiles {
        app_config.runner.delete_workdir = false;
    }
    if args.parallelize {
        app_config.runner.parallelize = true;
    }
    if let Some(workers) = args.workers {
        app_config.runner.workers = Some(workers);
    }
}

fn run_batch(args: RunArgs, data_dir: &Path) -> Result<()> {
    let mut app_config = load_app_config(args.config.as_deref(), data_dir)?;
    apply_run_overrides(&mut app_config, &args);

    let store_dir = args
        .store
        .clone()
        .unwrap_or_else(|| data_dir.join("results"));
    let executor = build_executor(app_config, store_dir)?;
    let assets = load_assets(&args.batch)?;

    info!(
        id = executor.computation_id(),
        assets = assets.len(),
        "starting batch run"
    );
    let results = executor.run(&assets);

    let mut failed = 0usize;
    for (asset, result) in assets.iter().zip(&results) {
        let line = match result {
            Ok(result) => serde_json::json!({
                "asset": asset.canonical_string(),
                "scores": &result.scores,
            }),
            Err(error) => {
                failed += 1;
                serde_json::json!({
                    "asset": asset.canonical_string(),
                    "error": error.to_string(),
                })
            }
        };
        println!("{line}");
    }

    if failed > 0 {
        bail!("{failed} of {} assets failed", assets.len());
    }
    Ok(())
}

fn clean_batch(args: CleanArgs, data_dir: &Path) -> Result<()> {
    let app_config = load_app_config(args.config.as_deref(), data_dir)?;
    let store_dir = args
        .store
        .clone()
        .unwrap_or_else(|| data_dir.join("results"));
    let executor = build_executor(app_config, store_dir)?;
    let assets = load_assets(&args.batch)?;

    executor.remove_results(&assets)?;
    info!(
        id = executor.computation_id(),
        assets = assets.len(),
        "cached results removed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use videval_core::engines::command::CommandEngineSpec;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["videval", "run", "batch.json"];
        argv.extend_from_slice(extra);
        let cli = Cli::try_parse_from(argv).expect("cli should parse");
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn run_flags_override_config() {
        let mut app_config = AppConfig::default();
        assert!(app_config.runner.fifo_mode);
        assert!(app_config.runner.delete_workdir);

        let args = run_args(&["--no-fifo", "--keep-workfiles", "--parallelize", "--workers", "3"]);
        apply_run_overrides(&mut app_config, &args);

        assert!(!app_config.runner.fifo_mode);
        assert!(!app_config.runner.delete_workdir);
        assert!(app_config.runner.parallelize);
        assert_eq!(app_config.runner.workers, Some(3));
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let mut app_config = AppConfig::default();
        let args = run_args(&[]);
        apply_run_overrides(&mut app_config, &args);
        assert_eq!(app_config, AppConfig::default());
    }

    #[test]
    fn load_assets_rejects_empty_batches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let batch = temp.path().join("batch.json");
        fs::write(&batch, "[]").expect("batch should be written");

        let error = load_assets(&batch).expect_err("empty batch should fail");
        assert!(error.to_string().contains("empty"));
    }

    #[test]
    fn load_assets_parses_a_batch_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let batch = temp.path().join("batch.json");
        fs::write(
            &batch,
            r#"[{
                "ref_path": "/media/a.yuv",
                "dis_path": "/media/b.yuv",
                "workdir": "/tmp/w",
                "ref_format": {"raw": {"pix_fmt": "yuv420p"}},
                "dis_format": {"raw": {"pix_fmt": "yuv420p"}},
                "ref_size": {"width": 576, "height": 324},
                "dis_size": {"width": 576, "height": 324},
                "quality": {"width": 384, "height": 216}
            }]"#,
        )
        .expect("batch should be written");

        let assets = load_assets(&batch).expect("batch should parse");
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].ref_path, PathBuf::from("/media/a.yuv"));
    }

    #[test]
    fn executor_requires_an_engine_section() {
        let error = build_executor(AppConfig::default(), PathBuf::from("/tmp/results"))
            .expect_err("missing engine section should fail");
        assert!(error.to_string().contains("[engine]"));
    }

    #[test]
    fn executor_builds_from_a_complete_config() {
        let app_config = AppConfig {
            engine: Some(CommandEngineSpec {
                kind: "psnr".to_string(),
                version: "1.0".to_string(),
                command: PathBuf::from("/usr/local/bin/psnr_tool"),
                args: vec!["{ref}".to_string(), "{dis}".to_string()],
                capability: Default::default(),
            }),
            ..Default::default()
        };

        let executor = build_executor(app_config, PathBuf::from("/tmp/results"))
            .expect("executor should build");
        assert_eq!(executor.computation_id(), "psnr_V1.0");
    }
}
