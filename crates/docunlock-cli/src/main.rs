use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docunlock_core::events::tracing_sink;
use docunlock_core::{
	BatchReport, DetectionResult, DetectionStatus, Engine, EngineConfig, EventLog, Outcome,
	OutputMode, SharedSink, UnlockReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Workspaces older than this are assumed abandoned by a crashed run.
const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(
	name = "docunlock",
	version,
	about = "Detect encrypted documents and re-save them in cleartext",
	subcommand_negates_reqs = true
)]
struct Cli {
	/// Config file (defaults to the user config directory)
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Verbose logging
	#[arg(long, global = true)]
	debug: bool,
	/// Append a JSONL event trail to this file
	#[arg(long, global = true)]
	event_log: Option<PathBuf>,
	/// Override settings.max_threads
	#[arg(long, global = true)]
	threads: Option<usize>,
	#[command(subcommand)]
	command: Option<Commands>,
	/// Files to detect, unlock and re-check when no subcommand is given
	#[arg(required = true)]
	paths: Vec<PathBuf>,
	#[command(flatten)]
	recovery: RecoveryArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Detect whether files are encrypted
	Check {
		#[arg(required = true)]
		paths: Vec<PathBuf>,
		/// Descend into subdirectories
		#[arg(short, long)]
		recursive: bool,
		#[arg(long)]
		json: bool,
	},
	/// Scan a directory and summarize what was found
	Scan {
		dir: PathBuf,
		/// Only look at the directory's direct children
		#[arg(long)]
		no_recursive: bool,
		#[arg(long)]
		json: bool,
	},
	/// Detect, then re-save every encrypted file with the external program
	Unlock {
		#[arg(required = true)]
		paths: Vec<PathBuf>,
		#[arg(short, long)]
		recursive: bool,
		#[command(flatten)]
		recovery: RecoveryArgs,
	},
	/// Unlock an explicit list of files
	BatchUnlock {
		#[arg(required = true)]
		files: Vec<PathBuf>,
		#[command(flatten)]
		recovery: RecoveryArgs,
	},
	/// Inspect or edit the configuration file
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
}

#[derive(clap::Args, Debug)]
struct RecoveryArgs {
	/// External program used to re-save files
	#[arg(long)]
	program: Option<PathBuf>,
	/// Per-file timeout in seconds
	#[arg(long)]
	timeout: Option<u64>,
	/// Replace the original instead of writing `<name>_decrypted.<ext>` next to it
	#[arg(long)]
	replace: bool,
	#[arg(long)]
	json: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
	/// Print the effective configuration
	Show,
	/// Print the config file location
	Path,
	/// Write the default configuration
	Init {
		/// Overwrite an existing file
		#[arg(long)]
		force: bool,
	},
	/// Register a document extension
	AddExtension { ext: String },
	/// Register a header prefix (hex) with a label; labels containing ENCRYPTED mark encrypted files
	AddHeader { hex: String, label: String },
}

#[derive(Serialize)]
struct UnlockOutput<'a> {
	report: &'a UnlockReport,
	/// Detection of each recovered file after the fact
	rechecks: Vec<DetectionResult>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let config_path = match &cli.config {
		Some(path) => path.clone(),
		None => EngineConfig::default_path()?,
	};

	if let Some(Commands::Config { action }) = &cli.command {
		init_tracing(cli.debug);
		return run_config(action, &config_path);
	}

	let mut config = EngineConfig::load_or_default(&config_path)
		.with_context(|| format!("Failed to load config {}", config_path.display()))?;
	init_tracing(cli.debug || config.settings.debug);

	if let Some(threads) = cli.threads {
		config.settings.max_threads = threads;
	}

	let sink: SharedSink = match &cli.event_log {
		Some(path) => Arc::new(
			EventLog::with_file(path)
				.with_context(|| format!("Failed to open event log {}", path.display()))?,
		),
		None => tracing_sink(),
	};

	let Some(command) = cli.command else {
		apply_recovery_args(&mut config, &cli.recovery);
		return run_unlock(config, sink, &cli.paths, false, cli.recovery.json);
	};

	match command {
		Commands::Check { paths, recursive, json } => {
			let mut engine = Engine::from_config(config, sink)?;
			let report = run_scan(&mut engine, &paths, recursive, json)?;
			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				for result in &report.results {
					print_detection(result);
				}
				print_cancelled(report.cancelled);
			}
		}
		Commands::Scan { dir, no_recursive, json } => {
			let mut engine = Engine::from_config(config, sink)?;
			let report = run_scan(&mut engine, &[dir.clone()], !no_recursive, json)?;
			let summary = report.summary();
			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				println!("🔍 Scanned: {}", dir.display());
				for result in report.encrypted() {
					println!("   🔒 {}", result.path.display());
				}
				println!("📊 Total: {}", summary.total);
				println!("🔒 Encrypted: {}", summary.encrypted);
				println!("🔓 Unencrypted: {}", summary.unencrypted);
				println!("❔ Unrecognized: {}", summary.unrecognized);
				println!("❌ Errors: {}", summary.errors);
				print_cancelled(report.cancelled);
			}
		}
		Commands::Unlock { paths, recursive, recovery } => {
			apply_recovery_args(&mut config, &recovery);
			run_unlock(config, sink, &paths, recursive, recovery.json)?;
		}
		Commands::BatchUnlock { files, recovery } => {
			apply_recovery_args(&mut config, &recovery);
			run_unlock(config, sink, &files, false, recovery.json)?;
		}
		Commands::Config { .. } => {}
	}
	Ok(())
}

fn init_tracing(debug: bool) {
	let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();
}

fn apply_recovery_args(config: &mut EngineConfig, args: &RecoveryArgs) {
	if let Some(program) = &args.program {
		config.settings.external_program_path = Some(program.clone());
	}
	if let Some(timeout) = args.timeout {
		config.settings.timeout_secs = timeout;
	}
	if args.replace {
		config.settings.output_mode = OutputMode::Replace;
	}
}

fn run_scan(engine: &mut Engine, paths: &[PathBuf], recursive: bool, quiet: bool) -> Result<BatchReport> {
	let pb = progress_bar(quiet);
	let bar = pb.clone();
	engine.set_progress_callback(move |progress| {
		bar.set_length(progress.total as u64);
		bar.set_position(progress.completed as u64);
	});
	install_ctrlc(engine)?;

	let report = engine.scan(paths, recursive);
	pb.finish_and_clear();
	Ok(report)
}

fn run_unlock(config: EngineConfig, sink: SharedSink, paths: &[PathBuf], recursive: bool, json: bool) -> Result<()> {
	let mut engine = Engine::from_config(config, sink)?;
	engine
		.recovery()
		.configured_program()
		.context("Recovery needs an external program (--program or settings.external_program_path)")?;

	match engine.sweep_stale_workspaces(STALE_WORKSPACE_AGE) {
		Ok(0) => {}
		Ok(n) => tracing::info!("removed {} stale workspace(s)", n),
		Err(e) => tracing::warn!("stale workspace sweep failed: {}", e),
	}

	let pb = progress_bar(json);
	let bar = pb.clone();
	engine.set_progress_callback(move |progress| {
		bar.set_length(progress.total as u64);
		bar.set_position(progress.completed as u64);
		bar.set_message(progress.path.display().to_string());
	});
	install_ctrlc(&engine)?;

	let report = engine.unlock(paths, recursive)?;
	pb.finish_and_clear();

	let rechecks: Vec<DetectionResult> = report
		.recoveries()
		.filter_map(|r| r.recovered_path())
		.map(|p| engine.detect(p))
		.collect();

	if json {
		let output = UnlockOutput { report: &report, rechecks };
		println!("{}", serde_json::to_string_pretty(&output)?);
	} else {
		for entry in &report.entries {
			print_detection(&entry.detection);
			if let Some(recovery) = &entry.recovery {
				match &recovery.outcome {
					Outcome::Recovered(new_path) => println!("   ✅ Recovered -> {}", new_path.display()),
					Outcome::Unchanged => println!("   ➖ Unchanged"),
					Outcome::Failed(reason) => println!("   ❌ Failed: {}", reason),
				}
			}
		}
		if !rechecks.is_empty() {
			println!();
			println!("🔁 Re-check of recovered files:");
			for result in &rechecks {
				print_detection(result);
			}
		}
		println!();
		println!("🔓 Recovered: {}", report.recovered_count());
		println!("❌ Failed: {}", report.failed_count());
		print_cancelled(report.cancelled);
	}

	if report.failed_count() > 0 {
		anyhow::bail!("{} file(s) could not be recovered", report.failed_count());
	}
	Ok(())
}

fn run_config(action: &ConfigAction, path: &Path) -> Result<()> {
	match action {
		ConfigAction::Show => {
			let config = EngineConfig::load_or_default(path)?;
			println!("{}", serde_json::to_string_pretty(&config)?);
		}
		ConfigAction::Path => {
			println!("{}", path.display());
		}
		ConfigAction::Init { force } => {
			if path.exists() && !force {
				anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
			}
			EngineConfig::default().save(path)?;
			println!("✅ Wrote default config to {}", path.display());
		}
		ConfigAction::AddExtension { ext } => {
			let mut config = EngineConfig::load_or_default(path)?;
			if config.add_extension(ext)? {
				config.save(path)?;
				println!("✅ Added extension {}", ext);
			} else {
				println!("ℹ️  Extension {} is already configured", ext);
			}
		}
		ConfigAction::AddHeader { hex, label } => {
			let mut config = EngineConfig::load_or_default(path)?;
			if config.add_header(hex, label)? {
				config.validate()?;
				config.save(path)?;
				println!("✅ Added header {} -> {}", hex, label);
			} else {
				println!("ℹ️  Header {} -> {} is already configured", hex, label);
			}
		}
	}
	Ok(())
}

fn progress_bar(hidden: bool) -> ProgressBar {
	if hidden {
		return ProgressBar::hidden();
	}
	let pb = ProgressBar::new(0);
	if let Ok(style) = ProgressStyle::default_bar()
		.template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
	{
		pb.set_style(style.progress_chars("#>-"));
	}
	pb
}

fn install_ctrlc(engine: &Engine) -> Result<()> {
	let token = engine.cancellation_token().clone();
	ctrlc::set_handler(move || {
		eprintln!("⚠️  Cancelling: waiting for running files to stop...");
		token.cancel();
	})
	.context("Failed to set Ctrl+C handler")
}

fn print_detection(result: &DetectionResult) {
	let icon = match result.status {
		DetectionStatus::Encrypted => "🔒",
		DetectionStatus::Unencrypted => "🔓",
		DetectionStatus::Unrecognized => "❔",
		DetectionStatus::Error => "❌",
	};
	let detail = result
		.matched_label
		.as_deref()
		.or(result.error_detail.as_deref())
		.or(result.note.as_deref())
		.unwrap_or("");
	println!("{} {:<12} {} {}", icon, result.status.to_string(), result.path.display(), detail);
}

fn print_cancelled(cancelled: bool) {
	if cancelled {
		println!("⚠️  Cancelled before every file was processed");
	}
}
