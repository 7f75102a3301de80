use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use assetshift_core::config::{MigrationConfig, load_config};
use assetshift_core::manifest::{CleanOptions, clean_manifest, write_unmigrated_report};
use assetshift_core::mapping::MappingTable;
use assetshift_core::rewrite::{
    RewriteOptions, SweepOptions, rewrite_tree, sweep_tracked_files, write_rewrite_report,
};
use assetshift_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, resolve_paths,
};
use assetshift_core::verify::{VerifyOptions, verify_tree};

#[derive(Debug, Parser)]
#[command(
    name = "assetshift",
    version,
    about = "Migrate legacy-hosted asset references to CDN delivery URLs"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Show resolved paths and input availability")]
    Status,
    #[command(about = "Clean and deduplicate the asset manifest CSV")]
    Clean(CleanArgs),
    #[command(about = "Rewrite legacy asset URLs across the source tree")]
    Rewrite(RewriteArgs),
    #[command(about = "Scan the asset directory for disallowed delivery URL shapes")]
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[arg(long, help = "Skip the mapping-aware pass; normalize and dedupe only")]
    no_mapping: bool,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    #[arg(
        long,
        help = "After rewriting, fail if tracked files still reference legacy domains"
    )]
    verify_tracked: bool,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    #[arg(long, value_name = "PATH", help = "Directory to scan (default: configured asset_dir)")]
    dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Clean(args)) => run_clean(&runtime, args),
        Some(Commands::Rewrite(args)) => run_rewrite(&runtime, args),
        Some(Commands::Verify(args)) => run_verify(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let status = inspect_runtime(&paths, &config)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!(
        "mapping_file: {}",
        normalize_path(&paths.file(&config.mapping_file()))
    );
    println!("mapping_exists: {}", format_flag(status.mapping_exists));
    println!(
        "mapping_entries: {}",
        status
            .mapping_entries
            .map(|count| count.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!(
        "input_manifest: {}",
        normalize_path(&paths.file(&config.input_manifest()))
    );
    println!(
        "input_manifest_exists: {}",
        format_flag(status.input_manifest_exists)
    );
    println!(
        "asset_dir: {}",
        normalize_path(&paths.file(&config.asset_dir()))
    );
    println!("asset_dir_exists: {}", format_flag(status.asset_dir_exists));
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_clean(runtime: &RuntimeOptions, args: CleanArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let input = paths.file(&config.input_manifest());
    let output = paths.file(&config.output_manifest());
    let mapping_path = paths.file(&config.mapping_file());

    let table = if args.no_mapping {
        None
    } else if mapping_path.exists() {
        Some(MappingTable::load(&mapping_path)?)
    } else {
        bail!(
            "mapping file not found: {}\nPass --no-mapping to clean without the mapping-aware pass.",
            normalize_path(&mapping_path)
        );
    };

    let options = CleanOptions {
        keep_query_params: config.keep_query_params(),
        legacy_host: config.legacy_host(),
        delivery_host: config.delivery_host(),
    };
    let report = clean_manifest(&input, &output, table.as_ref(), &options)?;

    println!("manifest clean");
    println!("input: {}", normalize_path(&input));
    println!("output: {}", normalize_path(&output));
    println!("keep_query_params: {}", options.keep_query_params);
    println!(
        "mapping: {}",
        table
            .as_ref()
            .map(|table| format!("{} entries", table.len()))
            .unwrap_or_else(|| "<disabled>".to_string())
    );
    println!("rows_read: {}", report.rows_read);
    println!("malformed_rows: {}", report.malformed_rows);
    println!("output_rows: {}", report.output_rows);
    if table.is_some() {
        println!("migrated_rows: {}", report.migrated_rows);
    }
    println!("unmigrated_count: {}", report.unmigrated.len());
    if table.is_some() || !report.unmigrated.is_empty() {
        let unmigrated_path = paths.file(&config.unmigrated_file());
        write_unmigrated_report(&unmigrated_path, &report.unmigrated)?;
        println!("unmigrated_report: {}", normalize_path(&unmigrated_path));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_rewrite(runtime: &RuntimeOptions, args: RewriteArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let mapping_path = paths.file(&config.mapping_file());
    let report_path = paths.file(&config.report_file());
    let unmigrated_path = paths.file(&config.unmigrated_file());

    let table = MappingTable::load(&mapping_path)?;
    let options = RewriteOptions {
        extensions: config.extensions(),
        legacy_url_pattern: config.legacy_url_pattern(),
        delivery_host: config.delivery_host(),
        skip_files: vec![
            mapping_path.clone(),
            report_path.clone(),
            unmigrated_path.clone(),
        ],
    };
    let report = rewrite_tree(&paths.project_root, &table, &options)?;
    write_rewrite_report(&report_path, &report)?;

    println!("tree rewrite");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("mapping: {} entries", table.len());
    println!("scanned_files: {}", report.scanned_files);
    println!("skipped_non_utf8: {}", report.skipped_non_utf8);
    println!("replacements: {}", report.replacements);
    println!("updated_files: {}", report.updated_files);
    println!("no_mapping_count: {}", report.no_mapping_count);
    for url in &report.no_mapping_urls {
        println!("no_mapping: {url}");
    }
    println!("report: {}", normalize_path(&report_path));
    print_diagnostics(runtime, &paths);

    if args.verify_tracked {
        let sweep = sweep_tracked_files(
            &paths.project_root,
            &SweepOptions {
                legacy_domains: config.sweep_domains(),
                skip_files: vec![mapping_path, report_path, unmigrated_path],
            },
        )?;
        println!("sweep.scanned_files: {}", sweep.scanned_files);
        println!("sweep.total_references: {}", sweep.total_references);
        for offender in &sweep.offenders {
            println!(
                "sweep.offender: {} ({} references)",
                offender.path, offender.references
            );
        }
        if sweep.total_references > 0 {
            bail!(
                "{} residual legacy reference(s) remain in tracked files",
                sweep.total_references
            );
        }
    }
    Ok(())
}

fn run_verify(runtime: &RuntimeOptions, args: VerifyArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let asset_dir = match args.dir {
        Some(dir) => assetshift_core::runtime::absolutize_from_project(&dir, &paths.project_root),
        None => paths.file(&config.asset_dir()),
    };

    let violations = verify_tree(
        &asset_dir,
        &VerifyOptions {
            delivery_host: config.delivery_host(),
        },
    )?;

    println!("delivery URL verify");
    println!("asset_dir: {}", normalize_path(&asset_dir));
    println!("violations: {}", violations.len());
    for violation in &violations {
        println!("{}", violation.render());
    }
    print_diagnostics(runtime, &paths);
    if !violations.is_empty() {
        bail!("{} delivery URL violation(s) found", violations.len());
    }
    Ok(())
}

fn resolve_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, MigrationConfig)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
