use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::apply::{self, DriveRelocator, LocalRelocator, MoveRequest, Relocator};
use cli::fs_apply::ConflictPolicy;
use router_core::config::{self, AppConfig, SafetyConfig};
use router_core::error::RouterError;
use router_core::folder::{self, FolderBinding};
use router_core::models::{BatchReport, RenameOutcome, RoutingPlan, SourceKind};
use router_core::naming;
use router_core::pipeline::{self, Session};
use router_core::scanner::ScanSource;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { target, json } => run_scan(cfg, target, json).await,
        Commands::Rename {
            target,
            dry_run,
            json,
        } => run_rename(cfg, target, dry_run, json).await,
        Commands::Classify { target, out, json } => run_classify(cfg, target, out, json).await,
        Commands::Apply {
            plan,
            prefix,
            dry_run,
            conflict,
            json,
        } => {
            let plan: RoutingPlan = serde_json::from_str(
                &std::fs::read_to_string(&plan).with_context(|| format!("reading {}", plan))?,
            )?;
            run_apply(Session::open(cfg)?, plan, prefix, dry_run, conflict, json).await
        }
        Commands::Route {
            target,
            prefix,
            dry_run,
            conflict,
            json,
        } => run_route(cfg, target, prefix, dry_run, conflict, json).await,
        Commands::Learn {
            file_name,
            chosen,
            suggested,
        } => run_learn(cfg, &file_name, &chosen, suggested.as_deref()),
        Commands::Lookup { file_name, json } => run_lookup(cfg, &file_name, json),
        Commands::History { project, json } => run_history(cfg, project, json).await,
        Commands::Project { command } => run_project(cfg, command).await,
        Commands::Folder { command } => run_folder(cfg, command),
    }
}

#[derive(Parser)]
#[command(name = "commessa-router")]
#[command(about = "Routes and renames the files of a project folder", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Which project and which folder a command works on.
#[derive(clap::Args, Clone, Default)]
struct Target {
    /// Project code; defaults to `project.code` from the config
    #[arg(short, long)]
    project: Option<String>,
    /// Local project folder; defaults to the bound folder
    #[arg(long, conflicts_with = "drive")]
    root: Option<PathBuf>,
    /// OneDrive folder path; defaults to the folder linked to the project
    #[arg(long)]
    drive: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files of the project folder
    Scan {
        #[command(flatten)]
        target: Target,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Prefix every file name with the project code
    Rename {
        #[command(flatten)]
        target: Target,
        /// Print the rename pairs without touching files
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Suggest a destination folder for every file and write a reviewable plan
    Classify {
        #[command(flatten)]
        target: Target,
        /// Write the plan here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply a reviewed plan file
    Apply {
        /// Plan written by `classify`, optionally edited (`accepted_path`)
        plan: String,
        /// Also prefix the file names with the project code
        #[arg(long, default_value_t = false)]
        prefix: bool,
        /// Print what would happen without touching files
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Conflict policy: rename|skip|overwrite
        #[arg(long)]
        conflict: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify and accept every suggestion in one go
    Route {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = false)]
        prefix: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long)]
        conflict: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Record a manual routing decision
    Learn {
        file_name: String,
        /// Folder the file belongs in
        chosen: String,
        /// What was suggested, if anything
        #[arg(long)]
        suggested: Option<String>,
    },
    /// Show the learned folder for a file name
    Lookup {
        file_name: String,
        #[arg(long)]
        json: bool,
    },
    /// Audit log of routed files for a project
    History {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Project registry
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    /// Local project folder binding
    Folder {
        #[command(subcommand)]
        command: FolderCommand,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Register or update a project
    Add {
        code: String,
        name: String,
        #[arg(long)]
        client: Option<String>,
    },
    /// Bind a OneDrive folder to a project
    Link { code: String, drive_folder: String },
    Show {
        code: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FolderCommand {
    /// Remember a local project folder
    Bind { root: PathBuf },
    /// Check the bound folder is still reachable
    Verify,
}

async fn open_db(cfg: &AppConfig) -> Result<storage::SqlitePool> {
    let pool = storage::connect(&cfg.database.path).await?;
    storage::migrate(&pool).await?;
    Ok(pool)
}

/// Explicit `--root`/`--drive` first, then the drive folder linked to the
/// project, then the bound local folder.
async fn resolve_source(cfg: &AppConfig, code: &str, target: &Target) -> Result<ScanSource> {
    if let Some(root) = &target.root {
        return Ok(ScanSource::Local(root.clone()));
    }
    if let Some(drive) = &target.drive {
        return Ok(ScanSource::Drive {
            client: pipeline::build_drive_client(cfg)?,
            root: drive.clone(),
        });
    }
    let pool = open_db(cfg).await?;
    if let Some(project) = storage::project_by_code(&pool, code).await? {
        if let Some(folder) = project.drive_folder {
            info!(project = %code, folder = %folder, "using linked drive folder");
            return Ok(ScanSource::Drive {
                client: pipeline::build_drive_client(cfg)?,
                root: folder,
            });
        }
    }
    let state = PathBuf::from(&cfg.folder.state_path);
    match FolderBinding::load(&state)? {
        Some(mut binding) => {
            binding.verify()?;
            binding.save(&state)?;
            Ok(ScanSource::Local(binding.root))
        }
        None => Err(RouterError::MissingPath.into()),
    }
}

fn relocator_for(source: &ScanSource, conflict: ConflictPolicy) -> Box<dyn Relocator> {
    match source {
        ScanSource::Local(root) => Box::new(LocalRelocator::new(root.clone(), conflict)),
        ScanSource::Drive { client, root } => Box::new(DriveRelocator::new(client.clone(), root)),
    }
}

fn safety_with(cfg: &AppConfig, dry_run: bool, conflict: Option<String>) -> (SafetyConfig, bool) {
    let mut safety = cfg.safety.clone();
    if let Some(c) = conflict {
        safety.conflict = c;
    }
    let dry = dry_run || safety.dry_run;
    (safety, dry)
}

async fn run_scan(cfg: AppConfig, target: Target, json: bool) -> Result<()> {
    let session = Session::open(cfg)?;
    let code = session.project_code(target.project.as_deref())?;
    let source = resolve_source(&session.config, &code, &target).await?;
    let files = session.scan(&source).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else {
        for f in &files {
            println!(
                "{}\t{}\t{}",
                f.relative_path(),
                f.size,
                f.mime_type.as_deref().unwrap_or("-")
            );
        }
        println!("{} files in {}", files.len(), source.describe());
    }
    Ok(())
}

async fn run_rename(cfg: AppConfig, target: Target, dry_run: bool, json: bool) -> Result<()> {
    let session = Session::open(cfg)?;
    let code = session.project_code(target.project.as_deref())?;
    let source = resolve_source(&session.config, &code, &target).await?;
    let files = session.scan(&source).await?;
    let pairs = naming::plan_bulk_rename(&files, &code);

    let (safety, dry) = safety_with(&session.config, dry_run, None);
    if dry {
        if json {
            println!("{}", serde_json::to_string_pretty(&pairs)?);
        } else {
            for p in pairs.iter().filter(|p| !p.is_noop()) {
                println!("{} -> {}", p.original, p.renamed);
            }
            let unchanged = pairs.iter().filter(|p| p.is_noop()).count();
            println!("(dry run) {} to rename, {} already correct", pairs.len() - unchanged, unchanged);
        }
        return Ok(());
    }

    let relocator = relocator_for(&source, ConflictPolicy::from(safety.conflict.as_str()));
    let requests = apply::rename_requests(&files, &pairs);
    let report = apply::apply_sequential(relocator.as_ref(), &requests, &safety).await;
    print_report(&report, json)
}

async fn run_classify(
    cfg: AppConfig,
    target: Target,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let session = Session::open(cfg)?;
    let code = session.project_code(target.project.as_deref())?;
    let source = resolve_source(&session.config, &code, &target).await?;
    let plan = session.plan(&code, &source).await?;
    let rendered = serde_json::to_string_pretty(&plan)?;

    if let Some(path) = &out {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &rendered).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), entries = plan.entries.len(), "plan written");
    }
    if json {
        if out.is_none() {
            println!("{}", rendered);
        }
        return Ok(());
    }
    let t = &session.config.classification.thresholds;
    for e in &plan.entries {
        let s = &e.suggestion;
        println!(
            "{}\t{}\t{:.2} ({:?}, {})",
            s.file.relative_path(),
            s.suggested_path,
            s.confidence,
            s.level(t.high, t.medium),
            s.method
        );
    }
    if out.is_none() {
        println!("pass --out <file> to save the plan for `apply`");
    }
    Ok(())
}

async fn run_apply(
    mut session: Session,
    plan: RoutingPlan,
    prefix: bool,
    dry_run: bool,
    conflict: Option<String>,
    json: bool,
) -> Result<()> {
    naming::validate_project_code(&plan.project_code)?;
    let source = match plan.source {
        SourceKind::Local => ScanSource::Local(PathBuf::from(&plan.root)),
        SourceKind::Drive => ScanSource::Drive {
            client: pipeline::build_drive_client(&session.config)?,
            root: plan.root.clone(),
        },
    };
    let (safety, dry) = safety_with(&session.config, dry_run, conflict);
    let requests = apply::plan_requests(&plan, prefix);

    if dry {
        print_requests(&requests, json)?;
        return Ok(());
    }

    let relocator = relocator_for(&source, ConflictPolicy::from(safety.conflict.as_str()));
    let report = apply::apply_concurrent(relocator.as_ref(), &requests, &safety).await;

    // Files have moved already; bookkeeping errors only warn.
    match session.record_corrections(apply::applied_entries(&plan, &report)) {
        Ok(0) => {}
        Ok(n) => info!(count = n, "corrections recorded"),
        Err(e) => warn!(error = %e, "could not record corrections"),
    }
    if let Err(e) = record_audit(&session.config, &plan, &report).await {
        warn!(error = %e, "could not write the routing audit log");
    }
    print_report(&report, json)
}

async fn record_audit(cfg: &AppConfig, plan: &RoutingPlan, report: &BatchReport) -> Result<()> {
    let pool = open_db(cfg).await?;
    match storage::project_by_code(&pool, &plan.project_code).await? {
        Some(project) => {
            let written = apply::record_routings(&pool, project.id, plan, report).await?;
            info!(count = written, project = %project.code, "routings recorded");
        }
        None => warn!(project = %plan.project_code, "project not registered, audit log skipped"),
    }
    Ok(())
}

async fn run_route(
    cfg: AppConfig,
    target: Target,
    prefix: bool,
    dry_run: bool,
    conflict: Option<String>,
    json: bool,
) -> Result<()> {
    let session = Session::open(cfg)?;
    let code = session.project_code(target.project.as_deref())?;
    let source = resolve_source(&session.config, &code, &target).await?;
    let plan = session.plan(&code, &source).await?;
    run_apply(session, plan, prefix, dry_run, conflict, json).await
}

fn run_learn(cfg: AppConfig, file_name: &str, chosen: &str, suggested: Option<&str>) -> Result<()> {
    let mut session = Session::open(cfg)?;
    if !session.template.contains(chosen) {
        warn!(path = %chosen, "folder is not part of the project template");
    }
    let c = session.learning.record(file_name, suggested, chosen)?;
    println!("{} -> {}", c.original_name, c.chosen_path);
    Ok(())
}

fn run_lookup(cfg: AppConfig, file_name: &str, json: bool) -> Result<()> {
    let session = Session::open(cfg)?;
    let hit = session.learning.lookup(file_name);
    if json {
        println!("{}", serde_json::to_string_pretty(&hit)?);
    } else {
        match hit {
            Some(c) => println!("{} (learned from {})", c.chosen_path, c.original_name),
            None => println!("no correction recorded for {}", file_name),
        }
    }
    Ok(())
}

async fn run_history(cfg: AppConfig, project: Option<String>, json: bool) -> Result<()> {
    let session = Session::open(cfg)?;
    let code = session.project_code(project.as_deref())?;
    let pool = open_db(&session.config).await?;
    let project = storage::project_by_code(&pool, &code)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown project code: {}", code))?;
    let rows = storage::file_routings_for_project(&pool, project.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for r in &rows {
        let when = chrono::DateTime::from_timestamp(r.created_at, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{}\t{}\t{} -> {}\t{:.2}\t{}",
            when, r.file_name, r.suggested_path, r.actual_path, r.confidence, r.method
        );
    }
    Ok(())
}

async fn run_project(cfg: AppConfig, command: ProjectCommand) -> Result<()> {
    let pool = open_db(&cfg).await?;
    let project = match command {
        ProjectCommand::Add { code, name, client } => {
            naming::validate_project_code(&code)?;
            storage::upsert_project(&pool, &code, &name, client.as_deref()).await?
        }
        ProjectCommand::Link { code, drive_folder } => {
            storage::link_project_folder(&pool, &code, drive_folder.trim_matches('/')).await?
        }
        ProjectCommand::Show { code, json } => {
            let project = storage::project_by_code(&pool, &code)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unknown project code: {}", code))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&project)?);
                return Ok(());
            }
            project
        }
    };
    println!(
        "{}\t{}\t{}\t{}",
        project.code,
        project.name,
        project.client.as_deref().unwrap_or("-"),
        project.drive_folder.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn run_folder(cfg: AppConfig, command: FolderCommand) -> Result<()> {
    let state = PathBuf::from(&cfg.folder.state_path);
    let binding = match command {
        FolderCommand::Bind { root } => folder::bind(&state, &absolute(&root)?)?,
        FolderCommand::Verify => {
            let mut binding = FolderBinding::load(&state)?.ok_or(RouterError::MissingPath)?;
            binding.verify()?;
            binding.save(&state)?;
            binding
        }
    };
    println!("{} (verified)", binding.root.display());
    Ok(())
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

fn print_requests(requests: &[MoveRequest], json: bool) -> Result<()> {
    if json {
        let vals: Vec<serde_json::Value> = requests
            .iter()
            .map(|r| serde_json::json!({ "original": r.file.relative_path(), "renamed": r.target }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&vals)?);
    } else {
        for r in requests {
            println!("{} -> {}", r.file.relative_path(), r.target);
        }
        println!("(dry run) {} operations", requests.len());
    }
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for op in &report.operations {
        match &op.outcome {
            RenameOutcome::DownloadedFallback { copy } => {
                println!("{}\t{} -> {} (copy at {})", op.outcome.label(), op.original, op.renamed, copy)
            }
            RenameOutcome::Failed { error } => {
                println!("{}\t{}: {}", op.outcome.label(), op.original, error)
            }
            _ => println!("{}\t{} -> {}", op.outcome.label(), op.original, op.renamed),
        }
    }
    let c = &report.counts;
    println!(
        "done: {} in place, {} downloaded, {} already correct, {} failed ({} total)",
        c.succeeded_in_place,
        c.downloaded_fallback,
        c.already_correct,
        c.failed,
        c.total()
    );
    Ok(())
}
