use clap::{Parser, Subcommand};
use content_kiln::{AssetGuid, AssetMetadata, ContentSession, RegistryNotification};
use crossbeam::channel::RecvTimeoutError;
use nab_kiln::app::{set_panic_hook, AppRun, ExitReason};
use nab_kiln::utils::ByteSize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Subcommand)]
pub enum CliCommands
{
    #[clap(about = "List every registered asset")]
    List,
    #[clap(about = "Show everything known about one asset")]
    Show
    {
        // content-relative or absolute path, or a guid
        asset: String,
    },
    #[clap(about = "Print content changes as they happen")]
    Watch
    {
        // run forever if not set
        #[arg(long)]
        seconds: Option<u64>,
    },
    #[clap(about = "Show the metadata cache")]
    Cache
    {
        #[arg(long)]
        prune: bool, // drop entries for files that no longer exist
    },
}

#[derive(Debug, Parser)]
struct CliArgs
{
    // directory containing the Content folder (and optionally kiln.toml)
    project: PathBuf,

    #[command(subcommand)]
    command: CliCommands,
}

fn main() -> ExitReason
{
    let app_run = AppRun::<CliArgs>::startup("Content Browser", env!("CARGO_PKG_VERSION"));
    set_panic_hook(false);

    let exit_reason = run(&app_run.args);
    app_run.set_exit_reason(exit_reason);
    exit_reason
}

fn run(args: &CliArgs) -> ExitReason
{
    let session = match ContentSession::open(&args.project)
    {
        Ok(session) => session,
        Err(err) =>
        {
            log::error!("Failed to open project {:?}: {err}", args.project);
            return ExitReason::BadArguments;
        },
    };

    let exit_reason = match &args.command
    {
        CliCommands::List => list(&session),
        CliCommands::Show { asset } => show(&session, asset),
        CliCommands::Watch { seconds } => watch(&session, seconds.map(Duration::from_secs)),
        CliCommands::Cache { prune } => cache(&session, *prune),
    };

    session.close();
    exit_reason
}

fn relative_path(session: &ContentSession, path: &Path) -> PathBuf
{
    session.registry().root()
        .and_then(|root| path.strip_prefix(&root).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
}

fn print_row(session: &ContentSession, asset: &AssetMetadata)
{
    println!("{:<10} {} {} ({})",
        format!("{:?}", asset.asset_type),
        asset.guid,
        relative_path(session, &asset.full_path).display(),
        ByteSize::from(asset.icon.len()));
}

fn list(session: &ContentSession) -> ExitReason
{
    let snapshot = session.registry().snapshot();
    for asset in &snapshot
    {
        print_row(session, asset);
    }
    println!("{} asset(s)", snapshot.len());
    ExitReason::NormalExit
}

fn show(session: &ContentSession, which: &str) -> ExitReason
{
    let found = match which.parse::<AssetGuid>()
    {
        Ok(guid) => session.registry().lookup_guid(guid),
        Err(_) => session.registry().lookup(which),
    };
    let Some(asset) = found else
    {
        log::error!("No asset matching {which:?}");
        return ExitReason::BadArguments;
    };

    println!("Path:        {}", relative_path(session, &asset.full_path).display());
    println!("Type:        {:?}", asset.asset_type);
    println!("Guid:        {}", asset.guid);
    println!("Source:      {}", asset.source_path.as_deref().unwrap_or("(none)"));
    println!("Imported:    {}", asset.import_date);
    println!("Registered:  {}", asset.register_time);
    match &asset.hash
    {
        Some(hash) => println!("Hash:        {}", hash.iter().map(|b| format!("{b:02x}")).collect::<String>()),
        None => println!("Hash:        (none)"),
    }
    println!("Icon:        {}", ByteSize::from(asset.icon.len()));
    ExitReason::NormalExit
}

fn watch(session: &ContentSession, run_for: Option<Duration>) -> ExitReason
{
    if !session.registry().is_watching()
    {
        log::warn!("Filesystem notifications are unavailable, no changes will be reported");
    }

    let notifications = session.registry().subscribe();
    let deadline = run_for.map(|d| Instant::now() + d);
    log::info!("Watching {:?} ({} asset(s))", session.registry().root().unwrap_or_default(), session.registry().len());

    loop
    {
        let next = match deadline
        {
            Some(deadline) => notifications.recv_deadline(deadline),
            None => notifications.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next
        {
            Ok(RegistryNotification::Added(asset)) => { print!("+ "); print_row(session, &asset); },
            Ok(RegistryNotification::Updated(asset)) => { print!("~ "); print_row(session, &asset); },
            Ok(RegistryNotification::Removed(path)) => println!("- {}", path.display()),
            Ok(RegistryNotification::Reset) => println!("* reset ({} asset(s))", session.registry().len()),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // keep icons from changed files for next time
        session.flush_cache();
    }
    ExitReason::NormalExit
}

fn cache(session: &ContentSession, prune: bool) -> ExitReason
{
    let cache = session.cache();
    if prune
    {
        let pruned = cache.retain_existing();
        println!("Pruned {pruned} entries");
        session.flush_cache();
        if cache.is_dirty()
        {
            log::error!("Failed to save the pruned metadata cache to {:?}", cache.file_path());
            return ExitReason::Failed;
        }
    }

    let entries = cache.entries();
    let icon_bytes: usize = entries.iter().map(|e| e.icon.len()).sum();
    for entry in &entries
    {
        println!("{} {} ({})", entry.date_modified, entry.path.display(), ByteSize::from(entry.icon.len()));
    }
    println!("{} entries, {} of icons in {}{}",
        entries.len(),
        ByteSize::from(icon_bytes),
        cache.file_path().display(),
        if cache.is_dirty() { " (unsaved changes)" } else { "" });
    ExitReason::NormalExit
}
