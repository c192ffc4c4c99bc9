use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use is_terminal::IsTerminal;
use planetfile::ca::garbage_collector::GarbageCollector;
use planetfile::ca::pack_file::PackFile;
use planetfile::ca::root::Root;
use planetfile::handler::filesystem::FileSystemHandler;
use planetfile::handler::{DirectoryHandler, EntryType, Info};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "planetfile",
    version = "0.1.0",
    author = "Sami Barbut-Dica",
    about = "Maintenance tools for a content-addressable file store",
    long_about = "Headless maintenance tools for the file server's content-addressable \
    storage backend: inspect stored directories, reclaim unreferenced objects, \
    and report storage statistics.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        name = "init",
        about = "Initialize an empty storage root",
        long_about = "This command creates the storage layout (objects/, refs/heads/master) \
        at the given path and publishes an initial empty state."
    )]
    Init {
        #[arg(index = 1, help = "The path of the storage root")]
        path: String,
    },
    #[command(
        name = "ls",
        about = "List a stored directory",
        long_about = "This command lists the content of a directory inside the store, \
        resolved from the current master commit."
    )]
    Ls {
        #[arg(short = 'r', long, help = "Recursively list subdirectories")]
        recursive: bool,
        #[arg(index = 1, help = "Directory path inside the store (default: the root)")]
        dir: Option<String>,
        #[arg(long, help = "The storage root (default: $PLANETFILE_ROOT)")]
        root: Option<String>,
    },
    #[command(
        name = "cat",
        about = "Print a stored file",
        long_about = "This command writes the content of one stored file to standard output."
    )]
    Cat {
        #[arg(index = 1, help = "File path inside the store")]
        file: String,
        #[arg(long, help = "The storage root (default: $PLANETFILE_ROOT)")]
        root: Option<String>,
    },
    #[command(
        name = "gc",
        about = "Collect unreferenced objects",
        long_about = "This command marks every object reachable from the master commit and \
        removes the rest. It is safe on an otherwise idle store; a live server should \
        drive the collector itself, sliced between user requests."
    )]
    Gc {
        #[arg(long, help = "Only mark and report; do not remove anything")]
        dry_run: bool,
        #[arg(index = 1, help = "The storage root (default: $PLANETFILE_ROOT)")]
        path: Option<String>,
    },
    #[command(
        name = "stats",
        about = "Report storage statistics",
        long_about = "This command walks the physical object storage and reports loose \
        object and pack file counts and sizes."
    )]
    Stats {
        #[arg(index = 1, help = "The storage root (default: $PLANETFILE_ROOT)")]
        path: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { path } => init(path),
        Commands::Ls {
            recursive,
            dir,
            root,
        } => ls(&resolve_root(root.as_deref())?, dir.as_deref(), *recursive),
        Commands::Cat { file, root } => cat(&resolve_root(root.as_deref())?, file),
        Commands::Gc { dry_run, path } => gc(&resolve_root(path.as_deref())?, *dry_run),
        Commands::Stats { path } => stats(&resolve_root(path.as_deref())?),
    }
}

/// Pick the storage root from the argument or the environment
fn resolve_root(arg: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("PLANETFILE_ROOT") {
        return Ok(PathBuf::from(path));
    }
    std::env::current_dir().context("unable to determine current directory")
}

fn open_root(path: &Path) -> Result<Root> {
    let handler = FileSystemHandler::open_root(path)?;
    Root::new(Box::new(handler))
}

fn init(path: &str) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("unable to create storage root {path}"))?;
    let root = open_root(Path::new(path))?;

    if root.initialize()? {
        println!("Initialized storage root at {path}");
    } else {
        println!(
            "Storage root at {path} already initialized (master {})",
            root.master_commit_id()
        );
    }
    Ok(())
}

/// Open a directory inside the store by slash-separated path
fn resolve_directory(
    mut handler: Box<dyn DirectoryHandler>,
    dir: Option<&str>,
) -> Result<Box<dyn DirectoryHandler>> {
    for segment in dir.unwrap_or("").split('/').filter(|s| !s.is_empty()) {
        let info = Info::new(segment.to_string(), EntryType::Directory);
        handler = handler.get_directory(&info)?;
    }
    Ok(handler)
}

fn ls(root_path: &Path, dir: Option<&str>, recursive: bool) -> Result<()> {
    let root = open_root(root_path)?;
    let handler = resolve_directory(Box::new(root.create_root_handler()?), dir)?;

    let mut output = Vec::new();
    list_directory(handler, "", recursive, &mut output)?;

    if std::io::stdout().is_terminal() && output.len() > 40 {
        let mut pager = PagerOutput::new();
        for line in &output {
            writeln!(pager, "{line}")?;
        }
        pager.page()?;
    } else {
        let mut stdout = std::io::stdout().lock();
        for line in &output {
            writeln!(stdout, "{line}")?;
        }
    }
    Ok(())
}

fn list_directory(
    mut handler: Box<dyn DirectoryHandler>,
    prefix: &str,
    recursive: bool,
    output: &mut Vec<String>,
) -> Result<()> {
    let mut entries = Vec::new();
    handler.read_content(&mut |info| entries.push(info))?;

    for info in entries {
        let path = format!("{prefix}{}", info.name);
        match info.entry_type {
            EntryType::Directory => {
                output.push(format!("{:>9}  {}/", "-", path.blue().bold()));
                if recursive {
                    let child = handler.get_directory(&info)?;
                    list_directory(child, &format!("{path}/"), true, output)?;
                }
            }
            EntryType::File => {
                let size = info.size.unwrap_or(0);
                let id = info.content_id.as_deref().unwrap_or("-").to_string();
                output.push(format!("{size:>9}  {path}  {}", id.dimmed()));
            }
            EntryType::Unknown => {
                output.push(format!("{:>9}  {path}  {}", "?", "(unknown)".yellow()));
            }
        }
    }
    Ok(())
}

fn cat(root_path: &Path, file: &str) -> Result<()> {
    let root = open_root(root_path)?;

    let (dir, name) = match file.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, file),
    };
    let mut handler = resolve_directory(Box::new(root.create_root_handler()?), dir)?;
    let content = handler.get_file_by_name(name)?;

    std::io::stdout().write_all(&content)?;
    Ok(())
}

fn gc(root_path: &Path, dry_run: bool) -> Result<()> {
    let root = open_root(root_path)?;
    let mut collector = GarbageCollector::new(root.object_store());

    collector.add_commit(root.master_commit_id());
    while collector.check_object() {}

    if !dry_run {
        while collector.remove_garbage_objects() {}
    }

    println!(
        "{} objects kept, {} removed, {} errors",
        collector.num_objects_to_keep().to_string().bold(),
        collector.num_objects_removed().to_string().bold(),
        if collector.num_errors() == 0 {
            collector.num_errors().to_string().green()
        } else {
            collector.num_errors().to_string().red().bold()
        }
    );
    if collector.num_errors() != 0 {
        anyhow::bail!("store is damaged: {} errors", collector.num_errors());
    }
    Ok(())
}

fn stats(root_path: &Path) -> Result<()> {
    let objects_path = root_path.join("objects");

    let mut loose_count = 0u64;
    let mut loose_bytes = 0u64;
    let mut packs = Vec::new();
    for entry in WalkDir::new(&objects_path).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.parent().and_then(Path::file_name) == Some("pack".as_ref()) {
            if path.extension() == Some("pack".as_ref()) {
                packs.push(path.to_path_buf());
            }
        } else if entry.depth() == 2 {
            loose_count += 1;
            loose_bytes += entry.metadata()?.len();
        }
    }

    println!(
        "{} loose objects, {} bytes on disk",
        loose_count.to_string().bold(),
        loose_bytes.to_string().bold()
    );
    for pack_path in packs {
        let base_name = pack_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let dir = pack_path.parent().unwrap_or(&objects_path);
        match PackFile::open(dir, &base_name) {
            Ok(pack) => println!(
                "pack {}: {} objects",
                base_name,
                pack.num_objects().to_string().bold()
            ),
            Err(err) => println!(
                "pack {}: {}",
                base_name,
                format!("unreadable: {err:#}").red()
            ),
        }
    }
    Ok(())
}

/// Adapter that collects output for the pager
///
/// The pager library exposes a string sink rather than `std::io::Write`;
/// this bridges the two so the listing code can use `writeln!` throughout.
struct PagerOutput {
    pager: minus::Pager,
}

impl PagerOutput {
    fn new() -> Self {
        PagerOutput {
            pager: minus::Pager::new(),
        }
    }

    fn page(self) -> Result<()> {
        minus::page_all(self.pager).context("unable to run pager")
    }
}

impl Write for PagerOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.pager
            .push_str(text.as_ref())
            .map_err(std::io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
