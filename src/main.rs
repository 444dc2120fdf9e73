use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thumbd::config::{self, CONFIG_FILENAME};
use thumbd::gallery::{DEFAULT_PAGE_LIMIT, Gallery, PageRequest};
use thumbd::output;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thumbd")]
#[command(about = "Thumbnail cache and indexing daemon for image directory trees")]
#[command(long_about = "\
Thumbnail cache and indexing daemon for image directory trees

Scans a source tree of images, generates square JPEG thumbnails on demand,
and keeps a persistent index that decides from file size and mtime alone
whether a thumbnail is still valid. The watch command keeps thumbnails and
the index in step with the tree as files are added, changed or deleted.

Layout:

  images/                          # source_dir: any tree of jpg/png/gif/webp/bmp/tiff
  └── travel/kyoto/main.jpg        # category/item/image; 'main' is the cover
  cache/                           # cache_dir
  ├── thumbnails/<id>.jpg          # id = base64url of the relative path
  └── thumbnail-index.json         # staleness index snapshot

Run 'thumbd gen-config' to generate a documented thumbd.toml.")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./thumbd.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source image directory (overrides config)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Cache directory for thumbnails and the index (overrides config)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `thumbd=trace` (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Worker threads for generation (capped at available cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Copy)]
struct PageArgs {
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// Items per page
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: usize,
}

impl From<PageArgs> for PageRequest {
    fn from(args: PageArgs) -> Self {
        PageRequest::new(args.page, args.limit)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Watch the source tree; reads control commands from stdin
    Watch {
        /// Ignore stdin and run until SIGINT or SIGTERM
        #[arg(long)]
        no_stdin: bool,
    },
    /// Generate every stale thumbnail
    GenerateAll,
    /// Rebuild the index from thumbnails already on disk
    RebuildIndex,
    /// Show daemon and index status
    Status,
    /// Show index statistics
    Stats,
    /// Liveness report
    Health,
    /// List images
    Images {
        /// `dir="x"&keyword="y"`, or a bare keyword
        #[arg(long)]
        search: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// List folders with their main and preview images
    Folders {
        #[arg(long)]
        search: Option<String>,
    },
    /// List top-level categories
    Categories,
    /// List the items of a category
    Items {
        category: String,
        #[arg(long)]
        search: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// List the images of a category item
    ItemImages {
        category: String,
        item: String,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Show metadata for an image id
    Metadata { id: String },
    /// Write the thumbnail for an image id to a file
    Thumbnail { id: String, out: PathBuf },
    /// Drop the listing cache and rescan
    Refresh,
    /// Print a stock thumbd.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let mut config = config::load_config(&config_path)?;
    if let Some(source) = &cli.source {
        config.source_dir = source.clone();
    }
    if let Some(cache) = &cli.cache {
        config.cache_dir = cache.clone();
    }
    init_thread_pool(cli.threads);

    let gallery = Gallery::open(config)?;
    let json = cli.json;

    match cli.command {
        Command::Watch { no_stdin } => run_watch(&gallery, no_stdin)?,
        Command::GenerateAll => {
            join_generation(gallery.generate_all()?);
            emit(json, &gallery.index_stats(), output::print_index_stats)?;
        }
        Command::RebuildIndex => {
            let count = gallery.rebuild_index()?;
            if json {
                println!("{}", serde_json::json!({ "entriesRebuilt": count }));
            } else {
                println!("Rebuilt {} index entries", count);
            }
        }
        Command::Status => emit(json, &gallery.daemon_status(), output::print_status)?,
        Command::Stats => emit(json, &gallery.index_stats(), output::print_index_stats)?,
        Command::Images { search, page } => {
            let result = gallery.list_images(search.as_deref(), page.into())?;
            emit(json, &result, output::print_image_page)?;
        }
        Command::Folders { search } => {
            let folders = gallery.list_folders(search.as_deref())?;
            emit(json, &folders, |f| output::print_folders(f))?;
        }
        Command::Categories => {
            let categories = gallery.list_categories()?;
            emit(json, &categories, |c| output::print_categories(c))?;
        }
        Command::Items {
            category,
            search,
            page,
        } => {
            let result = gallery.list_category_items(&category, search.as_deref(), page.into())?;
            emit(json, &result, output::print_category_items)?;
        }
        Command::ItemImages {
            category,
            item,
            page,
        } => {
            let result = gallery.list_item_images(&category, &item, page.into())?;
            emit(json, &result, output::print_image_page)?;
        }
        Command::Metadata { id } => {
            emit(json, &gallery.metadata(&id)?, output::print_metadata)?;
        }
        Command::Thumbnail { id, out } => {
            let data = gallery.thumbnail_bytes(&id)?;
            std::fs::write(&out, &data.bytes)?;
            println!(
                "{} → {} ({}, {} bytes)",
                data.file_name,
                out.display(),
                data.content_type,
                data.bytes.len()
            );
        }
        Command::Refresh => {
            let report = gallery.refresh()?;
            emit(json, &report, |r| println!("{}", output::format_refresh(r)))?;
        }
        Command::Health => {
            emit(json, &gallery.health(), |h| {
                println!(
                    "{}, up {}s, watching: {}",
                    h.status,
                    h.uptime_secs,
                    if h.watching { "yes" } else { "no" }
                )
            })?;
        }
        // Printed before the config is loaded.
        Command::GenConfig => {}
    }

    gallery.shutdown()?;
    Ok(())
}

/// Print `value` as JSON, or through the text printer.
fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    print: impl FnOnce(&T),
) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn join_generation(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("generation thread panicked");
    }
}

/// Input to the `watch` control loop.
enum Control {
    Line(String),
    EndOfInput,
    Signal,
}

/// Forward stdin lines to the control loop until end of input.
fn spawn_stdin_reader(tx: mpsc::Sender<Control>) -> io::Result<()> {
    thread::Builder::new()
        .name("thumbd-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Control::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        break;
                    }
                }
            }
            let _ = tx.send(Control::EndOfInput);
        })?;
    Ok(())
}

/// Run the daemon until `quit`, end of input on stdin, or SIGINT/SIGTERM.
fn run_watch(gallery: &Gallery, no_stdin: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel::<Control>();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Control::Signal);
    })?;

    let background: Vec<JoinHandle<()>> = gallery.startup().into_iter().collect();

    if no_stdin {
        info!("running until interrupted");
    } else {
        spawn_stdin_reader(tx)?;
        println!("Commands: status, stats, generate, rebuild, refresh, start, stop, quit");
    }

    control_loop(gallery, &rx, background);
    Ok(())
}

/// Serve control input until `quit`, end of input or a signal, then stop the
/// daemon and wait for background generation.
fn control_loop(
    gallery: &Gallery,
    rx: &mpsc::Receiver<Control>,
    mut background: Vec<JoinHandle<()>>,
) {
    for control in rx {
        let line = match control {
            Control::Line(line) => line,
            Control::EndOfInput => break,
            Control::Signal => {
                info!("interrupted, shutting down");
                break;
            }
        };
        match line.trim() {
            "" => {}
            "status" => output::print_status(&gallery.daemon_status()),
            "stats" => output::print_index_stats(&gallery.index_stats()),
            "generate" => match gallery.generate_all() {
                Ok(handle) => {
                    background.push(handle);
                    println!("Generation started");
                }
                Err(e) => error!(error = %e, "failed to start generation"),
            },
            "rebuild" => match gallery.rebuild_index() {
                Ok(count) => println!("Rebuilt {} index entries", count),
                Err(e) => error!(error = %e, "rebuild failed"),
            },
            "refresh" => match gallery.refresh() {
                Ok(report) => println!("{}", output::format_refresh(&report)),
                Err(e) => error!(error = %e, "refresh failed"),
            },
            "start" => {
                if let Err(e) = gallery.start_daemon() {
                    error!(error = %e, "failed to start watch daemon");
                }
            }
            "stop" => gallery.stop_daemon(),
            "quit" | "exit" => break,
            other => warn!(command = other, "unknown command"),
        }
    }

    gallery.stop_daemon();
    for handle in background {
        join_generation(handle);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Initialize the rayon thread pool.
///
/// Requests above the number of available cores are capped.
fn init_thread_pool(requested: Option<usize>) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let threads = requested.map_or(cores, |n| n.clamp(1, cores));
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use thumbd::config::DaemonConfig;

    fn gallery(tmp: &TempDir) -> (Gallery, DaemonConfig) {
        let config = DaemonConfig {
            source_dir: tmp.path().join("images"),
            cache_dir: tmp.path().join("cache"),
            ..DaemonConfig::default()
        };
        fs::create_dir_all(&config.source_dir).unwrap();
        (Gallery::open(config.clone()).unwrap(), config)
    }

    #[test]
    fn signal_ends_control_loop_and_shutdown_flushes() {
        let tmp = TempDir::new().unwrap();
        let (gallery, config) = gallery(&tmp);
        gallery.start_daemon().unwrap();
        assert!(gallery.daemon_status().watching);

        let (tx, rx) = mpsc::channel();
        tx.send(Control::Line("stats".into())).unwrap();
        tx.send(Control::Signal).unwrap();
        tx.send(Control::Line("start".into())).unwrap();
        control_loop(&gallery, &rx, Vec::new());

        assert!(!gallery.daemon_status().watching);
        // Input after the signal is never served.
        assert!(matches!(rx.try_recv(), Ok(Control::Line(_))));
        gallery.shutdown().unwrap();
        assert!(config.index_file().exists());
    }

    #[test]
    fn end_of_input_ends_control_loop() {
        let tmp = TempDir::new().unwrap();
        let (gallery, _config) = gallery(&tmp);

        let (tx, rx) = mpsc::channel();
        tx.send(Control::Line("start".into())).unwrap();
        tx.send(Control::Line("bogus".into())).unwrap();
        tx.send(Control::EndOfInput).unwrap();
        control_loop(&gallery, &rx, Vec::new());

        assert!(!gallery.daemon_status().watching);
    }
}
