//! CLI entry point for `mailvault`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailvault::clock::{Clock, SystemClock};
use mailvault::config::{self, Config};
use mailvault::fetch::FetchClient;
use mailvault::ingest::{FetchOutcome, Ingestor};
use mailvault::model::message::CanonicalMessage;
use mailvault::model::thread::ThreadView;
use mailvault::normalize::Normalizer;
use mailvault::store::{FileStore, MessageStore, StoreStats};

/// Upper bound for `list --limit`.
const MAX_LIST_LIMIT: usize = 200;

#[derive(Parser)]
#[command(
    name = "mailvault",
    version,
    about = "Fetch a mailbox into a deduplicating local store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage directory (overrides config and MAILVAULT_STORAGE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    storage: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch recent messages from the server into the store
    Fetch {
        /// Look back this many hours
        #[arg(long, conflicts_with = "minutes")]
        hours: Option<u32>,
        /// Look back this many minutes
        #[arg(long)]
        minutes: Option<u32>,
        /// Skip the Promotions, Social, Updates and Forums categories (Gmail)
        #[arg(long)]
        primary_only: bool,
        /// Filter on the sent date instead of the arrival date
        #[arg(long)]
        sent_date: bool,
        #[arg(long)]
        json: bool,
    },
    /// List stored messages, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(short, long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show one stored message
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Show every stored message of a thread
    Thread {
        thread_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Show store statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the index from the stored records
    Reindex,
    /// Print the effective configuration (password masked)
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    if let Some(dir) = cli.storage {
        config.storage.dir = Some(dir);
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Fetch {
            hours,
            minutes,
            primary_only,
            sent_date,
            json,
        } => {
            if let Some(hours) = hours {
                config.fetch.lookback_hours = hours;
                config.fetch.lookback_minutes = None;
            }
            if minutes.is_some() {
                config.fetch.lookback_minutes = minutes;
            }
            if primary_only {
                config.fetch.primary_only = true;
            }
            if sent_date {
                config.fetch.use_arrival_date = false;
            }
            cmd_fetch(&config, json)
        }
        Commands::List {
            limit,
            offset,
            json,
        } => cmd_list(&config, limit, offset, json),
        Commands::Show { id, json } => cmd_show(&config, &id, json),
        Commands::Thread { thread_id, json } => cmd_thread(&config, &thread_id, json),
        Commands::Stats { json } => cmd_stats(&config, json),
        Commands::Reindex => cmd_reindex(&config),
        Commands::Config => cmd_config(&config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailvault.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<FileStore>> {
    let dir = config::storage_dir(config);
    Ok(Arc::new(FileStore::open(&dir)?))
}

/// Fetch the configured window and ingest it.
fn cmd_fetch(config: &Config, json: bool) -> anyhow::Result<()> {
    if config.imap.username.is_empty() {
        anyhow::bail!("No IMAP username configured (set [imap] username or MAILVAULT_USERNAME)");
    }
    if config.imap.password.is_empty() {
        anyhow::bail!("No IMAP password configured (set [imap] password or MAILVAULT_PASSWORD)");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(config)?;
    let fetch = FetchClient::imap(config.connection(), Arc::clone(&clock));
    let normalizer = Normalizer::new(config.fetch.strip_quotes, Arc::clone(&clock));
    let ingestor = Ingestor::new(fetch, normalizer, store, Arc::clone(&clock));

    let since = clock.now() - config.lookback();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Fetching since {}", since.format("%Y-%m-%d %H:%M")));
    pb.enable_steady_tick(Duration::from_millis(120));

    let report = |handled: usize| {
        pb.set_message(format!("{handled} message(s) processed"));
        true
    };
    let start = Instant::now();
    let result = ingestor.ingest(since, config.fetch_options(), Some(&report));
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    match result {
        Ok(outcome) => print_outcome(&outcome, elapsed, json),
        Err(aborted) => {
            print_outcome(&aborted.partial, elapsed, json)?;
            Err(aborted.into())
        }
    }
}

fn cmd_list(config: &Config, limit: usize, offset: usize, json: bool) -> anyhow::Result<()> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let store = open_store(config)?;
    let messages = store.list(limit, offset)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
    } else {
        print_message_table(&messages);
    }
    Ok(())
}

fn cmd_show(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let Some(message) = store.get(id)? else {
        anyhow::bail!("No stored message with id {id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
    } else {
        print_message(&message);
    }
    Ok(())
}

fn cmd_thread(config: &Config, thread_id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let thread = store.get_thread(thread_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&thread)?);
    } else {
        print_thread(&thread);
    }
    Ok(())
}

fn cmd_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;
    let disk = dir_size(store.root());

    if json {
        let out = serde_json::json!({
            "storage_dir": store.root().to_string_lossy(),
            "message_count": stats.message_count,
            "thread_count": stats.thread_count,
            "oldest": stats.oldest.map(|d| d.to_rfc3339()),
            "newest": stats.newest.map(|d| d.to_rfc3339()),
            "disk_bytes": disk,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_stats_table(store.root(), &stats, disk);
    }
    Ok(())
}

fn cmd_reindex(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let start = Instant::now();
    let count = store.rebuild_index()?;
    println!(
        "Index rebuilt: {count} message(s) in {:.2?}",
        start.elapsed()
    );
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    if let Some(path) = config::config_file_path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&config.masked())?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailvault", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Total size of regular files under `dir` (one level of nesting).
fn dir_size(dir: &Path) -> u64 {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return 0;
    };
    read_dir
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if meta.is_dir() {
                Some(dir_size(&e.path()))
            } else {
                Some(meta.len())
            }
        })
        .sum()
}

fn print_outcome(outcome: &FetchOutcome, elapsed: Duration, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!();
    println!("  {:<12} {}", "Inserted", outcome.inserted_count);
    println!("  {:<12} {}", "Duplicates", outcome.duplicate_count);
    println!("  {:<12} {}", "Failed", outcome.failed_count);
    println!("  {:<12} {:.2?}", "Time", elapsed);
    if outcome.cancelled {
        println!("  (cancelled)");
    }
    if !outcome.errors.is_empty() {
        println!();
        println!("  Errors:");
        for item in &outcome.errors {
            println!("    {:<10} {}", item.identifier, item.reason);
        }
    }
    println!();
    Ok(())
}

/// Print messages as a human-readable table.
fn print_message_table(messages: &[CanonicalMessage]) {
    println!();
    println!("  {} message(s)", messages.len());
    println!();

    if messages.is_empty() {
        return;
    }

    println!(
        "  {:<17} {:<25} {:<40} {}",
        "Date", "From", "Subject", "Id"
    );
    println!("  {}", "-".repeat(110));

    for msg in messages {
        let date = msg.date.format("%Y-%m-%d %H:%M").to_string();
        let from: String = msg.from_addr.chars().take(24).collect();
        let subject: String = msg.subject.chars().take(39).collect();
        println!("  {date:<17} {from:<25} {subject:<40} {}", msg.id);
    }
    println!();
}

fn print_message(msg: &CanonicalMessage) {
    use humansize::{format_size, BINARY};

    println!("Id:       {}", msg.id);
    println!("Thread:   {}", msg.thread_id);
    println!("Date:     {}", msg.date.to_rfc3339());
    println!("From:     {}", msg.from_addr);
    println!("To:       {}", msg.to_addrs.join(", "));
    if !msg.cc_addrs.is_empty() {
        println!("Cc:       {}", msg.cc_addrs.join(", "));
    }
    println!("Subject:  {}", msg.subject);
    for att in &msg.attachments {
        println!(
            "Attached: {} ({}, {})",
            att.filename,
            att.content_type,
            format_size(att.size_bytes, BINARY)
        );
    }
    println!();
    println!("{}", msg.body_text);
}

fn print_thread(thread: &ThreadView) {
    println!();
    println!("  {:<14} {}", "Thread", thread.thread_id);
    println!("  {:<14} {}", "Subject", thread.subject);
    println!("  {:<14} {}", "Messages", thread.message_count);
    println!(
        "  {:<14} {} .. {}",
        "Dates",
        thread.date_range.0.format("%Y-%m-%d %H:%M"),
        thread.date_range.1.format("%Y-%m-%d %H:%M")
    );
    println!("  {:<14} {}", "Participants", thread.participants.join(", "));
    println!();
    for msg in &thread.messages {
        println!(
            "  {}  {:<25} {}",
            msg.date.format("%Y-%m-%d %H:%M"),
            msg.from_addr,
            msg.id
        );
    }
    println!();
}

/// Print statistics in a human-readable table.
fn print_stats_table(root: &Path, stats: &StoreStats, disk: u64) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<16} {}", "Storage", root.display());
    println!("  {:<16} {}", "Messages", stats.message_count);
    println!("  {:<16} {}", "Threads", stats.thread_count);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "  {:<16} {} .. {}",
            "Date range",
            oldest.format("%Y-%m-%d"),
            newest.format("%Y-%m-%d")
        );
    }
    println!("  {:<16} {}", "Disk usage", format_size(disk, BINARY));
    println!();
}
