//! CLI entry point for `userdata-expand`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};

use userdata_expand::config::{self, Config};
use userdata_expand::export::{mime, parts};
use userdata_expand::parser::archive::ArchiveHeaderMode;
use userdata_expand::Processor;

#[derive(Parser)]
#[command(
    name = "userdata-expand",
    version,
    about = "Flatten cloud user-data: resolve #include URLs and explode cloud-config archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// User-data file to expand ("-" for stdin)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Directory holding the include-once URL cache and log file
    #[arg(long, global = true, env = "USERDATA_EXPAND_CACHE_DIR", value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Abort when includes nest deeper than this
    #[arg(long, global = true, value_name = "N")]
    max_depth: Option<usize>,

    /// Give every extra archive header the value of the entry's `header` key
    #[arg(long, global = true)]
    literal_archive_headers: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a user-data document
    Process {
        /// Input file ("-" for stdin)
        path: PathBuf,
        /// Write the flattened MIME document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write each part as a separate file into this directory
        #[arg(long, value_name = "DIR")]
        split: Option<PathBuf>,
        /// Print a JSON summary of the parts instead of the document
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the standard config file location
        #[arg(long)]
        save: bool,
    },
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

    // Load configuration, then let flags win
    let (mut config, config_source) = config::load_config();
    if let Some(dir) = cli.cache_dir.clone() {
        config.general.cache_dir = Some(dir);
    }
    if cli.max_depth.is_some() {
        config.processing.max_depth = cli.max_depth;
    }
    if cli.literal_archive_headers {
        config.processing.archive_headers = ArchiveHeaderMode::Literal;
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    config_source.log();

    match cli.command {
        Some(Commands::Process {
            path,
            output,
            split,
            json,
        }) => cmd_process(&config, &path, output.as_deref(), split.as_deref(), json),
        Some(Commands::Config { save }) => cmd_config(&config, save),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => match cli.file {
            Some(path) => cmd_process(&config, &path, None, None, false),
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        },
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "userdata-expand.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Print the effective configuration, optionally saving it.
fn cmd_config(config: &Config, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if save {
        config::save_config(config)?;
        if let Some(path) = config::config_file_path() {
            eprintln!("  Saved config to {}", path.display());
        }
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "userdata-expand", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Expand a user-data file and write the result.
fn cmd_process(
    config: &Config,
    path: &Path,
    output: Option<&Path>,
    split: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let blob = read_input(path)?;

    let start = Instant::now();
    let processor = Processor::from_config(config)?;
    let container = processor.process(&blob)?;
    let elapsed = start.elapsed();

    if let Some(dir) = split {
        let written = parts::export_parts(&container, dir)?;
        eprintln!("  Wrote {} part(s) to {}", written.len(), dir.display());
    }

    if json {
        print_summary_json(&container, elapsed)?;
        return Ok(());
    }

    let rendered = mime::to_bytes(&container);
    match output {
        Some(out) => {
            if let Some(parent) = out.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(out, &rendered)?;
            print_summary_table(&container, rendered.len(), out, elapsed);
        }
        None => std::io::stdout().write_all(&rendered)?,
    }

    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(std::fs::read(path)?)
}

/// Print the part list in a human-readable table (stderr).
fn print_summary_table(
    container: &userdata_expand::Message,
    output_size: usize,
    output: &Path,
    elapsed: std::time::Duration,
) {
    use humansize::{format_size, BINARY};

    let summary = parts::summarize(container);
    eprintln!();
    eprintln!("  {:<4} {:<30} {:<30} {:>10}", "#", "Filename", "Content-Type", "Size");
    eprintln!("  {}", "-".repeat(77));
    for part in &summary {
        let name: String = part.filename.chars().take(29).collect();
        let ctype: String = part.content_type.chars().take(29).collect();
        eprintln!(
            "  {:<4} {:<30} {:<30} {:>10}",
            part.index,
            name,
            ctype,
            format_size(part.size, BINARY)
        );
    }
    eprintln!();
    eprintln!("  {:<20} {}", "Output file", output.display());
    eprintln!("  {:<20} {}", "Output size", format_size(output_size, BINARY));
    eprintln!("  {:<20} {:.2?}", "Elapsed", elapsed);
    eprintln!();
}

/// Print the part list as JSON.
fn print_summary_json(
    container: &userdata_expand::Message,
    elapsed: std::time::Duration,
) -> anyhow::Result<()> {
    let summary = parts::summarize(container);
    let output = serde_json::json!({
        "part_count": summary.len(),
        "elapsed_ms": elapsed.as_millis(),
        "parts": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
