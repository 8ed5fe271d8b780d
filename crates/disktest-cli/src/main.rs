//! Disktest - checks storage media by filling them with pattern files
//!
//! # Usage
//!
//! ```bash
//! # Test 10 GB of a mounted USB stick with all patterns
//! disktest run /media/usb --size 10G
//!
//! # Continue after Ctrl+C or a crash
//! disktest resume /media/usb
//!
//! # Show progress of a saved session
//! disktest status /media/usb
//!
//! # Remove test files
//! disktest purge /media/usb
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use clap_mangen::Man;
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Conditionally println based on silent mode
macro_rules! println_if {
    ($silent:expr) => {
        if !$silent {
            println!();
        }
    };
    ($silent:expr, $($arg:tt)*) => {
        if !$silent {
            println!($($arg)*);
        }
    };
}

mod commands;
mod logfile;
mod progress;
mod runner;

/// Disktest - checks storage media by filling them with pattern files
#[derive(Parser)]
#[command(name = "disktest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress ALL output (implies --quiet and --yes)
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new test
    Run {
        /// Directory on the medium to test
        dir: PathBuf,

        /// Total amount of data to test (e.g., 10G, 500M)
        #[arg(short, long)]
        size: String,

        /// Size of each test file (default from settings, 1G)
        #[arg(short, long)]
        file_size: Option<String>,

        /// Patterns to run, comma separated (00, FF, AA, 55, RND)
        #[arg(short, long)]
        patterns: Option<String>,

        /// Read and write chunk size, a multiple of 4K (default from settings, 32M)
        #[arg(long)]
        chunk_size: Option<String>,

        /// Seed for the random pattern
        #[arg(long, hide = true)]
        seed: Option<u64>,

        /// Verify through the page cache instead of bypassing it
        #[arg(long)]
        no_direct_io: bool,

        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,

        /// Fallback directory for the log file
        #[arg(long, env = "DISKTEST_LOG_DIR")]
        log_dir: Option<PathBuf>,
    },

    /// Continue a saved test
    Resume {
        /// Directory holding the session
        dir: PathBuf,

        /// New total size (files are added or dropped)
        #[arg(short, long)]
        size: Option<String>,

        /// New pattern selection
        #[arg(short, long)]
        patterns: Option<String>,

        /// Verify through the page cache instead of bypassing it
        #[arg(long)]
        no_direct_io: bool,

        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,

        /// Fallback directory for the log file
        #[arg(long, env = "DISKTEST_LOG_DIR")]
        log_dir: Option<PathBuf>,
    },

    /// Show the saved session and test files
    Status {
        /// Directory to inspect
        dir: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Repair orphaned test files left without a session
    Recover {
        /// Directory holding the test files
        dir: PathBuf,

        /// Size the test files were created with
        #[arg(short, long)]
        file_size: String,

        /// Pattern to repair with (default: most common detected)
        #[arg(short, long)]
        pattern: Option<String>,

        /// Seed of the random pattern
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Delete test files and the session
    Purge {
        /// Directory to clean
        dir: PathBuf,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Manage configuration file
    Config {
        /// Initialize a new configuration file with default values
        #[arg(long)]
        init: bool,

        /// Show the path to the configuration file
        #[arg(long)]
        path: bool,

        /// Output configuration in JSON format
        #[arg(long)]
        json: bool,

        /// Use a custom configuration file
        #[arg(long, value_name = "FILE")]
        config_file: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man pages
    Mangen {
        /// Output directory for man pages
        #[arg(short, long, default_value = ".")]
        out_dir: String,
    },
}

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        if std::env::var("RUST_BACKTRACE").is_ok() {
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  {} {}", style("Caused by:").yellow(), cause);
                source = cause.source();
            }
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = disktest_core::Settings::load();

    let quiet = cli.quiet || settings.behavior.quiet;
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if quiet || cli.silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let silent = cli.silent;
    let skip_confirm = |yes: bool| yes || silent || settings.behavior.skip_confirmation;

    // The first Ctrl+C clears the flag; the runner turns that into an
    // interrupt that keeps the session. The second one exits.
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        if !r.load(std::sync::atomic::Ordering::SeqCst) {
            if !silent {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        r.store(false, std::sync::atomic::Ordering::SeqCst);
        if !silent {
            eprintln!(
                "\n{}",
                style("Stopping... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::Run {
            dir,
            size,
            file_size,
            patterns,
            chunk_size,
            seed,
            no_direct_io,
            yes,
            log_dir,
        } => commands::run::execute(commands::run::RunArgs {
            dir,
            size,
            file_size,
            patterns,
            chunk_size,
            seed,
            no_direct_io,
            skip_confirm: skip_confirm(yes),
            log_dir,
            cancel_flag: running,
            silent,
        }),
        Commands::Resume {
            dir,
            size,
            patterns,
            no_direct_io,
            yes,
            log_dir,
        } => commands::resume::execute(commands::resume::ResumeArgs {
            dir,
            size,
            patterns,
            no_direct_io,
            skip_confirm: skip_confirm(yes),
            log_dir,
            cancel_flag: running,
            silent,
        }),
        Commands::Status { dir, json } => commands::status::execute(&dir, json, silent),
        Commands::Recover {
            dir,
            file_size,
            pattern,
            seed,
        } => commands::recover::execute(commands::recover::RecoverArgs {
            dir,
            file_size,
            pattern,
            seed,
            silent,
        }),
        Commands::Purge { dir, yes } => {
            commands::purge::execute(&dir, skip_confirm(yes), silent)
        }
        Commands::Config {
            init,
            path,
            json,
            config_file,
        } => commands::config::execute(commands::config::ConfigArgs {
            init,
            path,
            json,
            silent,
            config_file,
        }),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Mangen { out_dir } => {
            let cmd = Cli::command();
            let out_path = std::path::Path::new(&out_dir);
            std::fs::create_dir_all(out_path)?;

            let man = Man::new(cmd.clone());
            let mut buffer = Vec::new();
            man.render(&mut buffer)?;
            std::fs::write(out_path.join("disktest.1"), buffer)?;
            println_if!(silent, "Generated: {}/disktest.1", out_dir);

            for subcommand in cmd.get_subcommands() {
                let name = subcommand.get_name();
                if subcommand.is_hide_set()
                    || name == "completions"
                    || name == "mangen"
                    || name == "help"
                {
                    continue;
                }

                let man = Man::new(subcommand.clone());
                let mut buffer = Vec::new();
                man.render(&mut buffer)?;
                let filename = format!("disktest-{}.1", name);
                std::fs::write(out_path.join(&filename), buffer)?;
                println_if!(silent, "Generated: {}/{}", out_dir, filename);
            }
            Ok(())
        }
    }
}
