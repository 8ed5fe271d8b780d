//! Config command - shows, creates or locates the settings file

use anyhow::{Context, Result};
use console::style;
use disktest_core::{format_size, Settings};
use std::path::PathBuf;

/// Arguments for the config command
pub struct ConfigArgs {
    /// Write a settings file with the defaults
    pub init: bool,
    /// Print only the settings file path
    pub path: bool,
    /// Print the effective settings as JSON
    pub json: bool,
    /// Print nothing
    pub silent: bool,
    /// Settings file to use instead of the default location
    pub config_file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    let location = args.config_file.clone().or_else(Settings::config_path);

    if args.path {
        match &location {
            Some(path) => println_if!(args.silent, "{}", path.display()),
            None if !args.silent => {
                eprintln!("{}", style("This system has no configuration directory").yellow())
            }
            None => {}
        }
        return Ok(());
    }

    if args.init {
        let path = location.context("This system has no configuration directory")?;
        return init(path, args.silent);
    }

    if !args.silent {
        show(location, args.json)?;
    }
    Ok(())
}

/// Write the default settings unless a file is already there
fn init(path: PathBuf, silent: bool) -> Result<()> {
    if path.exists() {
        if !silent {
            eprintln!(
                "{} {} already exists; edit it or delete it first",
                style("Warning:").yellow(),
                path.display()
            );
        }
        return Ok(());
    }

    let path = Settings::default()
        .save_to_path(Some(path))
        .context("Failed to write settings file")?;

    println_if!(
        silent,
        "{} Created configuration file at: {}",
        style("✓").green(),
        path.display()
    );
    println_if!(
        silent,
        "  Values in [test] become the defaults of 'disktest run'; [logging] log_dir is \
         used when the tested directory cannot hold the log."
    );
    Ok(())
}

/// Print the effective settings
fn show(location: Option<PathBuf>, json: bool) -> Result<()> {
    let found = location.as_ref().filter(|p| p.exists()).cloned();
    let settings = Settings::load_from_path(location.clone());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&settings).context("Failed to encode settings")?
        );
        return Ok(());
    }

    match (&found, &location) {
        (Some(path), _) => println!("{} {}", style("Settings:").bold(), path.display()),
        (None, Some(path)) => println!(
            "{} {} {}",
            style("Settings:").bold(),
            path.display(),
            style("(absent, defaults shown)").yellow()
        ),
        (None, None) => println!("{} {}", style("Settings:").bold(), "defaults"),
    }
    println!();

    let test = &settings.test;
    println!("{}", style("[test]").cyan());
    println!(
        "  file_size  = \"{}\"{}",
        test.file_size,
        describe_size(test.file_size_bytes().ok())
    );
    println!(
        "  chunk_size = \"{}\"{}",
        test.chunk_size,
        describe_size(test.chunk_size_bytes().ok().map(|s| s as u64))
    );
    println!("  patterns   = \"{}\"", test.patterns);

    println!("{}", style("[logging]").cyan());
    match &settings.logging.log_dir {
        Some(dir) => println!("  log_dir = \"{}\"", dir.display()),
        None => println!("  {}", style("# log_dir unset; logs stay in the tested directory").dim()),
    }

    println!("{}", style("[behavior]").cyan());
    println!("  skip_confirmation = {}", settings.behavior.skip_confirmation);
    println!("  quiet = {}", settings.behavior.quiet);

    if found.is_none() {
        println!();
        println!("{}", style("'disktest config --init' writes these defaults to disk.").dim());
    }
    Ok(())
}

fn describe_size(bytes: Option<u64>) -> String {
    bytes.map_or_else(String::new, |b| format!("  # {}", format_size(b)))
}
