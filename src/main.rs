use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rubymap::core::{
    obtain_record, open_cache, print_error_message, print_info_message, read_input,
    record_from_table_file, sheet_endpoints, DocumentProcessor, RubymapError, RubymapOptions,
};
use rubymap::env::{self, EnvVar};
use rubymap::network::cache::CacheRecord;
use rubymap::rewrite::config::{AppConfig, ConfigManager};

#[derive(Parser, Debug)]
#[command(name = "rubymap", version)]
#[command(about = "Annotate HTML documents with ruby substitutions from a spreadsheet mapping")]
#[command(after_help = "Domain restriction is on by default and the allow-list (`allowed_hosts` \
in the configuration file) starts empty, so no page is rewritten until hosts are configured \
or --no-domain-restriction is given.")]
struct Cli {
    /// HTML file to process, or "-" for stdin
    #[arg(required_unless_present_any = ["refresh", "show_cache", "env_help"])]
    input: Option<String>,

    /// Local CSV export to build the mapping from
    #[arg(short, long, conflicts_with = "sheet")]
    table: Option<PathBuf>,

    /// Spreadsheet export URL to fetch the mapping from
    #[arg(short, long)]
    sheet: Option<String>,

    /// Show the original text as the base and the replacement as annotation
    #[arg(long)]
    swap: bool,

    /// Rewrite regardless of the domain allow-list (empty unless configured)
    #[arg(long)]
    no_domain_restriction: bool,

    /// Page URL used for the domain allow-list
    #[arg(short = 'u', long)]
    page_url: Option<String>,

    /// Referrer URL used for the domain allow-list
    #[arg(long)]
    referrer: Option<String>,

    /// Revert a previously rewritten document
    #[arg(long)]
    restore: bool,

    /// Charset of the input document
    #[arg(short = 'E', long)]
    encoding: Option<String>,

    /// Do not insert the notice banner
    #[arg(long)]
    no_notice: bool,

    /// Write the result to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Refresh the cached mapping and print the record
    #[arg(long)]
    refresh: bool,

    /// Print the cached mapping record
    #[arg(long)]
    show_cache: bool,

    /// Configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Print the supported environment variables
    #[arg(long)]
    env_help: bool,

    /// Suppress the summary on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(cli) {
        print_error_message(&format!("Error: {e}"));
        process::exit(1);
    }
}

fn init_logging() {
    let level = env::core::LogLevel::get_or_default("info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig, RubymapError> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::from_file(path)?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.into_config();

    if let Some(url) = &cli.sheet {
        config.endpoints = sheet_endpoints(url);
    }
    if cli.swap {
        config.settings.ruby_swap = true;
    }
    if cli.no_domain_restriction {
        config.settings.domain_only = false;
    }

    config.validate()?;
    if config.settings.domain_only && config.allowed_hosts.is_empty() {
        tracing::warn!("域名限制已开启但允许列表为空，不会改写任何页面");
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), RubymapError> {
    if cli.env_help {
        print!("{}", env::generate_env_docs());
        return Ok(());
    }

    let config = load_config(&cli)?;

    if cli.refresh || cli.show_cache {
        let mut cache = open_cache(&config)?;
        if cli.refresh {
            let outcome = cache.refresh();
            if !cli.quiet {
                print_info_message(&format!(
                    "Refreshed: ok={}, entries={}",
                    outcome.ok,
                    outcome.entry_count.unwrap_or(0)
                ));
            }
        }
        print_record(&cache.get())?;
        return match cache.get().error() {
            Some(error) if cli.refresh => Err(RubymapError::Unavailable(error.to_string())),
            _ => Ok(()),
        };
    }

    let input = cli.input.as_deref().unwrap_or("-");
    let input_data = read_input(input)?;

    let record = if cli.restore {
        CacheRecord::default()
    } else if let Some(table) = &cli.table {
        record_from_table_file(table)?
    } else {
        let mut cache = open_cache(&config)?;
        obtain_record(&mut cache, cli.sheet.is_some())?
    };

    let options = RubymapOptions {
        encoding: cli.encoding.clone(),
        page_url: cli.page_url.clone(),
        top_url: None,
        referrer: cli.referrer.clone(),
        settings: config.settings,
        allowed_hosts: config.allowed_hosts.clone(),
        restore: cli.restore,
        no_notice: cli.no_notice,
    };
    let processed = DocumentProcessor::new(options).process_document(&input_data, &record)?;

    match &cli.output {
        Some(path) => fs::write(path, &processed.data)?,
        None => io::stdout().write_all(&processed.data)?,
    }

    if !cli.quiet {
        if cli.restore {
            print_info_message(&format!("Restored {} unit(s)", processed.restored));
        } else {
            print_info_message(&format!("Replaced {} unit(s)", processed.changed));
            for sample in &processed.samples {
                print_info_message(&format!("  {} -> {}", sample.before, sample.after));
            }
        }
        if let Some(notice) = &processed.notice {
            print_error_message(notice.message());
        }
    }

    Ok(())
}

fn print_record(record: &CacheRecord) -> Result<(), RubymapError> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| RubymapError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    println!("{json}");
    Ok(())
}
