//! Rosterload CLI - bulk user import for an LMS
//!
//! # Main Commands
//!
//! ```bash
//! rosterload serve                   # Start HTTP server (port 3000)
//! rosterload import users.csv        # Validate and batch-create users
//! rosterload template -o users.csv   # Write the import template
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! rosterload parse users.xlsx        # Just parse to JSON
//! rosterload check users.csv         # Validate against the live system
//! rosterload check users.csv --offline --course c1 --course c2
//! ```

use clap::{Parser, Subcommand};
use rosterload::{
    build_template, build_template_xlsx, parse_file, report::render, stage_file,
    HttpLmsClient, ImportConfig, ImportError, StagingSession, SubmissionCoordinator,
    SubmitOptions, ValidationContext,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rosterload")]
#[command(about = "Bulk-import user accounts from CSV or spreadsheet files", long_about = None)]
struct Cli {
    /// LMS API base URL (overrides ROSTERLOAD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the import template
    Template {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write an XLSX workbook instead of CSV
        #[arg(long)]
        xlsx: bool,
    },

    /// Parse a file and output its records as JSON
    Parse {
        /// Input CSV or spreadsheet file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a file without creating anything
    Check {
        /// Input CSV or spreadsheet file
        input: PathBuf,

        /// Do not contact the LMS; only known courses given with --course
        #[arg(long)]
        offline: bool,

        /// Known course id (offline mode)
        #[arg(long = "course")]
        courses: Vec<String>,
    },

    /// Validate a file, then create all valid users in one batch
    Import {
        /// Input CSV or spreadsheet file
        input: PathBuf,

        /// Do not send welcome messages
        #[arg(long)]
        no_welcome: bool,

        /// Stop after validation
        #[arg(long)]
        dry_run: bool,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on (overrides ROSTERLOAD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match load_config(cli.api_url) {
        Ok(config) => match cli.command {
            Commands::Template { output, xlsx } => cmd_template(output.as_deref(), xlsx),
            Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),
            Commands::Check {
                input,
                offline,
                courses,
            } => cmd_check(&config, &input, offline, courses).await,
            Commands::Import {
                input,
                no_welcome,
                dry_run,
            } => cmd_import(&config, &input, no_welcome, dry_run).await,
            Commands::Serve { port } => cmd_serve(config, port).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(api_url: Option<String>) -> Result<ImportConfig, Box<dyn std::error::Error>> {
    let mut config = ImportConfig::from_env()?;
    if let Some(url) = api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn cmd_template(output: Option<&Path>, xlsx: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = if xlsx { build_template_xlsx()? } else { build_template()? };

    match output {
        Some(p) => {
            fs::write(p, &bytes)?;
            eprintln!("💾 Template written to: {}", p.display());
        }
        None if xlsx => return Err("XLSX output needs --output".into()),
        None => print!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let result = parse_file(input)?;
    eprintln!("   Encoding: {}", result.encoding);
    if let Some(d) = result.delimiter {
        eprintln!("   Delimiter: '{}'", format_delimiter(d));
    }
    eprintln!("   Columns: {}", result.headers.join(", "));
    if !result.ignored_columns.is_empty() {
        eprintln!("   Ignored: {}", result.ignored_columns.join(", "));
    }
    eprintln!("✅ Parsed {} records", result.records.len());

    let json = serde_json::to_string_pretty(&result.records)?;
    write_output(&json, output)?;

    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

async fn cmd_check(
    config: &ImportConfig,
    input: &Path,
    offline: bool,
    courses: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = if offline {
        let records = parse_file(input)?.records;
        StagingSession::new(records, ValidationContext::new(Vec::<String>::new(), courses))
    } else {
        let client = HttpLmsClient::from_config(config);
        stage_file(&client, input, config.page_size).await?
    };

    report_validation(&mut session)?;
    eprintln!("✅ All {} records valid!", session.len());
    Ok(())
}

/// Print every validation error; fails when there is at least one.
fn report_validation(session: &mut StagingSession) -> Result<(), ImportError> {
    if session.is_empty() {
        return Err(ImportError::EmptyInput);
    }

    let invalid = session.revalidate_all();
    if invalid.is_empty() {
        return Ok(());
    }

    eprintln!("\n✔️  Validation:");
    eprintln!("   ✅ Valid: {}", session.len() - invalid.len());
    eprintln!("   ❌ Invalid: {}", invalid.len());
    for (_, errors) in &invalid {
        for err in errors {
            eprintln!("     - {}", err);
        }
    }
    Err(ImportError::Invalid(invalid.len()))
}

async fn cmd_import(
    config: &ImportConfig,
    input: &Path,
    no_welcome: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", input.display());

    let client = HttpLmsClient::from_config(config);
    let mut session = stage_file(&client, input, config.page_size).await?;
    match report_validation(&mut session) {
        Err(ImportError::Invalid(n)) if !dry_run && n < session.len() => {
            eprintln!("⚠️  Skipping {} invalid records", n);
        }
        result => result?,
    }

    if dry_run {
        eprintln!("✅ {} records valid, nothing sent (dry run)", session.len());
        return Ok(());
    }

    let options = SubmitOptions {
        send_welcome: config.send_welcome && !no_welcome,
    };
    let outcome = SubmissionCoordinator::new(&client, options)
        .submit_batch(&mut session)
        .await;

    println!("{}", render(&outcome));
    if !outcome.success {
        return Err(outcome.message.into());
    }
    Ok(())
}

async fn cmd_serve(mut config: ImportConfig, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.port = port;
    }
    rosterload::server::start_server(config).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

