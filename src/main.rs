/*!
 * Hauler CLI - parallel transfers against S3 and S3-compatible stores
 */

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hauler::config::{GetObjectType, LogLevel, TransferConfig};
use hauler::error::{TransferError, EXIT_FATAL, EXIT_SUCCESS};
use hauler::protocol::s3::{S3Store, S3StoreConfig};
use hauler::{
    logging, Client, DirectoryTransferOutput, DownloadDirectoryInput, GetObjectInput,
    IgnorePolicy, ProgressReporter, PutObjectInput, UploadDirectoryInput,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hauler")]
#[command(version, about = "Parallel object storage transfers", long_about = None)]
struct Cli {
    /// Configuration file (TOML); command line flags override it
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Workers per object transfer
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Objects transferred at once by directory commands
    #[arg(long, global = true)]
    directory_concurrency: Option<usize>,

    /// Part size in MiB (minimum 5)
    #[arg(long, value_name = "MIB", global = true)]
    part_size: Option<u64>,

    /// Print progress events to stderr as JSON lines
    #[arg(long, global = true)]
    progress: bool,

    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Custom endpoint URL (MinIO, LocalStack, ...)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Use path-style addressing
    #[arg(long, global = true)]
    path_style: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one object to a file, or to stdout with `-`
    Get {
        /// s3://bucket/key
        uri: String,
        destination: PathBuf,

        /// HTTP byte range, e.g. bytes=0-1023
        #[arg(long, conflicts_with = "part_number")]
        range: Option<String>,

        /// Fetch a single native part
        #[arg(long)]
        part_number: Option<u32>,

        #[arg(long)]
        version_id: Option<String>,

        /// Fetch by the object's own upload parts instead of byte ranges
        #[arg(long)]
        parts: bool,
    },

    /// Upload a file, or stdin with `-`
    Put {
        source: PathBuf,
        /// s3://bucket/key
        uri: String,

        #[arg(long)]
        content_type: Option<String>,
    },

    /// Download every object under a prefix into a directory
    DownloadDir {
        /// s3://bucket/prefix
        uri: String,
        destination: PathBuf,

        /// Count failed objects and keep going
        #[arg(long)]
        ignore_failures: bool,
    },

    /// Upload a directory under a prefix
    UploadDir {
        source: PathBuf,
        /// s3://bucket/prefix
        uri: String,

        #[arg(short = 'R', long)]
        recursive: bool,

        #[arg(long)]
        follow_symlinks: bool,

        /// Joins path segments into keys
        #[arg(long, default_value = "/")]
        delimiter: String,

        /// Count failed files and keep going
        #[arg(long)]
        ignore_failures: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<TransferError>()
                .map(TransferError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    logging::init_logging(&config)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(execute(cli, config))
}

/// Layer command line flags over the config file
fn build_config(cli: &Cli) -> anyhow::Result<TransferConfig> {
    let mut config = match &cli.config {
        Some(path) => TransferConfig::from_file(path)?,
        None => TransferConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(concurrency) = cli.directory_concurrency {
        config.directory_concurrency = concurrency;
    }
    if let Some(mib) = cli.part_size {
        config.part_size_bytes = mib * 1024 * 1024;
    }
    if let Commands::Get { parts: true, .. } = cli.command {
        config.get_object_type = GetObjectType::Parts;
    }
    config.validate()?;
    Ok(config)
}

async fn execute(cli: Cli, config: TransferConfig) -> anyhow::Result<()> {
    let store = S3Store::new(S3StoreConfig {
        region: cli.store.region.clone(),
        endpoint: cli.store.endpoint.clone(),
        force_path_style: cli.store.path_style,
        ..Default::default()
    })
    .await?;

    let mut options = hauler::Options::new(config);
    if cli.progress {
        let (reporter, mut events) = ProgressReporter::new();
        let reporter = Arc::new(reporter);
        options.progress.register(reporter.clone());
        options.directory_progress.register(reporter);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        });
    }
    let client = Client::from_parts(
        Arc::new(store),
        Arc::new(hauler::LocalFileSystem),
        options,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling transfer");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Get {
            uri,
            destination,
            range,
            part_number,
            version_id,
            parts: _,
        } => {
            let (bucket, key) = parse_s3_uri(&uri)?;
            let mut input = GetObjectInput::new(bucket, key);
            input.range = range;
            input.part_number = part_number;
            input.version_id = version_id;

            let output = if destination.as_os_str() == "-" {
                let mut stdout = tokio::io::stdout();
                client.download_object(input, &mut stdout, &cancel).await?
            } else {
                let mut file = tokio::fs::File::create(&destination)
                    .await
                    .with_context(|| format!("Failed to create {}", destination.display()))?;
                client.download_object(input, &mut file, &cancel).await?
            };
            info!(bytes = output.bytes_written, etag = ?output.etag, "download complete");
        }

        Commands::Put {
            source,
            uri,
            content_type,
        } => {
            let (bucket, key) = parse_s3_uri(&uri)?;
            let mut input = if source.as_os_str() == "-" {
                PutObjectInput::new(bucket, key, tokio::io::stdin())
            } else {
                let file = tokio::fs::File::open(&source)
                    .await
                    .with_context(|| format!("Failed to open {}", source.display()))?;
                let len = file.metadata().await?.len();
                PutObjectInput::new(bucket, key, file).with_content_length(len)
            };
            if let Some(content_type) = content_type {
                input = input.with_content_type(content_type);
            }

            let output = client.put_object(input, &cancel).await?;
            info!(
                bytes = output.bytes_transferred,
                parts = output.parts_count,
                etag = ?output.etag,
                "upload complete"
            );
        }

        Commands::DownloadDir {
            uri,
            destination,
            ignore_failures,
        } => {
            let (bucket, prefix) = parse_s3_uri(&uri)?;
            let mut input = DownloadDirectoryInput::new(bucket, destination);
            if !prefix.is_empty() {
                input = input.with_key_prefix(prefix);
            }
            if ignore_failures {
                input = input.with_failure_policy(IgnorePolicy);
            }
            let output = client.download_directory(input, &cancel).await?;
            report_directory("downloaded", &output);
        }

        Commands::UploadDir {
            source,
            uri,
            recursive,
            follow_symlinks,
            delimiter,
            ignore_failures,
        } => {
            let (bucket, prefix) = parse_s3_uri(&uri)?;
            let mut input = UploadDirectoryInput::new(bucket, source)
                .recursive(recursive)
                .follow_symbolic_links(follow_symlinks)
                .with_delimiter(delimiter);
            if !prefix.is_empty() {
                input = input.with_key_prefix(prefix);
            }
            if ignore_failures {
                input = input.with_failure_policy(IgnorePolicy);
            }
            let output = client.upload_directory(input, &cancel).await?;
            report_directory("uploaded", &output);
        }
    }

    Ok(())
}

fn report_directory(verb: &str, output: &DirectoryTransferOutput) {
    println!(
        "{} {} objects ({} bytes), {} failed",
        verb, output.objects_transferred, output.bytes_transferred, output.objects_failed
    );
}

/// Split `s3://bucket/key` into bucket and key; the key may be empty
fn parse_s3_uri(uri: &str) -> anyhow::Result<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| anyhow!("expected an s3://bucket/key URI, got {}", uri))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        bail!("missing bucket in {}", uri);
    }
    Ok((bucket.to_string(), key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri() {
        assert_eq!(
            parse_s3_uri("s3://bucket/photos/a.jpg").unwrap(),
            ("bucket".to_string(), "photos/a.jpg".to_string())
        );
        assert_eq!(
            parse_s3_uri("s3://bucket").unwrap(),
            ("bucket".to_string(), String::new())
        );
        assert!(parse_s3_uri("/local/path").is_err());
        assert!(parse_s3_uri("s3:///key").is_err());
    }

    #[test]
    fn test_cli_parses_upload_dir() {
        let cli = Cli::try_parse_from([
            "hauler",
            "--part-size",
            "16",
            "upload-dir",
            "/data",
            "s3://bucket/backup",
            "-R",
            "--ignore-failures",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.part_size_bytes, 16 * 1024 * 1024);
        assert!(matches!(
            cli.command,
            Commands::UploadDir {
                recursive: true,
                ignore_failures: true,
                ..
            }
        ));
    }

    #[test]
    fn test_get_parts_switches_object_type() {
        let cli = Cli::try_parse_from(["hauler", "get", "s3://b/k", "out.bin", "--parts"]).unwrap();
        assert_eq!(build_config(&cli).unwrap().get_object_type, GetObjectType::Parts);
    }
}
