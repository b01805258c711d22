//! Perceptra storage CLI - Command line interface for storage backends.
//!
//! Runs any adapter operation against any registered backend, configured
//! from JSON files and/or `key=value` flags.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use perceptra_common::{AdapterConfig, Credentials};
use perceptra_storage::{available_backends, get_storage_adapter, AccessMethod, StorageAdapter, UploadOptions};

/// Environment variable holding credentials as a JSON object.
const CREDENTIALS_ENV: &str = "PERCEPTRA_CREDENTIALS";

#[derive(Parser)]
#[command(name = "perceptra")]
#[command(about = "Perceptra - Object storage adapter toolkit")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Backend selection shared by every storage command.
#[derive(Args)]
struct BackendArgs {
    /// Backend identifier (local, memory, s3, minio, azure, remote).
    #[arg(short, long)]
    backend: String,

    /// JSON file with backend configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file with backend credentials.
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Configuration option as key=value (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Credential as key=value (repeatable).
    #[arg(long = "cred", value_name = "KEY=VALUE")]
    creds: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered backends.
    Backends,

    /// Check that the backend and its storage scope are reachable.
    Test {
        #[command(flatten)]
        backend: BackendArgs,

        /// Timeout in seconds.
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },

    /// Upload a local file.
    Upload {
        #[command(flatten)]
        backend: BackendArgs,

        /// Source file.
        #[arg(short, long)]
        source: PathBuf,

        /// Destination key.
        #[arg(short, long)]
        key: String,

        /// Content type to store with the object.
        #[arg(long)]
        content_type: Option<String>,

        /// User metadata as key=value (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// Download an object.
    Download {
        #[command(flatten)]
        backend: BackendArgs,

        /// Source key.
        #[arg(short, long)]
        key: String,

        /// Destination file; content goes to stdout if omitted.
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Delete an object.
    Delete {
        #[command(flatten)]
        backend: BackendArgs,

        #[arg(short, long)]
        key: String,
    },

    /// Check whether an object exists.
    Exists {
        #[command(flatten)]
        backend: BackendArgs,

        #[arg(short, long)]
        key: String,
    },

    /// Show object metadata as JSON.
    Stat {
        #[command(flatten)]
        backend: BackendArgs,

        #[arg(short, long)]
        key: String,
    },

    /// List objects by prefix.
    List {
        #[command(flatten)]
        backend: BackendArgs,

        /// Key prefix (default: everything).
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 1000)]
        max_results: usize,
    },

    /// Generate a temporary access URL.
    Presign {
        #[command(flatten)]
        backend: BackendArgs,

        #[arg(short, long)]
        key: String,

        /// Lifetime in seconds.
        #[arg(short, long, default_value_t = 3600)]
        expires: u64,

        /// GET, PUT or DELETE.
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Print the public URL of an object, if the backend has one.
    Url {
        #[command(flatten)]
        backend: BackendArgs,

        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Backends => cmd_backends(),

        Commands::Test { backend, timeout } => cmd_test(&backend, timeout).await,

        Commands::Upload {
            backend,
            source,
            key,
            content_type,
            metadata,
        } => cmd_upload(&backend, &source, &key, content_type, &metadata).await,

        Commands::Download { backend, key, dest } => {
            cmd_download(&backend, &key, dest.as_deref()).await
        }

        Commands::Delete { backend, key } => cmd_delete(&backend, &key).await,

        Commands::Exists { backend, key } => cmd_exists(&backend, &key).await,

        Commands::Stat { backend, key } => cmd_stat(&backend, &key).await,

        Commands::List {
            backend,
            prefix,
            max_results,
        } => cmd_list(&backend, &prefix, max_results).await,

        Commands::Presign {
            backend,
            key,
            expires,
            method,
        } => cmd_presign(&backend, &key, expires, &method).await,

        Commands::Url { backend, key } => cmd_url(&backend, &key).await,
    }
}

/// Split a `key=value` flag.
fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty key in {:?}", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Merge the configuration file with `--set` flags; flags win.
fn load_config(args: &BackendArgs) -> Result<AdapterConfig> {
    let mut config = match &args.config {
        Some(path) => AdapterConfig::from_json(read_json(path)?).context("Invalid configuration")?,
        None => AdapterConfig::new(),
    };

    for raw in &args.options {
        let (key, value) = parse_pair(raw)?;
        config = config.with(key, value);
    }

    Ok(config)
}

/// Merge credentials from the environment, the credentials file and
/// `--cred` flags, in increasing precedence.
fn load_credentials(args: &BackendArgs) -> Result<Credentials> {
    let mut entries: HashMap<String, String> = HashMap::new();

    if let Ok(raw) = std::env::var(CREDENTIALS_ENV) {
        let from_env: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("{} must be a JSON object of strings", CREDENTIALS_ENV))?;
        entries.extend(from_env);
    }

    if let Some(path) = &args.credentials {
        let from_file: HashMap<String, String> = serde_json::from_value(read_json(path)?)
            .context("Credentials file must be a JSON object of strings")?;
        entries.extend(from_file);
    }

    for raw in &args.creds {
        let (key, value) = parse_pair(raw)?;
        entries.insert(key, value);
    }

    Ok(entries.into_iter().collect())
}

fn open_adapter(args: &BackendArgs) -> Result<Arc<dyn StorageAdapter>> {
    let config = load_config(args)?;
    let credentials = load_credentials(args)?;

    let adapter = get_storage_adapter(&args.backend, config, credentials)
        .with_context(|| format!("Failed to open {} backend", args.backend))?;
    info!("Using storage adapter: {:?}", adapter);
    Ok(adapter)
}

/// List registered backends.
fn cmd_backends() -> Result<()> {
    for backend in available_backends() {
        println!("{}", backend);
    }
    Ok(())
}

async fn cmd_test(args: &BackendArgs, timeout: u64) -> Result<()> {
    let adapter = open_adapter(args)?;

    adapter
        .test_connection(Duration::from_secs(timeout))
        .await
        .context("Connection test failed")?;

    println!("Connection OK: {}", adapter.name());
    Ok(())
}

/// Upload a local file.
async fn cmd_upload(
    args: &BackendArgs,
    source: &Path,
    key: &str,
    content_type: Option<String>,
    metadata: &[String],
) -> Result<()> {
    let adapter = open_adapter(args)?;
    let data = tokio::fs::read(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;

    let mut options = UploadOptions::new();
    if let Some(content_type) = content_type {
        options = options.content_type(content_type);
    }
    for raw in metadata {
        let (name, value) = parse_pair(raw)?;
        options = options.metadata(name, value);
    }

    let size = data.len();
    let stored = adapter
        .upload(key, data, options)
        .await
        .context("Upload failed")?;

    println!("Uploaded {} bytes to {}", size, stored);
    Ok(())
}

async fn cmd_download(args: &BackendArgs, key: &str, dest: Option<&Path>) -> Result<()> {
    let adapter = open_adapter(args)?;
    let data = adapter
        .download(key, dest)
        .await
        .context("Download failed")?;

    match dest {
        Some(dest) => println!("Downloaded {} bytes to {}", data.len(), dest.display()),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&data)
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

async fn cmd_delete(args: &BackendArgs, key: &str) -> Result<()> {
    let adapter = open_adapter(args)?;
    adapter.delete(key).await.context("Delete failed")?;

    println!("Deleted {}", key);
    Ok(())
}

async fn cmd_exists(args: &BackendArgs, key: &str) -> Result<()> {
    let adapter = open_adapter(args)?;
    let exists = adapter.exists(key).await.context("Exists check failed")?;

    println!("{}", exists);
    Ok(())
}

async fn cmd_stat(args: &BackendArgs, key: &str) -> Result<()> {
    let adapter = open_adapter(args)?;
    let object = adapter.metadata(key).await.context("Metadata lookup failed")?;

    println!("{}", serde_json::to_string_pretty(&object)?);
    Ok(())
}

/// List objects by prefix.
async fn cmd_list(args: &BackendArgs, prefix: &str, max_results: usize) -> Result<()> {
    let adapter = open_adapter(args)?;
    let objects = adapter
        .list(prefix, max_results)
        .await
        .context("List failed")?;

    if objects.is_empty() {
        println!("(no objects)");
        return Ok(());
    }

    for object in objects {
        println!(
            "{:>12}  {}  {}",
            object.size,
            object.last_modified.format("%Y-%m-%d %H:%M:%S"),
            object.key
        );
    }
    Ok(())
}

async fn cmd_presign(args: &BackendArgs, key: &str, expires: u64, method: &str) -> Result<()> {
    let method: AccessMethod = method.parse()?;
    let adapter = open_adapter(args)?;

    let presigned = adapter
        .presigned_url(key, Duration::from_secs(expires), method)
        .await
        .context("Presigned URL generation failed")?;

    println!("{}", presigned.url);
    println!("  Method: {}", presigned.method);
    println!("  Expires: {}", presigned.expires_at.to_rfc3339());
    Ok(())
}

async fn cmd_url(args: &BackendArgs, key: &str) -> Result<()> {
    let adapter = open_adapter(args)?;

    match adapter.public_url(key) {
        Some(url) => println!("{}", url),
        None => println!("{} has no public URLs", adapter.name()),
    }
    Ok(())
}
