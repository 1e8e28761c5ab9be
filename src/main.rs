//! modelcache - Cache Administration Tool
//!
//! Inspects and maintains a model cache directory shared by serving
//! processes.
//!
//! ```text
//! modelcache --cache-dir /var/cache/models put resnet50.pth ./resnet50.pth
//! modelcache --cache-dir /var/cache/models get resnet50.pth
//! modelcache --cache-dir /var/cache/models ls
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use modelcache::cache::{shard_index, DiskShardStats};
use modelcache::cache::{RemoteConfig, S3StoreConfig};
use modelcache::{CacheConfig, Error, HttpStoreConfig, Result, ShardRouter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Administer a multi-tier model artifact cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (YAML or JSON); flags override its values
    #[arg(long, env = "MODELCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, env = "MODELCACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Number of disk shards
    #[arg(long, env = "MODELCACHE_SHARDS")]
    num_shards: Option<usize>,

    /// Total disk capacity in bytes
    #[arg(long, env = "MODELCACHE_CAPACITY_BYTES")]
    capacity_bytes: Option<u64>,

    /// Lock acquisition timeout in milliseconds
    #[arg(long, env = "MODELCACHE_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,

    /// Remote tier backend; S3 credentials come from AWS_ACCESS_KEY_ID and
    /// AWS_SECRET_ACCESS_KEY
    #[arg(long, env = "MODELCACHE_REMOTE", value_enum)]
    remote: Option<RemoteKind>,

    /// Remote endpoint (required for http, optional for S3-compatible services)
    #[arg(long, env = "MODELCACHE_REMOTE_ENDPOINT")]
    remote_endpoint: Option<String>,

    /// Remote bucket
    #[arg(long, env = "BUCKET")]
    bucket: Option<String>,

    /// S3 region
    #[arg(long, env = "REGION_NAME")]
    region: Option<String>,

    /// Bearer token for the http remote
    #[arg(long, env = "MODELCACHE_REMOTE_TOKEN", hide_env_values = true)]
    remote_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RemoteKind {
    /// Amazon S3 or a SigV4-compatible service
    S3,
    /// Plain HTTP object access
    Http,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the local path of a cached file, fetching it from the remote store on a miss
    Get { key: String },
    /// Store a file in the cache and the remote store, if configured
    Put { key: String, file: PathBuf },
    /// Remove a file from the disk cache; the remote copy is kept
    Remove { key: String },
    /// List cached files per shard, least recently used first
    Ls,
    /// Print shard statistics as JSON
    Stats,
    /// Print the shard a key routes to
    Route { key: String },
}

/// Output of the `stats` command
#[derive(Debug, Serialize)]
struct CacheStats {
    cache_dir: PathBuf,
    total_size: u64,
    total_capacity: u64,
    entries: usize,
    shards: Vec<DiskShardStats>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;
    debug!(
        "Using cache {} ({} shards, {} bytes, remote: {})",
        config.disk.cache_dir.display(),
        config.disk.num_shards,
        config.disk.capacity_bytes,
        match &config.remote {
            Some(RemoteConfig::S3(s3)) => format!("s3://{} ({})", s3.bucket, s3.region),
            Some(RemoteConfig::Http(http)) => format!("{}/{}", http.endpoint, http.bucket),
            None => "none".to_string(),
        }
    );

    if let Command::Route { key } = &args.command {
        println!("{}", shard_index(key, config.disk.num_shards));
        return Ok(());
    }

    let router = ShardRouter::with_remote(config.disk.clone(), config.remote_store()?)?;

    match args.command {
        Command::Get { key } => match router.get(&key)? {
            Some(path) => println!("{}", path.display()),
            None => return Err(Error::NotFound(key)),
        },
        Command::Put { key, file } => {
            router.set(&key, &file)?;
            println!("{}", router.shard_for(&key).dir().join(&key).display());
        }
        Command::Remove { key } => {
            if !router.remove(&key)? {
                return Err(Error::NotFound(key));
            }
        }
        Command::Ls => {
            for (i, shard) in router.shards().iter().enumerate() {
                for entry in shard.entries()? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        i,
                        entry.key,
                        entry.size,
                        entry.last_access.to_rfc3339()
                    );
                }
            }
        }
        Command::Stats => {
            // Refresh each shard's view of its index before reporting
            for shard in router.shards() {
                shard.entries()?;
            }

            let shards = router.stats();
            let stats = CacheStats {
                cache_dir: config.disk.cache_dir.clone(),
                total_size: shards.iter().map(|s| s.size).sum(),
                total_capacity: shards.iter().map(|s| s.capacity).sum(),
                entries: shards.iter().map(|s| s.entries).sum(),
                shards,
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Route { .. } => {}
    }

    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };

    if let Some(cache_dir) = &args.cache_dir {
        config.disk.cache_dir = cache_dir.clone();
    }
    if let Some(num_shards) = args.num_shards {
        config.disk.num_shards = num_shards;
    }
    if let Some(capacity_bytes) = args.capacity_bytes {
        config.disk.capacity_bytes = capacity_bytes;
    }
    if let Some(ms) = args.lock_timeout_ms {
        config.disk.lock_timeout_ms = ms;
    }

    // A flag picks the backend; a file-configured backend of the same kind
    // keeps its settings.
    let configured = matches!(
        (args.remote, &config.remote),
        (Some(RemoteKind::S3), Some(RemoteConfig::S3(_)))
            | (Some(RemoteKind::Http), Some(RemoteConfig::Http(_)))
    );
    if !configured {
        match args.remote {
            Some(RemoteKind::S3) => {
                config.remote = Some(RemoteConfig::S3(S3StoreConfig::from_env()));
            }
            Some(RemoteKind::Http) => {
                config.remote = Some(RemoteConfig::Http(HttpStoreConfig::default()));
            }
            None => {}
        }
    }

    match config.remote.as_mut() {
        Some(RemoteConfig::S3(s3)) => {
            if let Some(endpoint) = &args.remote_endpoint {
                *s3 = s3.clone().with_endpoint(endpoint.clone());
            }
            if let Some(bucket) = &args.bucket {
                s3.bucket = bucket.clone();
            }
            if let Some(region) = &args.region {
                s3.region = region.clone();
            }
        }
        Some(RemoteConfig::Http(http)) => {
            if let Some(endpoint) = &args.remote_endpoint {
                http.endpoint = endpoint.clone();
            }
            if let Some(bucket) = &args.bucket {
                http.bucket = bucket.clone();
            }
            if let Some(token) = &args.remote_token {
                http.bearer_token = Some(token.clone());
            }
        }
        None if args.remote_endpoint.is_some() => {
            return Err(Error::Config(
                "--remote-endpoint needs --remote or a remote in the config file".to_string(),
            ));
        }
        None => {}
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout carries command output; logs go to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
