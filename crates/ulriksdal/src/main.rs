#![forbid(unsafe_code)]

//! Ulriksdal CLI: encrypt and sign parts of SOAP messages with WS-Security.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;
use ulriksdal_core::Error;
use ulriksdal_keys::{loader, KeyKind, KeysManager};
use ulriksdal_stream::{OutboundSecurity, SecurityProperties};

#[derive(Parser)]
#[command(
    name = "ulriksdal",
    about = "Ulriksdal: streaming WS-Security (XML-Enc, XML-DSig) for SOAP messages",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Secure a SOAP message as described by a configuration file
    Secure {
        /// Input XML file
        file: PathBuf,

        /// Security configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Load key with a name (NAME:FILE)
        #[arg(short = 'K', long = "key-name")]
        key_name: Vec<String>,

        /// Kind of the keys loaded with --key-name (aes, des3, hmac)
        #[arg(long = "key-kind", default_value = "aes")]
        key_kind: String,

        /// Load raw AES key (binary file) as the encryption token
        #[arg(long = "aes-key")]
        aes_key: Option<PathBuf>,

        /// Load raw HMAC key (binary file) as the signature token
        #[arg(long = "hmac-key")]
        hmac_key: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List supported algorithms and key types
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Secure {
            file,
            config,
            key_name,
            key_kind,
            aes_key,
            hmac_key,
            output,
        } => cmd_secure(file, config, key_name, key_kind, aes_key, hmac_key, output),

        Commands::Info => cmd_info(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(Level::WARN);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: logging disabled: {e}");
    }
}

fn cmd_secure(
    file: PathBuf,
    config: PathBuf,
    key_name: Vec<String>,
    key_kind: String,
    aes_key: Option<PathBuf>,
    hmac_key: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let props = SecurityProperties::from_file(&config)?;
    let kind: KeyKind = key_kind.parse()?;
    let mgr = build_keys_manager(&props, &key_name, kind, aes_key, hmac_key)?;
    debug!(keys = mgr.len(), config = %config.display(), "configuration loaded");

    let security = OutboundSecurity::new(props, Arc::new(mgr))?;
    let xml = read_file(&file)?;
    let secured = security.secure_document(&xml)?;
    write_output(output, secured.as_bytes())
}

fn cmd_info() -> Result<(), Error> {
    println!("Ulriksdal: Streaming WS-Security for SOAP messages");
    println!();
    println!("Actions:");
    println!("  encrypt    xenc:EncryptedData per part, wsse11:EncryptedHeader for header blocks");
    println!("  signature  ds:Signature with one reference per part");
    println!();
    println!("Supported encryption algorithms:");
    println!("  AES-128/192/256-CBC, AES-128/192/256-GCM, 3DES-CBC");
    println!();
    println!("Supported digest algorithms:");
    println!("  SHA-1, SHA-224, SHA-256, SHA-384, SHA-512");
    println!();
    println!("Supported signature algorithms:");
    println!("  HMAC (SHA-1, SHA-224, SHA-256, SHA-384, SHA-512)");
    println!();
    println!("Supported canonicalization:");
    println!("  Exclusive C14N 1.0");
    println!();
    println!("Supported key formats:");
    println!("  raw binary or hex (AES, 3DES, HMAC)");
    Ok(())
}

// ── Utility functions ────────────────────────────────────────────────

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| io_error(&p, e)),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(data)
                .map_err(|e| io_error(Path::new("stdout"), e))
        }
    }
}

/// Inline configuration keys, overridden by keys given on the command line.
fn build_keys_manager(
    props: &SecurityProperties,
    key_names: &[String],
    kind: KeyKind,
    aes_key_path: Option<PathBuf>,
    hmac_key_path: Option<PathBuf>,
) -> Result<KeysManager, Error> {
    let mut mgr = props.key_store()?;

    // Load named keys (NAME:FILE format)
    for spec in key_names {
        let Some((name, file)) = spec.split_once(':') else {
            return Err(Error::Config(format!(
                "invalid key-name format: {spec} (expected NAME:FILE)"
            )));
        };
        let path = PathBuf::from(file);
        let key = loader::load_key_file(&path, kind, name).map_err(|e| match e {
            Error::Io(e) => io_error(&path, e),
            other => other,
        })?;
        mgr.insert_key_first(key);
    }

    if let Some(path) = aes_key_path {
        let name = props.encryption.token_id.as_deref().ok_or_else(|| {
            Error::Config("--aes-key needs encryption.token_id in the configuration".into())
        })?;
        let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
        mgr.insert_key_first(loader::load_aes_key(&bytes)?.with_name(name));
    }

    if let Some(path) = hmac_key_path {
        let name = props.signature.token_id.as_deref().ok_or_else(|| {
            Error::Config("--hmac-key needs signature.token_id in the configuration".into())
        })?;
        let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
        mgr.insert_key_first(loader::load_hmac_key(&bytes)?.with_name(name));
    }

    Ok(mgr)
}
