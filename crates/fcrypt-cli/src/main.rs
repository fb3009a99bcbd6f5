//! fcryptctl: inspect and exercise the fcrypt key manager
//!
//! Commands:
//!   config show   - display the active configuration
//!   modes         - list cipher modes and the allowed (contents, filenames) pairs
//!   probe         - install a master key in a throwaway keyring, set up
//!                   encryption info for a synthetic inode and report the result

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use fcrypt_core::config::FcryptConfig;
use fcrypt_core::{
    EncryptionMode, FcryptResult, FileType, PolicyContext, CONTEXT_FORMAT_V1,
    KEY_DESCRIPTOR_SIZE, MASTER_KEY_RECORD_SIZE, NONCE_SIZE,
};
use fcrypt_crypto::{available_modes, resolve, valid_combinations, RustCryptoBackend};
use fcrypt_info::{CryptSlot, EncryptedInode, FsCryptOps, KeyManager, PAGE_SIZE};
use fcrypt_keyring::{decode_master_key_record, install_master_key, MemoryKeyring};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fcryptctl",
    version,
    about = "fcrypt per-inode encryption key manager",
    long_about = "fcryptctl: inspect fcrypt configuration and cipher modes, and probe policies against master keys"
)]
struct Cli {
    /// Path to fcrypt.toml configuration file
    #[arg(long, short = 'c', env = "FCRYPT_CONFIG", default_value = "/etc/fcrypt/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "FCRYPT_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "FCRYPT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List supported encryption modes and valid combinations
    Modes,

    /// Set up encryption info for a synthetic inode using a master key file
    ///
    /// The key file holds either a 72-byte master key record (mode, raw key,
    /// size) or 16 to 64 bytes of raw key material.
    Probe {
        /// Master key file
        #[arg(long)]
        key_file: PathBuf,
        /// Master key descriptor, 16 hex digits
        #[arg(long)]
        descriptor: String,
        /// Per-file nonce, 32 hex digits (default: random)
        #[arg(long)]
        nonce: Option<String>,
        /// Contents encryption mode
        #[arg(long, default_value = "aes-256-xts")]
        contents: EncryptionMode,
        /// Filenames encryption mode
        #[arg(long, default_value = "aes-256-cts")]
        filenames: EncryptionMode,
        /// File type of the synthetic inode
        #[arg(long, value_enum, default_value = "regular")]
        file_type: ProbeFileType,
        /// Key description prefix (default: keyring.key_prefix from config)
        #[arg(long, short = 'p')]
        prefix: Option<String>,
        /// Pretend the filesystem has an inline encryption engine
        #[arg(long)]
        inline: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProbeFileType {
    Regular,
    Directory,
    Symlink,
}

impl From<ProbeFileType> for FileType {
    fn from(t: ProbeFileType) -> Self {
        match t {
            ProbeFileType::Regular => FileType::Regular,
            ProbeFileType::Directory => FileType::Directory,
            ProbeFileType::Symlink => FileType::Symlink,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FcryptConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .or_else(|| LogFormat::from_str(&config.log.format, true).ok())
        .unwrap_or(LogFormat::Text);
    init_logging(&level, &format);

    debug!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "fcryptctl starting");

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Modes => cmd_modes(),
        Commands::Probe {
            key_file,
            descriptor,
            nonce,
            contents,
            filenames,
            file_type,
            prefix,
            inline,
        } => {
            let args = ProbeArgs {
                key_file,
                descriptor: parse_descriptor(&descriptor)?,
                nonce: match nonce {
                    Some(hex) => parse_nonce(&hex)?,
                    None => random_nonce(),
                },
                contents,
                filenames,
                file_type: file_type.into(),
                prefix,
                inline,
            };
            let report = run_probe(config, &args)?;
            print!("{report}");
            Ok(())
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── `fcryptctl config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &FcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `fcryptctl modes` ─────────────────────────────────────────────────────────

fn cmd_modes() -> Result<()> {
    println!("{:<18} {:>3}  {:<20} {:>8}", "MODE", "ID", "CIPHER", "KEY SIZE");
    for (mode, spec) in available_modes() {
        println!(
            "{:<18} {:>3}  {:<20} {:>8}",
            mode.name(),
            mode.as_u8(),
            spec.cipher_str,
            spec.key_size
        );
    }
    println!();
    println!("Valid (contents, filenames) combinations:");
    for (contents, filenames) in valid_combinations() {
        println!("  {contents} + {filenames}");
    }
    Ok(())
}

// ── `fcryptctl probe` ─────────────────────────────────────────────────────────

struct ProbeArgs {
    key_file: PathBuf,
    descriptor: [u8; KEY_DESCRIPTOR_SIZE],
    nonce: [u8; NONCE_SIZE],
    contents: EncryptionMode,
    filenames: EncryptionMode,
    file_type: FileType,
    prefix: Option<String>,
    inline: bool,
}

#[derive(Debug)]
struct ProbeReport {
    description: String,
    master_key_size: usize,
    contents: EncryptionMode,
    filenames: EncryptionMode,
    effective_mode: EncryptionMode,
    cipher: &'static str,
    key_size: usize,
    essiv: bool,
    inline_key: bool,
    /// SHA-256 of a zero-filled sample encrypted at logical block 0
    sample_digest: Option<String>,
}

impl std::fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "key:        {} ({} bytes)", self.description, self.master_key_size)?;
        writeln!(f, "policy:     {} + {}", self.contents, self.filenames)?;
        writeln!(f, "mode:       {}", self.effective_mode)?;
        writeln!(f, "cipher:     {} ({}-byte key)", self.cipher, self.key_size)?;
        writeln!(f, "essiv:      {}", if self.essiv { "yes" } else { "no" })?;
        writeln!(f, "inline key: {}", if self.inline_key { "yes" } else { "no" })?;
        match &self.sample_digest {
            Some(digest) => writeln!(f, "sample:     sha256:{digest}"),
            None => writeln!(f, "sample:     n/a (inline encryption)"),
        }
    }
}

struct ProbeInode {
    file_type: FileType,
    slot: CryptSlot,
}

impl EncryptedInode for ProbeInode {
    fn ino(&self) -> u64 {
        1
    }
    fn file_type(&self) -> FileType {
        self.file_type
    }
    fn is_encrypted(&self) -> bool {
        true
    }
    fn crypt_slot(&self) -> &CryptSlot {
        &self.slot
    }
}

struct ProbeFs {
    context: Vec<u8>,
    inline: bool,
}

impl FsCryptOps for ProbeFs {
    fn get_context(&self, _inode: &dyn EncryptedInode) -> FcryptResult<Vec<u8>> {
        Ok(self.context.clone())
    }

    fn inline_crypt_capable(&self) -> bool {
        self.inline
    }
}

fn run_probe(mut config: FcryptConfig, args: &ProbeArgs) -> Result<ProbeReport> {
    if let Some(prefix) = &args.prefix {
        config.keyring.key_prefix = prefix.clone();
    }
    let prefix = config.keyring.key_prefix.clone();

    let (mode, key) = load_key_material(&args.key_file)?;
    let keyring = Arc::new(MemoryKeyring::new());
    let description = install_master_key(&keyring, &prefix, &args.descriptor, mode, &key)
        .context("installing master key")?;
    info!(%description, size = key.len(), "installed master key");

    let policy = PolicyContext {
        format: CONTEXT_FORMAT_V1,
        contents_mode: args.contents,
        filenames_mode: args.filenames,
        flags: 0,
        master_key_descriptor: args.descriptor,
        nonce: args.nonce,
    };
    let resolved = resolve(1, args.file_type, args.contents, args.filenames)?;

    let manager = KeyManager::new(config, Arc::new(RustCryptoBackend), keyring);
    let inode = ProbeInode {
        file_type: args.file_type,
        slot: CryptSlot::new(),
    };
    let fs = ProbeFs {
        context: policy.to_bytes().to_vec(),
        inline: args.inline,
    };

    manager
        .ensure_encryption_info(&inode, &fs)
        .context("setting up encryption info")?;
    let handle = manager
        .acquire_context(&inode)
        .context("no crypt context was published; master key not found")?;

    let effective_mode = if args.file_type.is_regular() {
        handle.data_mode()
    } else {
        handle.filename_mode()
    };

    let sample_digest = if handle.has_contents_cipher() {
        let sample = vec![0u8; PAGE_SIZE];
        let ciphertext = if args.file_type.is_regular() {
            manager.encrypt_page(&inode, 0, &sample)?.as_slice().to_vec()
        } else {
            let mut buf = sample;
            handle.encrypt_block(0, &mut buf)?;
            buf
        };
        Some(hex::encode(Sha256::digest(&ciphertext)))
    } else {
        None
    };

    let report = ProbeReport {
        description,
        master_key_size: key.len(),
        contents: args.contents,
        filenames: args.filenames,
        effective_mode,
        cipher: resolved.cipher_str,
        key_size: resolved.key_size,
        essiv: handle.has_essiv(),
        inline_key: handle.has_inline_key(),
        sample_digest,
    };
    manager.release_context(handle);
    manager.release_encryption_info(&inode);
    Ok(report)
}

/// Read a key file: a full master key record, or bare key bytes (mode 0).
fn load_key_material(path: &Path) -> Result<(u32, Zeroizing<Vec<u8>>)> {
    let bytes = Zeroizing::new(
        std::fs::read(path).with_context(|| format!("reading key file: {}", path.display()))?,
    );
    if bytes.len() == MASTER_KEY_RECORD_SIZE {
        let master = decode_master_key_record(&bytes)
            .with_context(|| format!("decoding master key record: {}", path.display()))?;
        return Ok((master.mode(), Zeroizing::new(master.as_bytes().to_vec())));
    }
    if !(16..=64).contains(&bytes.len()) {
        anyhow::bail!(
            "key file {} is {} bytes; expected a {MASTER_KEY_RECORD_SIZE}-byte record or 16..=64 bytes of key",
            path.display(),
            bytes.len()
        );
    }
    Ok((0, bytes))
}

fn parse_descriptor(s: &str) -> Result<[u8; KEY_DESCRIPTOR_SIZE]> {
    let bytes = hex::decode(s.trim()).with_context(|| format!("descriptor is not hex: {s}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("descriptor must be {KEY_DESCRIPTOR_SIZE} bytes, got {}", b.len()))
}

fn parse_nonce(s: &str) -> Result<[u8; NONCE_SIZE]> {
    let bytes = hex::decode(s.trim()).with_context(|| format!("nonce is not hex: {s}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("nonce must be {NONCE_SIZE} bytes, got {}", b.len()))
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
