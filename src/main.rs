use clap::{Parser, Subcommand};
use cardvault::config::CardConfig;
use cardvault::layout::{CAPACITY_BYTES, USER_BLOCKS};
use cardvault::transport::MemoryCard;
use cardvault::vault::{PasswordCard, Protection};
use cardvault::{RecordType, MAX_PAYLOAD};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cardvault", about = "Password storage on MIFARE Classic 1K card images")]
struct Cli {
    /// JSON reader configuration (Key A, cipher key, delays)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank card image
    Format {
        image: PathBuf,
        /// 4-byte UID as hex
        #[arg(long, default_value = "DEADBEEF")]
        uid: String,
    },
    /// Store a secret on the card
    Write {
        image: PathBuf,
        #[arg(short, long)]
        secret: String,
        /// Store without encryption
        #[arg(long, conflicts_with = "record_type")]
        plain: bool,
        /// Store under a raw record type code; type 2 is encrypted, others stored as is
        #[arg(short = 't', long = "type", value_name = "N")]
        record_type: Option<u8>,
    },
    /// Print the stored secret
    Read {
        image: PathBuf,
    },
    /// Replace the stored record with an empty one
    Erase {
        image: PathBuf,
    },
    /// Hex dump of the user area
    Dump {
        image: PathBuf,
    },
    /// Check the card for corrupt headers, residue and unreadable blocks
    Inspect {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show UID, card type and capacity
    Info {
        image: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli    = Cli::parse();
    let config = CardConfig::load_or_default(cli.config.as_ref())?;

    match cli.command {

        // ── Format ───────────────────────────────────────────────────────────
        Commands::Format { image, uid } => {
            let uid: [u8; 4] = hex::decode(&uid)?
                .try_into()
                .map_err(|_| "UID must be exactly 4 bytes")?;
            let card = MemoryCard::blank(uid);
            card.save(&image)?;
            println!("Created blank card {} at {}", card.info().uid_hex(), image.display());
        }

        // ── Write ────────────────────────────────────────────────────────────
        Commands::Write { image, secret, plain, record_type } => {
            with_card(&image, &config, true, |vault| {
                match record_type {
                    Some(code) => vault.store_record(RecordType(code), secret.as_bytes())?,
                    None if plain => vault.store_password(secret.as_bytes(), Protection::Plain)?,
                    None => vault.store_password(secret.as_bytes(), Protection::Encrypted)?,
                }
                println!("Stored {} byte secret", secret.len());
                Ok(())
            })?;
        }

        // ── Read ─────────────────────────────────────────────────────────────
        Commands::Read { image } => {
            with_card(&image, &config, false, |vault| {
                match vault.load_password()? {
                    None => println!("(empty)"),
                    Some(payload) => match payload.as_str() {
                        Some(text) => println!("{text}"),
                        None       => println!("{} ({} bytes) {}",
                            payload.record_type, payload.len(), hex::encode(payload.as_bytes())),
                    },
                }
                Ok(())
            })?;
        }

        // ── Erase ────────────────────────────────────────────────────────────
        Commands::Erase { image } => {
            with_card(&image, &config, true, |vault| {
                vault.erase()?;
                println!("Card erased");
                Ok(())
            })?;
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { image } => {
            with_card(&image, &config, false, |vault| {
                let area = vault.dump_user_area()?;
                for (&addr, chunk) in USER_BLOCKS.iter().zip(area.chunks(16)) {
                    println!("{addr:02}  {}", hex::encode(chunk));
                }
                Ok(())
            })?;
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { image, json } => {
            with_card(&image, &config, false, |vault| {
                let report = vault.inspect();
                if json {
                    println!("{}", report.to_json()?);
                } else {
                    println!("{}", report.summary());
                    println!("  Scanned        {}", report.scanned_at.to_rfc3339());
                    println!("  Footprint      {} block(s)", report.footprint_blocks);
                    println!("  Residue        {:?}", report.residue_blocks);
                    println!("  Unreadable     {:?}", report.unreadable_blocks);
                    println!("  BLAKE3         {}", report.digest);
                }
                Ok(())
            })?;
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { image } => {
            with_card(&image, &config, false, |vault| {
                let info = vault.info();
                println!("── Card ─────────────────────────────────────────────────");
                println!("  UID            {}", info.uid_hex());
                println!("  SAK            {:#04x}", info.sak);
                println!("  ATQA           {}", hex::encode(info.atqa));
                println!("  Type           {}", info.picc_type());
                println!("  User blocks    {}", USER_BLOCKS.len());
                println!("  Capacity       {CAPACITY_BYTES} B ({MAX_PAYLOAD} B payload)");
                Ok(())
            })?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load the image, run `op` against it and write the image back when `persist` is set.
fn with_card<F>(image: &Path, config: &CardConfig, persist: bool, op: F) -> CliResult<()>
where
    F: FnOnce(&mut PasswordCard<&mut MemoryCard>) -> CliResult<()>,
{
    let mut card  = MemoryCard::load(image)?;
    let mut vault = PasswordCard::open(&mut card, config)?;
    let result    = op(&mut vault);
    vault.finish();
    if persist {
        card.save(image)?;
    }
    result
}
