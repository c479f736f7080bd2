use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokenizer::Vocabulary;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a vocabulary from the captions of a manifest
    Build {
        /// `image,caption` manifest with a header line
        #[arg(short, long)]
        manifest: PathBuf,

        /// Minimum count for a token to be kept
        #[arg(long, default_value_t = 5)]
        freq_threshold: u32,

        /// Output path for vocab.json
        #[arg(short, long, default_value = "vocab.json")]
        output: PathBuf,
    },
    /// Numericalize text with an existing vocabulary
    Encode {
        /// Path to vocab.json
        #[arg(long)]
        vocab: PathBuf,

        /// Text to encode
        #[arg(short, long)]
        text: String,

        /// Drop word tokens past this count
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Decode ids with an existing vocabulary
    Decode {
        /// Path to vocab.json
        #[arg(long)]
        vocab: PathBuf,

        /// IDs to decode (comma separated)
        #[arg(short, long)]
        ids: String,
    },
}

fn parse_ids(ids: &str) -> Result<Vec<i64>> {
    ids.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse().with_context(|| format!("Invalid ID {:?}", s)))
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            manifest,
            freq_threshold,
            output,
        } => {
            println!("Reading captions from {:?}...", manifest);
            let manifest = trainer::load_manifest(&manifest)?;
            let vocab = Vocabulary::build(&manifest.captions, freq_threshold);

            println!(
                "{} captions, {} tokens (freq_threshold {})",
                manifest.len(),
                vocab.size(),
                freq_threshold
            );
            println!("Saving vocab to {:?}", output);
            vocab.save(&output).context("Failed to save vocab")?;
            println!("Signature: {}", vocab.signature());
        }
        Commands::Encode {
            vocab,
            text,
            max_tokens,
        } => {
            let vocab = Vocabulary::load(&vocab).context("Failed to load vocab")?;
            let ids = vocab.numericalize(&text, max_tokens);
            println!("Encoded IDs: {:?}", ids);
        }
        Commands::Decode { vocab, ids } => {
            let vocab = Vocabulary::load(&vocab).context("Failed to load vocab")?;
            let text = vocab.decode(&parse_ids(&ids)?);
            println!("Decoded text: {}", text);
        }
    }

    Ok(())
}
