use anyhow::Result;
use caption_core::{parse_device, Checkpoint};
use clap::Parser;
use inference::{load_generator, GenerationConfig};
use std::path::PathBuf;
use tokenizer::Vocabulary;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Caption images with a trained checkpoint", long_about = None)]
struct Cli {
    /// Checkpoint directory written by caption-train
    #[arg(short, long, default_value = "checkpoints")]
    checkpoint: PathBuf,

    /// Maximum number of decoding steps
    #[arg(long, default_value_t = 50)]
    max_len: usize,

    /// auto, cpu, cuda or cuda:N
    #[arg(long, default_value = "auto")]
    device: String,

    /// Refuse to run unless the checkpoint vocabulary matches this vocab.json
    #[arg(long)]
    expect_vocab: Option<PathBuf>,

    /// Print one JSON object per image instead of plain text
    #[arg(long)]
    json: bool,

    /// Images to caption
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let device = parse_device(&cli.device)?;
    info!("Using device: {:?}", device);

    if let Some(path) = &cli.expect_vocab {
        let expected = Vocabulary::load(path)?;
        Checkpoint::read(&cli.checkpoint)?.verify_vocabulary(&expected)?;
    }

    let generator = load_generator(&cli.checkpoint, device, GenerationConfig { max_len: cli.max_len })?;

    for path in &cli.images {
        let result = generator.generate(path)?;
        if cli.json {
            let line = serde_json::json!({ "image": path, "caption": result.text, "token_ids": result.token_ids });
            println!("{}", line);
        } else {
            println!("{}: {}", path.display(), result.text);
        }
    }

    Ok(())
}
