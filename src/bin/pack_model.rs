//! Packs an exported ONNX graph and its metadata into a model artifact.

use anyhow::Context;
use clap::Parser;
use crackscope::model::artifact;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pack_model")]
#[command(about = "Bundle an ONNX classifier and its metadata into a crackscope artifact", long_about = None)]
struct Args {
    /// Exported ONNX graph
    #[arg(long)]
    onnx: PathBuf,

    /// Metadata JSON (vocab, input_size, mean, std, ...)
    #[arg(long)]
    metadata: PathBuf,

    /// Output bundle path
    #[arg(long, default_value = "models/crack_classifier.tar.gz")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let model = std::fs::read(&args.onnx)
        .with_context(|| format!("reading {}", args.onnx.display()))?;
    let metadata = std::fs::read(&args.metadata)
        .with_context(|| format!("reading {}", args.metadata.display()))?;

    artifact::write_bundle(&args.out, &metadata, &model)
        .with_context(|| format!("writing {}", args.out.display()))?;

    let bundle = artifact::read_bundle(&args.out)?;
    println!(
        "Wrote {} ({} classes: {:?}, {} byte graph)",
        args.out.display(),
        bundle.metadata.vocab.len(),
        bundle.metadata.vocab,
        bundle.model.len()
    );

    Ok(())
}
