use std::path::PathBuf;

use anyhow::{Context, Result};
use cellstack_core::io::save_plane;
use cellstack_core::{ImageStack, Stack};
use clap::Args;

use crate::progress::BarProgress;

#[derive(Args)]
pub struct ExportArgs {
    /// Input TIFF stack
    pub file: PathBuf,

    /// Output image (.png is 8-bit, anything else 8/16-bit TIFF)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Channel index
    #[arg(short, long, default_value = "0")]
    pub channel: usize,

    /// Frame index
    #[arg(short, long, default_value = "0")]
    pub frame: usize,

    /// Resampling factor, e.g. 0.5 for half size
    #[arg(short, long)]
    pub scale: Option<f64>,
}

pub fn run(args: &ExportArgs) -> Result<()> {
    if let Some(scale) = args.scale {
        anyhow::ensure!(scale > 0.0, "scale must be positive, got {scale}");
    }

    let stack = Stack::new();
    let progress = BarProgress::new("Reading pages")?;
    stack
        .load_with(&args.file, &progress)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;

    let mut saved = Ok(());
    stack.with_image(args.channel, args.frame, args.scale, &mut |view| {
        saved = save_plane(view, &args.output);
    })?;
    saved.with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Channel {} frame {} saved to {}",
        args.channel,
        args.frame,
        args.output.display()
    );
    Ok(())
}
