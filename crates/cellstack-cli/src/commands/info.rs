use std::path::PathBuf;

use anyhow::{Context, Result};
use cellstack_core::Stack;
use clap::Args;

use crate::progress::BarProgress;

#[derive(Args)]
pub struct InfoArgs {
    /// Input TIFF stack
    pub file: PathBuf,

    /// Also compute the intensity range over all planes
    #[arg(long)]
    pub range: bool,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let stack = Stack::new();
    let progress = BarProgress::new("Reading pages")?;
    stack
        .load_with(&args.file, &progress)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let info = stack.snapshot();

    println!("File:        {}", args.file.display());
    println!("Channels:    {}", info.n_channels);
    println!("Frames:      {}", info.n_frames);
    println!("Images:      {}", info.n_images);
    println!("Dimensions:  {}x{}", info.width, info.height);
    if let Some(depth) = info.depth {
        println!("Bit depth:   {}", depth);
        let bytes = info.n_images * info.width * info.height * depth.bytes_per_sample();
        println!("Data size:   {:.1} MB", bytes as f64 / (1024.0 * 1024.0));
    }
    if let Some(order) = info.order {
        println!("Order:       {}", order);
    }

    if args.range {
        match stack.intensity_range() {
            Some((lo, hi)) => println!("Range:       {}..={}", lo, hi),
            None => println!("Range:       empty"),
        }
    }

    Ok(())
}
