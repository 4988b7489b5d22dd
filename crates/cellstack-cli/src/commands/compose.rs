use std::path::PathBuf;

use anyhow::{Context, Result};
use cellstack_core::config::CompositionConfig;
use cellstack_core::io::write_rois;
use cellstack_core::roi::{rois_from_labels, FrameSel, RoiKind};
use cellstack_core::stack::{ChannelType, MetaStack};
use cellstack_core::ImageStack;
use clap::Args;
use tracing::debug;

use crate::progress::BarProgress;
use crate::summary::print_composition_summary;

#[derive(Args)]
pub struct ComposeArgs {
    /// Composition config (TOML)
    pub config: PathBuf,

    /// Label cells from the first segmentation channel and write the ROIs as JSON
    #[arg(long)]
    pub rois: Option<PathBuf>,
}

pub fn run(args: &ComposeArgs) -> Result<()> {
    let config = CompositionConfig::load(&args.config)
        .with_context(|| format!("Failed to read {}", args.config.display()))?;
    let progress = BarProgress::new("Reading pages")?;
    let (meta, stacks) = MetaStack::from_config(&config, &progress)?;
    debug!(stacks = stacks.len(), channels = meta.n_channels(), "Composition built");

    print_composition_summary(&meta);

    if let Some(ref out) = args.rois {
        let n_cells = label_segmentation(&meta)?;
        write_rois(&meta, out).with_context(|| format!("Failed to write {}", out.display()))?;
        println!("{} cell outlines saved to {}", n_cells, out.display());
    }

    Ok(())
}

/// Set one raw ROI per label of the first segmentation channel, frame by frame.
fn label_segmentation(meta: &MetaStack) -> Result<usize> {
    let channel = meta
        .channels()
        .iter()
        .position(|c| c.kind == ChannelType::Segmentation)
        .context("No segmentation channel in composition")?;

    let mut total = 0;
    for frame in 0..meta.n_frames() {
        let labels = meta.get_image(channel, frame, None)?;
        let rois = rois_from_labels(labels.view());
        total += rois.len();
        meta.set_rois(rois, RoiKind::Raw, FrameSel::Frame(frame))?;
    }
    Ok(total)
}
