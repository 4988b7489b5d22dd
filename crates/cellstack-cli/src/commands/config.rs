use std::path::PathBuf;

use anyhow::{Context, Result};
use cellstack_core::config::{ChannelConfig, CompositionConfig, LoadOptions, StackSourceConfig};
use cellstack_core::stack::ChannelType;
use clap::Args;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a sample two-stack CompositionConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = CompositionConfig {
        load: LoadOptions::default(),
        stacks: vec![
            StackSourceConfig {
                name: "phase".into(),
                path: PathBuf::from("phase.tif"),
            },
            StackSourceConfig {
                name: "fluo".into(),
                path: PathBuf::from("fluo.tif"),
            },
        ],
        channels: vec![
            ChannelConfig {
                stack: "phase".into(),
                index: 0,
                label: Some("Phase contrast".into()),
                kind: ChannelType::PhaseContrast,
            },
            ChannelConfig {
                stack: "fluo".into(),
                index: 0,
                label: Some("GFP".into()),
                kind: ChannelType::Fluorescence,
            },
        ],
    };
    let toml_str = config.to_toml_string()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Sample config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
