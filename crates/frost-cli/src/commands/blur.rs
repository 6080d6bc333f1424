//! Blur command

use anyhow::{Context, Result};
use tracing::{info, trace};

use crate::BlurArgs;
use frost::BlurConfiguration;

pub fn run(args: BlurArgs, verbose: u8, threads: usize) -> Result<()> {
    trace!(input = %args.input.display(), mode = %args.mode, radius = args.radius, "blur::run");

    let mut builder = BlurConfiguration::builder()
        .mode(args.mode)
        .radius(args.radius)
        .backend(args.backend)
        .sample_factor(args.sample_factor)
        .concurrent(args.concurrent)
        .upscale(!args.no_upscale);
    if let Some((x, y)) = args.translate {
        builder = builder.translate(x, y);
    }
    if threads > 0 {
        builder = builder.workers(threads);
    }
    let engine = builder.build().context("Invalid blur configuration")?;

    let image = super::load_image(&args.input)?;
    info!(
        backend = engine.backend_name(),
        w = image.width(),
        h = image.height(),
        "Applying blur"
    );
    if verbose > 0 {
        println!(
            "Applying {} blur (radius={}, backend={}) to {}",
            args.mode,
            args.radius,
            engine.backend_name(),
            args.input.display()
        );
    }

    let blurred = engine
        .blur(image)
        .with_context(|| format!("Failed to blur {}", args.input.display()))?;
    super::save_image(&args.output, blurred)?;

    if verbose > 0 {
        println!("Done.");
    }
    Ok(())
}
