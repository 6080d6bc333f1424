//! frost - blur images from the command line

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use frost::{Backend, Mode};

mod commands;

#[derive(Parser)]
#[command(name = "frost")]
#[command(author, version, about = "Image blur with CPU, native and GPU backends")]
#[command(long_about = "
Blur images with a configurable kernel on one of three execution backends.

Examples:
  frost blur in.png -o out.png                       # gaussian, radius 5, native
  frost blur in.png -o out.png -m box -r 8 -b cpu --concurrent
  frost blur in.png -o out.png -b gpu --sample-factor 0.25
  frost blur in.png -o out.png --translate 100,40 --no-upscale
  frost backends
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of worker threads for concurrent passes (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Blur an image file
    Blur(BlurArgs),

    /// List available backends
    Backends,
}

#[derive(Args)]
struct BlurArgs {
    /// Input image
    input: PathBuf,

    /// Output image
    #[arg(short, long)]
    output: PathBuf,

    /// Kernel: box, gaussian, stack
    #[arg(short, long, default_value = "gaussian")]
    mode: Mode,

    /// Kernel radius in pixels (0 = copy)
    #[arg(short, long, default_value = "5")]
    radius: u32,

    /// Backend: cpu, native, gpu
    #[arg(short, long, default_value = "native")]
    backend: Backend,

    /// Downscale ratio before blurring, in (0, 1]
    #[arg(short = 's', long, default_value = "1.0")]
    sample_factor: f32,

    /// Split passes over the worker pool (cpu and native only)
    #[arg(short, long)]
    concurrent: bool,

    /// Keep the downsampled size instead of scaling back up
    #[arg(long)]
    no_upscale: bool,

    /// Blur only the region starting at X,Y
    #[arg(long, value_parser = parse_translate)]
    translate: Option<(u32, u32)>,
}

fn parse_translate(s: &str) -> Result<(u32, u32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|e| format!("bad X '{x}': {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y '{y}': {e}"))?;
    Ok((x, y))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Blur(args) => commands::blur::run(args, cli.verbose, cli.threads),
        Commands::Backends => commands::backends::run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translate() {
        assert_eq!(parse_translate("10,20"), Ok((10, 20)));
        assert_eq!(parse_translate(" 3 , 4 "), Ok((3, 4)));
        assert!(parse_translate("10").is_err());
        assert!(parse_translate("a,1").is_err());
    }

    #[test]
    fn test_cli_parses_blur() {
        let cli = Cli::try_parse_from([
            "frost", "blur", "in.png", "-o", "out.png", "-m", "box", "-r", "3", "-b", "cpu", "--concurrent", "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.threads, 4);
        match cli.command {
            Commands::Blur(args) => {
                assert_eq!(args.mode, Mode::Box);
                assert_eq!(args.radius, 3);
                assert_eq!(args.backend, Backend::Cpu);
                assert!(args.concurrent);
                assert!(args.translate.is_none());
            }
            Commands::Backends => panic!("expected blur"),
        }
    }
}
