use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, ValueEnum};
use image::Rgb;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asset_matte::config::parse_hex_color;
use asset_matte::{
    default_output_path, AlphaCombine, ChromaKeyConfig, ForegroundSolve, MatteConfig, Pipeline,
    PipelineConfig, ProcessReport, QuantizeSpec, ResizeSpec,
};

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// 2160x2160 square device render
    Device,
    /// 1920x510 wide logo
    Logo,
}

#[derive(Parser)]
#[command(
    name = "asset-matte",
    about = "Turn flat-background renders into clean transparent assets",
    version,
    after_help = "Difference matting: asset-matte white.png --dark black.png -o out.png\n\
                  Chroma keying:      asset-matte render.png --background 25283B -o out.png"
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input render (the light-background render when --dark is given)
    input: PathBuf,

    /// Same subject rendered over the dark background; enables difference matting
    #[arg(long)]
    dark: Option<PathBuf>,

    /// Output PNG (default: {name}_matte.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Exact output size, e.g. 1920x510
    #[arg(long, value_parser = parse_size, conflicts_with = "preset")]
    size: Option<ResizeSpec>,

    /// Output size preset
    #[arg(long, value_enum, default_value = "device")]
    preset: Preset,

    /// Known background color (RRGGBB) for chroma keying; sampled when omitted
    #[arg(long, value_parser = parse_color)]
    background: Option<Rgb<u8>>,

    /// Background assumed when corner sampling fails
    #[arg(long, value_parser = parse_color, default_value = "FFFFFF")]
    fallback_background: Rgb<u8>,

    /// Chroma-key distance at or below which pixels are fully transparent
    #[arg(long)]
    low: Option<f32>,

    /// Chroma-key distance at or above which pixels are fully opaque
    #[arg(long)]
    high: Option<f32>,

    /// Per-channel alpha combination for difference matting (mean, min, max)
    #[arg(long, value_parser = parse_combine, default_value = "mean")]
    combine: AlphaCombine,

    /// Foreground color recovery for translucent pixels (light, averaged)
    #[arg(long, value_parser = parse_foreground, default_value = "light")]
    foreground: ForegroundSolve,

    /// Keep background bleed in translucent edge pixels
    #[arg(long)]
    no_decontaminate: bool,

    /// Quantization quality range MIN-MAX (0-100)
    #[arg(long, value_parser = parse_quality, default_value = "65-80")]
    quality: QuantizeSpec,

    /// Skip writing the indexed palette variant
    #[arg(long)]
    no_quantize: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn parse_size(s: &str) -> Result<ResizeSpec, String> {
    s.parse().map_err(|e: asset_matte::Error| e.to_string())
}

fn parse_color(s: &str) -> Result<Rgb<u8>, String> {
    parse_hex_color(s).map_err(|e| e.to_string())
}

fn parse_combine(s: &str) -> Result<AlphaCombine, String> {
    s.parse().map_err(|e: asset_matte::Error| e.to_string())
}

fn parse_foreground(s: &str) -> Result<ForegroundSolve, String> {
    s.parse().map_err(|e: asset_matte::Error| e.to_string())
}

fn parse_quality(s: &str) -> Result<QuantizeSpec, String> {
    s.parse().map_err(|e: asset_matte::Error| e.to_string())
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.quiet {
        "asset_matte=error"
    } else if cli.verbose {
        "asset_matte=debug"
    } else {
        "asset_matte=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let target = cli.size.unwrap_or(match cli.preset {
        Preset::Device => ResizeSpec::DEVICE,
        Preset::Logo => ResizeSpec::LOGO,
    });

    let config = PipelineConfig {
        target,
        chroma: ChromaKeyConfig {
            low_threshold: cli.low,
            high_threshold: cli.high,
        },
        matte: MatteConfig {
            combine: cli.combine,
            foreground: cli.foreground,
            ..MatteConfig::default()
        },
        decontaminate: !cli.no_decontaminate,
        quantize: (!cli.no_quantize).then_some(cli.quality),
        fallback_background: cli.fallback_background,
        ..PipelineConfig::default()
    };

    let pipeline = match Pipeline::new(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if !cli.input.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input.display());
        process::exit(1);
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));

    if !cli.quiet {
        match &cli.dark {
            Some(dark) => eprintln!(
                "Difference matting {} / {} -> {}x{}",
                cli.input.display(),
                dark.display(),
                target.width,
                target.height
            ),
            None => eprintln!(
                "Chroma keying {} -> {}x{}",
                cli.input.display(),
                target.width,
                target.height
            ),
        }
    }

    let result = match &cli.dark {
        Some(dark) => pipeline.process_difference_files(&cli.input, dark, &output),
        None => pipeline.process_chroma_file(&cli.input, cli.background, &output),
    };

    match result {
        Ok(report) => print_report(&report, &cli),
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", display_name(&cli.input));
            process::exit(1);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

fn print_report(report: &ProcessReport, cli: &Cli) {
    for warning in &report.warnings {
        eprintln!("[WARN] {}: {warning}", display_name(&cli.input));
    }
    if cli.quiet {
        return;
    }

    let c = &report.coverage;
    eprintln!(
        "[OK] {} (transparent {:.1}%, edges {:.1}%, opaque {:.1}%)",
        display_name(&report.output),
        c.transparent_pct,
        c.edge_pct,
        c.opaque_pct
    );
    if let Some(bg) = report.background {
        eprintln!("  background: #{:02X}{:02X}{:02X}", bg[0], bg[1], bg[2]);
    }
    if let (Some(path), Some(q)) = (&report.indexed_output, report.quantized_quality) {
        eprintln!("  indexed: {} (quality {q})", display_name(path));
    }
}
