mod attributes;
mod color;
mod config;
mod convert;
mod image_io;
mod processing;

use clap::Parser;
use config::AppConfig;

/// Convert an image between colorspaces, through a LUT file, or through a
/// display/view, on the CPU or the GPU.
#[derive(Debug, Parser)]
#[command(
    name = "colorconvert",
    override_usage = concat!(
        "colorconvert [options] inputimage inputcolorspace outputimage outputcolorspace\n",
        "       colorconvert [options] --lut lutfile inputimage outputimage\n",
        "       colorconvert [options] --view inputimage inputcolorspace outputimage ",
        "displayname viewname",
    )
)]
struct Cli {
    #[command(flatten)]
    options: convert::Options,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = AppConfig::load().and_then(|config| convert::run(&cli.options, &config));
    if let Err(err) = result {
        eprintln!("colorconvert: {:#}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;
    use crate::convert::Backend;

    #[test]
    fn parses_single_dash_style_flags() {
        let cli = Cli::try_parse_from([
            "colorconvert",
            "--gpu",
            "--v",
            "--ch",
            "0,1,2",
            "--float-attribute",
            "gain=2",
            "--float-attribute",
            "bias=0.5",
            "--exposure",
            "-1.5",
            "in.exr",
            "srgb",
            "out.exr",
            "acescg",
        ])
        .unwrap();
        let options = cli.options;
        assert!(options.verbose);
        assert_eq!(options.backend(), Backend::Gpu);
        assert_eq!(options.channels.as_deref(), Some("0,1,2"));
        assert_eq!(options.float_attributes.len(), 2);
        assert_eq!(options.exposure, Some(-1.5));
        assert_eq!(options.args, vec!["in.exr", "srgb", "out.exr", "acescg"]);
    }

    #[test]
    fn legacy_gpu_wins_over_gpu() {
        let args = ["colorconvert", "--gpu", "--gpulegacy", "a", "b", "c", "d"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.options.backend(), Backend::GpuLegacy);
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["colorconvert", "--bogus", "a"]).is_err());
    }
}
