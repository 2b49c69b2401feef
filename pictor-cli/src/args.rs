use clap::{Parser, ValueEnum};
use pictor_cache::DiskCacheStrategy;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pictor")]
#[command(about = "Load images through the pictor engine and report which tier served them")]
#[command(version)]
pub struct Args {
    /// Image files to load
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Target width in pixels (original width if omitted)
    #[arg(long)]
    pub width: Option<u32>,

    /// Target height in pixels (original height if omitted)
    #[arg(long)]
    pub height: Option<u32>,

    /// Transformation applied after decoding
    #[arg(long, value_enum)]
    pub transform: Option<TransformArg>,

    /// Disk cache strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Automatic)]
    pub strategy: StrategyArg,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Disk cache directory, overrides the configuration file
    #[arg(long, env = "PICTOR_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Number of passes over the files
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print one JSON object per load instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransformArg {
    /// Scale to fit inside the target size
    Fit,
    /// Scale to cover the target size and crop the center
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    All,
    None,
    Data,
    Resource,
    Automatic,
}

impl From<StrategyArg> for DiskCacheStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::All => Self::All,
            StrategyArg::None => Self::None,
            StrategyArg::Data => Self::Data,
            StrategyArg::Resource => Self::Resource,
            StrategyArg::Automatic => Self::Automatic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["pictor", "cat.png"]).unwrap();
        assert_eq!(args.files, vec![PathBuf::from("cat.png")]);
        assert_eq!(args.repeat, 2);
        assert_eq!(args.strategy, StrategyArg::Automatic);
        assert!(args.transform.is_none());
    }

    #[test]
    fn test_full_command_line() {
        let args = Args::try_parse_from([
            "pictor", "--width", "64", "--height", "48", "--transform", "crop", "--strategy",
            "resource", "--repeat", "3", "-v", "--json", "a.png", "b.jpg",
        ])
        .unwrap();
        assert_eq!(args.width, Some(64));
        assert_eq!(args.height, Some(48));
        assert_eq!(args.transform, Some(TransformArg::Crop));
        assert_eq!(DiskCacheStrategy::from(args.strategy), DiskCacheStrategy::Resource);
        assert_eq!(args.repeat, 3);
        assert!(args.verbose && args.json);
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_rejects_missing_files_and_zero_repeat() {
        assert!(Args::try_parse_from(["pictor"]).is_err());
        assert!(Args::try_parse_from(["pictor", "--repeat", "0", "a.png"]).is_err());
    }
}
