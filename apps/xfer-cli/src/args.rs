use std::path::PathBuf;

use clap::Parser;

/// Uploads a file into an in-memory object service, closes the object and
/// downloads it back.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "xfer-cli", version)]
pub struct Args {
    /// File to upload, relative to the working directory
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Where to write the downloaded copy, relative to the working directory
    #[arg(value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Transfer settings file (defaults to objxfer.json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container the object is created in
    #[arg(long, value_name = "ID", default_value = "local")]
    pub container: String,

    /// Upper bound of the random latency added to each simulated call
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub jitter_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("xfer-cli").chain(args.iter().copied()))
    }

    #[test]
    fn positional_and_flags() {
        let args = parse(&["--jitter-ms", "5", "in.bin", "out/copy.bin", "--container", "p1"])
            .unwrap();
        assert_eq!(args.input, "in.bin");
        assert_eq!(args.output.as_deref(), Some("out/copy.bin"));
        assert_eq!(args.container, "p1");
        assert_eq!(args.jitter_ms, 5);
        assert_eq!(args.config, None);
    }

    #[test]
    fn defaults() {
        let args = parse(&["in.bin"]).unwrap();
        assert_eq!(args.container, "local");
        assert_eq!(args.jitter_ms, 0);
        assert_eq!(args.output, None);
    }

    #[test]
    fn missing_input() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_unknown_and_extra() {
        assert!(parse(&["--verbose", "in.bin"]).is_err());
        assert!(parse(&["a", "b", "c"]).is_err());
        assert!(parse(&["in.bin", "--config"]).is_err());
        assert!(parse(&["--jitter-ms", "soon", "in.bin"]).is_err());
    }
}
