use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "xreg",
    about = "xRegistry server and tools",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the registry server
    Serve(ServeArgs),
    /// Print the export document of a stored registry
    Export(ExportArgs),
    /// Work with model definition files
    Model(ModelArgs),
    /// Generate sample data into a snapshot file
    Load(LoadArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// JSON snapshot to load at start and keep up to date
    #[arg(long)]
    pub data: Option<PathBuf>,
    /// Model definition applied at start
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Args)]
pub struct ExportArgs {
    #[arg(long)]
    pub data: PathBuf,
    #[arg(long, default_value = "xregistry")]
    pub registry: String,
    #[arg(long, default_value = "http://localhost:8181")]
    pub base_url: String,
    /// `inline` values; the default inlines everything
    #[arg(long)]
    pub inline: Vec<String>,
}

#[derive(Args)]
pub struct ModelArgs {
    #[command(subcommand)]
    pub action: ModelAction,
}

#[derive(Subcommand)]
pub enum ModelAction {
    /// Parse and verify a model file
    Verify { file: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Sample {
    /// A small dirs/files/datas registry with extension attributes
    Dirs,
    /// API providers with versioned OpenAPI documents
    Apis,
}

#[derive(Args)]
pub struct LoadArgs {
    #[arg(long)]
    pub sample: Sample,
    /// Generated groups (extra dirs, or providers)
    #[arg(long, default_value = "5")]
    pub count: usize,
    #[arg(long)]
    pub data: PathBuf,
    #[arg(long, default_value = "xregistry")]
    pub registry: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["xreg", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.bind.unwrap().port(), 9000);
            assert!(args.config.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_export_inline() {
        let cli = Cli::try_parse_from([
            "xreg", "export", "--data", "reg.json", "--inline", "dirs", "--inline", "model",
        ])
        .unwrap();
        if let Command::Export(args) = cli.command {
            assert_eq!(args.inline, vec!["dirs", "model"]);
            assert_eq!(args.registry, "xregistry");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_model_verify() {
        let cli = Cli::try_parse_from(["xreg", "model", "verify", "model.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Model(ModelArgs { action: ModelAction::Verify { .. } })
        ));
    }

    #[test]
    fn parse_load() {
        let cli = Cli::try_parse_from([
            "xreg", "load", "--sample", "apis", "--count", "3", "--data", "x.json",
        ])
        .unwrap();
        if let Command::Load(args) = cli.command {
            assert_eq!(args.sample, Sample::Apis);
            assert_eq!(args.count, 3);
        } else {
            panic!("wrong command");
        }
        assert!(Cli::try_parse_from(["xreg", "load", "--sample", "bogus", "--data", "x"]).is_err());
    }
}
