use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;

use xreg_model::parse_model;
use xreg_registry::{Registry, RenderOptions, Target};
use xreg_server::{ServerConfig, XregServer};
use xreg_store::InMemoryEntityStore;

use crate::cli::*;
use crate::samples::{self, LoadStats};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Export(args) => {
            let doc = export_document(&args)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Command::Model(ModelArgs { action: ModelAction::Verify { file } }) => cmd_model_verify(&file),
        Command::Load(args) => cmd_load(args),
    }
}

fn server_config(args: ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if args.data.is_some() {
        config.data_file = args.data;
    }
    if args.model.is_some() {
        config.model_file = args.model;
    }
    Ok(config)
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = server_config(args)?;
    println!(
        "{} Serving registry {} on {}",
        "✓".green().bold(),
        config.registry_id.bold(),
        config.bind_addr.to_string().cyan()
    );
    if let Some(data) = &config.data_file {
        println!("  Data: {}", data.display());
    }
    let server = XregServer::new(config).context("opening registry")?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}

fn snapshot_store(data: &Path) -> anyhow::Result<Arc<InMemoryEntityStore>> {
    let store = InMemoryEntityStore::with_snapshot(data)
        .with_context(|| format!("opening {}", data.display()))?;
    Ok(Arc::new(store))
}

fn export_document(args: &ExportArgs) -> anyhow::Result<serde_json::Value> {
    if !args.data.exists() {
        anyhow::bail!("no such data file: {}", args.data.display());
    }
    let mut reg = Registry::open(snapshot_store(&args.data)?, &args.registry)?;
    let opts = RenderOptions::export(reg.model(), args.base_url.as_str(), &args.inline, &[])?;
    let doc = reg.render(&Target::Registry, &opts)?;
    reg.rollback()?;
    Ok(doc)
}

fn cmd_model_verify(file: &Path) -> anyhow::Result<()> {
    let buf = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let model = parse_model(&buf)?;
    model.verify()?;
    println!("{} Model {} is valid", "✓".green().bold(), file.display().to_string().bold());
    for (plural, gm) in &model.groups {
        let resources: Vec<&str> = gm.resources.keys().map(String::as_str).collect();
        println!("  {} → {}", plural.yellow(), resources.join(", "));
    }
    Ok(())
}

fn cmd_load(args: LoadArgs) -> anyhow::Result<()> {
    let stats = load_sample(&args)?;
    println!(
        "{} Loaded {:?} sample into {}",
        "✓".green().bold(),
        args.sample,
        args.data.display().to_string().bold()
    );
    println!(
        "  Groups: {}  Resources: {}  Versions: {}  Commits: {}",
        stats.groups, stats.resources, stats.versions, stats.commits
    );
    Ok(())
}

fn load_sample(args: &LoadArgs) -> anyhow::Result<LoadStats> {
    let mut reg = Registry::open_or_create(snapshot_store(&args.data)?, &args.registry)?;
    let mut rng = rand::thread_rng();
    match args.sample {
        Sample::Dirs => samples::load_dirs(&mut reg, args.count, &mut rng),
        Sample::Apis => samples::load_apis(&mut reg, args.count, &mut rng),
    }
}
