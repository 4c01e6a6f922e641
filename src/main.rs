use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;
use vtorch::{config::Config, workspace::Project, workspace::Workspace};

/// Compiles block graphs to PyTorch code.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// JSON settings file.
    #[arg(long, global = true, env = "VTORCH_CONFIG")]
    config: Option<PathBuf>,
    /// Batches between loss prints, overrides the config.
    #[arg(long, global = true)]
    log_interval: Option<usize>,
    /// Training epochs, overrides the config.
    #[arg(long, global = true)]
    epochs: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the training script of a project, or the model class of one graph.
    Generate {
        project: PathBuf,
        /// Print only this graph as a model class.
        #[arg(long)]
        graph: Option<String>,
        #[command(flatten)]
        output: Output,
    },
    /// Applies a project and tells which graphs are ready, or why not.
    Check { project: PathBuf },
    /// Prints the operations rebuilding a graph.
    Replay {
        project: PathBuf,
        #[arg(long)]
        graph: String,
    },
    /// Prints a graph as a document, or the whole project as operations.
    Export {
        project: PathBuf,
        #[arg(long)]
        graph: Option<String>,
        #[command(flatten)]
        output: Output,
    },
    /// Checks a Python file of user-defined blocks.
    Udb {
        file: PathBuf,
        /// Defaults to the file stem.
        #[arg(long)]
        name: Option<String>,
    },
    /// Scans Python packages into a catalog.
    Catalog {
        /// Package folders or files to scan.
        #[arg(long)]
        scan: Vec<PathBuf>,
        /// Save the catalog as JSON.
        #[arg(long)]
        save: Option<PathBuf>,
        /// List the module paths.
        #[arg(long)]
        list: bool,
    },
}

#[derive(Args, Debug)]
struct Output {
    /// Write to a file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Output {
    fn write(&self, text: &str) -> Result<()> {
        match &self.output {
            Some(path) => {
                fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
                tracing::info!("wrote {}", path.display());
            }
            None => print!("{text}"),
        }
        Ok(())
    }
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(log_interval) = self.log_interval {
            config.log_interval = log_interval;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        Ok(config)
    }
    fn run(self) -> Result<()> {
        let config = self.config()?;
        match &self.command {
            Command::Generate {
                project,
                graph,
                output,
            } => {
                let (workspace, training) = open(&config, project)?;
                let code = match (graph, training) {
                    (Some(graph), _) => workspace.generate_model_code(graph)?,
                    (None, Some(code)) => code,
                    (None, None) => bail!("{} has no training request", project.display()),
                };
                output.write(&code)
            }
            Command::Check { project } => {
                let (workspace, _) = open(&config, project)?;
                for name in workspace.graph_names() {
                    match workspace.graph(name).and_then(|graph| graph.check_ready()) {
                        Ok(()) => println!("{name}: ready"),
                        Err(e) => println!("{name}: not ready, {e}"),
                    }
                }
                Ok(())
            }
            Command::Replay { project, graph } => {
                let (mut workspace, _) = open(&config, project)?;
                workspace
                    .graph(graph)
                    .with_context(|| format!("in {}", project.display()))?;
                let operations = workspace.replay(graph);
                println!("{}", serde_json::to_string_pretty(&operations)?);
                Ok(())
            }
            Command::Export {
                project,
                graph,
                output,
            } => {
                let (workspace, _) = open(&config, project)?;
                let json = match graph {
                    Some(graph) => serde_json::to_string_pretty(&workspace.export_document(graph)?)?,
                    None => serde_json::to_string_pretty(&workspace.to_project())?,
                };
                output.write(&format!("{json}\n"))
            }
            Command::Udb { file, name } => {
                let name = match name {
                    Some(name) => name.as_str(),
                    None => file
                        .file_stem()
                        .and_then(|x| x.to_str())
                        .with_context(|| format!("cannot name a UDB after {}", file.display()))?,
                };
                let code = fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let mut workspace = config.workspace()?;
                let warnings = workspace.add_udb(name, &code)?;
                for warning in warnings.iter() {
                    println!("warning: {warning}");
                }
                println!("udb.{name}: ok");
                Ok(())
            }
            Command::Catalog { scan, save, list } => {
                let mut catalog = config.catalog()?;
                for path in scan.iter() {
                    let added = catalog
                        .scan_package(path)
                        .with_context(|| format!("scanning {}", path.display()))?;
                    tracing::info!("scanned {added} modules from {}", path.display());
                }
                if *list {
                    for module in catalog.modules() {
                        println!("{}", module.dotted());
                    }
                }
                if let Some(path) = save {
                    catalog.save(path)?;
                    tracing::info!("saved {} modules to {}", catalog.len(), path.display());
                }
                Ok(())
            }
        }
    }
}

/// Applies the project at `path` to a new workspace, returning the training script if it
/// requests one.
fn open(config: &Config, path: &Path) -> Result<(Workspace, Option<String>)> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let project: Project =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let mut workspace = config.workspace()?;
    let training = workspace
        .apply_project(&project)
        .with_context(|| format!("applying {}", path.display()))?;
    Ok((workspace, training))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vtorch=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Cli::parse().run()
}
