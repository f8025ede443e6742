//! `storectl` - a thin CLI over the container storage engine, for manual
//! testing and scripting against a storage root.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use container_storage::{Mall, MallOptions};

#[derive(Parser)]
#[command(name = "storectl", about = "Inspect and manipulate a container storage root")]
struct Cli {
    /// Root directory for layers.json, images.json, containers.json, and
    /// graph driver content.
    #[arg(long, env = "STORECTL_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Layer operations.
    Layer {
        #[command(subcommand)]
        action: LayerAction,
    },
    /// Image operations.
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
    /// Container operations.
    Container {
        #[command(subcommand)]
        action: ContainerAction,
    },
    /// List changed paths between a layer and its parent.
    Changes { layer: String },
    /// Write the tar diff between a layer and its parent to stdout.
    Diff { layer: String },
    /// Print the byte size of the diff between a layer and its parent.
    Diffsize { layer: String },
    /// Apply a tar diff (read from stdin) onto a layer.
    Applydiff { layer: String },
    /// Mount a layer and print its path.
    Mount { layer: String },
    /// Unmount a layer previously mounted with `mount`.
    Unmount { layer: String },
}

#[derive(Subcommand)]
enum LayerAction {
    Create {
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        writeable: bool,
    },
    Rm { layer: String },
    List,
}

#[derive(Subcommand)]
enum ImageAction {
    Create {
        top_layer: String,
        #[arg(long)]
        name: Option<String>,
    },
    Rm { image: String },
    List,
}

#[derive(Subcommand)]
enum ContainerAction {
    Create {
        image: String,
        #[arg(long)]
        name: Option<String>,
    },
    Rm { container: String },
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut mall = Mall::new(MallOptions::new(cli.root.clone()))
        .with_context(|| format!("opening storage root {}", cli.root.display()))?;

    match cli.command {
        Command::Layer { action } => run_layer(&mut mall, action),
        Command::Image { action } => run_image(&mut mall, action),
        Command::Container { action } => run_container(&mut mall, action),
        Command::Changes { layer } => {
            let changes = mall
                .changes(&layer)
                .with_context(|| format!("listing changes for layer {}", layer))?;
            for change in changes {
                println!("{:?}", change);
            }
            Ok(())
        }
        Command::Diff { layer } => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            mall.diff(&layer, &mut handle)
                .with_context(|| format!("diffing layer {}", layer))
        }
        Command::Diffsize { layer } => {
            let size = mall
                .diff_size(&layer)
                .with_context(|| format!("computing diff size for layer {}", layer))?;
            println!("{}", size);
            Ok(())
        }
        Command::Applydiff { layer } => {
            let stdin = std::io::stdin();
            let mut handle = stdin.lock();
            let applied = mall
                .apply_diff(&layer, &mut handle)
                .with_context(|| format!("applying diff to layer {}", layer))?;
            println!("applied {} bytes", applied);
            Ok(())
        }
        Command::Mount { layer } => {
            let path = mall
                .mount(&layer)
                .with_context(|| format!("mounting layer {}", layer))?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Unmount { layer } => mall
            .unmount(&layer)
            .with_context(|| format!("unmounting layer {}", layer)),
    }
}

fn run_layer(mall: &mut Mall, action: LayerAction) -> Result<()> {
    match action {
        LayerAction::Create {
            parent,
            name,
            writeable,
        } => {
            let names = name.into_iter().collect();
            let layer = mall
                .create_layer(None, parent.as_deref(), names, writeable, String::new())
                .context("creating layer")?;
            println!("{}", layer.id);
            Ok(())
        }
        LayerAction::Rm { layer } => mall.delete_layer(&layer).context("removing layer"),
        LayerAction::List => {
            for layer in mall.layers().layers() {
                println!("{} {:?}", layer.id, layer.names);
            }
            Ok(())
        }
    }
}

fn run_image(mall: &mut Mall, action: ImageAction) -> Result<()> {
    match action {
        ImageAction::Create { top_layer, name } => {
            let names = name.into_iter().collect();
            let image = mall
                .create_image(None, &top_layer, names)
                .context("creating image")?;
            println!("{}", image.id);
            Ok(())
        }
        ImageAction::Rm { image } => mall.delete_image(&image).context("removing image"),
        ImageAction::List => {
            for image in mall.images().images() {
                println!("{} {:?}", image.id, image.names);
            }
            Ok(())
        }
    }
}

fn run_container(mall: &mut Mall, action: ContainerAction) -> Result<()> {
    match action {
        ContainerAction::Create { image, name } => {
            let names = name.into_iter().collect();
            let container = mall
                .create_container(None, &image, names, String::new())
                .context("creating container")?;
            println!("{}", container.id);
            Ok(())
        }
        ContainerAction::Rm { container } => mall
            .delete_container(&container)
            .context("removing container"),
        ContainerAction::List => {
            for container in mall.containers().containers() {
                println!("{} {:?}", container.id, container.names);
            }
            Ok(())
        }
    }
}
