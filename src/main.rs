use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use notekeeper::bridge::BridgeHost;
use notekeeper::config::Config;
use notekeeper::db::{Database, ImageDir};
use notekeeper::models::*;
use notekeeper::Storage;

#[derive(Parser)]
#[command(name = "notekeeper")]
#[command(about = "Notebooks and notes, stored locally, in the cloud, or by the desktop host")]
struct Cli {
    /// Socket of a running desktop host (overrides NOTEKEEPER_BRIDGE_SOCKET)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the desktop host: own the database and serve clients over the socket
    Host,
    /// Show which backend is in use and where it stores data
    Info,
    /// Manage notebooks
    Notebook {
        #[command(subcommand)]
        command: NotebookCommands,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Search note titles and content
    Search { query: String },
    /// Store or remove images
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
}

#[derive(Subcommand)]
enum NotebookCommands {
    List,
    Create { name: String },
    Rename { id: Uuid, name: String },
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum NoteCommands {
    List {
        notebook_id: Uuid,
    },
    Create {
        notebook_id: Uuid,
        #[arg(short, long, default_value = UNTITLED_NOTE)]
        title: String,
        #[arg(short, long)]
        content: Option<String>,
    },
    Show {
        id: Uuid,
    },
    Edit {
        id: Uuid,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    Upload { file: PathBuf },
    Delete { url: String },
}

/// Initialize tracing with output to stderr (for host mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "notekeeper=info".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, Commands::Host);
    init_tracing(use_stderr);

    let mut config = Config::load();

    if let Commands::Host = cli.command {
        let socket = match cli.socket {
            Some(socket) => socket,
            None => config.socket_path()?,
        };
        let db = Database::open(config.database_path()?)?;
        db.migrate()?;
        let images = ImageDir::open(config.images_dir()?)?;

        tracing::info!("Starting desktop host");
        let host = BridgeHost::bind(&socket, db, images).await?;
        host.run().await?;
        return Ok(());
    }

    if cli.socket.is_some() {
        config.bridge_socket = cli.socket;
    }
    let storage = Storage::from_config(&config).await?;
    if let Some(notice) = storage.take_local_mode_notice() {
        eprintln!("{}", notice);
    }

    match cli.command {
        Commands::Host => {}
        Commands::Info => {
            println!("backend: {}", storage.kind());
            match storage.storage_path().await? {
                Some(path) => println!("storage: {}", path),
                None => println!("storage: remote"),
            }
        }
        Commands::Notebook { command } => match command {
            NotebookCommands::List => print_json(&storage.list_notebooks().await?)?,
            NotebookCommands::Create { name } => {
                print_json(&storage.create_notebook(&name).await?)?
            }
            NotebookCommands::Rename { id, name } => {
                storage
                    .update_notebook(id, UpdateNotebookInput::rename(name))
                    .await?;
            }
            NotebookCommands::Delete { id } => storage.delete_notebook(id).await?,
        },
        Commands::Note { command } => match command {
            NoteCommands::List { notebook_id } => {
                print_json(&storage.list_notes_by_notebook(notebook_id).await?)?
            }
            NoteCommands::Create {
                notebook_id,
                title,
                content,
            } => {
                let note = storage
                    .create_note(CreateNoteInput {
                        notebook_id,
                        title,
                        content,
                    })
                    .await?;
                print_json(&note)?
            }
            NoteCommands::Show { id } => match storage.get_note(id).await? {
                Some(note) => print_json(&note)?,
                None => anyhow::bail!("Note {} not found", id),
            },
            NoteCommands::Edit { id, title, content } => {
                let input = UpdateNoteInput { title, content };
                if input.is_empty() {
                    anyhow::bail!("Nothing to update: pass --title and/or --content");
                }
                storage.update_note(id, input).await?;
            }
            NoteCommands::Delete { id } => storage.delete_note(id).await?,
        },
        Commands::Search { query } => print_json(&storage.search_notes(&query).await?)?,
        Commands::Image { command } => match command {
            ImageCommands::Upload { file } => {
                let bytes = std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let file_name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let url = storage
                    .upload_image(ImageUpload::new(file_name, bytes))
                    .await?;
                println!("{}", url);
            }
            ImageCommands::Delete { url } => storage.delete_image(&url).await?,
        },
    }

    Ok(())
}
