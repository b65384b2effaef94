//! Easel command-line host (native).
//!
//! Drives a headless document session against the local stores: recovers the
//! autosaved draft, opens and exports interchange files, imports images and
//! manages saved documents.

use clap::{Parser, Subcommand};
use easel_core::storage::{AutoSaveManager, create_default_fallback, create_default_storage, recover};
use easel_core::{
    ConfigError, DocumentError, DocumentFile, DocumentLibrary, DocumentSession, EditorConfig, ImportedImage,
    Outcome, Recovery, SessionError, StorageError,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Image(#[from] easel_core::ImageError),
    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

type AppResult<T> = Result<T, AppError>;

/// Headless Easel editor host.
#[derive(Debug, Parser)]
#[command(name = "easel", version, about)]
struct Args {
    /// Editor configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Action {
    /// Recover the draft and describe it
    Status,
    /// Open a document file as the current draft and save it
    Open { file: PathBuf },
    /// Write the current draft as a document file
    Export { file: PathBuf },
    /// Add an image to the current draft
    ImportImage { file: PathBuf },
    /// List saved documents
    List,
    /// List saved versions of a document
    Versions { id: String },
    /// Delete the current draft
    Discard,
}

fn read(path: &Path) -> AppResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| AppError::Io(path.to_path_buf(), e))
}

fn describe(session: &DocumentSession) {
    let canvas = session.canvas();
    println!(
        "{} ({}x{}, background {})",
        session.document_name(),
        canvas.width,
        canvas.height,
        canvas.background.to_hex()
    );
    for layer in session.layers().list_layers() {
        let mut flags = Vec::new();
        if !layer.visible {
            flags.push("hidden");
        }
        if layer.locked {
            flags.push("locked");
        }
        if layer.is_clip_mask {
            flags.push("mask");
        }
        println!("  {} {:?} {:?} {}", layer.id(), layer.kind, layer.name, flags.join(","));
    }
}

async fn run(args: Args) -> AppResult<()> {
    let config = match &args.config {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::default(),
    };
    let storage = create_default_storage(config.storage_dir.clone());
    let fallback = create_default_fallback(config.storage_dir.clone());
    let mut autosave = AutoSaveManager::with_fallback(storage.clone(), fallback);
    autosave.set_interval(config.autosave_interval());
    autosave.set_draft_debounce(config.draft_debounce());
    let library = DocumentLibrary::new(storage.clone()).with_max_versions(config.max_versions);

    let mut session = DocumentSession::new(&config);
    match recover(&mut session, &autosave).await {
        Recovery::Restored { layers } => log::info!("Recovered draft with {} layers", layers),
        Recovery::Empty => log::info!("Starting from an empty canvas"),
        Recovery::Failed(reason) => log::warn!("Draft recovery failed: {}", reason),
        Recovery::Aborted => return Ok(()),
    }

    match args.action.unwrap_or(Action::Status) {
        Action::Status => describe(&session),
        Action::Open { file: path } => {
            let bytes = read(&path)?;
            let json = String::from_utf8_lossy(&bytes);
            let mut file = DocumentFile::from_json(&json)?;
            session.open_document_file(&file)?;
            let id = library.save(&mut file).await?;
            session.set_document_id(Some(id.clone()));
            library.save_version(&id, &file, Some("Opened".into())).await?;
            autosave.save_draft(&session.draft()?).await?;
            println!("Opened {} as {}", file.name, id);
            describe(&session);
        }
        Action::Export { file: path } => {
            let json = session.to_document_file().to_json()?;
            std::fs::write(&path, json).map_err(|e| AppError::Io(path.clone(), e))?;
            println!("Exported {} to {}", session.document_name(), path.display());
        }
        Action::ImportImage { file: path } => {
            let image = ImportedImage::from_bytes(read(&path)?)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Image".to_string());
            match session.add_image(&image, name, Instant::now())? {
                Outcome::Added(id) => println!("Added image layer {}", id),
                other => log::warn!("Image was not added: {:?}", other),
            }
            autosave.save_draft(&session.draft()?).await?;
        }
        Action::List => {
            for doc in library.list().await? {
                println!("{}  {}  (updated {})", doc.id, doc.name, doc.updated_at);
            }
        }
        Action::Versions { id } => {
            for version in library.list_versions(&id).await? {
                println!(
                    "#{} {} {}",
                    version.seq,
                    version.saved_at,
                    version.label.as_deref().unwrap_or("")
                );
            }
        }
        Action::Discard => {
            autosave.clear_draft().await?;
            println!("Draft discarded");
        }
    }

    for notice in session.take_notices() {
        eprintln!("{:?}: {}", notice.level, notice.message);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    log::info!("Starting Easel");

    let args = Args::parse();
    if let Err(e) = pollster::block_on(run(args)) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_default_action_is_status() {
        let args = Args::try_parse_from(["easel"]).unwrap();
        assert_eq!(args.action, None);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_config_flag_anywhere() {
        let args = Args::try_parse_from(["easel", "export", "out.json", "--config", "easel.json"]).unwrap();
        assert_eq!(args.action, Some(Action::Export { file: "out.json".into() }));
        assert_eq!(args.config, Some(PathBuf::from("easel.json")));

        let args = Args::try_parse_from(["easel", "--config", "easel.json", "versions", "doc-1"]).unwrap();
        assert_eq!(args.action, Some(Action::Versions { id: "doc-1".into() }));
    }

    #[test]
    fn test_missing_operand_is_usage_error() {
        let err = Args::try_parse_from(["easel", "open"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(Args::try_parse_from(["easel", "frobnicate"]).is_err());
        assert!(Args::try_parse_from(["easel", "--config"]).is_err());
    }

    #[test]
    fn test_subcommand_names_are_kebab_case() {
        let args = Args::try_parse_from(["easel", "import-image", "logo.png"]).unwrap();
        assert_eq!(args.action, Some(Action::ImportImage { file: "logo.png".into() }));
    }
}
