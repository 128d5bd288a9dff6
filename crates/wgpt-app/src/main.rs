//! WGPT terminal client - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite-backed local store
//! 3. Check for a signed-in user
//! 4. Build the completion client, attachment and capture services
//! 5. Run the chat loop on stdin

mod cli;
mod repl;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use wgpt_chat::{
    AttachmentService, ChatOrchestrator, CohereClient, ConversationStore, InMemoryDisplayRefs,
    Session,
};
use wgpt_core::config::{WgptConfig, API_KEY_ENV};
use wgpt_core::types::UserRecord;
use wgpt_storage::{Database, LocalStore, SqliteLocalStore};
use wgpt_voice::{CaptureService, UnavailableRecognizer};

use cli::{expand_home, CliArgs};
use repl::{ConsoleNotifier, Flow};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = WgptConfig::load_or_default(&config_file);
    config.apply_env();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing. Logs go to stderr so they do not interleave with the chat.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting WGPT v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(&config.storage.db_file);
    let db = Arc::new(Database::open(&db_path)?);
    let backend: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(db));
    tracing::info!(path = %db_path.display(), "Local store opened");

    // Session.
    let session = Session::new(Arc::clone(&backend));
    let user = match session.require_user() {
        Ok(user) => user,
        Err(_) => match (args.name.clone(), args.email.clone()) {
            (Some(name), Some(email)) => {
                let user = UserRecord { name, email };
                session.sign_in(&user)?;
                user
            }
            _ => {
                eprintln!("Not signed in. Run again with --name <NAME> --email <EMAIL>.");
                return Ok(());
            }
        },
    };

    // Services.
    if config.completion.api_key.is_empty() {
        tracing::warn!("Set {} or completion.api_key to reach the service", API_KEY_ENV);
    }
    let completion = Arc::new(CohereClient::new(config.completion.clone())?);
    let attachments = AttachmentService::new(
        Arc::new(InMemoryDisplayRefs::new()),
        &config.attachments,
    );
    let capture = Arc::new(CaptureService::new(
        Arc::new(UnavailableRecognizer),
        &config.voice,
    ));

    let orch = ChatOrchestrator::new(
        ConversationStore::load(Arc::clone(&backend)),
        completion,
        attachments,
        capture,
        Arc::new(ConsoleNotifier),
    );

    println!("Hi {}. Ask WGPT anything about your car. /help lists commands.", user.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = repl::parse_command(&line);
        if repl::execute(&orch, &session, command).await == Flow::Exit {
            break;
        }
    }

    tracing::info!("WGPT exiting");
    Ok(())
}
