use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use metaload::database;
use metaload::database::schema;
use metaload::dictionary::{Dictionary, DictionarySource};
use metaload::loader;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a directory of ndjson entity files into the graph store.
    Upload {
        /// Directory holding one `<Type>.ndjson` file per entity type.
        #[clap(long)]
        source_path: PathBuf,
        #[clap(long)]
        program: String,
        #[clap(long)]
        project: String,
        /// Data dictionary: a directory of YAML schemas or an http(s) URL.
        #[clap(long)]
        dictionary_path: String,
        /// Dependency-order configuration.
        #[clap(long, default_value = "config.yaml")]
        config_path: PathBuf,
        /// Database file or URL; defaults to DATABASE_URL.
        #[clap(long)]
        database: Option<String>,
    },
    /// Remove every vertex belonging to a program-project from the store.
    Empty {
        #[clap(long)]
        program: String,
        #[clap(long)]
        project: String,
        #[clap(long)]
        dictionary_path: String,
        #[clap(long, default_value = "config.yaml")]
        config_path: PathBuf,
        #[clap(long)]
        database: Option<String>,
    },
    /// Database maintenance.
    Db {
        #[clap(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Create the physical tables named by the dictionary mapping.
    Init {
        #[clap(long)]
        dictionary_path: String,
        #[clap(long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::Upload {
            source_path,
            program,
            project,
            dictionary_path,
            config_path,
            database,
        } => {
            info!(
                "Uploading {} into {}-{}",
                source_path.display(),
                program,
                project
            );
            let database_url = database::get_database_url(database.as_deref());
            loader::meta_upload(
                &source_path,
                &program,
                &project,
                &dictionary_path,
                &config_path,
                &database_url,
            )
            .await?;
        }
        Commands::Empty {
            program,
            project,
            dictionary_path,
            config_path,
            database,
        } => {
            let database_url = database::get_database_url(database.as_deref());
            loader::empty_project(
                &program,
                &project,
                &dictionary_path,
                &config_path,
                &database_url,
            )
            .await?;
        }
        Commands::Db { command } => match command {
            DbCommands::Init {
                dictionary_path,
                database,
            } => {
                info!("Initializing graph tables");
                let database_url = database::get_database_url(database.as_deref());
                let source = DictionarySource::parse(&dictionary_path);
                let dictionary = Dictionary::load(&source).await?;
                let conn = database::establish_connection(&database_url).await?;
                schema::init_graph_tables(&conn, dictionary.table_mappings()).await?;
            }
        },
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .without_time()
        .init();
}
