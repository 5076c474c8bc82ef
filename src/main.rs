use arbiter::{settings, storage, subject_sync, web};
use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "arbiter",
    version,
    about = "Policy-based access control decision engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database + migrations)
    let db = storage::init(&settings.database).await?;

    // seed the subject directory
    match &settings.subjects.file {
        Some(path) => {
            subject_sync::sync_subjects_from_file(&db, path).await?;
        }
        None => tracing::info!("No subjects file configured; using the stored directory"),
    }

    // start web server
    web::serve(settings, db).await?;
    Ok(())
}
