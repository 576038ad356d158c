use anyhow::{Context, Result};
use bioasist_core::{ArcFaceExtractor, CosineMatcher, ScrfdDetector};
use bioasist_engine::{
    spawn_pipeline, Config, Pipeline, PipelineError, TracingSink, VerificationOutcome,
};
use bioasist_store::{EnrollmentStore, SqliteStore, SqliteTraineeDirectory};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bioasist", about = "Bioasist trainee face enrollment and verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face sample for a trainee
    Enroll {
        /// Trainee id the sample belongs to
        #[arg(short, long)]
        trainee: String,
        /// Path to the image file
        image: PathBuf,
    },
    /// Verify a face capture against all enrolled trainees
    Verify {
        /// Path to the image file
        image: PathBuf,
    },
    /// List stored descriptors for a trainee
    List {
        /// Trainee id
        trainee: String,
    },
    /// Remove all stored descriptors for a trainee
    Remove {
        /// Trainee id
        trainee: String,
    },
    /// Register a trainee in the local directory
    AddTrainee {
        /// Trainee id
        id: String,
        /// Display name
        name: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { trainee, image } => {
            let handle = spawn_workers(&config)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let receipt = handle.enroll(&trainee, bytes).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::Verify { image } => {
            let handle = spawn_workers(&config)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let outcome = handle.verify(bytes).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            match outcome {
                VerificationOutcome::Accepted { .. } => {}
                VerificationOutcome::Ambiguous { .. } => std::process::exit(2),
                VerificationOutcome::Rejected { .. } => std::process::exit(1),
            }
        }
        Commands::List { trainee } => {
            let store = open_store(&config)?;
            let descriptors = store.descriptors_for(&trainee)?;
            if descriptors.is_empty() {
                println!("no descriptors for trainee {trainee}");
            }
            for d in descriptors {
                println!(
                    "{}  dim={}  version={}  created={}",
                    d.id,
                    d.descriptor.dim(),
                    d.descriptor.model_version,
                    d.created_at.to_rfc3339()
                );
            }
        }
        Commands::Remove { trainee } => {
            let store = open_store(&config)?;
            let removed = store.remove(&trainee)?;
            println!("removed {removed} descriptors for trainee {trainee}");
        }
        Commands::AddTrainee { id, name } => {
            let directory = SqliteTraineeDirectory::open(&config.db_path)?;
            directory.add_trainee(&id, &name)?;
            println!("trainee {id} ({name}) registered");
        }
        Commands::Config => {
            println!("model_dir: {}", config.model_dir.display());
            println!("db_path: {}", config.db_path.display());
            println!("accept_threshold: {}", config.match_policy.accept_threshold);
            println!("margin_threshold: {}", config.match_policy.margin_threshold);
            println!("max_samples_per_trainee: {}", config.max_samples_per_trainee);
            println!("multi_face_policy: {:?}", config.multi_face_policy);
            println!("workers: {}", config.workers);
        }
    }

    Ok(())
}

/// Build the production pipeline pool from configuration.
///
/// Model sessions are per-worker; the store and event sink are shared.
fn spawn_workers(config: &Config) -> Result<bioasist_engine::PipelineHandle> {
    let directory = Arc::new(SqliteTraineeDirectory::open(&config.db_path)?);
    let store: Arc<dyn EnrollmentStore> = Arc::new(SqliteStore::open(
        &config.db_path,
        directory,
        config.max_samples_per_trainee,
    )?);
    let sink = Arc::new(TracingSink);

    let scrfd_path = config.scrfd_model_path();
    let arcface_path = config.arcface_model_path();
    let config = config.clone();

    let handle = spawn_pipeline(config.workers, move || {
        let detector = ScrfdDetector::load(&scrfd_path, config.detector)
            .map_err(PipelineError::Detect)?;
        let extractor = ArcFaceExtractor::load(&arcface_path, config.extractor)
            .map_err(PipelineError::Extraction)?;
        Ok(Pipeline::new(
            Box::new(detector),
            Box::new(extractor),
            Box::new(CosineMatcher),
            Arc::clone(&store),
            sink.clone(),
            config.intake,
            config.match_policy,
            config.multi_face_policy,
        ))
    })?;

    Ok(handle)
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let directory = Arc::new(SqliteTraineeDirectory::open(&config.db_path)?);
    Ok(SqliteStore::open(
        &config.db_path,
        directory,
        config.max_samples_per_trainee,
    )?)
}
