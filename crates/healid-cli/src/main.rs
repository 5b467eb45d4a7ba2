use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use healid_identity::{
    Capabilities, Identification, IdentityConfig, IdentityContext, IdentityError, NewPatient,
    PatientId,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "healid", about = "HealID patient identity CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a patient exists locally or on the record service
    Check { id: String },
    /// Register a patient id locally (or refresh its timestamp)
    Register { id: String },
    /// Create a patient on the record service and register it locally
    Create(Demographics),
    /// Add face samples for a patient from image files
    Enroll {
        id: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Rebuild the recognition model from every stored sample
    Train,
    /// Identify the face in an image file
    Identify { image: PathBuf },
    /// List a patient's stored face samples
    Samples { id: String },
    /// Delete a patient, their samples and the trained model
    Purge { id: String },
    /// Show record store and model status
    Status,
}

#[derive(Args)]
struct Demographics {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    birth_date: Option<String>,
    #[arg(long)]
    blood_type: Option<String>,
    #[arg(long)]
    pregnancy_status: Option<String>,
    #[arg(long)]
    allergies: Option<String>,
    #[arg(long)]
    medications: Option<String>,
    #[arg(long)]
    diagnosis: Option<String>,
}

impl From<Demographics> for NewPatient {
    fn from(d: Demographics) -> Self {
        NewPatient {
            name: d.name,
            city: d.city,
            gender: d.gender,
            birth_date: d.birth_date,
            blood_type: d.blood_type,
            pregnancy_status: d.pregnancy_status,
            allergies: d.allergies,
            medications: d.medications,
            diagnosis: d.diagnosis,
        }
    }
}

fn parse_id(raw: &str) -> Result<PatientId> {
    Ok(raw.parse()?)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Outcomes that make `healid identify` exit unsuccessfully, whatever
/// the output format.
fn identify_exit_error(outcome: &Identification) -> Option<IdentityError> {
    match outcome {
        Identification::NotTrained => Some(IdentityError::ModelNotTrained),
        _ => None,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = IdentityConfig::load()?;
    let caps = Capabilities::standard(&config).with_context(|| {
        format!("loading face detector from {}", config.detector_path().display())
    })?;
    let ctx = IdentityContext::open(&config, caps)?;

    match cli.command {
        Commands::Check { id } => {
            let id = parse_id(&id)?;
            let check = ctx.check_patient(id);
            let res = &check.resolution;
            if cli.json {
                println!("{}", serde_json::to_string(&check)?);
            } else if res.exists {
                let who = check.name.as_deref().unwrap_or("name unknown");
                println!("patient [{id}] ({who}) exists (last updated {})", res.detail);
            } else {
                println!("patient [{id}] not found: {}", res.detail);
            }
        }
        Commands::Register { id } => {
            let reg = ctx.register_or_update(parse_id(&id)?)?;
            if cli.json {
                println!("{}", serde_json::to_string(&reg)?);
            } else {
                println!("{reg}");
            }
        }
        Commands::Create(demographics) => {
            let reg = ctx.create_patient(&demographics.into())?;
            if cli.json {
                println!("{}", serde_json::to_string(&reg)?);
            } else {
                println!("created {reg}");
            }
        }
        Commands::Enroll { id, images } => {
            let id = parse_id(&id)?;
            let mut stored = Vec::new();
            for path in &images {
                let bytes = read_image(path)?;
                match ctx.enroll_face(id, &bytes) {
                    Ok(enrollment) => stored.push(enrollment.sample),
                    Err(e) => eprintln!("{}: {e}", path.display()),
                }
            }
            if cli.json {
                println!("{}", serde_json::json!({ "patient": id, "samples": stored }));
            } else {
                println!("stored {} of {} samples for patient [{id}]", stored.len(), images.len());
                println!("run `healid train` to include them in the model");
            }
            if stored.is_empty() {
                anyhow::bail!("no face samples stored");
            }
        }
        Commands::Train => {
            let report = ctx.train()?;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{report}");
                if report.skipped_samples > 0 {
                    println!("skipped {} unreadable samples", report.skipped_samples);
                }
            }
        }
        Commands::Identify { image } => {
            let outcome = ctx.identify_frame(&read_image(&image)?);
            let name = outcome.patient().and_then(|id| ctx.patient_name(id));
            if cli.json {
                let mut reply = serde_json::json!(outcome);
                reply["message"] = serde_json::json!(outcome.to_string());
                if let Some(name) = &name {
                    reply["name"] = serde_json::json!(name);
                }
                println!("{reply}");
            } else {
                match &outcome {
                    Identification::Matched { patient, distance, .. } => {
                        let who = name.as_deref().unwrap_or("name unknown");
                        println!("patient [{patient}] ({who}), distance {distance:.1}");
                    }
                    Identification::LowConfidence { distance } => {
                        println!("{outcome} (distance {distance:.1})");
                    }
                    // Reported through the exit error below
                    Identification::NotTrained => {}
                    _ => println!("{outcome}"),
                }
            }
            if let Some(e) = identify_exit_error(&outcome) {
                return Err(e.into());
            }
        }
        Commands::Samples { id } => {
            let samples = ctx.list_samples(parse_id(&id)?)?;
            if cli.json {
                println!("{}", serde_json::json!(samples));
            } else if samples.is_empty() {
                println!("no samples");
            } else {
                for path in samples {
                    println!("{}", path.display());
                }
            }
        }
        Commands::Purge { id } => {
            let id = parse_id(&id)?;
            let report = ctx.purge_patient(id)?;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "patient [{id}] purged: record {}, {} samples deleted",
                    if report.record_removed { "removed" } else { "absent" },
                    report.samples_deleted
                );
                println!("model unloaded; run `healid train` to rebuild it");
            }
        }
        Commands::Status => {
            let status = ctx.status()?;
            if cli.json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("patients:          {}", status.patients);
                println!("labelled patients: {}", status.labelled_patients);
                match status.model_built_at {
                    Some(at) if status.model_loaded => {
                        println!("model:             {} labels (loaded {at})", status.model_labels)
                    }
                    _ => println!("model:             not trained"),
                }
                println!("match threshold:   {}", status.match_threshold);
            }
        }
    }

    Ok(())
}
