mod export;

use anyhow::{bail, Context, Result};
use attend_core::{Embedding, EuclideanMatcher, Identification, Matcher};
use attend_media::{DetectionFile, FrameSource, ImageSequenceSource};
use attend_pipeline::{run_session, spawn_video_session, Config, SessionSummary};
use attend_store::{Database, MarkMode, MarkOutcome};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use export::ExportFormat;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "attend", about = "Face-recognition attendance")]
struct Cli {
    /// TOML config file; ATTEND_* variables still override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from one or more face embeddings
    Enroll {
        /// Name to record attendance under
        name: String,
        /// JSON file holding an array of 128-value embeddings
        #[arg(short, long)]
        embeddings: PathBuf,
    },
    /// Match a single embedding against the gallery
    Identify {
        /// JSON file holding one 128-value embedding
        embedding: PathBuf,
        /// Override the configured tolerance
        #[arg(short, long)]
        tolerance: Option<f64>,
    },
    /// Mark a person present by hand
    Mark {
        name: String,
        /// Defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long, default_value = "rate-limited")]
        mode: MarkMode,
    },
    /// List attendance, most recent first
    List {
        /// Only this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Attendance history for one person
    Person { name: String },
    /// Delete one attendance record
    Delete {
        name: String,
        date: NaiveDate,
        /// HH:MM:SS
        time: NaiveTime,
    },
    /// Totals across the whole ledger
    Summary,
    /// Export attendance records
    Export {
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Run a video session over a directory of decoded frames
    Process {
        /// Directory of frame images, ordered by file name
        frames: PathBuf,
        /// Frame rate the frames were decoded at
        #[arg(long)]
        fps: f64,
        /// Detections JSON produced by the face analyzer
        #[arg(long)]
        detections: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run a live session over a frame directory until exhausted or Ctrl-C
    Live {
        frames: PathBuf,
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        #[arg(long)]
        detections: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show frame source properties without processing
    Probe {
        frames: PathBuf,
        #[arg(long)]
        fps: f64,
    },
    /// Manage crops of unrecognized faces
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Manage enrolled faces
    Gallery {
        #[command(subcommand)]
        action: GalleryAction,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Number of stored crops
    Count,
    /// Delete all stored crops
    Clear,
}

#[derive(Subcommand)]
enum GalleryAction {
    /// List enrollment records
    List,
    /// Remove one enrollment record
    Remove { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let config = Config::from_env();
            config.validate()?;
            config
        }
    };

    match cli.command {
        Commands::Enroll { name, embeddings } => {
            let samples: Vec<Embedding> = read_json(&embeddings)?;
            let db = config.open_database()?;
            let record = db.gallery().enroll(&name, &samples)?;
            println!(
                "Enrolled {} (record {}, {} sample(s))",
                record.identity,
                record.id,
                samples.len()
            );
        }
        Commands::Identify {
            embedding,
            tolerance,
        } => {
            let probe: Embedding = read_json(&embedding)?;
            let db = config.open_database()?;
            let gallery = db.gallery().load()?;
            let tolerance = tolerance.unwrap_or(config.tolerance);
            match EuclideanMatcher.identify(&probe, &gallery, tolerance) {
                Identification::Known {
                    identity, distance, ..
                } => println!("{identity} (distance {distance:.4})"),
                Identification::Unknown {
                    best_distance: Some(d),
                } => println!("Unknown (closest distance {d:.4}, tolerance {tolerance})"),
                Identification::Unknown { best_distance: None } => {
                    println!("Unknown (gallery is empty)")
                }
            }
        }
        Commands::Mark { name, date, mode } => {
            if name.trim().is_empty() {
                bail!("name must not be empty");
            }
            let db = config.open_database()?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            match db.ledger().mark(name.trim(), date, mode) {
                MarkOutcome::Marked => println!("Marked {name} present on {date}"),
                MarkOutcome::AlreadyMarked => println!("{name} is already marked ({mode})"),
                MarkOutcome::Failed => bail!("failed to record attendance for {name}"),
            }
        }
        Commands::List { date, json } => {
            let events = config.open_database()?.ledger().list(date)?;
            if json {
                println!("{}", export::export_json(&events)?);
            } else if events.is_empty() {
                println!("No attendance records");
            } else {
                for event in &events {
                    println!("{}  {}  {}", event.date, event.time, event.identity);
                }
            }
        }
        Commands::Person { name } => {
            let events = config.open_database()?.ledger().list_by_identity(&name)?;
            println!("{name}: {} record(s)", events.len());
            for event in &events {
                println!("  {}  {}", event.date, event.time);
            }
        }
        Commands::Delete { name, date, time } => {
            if config.open_database()?.ledger().delete(&name, date, time)? {
                println!("Deleted {name} at {date} {time}");
            } else {
                bail!("no attendance record for {name} at {date} {time}");
            }
        }
        Commands::Summary => {
            let summary = config.open_database()?.ledger().summarize()?;
            println!("Total records:  {}", summary.total_records);
            println!("Unique people:  {}", summary.unique_identities);
            for (date, count) in &summary.per_date {
                println!("  {date}  {count}");
            }
        }
        Commands::Export {
            output,
            format,
            date,
        } => {
            let events = config.open_database()?.ledger().list(date)?;
            let rendered = export::render(&events, format)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {} record(s) to {}", events.len(), path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Process {
            frames,
            fps,
            detections,
            json,
        } => {
            let db = config.open_database()?;
            let analyzer = DetectionFile::load(&detections)?;
            let handle = spawn_video_session(
                &db,
                config.video_options(),
                config.review_sink(),
                Box::new(ImageSequenceSource::new(frames, fps)),
                Box::new(analyzer),
            )?;

            let cancel = handle.cancel_flag();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; stopping session");
                    cancel.store(true, Ordering::Relaxed);
                }
            });
            let summary = handle.wait().await?;
            interrupt.abort();
            print_summary(&summary, json)?;
        }
        Commands::Live {
            frames,
            fps,
            detections,
            json,
        } => {
            let db = config.open_database()?;
            let source = ImageSequenceSource::new(frames, fps);
            let summary = run_live(db, &config, source, &detections).await?;
            print_summary(&summary, json)?;
        }
        Commands::Probe { frames, fps } => {
            let metadata = ImageSequenceSource::new(frames, fps).open()?;
            let bounds = config.video_options().duration;
            println!("Frames:      {}", metadata.frame_count);
            println!("Resolution:  {}x{}", metadata.width, metadata.height);
            println!("FPS:         {:.2}", metadata.fps);
            println!("Duration:    {:.1}s", metadata.duration_secs());
            println!("To analyze:  {}", metadata.expected_samples());
            if let Some(bounds) = bounds {
                let verdict = if bounds.contains(metadata.duration_secs()) {
                    "ok"
                } else {
                    "out of range"
                };
                println!(
                    "Length:      {verdict} ({:.1}s to {:.1}s allowed)",
                    bounds.min_secs, bounds.max_secs
                );
            }
        }
        Commands::Review { action } => {
            let sink = config.review_sink();
            match action {
                ReviewAction::Count => {
                    println!("{} face(s) awaiting review in {}", sink.count()?, sink.dir().display())
                }
                ReviewAction::Clear => println!("Removed {} face(s)", sink.clear()?),
            }
        }
        Commands::Gallery { action } => {
            let gallery = config.open_database()?.gallery();
            match action {
                GalleryAction::List => {
                    let records = gallery.load()?;
                    if records.is_empty() {
                        println!("No faces enrolled");
                    }
                    for record in &records {
                        println!("{:>5}  {}", record.id, record.identity);
                    }
                }
                GalleryAction::Remove { id } => {
                    if !gallery.remove(id)? {
                        bail!("no enrollment record with id {id}");
                    }
                    println!("Removed record {id}");
                }
            }
        }
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

/// Every frame is analyzed and no duration limit applies, as for a camera.
async fn run_live(
    db: Database,
    config: &Config,
    mut source: ImageSequenceSource,
    detections: &Path,
) -> Result<SessionSummary> {
    let mut analyzer = DetectionFile::load(detections)?;
    let options = config.live_options();
    let sink = config.review_sink();

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping session");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let summary = tokio::task::spawn_blocking(move || {
        run_session(&db, options, sink, &mut source, &mut analyzer, &|| {
            stop.load(Ordering::Relaxed)
        })
    })
    .await??;

    interrupt.abort();
    Ok(summary)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid embedding JSON in {}", path.display()))
}

fn print_summary(summary: &SessionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if summary.cancelled {
        println!("Session stopped early");
    }
    if let Some(reason) = &summary.source_error {
        println!("Frame source failed, run is incomplete: {reason}");
    }
    println!("Frames analyzed:     {}", summary.frames_processed);
    println!("Faces detected:      {}", summary.faces_detected);
    println!("People marked:       {}", summary.people_marked());
    for person in &summary.newly_marked {
        println!("  {}  {}", person.time, person.identity);
    }
    println!("Unrecognized faces:  {}", summary.unrecognized_faces);
    println!("Saved for review:    {}", summary.artifacts_saved());
    if summary.mark_failures > 0 {
        println!("Failed marks:        {}", summary.mark_failures);
    }
    Ok(())
}
