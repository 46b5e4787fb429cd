use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegallery_core::training::{SimilarityStats, TrainingQuality};
use facegallery_core::{EmbeddingModel, Gallery};
use facegallery_hw::Camera;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

mod train;

#[derive(Parser)]
#[command(name = "facegallery", about = "Train and inspect single-person face galleries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Model selection shared by commands that run inference.
#[derive(clap::Args)]
struct ModelArgs {
    /// Embedding model (ArcFace or Facenet512)
    #[arg(long, env = "FACEGALLERY_MODEL", default_value = "Facenet512")]
    model: EmbeddingModel,
    /// Directory holding det_10g.onnx and the embedding model
    #[arg(long, env = "FACEGALLERY_MODEL_DIR")]
    model_dir: Option<PathBuf>,
}

impl ModelArgs {
    fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(facegallery_core::default_model_dir)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a gallery for one person
    Train {
        /// Person's name (prompted when omitted)
        #[arg(short, long)]
        name: Option<String>,
        /// Train from the photos in this directory
        #[arg(long, conflicts_with = "webcam")]
        photos: Option<PathBuf>,
        /// Capture training photos from the webcam
        #[arg(long)]
        webcam: bool,
        /// Number of webcam photos to capture
        #[arg(long, default_value_t = 20, requires = "webcam")]
        count: usize,
        /// Camera device
        #[arg(long, env = "FACEGALLERY_CAMERA_DEVICE", default_value = "/dev/video0")]
        device: String,
        /// Where webcam captures are written
        #[arg(long, env = "FACEGALLERY_PHOTOS_DIR", default_value = "training_photos")]
        photos_dir: PathBuf,
        /// Gallery output directory (defaults to the directory of FACEGALLERY_GALLERY_PATH)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Print a gallery's contents and similarity statistics
    Stats {
        #[arg(long, env = "FACEGALLERY_GALLERY_PATH", default_value = "trained-faces/face_embeddings.json")]
        gallery: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            name,
            photos,
            webcam,
            count,
            device,
            photos_dir,
            output,
            model,
        } => {
            let name = match name {
                Some(name) => name,
                None => prompt_name()?,
            };
            let source = match (photos, webcam) {
                (Some(dir), _) => train::Source::Directory(dir),
                (None, true) => train::Source::Webcam {
                    device,
                    count,
                    photos_dir,
                },
                (None, false) => train::Source::Directory(photos_dir),
            };
            let output = output.unwrap_or_else(default_gallery_dir);

            train::run(&train::TrainOptions {
                name,
                source,
                output,
                model: model.model,
                model_dir: model.model_dir(),
            })?;
        }
        Commands::Stats { gallery } => {
            let gallery = Gallery::load(&gallery, None)
                .with_context(|| format!("cannot load {}", gallery.display()))?;
            print_gallery(&gallery);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn prompt_name() -> Result<String> {
    print!("Person's name: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let name = line.trim().to_string();
    if name.is_empty() {
        bail!("a name is required");
    }
    Ok(name)
}

fn default_gallery_dir() -> PathBuf {
    let path = std::env::var("FACEGALLERY_GALLERY_PATH")
        .unwrap_or_else(|_| "trained-faces/face_embeddings.json".to_string());
    gallery_dir_of(Path::new(&path))
}

fn gallery_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_gallery(gallery: &Gallery) {
    println!("Person:      {}", gallery.person_name);
    println!("Model:       {} ({})", gallery.model, gallery.detector);
    println!("Embeddings:  {} x {}", gallery.len(), gallery.dimension);
    println!("Created:     {}", gallery.created_at);
    println!("File:        {}", gallery.source.display());
    println!("SHA-256:     {}", gallery.fingerprint);
    println!();
    print_statistics(&SimilarityStats::compute(&gallery.embeddings));
}

pub(crate) fn print_statistics(stats: &SimilarityStats) {
    if stats.num_embeddings < 2 {
        println!("Only one embedding; no pairwise statistics.");
        return;
    }
    println!("Similarity between training photos:");
    println!("  mean {:.3}  std {:.3}", stats.mean_similarity, stats.std_similarity);
    println!("  min  {:.3}  max {:.3}", stats.min_similarity, stats.max_similarity);

    let quality = stats.quality();
    let marker = match quality {
        TrainingQuality::Excellent => "ok",
        TrainingQuality::Acceptable => "note",
        TrainingQuality::Poor => "warning",
    };
    println!("{marker}: {}", quality.advice());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gallery_dir_of() {
        assert_eq!(
            gallery_dir_of(Path::new("trained-faces/face_embeddings.json")),
            PathBuf::from("trained-faces")
        );
        assert_eq!(gallery_dir_of(Path::new("face_embeddings.json")), PathBuf::from("."));
        assert_eq!(gallery_dir_of(Path::new("/srv/g/x.json")), PathBuf::from("/srv/g"));
    }

    #[test]
    fn test_cli_parses_train_flags() {
        let cli = Cli::try_parse_from([
            "facegallery", "train", "--name", "Ana", "--webcam", "--count", "5", "--model", "arcface",
        ])
        .unwrap();
        match cli.command {
            Commands::Train { name, webcam, count, model, .. } => {
                assert_eq!(name.as_deref(), Some("Ana"));
                assert!(webcam);
                assert_eq!(count, 5);
                assert_eq!(model.model, EmbeddingModel::ArcFace);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_cli_rejects_photos_with_webcam() {
        assert!(Cli::try_parse_from(["facegallery", "train", "--photos", "p", "--webcam"]).is_err());
    }
}
