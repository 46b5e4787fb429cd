//! `facegallery train`: collect photos, embed them, write the gallery.

use anyhow::{bail, Context, Result};
use facegallery_core::gallery::SavedGallery;
use facegallery_core::training::{photos_in_dir, Trainer};
use facegallery_core::{EmbeddingModel, FacePipeline, OnnxPipeline};
use facegallery_hw::Camera;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Stale buffers dropped before each capture so the saved frame is current.
const FLUSH_FRAMES: usize = 4;

pub enum Source {
    Directory(PathBuf),
    Webcam {
        device: String,
        count: usize,
        photos_dir: PathBuf,
    },
}

pub struct TrainOptions {
    pub name: String,
    pub source: Source,
    pub output: PathBuf,
    pub model: EmbeddingModel,
    pub model_dir: PathBuf,
}

pub fn run(opts: &TrainOptions) -> Result<()> {
    let mut pipeline = OnnxPipeline::load(&opts.model_dir, opts.model)
        .with_context(|| format!("failed to load models from {}", opts.model_dir.display()))?;

    let photos = match &opts.source {
        Source::Directory(dir) => {
            photos_in_dir(dir).with_context(|| format!("cannot read photo directory {}", dir.display()))?
        }
        Source::Webcam {
            device,
            count,
            photos_dir,
        } => capture_photos(&mut pipeline, device, *count, photos_dir, &opts.name)?,
    };

    let saved = train_photos(&mut pipeline, &opts.name, &photos, &opts.output)?;
    println!("Gallery written to {}", saved.primary.display());
    println!("Backup written to {}", saved.backup.display());
    Ok(())
}

/// Embed `photos`, report statistics and write the gallery into `output`.
fn train_photos<P: FacePipeline + ?Sized>(
    pipeline: &mut P,
    name: &str,
    photos: &[PathBuf],
    output: &Path,
) -> Result<SavedGallery> {
    if photos.is_empty() {
        bail!("no photos to train on");
    }

    println!("Training {name} from {} photo(s) with {}", photos.len(), pipeline.model_name());
    let mut trainer = Trainer::new(name);

    let bar = ProgressBar::new(photos.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    for path in photos {
        bar.set_message(file_label(path));
        trainer.process(&mut *pipeline, path);
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!(
        "{} photo(s) embedded, {} failed",
        trainer.valid_photos().len(),
        trainer.failed_photos().len()
    );
    for failed in trainer.failed_photos() {
        println!("  skipped {}: {}", failed.path, failed.error);
    }
    if trainer.embeddings().is_empty() {
        bail!("no face could be embedded; nothing to save");
    }

    crate::print_statistics(&trainer.statistics());

    let file = trainer.into_gallery_file(pipeline.model_name(), pipeline.detector_name())?;
    Ok(file.save(output)?)
}

/// Interactive capture loop. Returns the paths of the saved photos.
fn capture_photos(
    pipeline: &mut OnnxPipeline,
    device: &str,
    count: usize,
    photos_dir: &Path,
    name: &str,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(photos_dir)
        .with_context(|| format!("cannot create {}", photos_dir.display()))?;

    let camera = Camera::open(device).with_context(|| format!("cannot open camera {device}"))?;
    let mut stream = camera.stream()?;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut saved = Vec::with_capacity(count);

    println!("Capturing {count} photos. Press Enter to capture, q then Enter to stop.");

    while saved.len() < count {
        for _ in 0..FLUSH_FRAMES {
            stream.next_frame()?;
        }
        let frame = stream.next_lit_frame(10)?;
        let image = frame.to_image()?;
        let face = pipeline.represent(&image)?.is_some();

        print!(
            "[{}/{}] {}  > ",
            saved.len(),
            count,
            if face { "face detected" } else { "no face" }
        );
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        match line?.trim() {
            "q" | "Q" => break,
            "" if face => {
                let path = photos_dir.join(photo_file_name(name, saved.len() + 1));
                image
                    .save(&path)
                    .with_context(|| format!("cannot write {}", path.display()))?;
                tracing::debug!(path = %path.display(), "captured");
                saved.push(path);
            }
            "" => println!("No face in view, not saved."),
            _ => {}
        }
    }

    println!("Captured {} photo(s)", saved.len());
    Ok(saved)
}

/// `Ana Torres`, 3 → `Ana_Torres_3.jpg`.
fn photo_file_name(name: &str, n: usize) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}_{n}.jpg")
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegallery_core::{Embedding, Gallery, PipelineError};
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    /// Embeds the top-left pixel's colour; black means "no face".
    struct ColourPipeline;

    impl FacePipeline for ColourPipeline {
        fn model_name(&self) -> &str {
            "Colour"
        }
        fn detector_name(&self) -> &str {
            "none"
        }
        fn embedding_dim(&self) -> usize {
            3
        }
        fn verify_threshold(&self) -> f32 {
            0.3
        }
        fn represent(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
            let p = image.get_pixel(0, 0).0;
            if p == [0, 0, 0] {
                return Ok(None);
            }
            Ok(Some(Embedding::normalized(p.iter().map(|&v| v as f32).collect())))
        }
    }

    fn write_photo(dir: &Path, file: &str, rgb: [u8; 3]) {
        RgbImage::from_pixel(4, 4, Rgb(rgb)).save(dir.join(file)).unwrap();
    }

    #[test]
    fn test_train_photos_from_directory() {
        let photos_dir = tempdir().unwrap();
        write_photo(photos_dir.path(), "a.png", [200, 10, 10]);
        write_photo(photos_dir.path(), "b.PNG", [190, 20, 10]);
        write_photo(photos_dir.path(), "dark.png", [0, 0, 0]);
        std::fs::write(photos_dir.path().join("broken.jpg"), b"not an image").unwrap();
        std::fs::write(photos_dir.path().join("notes.txt"), b"ignored").unwrap();

        let photos = photos_in_dir(photos_dir.path()).unwrap();
        assert_eq!(photos.len(), 4);

        let out = tempdir().unwrap();
        let saved = train_photos(&mut ColourPipeline, "Ana Torres", &photos, out.path()).unwrap();
        assert!(saved.backup.exists());

        let gallery = Gallery::load(&saved.primary, Some(3)).unwrap();
        assert_eq!(gallery.person_name, "Ana Torres");
        assert_eq!(gallery.model, "Colour");
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn test_train_photos_refuses_to_save_nothing() {
        let photos_dir = tempdir().unwrap();
        write_photo(photos_dir.path(), "dark.png", [0, 0, 0]);
        let photos = photos_in_dir(photos_dir.path()).unwrap();
        let out = tempdir().unwrap();
        let target = out.path().join("gallery");

        assert!(train_photos(&mut ColourPipeline, "Ana", &photos, &target).is_err());
        assert!(train_photos(&mut ColourPipeline, "Ana", &[], &target).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_photo_file_name() {
        assert_eq!(photo_file_name("Ana Torres", 3), "Ana_Torres_3.jpg");
        assert_eq!(photo_file_name("  bob ", 1), "bob_1.jpg");
        assert_eq!(photo_file_name("a/b", 2), "a_b_2.jpg");
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label(Path::new("/tmp/photos/a.jpg")), "a.jpg");
    }
}
