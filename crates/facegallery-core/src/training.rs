//! Build a gallery from a set of photos.
//!
//! Each photo is embedded independently. Failures are recorded with their
//! error text and never abort the run.

use crate::gallery::{FailedPhoto, GalleryError, GalleryFile};
use crate::pipeline::FacePipeline;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image extensions picked up from a photo directory.
pub const PHOTO_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Photos in `dir` with a known image extension (any case), sorted by path.
pub fn photos_in_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut photos: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_photo_extension(path))
        .collect();
    photos.sort();
    Ok(photos)
}

fn has_photo_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PHOTO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Pairwise cosine similarity across a gallery's embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub mean_similarity: f32,
    /// Population standard deviation.
    pub std_similarity: f32,
    pub min_similarity: f32,
    pub max_similarity: f32,
    pub embedding_dimension: usize,
    pub num_embeddings: usize,
}

/// Advisory reading of [`SimilarityStats::mean_similarity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingQuality {
    Excellent,
    Acceptable,
    Poor,
}

impl TrainingQuality {
    pub fn advice(&self) -> &'static str {
        match self {
            TrainingQuality::Excellent => "excellent training quality",
            TrainingQuality::Acceptable => {
                "acceptable quality; consider capturing more varied photos"
            }
            TrainingQuality::Poor => {
                "low quality; check that every photo shows the same person and the model configuration is consistent"
            }
        }
    }
}

impl SimilarityStats {
    /// Statistics over every unordered pair. All zeros with fewer than two embeddings.
    pub fn compute(embeddings: &[Embedding]) -> Self {
        let mut sims = Vec::new();
        for (i, a) in embeddings.iter().enumerate() {
            for b in &embeddings[i + 1..] {
                sims.push(a.similarity(b));
            }
        }

        let embedding_dimension = embeddings.first().map(Embedding::dim).unwrap_or(0);
        if sims.is_empty() {
            return Self {
                mean_similarity: 0.0,
                std_similarity: 0.0,
                min_similarity: 0.0,
                max_similarity: 0.0,
                embedding_dimension,
                num_embeddings: embeddings.len(),
            };
        }

        let n = sims.len() as f32;
        let mean = sims.iter().sum::<f32>() / n;
        let variance = sims.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;

        Self {
            mean_similarity: mean,
            std_similarity: variance.sqrt(),
            min_similarity: sims.iter().copied().fold(f32::INFINITY, f32::min),
            max_similarity: sims.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            embedding_dimension,
            num_embeddings: embeddings.len(),
        }
    }

    pub fn quality(&self) -> TrainingQuality {
        if self.mean_similarity > 0.8 {
            TrainingQuality::Excellent
        } else if self.mean_similarity > 0.6 {
            TrainingQuality::Acceptable
        } else {
            TrainingQuality::Poor
        }
    }
}

/// Accumulates embeddings and provenance for one person.
pub struct Trainer {
    person_name: String,
    embeddings: Vec<Embedding>,
    valid_photos: Vec<String>,
    failed_photos: Vec<FailedPhoto>,
}

impl Trainer {
    pub fn new(person_name: impl Into<String>) -> Self {
        Self {
            person_name: person_name.into(),
            embeddings: Vec::new(),
            valid_photos: Vec::new(),
            failed_photos: Vec::new(),
        }
    }

    /// Embed one photo. Returns whether it succeeded; failures are recorded.
    pub fn process<P: FacePipeline + ?Sized>(&mut self, pipeline: &mut P, path: &Path) -> bool {
        let photo_path = path.display().to_string();

        let outcome = image::open(path)
            .map_err(|e| format!("cannot read image: {e}"))
            .and_then(|img| {
                pipeline
                    .represent(&img.to_rgb8())
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "face could not be detected".to_string())
            });

        match outcome {
            Ok(embedding) => {
                self.embeddings.push(embedding);
                self.valid_photos.push(photo_path);
                true
            }
            Err(error) => {
                tracing::warn!(photo = %photo_path, %error, "photo skipped");
                self.failed_photos.push(FailedPhoto { path: photo_path, error });
                false
            }
        }
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn valid_photos(&self) -> &[String] {
        &self.valid_photos
    }

    pub fn failed_photos(&self) -> &[FailedPhoto] {
        &self.failed_photos
    }

    pub fn statistics(&self) -> SimilarityStats {
        SimilarityStats::compute(&self.embeddings)
    }

    /// Assemble the gallery file. Fails when no photo produced an embedding.
    pub fn into_gallery_file(self, model: &str, detector: &str) -> Result<GalleryFile, GalleryError> {
        if self.embeddings.is_empty() {
            return Err(GalleryError::NothingToSave);
        }

        let statistics = self.statistics();
        Ok(GalleryFile {
            name: self.person_name,
            model: model.to_string(),
            detector: detector.to_string(),
            embedding_size: statistics.embedding_dimension,
            num_photos: self.valid_photos.len(),
            embeddings: self.embeddings,
            timestamp: chrono::Local::now().to_rfc3339(),
            valid_photos: self.valid_photos,
            failed_photos: self.failed_photos,
            statistics: Some(statistics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineError;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    /// Embeds the top-left pixel colour; black means "no face".
    struct ColourPipeline;

    impl FacePipeline for ColourPipeline {
        fn model_name(&self) -> &str {
            "colour"
        }
        fn detector_name(&self) -> &str {
            "none"
        }
        fn embedding_dim(&self) -> usize {
            3
        }
        fn verify_threshold(&self) -> f32 {
            0.5
        }
        fn represent(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(None);
            }
            Ok(Some(Embedding::normalized(p.0.iter().map(|&v| v as f32).collect())))
        }
    }

    fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb(rgb)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_photos_in_dir_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.JPG", "a.png", "c.bmp", "notes.txt", "d.jpeg", "e.gif"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let names: Vec<String> = photos_in_dir(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "c.bmp", "d.jpeg"]);
    }

    #[test]
    fn test_stats_identical_embeddings() {
        let e = Embedding::normalized(vec![1.0, 2.0, 3.0]);
        let stats = SimilarityStats::compute(&[e.clone(), e.clone(), e]);
        assert!((stats.mean_similarity - 1.0).abs() < 1e-6);
        assert!(stats.std_similarity.abs() < 1e-6);
        assert_eq!(stats.num_embeddings, 3);
        assert_eq!(stats.embedding_dimension, 3);
        assert_eq!(stats.quality(), TrainingQuality::Excellent);
    }

    #[test]
    fn test_stats_mixed_pairs() {
        // Pairs: (x, x) = 1, (x, y) = 0, (x, y) = 0.
        let x = Embedding::new(vec![1.0, 0.0]);
        let y = Embedding::new(vec![0.0, 1.0]);
        let stats = SimilarityStats::compute(&[x.clone(), x, y]);
        assert!((stats.mean_similarity - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(stats.min_similarity, 0.0);
        assert_eq!(stats.max_similarity, 1.0);
        let expected_std = ((2.0f32 / 3.0).powi(2) + 2.0 * (1.0f32 / 3.0).powi(2)) / 3.0;
        assert!((stats.std_similarity - expected_std.sqrt()).abs() < 1e-6);
        assert_eq!(stats.quality(), TrainingQuality::Poor);
    }

    #[test]
    fn test_stats_single_embedding_is_zero() {
        let stats = SimilarityStats::compute(&[Embedding::new(vec![1.0, 0.0])]);
        assert_eq!(stats.mean_similarity, 0.0);
        assert_eq!(stats.num_embeddings, 1);
    }

    #[test]
    fn test_trainer_records_failures_and_continues() {
        let dir = tempdir().unwrap();
        let good = write_png(dir.path(), "good.png", [200, 10, 10]);
        let faceless = write_png(dir.path(), "faceless.png", [0, 0, 0]);
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();
        let also_good = write_png(dir.path(), "also_good.png", [190, 20, 5]);

        let mut trainer = Trainer::new("Ana Torres");
        let mut pipeline = ColourPipeline;
        let results: Vec<bool> = [&good, &faceless, &broken, &also_good]
            .iter()
            .map(|p| trainer.process(&mut pipeline, p))
            .collect();

        assert_eq!(results, vec![true, false, false, true]);
        assert_eq!(trainer.embeddings().len(), 2);
        assert_eq!(trainer.failed_photos().len(), 2);
        assert_eq!(trainer.failed_photos()[0].error, "face could not be detected");
        assert!(trainer.failed_photos()[1].error.starts_with("cannot read image"));

        let file = trainer.into_gallery_file("colour", "none").unwrap();
        assert_eq!(file.num_photos, 2);
        assert_eq!(file.embedding_size, 3);
        assert_eq!(file.valid_photos.len(), 2);
        assert!(file.statistics.unwrap().mean_similarity > 0.9);
    }

    #[test]
    fn test_zero_valid_photos_is_nothing_to_save() {
        let dir = tempdir().unwrap();
        let faceless = write_png(dir.path(), "faceless.png", [0, 0, 0]);

        let mut trainer = Trainer::new("Nobody");
        assert!(!trainer.process(&mut ColourPipeline, &faceless));

        let err = trainer.into_gallery_file("colour", "none").unwrap_err();
        assert!(matches!(err, GalleryError::NothingToSave));
    }
}
