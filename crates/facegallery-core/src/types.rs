use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for both supported models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Build an embedding scaled to unit length. Zero vectors are kept as-is.
    pub fn normalized(values: Vec<f32>) -> Self {
        let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Self {
                values: values.into_iter().map(|x| x / norm).collect(),
            }
        } else {
            Self { values }
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Returns 0.0 when either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Cosine distance, `1 - similarity`, in [0, 2].
    pub fn distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// Aggregate similarity of one probe against every gallery embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalleryScore {
    pub max_similarity: f32,
    pub avg_similarity: f32,
    /// Index of the best-scoring gallery embedding.
    pub best_index: usize,
    pub comparisons: usize,
}

impl GalleryScore {
    /// Best similarity expressed as a percentage.
    pub fn confidence(&self) -> f32 {
        self.max_similarity * 100.0
    }
}

/// Outcome of recognizing one image against the loaded gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recognition {
    Matched(GalleryScore),
    NotMatched(GalleryScore),
    NoFaceDetected,
}

impl Recognition {
    /// Classify a score: a match requires the best similarity to strictly exceed `threshold`.
    pub fn decide(score: GalleryScore, threshold: f32) -> Self {
        if score.max_similarity > threshold {
            Recognition::Matched(score)
        } else {
            Recognition::NotMatched(score)
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Recognition::Matched(_))
    }

    pub fn score(&self) -> Option<&GalleryScore> {
        match self {
            Recognition::Matched(s) | Recognition::NotMatched(s) => Some(s),
            Recognition::NoFaceDetected => None,
        }
    }
}

/// Strategy for scoring a probe embedding against a gallery.
pub trait Matcher {
    /// Returns `None` for an empty gallery.
    fn score(&self, probe: &Embedding, gallery: &[Embedding]) -> Option<GalleryScore>;
}

/// Cosine similarity matcher.
///
/// Always visits every gallery entry; the average needs them all anyway.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn score(&self, probe: &Embedding, gallery: &[Embedding]) -> Option<GalleryScore> {
        if gallery.is_empty() {
            return None;
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_index = 0;
        let mut sum = 0.0f32;

        for (i, stored) in gallery.iter().enumerate() {
            let sim = probe.similarity(stored);
            sum += sim;
            if sim > best_sim {
                best_sim = sim;
                best_index = i;
            }
        }

        Some(GalleryScore {
            max_similarity: best_sim,
            avg_similarity: sum / gallery.len() as f32,
            best_index,
            comparisons: gallery.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn unit(dim: usize, axis: usize) -> Embedding {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        Embedding::new(v)
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[0.3, -1.2, 4.0]);
        let b = emb(&[0.3, -1.2, 4.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert_eq!(unit(512, 0).similarity(&unit(512, 0)), 1.0);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
        assert!((a.distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_normalized_has_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0]);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(Embedding::normalized(vec![0.0, 0.0]).values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_matcher_visits_whole_gallery() {
        // Best match is the last entry.
        let probe = unit(3, 0);
        let gallery = vec![unit(3, 1), unit(3, 2), unit(3, 0)];

        let score = CosineMatcher.score(&probe, &gallery).unwrap();
        assert_eq!(score.best_index, 2);
        assert_eq!(score.comparisons, 3);
        assert!((score.max_similarity - 1.0).abs() < 1e-6);
        assert!((score.avg_similarity - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        assert!(CosineMatcher.score(&unit(2, 0), &[]).is_none());
    }

    #[test]
    fn test_decision_is_strictly_greater() {
        let score = GalleryScore {
            max_similarity: 0.4,
            avg_similarity: 0.4,
            best_index: 0,
            comparisons: 1,
        };
        assert!(!Recognition::decide(score, 0.4).is_match());
    }

    #[test]
    fn test_decision_monotonic_in_similarity() {
        let threshold = 0.4;
        let gallery = vec![unit(2, 0), emb(&[-1.0, 0.0])];
        let mut previous = false;

        // Sweep the probe from orthogonal towards the first gallery vector.
        for step in 0..=20 {
            let t = step as f32 / 20.0;
            let probe = emb(&[t, 1.0 - t]);
            let score = CosineMatcher.score(&probe, &gallery).unwrap();
            let matched = Recognition::decide(score, threshold).is_match();
            assert!(!(previous && !matched), "decision flipped back at t={t}");
            previous = matched;
        }
        assert!(previous);
    }

    #[test]
    fn test_confidence_is_percent() {
        let score = GalleryScore {
            max_similarity: 0.75,
            avg_similarity: 0.5,
            best_index: 0,
            comparisons: 2,
        };
        assert!((score.confidence() - 75.0).abs() < 1e-4);
        assert_eq!(Recognition::NoFaceDetected.score(), None);
    }
}
