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

/// Face embedding vector (512-dimensional for ArcFace, L2-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
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
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance in [0, 2]: `1 - similarity`. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Euclidean distance. For L2-normalized embeddings this lands in [0, 2].
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Distance metric used when scanning the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(DistanceMetric::Cosine),
            "euclidean" => Some(DistanceMetric::Euclidean),
            _ => None,
        }
    }

    fn distance(self, probe: &Embedding, reference: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => probe.cosine_distance(reference),
            DistanceMetric::Euclidean => probe.euclidean_distance(reference),
        }
    }
}

/// One enrolled reference face in the gallery snapshot.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub employee_code: String,
    pub embedding: Embedding,
}

/// Best candidate from a gallery scan, before any threshold is applied.
#[derive(Debug, Clone, Serialize)]
pub struct BestMatch {
    pub employee_code: String,
    /// Distance to the probe; `confidence = 1 - distance`.
    pub distance: f32,
}

impl BestMatch {
    pub fn confidence(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Face validity screening result for one submitted photo.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetectionReport {
    pub face_count: usize,
    /// Detection confidence of the best face; 0.0 when no face was found.
    pub confidence: f32,
    pub width: u32,
    pub height: u32,
}

/// Strategy for finding the closest gallery entry to a probe embedding.
pub trait GalleryMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> Option<BestMatch>;
}

/// Distance matcher that always scans the entire gallery (no early exit),
/// returning the single lowest-distance entry. Accept/reject thresholding is
/// the decision engine's job, because a rejected best distance is still
/// reported to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMatcher {
    pub metric: DistanceMetric,
}

impl GalleryMatcher for DistanceMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for entry in gallery {
            let distance = self.metric.distance(probe, &entry.embedding);
            let closer = best.as_ref().map_or(true, |b| distance < b.distance);
            if closer {
                best = Some(BestMatch {
                    employee_code: entry.employee_code.clone(),
                    distance,
                });
            }
        }

        best
    }
}
