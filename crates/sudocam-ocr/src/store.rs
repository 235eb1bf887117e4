use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One stored reference image for a digit label: a flattened row-major
/// vector of grayscale intensities in 0.0..=255.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternVariant {
    pub pixels: Vec<f32>,
}

/// The best variant found by a full store scan.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub label: String,
    pub similarity: f32,
    pub variant_index: usize,
}

/// Persistent mapping from digit label ("1".."9") to its learned pattern
/// variants. The JSON file on disk is the sole durable state; every
/// mutation flushes the whole store.
///
/// Labels are kept in a sorted map so scans visit variants in a stable
/// order and first-encountered tie-breaks are deterministic.
pub struct PatternStore {
    path: PathBuf,
    patterns: BTreeMap<String, Vec<PatternVariant>>,
}

impl PatternStore {
    /// Load the store from `path`. A missing file yields an empty store;
    /// so does a malformed one (the corrupt content is discarded with a
    /// warning rather than failing the process).
    pub fn load(path: &Path) -> Self {
        let patterns = match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(patterns) => patterns,
                Err(e) => {
                    warn!("Pattern store {} is malformed ({}); starting empty", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => {
                info!("No pattern store at {}; starting empty", path.display());
                BTreeMap::new()
            }
        };

        let store = Self {
            path: path.to_path_buf(),
            patterns,
        };
        info!("Pattern store ready: {}", store.summary());
        store
    }

    /// Flush the full store to disk.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.patterns).context("Failed to serialize pattern store")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write pattern store to {}", self.path.display()))?;
        Ok(())
    }

    /// Drop all learned patterns and persist the empty store.
    pub fn reset(&mut self) -> Result<()> {
        self.patterns.clear();
        self.save()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn variant_count(&self) -> usize {
        self.patterns.values().map(Vec::len).sum()
    }

    /// One-line label→variant-count summary for status logging.
    pub fn summary(&self) -> String {
        if self.patterns.is_empty() {
            return "empty".to_string();
        }
        self.patterns
            .iter()
            .map(|(label, variants)| format!("{}={}", label, variants.len()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Scan every variant of every label and return the single best
    /// similarity. Variants whose length differs from the query are
    /// skipped. Returns `None` when nothing was comparable.
    pub fn best_match(&self, query: &[f32]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for (label, variants) in &self.patterns {
            for (index, variant) in variants.iter().enumerate() {
                if variant.pixels.len() != query.len() {
                    debug!(
                        "Skipping {}[{}]: length {} != query {}",
                        label,
                        index,
                        variant.pixels.len(),
                        query.len()
                    );
                    continue;
                }
                let similarity = similarity_score(query, &variant.pixels);
                if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                    best = Some(BestMatch {
                        label: label.clone(),
                        similarity,
                        variant_index: index,
                    });
                }
            }
        }

        best
    }

    /// Learn from a new sample under `label`.
    ///
    /// If the best store-wide similarity is below `update_threshold` (or
    /// nothing matched), the sample is appended as a brand-new variant of
    /// `label`. If it matched below 1.0, the matched variant is refined by
    /// pixel-wise 0.5/0.5 averaging in place. An exact match changes
    /// nothing. Every call flushes the store.
    pub fn upsert(&mut self, sample: &[f32], label: &str, update_threshold: f32) -> Result<()> {
        match self.best_match(sample) {
            Some(best) if best.similarity >= update_threshold => {
                if best.similarity < 1.0 {
                    if let Some(variant) = self
                        .patterns
                        .get_mut(&best.label)
                        .and_then(|v| v.get_mut(best.variant_index))
                    {
                        for (stored, new) in variant.pixels.iter_mut().zip(sample) {
                            *stored = (*stored + *new) / 2.0;
                        }
                    }
                    debug!(
                        "Refined {}[{}] toward new sample (similarity {:.3})",
                        best.label, best.variant_index, best.similarity
                    );
                } else {
                    debug!("Exact variant of {} already stored; no change", label);
                }
            }
            _ => {
                self.patterns
                    .entry(label.to_string())
                    .or_default()
                    .push(PatternVariant {
                        pixels: sample.to_vec(),
                    });
                debug!("Added new variant for {}", label);
            }
        }
        self.save()
    }
}

/// Normalized inverse mean absolute pixel difference between two
/// equal-length vectors: 1.0 = identical, 0.0 = maximally different.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        warn!("Cannot compare pattern vectors of lengths {} and {}", a.len(), b.len());
        return 0.0;
    }
    if a.is_empty() {
        return 0.0;
    }
    let diff_sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    1.0 - diff_sum / a.len() as f32 / 255.0
}

/// Flatten a grayscale cell image into the store's vector representation.
pub fn flatten(image: &image::GrayImage) -> Vec<f32> {
    image.pixels().map(|p| p[0] as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PatternStore {
        PatternStore::load(&dir.path().join("patterns.json"))
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PatternStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");

        let mut store = PatternStore::load(&path);
        store.upsert(&[0.0, 255.0, 128.0], "3", 0.8).unwrap();
        store.upsert(&[255.0, 0.0, 0.0], "7", 0.8).unwrap();

        let reloaded = PatternStore::load(&path);
        assert_eq!(reloaded.variant_count(), 2);
        assert_eq!(reloaded.summary(), store.summary());
        let best = reloaded.best_match(&[0.0, 255.0, 128.0]).unwrap();
        assert_eq!(best.label, "3");
        assert_eq!(best.similarity, 1.0);
    }

    #[test]
    fn test_similarity_range_and_monotonicity() {
        let base = vec![100.0; 64];
        let mut last = 1.0;
        for offset in [0.0f32, 1.0, 2.0, 5.0, 10.0] {
            let shifted: Vec<f32> = base.iter().map(|p| p + offset).collect();
            let s = similarity_score(&base, &shifted);
            assert!((0.0..=1.0).contains(&s));
            if offset > 0.0 {
                assert!(s < last, "similarity must strictly decrease with offset");
            }
            last = s;
        }
    }

    #[test]
    fn test_similarity_length_mismatch_is_zero() {
        assert_eq!(similarity_score(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_best_match_skips_mismatched_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.upsert(&[10.0, 20.0], "1", 0.8).unwrap();
        store.upsert(&[10.0, 20.0, 30.0], "2", 0.8).unwrap();

        let best = store.best_match(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(best.label, "2");
        assert!(store.best_match(&[1.0]).is_none());
    }

    #[test]
    fn test_upsert_below_threshold_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.upsert(&[0.0; 16], "1", 0.8).unwrap();
        // Far from the stored variant: appended, not merged.
        store.upsert(&[255.0; 16], "2", 0.8).unwrap();
        assert_eq!(store.variant_count(), 2);
    }

    #[test]
    fn test_upsert_near_match_merges_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.upsert(&[100.0; 16], "5", 0.8).unwrap();
        // Close to the stored variant: averaged into it instead of appended.
        store.upsert(&[110.0; 16], "5", 0.8).unwrap();
        assert_eq!(store.variant_count(), 1);

        let best = store.best_match(&[105.0; 16]).unwrap();
        assert_eq!(best.label, "5");
        assert_eq!(best.similarity, 1.0);
    }

    #[test]
    fn test_upsert_exact_match_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.upsert(&[42.0; 16], "9", 0.8).unwrap();
        store.upsert(&[42.0; 16], "9", 0.8).unwrap();
        assert_eq!(store.variant_count(), 1);
        assert_eq!(store.best_match(&[42.0; 16]).unwrap().similarity, 1.0);
    }

    #[test]
    fn test_reset_persists_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        let mut store = PatternStore::load(&path);
        store.upsert(&[1.0; 4], "4", 0.8).unwrap();
        store.reset().unwrap();
        assert!(PatternStore::load(&path).is_empty());
    }
}
