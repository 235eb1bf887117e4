use image::GrayImage;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::confirm::{ConfirmRequest, ConfirmSender};
use crate::store::{flatten, PatternStore};

/// Tuning for recognition and online learning.
#[derive(Debug, Clone, Copy)]
pub struct RecognizerConfig {
    /// Minimum similarity to accept a store match as the cell's digit.
    pub recognize_threshold: f32,
    /// Minimum similarity below which a learned sample becomes a brand-new
    /// variant rather than refining an existing one.
    pub update_threshold: f32,
    /// Cells with fewer non-zero pixels than this are empty, full stop.
    pub min_ink_pixels: u32,
    /// When on, confident matches below 1.0 refine the store in place.
    pub learn: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            recognize_threshold: 0.9,
            update_threshold: 0.8,
            min_ink_pixels: 8,
            learn: false,
        }
    }
}

impl RecognizerConfig {
    /// Flip both thresholds between the relaxed (0.8) and strict (0.9)
    /// settings.
    pub fn toggle_accuracy(&mut self) {
        if self.recognize_threshold < 0.85 {
            self.recognize_threshold = 0.9;
            self.update_threshold = 0.9;
        } else {
            self.recognize_threshold = 0.8;
            self.update_threshold = 0.8;
        }
    }

    /// Turn learning mode on. Learning forces strict thresholds so the
    /// store is only ever refined by high-confidence samples.
    pub fn enable_learning(&mut self) {
        self.learn = true;
        self.recognize_threshold = 0.9;
        self.update_threshold = 0.9;
    }
}

/// Matches cleaned cell images against the pattern store, deferring to a
/// human collaborator when the best match is not confident enough.
pub struct DigitRecognizer {
    config: RecognizerConfig,
    store: PatternStore,
    confirm: Option<ConfirmSender>,
}

impl DigitRecognizer {
    pub fn new(store: PatternStore, config: RecognizerConfig) -> Self {
        Self {
            config,
            store,
            confirm: None,
        }
    }

    /// Attach the human-confirmation collaborator. Without one, ambiguous
    /// cells resolve as empty.
    pub fn with_confirmation(mut self, confirm: ConfirmSender) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RecognizerConfig {
        &mut self.config
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PatternStore {
        &mut self.store
    }

    /// Recognize one cleaned cell image. Returns the digit as a string, or
    /// "" for an empty/unreadable cell.
    ///
    /// Suspends on the confirmation collaborator when the best store match
    /// is below the recognition threshold; a non-empty, non-"0", non-"-1"
    /// answer is learned into the store before being returned.
    pub async fn recognize(&mut self, cell: &GrayImage) -> String {
        let ink = count_nonzero(cell);
        if ink < self.config.min_ink_pixels {
            return String::new();
        }

        let query = flatten(cell);
        let best = self.store.best_match(&query);

        if let Some(ref best) = best {
            if best.similarity > self.config.recognize_threshold {
                debug!(
                    "Recognized {} with similarity {:.3}",
                    best.label, best.similarity
                );
                if self.config.learn && best.similarity < 1.0 {
                    if let Err(e) =
                        self.store
                            .upsert(&query, &best.label, self.config.update_threshold)
                    {
                        warn!("Failed to persist refined pattern: {}", e);
                    }
                }
                return best.label.clone();
            }
        }

        let guess = best
            .as_ref()
            .map(|b| best_guess(&b.label))
            .unwrap_or_default();
        let confidence = best.map(|b| b.similarity).unwrap_or(0.0);
        debug!(
            "Ambiguous cell (best guess '{}', similarity {:.3}); asking for confirmation",
            guess, confidence
        );

        match self.ask_human(cell, guess, confidence).await {
            Some(answer) if !answer.is_empty() && answer != "0" && answer != "-1" => {
                if let Err(e) = self
                    .store
                    .upsert(&query, &answer, self.config.update_threshold)
                {
                    warn!("Failed to persist confirmed pattern: {}", e);
                }
                answer
            }
            _ => String::new(),
        }
    }

    async fn ask_human(
        &mut self,
        cell: &GrayImage,
        guess: String,
        confidence: f32,
    ) -> Option<String> {
        let confirm = self.confirm.as_ref()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ConfirmRequest {
            cell: cell.clone(),
            guess,
            confidence,
            reply: reply_tx,
        };
        if confirm.send(request).await.is_err() {
            debug!("Confirmation collaborator gone; treating cell as empty");
            return None;
        }
        // A dropped reply sender counts as a cancel.
        reply_rx.await.ok().flatten()
    }
}

/// Heuristic cleanup of a matcher label before it is shown as a guess.
///
/// The matcher should only ever emit single digits, but a polluted store
/// can surface multi-digit labels; historically a leading '1' in those is
/// a segmentation artifact, so it is stripped before reparsing. This is a
/// patch over bad labels, not a normalization with guaranteed semantics.
pub fn best_guess(label: &str) -> String {
    match label.parse::<i64>() {
        Ok(n) if (1..=9).contains(&n) => n.to_string(),
        Ok(n) if n > 9 => {
            let stripped: String = label.chars().filter(|&c| c != '1').collect();
            match stripped.parse::<i64>() {
                Ok(m) if (1..=9).contains(&m) => m.to_string(),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

fn count_nonzero(image: &GrayImage) -> u32 {
    image.pixels().filter(|p| p[0] != 0).count() as u32
}
