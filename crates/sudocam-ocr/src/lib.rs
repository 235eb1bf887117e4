//! Digit recognition against a mutable learned-pattern database, with an
//! optional human-confirmation collaborator for low-confidence cells.

mod confirm;
mod recognizer;
mod store;

pub use confirm::{confirm_channel, ConfirmReceiver, ConfirmRequest, ConfirmSender};
pub use recognizer::{best_guess, DigitRecognizer, RecognizerConfig};
pub use store::{flatten, similarity_score, BestMatch, PatternStore, PatternVariant};
