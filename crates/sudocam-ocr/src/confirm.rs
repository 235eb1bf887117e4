use image::GrayImage;
use tokio::sync::{mpsc, oneshot};

/// A request for a human to read one ambiguous cell.
///
/// The recognizer sends exactly one of these at a time and waits for the
/// reply before moving to the next cell, so a host never sees concurrent
/// outstanding requests. Replying `None` (or dropping the sender) cancels:
/// the cell resolves as empty and the pattern store is left untouched.
#[derive(Debug)]
pub struct ConfirmRequest {
    /// The cleaned cell image the human should read.
    pub cell: GrayImage,
    /// Best guess derived from the top store match, possibly "".
    pub guess: String,
    /// Similarity of the top store match, for display.
    pub confidence: f32,
    pub reply: oneshot::Sender<Option<String>>,
}

pub type ConfirmSender = mpsc::Sender<ConfirmRequest>;
pub type ConfirmReceiver = mpsc::Receiver<ConfirmRequest>;

/// Channel pair for the human-confirmation collaborator. Capacity 1:
/// confirmation is a strictly serial protocol.
pub fn confirm_channel() -> (ConfirmSender, ConfirmReceiver) {
    mpsc::channel(1)
}
