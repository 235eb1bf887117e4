use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sudocam_ocr::{best_guess, ConfirmSender, DigitRecognizer, PatternStore, RecognizerConfig};
use sudocam_solver::{diff_new_digits, solve, Board};
use sudocam_vision::{
    annotate_digits, cell_regions, clean_cell, draw_quad_outline, locate_grid, preprocess,
    preprocess_gray, warp_gray, CellConfig, PreprocessConfig, Quad, RectifyMap, VisionError,
};

const OUTLINE_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);
const RECOGNIZED_COLOR: Rgba<u8> = Rgba([220, 60, 40, 255]);
const SOLVED_COLOR: Rgba<u8> = Rgba([0, 160, 255, 255]);

/// All tunables for the per-frame vision stages.
#[derive(Debug, Clone, Copy)]
pub struct VisionConfig {
    pub board: PreprocessConfig,
    pub glyph: PreprocessConfig,
    pub cell: CellConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            board: PreprocessConfig::board(),
            glyph: PreprocessConfig::glyph(),
            cell: CellConfig::default(),
        }
    }
}

/// Output of the CPU-bound vision stages, before any recognition.
pub struct ExtractedBoard {
    pub quad: Quad,
    pub map: RectifyMap,
    /// 81 normalized cell patterns, row major.
    pub patterns: Vec<image::GrayImage>,
}

/// Everything known about one processed frame.
#[derive(Clone)]
pub struct FrameReport {
    /// `None` when no board was located in the frame.
    pub quad: Option<Quad>,
    pub recognized: Board,
    pub solution: Option<Board>,
    /// Original frame with the board outline, recognized digits and
    /// solved-in digits drawn in. Untouched when no board was found.
    pub annotated: RgbaImage,
}

impl FrameReport {
    /// Report for a frame the vision stages could not use.
    pub fn skipped(frame: &RgbaImage) -> Self {
        Self {
            quad: None,
            recognized: Board::new(),
            solution: None,
            annotated: frame.clone(),
        }
    }
}

/// Run the vision stages on one frame: mask, locate, rectify, split into
/// cells and normalize each one. Pure CPU work, safe for spawn_blocking.
pub fn extract_board(frame: &RgbaImage, config: &VisionConfig) -> Result<ExtractedBoard, VisionError> {
    let mask = preprocess(frame, &config.board);
    let quad = locate_grid(&mask)?;
    let map = RectifyMap::for_quad(&quad)?;

    let mut rect = warp_gray(&image::imageops::grayscale(frame), &map);
    preprocess_gray(&mut rect, &config.glyph);

    let patterns = cell_regions(map.width, map.height)
        .iter()
        .map(|r| {
            let cell = image::imageops::crop_imm(&rect, r.x, r.y, r.width, r.height).to_image();
            clean_cell(&cell, &config.cell)
        })
        .collect();
    debug!("Extracted board at {:?}, rectified {}x{}", quad, map.width, map.height);
    Ok(ExtractedBoard { quad, map, patterns })
}

/// Collapse a recognized label to a single board digit. Labels that the
/// grid-line heuristic cannot repair count as empty.
fn digit_from_label(label: &str) -> u8 {
    best_guess(label).parse().unwrap_or(0)
}

/// Owns the recognizer state and turns frames into reports.
pub struct FrameProcessor {
    vision: VisionConfig,
    recognizer: DigitRecognizer,
}

impl FrameProcessor {
    pub fn new(store_path: &Path) -> Self {
        let store = PatternStore::load(store_path);
        info!("Pattern store: {}", store.summary());
        Self {
            vision: VisionConfig::default(),
            recognizer: DigitRecognizer::new(store, RecognizerConfig::default()),
        }
    }

    /// Route unsure cells to a human confirmer instead of dropping them.
    pub fn with_confirmation(mut self, confirm: ConfirmSender) -> Self {
        self.recognizer = self.recognizer.with_confirmation(confirm);
        self
    }

    pub fn recognizer(&self) -> &DigitRecognizer {
        &self.recognizer
    }

    pub fn recognizer_mut(&mut self) -> &mut DigitRecognizer {
        &mut self.recognizer
    }

    pub fn vision_config_mut(&mut self) -> &mut VisionConfig {
        &mut self.vision
    }

    /// Full per-frame pass: extraction, recognition, solving, overlay.
    pub async fn process_frame(&mut self, frame: &RgbaImage) -> Result<FrameReport, VisionError> {
        let extracted = extract_board(frame, &self.vision)?;
        let recognized = self.recognize_board(&extracted).await;
        Ok(self.render_report(frame, &extracted, recognized))
    }

    /// Recognize all 81 cell patterns. Cells the recognizer leaves blank
    /// stay empty on the board.
    pub async fn recognize_board(&mut self, extracted: &ExtractedBoard) -> Board {
        let mut board = Board::new();
        for (i, pattern) in extracted.patterns.iter().enumerate() {
            let label = self.recognizer.recognize(pattern).await;
            board.set(i / 9, i % 9, digit_from_label(&label));
        }
        debug!("Recognized {} givens", 81 - board.empty_count());
        board
    }

    /// Solve the recognized board and draw the result back onto the
    /// original frame. Unsolvable boards still get the outline.
    pub fn render_report(
        &self,
        frame: &RgbaImage,
        extracted: &ExtractedBoard,
        recognized: Board,
    ) -> FrameReport {
        let solution = match solve(&recognized) {
            Ok(solved) => Some(solved),
            Err(e) => {
                warn!("Board not solvable as recognized: {}", e);
                None
            }
        };

        let mut annotated = frame.clone();
        draw_quad_outline(&mut annotated, &extracted.quad, OUTLINE_COLOR);
        annotate_digits(&mut annotated, &extracted.map, recognized.rows(), RECOGNIZED_COLOR);
        if let Some(ref solved) = solution {
            let missing = diff_new_digits(&recognized, solved);
            annotate_digits(&mut annotated, &extracted.map, missing.rows(), SOLVED_COLOR);
        }

        FrameReport {
            quad: Some(extracted.quad),
            recognized,
            solution,
            annotated,
        }
    }
}

/// Manages the frame → vision → recognition → solve pipeline.
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    frame_tx: watch::Sender<Option<Arc<RgbaImage>>>,
    report_rx: watch::Receiver<Option<Arc<FrameReport>>>,
}

impl Pipeline {
    /// Spawn the processing loop. Frames pushed through [`Pipeline::submit_frame`]
    /// are processed one at a time; intermediate frames are coalesced by the
    /// watch channel, so a slow confirmation never builds a backlog.
    pub fn start(store_path: &Path, confirm: Option<ConfirmSender>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = watch::channel::<Option<Arc<RgbaImage>>>(None);
        let (report_tx, report_rx) = watch::channel::<Option<Arc<FrameReport>>>(None);

        let mut processor = FrameProcessor::new(store_path);
        if let Some(confirm) = confirm {
            processor = processor.with_confirmation(confirm);
        }

        let stop_clone = stop.clone();
        let mut frame_rx_clone = frame_rx;
        tokio::spawn(async move {
            loop {
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }

                if frame_rx_clone.changed().await.is_err() {
                    break;
                }

                let frame = frame_rx_clone.borrow_and_update().clone();
                let Some(frame) = frame else { continue };

                let vision = processor.vision;
                let frame_for_extract = frame.clone();
                let extracted = tokio::task::spawn_blocking(move || {
                    extract_board(&frame_for_extract, &vision)
                })
                .await;

                let extracted = match extracted {
                    Ok(Ok(e)) => e,
                    Ok(Err(e)) => {
                        debug!("Frame skipped: {}", e);
                        let _ = report_tx.send(Some(Arc::new(FrameReport::skipped(&frame))));
                        continue;
                    }
                    Err(e) => {
                        warn!("Vision task failed: {}", e);
                        continue;
                    }
                };

                let recognized = processor.recognize_board(&extracted).await;
                let report = processor.render_report(&frame, &extracted, recognized);
                let _ = report_tx.send(Some(Arc::new(report)));
            }
            info!("Pipeline loop exited");
        });

        info!("Pipeline started");
        Self {
            stop,
            frame_tx,
            report_rx,
        }
    }

    /// Hand the pipeline a new frame. Returns false once the loop is gone.
    pub fn submit_frame(&self, frame: Arc<RgbaImage>) -> bool {
        self.frame_tx.send(Some(frame)).is_ok()
    }

    pub fn latest_report(&self) -> Option<Arc<FrameReport>> {
        self.report_rx.borrow().clone()
    }

    /// Resolves as soon as a report newer than the current one lands.
    pub async fn next_report(&mut self) -> Option<Arc<FrameReport>> {
        if self.report_rx.changed().await.is_err() {
            return None;
        }
        self.report_rx.borrow_and_update().clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wake the loop so the stop flag is observed.
        let _ = self.frame_tx.send_modify(|_| {});
        info!("Pipeline stop requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_from_label() {
        assert_eq!(digit_from_label("7"), 7);
        assert_eq!(digit_from_label("12"), 2);
        assert_eq!(digit_from_label(""), 0);
        assert_eq!(digit_from_label("x"), 0);
        assert_eq!(digit_from_label("11"), 0);
    }

    fn frame_with_grid(size: u32) -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(size, size, Rgba([235, 235, 235, 255]));
        let margin = size / 8;
        let board = size - 2 * margin;
        let dark = Rgba([25, 25, 25, 255]);
        // Board outline plus internal grid lines.
        for i in 0..=9u32 {
            let offset = margin + board * i / 9;
            for t in 0..3u32 {
                for p in margin..=(size - margin) {
                    frame.put_pixel((offset + t).min(size - 1), p, dark);
                    frame.put_pixel(p, (offset + t).min(size - 1), dark);
                }
            }
        }
        frame
    }

    #[test]
    fn test_extract_board_finds_synthetic_grid() {
        let frame = frame_with_grid(360);
        let extracted = extract_board(&frame, &VisionConfig::default()).unwrap();
        assert_eq!(extracted.patterns.len(), 81);
        let margin = 360.0 / 8.0;
        assert!((extracted.quad.top_left.x - margin).abs() < 8.0);
        assert!((extracted.quad.bottom_right.y - (360.0 - margin)).abs() < 8.0);
        // Empty cells must normalize to blank patterns.
        assert!(extracted.patterns[40].pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_extract_board_rejects_blank_frame() {
        let frame = RgbaImage::from_pixel(200, 200, Rgba([235, 235, 235, 255]));
        assert!(extract_board(&frame, &VisionConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_process_frame_on_empty_grid_solves() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = FrameProcessor::new(&dir.path().join("patterns.json"));
        let frame = frame_with_grid(360);
        let report = processor.process_frame(&frame).await.unwrap();
        // Nothing recognized on an empty grid, and an empty grid solves.
        assert_eq!(report.recognized.empty_count(), 81);
        let solved = report.solution.expect("empty board should solve");
        assert!(solved.is_full());
        assert_eq!(report.annotated.dimensions(), frame.dimensions());
    }

    #[tokio::test]
    async fn test_pipeline_reports_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::start(&dir.path().join("patterns.json"), None);
        assert!(pipeline.latest_report().is_none());
        assert!(pipeline.submit_frame(Arc::new(frame_with_grid(360))));
        let report = pipeline.next_report().await.expect("report");
        assert!(report.quad.is_some());
        assert_eq!(report.recognized.empty_count(), 81);

        // A frame with no board still produces a (skipped) report.
        let blank = RgbaImage::from_pixel(120, 120, Rgba([240, 240, 240, 255]));
        assert!(pipeline.submit_frame(Arc::new(blank)));
        let report = pipeline.next_report().await.expect("skipped report");
        assert!(report.quad.is_none());
        pipeline.stop();
    }
}
