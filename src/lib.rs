pub mod pipeline;

pub use pipeline::{
    extract_board, ExtractedBoard, FrameProcessor, FrameReport, Pipeline, VisionConfig,
};

/// Install the process-wide tracing subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sudocam=debug,sudocam_vision=debug,sudocam_ocr=debug,sudocam_solver=debug".into()
            }),
        )
        .init();
}
