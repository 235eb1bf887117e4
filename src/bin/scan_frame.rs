//! CLI tool to run a saved puzzle photo through the full pipeline.
//! Usage: cargo run --bin scan_frame -- <photo.png> [output_dir] [--learn]

use std::path::PathBuf;

use sudocam::FrameProcessor;
use sudocam_ocr::{confirm_channel, ConfirmReceiver};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prompt on stdin for every cell the recognizer is unsure about. Cell
/// images land in the output directory so the user can look at them.
async fn confirm_loop(mut rx: ConfirmReceiver, output_dir: PathBuf) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut index = 0u32;
    while let Some(req) = rx.recv().await {
        let cell_path = output_dir.join(format!("unsure_cell_{}.png", index));
        index += 1;
        let _ = req.cell.save(&cell_path);
        println!(
            "\nUnsure cell saved to {} (best guess '{}', {:.0}% similar)",
            cell_path.display(),
            req.guess,
            req.confidence * 100.0
        );
        println!("Enter the digit 1-9, or press Enter to leave it empty:");
        let answer = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            _ => String::new(),
        };
        let _ = req.reply.send(Some(answer));
    }
}

#[tokio::main]
async fn main() {
    sudocam::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let positional: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with("--")).collect();
    let learn = args.iter().any(|a| a == "--learn");
    if positional.is_empty() {
        eprintln!("Usage: {} <photo.png> [output_dir] [--learn]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(positional[0]);
    let output_dir = if positional.len() >= 2 {
        PathBuf::from(positional[1])
    } else {
        PathBuf::from("./scan_output")
    };
    let _ = std::fs::create_dir_all(&output_dir);

    println!("Loading image: {}", input_path.display());
    let img = image::open(&input_path)
        .expect("Failed to open image")
        .to_rgba8();
    println!("Image size: {}x{}", img.width(), img.height());

    let (confirm_tx, confirm_rx) = confirm_channel();
    tokio::spawn(confirm_loop(confirm_rx, output_dir.clone()));

    let mut processor =
        FrameProcessor::new(&output_dir.join("patterns.json")).with_confirmation(confirm_tx);
    if learn {
        processor.recognizer_mut().config_mut().enable_learning();
        println!("Learning mode on: every recognized cell refines the pattern store");
    }

    println!("\n=== Scanning ===");
    let report = match processor.process_frame(&img).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("No board found: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(quad) = report.quad {
        println!(
            "Board corners: ({:.0},{:.0}) ({:.0},{:.0}) ({:.0},{:.0}) ({:.0},{:.0})",
            quad.top_left.x,
            quad.top_left.y,
            quad.top_right.x,
            quad.top_right.y,
            quad.bottom_right.x,
            quad.bottom_right.y,
            quad.bottom_left.x,
            quad.bottom_left.y,
        );
    }

    println!("\n=== Recognized ===");
    println!("{}", report.recognized);

    match report.solution {
        Some(ref solved) => {
            println!("=== Solution ===");
            println!("{}", solved);
        }
        None => println!("Board is not solvable as recognized."),
    }

    println!("Pattern store: {}", processor.recognizer().store().summary());

    let annotated_path = output_dir.join("annotated.png");
    report
        .annotated
        .save(&annotated_path)
        .expect("Failed to save annotated frame");
    println!("Annotated frame saved to: {}", annotated_path.display());
}
