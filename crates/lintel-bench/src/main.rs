//! lintel-bench: timing for the hot pixel loops.
//!
//! Runs Sobel edge detection, mask extraction, dilation, and the IoU
//! strategies over a synthetic room image of configurable size,
//! printing per-pass timings. Useful for:
//!
//! - Sizing the worker pool (one validation is roughly two mask
//!   passes plus four edge passes plus three IoU passes)
//! - Comparing threshold settings' effect on edge density and timing
//! - Catching regressions in the bit-packed counters
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lintel-bench -- --width 4000 --height 3000
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr, clippy::expect_used)]

use std::time::{Duration, Instant};

use clap::Parser;
use image::GrayImage;
use lintel_validate::engine::{DEFAULT_EDGE_THRESHOLD, DEFAULT_LINE_EDGE_THRESHOLD};
use lintel_validate::{
    MaskExtractor, MaskExtractorKind, edge, exclude_lower_iou, global_iou, structure_only_iou,
};

/// Timing for the validation engine's hot pixel loops.
#[derive(Parser)]
#[command(name = "lintel-bench", version)]
struct Cli {
    /// Synthetic image width in pixels.
    #[arg(long, default_value_t = 2000)]
    width: u32,

    /// Synthetic image height in pixels.
    #[arg(long, default_value_t = 1500)]
    height: u32,

    /// Iterations per pass (timings are averaged).
    #[arg(long, default_value_t = 5)]
    iterations: u32,

    /// Sobel threshold for the structural edge maps.
    #[arg(long, default_value_t = DEFAULT_EDGE_THRESHOLD)]
    edge_threshold: f32,
}

/// Synthetic room: wall seam, two window frames, scattered furniture
/// blobs. Dense enough to exercise realistic edge counts.
fn synthetic_room(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let seam = height / 4;
        if y.abs_diff(seam) <= 1 {
            return image::Luma([15]);
        }
        let w1 = (width / 8..width / 3).contains(&x) && (height / 3..height / 2).contains(&y);
        let w2 =
            (width / 2..(width * 3) / 4).contains(&x) && (height / 3..height / 2).contains(&y);
        if w1 || w2 {
            return image::Luma([235]);
        }
        // Furniture noise in the lower third.
        if y > (height * 2) / 3 && (x / 37 + y / 23) % 7 == 0 {
            return image::Luma([70]);
        }
        image::Luma([128])
    })
}

fn timed<T>(iterations: u32, mut f: impl FnMut() -> T) -> (T, Duration) {
    let mut result = None;
    let start = Instant::now();
    for _ in 0..iterations {
        result = Some(f());
    }
    let avg = start.elapsed() / iterations.max(1);
    (result.expect("at least one iteration"), avg)
}

fn main() {
    let cli = Cli::parse();
    let image = synthetic_room(cli.width, cli.height);
    println!(
        "image: {}x{} ({} px), {} iterations",
        cli.width,
        cli.height,
        u64::from(cli.width) * u64::from(cli.height),
        cli.iterations
    );

    let (edges, edge_time) = timed(cli.iterations, || {
        edge::sobel_binary(&image, cli.edge_threshold)
    });
    println!(
        "sobel ({:>5.1} thresh): {:>8.2?}  ({} edge px)",
        cli.edge_threshold,
        edge_time,
        edges.count_ones()
    );

    let (lines, line_time) = timed(cli.iterations, || {
        edge::sobel_binary(&image, DEFAULT_LINE_EDGE_THRESHOLD)
    });
    println!(
        "sobel ({:>5.1} thresh): {:>8.2?}  ({} edge px)",
        DEFAULT_LINE_EDGE_THRESHOLD,
        line_time,
        lines.count_ones()
    );

    let (mask, mask_time) = timed(cli.iterations, || {
        MaskExtractorKind::default()
            .extract(&image)
            .expect("heuristic extraction is infallible")
    });
    println!(
        "mask extraction:      {:>8.2?}  ({:.2}% coverage)",
        mask_time,
        mask.area_fraction() * 100.0
    );

    let (_, dilate_time) = timed(cli.iterations, || mask.bits().dilate3());
    println!("dilation (3x3):       {dilate_time:>8.2?}");

    let (global, global_time) = timed(cli.iterations, || global_iou(&edges, &lines));
    println!(
        "global IoU:           {:>8.2?}  (value {:?})",
        global_time, global.value
    );

    let (structural, struct_time) =
        timed(cli.iterations, || structure_only_iou(&edges, &lines, &mask));
    println!(
        "structure-only IoU:   {:>8.2?}  (value {:?})",
        struct_time, structural.value
    );

    let (excluded, exclude_time) = timed(cli.iterations, || {
        exclude_lower_iou(&edges, &lines, 0.30)
    });
    println!(
        "exclude-lower IoU:    {:>8.2?}  (value {:?})",
        exclude_time, excluded.value
    );
}
