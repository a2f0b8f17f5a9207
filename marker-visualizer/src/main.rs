use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use image::{Rgba, RgbaImage};
use log::{info, warn, LevelFilter};
use marker_common::{AxisInfo, RunSnapshot};
use palette::{FromColor, Hsv, Srgb};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Renders a 2D projection of a histogram or BMC probability mesh as a PNG heat map
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input snapshot file path (.json or .bin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output image path (.png)
    #[arg(short, long, default_value = "projection.png")]
    output: PathBuf,

    /// Region to draw: "dist5d", "dist6d" or "probability"
    #[arg(short, long, default_value = "dist5d")]
    region: String,

    /// Axis drawn horizontally
    #[arg(long, default_value = "r")]
    x_axis: String,

    /// Axis drawn vertically
    #[arg(long, default_value = "z")]
    y_axis: String,

    /// Pixels per histogram bin
    #[arg(long, default_value_t = 8)]
    scale: u32,

    /// Colour by log10 of the value
    #[arg(long)]
    log: bool,

    /// Background color for empty bins - "black" or "white"
    #[arg(long, default_value = "white")]
    bg_color: String,
}

fn parse_color(color_name: &str) -> [u8; 4] {
    match color_name.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        _ => {
            warn!("Color '{}' not recognized, using white.", color_name);
            [255, 255, 255, 255]
        }
    }
}

fn load_snapshot(path: &Path) -> Result<RunSnapshot> {
    let file = File::open(path).with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let reader = BufReader::new(file);
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_reader(reader).context("Failed to parse JSON snapshot"),
        Some("bin") => bincode::deserialize_from(reader).context("Failed to parse bincode snapshot"),
        other => anyhow::bail!("Unsupported snapshot extension {:?}; expected .json or .bin", other),
    }
}

/// Axes and values of the requested region.
fn select_region(snapshot: &RunSnapshot, region: &str) -> Result<(Vec<AxisInfo>, Vec<f64>)> {
    if region == "probability" {
        let p = snapshot.probability.as_ref().context("Snapshot has no BMC probability mesh")?;
        return Ok((p.axes.clone(), p.values.clone()));
    }
    let (info, values) = snapshot
        .diagnostics
        .region(region)
        .with_context(|| format!("Snapshot has no region '{}'", region))?;
    if info.axes.is_empty() {
        anyhow::bail!("Region '{}' holds records, not a histogram", region);
    }
    Ok((info.axes.clone(), values.to_vec()))
}

fn axis_position(axes: &[AxisInfo], name: &str) -> Result<usize> {
    axes.iter().position(|a| a.name == name).with_context(|| {
        let names: Vec<&str> = axes.iter().map(|a| a.name.as_str()).collect();
        format!("No axis '{}'; available: {}", name, names.join(", "))
    })
}

/// Sums a row-major histogram over every axis except `ix` and `iy`.
/// The result is indexed `[x * ny + y]`.
fn project(axes: &[AxisInfo], values: &[f64], ix: usize, iy: usize) -> Vec<f64> {
    let mut strides = vec![1usize; axes.len()];
    for d in (0..axes.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * axes[d + 1].n;
    }
    let (nx, ny) = (axes[ix].n, axes[iy].n);
    values
        .par_iter()
        .enumerate()
        .fold(
            || vec![0.0; nx * ny],
            |mut acc, (flat, &v)| {
                let x = (flat / strides[ix]) % nx;
                let y = (flat / strides[iy]) % ny;
                acc[x * ny + y] += v;
                acc
            },
        )
        .reduce(
            || vec![0.0; nx * ny],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        )
}

/// Blue for the smallest value through red for the largest.
fn colormap(t: f64) -> [u8; 4] {
    let t = t.clamp(0.0, 1.0) as f32;
    let hsv = Hsv::new(240.0 * (1.0 - t), 0.85, 0.95);
    let rgb = Srgb::from_color(hsv);
    [(rgb.red * 255.0) as u8, (rgb.green * 255.0) as u8, (rgb.blue * 255.0) as u8, 255]
}

fn render(projection: &[f64], nx: usize, ny: usize, scale: u32, log_scale: bool, bg: [u8; 4]) -> RgbaImage {
    let shade = |v: f64| if log_scale { v.log10() } else { v };
    let (lo, hi) = projection
        .iter()
        .filter(|v| **v > 0.0)
        .map(|&v| shade(v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = if hi > lo { hi - lo } else { 1.0 };

    let scale = scale.max(1);
    let mut img = RgbaImage::from_pixel(nx as u32 * scale, ny as u32 * scale, Rgba(bg));
    for x in 0..nx {
        for y in 0..ny {
            let v = projection[x * ny + y];
            if !(v > 0.0) {
                continue;
            }
            let color = Rgba(colormap((shade(v) - lo) / span));
            // Larger y at the top of the image
            let top = (ny - 1 - y) as u32 * scale;
            for px in 0..scale {
                for py in 0..scale {
                    img.put_pixel(x as u32 * scale + px, top + py, color);
                }
            }
        }
    }
    img
}

fn main() -> Result<()> {
    let args = Args::parse();
    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("Starting marker visualizer...");
    info!("Input file: {}", args.input.display());
    let snapshot = load_snapshot(&args.input)?;
    let (axes, values) = select_region(&snapshot, &args.region)?;
    let ix = axis_position(&axes, &args.x_axis)?;
    let iy = axis_position(&axes, &args.y_axis)?;
    if ix == iy {
        anyhow::bail!("x and y axes must differ");
    }

    let projection = project(&axes, &values, ix, iy);
    info!(
        "Projected '{}' onto {} x {} ({} x {} bins), total {:.4e}",
        args.region,
        args.x_axis,
        args.y_axis,
        axes[ix].n,
        axes[iy].n,
        projection.iter().sum::<f64>()
    );

    let img = render(&projection, axes[ix].n, axes[iy].n, args.scale, args.log, parse_color(&args.bg_color));
    img.save(&args.output)
        .with_context(|| format!("Failed to write image {}", args.output.display()))?;
    info!("Output saved to: {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(name: &str, n: usize) -> AxisInfo {
        AxisInfo { name: name.to_string(), min: 0.0, max: 1.0, n }
    }

    #[test]
    fn test_projection_sums_other_axes() {
        let axes = vec![axis("r", 2), axis("z", 3), axis("vpar", 4)];
        let values: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let p = project(&axes, &values, 0, 1);
        assert_eq!(p.len(), 6);
        // (r=1, z=2) covers flat indices 20..24
        assert_eq!(p[5], 20.0 + 21.0 + 22.0 + 23.0);
        assert_eq!(p.iter().sum::<f64>(), values.iter().sum::<f64>());

        let swapped = project(&axes, &values, 2, 0);
        assert_eq!(swapped.len(), 8);
        // (vpar=0, r=0) covers flat indices 0, 4, 8
        assert_eq!(swapped[0], 0.0 + 4.0 + 8.0);
    }

    #[test]
    fn test_colormap_runs_blue_to_red() {
        let [r, _, b, _] = colormap(0.0);
        assert!(b > 200 && r < 60);
        let [r, _, b, _] = colormap(1.0);
        assert!(r > 200 && b < 60);
    }

    #[test]
    fn test_render_leaves_empty_bins_as_background() {
        let projection = vec![0.0, 1.0, 0.0, 4.0];
        let img = render(&projection, 2, 2, 3, false, [255, 255, 255, 255]);
        assert_eq!(img.dimensions(), (6, 6));
        // (x=0, y=0) is empty and sits bottom-left
        assert_eq!(img.get_pixel(0, 5).0, [255, 255, 255, 255]);
        // (x=1, y=1) holds the maximum and sits top-right
        assert_eq!(img.get_pixel(5, 0).0, colormap(1.0));
    }
}
