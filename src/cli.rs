// ============================================================================
// paintcore CLI — headless composition, generation and flattening
// ============================================================================
//
// Usage examples:
//   paintcore compose base.png overlay.png --blend normal --blend multiply -o out.png
//   paintcore compose "shots/*.png" --width 1920 --height 1080
//   paintcore generate --prompt "a red fox" --endpoint http://localhost:9000/gen -o fox.png
//   paintcore flatten drawing.pcp -o drawing.png
//
// Without --output the result is written to the current directory under the
// default export name (e.g. image_800x600.png).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use image::Rgba;

use paintcore::canvas::Document;
use paintcore::error::{EditorError, Result};
use paintcore::ops::compositor::BlendMode;
use paintcore::ops::generate::{GenerationConfig, HttpGenerator};
use paintcore::session::EditorSession;
use paintcore::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// paintcore headless image compositor.
#[derive(Parser, Debug)]
#[command(name = "paintcore", version, about = "Layered raster compositing without a GUI")]
pub struct CliArgs {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Echo the session log to stderr and print per-step timing.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stack images as layers (first input at the bottom) and export the composite.
    Compose {
        /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,

        /// Output file (.png, or .pcp to keep the layers).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Blend mode per input, in order. Missing entries default to normal.
        #[arg(long, value_name = "MODE")]
        blend: Vec<BlendMode>,

        /// Opacity (0-1) per input, in order. Missing entries default to 1.
        #[arg(long, value_name = "F")]
        opacity: Vec<f32>,

        /// Canvas width; defaults to the first input's width.
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Canvas height; defaults to the first input's height.
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },

    /// Generate an image from a text prompt and save it.
    Generate {
        #[arg(short, long)]
        prompt: String,

        /// Endpoint URL; overrides `generation_endpoint` from the settings.
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Flatten a .pcp project to PNG.
    Flatten {
        project: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = match &args.config {
        Some(path) => match EditorSettings::load_from(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: could not read settings '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EditorSettings::load(),
    };

    let start = Instant::now();
    let result = match args.command {
        Command::Compose { inputs, output, blend, opacity, width, height } => {
            compose(&settings, &inputs, output, &blend, &opacity, width.zip(height))
        }
        Command::Generate { prompt, endpoint, width, height, output } => {
            generate(settings, &prompt, endpoint, width, height, output)
        }
        Command::Flatten { project, output } => flatten(settings, &project, output),
    };

    match result {
        Ok(path) => {
            if args.verbose {
                println!("→ {} ({:.0}ms)", path.display(), start.elapsed().as_secs_f64() * 1000.0);
            } else {
                println!("{}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn compose(
    settings: &EditorSettings,
    patterns: &[String],
    output: Option<PathBuf>,
    blend: &[BlendMode],
    opacity: &[f32],
    size: Option<(u32, u32)>,
) -> Result<PathBuf> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err(EditorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no input files matched the given pattern(s)",
        )));
    }

    let blobs: Vec<Vec<u8>> = inputs.iter().map(std::fs::read).collect::<std::io::Result<_>>()?;
    let (width, height) = match size {
        Some(s) => s,
        None => image::load_from_memory(&blobs[0])?.to_rgba8().dimensions(),
    };

    let doc = Document::new(width, height, Rgba([0, 0, 0, 0]))?;
    let mut session = EditorSession::with_document(doc, settings.clone());
    let placeholder = session.active_layer_id();

    for (i, (path, bytes)) in inputs.iter().zip(&blobs).enumerate() {
        let id = session.import_raster_as_layer(bytes)?;
        if let Some(stem) = path.file_stem() {
            session.rename_layer(id, &stem.to_string_lossy())?;
        }
        if let Some(&mode) = blend.get(i) {
            session.set_layer_blend_mode(id, mode)?;
        }
        if let Some(&o) = opacity.get(i) {
            session.set_layer_opacity(id, o)?;
        }
        log::info!("layer {} from {}", i + 1, path.display());
    }
    session.remove_layer(placeholder)?;

    write_output(&session, output)
}

fn generate(
    settings: EditorSettings,
    prompt: &str,
    endpoint: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let config = match endpoint {
        Some(endpoint) => GenerationConfig {
            endpoint,
            timeout: Duration::from_secs(settings.generation_timeout_secs),
            retries: settings.generation_retries,
        },
        None => settings
            .generation_config()
            .ok_or_else(|| EditorError::Generation("no endpoint given and none configured".into()))?,
    };
    let generator = HttpGenerator::new(config)?;

    let width = width.unwrap_or(settings.default_width);
    let height = height.unwrap_or(settings.default_height);
    let doc = Document::new(width, height, Rgba([0, 0, 0, 0]))?;
    let mut session = EditorSession::with_document(doc, settings);
    let placeholder = session.active_layer_id();
    session.generate_layer(&generator, prompt)?;
    session.remove_layer(placeholder)?;

    write_output(&session, output)
}

fn flatten(settings: EditorSettings, project: &Path, output: Option<PathBuf>) -> Result<PathBuf> {
    let session = EditorSession::open_project(project, settings)?;
    let output = output.unwrap_or_else(|| project.with_extension("png"));
    write_output(&session, Some(output))
}

// ============================================================================
// Helpers
// ============================================================================

fn write_output(session: &EditorSession, output: Option<PathBuf>) -> Result<PathBuf> {
    let path = output.unwrap_or_else(|| PathBuf::from(session.export_file_name()));
    let is_project = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pcp"));
    if is_project {
        session.save_project(&path)?;
    } else {
        std::fs::write(&path, session.export_to_raster_blob()?)?;
    }
    Ok(path)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log::warn!("pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => log::warn!("invalid glob '{}': {}", pattern, e),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let args = CliArgs::try_parse_from([
            "paintcore", "compose", "a.png", "b.png", "--blend", "multiply", "--opacity", "0.5", "-o", "out.png",
        ])
        .unwrap();
        match args.command {
            Command::Compose { inputs, blend, opacity, output, .. } => {
                assert_eq!(inputs, vec!["a.png", "b.png"]);
                assert_eq!(blend, vec![BlendMode::Multiply]);
                assert_eq!(opacity, vec![0.5]);
                assert_eq!(output, Some(PathBuf::from("out.png")));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(CliArgs::try_parse_from(["paintcore", "compose", "a.png", "--width", "10"]).is_err());
    }

    #[test]
    fn globs_expand_and_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        let literal = dir.path().join("a.png").to_string_lossy().into_owned();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.png"));
        assert!(found[1].ends_with("b.png"));
    }

    #[test]
    fn compose_writes_flattened_png() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.png");
        let top = dir.path().join("top.png");
        image::RgbaImage::from_pixel(6, 4, Rgba([255, 0, 0, 255])).save(&base).unwrap();
        image::RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255])).save(&top).unwrap();
        let out = dir.path().join("out.png");
        let inputs = vec![base.to_string_lossy().into_owned(), top.to_string_lossy().into_owned()];
        let written = compose(
            &EditorSettings::default(),
            &inputs,
            Some(out.clone()),
            &[],
            &[1.0, 0.5],
            None,
        )
        .unwrap();
        assert_eq!(written, out);
        let img = image::open(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (6, 4));
        let p = img.get_pixel(3, 2);
        assert!((p[0] as i32 - 128).abs() <= 1 && (p[2] as i32 - 128).abs() <= 1 && p[3] == 255);
    }
}
