use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use image::DynamicImage;
use rand::Rng;
use region_mask::config::{self, EditorConfig, LOG_ENV};
use region_mask::data_uri;
use region_mask::script::{self, SCRIPT_HELP};
use region_mask::service::{self, GenerateRequest, GeneratedResult, DEFAULT_MODEL};
use region_mask::{ensure_parent_dir, write_json_pretty, LoadOutcome, MaskStyle, MaskedCanvasEditor};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "region-mask",
    version,
    about = "Mark edit regions on UI screenshots and export scale-independent binary masks"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print the session script schema
    #[command(name = "script-help")]
    ScriptHelp,
    /// Replay a session script against a base image and export the mask PNG
    Mask(MaskArgs),
    /// Assemble the image-editing request packet from base, mask and prompt
    Packet(PacketArgs),
    /// Write a service result (edited image, SVG, layout) out as files
    Unpack(UnpackArgs),
}

#[derive(Args, Debug)]
struct MaskArgs {
    /// Base image path
    base: PathBuf,
    /// Output mask PNG path
    #[arg(long)]
    out: Option<PathBuf>,
    /// Session script JSON path (or - for stdin)
    #[arg(long)]
    script: Option<String>,
    /// Container size used for display scaling, e.g. 1280x720
    #[arg(long)]
    viewport: Option<String>,
    /// How selected cells are encoded: alpha (transparent) or opaque (white)
    #[arg(long, default_value_t = MaskStyle::Alpha)]
    style: MaskStyle,
    /// Overlay colour for previews (#RRGGBBAA or rgba(r,g,b,a))
    #[arg(long)]
    overlay: Option<String>,
    /// Initial brush diameter (5-100)
    #[arg(long)]
    brush: Option<u32>,
    /// Fill the gaps between consecutive stroke samples
    #[arg(long, action = ArgAction::SetTrue)]
    interpolate: bool,
    /// Write a native-resolution preview (base + overlay)
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Write a preview scaled to the displayed canvas size
    #[arg(long)]
    display_preview: Option<PathBuf>,
    /// Custom metadata sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    /// Disable metadata sidecar generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
    /// Print mask metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Print the mask as a PNG data URI
    #[arg(long, action = ArgAction::SetTrue)]
    data_uri: bool,
}

#[derive(Args, Debug)]
struct PacketArgs {
    /// Base image path
    #[arg(long)]
    base: PathBuf,
    /// Mask PNG path (as written by `mask`)
    #[arg(long)]
    mask: PathBuf,
    /// Optional style reference image path
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Instruction text
    #[arg(long)]
    prompt: Option<String>,
    /// Read the instruction from a file (or - for stdin)
    #[arg(long)]
    prompt_file: Option<String>,
    /// Model name recorded in the packet
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Write the packet here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UnpackArgs {
    /// Result JSON path (or - for stdin)
    result: String,
    /// Output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Print written paths as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::ScriptHelp => {
            println!("{}", SCRIPT_HELP.trim());
            Ok(())
        }
        Commands::Mask(args) => command_mask(args).map(|_| ()),
        Commands::Packet(args) => command_packet(args),
        Commands::Unpack(args) => command_unpack(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "mask",
            "description": "Replay a session script and export the binary mask PNG.",
        }),
        json!({
            "name": "script-help",
            "description": "Print the session script schema.",
        }),
        json!({
            "name": "packet",
            "description": "Build the image-editing request packet from base, mask and prompt.",
        }),
        json!({
            "name": "unpack",
            "description": "Write a service result out as edited image, SVG and layout JSON.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_mask(args: MaskArgs) -> Result<Value> {
    if !args.base.exists() {
        bail!("base image not found: {}", args.base.display());
    }
    let bytes = fs::read(&args.base)
        .with_context(|| format!("failed to read base image: {}", args.base.display()))?;

    let session_script = args
        .script
        .as_deref()
        .map(script::load_script)
        .transpose()?;

    let viewport = match args.viewport.as_deref() {
        Some(raw) => config::parse_viewport(raw)
            .with_context(|| format!("invalid viewport: {raw} (expected WIDTHxHEIGHT)"))?,
        None => session_script
            .as_ref()
            .and_then(|s| s.viewport)
            .unwrap_or_else(config::default_viewport),
    };

    let mut editor_config = EditorConfig::default().with_interpolation(args.interpolate);
    if let Some(raw) = args.overlay.as_deref() {
        let color = config::parse_color(raw)
            .with_context(|| format!("invalid overlay colour: {raw}"))?;
        editor_config = editor_config.with_overlay(color);
    }
    if let Some(diameter) = args.brush {
        editor_config = editor_config.with_brush_diameter(diameter);
    }

    let mut editor = MaskedCanvasEditor::new(editor_config);
    editor.mount(viewport);
    match editor.load(&bytes) {
        LoadOutcome::Applied { .. } => {}
        LoadOutcome::Failed { reason } => {
            bail!("failed to decode base image {}: {reason}", args.base.display())
        }
        other => bail!("base image was not loaded: {other:?}"),
    }

    let replay = match (&session_script, args.script.as_deref()) {
        (Some(session_script), Some(path)) => {
            let base_dir = if path == "-" {
                env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else {
                Path::new(path)
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
            };
            Some(script::replay(&mut editor, session_script, &base_dir)?)
        }
        _ => None,
    };

    let export = editor.export_mask_with(args.style)?;
    let Some(mask) = export.image() else {
        bail!("mask is not ready after replay (the script cleared the editor without reloading)");
    };

    let out = args.out.clone().unwrap_or_else(|| {
        config::out_root()
            .join("mask")
            .join(format!("{}-{}.png", base_slug(&args.base), run_id()))
    });
    mask.write_to(&out)?;

    if let Some(path) = &args.preview {
        if let Some(composite) = editor.render_composite() {
            save_rgba(composite, path)?;
        }
    }
    if let Some(path) = &args.display_preview {
        if let Some(display) = editor.render_display() {
            save_rgba(display, path)?;
        }
    }

    let selection = editor.mask().map(|m| {
        let coverage = if m.pixel_count() > 0 {
            m.selected_count() as f64 / m.pixel_count() as f64 * 100.0
        } else {
            0.0
        };
        json!({
            "selected_pixels": m.selected_count(),
            "selected_percent": round_places(coverage, 3),
            "bounds": m
                .selection_bounds()
                .map(|(x, y, w, h)| json!({"x": x, "y": y, "w": w, "h": h})),
            "global": m.is_fully_covered(),
        })
    });
    let display = editor.transform().map(|t| {
        json!({
            "scale": round_places(t.scale(), 6),
            "width": round_places(t.displayed_width(), 3),
            "height": round_places(t.displayed_height(), 3),
        })
    });

    let mut payload = json!({
        "mask_meta_version": 1,
        "base_path": absolute(&args.base),
        "mask_path": absolute(&out),
        "generated_at": Utc::now().to_rfc3339(),
        "size": {"width": mask.width(), "height": mask.height(), "units": "px"},
        "style": mask.style(),
        "viewport": viewport,
        "display": display,
        "tool": editor.tool_state(),
        "selection": selection,
        "replay": replay,
        "preview_path": args.preview.as_deref().map(absolute),
        "display_preview_path": args.display_preview.as_deref().map(absolute),
    });

    if !args.no_sidecar {
        let sidecar = args
            .sidecar
            .clone()
            .unwrap_or_else(|| out.with_extension("json"));
        payload["sidecar_path"] = json!(absolute(&sidecar));
        write_json_pretty(&sidecar, &payload)?;
    }

    if args.json {
        println!("{}", serde_json::to_string(&payload)?);
    } else if args.data_uri {
        println!("{}", mask.to_data_uri());
    } else {
        println!("{}", absolute(&out));
    }

    Ok(payload)
}

fn command_packet(args: PacketArgs) -> Result<()> {
    let prompt = match (args.prompt, args.prompt_file.as_deref()) {
        (Some(prompt), _) => prompt,
        (None, Some(path)) => read_text_arg(path)?,
        (None, None) => bail!("an instruction is required: pass --prompt or --prompt-file"),
    };

    for (label, path) in [("base image", &args.base), ("mask", &args.mask)] {
        if !path.exists() {
            bail!("{label} not found: {}", path.display());
        }
    }
    let base_size = image::image_dimensions(&args.base)
        .with_context(|| format!("failed to read base image: {}", args.base.display()))?;
    let mask_size = image::image_dimensions(&args.mask)
        .with_context(|| format!("failed to read mask: {}", args.mask.display()))?;
    if base_size != mask_size {
        bail!(
            "mask is {}x{} but base image is {}x{}",
            mask_size.0,
            mask_size.1,
            base_size.0,
            base_size.1
        );
    }

    let request = GenerateRequest {
        base_image: data_uri::from_file(&args.base)?,
        mask_image: data_uri::from_file(&args.mask)?,
        reference_image: args
            .reference
            .as_deref()
            .map(data_uri::from_file)
            .transpose()?,
        prompt,
    };
    let payload = service::build_payload(&request, &args.model)?;

    match args.out {
        Some(path) => {
            write_json_pretty(&path, &payload)?;
            println!("{}", absolute(&path));
        }
        None => println!("{}", serde_json::to_string_pretty(&payload)?),
    }
    Ok(())
}

fn command_unpack(args: UnpackArgs) -> Result<()> {
    let raw = read_text_arg(&args.result)?;
    let result = GeneratedResult::from_json(&raw)?;

    let out_dir = args.out_dir.unwrap_or_else(|| {
        config::out_root().join("result").join(run_id())
    });
    let written = service::unpack_result(&result, &out_dir)?;

    if args.json {
        let payload = json!({
            "edited_image": absolute(&written.edited_image),
            "svg": absolute(&written.svg),
            "layout": absolute(&written.layout),
            "layout_items": result.layout.len(),
        });
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!("{}", absolute(&written.edited_image));
        println!("{}", absolute(&written.svg));
        println!("{}", absolute(&written.layout));
    }
    Ok(())
}

fn read_text_arg(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read file: {path}"))
}

fn save_rgba(image: image::RgbaImage, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    DynamicImage::ImageRgba8(image)
        .save(path)
        .with_context(|| format!("failed to save image: {}", path.display()))
}

fn absolute(path: &Path) -> String {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    path.display().to_string()
}

/// File-name-safe slug of the base image's stem, at most 40 chars.
fn base_slug(base: &Path) -> String {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let mut slug = String::new();
    for ch in stem.chars().map(|c| c.to_ascii_lowercase()) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "mask".to_string()
    } else {
        format!("mask-{slug}")
    }
}

fn run_id() -> String {
    format!(
        "{}-{}-{:04x}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id(),
        rand::thread_rng().gen::<u16>()
    )
}

fn round_places(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn mask_args(base: PathBuf, out: PathBuf) -> MaskArgs {
        MaskArgs {
            base,
            out: Some(out),
            script: None,
            viewport: Some("400x300".to_string()),
            style: MaskStyle::Alpha,
            overlay: None,
            brush: None,
            interpolate: false,
            preview: None,
            display_preview: None,
            sidecar: None,
            no_sidecar: false,
            json: false,
            data_uri: false,
        }
    }

    fn write_base(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("shot.png");
        RgbaImage::from_pixel(width, height, Rgba([240, 240, 240, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn base_slug_collapses_separators() {
        assert_eq!(base_slug(Path::new("shots/Home Screen@2x.png")), "mask-home-screen-2x");
        assert_eq!(base_slug(Path::new("__checkout--v2__.jpg")), "mask-checkout-v2");
        assert_eq!(base_slug(Path::new("@@.png")), "mask");
        assert!(base_slug(Path::new(&format!("{}.png", "a".repeat(90)))).len() <= 45);
    }

    #[test]
    fn mask_command_replays_script_and_writes_outputs() {
        let dir = tempdir().unwrap();
        let base = write_base(dir.path(), 800, 600);
        let script_path = dir.path().join("session.json");
        fs::write(
            &script_path,
            r#"{"events": [
                {"type": "brush", "diameter": 40},
                {"type": "stroke", "points": [[100, 100]]},
                {"type": "rect", "from": [50, 450], "to": [10, 410]}
            ]}"#,
        )
        .unwrap();

        let out = dir.path().join("out").join("mask.png");
        let mut args = mask_args(base, out.clone());
        args.script = Some(script_path.display().to_string());
        args.preview = Some(dir.path().join("preview.png"));
        args.display_preview = Some(dir.path().join("display.png"));

        let payload = command_mask(args).unwrap();
        assert_eq!(payload["size"]["width"], 800);
        assert_eq!(payload["display"]["scale"], 0.5);
        assert_eq!(payload["replay"]["applied"], 3);
        assert_eq!(payload["selection"]["global"], false);

        let mask = image::open(&out).unwrap().to_rgba8();
        assert_eq!(mask.dimensions(), (800, 600));
        assert_eq!(mask.get_pixel(100, 100)[3], 0);
        assert_eq!(mask.get_pixel(30, 430)[3], 0);
        assert_eq!(mask.get_pixel(400, 300), &Rgba([0, 0, 0, 255]));

        assert!(dir.path().join("out").join("mask.json").exists());
        assert_eq!(image::image_dimensions(dir.path().join("preview.png")).unwrap(), (800, 600));
        assert_eq!(image::image_dimensions(dir.path().join("display.png")).unwrap(), (400, 300));
    }

    #[test]
    fn mask_command_without_script_is_global() {
        let dir = tempdir().unwrap();
        let base = write_base(dir.path(), 64, 32);
        let out = dir.path().join("m.png");
        let mut args = mask_args(base, out.clone());
        args.no_sidecar = true;
        args.style = MaskStyle::Opaque;

        let payload = command_mask(args).unwrap();
        assert_eq!(payload["selection"]["global"], true);
        assert_eq!(payload["style"], "opaque");
        assert!(!dir.path().join("m.json").exists());
        assert!(image::open(&out)
            .unwrap()
            .to_rgba8()
            .pixels()
            .all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn mask_command_fails_when_script_clears() {
        let dir = tempdir().unwrap();
        let base = write_base(dir.path(), 10, 10);
        let script_path = dir.path().join("clear.json");
        fs::write(&script_path, r#"[{"type": "clear"}]"#).unwrap();
        let mut args = mask_args(base, dir.path().join("m.png"));
        args.script = Some(script_path.display().to_string());
        let err = command_mask(args).unwrap_err();
        assert!(err.to_string().contains("mask is not ready"));
    }

    #[test]
    fn mask_command_rejects_undecodable_base() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("broken.png");
        fs::write(&base, b"nope").unwrap();
        let err = command_mask(mask_args(base, dir.path().join("m.png"))).unwrap_err();
        assert!(err.to_string().contains("failed to decode base image"));
    }

    #[test]
    fn packet_rejects_mismatched_mask() {
        let dir = tempdir().unwrap();
        let base = write_base(dir.path(), 20, 20);
        let mask = dir.path().join("mask.png");
        RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]))
            .save(&mask)
            .unwrap();
        let err = command_packet(PacketArgs {
            base,
            mask,
            reference: None,
            prompt: Some("tweak".to_string()),
            prompt_file: None,
            model: DEFAULT_MODEL.to_string(),
            out: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("mask is 10x10"));
    }

    #[test]
    fn packet_writes_payload_file() {
        let dir = tempdir().unwrap();
        let base = write_base(dir.path(), 20, 20);
        let mask = dir.path().join("mask.png");
        RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]))
            .save(&mask)
            .unwrap();
        let out = dir.path().join("packet.json");
        command_packet(PacketArgs {
            base,
            mask,
            reference: None,
            prompt: Some("add a search bar".to_string()),
            prompt_file: None,
            model: DEFAULT_MODEL.to_string(),
            out: Some(out.clone()),
        })
        .unwrap();
        let payload: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        let parts = payload["contents"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[6]["text"], "add a search bar");
    }

    #[test]
    fn unpack_command_writes_files() {
        let dir = tempdir().unwrap();
        let result_path = dir.path().join("result.json");
        let result = json!({
            "editedImage": data_uri::encode("image/png", b"png"),
            "svg": "<svg/>",
            "layout": [{
                "id": "b", "type": "button", "label": "Go",
                "x": 1, "y": 2, "w": 3, "h": 4, "zone": "main"
            }]
        });
        fs::write(&result_path, result.to_string()).unwrap();
        let out_dir = dir.path().join("unpacked");
        command_unpack(UnpackArgs {
            result: result_path.display().to_string(),
            out_dir: Some(out_dir.clone()),
            json: true,
        })
        .unwrap();
        assert!(out_dir.join("edited.png").exists());
        assert!(out_dir.join("layout.svg").exists());
        assert!(out_dir.join("layout.json").exists());
    }
}
