use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn, LevelFilter};
use pagemark_config::{Settings, SettingsStore};
use pagemark_core::export::{
    cropped_file_name, export_cropped, export_highlighted, highlighted_file_name, CROP_RENDER_SCALE,
};
use pagemark_core::{
    validate_upload, AnnotationStore, ArtifactSink, BitmapSize, Color, DirectorySink, EditorMode,
    EditorSession, ElementRect, Highlight, Notice, Overlay, PageRenderer, PointerEvent, Rect,
    SavedArtifact, SessionOptions, UploadCandidate, ViewState, ViewerState,
};
use pagemark_engine::{default_engine, LopdfEngine, OpenSource, PdfEngine};
use serde::{Deserialize, Serialize};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(name = "pagemark-cli")]
#[command(about = "Highlight and crop PDF pages")]
pub struct Cli {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Page renderer for render, crop and replay.
    #[arg(long, global = true, value_enum, default_value_t = EngineChoice::Auto)]
    engine: EngineChoice,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render a page to PNG at the on-screen scale.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        zoom: Option<f32>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Export a copy of the PDF with highlights stamped in.
    Highlight {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// PAGE:X,Y,W,H[@COLOR] in surface pixels.
        #[arg(long = "rect", value_name = "RECT", required = true)]
        rects: Vec<PageRectArg>,
        /// Surface size the rectangles were drawn on, as WxH.
        #[arg(long)]
        canvas: CanvasArg,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Export a region of one page as a new single-page PDF.
    Crop {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// X,Y,W,H in surface pixels.
        #[arg(long)]
        rect: RectArg,
        #[arg(long)]
        canvas: CanvasArg,
        /// Highlights on the same page, X,Y,W,H[@COLOR].
        #[arg(long = "highlight", value_name = "RECT")]
        highlights: Vec<RectArg>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Replay a gesture script against an editor session.
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        script: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Manage the settings file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineChoice {
    /// PDFium when this build and the system provide it, otherwise lopdf.
    Auto,
    /// Built-in renderer: vector content only.
    Lopdf,
    /// System PDFium library; needs the `pdfium` feature.
    Pdfium,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Write default settings.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the settings in effect.
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CanvasArg(BitmapSize);

impl FromStr for CanvasArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (width, height) =
            value.split_once(['x', 'X']).ok_or_else(|| format!("expected WxH, got {value:?}"))?;
        let parse = |part: &str| {
            part.trim().parse::<u32>().map_err(|err| format!("invalid canvas size {value:?}: {err}"))
        };
        Ok(Self(BitmapSize::new(parse(width)?, parse(height)?)))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RectArg {
    rect: Rect,
    color: Option<String>,
}

impl FromStr for RectArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (coords, color) = match value.split_once('@') {
            Some((coords, color)) => (coords, Some(color.trim().to_owned())),
            None => (value, None),
        };

        let numbers = coords
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("invalid rectangle {value:?}: {err}"))?;
        let [x, y, width, height] = numbers[..] else {
            return Err(format!("expected X,Y,W,H, got {value:?}"));
        };

        Ok(Self { rect: Rect::new(x, y, width, height), color })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PageRectArg {
    page: u32,
    rect: RectArg,
}

impl FromStr for PageRectArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (page, rest) =
            value.split_once(':').ok_or_else(|| format!("expected PAGE:X,Y,W,H, got {value:?}"))?;
        let page = page.trim().parse::<u32>().map_err(|err| format!("invalid page {page:?}: {err}"))?;
        Ok(Self { page, rect: rest.parse()? })
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

/// A recorded editing session.
#[derive(Debug, Deserialize)]
struct ReplayScript {
    /// Where the surface is displayed; pointer steps are in bitmap pixels
    /// when absent.
    #[serde(default)]
    element: Option<ElementRect>,
    steps: Vec<ReplayStep>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayStep {
    Mode { mode: EditorMode },
    Color { color: String },
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up { x: f32, y: f32 },
    NextPage,
    PrevPage,
    ZoomIn,
    ZoomOut,
    Undo,
    Remove { id: String },
    ExportHighlighted,
    ExportCropped,
}

#[derive(Debug, Serialize)]
struct ReplaySummary<'a> {
    file: Option<&'a str>,
    mode: EditorMode,
    view: ViewState,
    zoom_label: String,
    viewer: &'a ViewerState,
    highlights: &'a [Highlight],
    crop_area: Option<Rect>,
    notice: Option<&'a Notice>,
    /// Present when the script positions the surface.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    overlays: Vec<Overlay>,
    exports: Vec<PathBuf>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);
    let engine = || select_engine(cli.engine);

    let store = settings_store(cli.config.as_deref())?;
    let settings = || {
        store
            .load()
            .with_context(|| format!("failed to load settings from {}", store.path().display()))
    };

    match cli.command {
        Commands::Info { file } => run_info(&file, &settings()?),
        Commands::Render { file, page, zoom, output } => {
            let settings = settings()?;
            let zoom = zoom.unwrap_or(settings.initial_zoom);
            run_render(engine()?, &file, page, zoom, &output, &settings)
        }
        Commands::Highlight { file, rects, canvas, out_dir } => {
            let settings = settings()?;
            let out_dir = output_dir(out_dir, &settings);
            run_highlight(&file, &rects, canvas.0, &out_dir, &settings)
        }
        Commands::Crop { file, page, rect, canvas, highlights, out_dir } => {
            let settings = settings()?;
            let out_dir = output_dir(out_dir, &settings);
            run_crop(engine()?, &file, page, &rect, canvas.0, &highlights, &out_dir, &settings)
        }
        Commands::Replay { file, script, out_dir } => {
            let settings = settings()?;
            let out_dir = output_dir(out_dir, &settings);
            run_replay(engine()?, &file, &script, &out_dir, &settings)
        }
        Commands::Config { action } => run_config(&store, action),
    }
}

fn init_logging(verbose: u8) {
    let level = std::env::var("PAGEMARK_LOG")
        .ok()
        .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        .unwrap_or(match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        });

    let config = ConfigBuilder::new().set_time_level(LevelFilter::Off).build();
    // Only fails when a logger is already installed.
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Never);
}

fn builtin_engine() -> Box<dyn PdfEngine> {
    Box::new(LopdfEngine::new())
}

#[cfg(feature = "pdfium")]
fn pdfium_engine() -> Result<Box<dyn PdfEngine>> {
    let engine = pagemark_engine::pdfium_backend::PdfiumEngine::from_system_library()
        .context("failed to load the PDFium library")?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "pdfium"))]
fn pdfium_engine() -> Result<Box<dyn PdfEngine>> {
    bail!("PDFium rendering is not available in this build (enable the `pdfium` feature)")
}

fn select_engine(choice: EngineChoice) -> Result<Box<dyn PdfEngine>> {
    match choice {
        EngineChoice::Lopdf => Ok(builtin_engine()),
        EngineChoice::Pdfium => pdfium_engine(),
        EngineChoice::Auto if cfg!(feature = "pdfium") => pdfium_engine().or_else(|err| {
            warn!("{err:#}; falling back to the built-in renderer");
            Ok(builtin_engine())
        }),
        EngineChoice::Auto => {
            debug!("using the built-in renderer");
            Ok(builtin_engine())
        }
    }
}

fn settings_store(path: Option<&Path>) -> Result<SettingsStore> {
    match path {
        Some(path) => Ok(SettingsStore::with_path(path)),
        None => SettingsStore::from_default_project().context("failed to locate settings"),
    }
}

fn run_config(store: &SettingsStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if store.exists() && !force {
                bail!("settings already exist at {} (use --force to overwrite)", store.path().display());
            }
            store.save(&Settings::default()).context("failed to write settings")?;
            println!("{}", store.path().display());
        }
        ConfigAction::Show => {
            let settings = store.load().context("failed to load settings")?;
            let payload = serde_json::json!({
                "path": store.path().display().to_string(),
                "settings": settings,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }
    Ok(())
}

fn output_dir(flag: Option<PathBuf>, settings: &Settings) -> PathBuf {
    flag.or_else(|| settings.output_dir.clone()).unwrap_or_else(|| PathBuf::from("."))
}

fn session_options(settings: &Settings) -> Result<SessionOptions> {
    let highlight_color = settings
        .default_highlight_color
        .parse::<Color>()
        .context("invalid default_highlight_color in settings")?;

    Ok(SessionOptions {
        initial_zoom: settings.initial_zoom,
        highlight_color,
        max_upload_bytes: settings.max_upload_bytes,
    })
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

/// Media type as a browser would declare it, from the file extension.
fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn upload_candidate(path: &Path) -> Result<UploadCandidate> {
    ensure_pdf_exists(path)?;
    let size = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.pdf")
        .to_owned();

    Ok(UploadCandidate { name, media_type: media_type_for(path).to_owned(), size })
}

/// Validates and reads an input document.
fn read_upload(path: &Path, settings: &Settings) -> Result<(UploadCandidate, Vec<u8>)> {
    let candidate = upload_candidate(path)?;
    let limit = session_options(settings)?.max_upload_bytes.min(pagemark_core::MAX_UPLOAD_BYTES);
    validate_upload(&candidate, limit).context("failed to open PDF")?;

    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok((candidate, bytes))
}

fn color_or(value: Option<&str>, fallback: Color) -> Result<Color> {
    match value {
        Some(value) => value.parse::<Color>().with_context(|| format!("invalid color {value:?}")),
        None => Ok(fallback),
    }
}

/// Export file names carry the UTC date.
fn export_date<Tz: TimeZone>(now: DateTime<Tz>) -> NaiveDate {
    now.with_timezone(&Utc).date_naive()
}

fn today() -> NaiveDate {
    export_date(Utc::now())
}

fn save_artifact(out_dir: &Path, artifact: SavedArtifact) -> Result<PathBuf> {
    let mut sink = DirectorySink::new(out_dir);
    let path = sink
        .save(&artifact)
        .with_context(|| format!("failed to save {}", artifact.file_name))?;
    info!("wrote {}", path.display());
    Ok(path)
}

fn run_info(file: &Path, settings: &Settings) -> Result<()> {
    let (_, bytes) = read_upload(file, settings)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(bytes)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let pages = (0..page_count)
        .map(|index| {
            engine
                .page_size(handle, index)
                .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    engine.close(handle)?;
    Ok(())
}

fn run_render<E: PdfEngine + 'static>(
    engine: E,
    file: &Path,
    page: u32,
    zoom: f32,
    output: &Path,
    settings: &Settings,
) -> Result<()> {
    if page == 0 {
        bail!("--page is 1-based and must be >= 1");
    }
    let (_, bytes) = read_upload(file, settings)?;

    let mut renderer = PageRenderer::new(engine);
    renderer.load(bytes).context("failed to open PDF")?;
    renderer
        .render_page(page, pagemark_core::clamp_zoom(zoom))
        .with_context(|| format!("failed to render page {page}"))?;
    let image = renderer.surface().bitmap().context("render produced no image")?;

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    image
        .save(output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

fn run_highlight(
    file: &Path,
    rects: &[PageRectArg],
    canvas: BitmapSize,
    out_dir: &Path,
    settings: &Settings,
) -> Result<()> {
    let (candidate, bytes) = read_upload(file, settings)?;
    let default_color = session_options(settings)?.highlight_color;

    let mut store = AnnotationStore::new();
    for arg in rects {
        let color = color_or(arg.rect.color.as_deref(), default_color)?;
        let id = store.next_highlight_id(arg.page);
        store.add_highlight(Highlight { id, page: arg.page, rect: arg.rect.rect, color })?;
    }
    debug!("stamping {} highlight(s) against a {}x{} canvas", rects.len(), canvas.width, canvas.height);

    let bytes = export_highlighted(&bytes, store.highlights(), canvas)
        .context("failed to export highlighted PDF")?;
    let artifact = SavedArtifact { file_name: highlighted_file_name(&candidate.name, today()), bytes };

    println!("{}", save_artifact(out_dir, artifact)?.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_crop<E: PdfEngine + 'static>(
    engine: E,
    file: &Path,
    page: u32,
    rect: &RectArg,
    canvas: BitmapSize,
    highlights: &[RectArg],
    out_dir: &Path,
    settings: &Settings,
) -> Result<()> {
    let (candidate, bytes) = read_upload(file, settings)?;
    let default_color = session_options(settings)?.highlight_color;

    let mut store = AnnotationStore::new();
    for arg in highlights {
        let color = color_or(arg.color.as_deref(), default_color)?;
        let id = store.next_highlight_id(page);
        store.add_highlight(Highlight { id, page, rect: arg.rect, color })?;
    }

    let mut renderer = PageRenderer::new(engine);
    renderer.load(bytes).context("failed to open PDF")?;
    let page_size = renderer.page_size(page).with_context(|| format!("failed to read page {page}"))?;
    let rendered = renderer
        .render_offscreen(page, CROP_RENDER_SCALE)
        .with_context(|| format!("failed to render page {page}"))?;

    let bytes = export_cropped(&rendered, rect.rect, store.highlights(), canvas, page_size)
        .context("failed to export cropped PDF")?;
    let artifact =
        SavedArtifact { file_name: cropped_file_name(&candidate.name, page, today()), bytes };

    println!("{}", save_artifact(out_dir, artifact)?.display());
    Ok(())
}

fn run_replay<E: PdfEngine + 'static>(
    engine: E,
    file: &Path,
    script: &Path,
    out_dir: &Path,
    settings: &Settings,
) -> Result<()> {
    let raw = fs::read(script).with_context(|| format!("failed to read {}", script.display()))?;
    let script: ReplayScript = serde_json::from_slice(&raw).context("invalid replay script")?;

    let candidate = upload_candidate(file)?;
    let mut session = EditorSession::new(engine, session_options(settings)?);
    session.upload(candidate, || fs::read(file)).context("failed to open PDF")?;

    let mut sink = DirectorySink::new(out_dir);
    let mut exports = Vec::new();

    let element = script.element;
    for (index, step) in script.steps.into_iter().enumerate() {
        debug!("step {index}: {step:?}");
        let pointer = |session: &mut EditorSession<E>, event: PointerEvent| match element {
            Some(element) => session.pointer(event, element),
            None => session.pointer_at(event),
        };

        match step {
            ReplayStep::Mode { mode } => session.set_mode(mode),
            ReplayStep::Color { color } => {
                session
                    .select_highlight_color(&color)
                    .with_context(|| format!("step {index}: invalid color"))?;
            }
            ReplayStep::Down { x, y } => {
                pointer(&mut session, PointerEvent::down(x, y));
            }
            ReplayStep::Move { x, y } => {
                pointer(&mut session, PointerEvent::moved(x, y));
            }
            ReplayStep::Up { x, y } => {
                pointer(&mut session, PointerEvent::up(x, y));
            }
            ReplayStep::NextPage => {
                session.next_page();
            }
            ReplayStep::PrevPage => {
                session.prev_page();
            }
            ReplayStep::ZoomIn => {
                session.zoom_in();
            }
            ReplayStep::ZoomOut => {
                session.zoom_out();
            }
            ReplayStep::Undo => {
                session.undo();
            }
            ReplayStep::Remove { id } => {
                if session.remove_highlight(&id).is_none() {
                    bail!("step {index}: no highlight with id {id:?}");
                }
            }
            ReplayStep::ExportHighlighted => {
                let path = session
                    .export_highlighted(today(), &mut sink)
                    .with_context(|| format!("step {index}: failed to export highlighted PDF"))?;
                exports.push(path);
            }
            ReplayStep::ExportCropped => {
                let path = session
                    .export_cropped(today(), &mut sink)
                    .with_context(|| format!("step {index}: failed to export cropped PDF"))?;
                exports.push(path);
            }
        }
    }

    let summary = ReplaySummary {
        file: session.file_name(),
        mode: session.mode(),
        view: session.view(),
        zoom_label: session.view().zoom_label(),
        viewer: session.viewer(),
        highlights: session.store().highlights(),
        crop_area: session.store().crop_area(),
        notice: session.notice(),
        overlays: element.map(|element| session.overlays(element)).unwrap_or_default(),
        exports,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
