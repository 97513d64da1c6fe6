use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "memeforge", version)]
struct Cli {
    /// Typeface used for captions (TTF/OTF file).
    #[arg(long, global = true)]
    font: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a macro straight to a file, bypassing the cache.
    Render(RenderArgs),
    /// Render a macro through a cache directory and print its path + ETag.
    Generate(GenerateArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Template image (.png, .jpg/.jpeg, or .gif).
    #[arg(long)]
    template: PathBuf,

    /// JSON file holding the overlay: an array of text lines.
    #[arg(long)]
    overlay: PathBuf,

    /// Output path. Animated templates must render to a .gif.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Cache directory.
    #[arg(long)]
    store: PathBuf,

    /// Template image (.png, .jpg/.jpeg, or .gif).
    #[arg(long)]
    template: PathBuf,

    /// JSON file holding the overlay: an array of text lines.
    #[arg(long)]
    overlay: PathBuf,

    /// Macro ID used in the cache file name.
    #[arg(long, default_value_t = 1)]
    id: u64,

    /// Cache seed; changing it invalidates cached entries.
    #[arg(long, default_value = "")]
    seed: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Some(font) = &cli.font {
        let face = memeforge::Typeface::from_file(font)
            .with_context(|| format!("load font '{}'", font.display()))?;
        memeforge::Typeface::install(face)?;
    }

    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Generate(args) => cmd_generate(args),
    }
}

fn read_overlay(path: &Path) -> anyhow::Result<Vec<memeforge::TextLine>> {
    let f = File::open(path).with_context(|| format!("open overlay '{}'", path.display()))?;
    let lines: Vec<memeforge::TextLine> =
        serde_json::from_reader(BufReader::new(f)).context("parse overlay JSON")?;
    anyhow::ensure!(!lines.is_empty(), "overlay must contain at least one line");
    Ok(lines)
}

fn template_record(id: u64, path: &Path) -> anyhow::Result<memeforge::Template> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("read template '{}'", path.display()))?;
    Ok(memeforge::Template {
        id,
        path: path.to_path_buf(),
        width,
        height,
        name: memeforge::canonical_template_name(
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("template"),
        ),
        creator: -1,
        created_at: String::new(),
        areas: Vec::new(),
        hidden: false,
    })
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let overlay = read_overlay(&args.overlay)?;
    let m = memeforge::macro_from_overlay(0, 0, overlay);

    let is_gif = args
        .template
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"));

    if is_gif {
        let src = File::open(&args.template)
            .with_context(|| format!("open template '{}'", args.template.display()))?;
        let dst = File::create(&args.out)
            .with_context(|| format!("create output '{}'", args.out.display()))?;
        let mut dst = BufWriter::new(dst);
        memeforge::render_animated(BufReader::new(src), &m, &mut dst)?;
        dst.flush()?;
    } else {
        let template = image::open(&args.template)
            .with_context(|| format!("decode template '{}'", args.template.display()))?
            .to_rgba8();
        let rendered = memeforge::render_still(&template, &m)?;
        rendered
            .save(&args.out)
            .with_context(|| format!("write output '{}'", args.out.display()))?;
    }

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let overlay = read_overlay(&args.overlay)?;
    let m = memeforge::macro_from_overlay(args.id, 1, overlay);
    let t = template_record(1, &args.template)?;

    let options = memeforge::CacheOptions {
        seed: args.seed,
        ..Default::default()
    };
    let cache = memeforge::MacroCache::new(&args.store, options)?;
    let served = cache.fetch_or_generate(&m, &t)?;

    println!("{}\t{}", served.path.display(), served.etag);
    Ok(())
}
