//! blendlink CLI - inspect and load .blend documents.

use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use blendlink::block::{BlockReader, FileData};
use blendlink::format::{code_str, IdCode};
use blendlink::prelude::*;
use blendlink::read::{explode_library_path, extract_thumbnail_from};
use blendlink::sdna::Schema;

/// Keeps the trace file open until exit.
#[cfg(feature = "chrome-trace")]
type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "chrome-trace"))]
type TraceGuard = ();

fn init_tracing(level: &str) -> TraceGuard {
    let filter = EnvFilter::try_from_env("BLENDLINK_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    #[cfg(feature = "chrome-trace")]
    {
        if env::var("BLENDLINK_TRACE").ok().as_deref() == Some("1") {
            let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
            tracing_subscriber::registry().with(filter).with(fmt).with(chrome).init();
            return Some(guard);
        }
        tracing_subscriber::registry().with(filter).with(fmt).init();
        None
    }
    #[cfg(not(feature = "chrome-trace"))]
    {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "warn";
    let mut config: Option<String> = None;
    let mut filtered_args: Vec<&str> = Vec::new();
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => level = "info",
            "-vv" | "--trace" => level = "debug",
            "-q" | "--quiet" => level = "error",
            "-c" | "--config" => config = iter.next().cloned(),
            _ => filtered_args.push(arg),
        }
    }
    let _guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let options = match load_options(config.as_deref()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match filtered_args[0] {
        "info" | "i" => with_file(&filtered_args, "info <file.blend>", |f| cmd_info(f, &options)),
        "blocks" | "b" => with_file(&filtered_args, "blocks <file.blend>", |f| cmd_blocks(f, &options)),
        "schema" | "s" => {
            let pattern = filtered_args.get(2).copied();
            with_file(&filtered_args, "schema <file.blend> [struct]", |f| cmd_schema(f, pattern, &options))
        }
        "load" | "l" => {
            let json = filtered_args.iter().any(|&s| s == "--json" || s == "-j");
            with_file(&filtered_args, "load <file.blend> [--json]", |f| cmd_load(f, json, &options))
        }
        "thumb" | "t" => {
            let out = filtered_args.get(2).copied();
            with_file(&filtered_args, "thumb <file.blend> [out.ppm]", |f| cmd_thumb(f, out, &options))
        }
        "link" => match filtered_args.len() {
            2 => cmd_link_path(filtered_args[1], &options),
            3 if filtered_args[2] == "--all" => cmd_link_all(filtered_args[1], &options),
            n if n >= 4 => cmd_link(filtered_args[1], filtered_args[2], filtered_args[3], &options),
            _ => Err(anyhow::anyhow!(
                "missing arguments\nUsage: blendlink link <lib.blend> <GROUP> <name> | <lib.blend/GROUP/name> | <lib.blend> --all"
            )),
        },
        "version" | "--version" => {
            println!("blendlink {} ({} {})", env!("CARGO_PKG_VERSION"), blendlink::BUILD_DATE, blendlink::BUILD_TIME);
            Ok(())
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        // Default: if file exists, show info; otherwise error
        other => {
            if Path::new(other).exists() {
                cmd_info(other, &options)
            } else {
                eprintln!("Unknown command: {}", other);
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn with_file(args: &[&str], usage: &str, f: impl FnOnce(&str) -> Result<()>) -> Result<()> {
    match args.get(1) {
        Some(file) => f(file),
        None => bail!("missing file argument\nUsage: blendlink {}", usage),
    }
}

fn load_options(config: Option<&str>) -> Result<LoadOptions> {
    match config {
        Some(path) => LoadOptions::from_json_file(path).with_context(|| format!("reading options from {}", path)),
        None => Ok(LoadOptions::default()),
    }
}

fn print_help() {
    println!("blendlink - .blend document loader");
    println!();
    println!("USAGE:");
    println!("    blendlink [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info   <file>                Header, version, record counts");
    println!("    b, blocks <file>                List every block");
    println!("    s, schema <file> [struct]       Show the embedded struct layout");
    println!("    l, load   <file> [--json]       Load with libraries, print reports");
    println!("    t, thumb  <file> [out.ppm]      Extract the preview image");
    println!("    link <lib> <GROUP> <name>       Load one record from a library");
    println!("    link <lib/GROUP/name>           Same, as one path (lib.blend/Object/Cube)");
    println!("    link <lib> --all                Load every object and group");
    println!("    version                         Show build info");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose        Info logging");
    println!("    -vv, --trace         Debug logging");
    println!("    -q, --quiet          Errors only");
    println!("    -c, --config <json>  Load options file");
    println!();
    println!("ENVIRONMENT:");
    println!("    BLENDLINK_LOG        Log filter (overrides -v/-q)");
    println!("    BLENDLINK_TRACE=1    Write trace.json (chrome-trace feature)");
}

fn open(path: &str, options: &LoadOptions) -> Result<FileData> {
    let current = Schema::current()?;
    FileData::open_path(Path::new(path), options.use_mmap, current).with_context(|| format!("opening {}", path))
}

fn cmd_info(path: &str, options: &LoadOptions) -> Result<()> {
    let mut fd = open(path, options)?;
    let h = *fd.header();
    println!("File:      {}", path);
    println!("Stream:    {}", fd.stream_kind().name());
    println!("Pointers:  {} bytes, {:?}", h.pointer_size, h.endian);
    println!("Version:   {}", fd.read_file_version());
    println!("Blocks:    {}", fd.len());
    println!("Structs:   {}", fd.schema().struct_count());
    if let Some(msg) = fd.take_corruption() {
        println!("Warning:   {}", msg);
    }

    let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
    for b in fd.blocks() {
        if let Some(code) = b.header.id_code() {
            *counts.entry(code.to_string()).or_default() += 1;
        }
    }
    println!();
    for (code, n) in counts {
        println!("  {:<4} {}", code, n);
    }
    Ok(())
}

fn cmd_blocks(path: &str, options: &LoadOptions) -> Result<()> {
    let stream = ByteStream::open_opts(path, options.use_mmap)?;
    let mut reader = BlockReader::open(stream)?;
    let mut n = 0usize;
    while let Some(b) = reader.next_block()? {
        println!(
            "{:>6}  {:<6} len {:>8}  old {:#014x}  sdna {:>4}  count {}",
            n,
            code_str(&b.header.code),
            b.header.len,
            b.header.old,
            b.header.sdna_index,
            b.header.count
        );
        n += 1;
    }
    Ok(())
}

fn cmd_schema(path: &str, pattern: Option<&str>, options: &LoadOptions) -> Result<()> {
    let fd = open(path, options)?;
    let s = fd.schema();
    for si in 0..s.struct_count() {
        let name = s.struct_name(si);
        if pattern.is_some_and(|p| !name.contains(p)) {
            continue;
        }
        println!("{} ({} bytes) {:?}", name, s.struct_size(si), fd.flags().get(si));
        for f in s.fields(si) {
            println!("    {:>6}  {} {}", f.offset, s.field_type(f), s.field_name(f).full);
        }
    }
    Ok(())
}

fn cmd_load(path: &str, json: bool, options: &LoadOptions) -> Result<()> {
    let result = load_primary_with(path, options).with_context(|| format!("loading {}", path))?;
    if json {
        let doc = serde_json::json!({
            "globals": result.globals,
            "reports": result.reports,
            "graph": result.graph,
        });
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &doc)?;
        writeln!(out)?;
        return Ok(());
    }

    for report in &result.reports {
        println!("{}", report);
    }
    for ns in result.graph.namespaces() {
        let title = match ns.library.and_then(|l| result.graph.record(l)) {
            Some(lib) => lib.data.string("filepath").unwrap_or_default(),
            None => path.to_string(),
        };
        println!("{} ({}, {} records)", title, ns.version(), ns.len());
        for id in ns.iter() {
            if let Some(r) = result.graph.record(id) {
                println!("    {}{}  users {}  {:?}", r.code(), r.name(), r.id.users, r.tag());
            }
        }
    }
    Ok(())
}

fn cmd_thumb(path: &str, out: Option<&str>, options: &LoadOptions) -> Result<()> {
    let stream = ByteStream::open_opts(path, options.use_mmap)?;
    let Some(t) = extract_thumbnail_from(stream, options.max_thumbnail_pixels)? else {
        println!("{}: no thumbnail", path);
        return Ok(());
    };
    println!("{}: {}x{}", path, t.width, t.height);
    if let Some(out) = out {
        // Binary PPM, top row first.
        let mut ppm = format!("P6\n{} {}\n255\n", t.width, t.height).into_bytes();
        for row in t.pixels.chunks(t.width as usize * 4).rev() {
            for px in row.chunks(4) {
                ppm.extend_from_slice(&px[..3]);
            }
        }
        fs::write(out, ppm).with_context(|| format!("writing {}", out))?;
    }
    Ok(())
}

fn cmd_link_path(path: &str, options: &LoadOptions) -> Result<()> {
    let parts = explode_library_path(path).with_context(|| format!("{} is not a path into a library", path))?;
    let (Some(group), Some(name)) = (parts.group.as_deref(), parts.name.as_deref()) else {
        bail!("{}: expected <lib.blend>/<GROUP>/<name>", path);
    };
    cmd_link(&parts.library.to_string_lossy(), group, name, options)
}

fn cmd_link_all(lib: &str, options: &LoadOptions) -> Result<()> {
    let mut link = LibraryLink::begin(Graph::default(), lib, options.clone())?;
    let records = link.link_copy_buffer();
    let result = link.end();
    for report in &result.reports {
        println!("{}", report);
    }
    for r in records.iter().filter_map(|&id| result.graph.record(id)) {
        println!("{}{}  {:?}", r.code(), r.name(), r.tag());
    }
    println!("{} records read", result.graph.record_count());
    Ok(())
}

fn cmd_link(lib: &str, group: &str, name: &str, options: &LoadOptions) -> Result<()> {
    let code = match Registry::builtin().find_group(group) {
        Some(t) => t.code,
        None => group.parse::<IdCode>()?,
    };
    let mut link = LibraryLink::begin(Graph::default(), lib, options.clone())?;
    let record = link.link_named_part(code, name, LinkFlags { use_placeholders: true, force_indirect: false });
    let result = link.end();
    for report in &result.reports {
        println!("{}", report);
    }
    match record.and_then(|id| result.graph.record(id)) {
        Some(r) => {
            println!("{}{}  {:?}", r.code(), r.name(), r.tag());
            println!("{}", serde_json::to_string_pretty(&r.data)?);
        }
        None => bail!("{}{} not found in {}", code, name, lib),
    }
    println!("{} records read", result.graph.record_count());
    Ok(())
}
