//! rvcaps - RISC-V back-end diagnostics
//!
//! Prints detected CPU capabilities and the layout of emitted stubs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rv64_backend::asm::{CodeBuffer, MacroAssembler, RelocKind, NOP};
use rv64_backend::config::BackendConfig;
use rv64_backend::cpu::{self, CapabilitySnapshot};
use rv64_backend::stubs::{EntryGuardPatcher, RuntimeStubs, StubCatalog};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rvcaps")]
#[command(version)]
#[command(about = "RISC-V 64 capability detection and stub layout", long_about = None)]
struct Cli {
    /// Config file (default: search rv64-backend.toml upward from cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect CPU capabilities on this host
    Detect {
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Emit both stub kinds and print their layout
    Stubs {
        /// Load address of the code buffer (default: [stubs] code_base)
        #[arg(long, value_parser = parse_address)]
        base: Option<u64>,

        /// Polling page return handler address
        #[arg(long, value_parser = parse_address)]
        handler: Option<u64>,

        /// Method entry barrier routine address
        #[arg(long, value_parser = parse_address)]
        barrier: Option<u64>,

        /// Thread offset of the saved exception pc slot
        #[arg(long, default_value = "0x1a8", value_parser = parse_address)]
        saved_pc_offset: u64,
    },
}

fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn load_config(path: Option<&Path>) -> Result<BackendConfig> {
    match path {
        Some(path) => BackendConfig::load(path).with_context(|| format!("Failed to load {}", path.display())),
        None => BackendConfig::load_from_cwd().context("Failed to load rv64-backend.toml"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect { json } => cmd_detect(&config, json),
        Commands::Stubs {
            base,
            handler,
            barrier,
            saved_pc_offset,
        } => {
            let base = base.unwrap_or(config.stubs.code_base);
            let runtime = RuntimeStubs {
                polling_page_return_handler: handler.unwrap_or(base + 0x10_0000),
                method_entry_barrier: barrier.unwrap_or(base + 0x10_1000),
                saved_exception_pc_offset: i32::try_from(saved_pc_offset)
                    .context("saved pc offset does not fit in 32 bits")?,
            };
            cmd_stubs(base, runtime)
        }
    }
}

fn cmd_detect(config: &BackendConfig, json: bool) -> Result<()> {
    let snapshot = cpu::initialize(&cpu::LinuxSource::new(&config.detection.cpuinfo_path), config);
    if json {
        let out = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        println!("{}", out);
    } else {
        print_snapshot(snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &CapabilitySnapshot) {
    println!("features:         {}", snapshot.features_string);
    println!("hwcap mask:       {:#x}", snapshot.features);
    println!("translation mode: {}", snapshot.translation_mode);
    println!("unaligned access: {:?}", snapshot.unaligned_access);
    if let Some(vlenb) = snapshot.vector_length {
        println!("vector length:    {} bytes", vlenb);
    }
    for (label, value) in [
        ("mvendorid", snapshot.mvendorid),
        ("marchid", snapshot.marchid),
        ("mimpid", snapshot.mimpid),
    ] {
        if let Some(value) = value {
            println!("{:<17} {:#x}", format!("{}:", label), value);
        }
    }

    let t = &snapshot.tunables;
    println!();
    println!("tunables:");
    for (name, on) in [
        ("use_rvc", t.use_rvc),
        ("use_rvv", t.use_rvv),
        ("use_zba", t.use_zba),
        ("use_zbb", t.use_zbb),
        ("use_zbs", t.use_zbs),
        ("use_zicbom", t.use_zicbom),
        ("use_zicboz", t.use_zicboz),
        ("use_zicbop", t.use_zicbop),
        ("use_zic64b", t.use_zic64b),
        ("use_ztso", t.use_ztso),
        ("use_zihintpause", t.use_zihintpause),
        ("use_zfh", t.use_zfh),
        ("use_zvfh", t.use_zvfh),
        ("use_zacas", t.use_zacas),
        ("avoid_unaligned_accesses", t.avoid_unaligned_accesses),
    ] {
        println!("  {:<26} {}", name, on);
    }
}

fn cmd_stubs(base: u64, runtime: RuntimeStubs) -> Result<()> {
    let mut masm = CodeBuffer::new(base);
    let body = masm.new_label();
    let mut catalog = StubCatalog::new(runtime);
    catalog.add_entry_barrier(&mut masm, body);

    // Minimal method body: one poll site
    masm.bind(body)?;
    let poll_site = masm.offset();
    masm.emit_u32(NOP);
    catalog.add_safepoint_poll(&mut masm, poll_site);

    let body_size = masm.offset();
    masm.reserve(catalog.max_size());
    let emitted = catalog.emit_all(&mut masm).context("Failed to emit stubs")?;
    let code = masm.finish().context("Failed to finalize code buffer")?;

    println!("code base: {:#x}, body: {} bytes", base, body_size);
    for stub in &emitted {
        println!(
            "  {:<16} offset {:#06x}  {:>3} / {:>3} bytes",
            stub.kind.to_string(),
            stub.offset,
            stub.size,
            stub.max_size
        );
    }

    println!("relocations:");
    for reloc in code.relocations() {
        let what = match reloc.kind {
            RelocKind::InternalWord { target } => format!("internal word -> {:#x}", target),
            RelocKind::RuntimeCall { target } => format!("runtime call -> {:#x}", target),
            RelocKind::EntryGuard => "entry guard".to_string(),
        };
        println!("  {:#06x}  {}", reloc.offset, what);
    }

    for guard in EntryGuardPatcher::new(&code).guards() {
        println!("guard word at {:#x} = {:#x}", guard.address(), guard.load());
    }
    Ok(())
}
