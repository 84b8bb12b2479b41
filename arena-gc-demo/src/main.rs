//! Demonstrates the process arena: explicit allocation and freeing,
//! then conservative garbage collection.
//!
//! Set `RUST_LOG=arena_gc=trace` to follow every block operation.

use {
    anyhow::bail,
    arena_gc::global,
    clap::{Parser, ValueEnum},
    std::{hint::black_box, ptr::copy_nonoverlapping},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

#[derive(Parser)]
#[command(version, about)]
struct Cli
{
    /// Which scenario to run.
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Print the block layout as JSON after every dump.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Scenario
{
    /// Allocate a string, then free it.
    Alloc,

    /// Allocate a kept block and garbage, then collect.
    Gc,

    /// Both, each on a fresh arena.
    All,
}

fn main() -> anyhow::Result<()>
{
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    global::run(|| {
        if matches!(cli.scenario, Scenario::Alloc | Scenario::All) {
            alloc_scenario(cli.json)?;
            global::reset_arena();
        }
        if matches!(cli.scenario, Scenario::Gc | Scenario::All) {
            gc_scenario(cli.json)?;
            global::reset_arena();
        }
        Ok(())
    })
}

fn alloc_scenario(json: bool) -> anyhow::Result<()>
{
    info!("Running allocation scenario");

    show(json)?;

    let text = b"Hello, world!\n\0";
    let ptr = global::allocate(text.len());
    // SAFETY: The block holds at least text.len() bytes.
    unsafe { copy_nonoverlapping(text.as_ptr(), ptr, text.len()); }
    show(json)?;

    global::deallocate(ptr);
    show(json)
}

fn gc_scenario(json: bool) -> anyhow::Result<()>
{
    info!("Running collection scenario");

    show(json)?;

    let kept = global::allocate(256);
    black_box(&kept);
    make_garbage();
    show(json)?;
    scrub();

    let reclaimed = global::collect();
    println!("Reclaimed {} bytes.\n", reclaimed);
    global::defragment();
    show(json)?;

    let layout = global::layout();
    if layout.len() != 2 || !layout[0].allocated || layout[0].size != 256 {
        bail!(
            "Expected one kept block and one free block after collection, \
             found {} blocks",
            layout.len(),
        );
    }

    black_box(&kept);
    global::deallocate(kept);
    Ok(())
}

/// Allocate five blocks and drop every reference to them.
#[inline(never)]
fn make_garbage()
{
    for _ in 0 .. 5 {
        black_box(global::allocate(128));
    }
}

/// Overwrite dead stack slots that may still refer to garbage.
#[inline(never)]
fn scrub()
{
    black_box([0usize; 4096]);
}

fn show(json: bool) -> anyhow::Result<()>
{
    print!("{}", global::dump_arena());
    if json {
        println!("{}\n", serde_json::to_string_pretty(&global::layout())?);
    }
    Ok(())
}
