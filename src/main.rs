use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pagetree::{PAGE_SIZE, PageManager, StoreConfig};

/// Allocate pages in a page file and print its header.
#[derive(Parser, Debug)]
#[command(name = "pagetree", version, about = "Self-hosting page allocator demo")]
struct Args {
    /// Page file to create or open
    #[arg(default_value = "pages.db")]
    path: PathBuf,

    /// Number of pages to allocate
    #[arg(short = 'n', long, default_value_t = 16)]
    count: u64,

    /// Free every allocated page again afterwards
    #[arg(long)]
    free: bool,

    /// Recreate the file even if it exists
    #[arg(long)]
    fresh: bool,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "PAGETREE_LOG")]
    log_level: String,
}

fn main() -> pagetree::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(format!("pagetree={}", args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };

    let mut pages = if args.fresh || !args.path.exists() {
        PageManager::create(&args.path, &config)?
    } else {
        PageManager::open(&args.path, &config)?
    };

    let mut allocated = Vec::with_capacity(args.count as usize);
    for _ in 0..args.count {
        allocated.push(pages.allocate_page()?);
    }
    if let (Some(first), Some(last)) = (allocated.first(), allocated.last()) {
        info!(first, last, count = allocated.len(), "allocated pages");
    }

    if args.free {
        for page in &allocated {
            pages.deallocate_page(*page)?;
        }
        info!(count = allocated.len(), "freed pages");
    }

    let header = pages.header();
    println!("root offset:      {:#x}", header.index_root.offset);
    println!("depth:            {}", header.index_root.depth);
    println!("next page:        {}", header.next_page());
    println!("capacity:         {} pages", pages.capacity() / PAGE_SIZE as u64);

    pages.close()
}
