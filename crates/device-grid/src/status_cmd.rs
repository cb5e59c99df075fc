//! `device-grid status`: inspect the persisted counter and audit ring.

use anyhow::Result;
use dg_config::GridConfig;
use dg_core::OutputFormat;
use dg_pool::DevicePoolAllocator;
use std::path::Path;

pub fn run(config_path: &Path, pool_override: Option<String>, format: &OutputFormat) -> Result<()> {
    let config = GridConfig::load(config_path)?;
    let pool = crate::allocate_cmd::named_pool(&config, pool_override)?;
    let pool_name = pool.name().to_string();
    let allocator = DevicePoolAllocator::new(pool, &dg_config::state_dir()?);
    let state = allocator.status()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => {
            println!("pool: {pool_name}");
            println!("counter: {}", state.counter);
            println!("total allocations: {}", state.total_allocations);
            match state.last_updated {
                Some(ts) => println!("last updated: {ts}"),
                None => println!("last updated: never"),
            }
            println!("recent allocations ({}):", state.recent.len());
            for entry in &state.recent {
                println!(
                    "  [{}] {} pid={} at {}",
                    entry.index, entry.device, entry.process_id, entry.timestamp
                );
            }
        }
    }
    Ok(())
}
