//! `recache --max-size SIZE`

use recache_core::{format_size, parse_size, Config};

pub fn run(size_arg: &str) -> i32 {
    match execute(size_arg) {
        Ok(size) => {
            if size == 0 {
                println!("Max cache size set to unlimited");
            } else {
                println!("Max cache size set to {}", format_size(size));
            }
            0
        }
        Err(e) => {
            eprintln!("recache: {e}");
            1
        }
    }
}

fn execute(size_arg: &str) -> recache_core::Result<u64> {
    let size = parse_size(size_arg)?;
    let mut config = Config::load()?;
    // Shrinking does not trim the cache immediately; the next insert's
    // eviction pass enforces the new budget.
    config.set_max_cache_size(size)?;
    Ok(size)
}
