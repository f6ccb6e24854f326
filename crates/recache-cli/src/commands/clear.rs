//! `recache --clear`

use recache_cache::LocalCache;
use recache_core::Config;

pub fn run() -> i32 {
    match execute() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("recache: {e}");
            1
        }
    }
}

fn execute() -> recache_cache::Result<()> {
    let config = Config::load()?;
    let cache = LocalCache::new(&config)?;
    cache.clear()
}
