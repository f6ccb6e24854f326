//! `recache --show-stats`

use recache_cache::LocalCache;
use recache_core::{format_size, Config};
use std::fmt::Write;

pub fn run() -> i32 {
    match execute() {
        Ok(summary) => {
            print!("{summary}");
            0
        }
        Err(e) => {
            eprintln!("recache: {e}");
            1
        }
    }
}

fn execute() -> recache_cache::Result<String> {
    let config = Config::load()?;
    let cache = LocalCache::new(&config)?;
    let stats = cache.stats()?;
    let size = cache.occupied_size()?;
    Ok(render(&stats, size, config.max_cache_size))
}

fn render(stats: &recache_cache::CacheStats, size: u64, max_size: u64) -> String {
    let budget = if max_size == 0 {
        "unlimited".to_string()
    } else {
        format_size(max_size)
    };
    let mut out = String::new();
    writeln!(out, "recache statistics:").unwrap();
    writeln!(out, "  direct hits      {}", stats.direct_hits).unwrap();
    writeln!(out, "  direct misses    {}", stats.direct_misses).unwrap();
    writeln!(out, "  local hits       {}", stats.local_hits).unwrap();
    writeln!(out, "  remote hits      {}", stats.remote_hits).unwrap();
    writeln!(out, "  remote misses    {}", stats.remote_misses).unwrap();
    writeln!(out, "  evictions        {}", stats.evictions).unwrap();
    writeln!(out, "  cache size       {} / {}", format_size(size), budget).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use recache_cache::CacheStats;

    #[test]
    fn render_includes_every_counter() {
        let stats = CacheStats {
            direct_hits: 1,
            direct_misses: 2,
            local_hits: 3,
            remote_hits: 4,
            remote_misses: 5,
            evictions: 6,
        };
        let text = render(&stats, 1_500_000, 5_000_000_000);
        assert!(text.contains("direct hits      1"));
        assert!(text.contains("local hits       3"));
        assert!(text.contains("evictions        6"));
        assert!(text.contains("1.5 M / 5.0 G"));
    }

    #[test]
    fn render_unlimited_budget() {
        let text = render(&CacheStats::default(), 0, 0);
        assert!(text.contains("/ unlimited"));
    }
}
