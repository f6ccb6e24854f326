//! Tool wrappers
//!
//! A wrapper knows one tool family: how to filter its command line down
//! to the flags that affect output, how to run its preprocessor, which
//! files it will produce and what identifies the tool binary. The
//! capability surface is a trait with defaults; a wrapper overrides
//! only what its tool needs.

mod gcc;

pub use gcc::GccWrapper;

use crate::exec;
use recache_cache::{CacheEngine, LookupOptions};
use recache_core::{CacheEntry, CompressionMode, ExpectedFile, Hash, Hasher, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Capabilities a wrapper can advertise.
pub struct Capabilities {
    /// Cached files may be installed by hard link. Only safe for tools
    /// whose consumers never modify outputs in place.
    pub hard_links: bool,
}

impl Capabilities {
    pub fn from_strings(strings: &[String]) -> Self {
        let mut caps = Self { hard_links: false };
        for s in strings {
            if s == "hard_links" {
                caps.hard_links = true;
            }
        }
        caps
    }
}

/// The capability contract between a tool wrapper and the engine.
///
/// Defaults describe a tool we know nothing about: no preprocessing,
/// every argument relevant, no interesting environment, the program
/// binary's digest as its identity, and no produced files (which makes
/// caching a no-op and falls back to plain execution).
pub trait ToolWrapper {
    /// Full command line, program path first.
    fn args(&self) -> &[String];

    /// Resolve indirections such as response files before anything is
    /// hashed.
    fn resolve_args(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capability strings; see [`Capabilities`].
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// The preprocessed source text. The default is an empty
    /// preprocessing step.
    fn preprocess_source(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// The arguments that affect the tool's output.
    fn relevant_arguments(&self) -> Vec<String> {
        self.args().to_vec()
    }

    /// Environment variables that affect the tool's output.
    fn relevant_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// A string identifying the exact tool. The default digests the
    /// program binary itself.
    fn program_id(&self) -> Result<Vec<u8>> {
        let hash = Hasher::hash_file(Path::new(&self.args()[0]))?;
        Ok(hash.to_hex().into_bytes())
    }

    /// The files this invocation is expected to produce.
    fn build_files(&self) -> Result<Vec<ExpectedFile>> {
        Ok(Vec::new())
    }

    /// Raw source files for the direct-mode hash. Empty disables
    /// direct mode for this invocation.
    fn direct_source_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Implicit input files observed after a successful run (typically
    /// headers listed in a dependency file).
    fn implicit_input_files(&self) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Pick a wrapper for the resolved executable, if any family matches.
pub fn select_wrapper(exe_path: &Path, args: Vec<String>) -> Option<Box<dyn ToolWrapper>> {
    if GccWrapper::can_handle(exe_path) {
        return Some(Box::new(GccWrapper::new(args)));
    }
    info!(exe = %exe_path.display(), "No suitable wrapper");
    None
}

/// Drive one wrapped invocation through the engine.
///
/// Returns the exit code to surface to the caller. An error means the
/// caller should fall back to running the command untouched.
pub fn handle_invocation(wrapper: &mut dyn ToolWrapper, engine: &mut CacheEngine) -> Result<i32> {
    wrapper.resolve_args()?;
    let caps = Capabilities::from_strings(&wrapper.capabilities());
    let opts = LookupOptions {
        allow_hard_links: engine.config().hard_links && caps.hard_links,
        create_target_dirs: true,
    };
    let expected = wrapper.build_files()?;
    let program_id = wrapper.program_id()?;

    // Direct mode: a raw-source hash that can skip the preprocessor.
    let direct = direct_hash(&*wrapper, &program_id)?;
    if let Some(direct) = &direct {
        if let Some(code) = engine.lookup_direct(direct, &expected, &opts) {
            return Ok(code);
        }
    }

    let preprocessed = wrapper.preprocess_source()?;
    let hash = invocation_hash(&*wrapper, &preprocessed, &program_id);
    if let Some(code) = engine.lookup(&hash, &expected, &opts) {
        return Ok(code);
    }

    info!(%hash, "Cache miss");
    let args = wrapper.args().to_vec();
    let result = exec::run_capture(Path::new(&args[0]), &args[1..])?;

    // The tool's output reaches the caller whether or not we cache.
    {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(&result.stdout);
        let _ = stdout.flush();
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(&result.stderr);
        let _ = stderr.flush();
    }

    // Failed runs are never cached; that would risk pinning
    // intermittent faults.
    if result.return_code == 0 {
        let mode = if engine.config().compress {
            CompressionMode::All
        } else {
            CompressionMode::None
        };
        let entry = CacheEntry::new(
            expected.iter().map(|f| f.id.clone()).collect(),
            mode,
            result.stdout,
            result.stderr,
            result.return_code,
        );
        engine.add(&hash, &entry, &expected, &opts);

        if let Some(direct) = &direct {
            match wrapper.implicit_input_files() {
                Ok(implicit) if !implicit.is_empty() => {
                    engine.add_direct(direct, &hash, &implicit);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "No implicit input list; skipping direct mode entry");
                }
            }
        }
    }
    Ok(result.return_code)
}

fn direct_hash(wrapper: &dyn ToolWrapper, program_id: &[u8]) -> Result<Option<Hash>> {
    let sources = wrapper.direct_source_files();
    if sources.is_empty() {
        return Ok(None);
    }
    let mut hasher = Hasher::new();
    for source in &sources {
        hasher.absorb_file(source)?;
    }
    absorb_invocation(&mut hasher, wrapper, program_id);
    Ok(Some(hasher.finalize()))
}

fn invocation_hash(wrapper: &dyn ToolWrapper, preprocessed: &[u8], program_id: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.absorb(preprocessed);
    absorb_invocation(&mut hasher, wrapper, program_id);
    hasher.finalize()
}

fn absorb_invocation(hasher: &mut Hasher, wrapper: &dyn ToolWrapper, program_id: &[u8]) {
    for arg in wrapper.relevant_arguments() {
        hasher.absorb_str(&arg);
    }
    hasher.absorb_map(&wrapper.relevant_env_vars());
    hasher.absorb(program_id);
}
