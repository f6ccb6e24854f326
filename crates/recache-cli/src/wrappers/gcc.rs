//! Wrapper for the GCC compiler family (gcc, g++, clang, cc aliases,
//! cross prefixes like `arm-none-eabi-gcc`).

use super::ToolWrapper;
use crate::exec;
use recache_core::{Error, ExpectedFile, Hasher, Result};
use std::fs;
use std::path::{Path, PathBuf};

const FAMILY_NAMES: [&str; 6] = ["cc", "c++", "gcc", "g++", "clang", "clang++"];

/// Extensions gcc treats as translation units on the command line.
const SOURCE_EXTENSIONS: [&str; 12] = [
    "c", "C", "cc", "cp", "cxx", "cpp", "c++", "i", "ii", "m", "s", "S",
];

/// Flags that consume the following argument.
const VALUE_FLAGS: [&str; 12] = [
    "-o", "-MF", "-MT", "-MQ", "-I", "-isystem", "-include", "-imacros", "-x", "-D", "-U", "-L",
];

/// Dependency-generation flags without a value.
const DEP_FLAGS: [&str; 3] = ["-MD", "-MMD", "-MP"];

/// Dependency-generation flags with a value.
const DEP_VALUE_FLAGS: [&str; 3] = ["-MF", "-MT", "-MQ"];

pub struct GccWrapper {
    args: Vec<String>,
}

impl GccWrapper {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    /// Whether the resolved executable looks like a GCC-family driver.
    pub fn can_handle(exe_path: &Path) -> bool {
        let Some(stem) = exe_path.file_stem().and_then(|s| s.to_str()) else {
            return false;
        };
        let stem = stem.to_ascii_lowercase();
        FAMILY_NAMES.iter().any(|name| {
            stem == *name
                || stem.ends_with(&format!("-{name}"))
                || stem.starts_with(&format!("{name}-"))
        })
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.args[1..].iter().any(|a| a == flag)
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let mut sources = Vec::new();
        let mut skip_next = false;
        for arg in &self.args[1..] {
            if skip_next {
                skip_next = false;
                continue;
            }
            if VALUE_FLAGS.contains(&arg.as_str()) {
                skip_next = true;
                continue;
            }
            if arg.starts_with('-') {
                continue;
            }
            let path = Path::new(arg);
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SOURCE_EXTENSIONS.contains(&e))
                .unwrap_or(false);
            if is_source {
                sources.push(path.to_path_buf());
            }
        }
        sources
    }

    fn output_path(&self) -> Option<PathBuf> {
        let args = &self.args[1..];
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                return iter.next().map(PathBuf::from);
            }
            // Attached form: -ofoo.o ("-O..." is optimization, not output).
            if let Some(rest) = arg.strip_prefix("-o") {
                if !rest.is_empty() {
                    return Some(PathBuf::from(rest));
                }
            }
        }
        None
    }

    fn object_path(&self) -> Option<PathBuf> {
        if let Some(output) = self.output_path() {
            return Some(output);
        }
        // Without -o, the object lands in the working directory named
        // after the source.
        let source = self.source_files().into_iter().next()?;
        Some(PathBuf::from(source.file_stem()?).with_extension("o"))
    }

    fn depfile_path(&self) -> Option<PathBuf> {
        let args = &self.args[1..];
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-MF" {
                return iter.next().map(PathBuf::from);
            }
            if let Some(rest) = arg.strip_prefix("-MF") {
                if !rest.is_empty() {
                    return Some(PathBuf::from(rest));
                }
            }
        }
        if self.has_flag("-MD") || self.has_flag("-MMD") {
            return self.object_path().map(|o| o.with_extension("d"));
        }
        None
    }

    /// The command line for the preprocessor run: compilation, output
    /// and dependency bookkeeping stripped, `-E` appended.
    fn preprocess_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut skip_next = false;
        for arg in &self.args[1..] {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg == "-o" || DEP_VALUE_FLAGS.contains(&arg.as_str()) {
                skip_next = true;
                continue;
            }
            if arg == "-c"
                || arg.starts_with("-o")
                || DEP_FLAGS.contains(&arg.as_str())
                || DEP_VALUE_FLAGS.iter().any(|f| arg.starts_with(f))
            {
                continue;
            }
            out.push(arg.clone());
        }
        out.push("-E".to_string());
        out
    }
}

impl ToolWrapper for GccWrapper {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn resolve_args(&mut self) -> Result<()> {
        // Response files can nest; the bound stops reference cycles.
        for _ in 0..16 {
            let Some(pos) = self
                .args
                .iter()
                .position(|a| a.starts_with('@') && a.len() > 1)
            else {
                return Ok(());
            };
            let path = self.args[pos][1..].to_string();
            let content =
                fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
            let words: Vec<String> = content.split_whitespace().map(str::to_string).collect();
            self.args.splice(pos..=pos, words);
        }
        Err(Error::configuration("response files nested too deeply"))
    }

    fn capabilities(&self) -> Vec<String> {
        // Object files are never modified in place by consumers.
        vec!["hard_links".to_string()]
    }

    fn preprocess_source(&mut self) -> Result<Vec<u8>> {
        let args = self.preprocess_args();
        let result = exec::run_capture(Path::new(&self.args[0]), &args)?;
        if result.return_code != 0 {
            return Err(Error::configuration(format!(
                "preprocessing failed with exit code {}",
                result.return_code
            )));
        }
        Ok(result.stdout)
    }

    fn relevant_arguments(&self) -> Vec<String> {
        // Drop what is captured elsewhere: source operands (hashed as
        // content), the output location (does not affect output bytes)
        // and dependency bookkeeping.
        let sources = self.source_files();
        let mut out = Vec::new();
        let mut skip_next = false;
        for arg in &self.args[1..] {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg == "-o" || DEP_VALUE_FLAGS.contains(&arg.as_str()) {
                skip_next = true;
                continue;
            }
            if arg.starts_with("-o")
                || DEP_FLAGS.contains(&arg.as_str())
                || DEP_VALUE_FLAGS.iter().any(|f| arg.starts_with(f))
            {
                continue;
            }
            if !arg.starts_with('-') && sources.iter().any(|s| s == Path::new(arg)) {
                continue;
            }
            out.push(arg.clone());
        }
        out
    }

    fn program_id(&self) -> Result<Vec<u8>> {
        let program = Path::new(&self.args[0]);
        let mut hasher = Hasher::new();
        hasher.absorb_file(program)?;
        // The version banner distinguishes driver scripts whose real
        // backend changed underneath them.
        if let Ok(result) = exec::run_capture(program, &["--version".to_string()]) {
            hasher.absorb(&result.stdout);
        }
        Ok(hasher.finalize().to_hex().into_bytes())
    }

    fn build_files(&self) -> Result<Vec<ExpectedFile>> {
        if !self.has_flag("-c") {
            return Err(Error::configuration(
                "only compilation steps (-c) are cached",
            ));
        }
        let object = self
            .object_path()
            .ok_or_else(|| Error::configuration("cannot determine object file"))?;
        let mut files = vec![ExpectedFile::required("object", &object)];
        if let Some(depfile) = self.depfile_path() {
            files.push(ExpectedFile::optional("depfile", &depfile));
        }
        Ok(files)
    }

    fn direct_source_files(&self) -> Vec<PathBuf> {
        self.source_files()
    }

    fn implicit_input_files(&self) -> Result<Vec<PathBuf>> {
        let Some(depfile) = self.depfile_path() else {
            return Ok(Vec::new());
        };
        let content =
            fs::read_to_string(&depfile).map_err(|e| Error::io(e, &depfile, "read"))?;
        Ok(parse_depfile(&content))
    }
}

/// Extract the prerequisite paths from a make-style dependency file.
fn parse_depfile(content: &str) -> Vec<PathBuf> {
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
    // Protect escaped spaces through the whitespace split.
    let protected = joined.replace("\\ ", "\u{0}");
    let Some((_, prerequisites)) = protected.split_once(':') else {
        return Vec::new();
    };
    prerequisites
        .split_whitespace()
        .map(|token| PathBuf::from(token.replace('\u{0}', " ")))
        .collect()
}
