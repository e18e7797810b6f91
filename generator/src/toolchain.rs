// toolchain.rs - Build service: C++ sources to a loadable unit
//
// Wraps an external C++ compiler behind the `BuildService` trait. The
// compiler is invoked synchronously; the calling thread blocks until it
// exits.
//
// Preconditions: the configured compiler command is on PATH.
// Postconditions: the unit is placed at `target_dir/<unit_file_name>`,
//                 replacing any existing file.
// Failure modes: non-zero compiler exit produces `BuildFailure` carrying the
//                compiler's stderr unchanged; filesystem errors produce `Io`.
// Side effects: writes into `target_dir` and `target_dir/build`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// C++ compiler command.
    pub cxx: String,
    /// Flags passed before the sources on every invocation.
    pub flags: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            cxx: "c++".to_string(),
            flags: vec!["-O2".to_string()],
        }
    }
}

impl ToolchainConfig {
    /// Defaults overridden by `CXX` and `CXXFLAGS`.
    pub fn from_env() -> Self {
        let mut config = ToolchainConfig::default();
        if let Ok(cxx) = std::env::var("CXX") {
            if !cxx.trim().is_empty() {
                config.cxx = cxx.trim().to_string();
            }
        }
        if let Ok(flags) = std::env::var("CXXFLAGS") {
            config.flags = split_flags(&flags);
        }
        config
    }
}

pub fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

// ── Build contract ──────────────────────────────────────────────────────────

/// Which symbols the built unit keeps visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub symbols: Vec<String>,
    /// Also export the unit's init symbol (see `init_symbol`). Some loaders
    /// refuse a unit that exports nothing, so an empty `symbols` list with
    /// this flag still yields a unit with one visible entry point.
    pub always_export_init_symbol: bool,
}

impl ExportOptions {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExportOptions {
            symbols: symbols.into_iter().map(Into::into).collect(),
            always_export_init_symbol: false,
        }
    }

    pub fn with_init_symbol(mut self) -> Self {
        self.always_export_init_symbol = true;
        self
    }

    /// Every symbol the unit must export for `module_name`.
    pub fn exported(&self, module_name: &str) -> Vec<String> {
        let mut out = self.symbols.clone();
        if self.always_export_init_symbol {
            let init = init_symbol(module_name);
            if !out.contains(&init) {
                out.push(init);
            }
        }
        out
    }

    fn restricts_visibility(&self) -> bool {
        !self.symbols.is_empty() || self.always_export_init_symbol
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Dotted module name; the last segment names the unit.
    pub module_name: String,
    pub target_dir: PathBuf,
    pub sources: Vec<PathBuf>,
    pub export: ExportOptions,
}

/// Produces a loadable unit from source files.
pub trait BuildService {
    fn build(&self, request: &BuildRequest) -> Result<PathBuf>;
}

/// Last segment of a dotted module name.
fn module_stem(module_name: &str) -> &str {
    module_name.rsplit('.').next().unwrap_or(module_name)
}

/// File name of the unit built for `module_name`, e.g. `libdemo.so`.
pub fn unit_file_name(module_name: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        module_stem(module_name),
        std::env::consts::DLL_SUFFIX
    )
}

/// Entry point exported when `always_export_init_symbol` is set.
pub fn init_symbol(module_name: &str) -> String {
    let stem: String = module_stem(module_name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("init_{stem}")
}

// ── C++ toolchain ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CxxToolchain {
    config: ToolchainConfig,
}

impl CxxToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        CxxToolchain { config }
    }

    /// First working compiler among the configured one, `g++` and `clang++`.
    pub fn detect(config: ToolchainConfig) -> Option<Self> {
        let candidates = [config.cxx.clone(), "g++".to_string(), "clang++".to_string()];
        for cxx in candidates {
            let ok = Command::new(&cxx)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            if ok {
                return Some(CxxToolchain::new(ToolchainConfig {
                    cxx,
                    flags: config.flags,
                }));
            }
        }
        None
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Compile a standalone program.
    pub fn compile_executable(&self, source: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.config.cxx);
        cmd.args(&self.config.flags).arg(source).arg("-o").arg(output);
        self.run(&source.display().to_string(), cmd)
    }

    fn run(&self, module: &str, mut cmd: Command) -> Result<()> {
        log::debug!("toolchain: {:?}", cmd);
        let output = cmd
            .output()
            .map_err(|e| Error::io(PathBuf::from(&self.config.cxx), e))?;
        if !output.status.success() {
            return Err(Error::BuildFailure {
                module: module.to_string(),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

impl BuildService for CxxToolchain {
    fn build(&self, request: &BuildRequest) -> Result<PathBuf> {
        let build_dir = request.target_dir.join("build");
        std::fs::create_dir_all(&build_dir).map_err(|e| Error::io(&build_dir, e))?;

        let file_name = unit_file_name(&request.module_name);
        let built = build_dir.join(&file_name);

        let mut cmd = Command::new(&self.config.cxx);
        cmd.args(&self.config.flags)
            .arg("-shared")
            .arg("-fPIC")
            .args(&request.sources);

        if request.export.always_export_init_symbol {
            let stub = build_dir.join(format!("{}_init.cpp", module_stem(&request.module_name)));
            let text = format!(
                "extern \"C\" int {}(void) {{ return 0; }}\n",
                init_symbol(&request.module_name)
            );
            std::fs::write(&stub, text).map_err(|e| Error::io(&stub, e))?;
            cmd.arg(&stub);
        }

        if request.export.restricts_visibility() {
            let symbols = request.export.exported(&request.module_name);
            if let Some(arg) = export_list_arg(&build_dir, &symbols)? {
                cmd.arg(arg);
            }
        }

        cmd.arg("-o").arg(&built);
        self.run(&request.module_name, cmd)?;

        let target = request.target_dir.join(&file_name);
        if target.is_file() {
            std::fs::remove_file(&target).map_err(|e| Error::io(&target, e))?;
        }
        std::fs::copy(&built, &target).map_err(|e| Error::io(&target, e))?;

        log::debug!("built {} -> {}", request.module_name, target.display());
        Ok(target)
    }
}

/// Write the platform's export list and return the linker argument using it.
#[cfg(target_os = "macos")]
fn export_list_arg(build_dir: &Path, symbols: &[String]) -> Result<Option<String>> {
    let path = build_dir.join("exports.txt");
    let mut text = String::new();
    for symbol in symbols {
        let _ = writeln!(text, "_{symbol}");
    }
    std::fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
    Ok(Some(format!("-Wl,-exported_symbols_list,{}", path.display())))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn export_list_arg(build_dir: &Path, symbols: &[String]) -> Result<Option<String>> {
    let path = build_dir.join("exports.map");
    let mut text = String::from("{\n  global:\n");
    for symbol in symbols {
        let _ = writeln!(text, "    {symbol};");
    }
    text.push_str("  local: *;\n};\n");
    std::fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
    Ok(Some(format!("-Wl,--version-script={}", path.display())))
}

#[cfg(not(unix))]
fn export_list_arg(_build_dir: &Path, _symbols: &[String]) -> Result<Option<String>> {
    Ok(None)
}
