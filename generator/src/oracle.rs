// oracle.rs - Size oracle for target-system scalars
//
// The byte size of C scalars depends on the compiler and platform the
// generated code is built for, so it is measured rather than assumed. The
// measuring program prints a JSON array of
// `[type_name, signage, numeric_kind, byte_size]` entries.
//
// Failure modes: a build failure or an unparsable report produces an error.
// Side effects: `ProgramSizeOracle` compiles and runs a program in its work
//               directory.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::toolchain::CxxToolchain;
use crate::typemap::{NumericKind, Signage, LONG_DOUBLE_SIZE};

/// A target scalar whose size must be measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarRequest {
    pub name: String,
    pub signage: Signage,
    pub kind: NumericKind,
}

/// One report entry: `[type_name, signage, numeric_kind, byte_size]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredScalar(pub String, pub Signage, pub NumericKind, pub usize);

pub trait SizeOracle {
    fn measure(&self, requests: &[ScalarRequest]) -> Result<Vec<MeasuredScalar>>;
}

/// Parse the JSON report printed by the size program.
pub fn parse_report(text: &str) -> Result<Vec<MeasuredScalar>> {
    serde_json::from_str(text).map_err(|e| Error::OracleFailure {
        message: format!("malformed report: {e}"),
    })
}

/// Render the C++ program that prints the size report for `requests`.
pub fn render_size_program(requests: &[ScalarRequest]) -> String {
    let mut out = String::with_capacity(256 + requests.len() * 96);
    out.push_str("#include <cstdio>\n\nint main() {\n    std::printf(\"[\\n\");\n");
    for (i, r) in requests.iter().enumerate() {
        let sep = if i + 1 == requests.len() { "" } else { "," };
        let _ = writeln!(
            out,
            "    std::printf(\"  [\\\"{}\\\", \\\"{}\\\", \\\"{}\\\", %zu]{}\\n\", sizeof({}));",
            r.name,
            r.signage.as_str(),
            r.kind.as_str(),
            sep,
            r.name
        );
    }
    out.push_str("    std::printf(\"]\\n\");\n    return 0;\n}\n");
    out
}

// ── Program oracle ──────────────────────────────────────────────────────────

/// Measures sizes by compiling and running the size program.
pub struct ProgramSizeOracle {
    toolchain: CxxToolchain,
    work_dir: PathBuf,
}

impl ProgramSizeOracle {
    pub fn new(toolchain: CxxToolchain, work_dir: impl Into<PathBuf>) -> Self {
        ProgramSizeOracle {
            toolchain,
            work_dir: work_dir.into(),
        }
    }
}

impl SizeOracle for ProgramSizeOracle {
    fn measure(&self, requests: &[ScalarRequest]) -> Result<Vec<MeasuredScalar>> {
        std::fs::create_dir_all(&self.work_dir).map_err(|e| Error::io(&self.work_dir, e))?;

        let source = self.work_dir.join("sizeof.cpp");
        std::fs::write(&source, render_size_program(requests)).map_err(|e| Error::io(&source, e))?;

        let program = self
            .work_dir
            .join(format!("sizeof{}", std::env::consts::EXE_SUFFIX));
        self.toolchain.compile_executable(&source, &program)?;

        log::debug!("running size program {}", program.display());
        let output = Command::new(&program)
            .output()
            .map_err(|e| Error::io(&program, e))?;
        if !output.status.success() {
            return Err(Error::OracleFailure {
                message: format!("size program exited with {}", output.status),
            });
        }

        parse_report(&String::from_utf8_lossy(&output.stdout))
    }
}

// ── Native oracle ───────────────────────────────────────────────────────────

/// Reports the sizes of the platform this generator runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSizeOracle;

fn native_size(name: &str) -> Option<usize> {
    use std::ffi::{c_char, c_int, c_longlong, c_short, c_uchar, c_uint, c_ulonglong, c_ushort};
    use std::mem::size_of;

    let size = match name {
        "char" => size_of::<c_char>(),
        "float" => size_of::<f32>(),
        "double" => size_of::<f64>(),
        "int" => size_of::<c_int>(),
        "long double" => LONG_DOUBLE_SIZE,
        "short" => size_of::<c_short>(),
        "long long" => size_of::<c_longlong>(),
        "unsigned char" => size_of::<c_uchar>(),
        "unsigned int" => size_of::<c_uint>(),
        "unsigned long long" => size_of::<c_ulonglong>(),
        "unsigned short" => size_of::<c_ushort>(),
        _ => return None,
    };
    Some(size)
}

impl SizeOracle for NativeSizeOracle {
    fn measure(&self, requests: &[ScalarRequest]) -> Result<Vec<MeasuredScalar>> {
        requests
            .iter()
            .map(|r| {
                let size = native_size(&r.name).ok_or_else(|| Error::OracleFailure {
                    message: format!("no native size for '{}'", r.name),
                })?;
                Ok(MeasuredScalar(r.name.clone(), r.signage, r.kind, size))
            })
            .collect()
    }
}

// ── Fixed oracle ────────────────────────────────────────────────────────────

/// Replays a stored report.
#[derive(Debug, Clone)]
pub struct FixedSizeOracle {
    entries: Vec<MeasuredScalar>,
}

impl FixedSizeOracle {
    pub fn new(entries: Vec<MeasuredScalar>) -> Self {
        FixedSizeOracle { entries }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(FixedSizeOracle::new(parse_report(text)?))
    }
}

impl SizeOracle for FixedSizeOracle {
    fn measure(&self, _requests: &[ScalarRequest]) -> Result<Vec<MeasuredScalar>> {
        Ok(self.entries.clone())
    }
}
