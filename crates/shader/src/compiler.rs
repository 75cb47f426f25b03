//! GLSL to SPIR-V compilation at runtime.
//!
//! Sources go through a small preprocessing step before naga sees them:
//! a UTF-8 byte-order mark is stripped and `#include <name>` lines are
//! replaced by the named file from the include directory, repeatedly, until
//! none remain. naga then parses, validates and emits SPIR-V 1.3.

use std::path::{Path, PathBuf};

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use tracing::{debug, error, info};

use crate::error::{ShaderError, ShaderResult};

/// Substitution passes allowed before includes are considered cyclic.
pub const MAX_INCLUDE_DEPTH: usize = 16;

const BOM: char = '\u{feff}';

/// Shader stage, inferred from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderKind {
    /// Maps `.vert .frag .comp .geom .tesc .tese` to a stage.
    pub fn from_path(path: &Path) -> ShaderResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::trim);

        match extension {
            Some("vert") => Ok(Self::Vertex),
            Some("frag") => Ok(Self::Fragment),
            Some("comp") => Ok(Self::Compute),
            Some("geom") => Ok(Self::Geometry),
            Some("tesc") => Ok(Self::TessControl),
            Some("tese") => Ok(Self::TessEvaluation),
            _ => Err(ShaderError::UnknownStage(path.to_path_buf())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
            Self::Geometry => "geometry",
            Self::TessControl => "tessellation control",
            Self::TessEvaluation => "tessellation evaluation",
        }
    }

    fn naga_stage(self) -> ShaderResult<naga::ShaderStage> {
        match self {
            Self::Vertex => Ok(naga::ShaderStage::Vertex),
            Self::Fragment => Ok(naga::ShaderStage::Fragment),
            Self::Compute => Ok(naga::ShaderStage::Compute),
            Self::Geometry | Self::TessControl | Self::TessEvaluation => {
                Err(ShaderError::UnsupportedStage(self.name()))
            }
        }
    }
}

impl std::fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Removes a leading UTF-8 byte-order mark.
pub fn strip_bom(source: &str) -> &str {
    source.strip_prefix(BOM).unwrap_or(source)
}

/// Name inside `#include <name>` or `#include "name"`, if `line` is one.
fn include_target(line: &str) -> Option<ShaderResult<&str>> {
    let rest = line.trim_start().strip_prefix("#include")?;
    let rest = rest.trim();

    let name = rest
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .or_else(|| rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
        .map(str::trim)
        .filter(|name| !name.is_empty());

    Some(name.ok_or_else(|| ShaderError::Parse {
        name: "include".to_string(),
        message: format!("Malformed include directive: {}", line.trim()),
    }))
}

/// Replaces every include line with the named file from `include_dir`.
///
/// Included files may include others. Fails with
/// [`ShaderError::IncludeTooDeep`] after [`MAX_INCLUDE_DEPTH`] passes.
pub fn resolve_includes(source: &str, include_dir: &Path) -> ShaderResult<String> {
    let mut code = strip_bom(source).to_string();

    for _ in 0..MAX_INCLUDE_DEPTH {
        let mut expanded = String::with_capacity(code.len());
        let mut substituted = false;

        for line in code.lines() {
            match include_target(line) {
                Some(target) => {
                    let name = target?;
                    let path = include_dir.join(name);
                    let text = std::fs::read_to_string(&path).map_err(|_| {
                        ShaderError::IncludeNotFound {
                            name: name.to_string(),
                            path: path.clone(),
                        }
                    })?;
                    debug!("Resolved include <{}> from {:?}", name, path);
                    expanded.push_str(strip_bom(&text));
                    substituted = true;
                }
                None => expanded.push_str(line),
            }
            expanded.push('\n');
        }

        if !substituted {
            return Ok(code);
        }
        code = expanded;
    }

    Err(ShaderError::IncludeTooDeep(MAX_INCLUDE_DEPTH))
}

/// Compiles GLSL files to SPIR-V.
#[derive(Clone, Debug)]
pub struct ShaderCompiler {
    include_dir: PathBuf,
}

impl ShaderCompiler {
    /// `include_dir` is where `#include <name>` looks up `name`.
    pub fn new(include_dir: impl Into<PathBuf>) -> Self {
        Self {
            include_dir: include_dir.into(),
        }
    }

    pub fn include_dir(&self) -> &Path {
        &self.include_dir
    }

    /// Compiles in-memory GLSL. `name` only labels diagnostics.
    pub fn compile_source(&self, kind: ShaderKind, source: &str, name: &str) -> ShaderResult<Vec<u32>> {
        let stage = kind.naga_stage()?;
        let source = resolve_includes(source, &self.include_dir)?;

        let module = glsl::Frontend::default()
            .parse(&glsl::Options::from(stage), &source)
            .map_err(|e| ShaderError::Parse {
                name: name.to_string(),
                message: format!("{e:?}"),
            })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| ShaderError::Validation {
                name: name.to_string(),
                message: format!("{e:?}"),
            })?;

        let mut options = spv::Options {
            lang_version: (1, 3),
            ..Default::default()
        };
        // Projection matrices already account for Vulkan's clip space.
        options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);

        spv::write_vec(&module, &info, &options, None).map_err(|e| ShaderError::Codegen {
            name: name.to_string(),
            message: format!("{e:?}"),
        })
    }

    /// Reads and compiles `source_path`, returning SPIR-V words.
    pub fn compile_file(&self, source_path: &Path) -> ShaderResult<Vec<u32>> {
        let kind = ShaderKind::from_path(source_path)?;
        let source = std::fs::read_to_string(source_path).map_err(|source| ShaderError::Io {
            path: source_path.to_path_buf(),
            source,
        })?;

        self.compile_source(kind, &source, &source_path.display().to_string())
    }

    /// Compiles `source_path` and writes the SPIR-V binary to `dest_path`.
    ///
    /// Nothing is written when compilation fails, so an existing binary at
    /// `dest_path` stays valid.
    pub fn compile_to(&self, source_path: &Path, dest_path: &Path) -> ShaderResult<()> {
        let words = self.compile_file(source_path)?;
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();

        if let Some(parent) = dest_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ShaderError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(dest_path, &bytes).map_err(|source| ShaderError::Io {
            path: dest_path.to_path_buf(),
            source,
        })?;

        info!(
            "Compiled {:?} -> {:?} ({} bytes)",
            source_path,
            dest_path,
            bytes.len()
        );
        Ok(())
    }

    /// Like [`compile_to`](Self::compile_to) but logs the failure and
    /// returns whether the binary was written.
    pub fn compile(&self, source_path: &Path, dest_path: &Path) -> bool {
        match self.compile_to(source_path, dest_path) {
            Ok(()) => true,
            Err(e) => {
                error!("Shader compilation failed: {}", e);
                false
            }
        }
    }
}

/// Binary path for a source file: `<output_dir>/<file name>.spv`.
pub fn spirv_path(output_dir: &Path, source_path: &Path) -> PathBuf {
    let mut name = source_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".spv");
    output_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 450
layout(location = 0) in vec2 inPosition;
layout(location = 1) in vec3 inColor;
layout(location = 0) out vec3 fragColor;

void main() {
    gl_Position = vec4(inPosition, 0.0, 1.0);
    fragColor = inColor;
}
";

    const FRAGMENT: &str = "#version 450
layout(location = 0) in vec3 fragColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(fragColor, 1.0);
}
";

    #[test]
    fn test_kind_from_extension() {
        let cases = [
            ("a.vert", ShaderKind::Vertex),
            ("a.frag", ShaderKind::Fragment),
            ("a.comp", ShaderKind::Compute),
            ("a.geom", ShaderKind::Geometry),
            ("a.tesc", ShaderKind::TessControl),
            ("dir/a.tese", ShaderKind::TessEvaluation),
        ];
        for (path, kind) in cases {
            assert_eq!(ShaderKind::from_path(Path::new(path)).unwrap(), kind);
        }

        assert!(matches!(
            ShaderKind::from_path(Path::new("a.glsl")),
            Err(ShaderError::UnknownStage(_))
        ));
        assert!(ShaderKind::from_path(Path::new("vert")).is_err());
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{feff}#version 450"), "#version 450");
        assert_eq!(strip_bom("#version 450"), "#version 450");
    }

    #[test]
    fn test_nested_includes_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outer.glsl"), "// outer\n#include <inner.glsl>\n").unwrap();
        std::fs::write(dir.path().join("inner.glsl"), "\u{feff}const float K = 2.0;\n").unwrap();

        let source = "#version 450\n#include <outer.glsl>\nvoid main() {}\n";
        let resolved = resolve_includes(source, dir.path()).unwrap();

        assert!(!resolved.contains("#include"));
        assert!(resolved.contains("// outer"));
        assert!(resolved.contains("const float K = 2.0;"));
        assert!(!resolved.contains('\u{feff}'));
        assert!(resolved.starts_with("#version 450"));
    }

    #[test]
    fn test_quoted_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.glsl"), "// a\n").unwrap();

        let resolved = resolve_includes("#include \"a.glsl\"\n", dir.path()).unwrap();
        assert_eq!(resolved, "// a\n\n");
    }

    #[test]
    fn test_missing_and_cyclic_includes() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_includes("#include <nope.glsl>\n", dir.path()).unwrap_err();
        assert!(matches!(err, ShaderError::IncludeNotFound { ref name, .. } if name == "nope.glsl"));

        std::fs::write(dir.path().join("self.glsl"), "#include <self.glsl>\n").unwrap();
        let err = resolve_includes("#include <self.glsl>\n", dir.path()).unwrap_err();
        assert!(matches!(err, ShaderError::IncludeTooDeep(MAX_INCLUDE_DEPTH)));

        let err = resolve_includes("#include <>\n", dir.path()).unwrap_err();
        assert!(matches!(err, ShaderError::Parse { .. }));
    }

    #[test]
    fn test_compile_vertex_and_fragment() {
        let compiler = ShaderCompiler::new(".");
        for (kind, source) in [(ShaderKind::Vertex, VERTEX), (ShaderKind::Fragment, FRAGMENT)] {
            let words = compiler.compile_source(kind, source, "test").unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }

    #[test]
    fn test_unsupported_stage_is_rejected() {
        let compiler = ShaderCompiler::new(".");
        let err = compiler
            .compile_source(ShaderKind::Geometry, VERTEX, "test.geom")
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnsupportedStage("geometry")));
    }

    #[test]
    fn test_compile_writes_binary() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shader.frag");
        std::fs::write(&source, format!("\u{feff}{FRAGMENT}")).unwrap();
        let dest = spirv_path(&dir.path().join("out"), &source);

        assert!(ShaderCompiler::new(dir.path()).compile(&source, &dest));

        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[..4], &0x0723_0203u32.to_le_bytes());
    }

    #[test]
    fn test_failed_compile_leaves_previous_binary() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.vert");
        std::fs::write(&source, "#version 450\nvoid main() { undefined_call(); }\n").unwrap();
        let dest = dir.path().join("broken.vert.spv");
        std::fs::write(&dest, b"previous").unwrap();

        assert!(!ShaderCompiler::new(dir.path()).compile(&source, &dest));
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");

        let fresh = dir.path().join("never.vert.spv");
        assert!(!ShaderCompiler::new(dir.path()).compile(&source, &fresh));
        assert!(!fresh.exists());
    }

    #[test]
    fn test_spirv_path() {
        let path = spirv_path(Path::new("target/shaders"), Path::new("shaders/shader.vert"));
        assert_eq!(path, Path::new("target/shaders/shader.vert.spv"));
    }
}
