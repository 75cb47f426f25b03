//! Compiles the shaders shipped in the repository's `shaders/` directory.

use std::path::PathBuf;

use wrap_shader::{ShaderCompiler, spirv_path};

fn shader_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../shaders")
}

#[test]
fn test_engine_shaders_compile() {
    let compiler = ShaderCompiler::new(shader_dir());
    for name in ["shader.vert", "shader.frag"] {
        let words = compiler
            .compile_file(&shader_dir().join(name))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(words[0], 0x0723_0203, "{name} is not SPIR-V");
    }
}

#[test]
fn test_engine_shaders_write_binaries() {
    let out = tempfile::tempdir().unwrap();
    let compiler = ShaderCompiler::new(shader_dir());

    let source = shader_dir().join("shader.vert");
    let dest = spirv_path(out.path(), &source);
    assert!(compiler.compile(&source, &dest));

    let bytes = std::fs::read(&dest).unwrap();
    assert_eq!(bytes.len() % 4, 0);
    assert_eq!(&bytes[..4], &0x0723_0203u32.to_le_bytes());
}
