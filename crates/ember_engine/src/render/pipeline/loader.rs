//! Loads pipeline and descriptor layout definitions from a directory
//!
//! Layout:
//!
//! ```text
//! <config_dir>/descriptor_layouts/*.toml | *.ron
//! <config_dir>/pipelines/*.toml | *.ron
//! ```
//!
//! The result is an explicit [`RenderConfig`] value that the renderer takes
//! by reference while building pipelines. Any malformed or inconsistent file
//! is an error naming the file and field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{self, ConfigError, ConfigFormat};
use super::definition::{DescriptorLayoutDefinition, PipelineDefinition, PipelineKind};

/// Subdirectory holding descriptor layout files
pub const LAYOUT_DIR: &str = "descriptor_layouts";
/// Subdirectory holding pipeline files
pub const PIPELINE_DIR: &str = "pipelines";

/// Validated pipeline and layout definitions
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    layouts: BTreeMap<String, DescriptorLayoutDefinition>,
    pipelines: BTreeMap<String, PipelineDefinition>,
}

impl RenderConfig {
    /// Load every definition under `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        log::debug!("Loading render configuration from {:?}", dir);

        let mut layouts = Vec::new();
        for path in definition_files(&dir.join(LAYOUT_DIR))? {
            let mut layout: DescriptorLayoutDefinition = config::load_file(&path)?;
            layout.source = path;
            layouts.push(layout);
        }

        let mut pipelines = Vec::new();
        for path in definition_files(&dir.join(PIPELINE_DIR))? {
            let pipeline: PipelineDefinition = config::load_file(&path)?;
            pipelines.push(pipeline.with_source(&path));
        }

        let config = Self::from_definitions(layouts, pipelines)?;
        log::info!(
            "Loaded {} descriptor layout(s) and {} pipeline(s)",
            config.layouts.len(),
            config.pipelines.len()
        );
        Ok(config)
    }

    /// Validate and index already-parsed definitions
    pub fn from_definitions(
        layouts: Vec<DescriptorLayoutDefinition>,
        pipelines: Vec<PipelineDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for mut layout in layouts {
            layout.validate()?;
            if config.layouts.contains_key(&layout.name) {
                return Err(ConfigError::Duplicate {
                    kind: "descriptor layout",
                    name: layout.name,
                    path: layout.source,
                });
            }
            config.layouts.insert(layout.name.clone(), layout);
        }

        for pipeline in pipelines {
            pipeline.validate()?;
            if !config.layouts.contains_key(&pipeline.descriptor_layout) {
                return Err(ConfigError::UnknownReference {
                    kind: "descriptor layout",
                    name: pipeline.descriptor_layout,
                    path: pipeline.source,
                });
            }
            if config.pipelines.contains_key(&pipeline.name) {
                return Err(ConfigError::Duplicate {
                    kind: "pipeline",
                    name: pipeline.name,
                    path: pipeline.source,
                });
            }
            config.pipelines.insert(pipeline.name.clone(), pipeline);
        }

        Ok(config)
    }

    /// Look up a pipeline definition by name
    pub fn pipeline(&self, name: &str) -> Result<&PipelineDefinition, ConfigError> {
        self.pipelines.get(name).ok_or_else(|| ConfigError::Missing {
            kind: "pipeline",
            name: name.to_string(),
        })
    }

    /// Look up a pipeline by name and check which pass it targets
    pub fn pipeline_of_kind(&self, name: &str, kind: PipelineKind) -> Result<&PipelineDefinition, ConfigError> {
        let pipeline = self.pipeline(name)?;
        if pipeline.kind != kind {
            return Err(ConfigError::InvalidField {
                path: pipeline.source.clone(),
                field: "kind".to_string(),
                reason: format!("pipeline `{name}` is {:?}, expected {:?}", pipeline.kind, kind),
            });
        }
        Ok(pipeline)
    }

    /// Look up a descriptor layout definition by name
    pub fn layout(&self, name: &str) -> Result<&DescriptorLayoutDefinition, ConfigError> {
        self.layouts.get(name).ok_or_else(|| ConfigError::Missing {
            kind: "descriptor layout",
            name: name.to_string(),
        })
    }

    /// Descriptor layout a pipeline binds
    pub fn layout_for(&self, pipeline: &PipelineDefinition) -> Result<&DescriptorLayoutDefinition, ConfigError> {
        self.layout(&pipeline.descriptor_layout)
    }

    /// All pipeline definitions, sorted by name
    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }
}

/// Definition files in `dir`, sorted for deterministic load order
fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ConfigError::Io { path: dir.to_path_buf(), source })?
            .path();
        if !path.is_file() {
            continue;
        }
        if ConfigFormat::from_path(&path).is_ok() {
            files.push(path);
        } else {
            log::debug!("Skipping non-configuration file {:?}", path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pipeline::definition::DescriptorKind;
    use std::fs;

    const LAYOUT: &str = r#"
name = "forward"

[[bindings]]
name = "material"
binding = 1
type = "uniform_buffer"
stages = ["fragment"]

[[bindings]]
name = "camera"
binding = 0
type = "uniform_buffer"
stages = ["vertex", "fragment"]
"#;

    const PIPELINE: &str = r#"
name = "forward"
kind = "forward"
vertex_shader = "forward.vert.spv"
fragment_shader = "forward.frag.spv"
descriptor_layout = "forward"

[[vertex_bindings]]
binding = 0
stride = 12

[[vertex_attributes]]
location = 0
binding = 0
format = "r32g32b32_sfloat"
offset = 0
"#;

    const SHADOW_RON: &str = r#"(
    name: "shadow",
    kind: shadow,
    vertex_shader: "shadow.vert.spv",
    descriptor_layout: "forward",
    vertex_bindings: [(binding: 0, stride: 12)],
    vertex_attributes: [(location: 0, binding: 0, format: r32g32b32_sfloat, offset: 0)],
)"#;

    fn write_tree(layout: &str, pipelines: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(LAYOUT_DIR)).unwrap();
        fs::create_dir_all(dir.path().join(PIPELINE_DIR)).unwrap();
        fs::write(dir.path().join(LAYOUT_DIR).join("forward.toml"), layout).unwrap();
        for (file, contents) in pipelines {
            fs::write(dir.path().join(PIPELINE_DIR).join(file), contents).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_dir_mixed_formats() {
        let dir = write_tree(LAYOUT, &[("forward.toml", PIPELINE), ("shadow.ron", SHADOW_RON)]);
        fs::write(dir.path().join(PIPELINE_DIR).join("README.md"), "ignored").unwrap();

        let config = RenderConfig::load_dir(dir.path()).unwrap();
        let forward = config.pipeline_of_kind("forward", PipelineKind::Forward).unwrap();
        let layout = config.layout_for(forward).unwrap();
        assert_eq!(layout.bindings[0].name, "camera");
        assert_eq!(layout.bindings[1].kind, DescriptorKind::UniformBuffer);

        let shadow = config.pipeline("shadow").unwrap();
        assert_eq!(shadow.kind, PipelineKind::Shadow);
        assert!(shadow.fragment_shader.is_none());
        assert_eq!(config.pipelines().count(), 2);
    }

    #[test]
    fn test_unknown_layout_reference() {
        let broken = PIPELINE.replace("descriptor_layout = \"forward\"", "descriptor_layout = \"missing\"");
        let dir = write_tree(LAYOUT, &[("forward.toml", &broken)]);

        match RenderConfig::load_dir(dir.path()).unwrap_err() {
            ConfigError::UnknownReference { name, path, .. } => {
                assert_eq!(name, "missing");
                assert!(path.ends_with("forward.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_descriptor_type_is_parse_error() {
        let broken = LAYOUT.replace("\"uniform_buffer\"\nstages = [\"fragment\"]", "\"storage_image\"\nstages = [\"fragment\"]");
        let dir = write_tree(&broken, &[]);

        match RenderConfig::load_dir(dir.path()).unwrap_err() {
            ConfigError::Parse { path, message } => {
                assert!(path.ends_with("forward.toml"));
                assert!(message.contains("storage_image"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_field_is_parse_error() {
        let broken = PIPELINE.replace("vertex_shader = \"forward.vert.spv\"\n", "");
        let dir = write_tree(LAYOUT, &[("forward.toml", &broken)]);
        match RenderConfig::load_dir(dir.path()).unwrap_err() {
            ConfigError::Parse { message, .. } => assert!(message.contains("vertex_shader")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_pipeline_names() {
        let dir = write_tree(LAYOUT, &[("a.toml", PIPELINE), ("b.toml", PIPELINE)]);
        assert!(matches!(
            RenderConfig::load_dir(dir.path()),
            Err(ConfigError::Duplicate { kind: "pipeline", .. })
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(RenderConfig::load_dir(dir.path()), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_wrong_kind_lookup() {
        let dir = write_tree(LAYOUT, &[("forward.toml", PIPELINE)]);
        let config = RenderConfig::load_dir(dir.path()).unwrap();
        assert!(config.pipeline_of_kind("forward", PipelineKind::Shadow).is_err());
        assert!(matches!(config.pipeline("nope"), Err(ConfigError::Missing { .. })));
    }
}
