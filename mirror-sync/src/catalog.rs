//! Task catalog: software manifests → a list of uniquely identified tasks.
//!
//! References are rendered once here; workers never re-resolve them.

use std::collections::HashMap;
use std::path::Path;

use mirror_core::manifest::load_manifest;
use mirror_core::template::TemplateVars;
use mirror_core::{ArtifactId, ArtifactKind, ArtifactSpec, ConfigError, Task};

/// Identity of a resolved spec: the package, plus `:<tag>` or `@<digest>`
/// for images.
pub fn identity(spec: &ArtifactSpec) -> ArtifactId {
    if spec.kind == ArtifactKind::Image {
        if let Some(tag) = &spec.tag {
            return ArtifactId(format!("{}:{tag}", spec.package));
        }
        if let Some(digest) = &spec.digest {
            return ArtifactId(format!("{}@{digest}", spec.package));
        }
    }
    ArtifactId(spec.package.clone())
}

fn resolve(mut spec: ArtifactSpec, vars: &TemplateVars) -> Result<ArtifactSpec, ConfigError> {
    spec.package = vars.render(&spec.package)?;
    if let Some(url) = spec.url.take() {
        spec.url = Some(vars.render(&url)?);
    }
    if let Some(tag) = spec.tag.take() {
        spec.tag = Some(vars.render(&tag)?);
    }
    if let Some(version) = spec.version.take() {
        spec.version = Some(vars.render(&version)?);
    }
    Ok(spec)
}

/// Resolve `(software, spec)` entries into tasks.
///
/// Entries that resolve to an identical task are dropped with a warning;
/// entries that share an identity but differ are rejected.
pub fn build_tasks<I>(entries: I, vars: &TemplateVars) -> Result<Vec<Task>, ConfigError>
where
    I: IntoIterator<Item = (String, ArtifactSpec)>,
{
    let mut tasks: Vec<Task> = Vec::new();
    let mut seen: HashMap<ArtifactId, usize> = HashMap::new();

    for (software, spec) in entries {
        let spec = resolve(spec, vars)?;
        let id = identity(&spec);
        if let Some(&idx) = seen.get(&id) {
            if tasks[idx].spec == spec {
                tracing::warn!("duplicate task '{id}' from '{software}' ignored");
                continue;
            }
            return Err(ConfigError::DuplicateTask(id.0));
        }
        seen.insert(id.clone(), tasks.len());
        tasks.push(Task { id, software, spec });
    }
    Ok(tasks)
}

/// Load every manifest named in `softwares` from `dir` and build the tasks.
pub fn load_tasks(
    dir: &Path,
    softwares: &[String],
    vars: &TemplateVars,
) -> Result<Vec<Task>, ConfigError> {
    let mut entries = Vec::new();
    for software in softwares {
        for spec in load_manifest(dir, software)? {
            entries.push((software.clone(), spec));
        }
    }
    build_tasks(entries, vars)
}
