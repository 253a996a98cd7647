//! Definition Catalog
//!
//! Loads objective and group definitions from TOML files and resolves the
//! id references between them into definition trees.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::condition::ConditionSpec;
use super::definition::{Definition, Objective, ObjectiveGroup, RawDefinitionFile, RawGroup, RawObjective};
use crate::error::{ObjectiveError, Result};

/// Every definition found under a data directory
#[derive(Debug, Clone, Default)]
pub struct DefinitionCatalog {
    definitions: HashMap<String, Definition>,
    /// Ids not listed as anyone's child, sorted
    roots: Vec<String>,
}

impl DefinitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` under `<data_dir>/objectives`, recursively
    pub fn load_from_directory(data_dir: &Path) -> Result<Self> {
        let objectives_dir = data_dir.join("objectives");
        info!("Loading objectives from {:?}", objectives_dir);

        if !objectives_dir.exists() {
            warn!("Objectives directory does not exist: {:?}", objectives_dir);
            return Ok(Self::new());
        }

        let mut paths = Vec::new();
        collect_toml_files(&objectives_dir, &mut paths)?;
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|source| ObjectiveError::Io {
                path: path.clone(),
                source,
            })?;
            let file: RawDefinitionFile = toml::from_str(&content).map_err(|e| ObjectiveError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
            files.push(file);
        }

        let catalog = Self::from_raw_files(files)?;
        info!(
            "Loaded {} objective definitions ({} roots)",
            catalog.len(),
            catalog.roots.len()
        );
        Ok(catalog)
    }

    /// Build a catalog from a single TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: RawDefinitionFile = toml::from_str(content).map_err(|e| ObjectiveError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        Self::from_raw_files(vec![file])
    }

    pub fn from_raw_files(files: Vec<RawDefinitionFile>) -> Result<Self> {
        let mut objectives: HashMap<String, RawObjective> = HashMap::new();
        let mut groups: HashMap<String, RawGroup> = HashMap::new();

        for file in files {
            for (id, raw) in file.objective {
                if objectives.contains_key(&id) || groups.contains_key(&id) {
                    return Err(ObjectiveError::DuplicateId(id));
                }
                objectives.insert(id, raw);
            }
            for (id, raw) in file.group {
                if objectives.contains_key(&id) || groups.contains_key(&id) {
                    return Err(ObjectiveError::DuplicateId(id));
                }
                groups.insert(id, raw);
            }
        }

        // Each definition may have at most one parent
        let mut group_ids: Vec<&String> = groups.keys().collect();
        group_ids.sort();
        let mut parents: HashMap<&str, &str> = HashMap::new();
        for group_id in &group_ids {
            for child in &groups[*group_id].children {
                if let Some(first) = parents.insert(child.as_str(), group_id.as_str()) {
                    return Err(ObjectiveError::MultipleParents {
                        child: child.clone(),
                        first: first.to_string(),
                        second: group_id.to_string(),
                    });
                }
            }
        }

        let mut resolver = Resolver {
            objectives: &objectives,
            groups: &groups,
            built: HashMap::new(),
            visiting: HashSet::new(),
        };
        let mut all_ids: Vec<&String> = objectives.keys().chain(groups.keys()).collect();
        all_ids.sort();
        for id in &all_ids {
            resolver.build(id)?;
        }
        let definitions = resolver.built;

        for (id, raw) in &objectives {
            if let Some(ref condition) = raw.condition {
                warn_unknown_targets(id, condition, &definitions);
            }
        }

        let roots = all_ids
            .into_iter()
            .filter(|id| !parents.contains_key(id.as_str()))
            .cloned()
            .collect();

        Ok(Self { definitions, roots })
    }

    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.definitions.get(id)
    }

    /// Top-level definitions, in id order
    pub fn roots(&self) -> Vec<Definition> {
        self.roots
            .iter()
            .filter_map(|id| self.definitions.get(id))
            .cloned()
            .collect()
    }

    pub fn root_ids(&self) -> &[String] {
        &self.roots
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.definitions.keys()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Recursively collect `.toml` files
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|source| ObjectiveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| ObjectiveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn warn_unknown_targets(id: &str, condition: &ConditionSpec, definitions: &HashMap<String, Definition>) {
    for target in condition.targets() {
        if !definitions.contains_key(target) {
            warn!(
                "Objective '{}' condition references non-existent definition '{}'",
                id, target
            );
        }
    }
}

/// Depth-first resolution of raw tables into shared definitions
struct Resolver<'a> {
    objectives: &'a HashMap<String, RawObjective>,
    groups: &'a HashMap<String, RawGroup>,
    built: HashMap<String, Definition>,
    visiting: HashSet<String>,
}

impl Resolver<'_> {
    fn build(&mut self, id: &str) -> Result<Definition> {
        if let Some(definition) = self.built.get(id) {
            return Ok(definition.clone());
        }

        let (objectives, groups) = (self.objectives, self.groups);
        let definition: Definition = if let Some(raw) = objectives.get(id) {
            Objective::from_raw(id, raw)?.into()
        } else {
            let raw = &groups[id];
            if !self.visiting.insert(id.to_string()) {
                return Err(ObjectiveError::Cycle(id.to_string()));
            }

            let mut children = Vec::with_capacity(raw.children.len());
            for child in &raw.children {
                if !objectives.contains_key(child) && !groups.contains_key(child) {
                    return Err(ObjectiveError::UnknownChild {
                        group: id.to_string(),
                        child: child.clone(),
                    });
                }
                children.push(self.build(child)?);
            }

            self.visiting.remove(id);
            ObjectiveGroup::from_raw(id, raw, children)?.into()
        };

        self.built.insert(id.to_string(), definition.clone());
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_objectives_toml() -> &'static str {
        r#"
[objective.kill_slimes]
name = "Cull the slimes"
successes = 3

[objective.talk_elder]
description = "Report back to the village elder"

[objective.find_shortcut]
optional = true
condition = { kind = "flag", name = "shortcut_found" }

[group.first_hunt]
sequential = true
children = ["kill_slimes", "side_paths", "talk_elder"]

[group.side_paths]
require_all = false
fail_on_child_failure = false
children = ["find_shortcut"]
"#
    }

    #[test]
    fn test_resolves_tree() {
        let catalog = DefinitionCatalog::from_toml(create_test_objectives_toml()).unwrap();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.root_ids(), ["first_hunt".to_string()]);

        let root = &catalog.roots()[0];
        assert_eq!(
            root.descendant_ids(),
            vec!["first_hunt", "kill_slimes", "side_paths", "find_shortcut", "talk_elder"]
        );

        match catalog.get("side_paths") {
            Some(Definition::Group(group)) => {
                assert!(!group.require_all_children);
                assert!(!group.fail_on_child_failure);
                assert!(!group.sequential_children);
            }
            other => panic!("unexpected definition {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_child() {
        let result = DefinitionCatalog::from_toml(
            r#"
[group.broken]
children = ["missing"]
"#,
        );
        match result {
            Err(ObjectiveError::UnknownChild { group, child }) => {
                assert_eq!(group, "broken");
                assert_eq!(child, "missing");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_rejects_cycle() {
        let result = DefinitionCatalog::from_toml(
            r#"
[group.a]
children = ["b"]

[group.b]
children = ["a"]
"#,
        );
        assert!(matches!(result, Err(ObjectiveError::Cycle(_))));
    }

    #[test]
    fn test_rejects_second_parent() {
        let result = DefinitionCatalog::from_toml(
            r#"
[objective.shared]

[group.a]
children = ["shared"]

[group.b]
children = ["shared"]
"#,
        );
        assert!(matches!(result, Err(ObjectiveError::MultipleParents { .. })));
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let result = DefinitionCatalog::from_toml("[objective.none]\nsuccesses = 0\n");
        assert!(matches!(result, Err(ObjectiveError::InvalidThreshold(_))));
    }

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        let objectives_dir = temp_dir.path().join("objectives");
        std::fs::create_dir_all(objectives_dir.join("chapter_one")).unwrap();

        std::fs::write(
            objectives_dir.join("chapter_one").join("hunt.toml"),
            create_test_objectives_toml(),
        )
        .unwrap();
        std::fs::write(
            objectives_dir.join("daily.toml"),
            "[objective.daily_login]\nsuccesses = 1\n",
        )
        .unwrap();
        std::fs::write(objectives_dir.join("notes.txt"), "not a definition").unwrap();

        let catalog = DefinitionCatalog::load_from_directory(temp_dir.path()).unwrap();
        assert_eq!(catalog.len(), 6);
        assert_eq!(
            catalog.root_ids(),
            ["daily_login".to_string(), "first_hunt".to_string()]
        );
    }

    #[test]
    fn test_duplicate_ids_across_files() {
        let temp_dir = TempDir::new().unwrap();
        let objectives_dir = temp_dir.path().join("objectives");
        std::fs::create_dir_all(&objectives_dir).unwrap();
        std::fs::write(objectives_dir.join("a.toml"), "[objective.same]\n").unwrap();
        std::fs::write(objectives_dir.join("b.toml"), "[group.same]\n").unwrap();

        assert!(matches!(
            DefinitionCatalog::load_from_directory(temp_dir.path()),
            Err(ObjectiveError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = DefinitionCatalog::load_from_directory(temp_dir.path()).unwrap();
        assert!(catalog.is_empty());
    }
}
