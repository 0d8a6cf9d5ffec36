use std::collections::HashMap;

use crate::bundle::{Bundle, ModuleSpec, PackageSpec, INIT_MODULE_BASENAME};
use crate::error::LoaderError;

/// A single flattened catalog entry: decoded source plus the original
/// bundle path, keyed by the dotted module name (`pkg.sub.mod`).
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub path: String,
    pub source: String,
    pub is_package_init: bool,
}

/// The flattened view of a bundle's `Modules`/`Packages` tree used by the
/// import-hook resolver: one dotted name per entry, plus the list of
/// top-level package names that must be eagerly loaded before `__main__`.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    entries: HashMap<String, CatalogEntry>,
    top_level_packages: Vec<String>,
}

impl ModuleCatalog {
    /// Flattens a bundle's `Modules` and `Packages` trees into dotted-name
    /// entries. Every package is guaranteed an `__init__` entry, synthesized
    /// as empty source under a virtual path if the bundle didn't supply one.
    pub fn build(bundle: &Bundle) -> Result<Self, LoaderError> {
        let mut entries = HashMap::new();
        let mut top_level_packages = Vec::new();

        for module in &bundle.modules {
            insert_module(&mut entries, "", module, false)?;
        }

        for package in &bundle.packages {
            insert_package(&mut entries, "", package)?;
            top_level_packages.push(qualify("", &package.name));
        }

        Ok(Self {
            entries,
            top_level_packages,
        })
    }

    pub fn get(&self, dotted_name: &str) -> Option<&CatalogEntry> {
        self.entries.get(dotted_name)
    }

    pub fn contains(&self, dotted_name: &str) -> bool {
        self.entries.contains_key(dotted_name)
    }

    /// Top-level package names, in bundle order, that must be loaded before
    /// the entry module runs.
    pub fn top_level_packages(&self) -> &[String] {
        &self.top_level_packages
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn insert_module(
    entries: &mut HashMap<String, CatalogEntry>,
    prefix: &str,
    module: &ModuleSpec,
    is_package_init: bool,
) -> Result<(), LoaderError> {
    let dotted = qualify(prefix, &module.name);
    if entries.contains_key(&dotted) {
        return Err(LoaderError::DuplicateModule(dotted));
    }
    entries.insert(
        dotted,
        CatalogEntry {
            path: module.path.clone(),
            source: module.decode_source()?,
            is_package_init,
        },
    );
    Ok(())
}

fn insert_package(
    entries: &mut HashMap<String, CatalogEntry>,
    prefix: &str,
    package: &PackageSpec,
) -> Result<(), LoaderError> {
    let package_dotted = qualify(prefix, &package.name);

    let init_module = package
        .modules
        .iter()
        .find(|m| m.name == INIT_MODULE_BASENAME);

    match init_module {
        Some(init) => insert_module(entries, prefix, init, true)?,
        None => {
            // Synthesize an empty `__init__`, with a virtual directory path
            // derived from the package's own `Path` (edge case: the
            // package's declared `Path` need not end in an init filename).
            let virtual_path = format!(
                "{}/{}",
                package.path.trim_end_matches('/'),
                INIT_MODULE_BASENAME
            );
            entries.insert(
                package_dotted.clone(),
                CatalogEntry {
                    path: virtual_path,
                    source: String::new(),
                    is_package_init: true,
                },
            );
        }
    }

    for module in &package.modules {
        if module.name == INIT_MODULE_BASENAME {
            continue;
        }
        insert_module(entries, &package_dotted, module, false)?;
    }

    for nested in &package.packages {
        insert_package(entries, &package_dotted, nested)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn encode(source: &str) -> String {
        STANDARD.encode(source)
    }

    #[test]
    fn flattens_nested_packages_with_dotted_names() {
        let bundle = Bundle {
            program: ModuleSpec {
                name: "main".into(),
                path: "main.rhai".into(),
                source: encode("// entry"),
            },
            modules: vec![],
            packages: vec![PackageSpec {
                name: "pkg".into(),
                path: "pkg".into(),
                modules: vec![ModuleSpec {
                    name: "mod".into(),
                    path: "pkg/mod.rhai".into(),
                    source: encode("fn boom() { throw \"x\"; }"),
                }],
                packages: vec![],
            }],
            pipe_in: 3,
            pipe_out: 4,
            status_in: 5,
            kv_pairs: Default::default(),
            debug_port: None,
            break_on_start: None,
        };

        let catalog = ModuleCatalog::build(&bundle).unwrap();
        assert!(catalog.contains("pkg"));
        assert!(catalog.get("pkg").unwrap().is_package_init);
        assert!(catalog.contains("pkg.mod"));
        assert_eq!(catalog.get("pkg.mod").unwrap().path, "pkg/mod.rhai");
        assert_eq!(catalog.top_level_packages(), &["pkg".to_string()]);
    }

    #[test]
    fn synthesizes_empty_init_when_absent() {
        let bundle = Bundle {
            program: ModuleSpec {
                name: "main".into(),
                path: "main.rhai".into(),
                source: encode("// entry"),
            },
            modules: vec![],
            packages: vec![PackageSpec {
                name: "pkg".into(),
                path: "pkg".into(),
                modules: vec![],
                packages: vec![],
            }],
            pipe_in: 3,
            pipe_out: 4,
            status_in: 5,
            kv_pairs: Default::default(),
            debug_port: None,
            break_on_start: None,
        };

        let catalog = ModuleCatalog::build(&bundle).unwrap();
        let entry = catalog.get("pkg").unwrap();
        assert_eq!(entry.source, "");
        assert_eq!(entry.path, "pkg/__init__");
    }

    #[test]
    fn duplicate_module_names_are_rejected() {
        let bundle = Bundle {
            program: ModuleSpec {
                name: "main".into(),
                path: "main.rhai".into(),
                source: encode("// entry"),
            },
            modules: vec![
                ModuleSpec {
                    name: "dup".into(),
                    path: "a.rhai".into(),
                    source: encode("// a"),
                },
                ModuleSpec {
                    name: "dup".into(),
                    path: "b.rhai".into(),
                    source: encode("// b"),
                },
            ],
            packages: vec![],
            pipe_in: 3,
            pipe_out: 4,
            status_in: 5,
            kv_pairs: Default::default(),
            debug_port: None,
            break_on_start: None,
        };

        assert!(matches!(
            ModuleCatalog::build(&bundle),
            Err(LoaderError::DuplicateModule(_))
        ));
    }
}
