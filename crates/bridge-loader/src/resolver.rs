use std::sync::Mutex;

use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};

use crate::catalog::ModuleCatalog;

/// Resolves rhai `import` statements against a bundle's flattened module
/// catalog, falling back to rhai's default file resolver for anything the
/// bundle didn't declare (e.g. a relative import resolved against another
/// already-loaded module's own path).
pub struct BundleResolver {
    catalog: ModuleCatalog,
    cache: Mutex<std::collections::HashMap<String, Shared<Module>>>,
    fallback: rhai::module_resolvers::FileModuleResolver,
}

impl BundleResolver {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            catalog,
            cache: Mutex::new(std::collections::HashMap::new()),
            fallback: rhai::module_resolvers::FileModuleResolver::new(),
        }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Resolves and compiles `dotted_name` into a `Shared<Module>`, caching
    /// the result so repeated imports of the same module share one instance.
    pub fn load(
        &self,
        engine: &Engine,
        dotted_name: &str,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        if let Some(cached) = self.cache.lock().unwrap().get(dotted_name) {
            return Ok(cached.clone());
        }

        let entry = self.catalog.get(dotted_name).ok_or_else(|| {
            Box::new(EvalAltResult::ErrorModuleNotFound(
                dotted_name.to_string(),
                Position::NONE,
            ))
        })?;

        let mut ast = engine.compile(&entry.source).map_err(|err| {
            Box::new(EvalAltResult::ErrorInFunctionCall(
                dotted_name.to_string(),
                entry.path.clone(),
                Box::new(EvalAltResult::ErrorSystem(
                    format!("failed to compile module `{dotted_name}`"),
                    Box::new(err),
                )),
                Position::NONE,
            ))
        })?;
        ast.set_source(entry.path.clone());

        let mut scope = Scope::new();
        let module = Module::eval_ast_as_new(scope.clone(), &ast, engine)?;
        scope.clear();

        let shared: Shared<Module> = module.into();
        self.cache
            .lock()
            .unwrap()
            .insert(dotted_name.to_string(), shared.clone());
        Ok(shared)
    }

    /// Converts a resolver `path` (as rhai presents it to `resolve`, which
    /// may be dotted or slash-separated depending on import syntax) plus an
    /// optional `source` (the importing module's own dotted name) into the
    /// catalog's canonical dotted form.
    fn qualify(source: Option<&str>, path: &str) -> String {
        let normalized = path.replace('/', ".").replace("\\", ".");
        if let Some(stripped) = normalized.strip_prefix("./") {
            return match source {
                Some(src) => format!("{}.{}", parent(src), stripped),
                None => stripped.to_string(),
            };
        }
        normalized
    }
}

fn parent(dotted: &str) -> &str {
    match dotted.rfind('.') {
        Some(idx) => &dotted[..idx],
        None => "",
    }
}

impl ModuleResolver for BundleResolver {
    fn resolve(
        &self,
        engine: &Engine,
        source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        let dotted = Self::qualify(source, path);

        if self.catalog.contains(&dotted) {
            return self.load(engine, &dotted);
        }

        // Walk up the dotted prefix in case `path` names a submodule one
        // level too deep for an exact hit (e.g. a package importing a
        // sibling by its short name rather than fully qualified).
        if let Some(parent_source) = source {
            let candidate = format!("{}.{}", parent(parent_source), path.replace('/', "."));
            if self.catalog.contains(&candidate) {
                return self.load(engine, &candidate);
            }
        }

        self.fallback.resolve(engine, source, path, pos)
    }
}
