use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use bridge_transport::StatusRecord;

use crate::bundle::{Bundle, MAIN_MODULE_NAME};
use crate::catalog::ModuleCatalog;
use crate::error::LoaderError;
use crate::resolver::BundleResolver;

/// Writes one [`StatusRecord`] JSON line per call; used for both the
/// lifecycle `ok`/`exit` records and a terminal exception record.
pub struct StatusSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> StatusSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, record: &StatusRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).expect("StatusRecord always serializes");
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }
}

/// Builds a rhai `Engine` with the bundle's module resolver installed and
/// its `KVPairs` exposed in the returned `Scope`.
pub fn build_engine(bundle: &Bundle) -> Result<(Engine, Scope<'static>, BundleResolver), LoaderError> {
    let catalog = ModuleCatalog::build(bundle)?;
    let resolver = BundleResolver::new(catalog);

    let engine = Engine::new();

    let mut scope = Scope::new();
    for (key, value) in &bundle.kv_pairs {
        scope.push(key.clone(), json_to_dynamic(value));
    }

    Ok((engine, scope, resolver))
}

fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// Eagerly loads every top-level package named in the bundle (so their
/// module-level side effects run, and later `import` statements inside
/// `__main__` hit the resolver's cache instead of recompiling), then
/// compiles and evaluates the entry module under `Scope`.
///
/// On success returns the compiled entry `AST` (so a caller can, e.g.,
/// auto-expose its top-level functions as command handlers); any rhai
/// error is translated into a `LoaderError::Eval` carrying the formatted
/// message the caller uses to build a `StatusRecord::Exception`.
pub fn load_and_run(
    engine: &Engine,
    resolver: &BundleResolver,
    scope: &mut Scope<'static>,
    bundle: &Bundle,
) -> Result<rhai::AST, LoaderError> {
    for name in resolver.catalog().top_level_packages() {
        debug!(package = %name, "eagerly loading top-level package");
        resolver
            .load(engine, name)
            .map_err(|err| LoaderError::Eval {
                module: name.clone(),
                message: describe_eval_error(&err),
            })?;
    }

    let source = bundle.program.decode_source()?;

    let mut ast = engine
        .compile(&source)
        .map_err(|err| LoaderError::Compile {
            module: bundle.program.path.clone(),
            message: err.to_string(),
        })?;
    ast.set_source(bundle.program.path.clone());

    info!(entry = %bundle.program.path, "evaluating program entry module");
    engine
        .eval_ast_with_scope::<Dynamic>(scope, &ast)
        .map_err(|err| LoaderError::Eval {
            module: MAIN_MODULE_NAME.to_string(),
            message: describe_eval_error(&err),
        })?;

    Ok(ast)
}

/// Flattens rhai's nested `ErrorInFunctionCall` chain into one human
/// traceback string, innermost frame last, naming each `AST::source()` the
/// error crossed so a failure inside an imported package names that
/// package's own path rather than only the entry module's.
pub fn describe_eval_error(err: &EvalAltResult) -> String {
    let mut frames = Vec::new();
    let mut current = err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                if source.is_empty() {
                    frames.push(format!("in `{name}` at {pos:?}"));
                } else {
                    frames.push(format!("in `{name}` ({source}) at {pos:?}"));
                }
                current = inner;
            }
            other => {
                frames.push(other.to_string());
                break;
            }
        }
    }
    frames.join("\n  ")
}

pub fn warn_unused_kv(bundle: &Bundle) {
    if bundle.kv_pairs.is_empty() {
        warn!("bundle declared no KVPairs");
    }
}
