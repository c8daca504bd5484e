#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Opm_render is the render pipeline: it turns a module directory, user
//! values, and a provider's transformer catalog into an ordered list of
//! Kubernetes resources.
//!
//! The pipeline is a six-phase linear dataflow: load the module, build a
//! release (overlay + values), load the provider, match components against
//! transformers, execute the matched transformers, then order resources and
//! aggregate warnings. Nothing here touches a cluster; the caller applies
//! the resulting stream.
//!
//! The evaluator is not safe for concurrent use: one render at a time per
//! [`Evaluator`], all on one thread.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use api::{MatchSummary, RenderError, RenderResult, TransformerMatch};
use opm_cue::{Evaluator, Value};

pub mod executor;
pub mod matcher;
pub mod module;
pub mod ordering;
pub mod provider;
pub mod release;
#[cfg(test)]
mod testing;

/// Error enumerates the fatal render failures. Anything here aborts the
/// pipeline with no partial result; per-component failures travel in
/// [`RenderResult::errors`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The module path does not exist.
    #[error("module path does not exist: {0}")]
    PathMissing(PathBuf),
    /// The path exists but is not a module directory.
    #[error("not a module (missing cue.mod directory): {0}")]
    NotAModule(PathBuf),
    /// Compiling module, values, or provider sources failed. Carries the
    /// formatted compiler diagnostics.
    #[error("compile error:\n{0}")]
    Compile(String),
    /// The module declares no default namespace and the caller supplied
    /// none.
    #[error("namespace required: module {0:?} declares no defaultNamespace")]
    NamespaceRequired(String),
    /// The requested provider is not configured.
    #[error("provider {name:?} not found (known providers: {known:?})")]
    ProviderNotFound {
        /// The requested name; empty when the caller asked for the sole
        /// provider but several are configured.
        name: String,
        /// Names that are configured.
        known: Vec<String>,
    },
    /// Building the release failed validation. Carries formatted evaluator
    /// diagnostics.
    #[error("release validation failed:\n{0}")]
    ReleaseValidation(String),
    /// The render was cancelled between phases.
    #[error("render cancelled")]
    Cancelled,
    /// Reading a module or values file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Anything else.
    #[error("render error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Compile adapts evaluator diagnostics, rendering source positions
    /// relative to `base`.
    fn compile(base: &std::path::Path) -> impl FnOnce(opm_cue::Errors) -> Error + '_ {
        move |errs| Error::Compile(errs.format(Some(base)))
    }

    /// Provider adapts evaluator diagnostics for a provider value.
    fn provider(name: &str) -> impl FnOnce(opm_cue::Errors) -> Error + '_ {
        move |errs| Error::Compile(format!("provider {name:?}: {}", errs.format(None)))
    }
}

/// Result typedef for the pipeline.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// RenderOptions are the caller-facing inputs of a render.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Module directory.
    pub module_path: PathBuf,
    /// External values files, applied in order.
    pub values: Vec<PathBuf>,
    /// Release name; empty means the module's name.
    pub name: String,
    /// Target namespace; empty falls back to the module's
    /// `defaultNamespace` and fails when that is absent too.
    pub namespace: String,
    /// Provider to render with; empty selects the sole configured provider.
    pub provider: String,
    /// External package source for the compiler, scoped to the module load.
    pub registry: String,
}

/// Render runs the full pipeline.
///
/// `providers` maps configured provider names to their compiled values; the
/// caller owns configuration loading. The cancellation token is checked
/// between phases and between executor jobs.
#[instrument(skip_all, fields(module = %opts.module_path.display()), err)]
pub fn render(
    eval: &Evaluator,
    opts: &RenderOptions,
    providers: &BTreeMap<String, Value>,
    cancel: &CancellationToken,
) -> Result<RenderResult> {
    let check = || -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    };

    // Phase 1: load the module.
    check()?;
    let registry = (!opts.registry.is_empty()).then_some(opts.registry.as_str());
    let module = module::load(eval, &opts.module_path, registry)?;

    let namespace = if opts.namespace.is_empty() {
        if module.metadata.default_namespace.is_empty() {
            return Err(Error::NamespaceRequired(module.metadata.name.clone()));
        }
        module.metadata.default_namespace.clone()
    } else {
        opts.namespace.clone()
    };

    // Phase 2: build the release.
    check()?;
    let values: Vec<&std::path::Path> = opts.values.iter().map(PathBuf::as_path).collect();
    let built = release::build(
        eval,
        &module,
        &release::BuildOptions {
            name: opts.name.clone(),
            namespace,
        },
        &values,
    )?;

    // Phase 3: load the provider.
    check()?;
    let (provider, transformers) = provider::load(providers, &opts.provider)?;
    debug!(provider = %provider.name, "rendering with provider");

    // Phase 4: match.
    check()?;
    let plan = matcher::plan(&built.components, &transformers);

    let mut errors: Vec<RenderError> = plan
        .unmatched
        .iter()
        .map(|cname| RenderError::UnmatchedComponent {
            component: cname.clone(),
            available: transformers.iter().map(provider::Transformer::summary).collect(),
        })
        .collect();

    // Phase 5: execute.
    check()?;
    let (mut resources, mut exec_errors) = executor::execute(&built, &plan, &transformers, cancel);
    errors.append(&mut exec_errors);

    // Phase 6: order and aggregate warnings.
    check()?;
    ordering::sort(&mut resources);
    let warnings = ordering::unhandled_trait_warnings(&plan);

    let matches = plan
        .by_transformer
        .iter()
        .fold(BTreeMap::<String, Vec<TransformerMatch>>::new(), |mut acc, (fqn, components)| {
            for c in components {
                acc.entry(c.clone())
                    .or_default()
                    .push(TransformerMatch { fqn: fqn.clone() });
            }
            acc
        });

    Ok(RenderResult {
        resources,
        release: built.metadata,
        module: built.module,
        match_plan: MatchSummary {
            matches,
            unmatched: plan.unmatched.clone(),
        },
        errors,
        warnings,
    })
}
