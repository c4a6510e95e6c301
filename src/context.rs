use bitcoin::ScriptBuf;

use crate::ast::{BuildError, NodeIndex, Tree};
use crate::limits::{self, Limits, LimitsError};
use crate::script::{self, CompileOptions};
use crate::type_checker::{TypeChecker, TypeError, TypeInfo, Types};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Type(#[from] TypeError),
    /// The script compiled but breaks a standardness limit. The script is kept
    /// for diagnostics.
    #[error("non-standard script: {error}")]
    NonStandard { script: ScriptBuf, error: LimitsError },
}

/// A well-typed miniscript: the fragment tree plus the inferred type of every
/// node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    tree: Tree,
    types: Types,
}

impl Context {
    /// Run type inference over `tree`.
    pub fn new(tree: Tree) -> Result<Self, TypeError> {
        let types = TypeChecker::new().check(&tree)?;
        Ok(Self { tree, types })
    }

    #[inline]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    #[inline]
    pub fn types(&self) -> &Types {
        &self.types
    }

    #[inline]
    pub fn type_of(&self, index: NodeIndex) -> TypeInfo {
        self.types.get(index)
    }

    #[inline]
    pub fn root_type(&self) -> TypeInfo {
        self.types.root()
    }

    /// Whether a third party cannot turn a valid witness into another valid one.
    #[inline]
    pub fn is_non_malleable(&self) -> bool {
        self.root_type().is_non_malleable()
    }

    /// Whether every satisfaction needs at least one signature.
    #[inline]
    pub fn requires_sig(&self) -> bool {
        self.root_type().requires_sig()
    }

    /// Compile and check the result against the standardness limits.
    pub fn build_script(&self) -> Result<ScriptBuf, ContextError> {
        self.build_script_with(&CompileOptions::default(), &Limits::default())
    }

    pub fn build_script_with(
        &self,
        options: &CompileOptions,
        limits: &Limits,
    ) -> Result<ScriptBuf, ContextError> {
        let script = script::compile_with(self, options);
        match limits::check_limits(self, &script, limits) {
            Ok(()) => {
                tracing::debug!(
                    size = script.len(),
                    ops = limits::count_ops(self, &script),
                    "script within limits"
                );
                Ok(script)
            }
            Err(error) => {
                tracing::debug!(%error, size = script.len(), "non-standard script");
                Err(ContextError::NonStandard { script, error })
            }
        }
    }

    /// Non-malleable, signature-requiring and within the standardness limits.
    pub fn is_sane(&self) -> bool {
        self.is_non_malleable() && self.requires_sig() && self.build_script().is_ok()
    }

    /// Produce the smallest non-malleable witness for this script.
    #[cfg(feature = "satisfy")]
    pub fn satisfy(
        &self,
        satisfier: &dyn crate::satisfy::Satisfier,
    ) -> Result<crate::satisfy::SatisfyOutcome, crate::satisfy::SatisfyError> {
        crate::satisfy::satisfy(self, satisfier)
    }

    /// Like [`Context::satisfy`], but also accepts malleable witnesses.
    #[cfg(feature = "satisfy")]
    pub fn satisfy_malleable(
        &self,
        satisfier: &dyn crate::satisfy::Satisfier,
    ) -> Result<crate::satisfy::SatisfyOutcome, crate::satisfy::SatisfyError> {
        crate::satisfy::satisfy_malleable(self, satisfier)
    }
}

impl TryFrom<Tree> for Context {
    type Error = ContextError;

    fn try_from(tree: Tree) -> Result<Self, Self::Error> {
        Ok(Self::new(tree)?)
    }
}
