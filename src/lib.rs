#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub extern crate alloc;

mod macros;

pub mod ast;
pub mod context;
#[cfg(feature = "satisfy")]
pub mod interpreter;
pub mod limits;
#[cfg(feature = "satisfy")]
pub mod satisfy;
pub mod script;
#[cfg(feature = "satisfy")]
pub mod stack;
pub mod type_checker;
pub mod utils;

#[cfg(test)]
mod test_utils;

//

use bitcoin::ScriptBuf;

pub use crate::ast::{BuildError, Fragment, NodeIndex, Tree, TreeBuilder, Wrapper};
pub use crate::context::{Context, ContextError};
pub use crate::limits::{Limits, LimitsError};
pub use crate::script::CompileOptions;
pub use crate::type_checker::{BasicType, TypeError, TypeInfo};

#[cfg(feature = "satisfy")]
pub use crate::satisfy::{Assets, Satisfier, SatisfyError, SatisfyOutcome, TimeContext};

/// Type check `tree` and compile it into a standard P2WSH witness script.
pub fn compile_tree(tree: Tree) -> Result<(Context, ScriptBuf), ContextError> {
    let ctx = Context::try_from(tree)?;
    let script = ctx.build_script()?;
    Ok((ctx, script))
}
