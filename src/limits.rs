//! Standardness limits for P2WSH scripts.

use bitcoin::Script;
use bitcoin::opcodes::all::OP_PUSHNUM_16;
use bitcoin::script::Instruction;

use crate::ast::Fragment;
use crate::bitcoin_definition_link;
use crate::context::Context;

/// Maximum size of a standard P2WSH witness script.
#[doc = bitcoin_definition_link!("policy/policy.h", 51)]
pub const MAX_STANDARD_P2WSH_SCRIPT_SIZE: usize = 3600;

/// Maximum number of non-push operations per script.
#[doc = bitcoin_definition_link!("script/script.h", 31)]
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Maximum number of public keys per multisig.
#[doc = bitcoin_definition_link!("script/script.h", 34)]
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Maximum depth of a fragment tree.
pub const MAX_RECURSION_DEPTH: usize = 402;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_script_size: usize,
    pub max_ops: usize,
    pub max_multisig_keys: usize,
}

impl Default for Limits {
    #[inline]
    fn default() -> Self {
        Self {
            max_script_size: MAX_STANDARD_P2WSH_SCRIPT_SIZE,
            max_ops: MAX_OPS_PER_SCRIPT,
            max_multisig_keys: MAX_PUBKEYS_PER_MULTISIG,
        }
    }
}

// Limits for Miniscript

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    #[error("script is {size} bytes, the limit is {max_size}")]
    ScriptTooLarge { size: usize, max_size: usize },
    #[error("script has {count} operations, the limit is {max_ops}")]
    TooManyOperations { count: usize, max_ops: usize },
    #[error("multi has {keys} keys, the limit is {max_keys}")]
    TooManyMultisigKeys { keys: usize, max_keys: usize },
    #[error("tree depth {depth} exceeds the limit of {max_depth}")]
    MaxRecursiveDepthExceeded { depth: usize, max_depth: usize },
}

pub fn check_recursion_depth(depth: usize) -> Result<(), LimitsError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(LimitsError::MaxRecursiveDepthExceeded {
            depth,
            max_depth: MAX_RECURSION_DEPTH,
        });
    }
    Ok(())
}

/// Count the non-push operations of `script` the way consensus does: every
/// opcode above OP_16 counts one, and each multisig also counts its keys.
pub fn count_ops(ctx: &Context, script: &Script) -> usize {
    let opcodes = script
        .instructions()
        .filter_map(Result::ok)
        .filter(|instruction| match instruction {
            Instruction::Op(op) => op.to_u8() > OP_PUSHNUM_16.to_u8(),
            Instruction::PushBytes(_) => false,
        })
        .count();
    let multisig_keys: usize = ctx
        .tree()
        .nodes()
        .iter()
        .map(|node| match node {
            Fragment::Multi { keys, .. } => keys.len(),
            _ => 0,
        })
        .sum();
    opcodes + multisig_keys
}

/// Check the compiled `script` of `ctx` against `limits`.
pub fn check_limits(ctx: &Context, script: &Script, limits: &Limits) -> Result<(), LimitsError> {
    for node in ctx.tree().nodes() {
        if let Fragment::Multi { keys, .. } = node {
            if keys.len() > limits.max_multisig_keys {
                return Err(LimitsError::TooManyMultisigKeys {
                    keys: keys.len(),
                    max_keys: limits.max_multisig_keys,
                });
            }
        }
    }

    if script.len() > limits.max_script_size {
        return Err(LimitsError::ScriptTooLarge {
            size: script.len(),
            max_size: limits.max_script_size,
        });
    }

    let count = count_ops(ctx, script);
    if count > limits.max_ops {
        return Err(LimitsError::TooManyOperations {
            count,
            max_ops: limits.max_ops,
        });
    }
    Ok(())
}
