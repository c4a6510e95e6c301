use bitcoin::ScriptBuf;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::{self, all::*};
use bitcoin::script::Builder;

use crate::ast::{Fragment, NodeIndex, Wrapper};
use crate::context::Context;

/// Options for turning an annotated tree into Script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Fold `X VERIFY` into `EQUALVERIFY`, `CHECKSIGVERIFY` or
    /// `CHECKMULTISIGVERIFY` when the child allows it.
    pub collapse_verify: bool,
}

impl Default for CompileOptions {
    #[inline]
    fn default() -> Self {
        Self {
            collapse_verify: true,
        }
    }
}

/// Compile with the default options.
#[inline]
pub fn compile(ctx: &Context) -> ScriptBuf {
    compile_with(ctx, &CompileOptions::default())
}

pub fn compile_with(ctx: &Context, options: &CompileOptions) -> ScriptBuf {
    let builder = build_fragment(ctx, options, ctx.tree().root(), Builder::new());
    let script = builder.into_script();
    tracing::trace!(
        len = script.len(),
        collapse_verify = options.collapse_verify,
        "compiled script"
    );
    script
}

fn build_fragment(
    ctx: &Context,
    options: &CompileOptions,
    index: NodeIndex,
    builder: Builder,
) -> Builder {
    let build = |x: NodeIndex, builder: Builder| build_fragment(ctx, options, x, builder);

    match ctx.tree().node(index) {
        Fragment::False => builder.push_opcode(opcodes::OP_FALSE),
        Fragment::True => builder.push_opcode(opcodes::OP_TRUE),
        Fragment::PkK { key } => builder.push_key(key),
        Fragment::PkH { key } => builder
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(key.pubkey_hash())
            .push_opcode(OP_EQUALVERIFY),
        Fragment::Older { n } => builder.push_int(i64::from(*n)).push_opcode(OP_CSV),
        Fragment::After { n } => builder.push_int(i64::from(*n)).push_opcode(OP_CLTV),
        Fragment::Sha256 { h } => hash_preimage_check(builder, OP_SHA256)
            .push_slice(h.to_byte_array())
            .push_opcode(OP_EQUAL),
        Fragment::Hash256 { h } => hash_preimage_check(builder, OP_HASH256)
            .push_slice(h.to_byte_array())
            .push_opcode(OP_EQUAL),
        Fragment::Ripemd160 { h } => hash_preimage_check(builder, OP_RIPEMD160)
            .push_slice(h.to_byte_array())
            .push_opcode(OP_EQUAL),
        Fragment::Hash160 { h } => hash_preimage_check(builder, OP_HASH160)
            .push_slice(h.to_byte_array())
            .push_opcode(OP_EQUAL),
        Fragment::AndOr { x, y, z } => {
            let builder = build(*x, builder).push_opcode(OP_NOTIF);
            let builder = build(*z, builder).push_opcode(OP_ELSE);
            build(*y, builder).push_opcode(OP_ENDIF)
        }
        Fragment::AndN { x, y } => {
            let builder = build(*x, builder)
                .push_opcode(OP_NOTIF)
                .push_opcode(opcodes::OP_FALSE)
                .push_opcode(OP_ELSE);
            build(*y, builder).push_opcode(OP_ENDIF)
        }
        Fragment::AndV { x, y } => {
            let builder = build(*x, builder);
            build(*y, builder)
        }
        Fragment::AndB { x, y } => {
            let builder = build(*x, builder);
            build(*y, builder).push_opcode(OP_BOOLAND)
        }
        Fragment::OrB { x, z } => {
            let builder = build(*x, builder);
            build(*z, builder).push_opcode(OP_BOOLOR)
        }
        Fragment::OrC { x, z } => {
            let builder = build(*x, builder).push_opcode(OP_NOTIF);
            build(*z, builder).push_opcode(OP_ENDIF)
        }
        Fragment::OrD { x, z } => {
            let builder = build(*x, builder)
                .push_opcode(OP_IFDUP)
                .push_opcode(OP_NOTIF);
            build(*z, builder).push_opcode(OP_ENDIF)
        }
        Fragment::OrI { x, z } => {
            let builder = build(*x, builder.push_opcode(OP_IF)).push_opcode(OP_ELSE);
            build(*z, builder).push_opcode(OP_ENDIF)
        }
        Fragment::Thresh { k, xs } => {
            let mut builder = builder;
            for (i, x) in xs.iter().enumerate() {
                builder = build(*x, builder);
                if i > 0 {
                    builder = builder.push_opcode(OP_ADD);
                }
            }
            builder.push_int(*k as i64).push_opcode(OP_EQUAL)
        }
        Fragment::Multi { k, keys } => {
            let mut builder = builder.push_int(*k as i64);
            for key in keys {
                builder = builder.push_key(key);
            }
            builder
                .push_int(keys.len() as i64)
                .push_opcode(OP_CHECKMULTISIG)
        }
        Fragment::Wrap { wrapper, x } => match wrapper {
            Wrapper::A => build(*x, builder.push_opcode(OP_TOALTSTACK)).push_opcode(OP_FROMALTSTACK),
            Wrapper::S => build(*x, builder.push_opcode(OP_SWAP)),
            Wrapper::C => build(*x, builder).push_opcode(OP_CHECKSIG),
            Wrapper::D => {
                let builder = builder.push_opcode(OP_DUP).push_opcode(OP_IF);
                build(*x, builder).push_opcode(OP_ENDIF)
            }
            Wrapper::V => {
                let builder = build(*x, builder);
                if options.collapse_verify && ctx.type_of(*x).can_collapse_verify() {
                    builder.push_verify()
                } else {
                    builder.push_opcode(OP_VERIFY)
                }
            }
            Wrapper::J => {
                let builder = builder
                    .push_opcode(OP_SIZE)
                    .push_opcode(OP_0NOTEQUAL)
                    .push_opcode(OP_IF);
                build(*x, builder).push_opcode(OP_ENDIF)
            }
            Wrapper::N => build(*x, builder).push_opcode(OP_0NOTEQUAL),
            Wrapper::T => build(*x, builder).push_opcode(opcodes::OP_TRUE),
            Wrapper::L => {
                let builder = builder
                    .push_opcode(OP_IF)
                    .push_opcode(opcodes::OP_FALSE)
                    .push_opcode(OP_ELSE);
                build(*x, builder).push_opcode(OP_ENDIF)
            }
            Wrapper::U => {
                let builder = build(*x, builder.push_opcode(OP_IF));
                builder
                    .push_opcode(OP_ELSE)
                    .push_opcode(opcodes::OP_FALSE)
                    .push_opcode(OP_ENDIF)
            }
        },
    }
}

/// SIZE <32> EQUALVERIFY OP_<HASH>
fn hash_preimage_check(builder: Builder, hash_opcode: opcodes::Opcode) -> Builder {
    builder
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(hash_opcode)
}
