use alloc::string::String;
use core::fmt::{self, Write};

use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;

use crate::ast::{ASTVisitor, Fragment, NodeIndex, Tree};

/// Renders a tree in miniscript notation. Consecutive wrappers are fused, so
/// `v:c:pk_k(K)` is written `vc:pk_k(K)`.
pub struct Serializer {
    output: String,
}

impl Serializer {
    pub const fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    pub fn serialize(&mut self, tree: &Tree) -> Result<String, fmt::Error> {
        self.output.clear();
        self.visit(tree)?;
        Ok(core::mem::take(&mut self.output))
    }

    fn write_args(&mut self, tree: &Tree, name: &str, args: &[NodeIndex]) -> fmt::Result {
        write!(self.output, "{}(", name)?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.output.push(',');
            }
            self.visit_node(tree, *arg)?;
        }
        self.output.push(')');
        Ok(())
    }
}

impl ASTVisitor<()> for Serializer {
    type Error = fmt::Error;

    fn visit_node(&mut self, tree: &Tree, index: NodeIndex) -> Result<(), fmt::Error> {
        let fragment = tree.node(index);
        match fragment {
            Fragment::False | Fragment::True => self.output.push_str(fragment.name()),
            Fragment::PkK { key } | Fragment::PkH { key } => {
                write!(self.output, "{}({})", fragment.name(), key)?;
            }
            Fragment::Older { n } | Fragment::After { n } => {
                write!(self.output, "{}({})", fragment.name(), n)?;
            }
            Fragment::Sha256 { h } => {
                write!(self.output, "sha256({})", h.as_byte_array()[..].as_hex())?;
            }
            Fragment::Hash256 { h } => {
                write!(self.output, "hash256({})", h.as_byte_array()[..].as_hex())?;
            }
            Fragment::Ripemd160 { h } => {
                write!(self.output, "ripemd160({})", h.as_byte_array()[..].as_hex())?;
            }
            Fragment::Hash160 { h } => {
                write!(self.output, "hash160({})", h.as_byte_array()[..].as_hex())?;
            }
            Fragment::AndOr { x, y, z } => self.write_args(tree, "andor", &[*x, *y, *z])?,
            Fragment::AndV { x, y }
            | Fragment::AndB { x, y }
            | Fragment::AndN { x, y } => self.write_args(tree, fragment.name(), &[*x, *y])?,
            Fragment::OrB { x, z }
            | Fragment::OrC { x, z }
            | Fragment::OrD { x, z }
            | Fragment::OrI { x, z } => self.write_args(tree, fragment.name(), &[*x, *z])?,
            Fragment::Thresh { k, xs } => {
                write!(self.output, "thresh({}", k)?;
                for x in xs {
                    self.output.push(',');
                    self.visit_node(tree, *x)?;
                }
                self.output.push(')');
            }
            Fragment::Multi { k, keys } => {
                write!(self.output, "multi({}", k)?;
                for key in keys {
                    write!(self.output, ",{}", key)?;
                }
                self.output.push(')');
            }
            Fragment::Wrap { wrapper, x } => {
                self.output.push(wrapper.as_char());

                // if the inner node is a wrapper too, do not add a colon
                if !matches!(tree.node(*x), Fragment::Wrap { .. }) {
                    self.output.push(':');
                }
                self.visit_node(tree, *x)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use bitcoin::hashes::{Hash, sha256};

    use crate::ast::TreeBuilder;
    use crate::test_utils::key;

    #[test]
    fn test_fused_wrappers() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let x = b.v(x);
        let y = b.pk_h(key(2));
        let y = b.c(y);
        b.and_v(x, y);
        let tree = b.build().unwrap();

        assert_eq!(
            tree.to_string(),
            alloc::format!("and_v(vc:pk_k({}),c:pk_h({}))", key(1), key(2))
        );
    }

    #[test]
    fn test_thresh_and_hashes() {
        let h = sha256::Hash::hash(&[7; 32]);
        let mut b = TreeBuilder::new();
        let x = b.sha256(h);
        let y = b.older(144);
        let y = b.a(y);
        let y = b.n(y);
        b.thresh(1, alloc::vec![x, y]);
        let tree = b.build().unwrap();

        let expected = alloc::format!("thresh(1,sha256({}),na:older(144))", h);
        assert_eq!(tree.to_string(), expected);
    }
}
