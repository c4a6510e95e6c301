//! Static type and property inference.
//!
//! Every node gets a basic type and a set of property flags computed from its
//! variant and its children's already inferred types. The arena stores
//! children before parents, so a single forward pass annotates the whole tree.

use alloc::vec::Vec;
use core::fmt;

use crate::ast::{Fragment, NodeIndex, NodePath, Tree, Wrapper};
use crate::bitcoin_definition_link;

/// Basic type of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    /// Base: pushes a nonzero value on satisfaction and an exact 0 on
    /// dissatisfaction.
    B,
    /// Verify: pushes nothing on satisfaction and cannot be dissatisfied.
    V,
    /// Key: pushes a public key for a later signature check.
    K,
    /// Wrapped: like B, but operates on the element below the top of the stack.
    W,
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            BasicType::B => "B",
            BasicType::V => "V",
            BasicType::K => "K",
            BasicType::W => "W",
        };
        f.write_str(c)
    }
}

// Properties as bit flags

/// Consumes exactly 0 stack elements.
pub const PROPERTY_Z: u16 = 1 << 0;
/// Consumes exactly 1 stack element.
pub const PROPERTY_O: u16 = 1 << 1;
/// The top stack element is never zero on satisfaction.
pub const PROPERTY_N: u16 = 1 << 2;
/// A dissatisfaction exists.
pub const PROPERTY_D: u16 = 1 << 3;
/// Leaves exactly 1 on the stack when satisfied.
pub const PROPERTY_U: u16 = 1 << 4;
/// A non-malleable satisfaction exists.
pub const PROPERTY_M: u16 = 1 << 5;
/// The last opcode is EQUAL, CHECKSIG or CHECKMULTISIG and can be replaced by
/// its VERIFY form.
pub const CAN_COLLAPSE_VERIFY: u16 = 1 << 6;

// Only used to derive `m`
pub(crate) const PROPERTY_S: u16 = 1 << 7;
pub(crate) const PROPERTY_F: u16 = 1 << 8;
pub(crate) const PROPERTY_E: u16 = 1 << 9;

const PROPERTY_NAMES: [(u16, char); 9] = [
    (PROPERTY_Z, 'z'),
    (PROPERTY_O, 'o'),
    (PROPERTY_N, 'n'),
    (PROPERTY_D, 'd'),
    (PROPERTY_U, 'u'),
    (PROPERTY_M, 'm'),
    (PROPERTY_S, 's'),
    (PROPERTY_F, 'f'),
    (PROPERTY_E, 'e'),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    base_type: BasicType,
    properties: u16,
}

impl TypeInfo {
    #[inline]
    pub const fn new(base_type: BasicType, properties: u16) -> Self {
        Self {
            base_type,
            properties,
        }
    }

    #[inline]
    pub const fn base_type(&self) -> BasicType {
        self.base_type
    }

    #[inline]
    pub const fn properties(&self) -> u16 {
        self.properties
    }

    #[inline]
    pub const fn has_property(&self, property: u16) -> bool {
        (self.properties & property) != 0
    }

    #[inline]
    pub const fn has_properties(&self, properties: u16) -> bool {
        (self.properties & properties) == properties
    }

    #[inline]
    pub const fn can_collapse_verify(&self) -> bool {
        self.has_property(CAN_COLLAPSE_VERIFY)
    }

    #[inline]
    pub const fn is_non_malleable(&self) -> bool {
        self.has_property(PROPERTY_M)
    }

    /// Every satisfaction of this fragment needs a signature.
    #[inline]
    pub(crate) const fn requires_sig(&self) -> bool {
        self.has_property(PROPERTY_S)
    }

    const fn z(&self) -> bool {
        self.has_property(PROPERTY_Z)
    }
    const fn o(&self) -> bool {
        self.has_property(PROPERTY_O)
    }
    const fn n(&self) -> bool {
        self.has_property(PROPERTY_N)
    }
    const fn m(&self) -> bool {
        self.has_property(PROPERTY_M)
    }
    const fn s(&self) -> bool {
        self.has_property(PROPERTY_S)
    }
    const fn f(&self) -> bool {
        self.has_property(PROPERTY_F)
    }
    const fn e(&self) -> bool {
        self.has_property(PROPERTY_E)
    }
}

/// Prints the basic type followed by the public properties, e.g. `Bondum`.
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_type)?;
        for (property, name) in &PROPERTY_NAMES[..6] {
            if self.has_property(*property) {
                write!(f, "{}", name)?;
            }
        }
        Ok(())
    }
}

const fn flag(condition: bool, property: u16) -> u16 {
    if condition { property } else { 0 }
}

// Leaf types

const FALSE: TypeInfo = TypeInfo::new(
    BasicType::B,
    PROPERTY_Z | PROPERTY_U | PROPERTY_D | PROPERTY_E | PROPERTY_M | PROPERTY_S,
);
const TRUE: TypeInfo = TypeInfo::new(
    BasicType::B,
    PROPERTY_Z | PROPERTY_U | PROPERTY_F | PROPERTY_M,
);
const PK_K: TypeInfo = TypeInfo::new(
    BasicType::K,
    PROPERTY_O | PROPERTY_N | PROPERTY_U | PROPERTY_D | PROPERTY_E | PROPERTY_M | PROPERTY_S,
);
const PK_H: TypeInfo = TypeInfo::new(
    BasicType::K,
    PROPERTY_N | PROPERTY_U | PROPERTY_D | PROPERTY_E | PROPERTY_M | PROPERTY_S,
);
const TIMELOCK: TypeInfo = TypeInfo::new(BasicType::B, PROPERTY_Z | PROPERTY_F | PROPERTY_M);
const HASH: TypeInfo = TypeInfo::new(
    BasicType::B,
    PROPERTY_O | PROPERTY_N | PROPERTY_U | PROPERTY_D | PROPERTY_M | CAN_COLLAPSE_VERIFY,
);
const MULTI: TypeInfo = TypeInfo::new(
    BasicType::B,
    PROPERTY_N
        | PROPERTY_U
        | PROPERTY_D
        | PROPERTY_E
        | PROPERTY_M
        | PROPERTY_S
        | CAN_COLLAPSE_VERIFY,
);

// Errors

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeErrorKind {
    #[error("{fragment}: child {child} must be type {expected}, but got type {found}")]
    UnexpectedType {
        fragment: &'static str,
        child: usize,
        expected: &'static str,
        found: BasicType,
    },
    #[error("{fragment}: child {child} must have property '{property}', but got {found}")]
    MissingProperty {
        fragment: &'static str,
        child: usize,
        property: char,
        found: TypeInfo,
    },
    #[error("{fragment}: branches must have the same type, but got {left} and {right}")]
    MismatchedBranches {
        fragment: &'static str,
        left: BasicType,
        right: BasicType,
    },
    #[error("top-level fragment must be type B, but got type {0}")]
    NonBaseRoot(BasicType),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("type error at node {index} ({path}): {kind}")]
pub struct TypeError {
    pub index: NodeIndex,
    pub path: NodePath,
    pub kind: TypeErrorKind,
}

fn expect_type(
    fragment: &'static str,
    child: usize,
    found: TypeInfo,
    allowed: &[BasicType],
    expected: &'static str,
) -> Result<(), TypeErrorKind> {
    if allowed.contains(&found.base_type()) {
        Ok(())
    } else {
        Err(TypeErrorKind::UnexpectedType {
            fragment,
            child,
            expected,
            found: found.base_type(),
        })
    }
}

fn expect_properties(
    fragment: &'static str,
    child: usize,
    found: TypeInfo,
    properties: u16,
) -> Result<(), TypeErrorKind> {
    match PROPERTY_NAMES
        .iter()
        .find(|(property, _)| properties & property != 0 && !found.has_property(*property))
    {
        Some((_, name)) => Err(TypeErrorKind::MissingProperty {
            fragment,
            child,
            property: *name,
            found,
        }),
        None => Ok(()),
    }
}

const ANY_BKV: &[BasicType] = &[BasicType::B, BasicType::K, BasicType::V];

// Type Checker

/// Inferred types, indexed by node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Types(Vec<TypeInfo>);

impl Types {
    #[inline]
    pub fn get(&self, index: NodeIndex) -> TypeInfo {
        self.0[usize::from(index)]
    }

    #[inline]
    pub fn root(&self) -> TypeInfo {
        self.0[self.0.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.0.iter()
    }
}

#[doc = bitcoin_definition_link!("script/miniscript.cpp", 35..=245)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeChecker;

impl TypeChecker {
    #[inline]
    pub const fn new() -> Self {
        Self
    }

    /// Annotate every node of `tree`. Fails on the first node, in index order,
    /// whose children do not meet its requirements, or when the root is not
    /// type B.
    pub fn check(&self, tree: &Tree) -> Result<Types, TypeError> {
        let mut types: Vec<TypeInfo> = Vec::with_capacity(tree.len());
        for (index, fragment) in tree.nodes().iter().enumerate() {
            let index = index as NodeIndex;
            let type_info = infer(fragment, &types).map_err(|kind| TypeError {
                index,
                path: tree.path(index),
                kind,
            })?;
            types.push(type_info);
        }

        let root = types[types.len() - 1];
        if root.base_type() != BasicType::B {
            return Err(TypeError {
                index: tree.root(),
                path: tree.path(tree.root()),
                kind: TypeErrorKind::NonBaseRoot(root.base_type()),
            });
        }

        tracing::debug!(root = %root, nodes = types.len(), "type check passed");
        Ok(Types(types))
    }
}

fn infer(fragment: &Fragment, types: &[TypeInfo]) -> Result<TypeInfo, TypeErrorKind> {
    let ty = |index: &NodeIndex| types[usize::from(*index)];
    match fragment {
        Fragment::False => Ok(FALSE),
        Fragment::True => Ok(TRUE),
        Fragment::PkK { .. } => Ok(PK_K),
        Fragment::PkH { .. } => Ok(PK_H),
        Fragment::Older { .. } | Fragment::After { .. } => Ok(TIMELOCK),
        Fragment::Sha256 { .. }
        | Fragment::Hash256 { .. }
        | Fragment::Ripemd160 { .. }
        | Fragment::Hash160 { .. } => Ok(HASH),
        Fragment::Multi { .. } => Ok(MULTI),
        Fragment::AndOr { x, y, z } => and_or("andor", ty(x), ty(y), ty(z)),
        Fragment::AndN { x, y } => and_or("and_n", ty(x), ty(y), FALSE),
        Fragment::AndV { x, y } => and_v("and_v", ty(x), ty(y)),
        Fragment::AndB { x, y } => and_b(ty(x), ty(y)),
        Fragment::OrB { x, z } => or_b(ty(x), ty(z)),
        Fragment::OrC { x, z } => or_c(ty(x), ty(z)),
        Fragment::OrD { x, z } => or_d(ty(x), ty(z)),
        Fragment::OrI { x, z } => or_i("or_i", ty(x), ty(z)),
        Fragment::Thresh { k, xs } => thresh(*k, xs.iter().map(ty)),
        Fragment::Wrap { wrapper, x } => wrap(*wrapper, ty(x)),
    }
}

fn wrap(wrapper: Wrapper, x: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    let name = wrapper.name();
    match wrapper {
        Wrapper::A => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            Ok(TypeInfo::new(
                BasicType::W,
                x.properties()
                    & (PROPERTY_U | PROPERTY_D | PROPERTY_F | PROPERTY_E | PROPERTY_M | PROPERTY_S),
            ))
        }
        Wrapper::S => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            expect_properties(name, 0, x, PROPERTY_O)?;
            Ok(TypeInfo::new(
                BasicType::W,
                x.properties()
                    & (PROPERTY_U
                        | PROPERTY_D
                        | PROPERTY_F
                        | PROPERTY_E
                        | PROPERTY_M
                        | PROPERTY_S
                        | CAN_COLLAPSE_VERIFY),
            ))
        }
        Wrapper::C => {
            expect_type(name, 0, x, &[BasicType::K], "K")?;
            Ok(TypeInfo::new(
                BasicType::B,
                (x.properties()
                    & (PROPERTY_O | PROPERTY_N | PROPERTY_D | PROPERTY_F | PROPERTY_E | PROPERTY_M))
                    | PROPERTY_U
                    | PROPERTY_S
                    | CAN_COLLAPSE_VERIFY,
            ))
        }
        Wrapper::D => {
            expect_type(name, 0, x, &[BasicType::V], "V")?;
            expect_properties(name, 0, x, PROPERTY_Z)?;
            Ok(TypeInfo::new(
                BasicType::B,
                (x.properties() & (PROPERTY_M | PROPERTY_S))
                    | PROPERTY_N
                    | PROPERTY_D
                    | flag(x.z(), PROPERTY_O)
                    | flag(x.f(), PROPERTY_E),
            ))
        }
        Wrapper::V => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            Ok(TypeInfo::new(
                BasicType::V,
                (x.properties()
                    & (PROPERTY_Z | PROPERTY_O | PROPERTY_N | PROPERTY_M | PROPERTY_S))
                    | PROPERTY_F,
            ))
        }
        Wrapper::J => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            expect_properties(name, 0, x, PROPERTY_N)?;
            Ok(TypeInfo::new(
                BasicType::B,
                (x.properties() & (PROPERTY_O | PROPERTY_U | PROPERTY_M | PROPERTY_S))
                    | PROPERTY_N
                    | PROPERTY_D
                    | flag(x.f(), PROPERTY_E),
            ))
        }
        Wrapper::N => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            Ok(TypeInfo::new(
                BasicType::B,
                (x.properties()
                    & (PROPERTY_Z
                        | PROPERTY_O
                        | PROPERTY_N
                        | PROPERTY_D
                        | PROPERTY_F
                        | PROPERTY_E
                        | PROPERTY_M
                        | PROPERTY_S))
                    | PROPERTY_U,
            ))
        }
        Wrapper::T => and_v(name, x, TRUE),
        Wrapper::L => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            or_i(name, FALSE, x)
        }
        Wrapper::U => {
            expect_type(name, 0, x, &[BasicType::B], "B")?;
            or_i(name, x, FALSE)
        }
    }
}

fn and_v(fragment: &'static str, x: TypeInfo, y: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type(fragment, 0, x, &[BasicType::V], "V")?;
    expect_type(fragment, 1, y, ANY_BKV, "B, K or V")?;
    Ok(TypeInfo::new(
        y.base_type(),
        (x.properties() & y.properties() & (PROPERTY_D | PROPERTY_M | PROPERTY_Z))
            | ((x.properties() | y.properties()) & PROPERTY_S)
            | (y.properties() & (PROPERTY_U | CAN_COLLAPSE_VERIFY))
            | flag(x.n() || (x.z() && y.n()), PROPERTY_N)
            | flag((x.o() && y.z()) || (x.z() && y.o()), PROPERTY_O)
            | flag(y.f() || x.s(), PROPERTY_F),
    ))
}

fn and_b(x: TypeInfo, y: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type("and_b", 0, x, &[BasicType::B], "B")?;
    expect_type("and_b", 1, y, &[BasicType::W], "W")?;
    Ok(TypeInfo::new(
        BasicType::B,
        (x.properties() & y.properties() & (PROPERTY_D | PROPERTY_M | PROPERTY_Z))
            | ((x.properties() | y.properties()) & PROPERTY_S)
            | PROPERTY_U
            | flag(x.n() || (x.z() && y.n()), PROPERTY_N)
            | flag((x.o() && y.z()) || (x.z() && y.o()), PROPERTY_O)
            | flag(x.e() && y.e() && x.s() && y.s(), PROPERTY_E)
            | flag(
                (x.f() && y.f()) || (x.f() && x.s()) || (y.f() && y.s()),
                PROPERTY_F,
            ),
    ))
}

fn or_b(x: TypeInfo, z: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type("or_b", 0, x, &[BasicType::B], "B")?;
    expect_properties("or_b", 0, x, PROPERTY_D)?;
    expect_type("or_b", 1, z, &[BasicType::W], "W")?;
    expect_properties("or_b", 1, z, PROPERTY_D)?;
    Ok(TypeInfo::new(
        BasicType::B,
        (x.properties() & z.properties() & (PROPERTY_Z | PROPERTY_S | PROPERTY_E))
            | PROPERTY_D
            | PROPERTY_U
            | flag((x.o() && z.z()) || (x.z() && z.o()), PROPERTY_O)
            | flag(
                x.m() && z.m() && x.e() && z.e() && (x.s() || z.s()),
                PROPERTY_M,
            ),
    ))
}

fn or_d(x: TypeInfo, z: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type("or_d", 0, x, &[BasicType::B], "B")?;
    expect_properties("or_d", 0, x, PROPERTY_D | PROPERTY_U)?;
    expect_type("or_d", 1, z, &[BasicType::B], "B")?;
    Ok(TypeInfo::new(
        BasicType::B,
        (x.properties() & z.properties() & (PROPERTY_Z | PROPERTY_S))
            | (z.properties() & (PROPERTY_U | PROPERTY_F | PROPERTY_D | PROPERTY_E))
            | flag(x.o() && z.z(), PROPERTY_O)
            | flag(x.m() && z.m() && x.e() && (x.s() || z.s()), PROPERTY_M),
    ))
}

fn or_c(x: TypeInfo, z: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type("or_c", 0, x, &[BasicType::B], "B")?;
    expect_properties("or_c", 0, x, PROPERTY_D | PROPERTY_U)?;
    expect_type("or_c", 1, z, &[BasicType::V], "V")?;
    Ok(TypeInfo::new(
        BasicType::V,
        (x.properties() & z.properties() & (PROPERTY_Z | PROPERTY_S))
            | PROPERTY_F
            | flag(x.o() && z.z(), PROPERTY_O)
            | flag(x.m() && z.m() && x.e() && (x.s() || z.s()), PROPERTY_M),
    ))
}

fn or_i(fragment: &'static str, x: TypeInfo, z: TypeInfo) -> Result<TypeInfo, TypeErrorKind> {
    expect_type(fragment, 0, x, ANY_BKV, "B, K or V")?;
    expect_type(fragment, 1, z, ANY_BKV, "B, K or V")?;
    if x.base_type() != z.base_type() {
        return Err(TypeErrorKind::MismatchedBranches {
            fragment,
            left: x.base_type(),
            right: z.base_type(),
        });
    }
    Ok(TypeInfo::new(
        x.base_type(),
        (x.properties() & z.properties() & (PROPERTY_U | PROPERTY_F | PROPERTY_S))
            | ((x.properties() | z.properties()) & PROPERTY_D)
            | flag(x.z() && z.z(), PROPERTY_O)
            | flag((x.e() && z.f()) || (x.f() && z.e()), PROPERTY_E)
            | flag(x.m() && z.m() && (x.s() || z.s()), PROPERTY_M),
    ))
}

fn and_or(
    fragment: &'static str,
    x: TypeInfo,
    y: TypeInfo,
    z: TypeInfo,
) -> Result<TypeInfo, TypeErrorKind> {
    expect_type(fragment, 0, x, &[BasicType::B], "B")?;
    expect_properties(fragment, 0, x, PROPERTY_D | PROPERTY_U)?;
    expect_type(fragment, 1, y, ANY_BKV, "B, K or V")?;
    expect_type(fragment, 2, z, ANY_BKV, "B, K or V")?;
    if y.base_type() != z.base_type() {
        return Err(TypeErrorKind::MismatchedBranches {
            fragment,
            left: y.base_type(),
            right: z.base_type(),
        });
    }
    Ok(TypeInfo::new(
        y.base_type(),
        (x.properties() & y.properties() & z.properties() & PROPERTY_Z)
            | (y.properties() & z.properties() & PROPERTY_U)
            | (z.properties() & PROPERTY_D)
            | flag(
                (x.o() && y.z() && z.z()) || (x.z() && y.o() && z.o()),
                PROPERTY_O,
            )
            | flag(z.f() && (x.s() || y.f()), PROPERTY_F)
            | flag(z.e() && (x.s() || y.f()), PROPERTY_E)
            | flag(
                x.m() && y.m() && z.m() && x.e() && (x.s() || y.s() || z.s()),
                PROPERTY_M,
            )
            | flag(z.s() && (x.s() || y.s()), PROPERTY_S),
    ))
}

fn thresh(
    k: usize,
    children: impl ExactSizeIterator<Item = TypeInfo>,
) -> Result<TypeInfo, TypeErrorKind> {
    let n = children.len();
    let mut args = 0;
    let mut all_e = true;
    let mut all_m = true;
    let mut num_s = 0;

    for (i, child) in children.enumerate() {
        if i == 0 {
            expect_type("thresh", i, child, &[BasicType::B], "B")?;
        } else {
            expect_type("thresh", i, child, &[BasicType::W], "W")?;
        }
        expect_properties("thresh", i, child, PROPERTY_D | PROPERTY_U)?;

        args += if child.z() {
            0
        } else if child.o() {
            1
        } else {
            2
        };
        all_e &= child.e();
        all_m &= child.m();
        if child.s() {
            num_s += 1;
        }
    }

    Ok(TypeInfo::new(
        BasicType::B,
        PROPERTY_D
            | PROPERTY_U
            | CAN_COLLAPSE_VERIFY
            | flag(args == 0, PROPERTY_Z)
            | flag(args == 1, PROPERTY_O)
            | flag(all_e && num_s == n, PROPERTY_E)
            | flag(all_e && all_m && num_s >= n - k, PROPERTY_M)
            | flag(num_s > n - k, PROPERTY_S),
    ))
}
