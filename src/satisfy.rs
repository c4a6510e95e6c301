use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::convert::Infallible;

use bitcoin::hashes::{Hash, hash160, ripemd160, sha256, sha256d};
use bitcoin::{PublicKey, Witness, ecdsa};

use crate::ast::{ASTVisitor, Fragment, NodeIndex, Tree, Wrapper};
use crate::bitcoin_definition_link;
use crate::context::Context;
use crate::limits::MAX_PUBKEYS_PER_MULTISIG;
use crate::type_checker::PROPERTY_D;

/// Length of every hash preimage miniscript accepts.
pub const PREIMAGE_LEN: usize = 32;

/// Source of signatures, preimages and timelock information.
///
/// `sign` must return the same signature every time it is asked for the same
/// key: the debug self-check compares witness signatures against it.
pub trait Satisfier {
    /// Signature for `key`, if it can be produced.
    fn sign(&self, key: &PublicKey) -> Option<ecdsa::Signature>;

    /// Preimage of `hash` under `hash_func`, if known.
    fn preimage(&self, hash_func: HashFunc, hash: &[u8]) -> Option<[u8; PREIMAGE_LEN]>;

    /// Whether an OP_CHECKSEQUENCEVERIFY on `n` passes for the spending
    /// transaction.
    fn check_older(&self, n: u32) -> bool;

    /// Whether an OP_CHECKLOCKTIMEVERIFY on `n` passes for the spending
    /// transaction.
    fn check_after(&self, n: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashFunc {
    Sha256,
    Ripemd160,
    Hash256,
    Hash160,
}

impl HashFunc {
    pub const ALL: [HashFunc; 4] = [
        HashFunc::Sha256,
        HashFunc::Ripemd160,
        HashFunc::Hash256,
        HashFunc::Hash160,
    ];

    /// Hash `data`, in the byte order the script compares against.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashFunc::Sha256 => sha256::Hash::hash(data).to_byte_array().to_vec(),
            HashFunc::Ripemd160 => ripemd160::Hash::hash(data).to_byte_array().to_vec(),
            HashFunc::Hash256 => sha256d::Hash::hash(data).to_byte_array().to_vec(),
            HashFunc::Hash160 => hash160::Hash::hash(data).to_byte_array().to_vec(),
        }
    }
}

// Timelocks

const LOCKTIME_THRESHOLD: u32 = 500_000_000;
const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_FFFF;

/// Timelock fields of the spending transaction and input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeContext {
    /// `nSequence` of the input being spent.
    pub sequence: u32,
    /// `nLockTime` of the spending transaction.
    pub lock_time: u32,
}

impl Default for TimeContext {
    /// A final input with no locktime: no timelock is satisfied.
    fn default() -> Self {
        Self {
            sequence: SEQUENCE_FINAL,
            lock_time: 0,
        }
    }
}

impl TimeContext {
    #[inline]
    pub const fn new(sequence: u32, lock_time: u32) -> Self {
        Self {
            sequence,
            lock_time,
        }
    }

    /// BIP112 relative timelock check. Assumes a version 2 transaction.
    #[doc = bitcoin_definition_link!("script/interpreter.cpp", 1782..=1820)]
    pub fn check_older(&self, n: u32) -> bool {
        if n & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return true;
        }
        if self.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return false;
        }
        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let (required, actual) = (n & mask, self.sequence & mask);
        if (required < SEQUENCE_LOCKTIME_TYPE_FLAG) != (actual < SEQUENCE_LOCKTIME_TYPE_FLAG) {
            return false;
        }
        required <= actual
    }

    /// BIP65 absolute timelock check.
    #[doc = bitcoin_definition_link!("script/interpreter.cpp", 1745..=1780)]
    pub fn check_after(&self, n: u32) -> bool {
        if (n < LOCKTIME_THRESHOLD) != (self.lock_time < LOCKTIME_THRESHOLD) {
            return false;
        }
        if n > self.lock_time {
            return false;
        }
        self.sequence != SEQUENCE_FINAL
    }
}

/// In-memory [`Satisfier`] backed by known signatures and preimages.
#[derive(Debug, Clone, Default)]
pub struct Assets {
    signatures: BTreeMap<PublicKey, ecdsa::Signature>,
    preimages: BTreeMap<(HashFunc, Vec<u8>), [u8; PREIMAGE_LEN]>,
    time: TimeContext,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(time: TimeContext) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    pub fn add_signature(&mut self, key: PublicKey, signature: ecdsa::Signature) {
        self.signatures.insert(key, signature);
    }

    /// Make `preimage` available for all four hash functions.
    pub fn add_preimage(&mut self, preimage: [u8; PREIMAGE_LEN]) {
        for hash_func in HashFunc::ALL {
            self.preimages
                .insert((hash_func, hash_func.digest(&preimage)), preimage);
        }
    }

    pub fn set_time(&mut self, time: TimeContext) {
        self.time = time;
    }

    pub fn time(&self) -> TimeContext {
        self.time
    }
}

impl Satisfier for Assets {
    fn sign(&self, key: &PublicKey) -> Option<ecdsa::Signature> {
        self.signatures.get(key).copied()
    }

    fn preimage(&self, hash_func: HashFunc, hash: &[u8]) -> Option<[u8; PREIMAGE_LEN]> {
        self.preimages.get(&(hash_func, hash.to_vec())).copied()
    }

    fn check_older(&self, n: u32) -> bool {
        self.time.check_older(n)
    }

    fn check_after(&self, n: u32) -> bool {
        self.time.check_after(n)
    }
}

// Satisfactions

/// A witness stack for one node together with what it takes to produce it.
#[doc = bitcoin_definition_link!("script/miniscript.h", 294)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Satisfaction {
    pub witness: Witness,
    pub available: bool,
    pub malleable: bool,
    pub has_sig: bool,
    cost: usize,
    secrets: BTreeSet<Vec<u8>>,
}

const fn varint_len(n: usize) -> usize {
    match n {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

impl Satisfaction {
    /// A single witness element.
    pub fn element(data: &[u8]) -> Self {
        let mut witness = Witness::new();
        witness.push(data);
        Self {
            witness,
            available: true,
            malleable: false,
            has_sig: false,
            cost: varint_len(data.len()) + data.len(),
            secrets: BTreeSet::new(),
        }
    }

    /// A single element that reveals a signature or preimage.
    pub fn secret(data: &[u8]) -> Self {
        let mut sat = Self::element(data);
        sat.secrets.insert(data.to_vec());
        sat
    }

    pub fn with_sig(mut self) -> Self {
        self.has_sig = true;
        self
    }

    pub fn set_malleable(mut self, malleable: bool) -> Self {
        self.malleable = malleable;
        self
    }

    /// Serialized witness size: a length prefix plus the bytes of each element.
    pub fn cost(&self) -> usize {
        self.cost
    }

    /// Number of distinct signatures and preimages revealed.
    pub fn secrets(&self) -> usize {
        self.secrets.len()
    }

    /// `self` below `other` on the stack.
    pub fn and(mut self, other: Self) -> Self {
        for element in other.witness.iter() {
            self.witness.push(element);
        }
        self.secrets.extend(other.secrets);
        Self {
            witness: self.witness,
            available: self.available && other.available,
            malleable: self.malleable || other.malleable,
            has_sig: self.has_sig || other.has_sig,
            cost: self.cost + other.cost,
            secrets: self.secrets,
        }
    }

    /// Pick the better of two alternatives.
    pub fn or(mut self, mut other: Self) -> Self {
        // If only one (or neither) is valid, pick the other one.
        if !self.available {
            return other;
        }
        if !other.available {
            return self;
        }
        // If only one of the solutions has a signature, we must pick the other one.
        if !self.has_sig && other.has_sig {
            return self;
        }
        if self.has_sig && !other.has_sig {
            return other;
        }
        if !self.has_sig && !other.has_sig {
            // If neither solution requires a signature, the result is inevitably malleable.
            self.malleable = true;
            other.malleable = true;
        } else {
            // If both options require a signature, prefer the non-malleable one.
            if other.malleable && !self.malleable {
                return self;
            }
            if self.malleable && !other.malleable {
                return other;
            }
        }
        if (other.cost, other.secrets()) < (self.cost, self.secrets()) {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Satisfactions {
    pub dsat: Satisfaction,
    pub sat: Satisfaction,
}

impl Satisfactions {
    pub fn new(dsat: Satisfaction, sat: Satisfaction) -> Self {
        Self { dsat, sat }
    }
}

const EMPTY: Satisfaction = Satisfaction {
    witness: Witness::new(),
    available: true,
    malleable: false,
    has_sig: false,
    cost: 0,
    secrets: BTreeSet::new(),
};

const UNAVAILABLE: Satisfaction = Satisfaction {
    witness: Witness::new(),
    available: false,
    malleable: false,
    has_sig: false,
    cost: 0,
    secrets: BTreeSet::new(),
};

fn zero() -> Satisfaction {
    Satisfaction::element(&[])
}

fn one() -> Satisfaction {
    Satisfaction::element(&[1])
}

// Outcome

/// Witness produced for the root of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatisfyOutcome {
    /// Spends the output.
    Satisfied(Witness),
    /// Makes the script finish cleanly with a false result.
    Dissatisfied(Witness),
}

impl SatisfyOutcome {
    pub fn witness(&self) -> &Witness {
        match self {
            SatisfyOutcome::Satisfied(witness) | SatisfyOutcome::Dissatisfied(witness) => witness,
        }
    }

    pub fn into_witness(self) -> Witness {
        match self {
            SatisfyOutcome::Satisfied(witness) | SatisfyOutcome::Dissatisfied(witness) => witness,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, SatisfyOutcome::Satisfied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SatisfyError {
    #[error("no witness can be produced with the available assets")]
    Unsatisfiable,
}

/// Produce the cheapest non-malleable witness that needs a signature.
/// Falls back to the canonical dissatisfaction when the script has one.
///
/// A satisfaction that needs no signature is never returned here, even when
/// the script is non-malleable: a third party could replay it. Such scripts
/// report [`SatisfyError::Unsatisfiable`] although a witness exists; use
/// [`satisfy_malleable`] to get it.
#[doc = bitcoin_definition_link!("script/miniscript.h", 1186)]
pub fn satisfy(ctx: &Context, satisfier: &dyn Satisfier) -> Result<SatisfyOutcome, SatisfyError> {
    finalize(ctx, satisfier, true)
}

/// Like [`satisfy`], but malleable or signature-free witnesses are accepted.
pub fn satisfy_malleable(
    ctx: &Context,
    satisfier: &dyn Satisfier,
) -> Result<SatisfyOutcome, SatisfyError> {
    finalize(ctx, satisfier, false)
}

/// Best satisfaction and dissatisfaction of the root.
pub fn satisfactions(ctx: &Context, satisfier: &dyn Satisfier) -> Satisfactions {
    let Ok(pair) = SatisfactionVisitor { satisfier }.visit(ctx.tree());
    pair
}

fn finalize(
    ctx: &Context,
    satisfier: &dyn Satisfier,
    non_malleable: bool,
) -> Result<SatisfyOutcome, SatisfyError> {
    let Satisfactions { dsat, sat } = satisfactions(ctx, satisfier);

    let outcome = if sat.available && (!non_malleable || (!sat.malleable && sat.has_sig)) {
        tracing::debug!(
            cost = sat.cost,
            elements = sat.witness.len(),
            "satisfied"
        );
        SatisfyOutcome::Satisfied(sat.witness)
    } else if dsat.available && ctx.root_type().has_property(PROPERTY_D) {
        tracing::debug!(
            cost = dsat.cost,
            elements = dsat.witness.len(),
            "dissatisfied"
        );
        SatisfyOutcome::Dissatisfied(dsat.witness)
    } else {
        tracing::debug!(
            available = sat.available,
            malleable = sat.malleable,
            has_sig = sat.has_sig,
            "unsatisfiable"
        );
        return Err(SatisfyError::Unsatisfiable);
    };

    #[cfg(debug_assertions)]
    self_check(ctx, satisfier, &outcome);

    Ok(outcome)
}

/// Run the witness through the compiled script.
#[cfg(debug_assertions)]
fn self_check(ctx: &Context, satisfier: &dyn Satisfier, outcome: &SatisfyOutcome) {
    use crate::interpreter::{self, ExecOutcome};

    let script = crate::script::compile(ctx);
    let result = interpreter::execute(&script, outcome.witness(), satisfier);
    let expected = if outcome.is_satisfied() {
        ExecOutcome::Accepted
    } else {
        ExecOutcome::Rejected
    };
    if result != Ok(expected) {
        tracing::error!(
            ?result,
            ?expected,
            miniscript = %ctx.tree(),
            "witness failed the script self-check"
        );
    }
    debug_assert_eq!(result, Ok(expected), "witness failed the script self-check");
}

struct SatisfactionVisitor<'s> {
    satisfier: &'s dyn Satisfier,
}

impl SatisfactionVisitor<'_> {
    fn signature(&self, key: &PublicKey) -> Satisfaction {
        match self.satisfier.sign(key) {
            Some(signature) => Satisfaction::secret(&signature.to_vec()).with_sig(),
            None => UNAVAILABLE,
        }
    }

    fn hash(&self, hash_func: HashFunc, hash: &[u8]) -> Satisfactions {
        let sat = match self.satisfier.preimage(hash_func, hash) {
            Some(preimage) if hash_func.digest(&preimage) == hash => Satisfaction::secret(&preimage),
            Some(_) => {
                tracing::warn!(?hash_func, "satisfier returned a wrong preimage");
                UNAVAILABLE
            }
            None => UNAVAILABLE,
        };
        // the all-zero dissatisfaction is no dissatisfaction if it hashes to `hash`
        let dsat = if hash_func.digest(&[0; PREIMAGE_LEN]) == hash {
            UNAVAILABLE
        } else {
            Satisfaction::element(&[0; PREIMAGE_LEN]).set_malleable(true)
        };
        Satisfactions::new(dsat, sat)
    }

    fn timelock(available: bool) -> Satisfactions {
        Satisfactions::new(UNAVAILABLE, if available { EMPTY } else { UNAVAILABLE })
    }

    fn and_or(x: Satisfactions, y: Satisfactions, z: Satisfactions) -> Satisfactions {
        Satisfactions::new(
            y.dsat
                .and(x.sat.clone())
                .or(z.dsat.and(x.dsat.clone())),
            y.sat.and(x.sat).or(z.sat.and(x.dsat)),
        )
    }

    fn or_i(x: Satisfactions, z: Satisfactions) -> Satisfactions {
        Satisfactions::new(
            x.dsat.and(one()).or(z.dsat.and(zero())),
            x.sat.and(one()).or(z.sat.and(zero())),
        )
    }

    fn thresh(k: usize, subs: Vec<Satisfactions>) -> Satisfactions {
        let n = subs.len();

        // sats[j] is the best stack satisfying j of the last i subexpressions.
        let mut sats = Vec::with_capacity(n + 1);
        sats.push(EMPTY);

        for i in 0..n {
            let res = &subs[n - i - 1];

            let mut next_sats = Vec::with_capacity(sats.len() + 1);
            next_sats.push(sats[0].clone().and(res.dsat.clone()));
            for j in 1..sats.len() {
                next_sats.push(
                    sats[j]
                        .clone()
                        .and(res.dsat.clone())
                        .or(sats[j - 1].clone().and(res.sat.clone())),
                );
            }
            next_sats.push(sats[sats.len() - 1].clone().and(res.sat.clone()));

            sats = next_sats;
        }

        // i == k is the satisfaction, i == 0 the canonical dissatisfaction. The
        // other counts are overcomplete and therefore malleable.
        let mut nsat = UNAVAILABLE;
        for (i, candidate) in sats.iter_mut().enumerate() {
            if i != 0 && i != k {
                candidate.malleable = true;
            }
            if i != k {
                nsat = nsat.or(candidate.clone());
            }
        }

        let sat = sats.swap_remove(k);
        Satisfactions::new(nsat, sat)
    }

    fn multi(&self, k: usize, keys: &[PublicKey]) -> Satisfactions {
        // CHECKMULTISIG fails on more keys, whatever the stack holds
        if keys.len() > MAX_PUBKEYS_PER_MULTISIG {
            return Satisfactions::new(UNAVAILABLE, UNAVAILABLE);
        }

        // sats[j] is the best stack with j signatures for the first i keys. The
        // extra 0 at the bottom is consumed by the CHECKMULTISIG off-by-one.
        let mut sats = Vec::with_capacity(keys.len() + 1);
        sats.push(zero());

        for key in keys {
            let sat = self.signature(key);

            let mut next_sats = Vec::with_capacity(sats.len() + 1);
            next_sats.push(sats[0].clone());
            for j in 1..sats.len() {
                next_sats.push(sats[j].clone().or(sats[j - 1].clone().and(sat.clone())));
            }
            next_sats.push(sats[sats.len() - 1].clone().and(sat));

            sats = next_sats;
        }

        let mut nsat = zero();
        for _ in 0..k {
            nsat = nsat.and(zero());
        }

        Satisfactions::new(nsat, sats.swap_remove(k))
    }
}

impl ASTVisitor<Satisfactions> for SatisfactionVisitor<'_> {
    type Error = Infallible;

    fn visit_node(&mut self, tree: &Tree, index: NodeIndex) -> Result<Satisfactions, Infallible> {
        let pair = match tree.node(index) {
            Fragment::False => Satisfactions::new(EMPTY, UNAVAILABLE),
            Fragment::True => Satisfactions::new(UNAVAILABLE, EMPTY),
            Fragment::PkK { key } => Satisfactions::new(zero(), self.signature(key)),
            Fragment::PkH { key } => {
                let key_bytes = Satisfaction::element(&key.to_bytes());
                Satisfactions::new(
                    zero().and(key_bytes.clone()),
                    self.signature(key).and(key_bytes),
                )
            }
            Fragment::Older { n } => Self::timelock(self.satisfier.check_older(*n)),
            Fragment::After { n } => Self::timelock(self.satisfier.check_after(*n)),
            Fragment::Sha256 { h } => self.hash(HashFunc::Sha256, h.as_byte_array()),
            Fragment::Hash256 { h } => self.hash(HashFunc::Hash256, h.as_byte_array()),
            Fragment::Ripemd160 { h } => self.hash(HashFunc::Ripemd160, h.as_byte_array()),
            Fragment::Hash160 { h } => self.hash(HashFunc::Hash160, h.as_byte_array()),
            Fragment::AndOr { x, y, z } => {
                let x = self.visit_node(tree, *x)?;
                let y = self.visit_node(tree, *y)?;
                let z = self.visit_node(tree, *z)?;
                Self::and_or(x, y, z)
            }
            Fragment::AndN { x, y } => {
                let x = self.visit_node(tree, *x)?;
                let y = self.visit_node(tree, *y)?;
                Self::and_or(x, y, Satisfactions::new(EMPTY, UNAVAILABLE))
            }
            Fragment::AndV { x, y } => {
                let x = self.visit_node(tree, *x)?;
                let y = self.visit_node(tree, *y)?;
                Satisfactions::new(y.dsat.and(x.sat.clone()), y.sat.and(x.sat))
            }
            Fragment::AndB { x, y } => {
                let x = self.visit_node(tree, *x)?;
                let y = self.visit_node(tree, *y)?;
                Satisfactions::new(
                    y.dsat
                        .clone()
                        .and(x.dsat.clone())
                        .or(y.sat.clone().and(x.dsat).set_malleable(true))
                        .or(y.dsat.and(x.sat.clone()).set_malleable(true)),
                    y.sat.and(x.sat),
                )
            }
            Fragment::OrB { x, z } => {
                let x = self.visit_node(tree, *x)?;
                let z = self.visit_node(tree, *z)?;
                Satisfactions::new(
                    z.dsat.clone().and(x.dsat.clone()),
                    z.dsat
                        .and(x.sat.clone())
                        .or(z.sat.clone().and(x.dsat))
                        .or(z.sat.and(x.sat).set_malleable(true)),
                )
            }
            Fragment::OrC { x, z } => {
                let x = self.visit_node(tree, *x)?;
                let z = self.visit_node(tree, *z)?;
                Satisfactions::new(UNAVAILABLE, x.sat.or(z.sat.and(x.dsat)))
            }
            Fragment::OrD { x, z } => {
                let x = self.visit_node(tree, *x)?;
                let z = self.visit_node(tree, *z)?;
                Satisfactions::new(
                    z.dsat.and(x.dsat.clone()),
                    x.sat.or(z.sat.and(x.dsat)),
                )
            }
            Fragment::OrI { x, z } => {
                let x = self.visit_node(tree, *x)?;
                let z = self.visit_node(tree, *z)?;
                Self::or_i(x, z)
            }
            Fragment::Thresh { k, xs } => {
                let mut subs = Vec::with_capacity(xs.len());
                for x in xs {
                    subs.push(self.visit_node(tree, *x)?);
                }
                Self::thresh(*k, subs)
            }
            Fragment::Multi { k, keys } => self.multi(*k, keys),
            Fragment::Wrap { wrapper, x } => {
                let x = self.visit_node(tree, *x)?;
                match wrapper {
                    Wrapper::A | Wrapper::S | Wrapper::C | Wrapper::N => x,
                    Wrapper::D => Satisfactions::new(zero(), x.sat.and(one())),
                    Wrapper::V | Wrapper::T => Satisfactions::new(UNAVAILABLE, x.sat),
                    Wrapper::J => Satisfactions::new(
                        zero().set_malleable(x.dsat.available && !x.dsat.has_sig),
                        x.sat,
                    ),
                    Wrapper::L => Self::or_i(Satisfactions::new(EMPTY, UNAVAILABLE), x),
                    Wrapper::U => Self::or_i(x, Satisfactions::new(EMPTY, UNAVAILABLE)),
                }
            }
        };
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TreeBuilder;
    use crate::test_utils::{assets, key, signature};

    fn context(b: TreeBuilder) -> Context {
        Context::new(b.build().unwrap()).unwrap()
    }

    fn witness(elements: &[&[u8]]) -> Witness {
        Witness::from_slice(elements)
    }

    #[test]
    fn test_and_v_two_keys() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let x = b.v(x);
        let y = b.pk(key(2));
        b.and_v(x, y);
        let ctx = context(b);

        let outcome = satisfy(&ctx, &assets(&[1, 2])).unwrap();
        assert_eq!(
            outcome,
            SatisfyOutcome::Satisfied(witness(&[
                &signature(2).to_vec(),
                &signature(1).to_vec()
            ]))
        );

        // no dissatisfaction to fall back to
        assert_eq!(satisfy(&ctx, &assets(&[2])), Err(SatisfyError::Unsatisfiable));
        assert_eq!(satisfy(&ctx, &assets(&[1])), Err(SatisfyError::Unsatisfiable));
    }

    #[test]
    fn test_or_b_picks_cheapest() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let z = b.pk(key(2));
        let z = b.s(z);
        b.or_b(x, z);
        let ctx = context(b);

        let (sig1, sig2) = (signature(1).to_vec(), signature(2).to_vec());
        let pair = satisfactions(&ctx, &assets(&[1, 2]));
        assert_eq!(pair.sat.cost(), 1 + 1 + sig1.len().min(sig2.len()));
        assert_eq!(pair.sat.secrets(), 1);

        let expected = if sig1.len() <= sig2.len() {
            witness(&[&[], &sig1])
        } else {
            witness(&[&sig2, &[]])
        };
        assert_eq!(
            satisfy(&ctx, &assets(&[1, 2])),
            Ok(SatisfyOutcome::Satisfied(expected))
        );

        assert_eq!(
            satisfy(&ctx, &assets(&[2])),
            Ok(SatisfyOutcome::Satisfied(witness(&[&sig2, &[]])))
        );
        assert_eq!(
            satisfy(&ctx, &assets(&[])),
            Ok(SatisfyOutcome::Dissatisfied(witness(&[&[], &[]])))
        );
    }

    #[test]
    fn test_thresh_two_of_three() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let y = b.pk(key(2));
        let y = b.s(y);
        let z = b.pk(key(3));
        let z = b.s(z);
        b.thresh(2, alloc::vec![x, y, z]);
        let ctx = context(b);

        let outcome = satisfy(&ctx, &assets(&[1, 3])).unwrap();
        assert_eq!(
            outcome,
            SatisfyOutcome::Satisfied(witness(&[
                &signature(3).to_vec(),
                &[],
                &signature(1).to_vec()
            ]))
        );

        let outcome = satisfy(&ctx, &assets(&[2])).unwrap();
        assert_eq!(
            outcome,
            SatisfyOutcome::Dissatisfied(witness(&[&[], &[], &[]]))
        );
    }

    #[test]
    fn test_multi() {
        let mut b = TreeBuilder::new();
        b.multi(2, alloc::vec![key(1), key(2), key(3)]);
        let ctx = context(b);

        let outcome = satisfy(&ctx, &assets(&[1, 2, 3])).unwrap();
        assert!(outcome.is_satisfied());
        // dummy plus two signatures
        assert_eq!(outcome.witness().len(), 3);
        assert!(outcome.witness().nth(0).unwrap().is_empty());

        let outcome = satisfy(&ctx, &assets(&[2, 3])).unwrap();
        assert_eq!(
            outcome,
            SatisfyOutcome::Satisfied(witness(&[
                &[],
                &signature(2).to_vec(),
                &signature(3).to_vec()
            ]))
        );

        let outcome = satisfy(&ctx, &assets(&[3])).unwrap();
        assert_eq!(
            outcome,
            SatisfyOutcome::Dissatisfied(witness(&[&[], &[], &[]]))
        );
    }

    #[test]
    fn test_hash_and_key() {
        let preimage = [9; PREIMAGE_LEN];
        let mut b = TreeBuilder::new();
        let x = b.hash160(hash160::Hash::hash(&preimage));
        let x = b.v(x);
        let y = b.pkh(key(1));
        b.and_v(x, y);
        let ctx = context(b);

        let mut assets = assets(&[1]);
        assert_eq!(satisfy(&ctx, &assets), Err(SatisfyError::Unsatisfiable));

        assets.add_preimage(preimage);
        assert_eq!(
            satisfy(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[
                &signature(1).to_vec(),
                &key(1).to_bytes(),
                &preimage
            ])))
        );
    }

    #[test]
    fn test_preimage_alone_is_malleable() {
        let preimage = [3; PREIMAGE_LEN];
        let mut b = TreeBuilder::new();
        b.sha256(sha256::Hash::hash(&preimage));
        let ctx = context(b);

        let mut assets = Assets::new();
        assets.add_preimage(preimage);

        // no signature involved: only the dissatisfaction is safe to publish
        assert_eq!(
            satisfy(&ctx, &assets),
            Ok(SatisfyOutcome::Dissatisfied(witness(&[&[0; PREIMAGE_LEN]])))
        );
        assert_eq!(
            satisfy_malleable(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&preimage])))
        );
    }

    #[test]
    fn test_timelock_path() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let x = b.v(x);
        let y = b.older(144);
        b.and_v(x, y);
        let ctx = context(b);

        let mut assets = assets(&[1]);
        assets.set_time(TimeContext::new(100, 0));
        assert_eq!(satisfy(&ctx, &assets), Err(SatisfyError::Unsatisfiable));

        assets.set_time(TimeContext::new(144, 0));
        assert_eq!(
            satisfy(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&signature(1).to_vec()])))
        );
    }

    #[test]
    fn test_or_d_prefers_path_without_signature() {
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let z = b.after(1000);
        b.or_d(x, z);
        let ctx = context(b);

        let mut assets = assets(&[1]);
        assert_eq!(
            satisfy(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&signature(1).to_vec()])))
        );

        // once the timelock expired, anybody can spend without a signature
        assets.set_time(TimeContext::new(0, 1000));
        assert_eq!(satisfy(&ctx, &assets), Err(SatisfyError::Unsatisfiable));
        assert_eq!(
            satisfy_malleable(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&[]])))
        );
    }

    #[test]
    fn test_wrappers_round_trip() {
        // and_b(andor(pk(1),j:n:pk(2),l:pk(3)),a:d:v:older(10))
        let mut b = TreeBuilder::new();
        let x = b.pk(key(1));
        let y = b.pk(key(2));
        let y = b.n(y);
        let y = b.j(y);
        let z = b.pk(key(3));
        let z = b.l(z);
        let andor = b.and_or(x, y, z);
        let w = b.older(10);
        let w = b.v(w);
        let w = b.d(w);
        let w = b.a(w);
        b.and_b(andor, w);
        let ctx = context(b);

        let mut late = assets(&[3]);
        late.set_time(TimeContext::new(10, 0));
        let outcome = satisfy(&ctx, &late).unwrap();
        assert!(outcome.is_satisfied());

        let outcome = satisfy(&ctx, &assets(&[1, 2])).unwrap();
        assert!(!outcome.is_satisfied());
    }

    #[test]
    fn test_or_tie_break() {
        let plain = Satisfaction::element(&[0; 3]);
        let secret = Satisfaction::secret(&[0; 3]);
        assert_eq!(plain.cost(), secret.cost());

        let chosen = secret.clone().or(plain.clone());
        assert_eq!(chosen.secrets(), 0);
        assert!(chosen.malleable);

        let chosen = plain.clone().or(secret);
        assert_eq!(chosen.secrets(), 0);

        let left = Satisfaction::element(&[1]).with_sig();
        let right = Satisfaction::element(&[2]).with_sig();
        assert_eq!(left.clone().or(right).witness, left.witness);
    }

    #[test]
    fn test_or_counts_distinct_secrets() {
        let (p1, p2) = ([1; PREIMAGE_LEN], [2; PREIMAGE_LEN]);
        let reused = Satisfaction::secret(&p1).and(Satisfaction::secret(&p1));
        let both = Satisfaction::secret(&p1).and(Satisfaction::secret(&p2));
        assert_eq!(reused.cost(), both.cost());
        assert_eq!(reused.secrets(), 1);
        assert_eq!(both.secrets(), 2);
        assert_eq!(both.clone().or(reused.clone()).witness, reused.witness);

        // or_i(and_v(v:sha256(H1),sha256(H2)),or_i(0,and_v(v:sha256(H1),sha256(H1))))
        let (h1, h2) = (sha256::Hash::hash(&p1), sha256::Hash::hash(&p2));
        let mut b = TreeBuilder::new();
        let x = b.sha256(h1);
        let x = b.v(x);
        let y = b.sha256(h2);
        let left = b.and_v(x, y);
        let never = b.zero();
        let x = b.sha256(h1);
        let x = b.v(x);
        let y = b.sha256(h1);
        let reuse = b.and_v(x, y);
        let right = b.or_i(never, reuse);
        b.or_i(left, right);
        let ctx = context(b);

        let mut assets = Assets::new();
        assets.add_preimage(p1);
        assets.add_preimage(p2);

        // both branches cost 68 bytes; the right one reveals a single preimage
        let pair = satisfactions(&ctx, &assets);
        assert_eq!(pair.sat.cost(), 68);
        assert_eq!(pair.sat.secrets(), 1);
        assert_eq!(
            satisfy_malleable(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&p1, &p1, &[], &[]])))
        );
    }

    #[test]
    fn test_multi_over_key_limit_is_unsatisfiable() {
        let mut b = TreeBuilder::new();
        b.multi(1, (1..=21).map(key).collect());
        let ctx = context(b);

        let signers = assets(&[1]);
        let pair = satisfactions(&ctx, &signers);
        assert!(!pair.sat.available);
        assert!(!pair.dsat.available);
        assert_eq!(satisfy(&ctx, &signers), Err(SatisfyError::Unsatisfiable));
        assert_eq!(
            satisfy_malleable(&ctx, &signers),
            Err(SatisfyError::Unsatisfiable)
        );
    }

    #[test]
    fn test_hash_of_zero_has_no_dissatisfaction() {
        let zeros = [0; PREIMAGE_LEN];
        let mut b = TreeBuilder::new();
        b.sha256(sha256::Hash::hash(&zeros));
        let ctx = context(b);

        let mut assets = Assets::new();
        assert!(!satisfactions(&ctx, &assets).dsat.available);
        assert_eq!(satisfy(&ctx, &assets), Err(SatisfyError::Unsatisfiable));

        assets.add_preimage(zeros);
        assert_eq!(satisfy(&ctx, &assets), Err(SatisfyError::Unsatisfiable));
        assert_eq!(
            satisfy_malleable(&ctx, &assets),
            Ok(SatisfyOutcome::Satisfied(witness(&[&zeros])))
        );
    }

    #[test]
    fn test_or_prefers_non_malleable_signed() {
        let cheap = Satisfaction::element(&[1]).with_sig().set_malleable(true);
        let costly = Satisfaction::element(&[1; 10]).with_sig();
        assert_eq!(cheap.clone().or(costly.clone()), costly);
        assert_eq!(UNAVAILABLE.or(cheap.clone()), cheap);
    }

    #[test]
    fn test_time_context() {
        let time = TimeContext::new(144, 700_000);
        assert!(time.check_older(144));
        assert!(time.check_older(1));
        assert!(!time.check_older(145));
        // time-based relative lock against a height-based sequence
        assert!(!time.check_older(SEQUENCE_LOCKTIME_TYPE_FLAG | 1));

        assert!(time.check_after(700_000));
        assert!(!time.check_after(700_001));
        assert!(!time.check_after(LOCKTIME_THRESHOLD + 1));

        let final_input = TimeContext::new(SEQUENCE_FINAL, 700_000);
        assert!(!final_input.check_after(1));
        assert!(!final_input.check_older(1));
        assert!(!TimeContext::default().check_after(1));
    }
}
