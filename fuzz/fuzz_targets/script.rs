#![no_main]

use std::sync::OnceLock;

use bitcoin::hashes::{Hash, hash160, ripemd160, sha256, sha256d};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{PublicKey, ecdsa};
use libfuzzer_sys::fuzz_target;
use miniscript::{Miniscript, Segwitv0};

use miniscript_core::interpreter::{self, ExecOutcome};
use miniscript_core::{Assets, Context, NodeIndex, TimeContext, TreeBuilder};

const KEYS: usize = 4;

struct Fixture {
    keys: Vec<PublicKey>,
    signatures: Vec<ecdsa::Signature>,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest([1; 32]);
        let secrets: Vec<SecretKey> = (1..=KEYS as u8)
            .map(|i| SecretKey::from_slice(&[i; 32]).unwrap())
            .collect();
        Fixture {
            keys: secrets
                .iter()
                .map(|sk| PublicKey::new(sk.public_key(&secp)))
                .collect(),
            signatures: secrets
                .iter()
                .map(|sk| ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, sk)))
                .collect(),
        }
    })
}

fn preimage(i: u8) -> [u8; 32] {
    [i % KEYS as u8; 32]
}

/// Read a tree in reverse polish notation: every byte is an operator that
/// pops its children from the stack.
fn decode(data: &[u8]) -> Option<TreeBuilder> {
    let keys = &fixture().keys;
    let key = |i: u8| keys[usize::from(i) % KEYS];

    let mut b = TreeBuilder::new();
    let mut stack: Vec<NodeIndex> = Vec::new();
    let mut bytes = data.iter().copied();

    while let Some(op) = bytes.next() {
        let node = match op % 32 {
            0 => b.zero(),
            1 => b.one(),
            2 => b.pk_k(key(bytes.next()?)),
            3 => b.pk_h(key(bytes.next()?)),
            4 => b.older(u32::from(bytes.next()?) + 1),
            5 => b.after(u32::from(bytes.next()?) + 1),
            6 => b.sha256(sha256::Hash::hash(&preimage(bytes.next()?))),
            7 => b.hash256(sha256d::Hash::hash(&preimage(bytes.next()?))),
            8 => b.ripemd160(ripemd160::Hash::hash(&preimage(bytes.next()?))),
            9 => b.hash160(hash160::Hash::hash(&preimage(bytes.next()?))),
            10 => {
                let z = stack.pop()?;
                let y = stack.pop()?;
                let x = stack.pop()?;
                b.and_or(x, y, z)
            }
            11..=17 => {
                let y = stack.pop()?;
                let x = stack.pop()?;
                match op % 32 {
                    11 => b.and_v(x, y),
                    12 => b.and_b(x, y),
                    13 => b.and_n(x, y),
                    14 => b.or_b(x, y),
                    15 => b.or_c(x, y),
                    16 => b.or_d(x, y),
                    _ => b.or_i(x, y),
                }
            }
            18 => {
                let n = usize::from(bytes.next()? % 4) + 1;
                let k = usize::from(bytes.next()?) % n + 1;
                let mut xs = Vec::with_capacity(n);
                for _ in 0..n {
                    xs.push(stack.pop()?);
                }
                xs.reverse();
                b.thresh(k, xs)
            }
            19 => {
                let n = usize::from(bytes.next()? % KEYS as u8) + 1;
                let k = usize::from(bytes.next()?) % n + 1;
                b.multi(k, keys[..n].to_vec())
            }
            20 => {
                let x = stack.pop()?;
                b.a(x)
            }
            21 => {
                let x = stack.pop()?;
                b.s(x)
            }
            22 => {
                let x = stack.pop()?;
                b.c(x)
            }
            23 => {
                let x = stack.pop()?;
                b.d(x)
            }
            24 => {
                let x = stack.pop()?;
                b.v(x)
            }
            25 => {
                let x = stack.pop()?;
                b.j(x)
            }
            26 => {
                let x = stack.pop()?;
                b.n(x)
            }
            27 => {
                let x = stack.pop()?;
                b.t(x)
            }
            28 => {
                let x = stack.pop()?;
                b.l(x)
            }
            29 => {
                let x = stack.pop()?;
                b.u(x)
            }
            _ => return None,
        };
        stack.push(node);
    }

    (stack.len() == 1).then_some(b)
}

/// Signers, preimages and timelocks picked by the first byte.
fn assets(seed: u8) -> Assets {
    let fixture = fixture();
    let mut assets = Assets::with_time(TimeContext::new(u32::from(seed >> 4) * 16, 128));
    for i in 0..KEYS {
        if seed & (1 << i) != 0 {
            assets.add_signature(fixture.keys[i], fixture.signatures[i]);
        }
    }
    assets.add_preimage(preimage(seed >> 6));
    assets
}

fuzz_target!(|data: &[u8]| {
    let Some((&seed, data)) = data.split_first() else {
        return;
    };
    let Some(builder) = decode(data) else {
        return;
    };
    let Ok(tree) = builder.build() else {
        return;
    };
    let Ok(ctx) = Context::new(tree) else {
        return;
    };

    let script = miniscript_core::script::compile(&ctx);
    let text = ctx.tree().to_string();
    if let Ok(ms) = Miniscript::<PublicKey, Segwitv0>::from_str_insane(&text) {
        let expected = ms.encode();
        if expected != script {
            panic!(
                "Miniscript: '{}'\nrust-miniscript: '{}'\nminiscript-core: '{}'",
                text,
                expected.to_asm_string(),
                script.to_asm_string()
            );
        }
    }

    let assets = assets(seed);
    for outcome in [ctx.satisfy(&assets), ctx.satisfy_malleable(&assets)]
        .into_iter()
        .flatten()
    {
        let expected = if outcome.is_satisfied() {
            ExecOutcome::Accepted
        } else {
            ExecOutcome::Rejected
        };
        assert_eq!(
            interpreter::execute(&script, outcome.witness(), &assets),
            Ok(expected),
            "{}",
            text
        );
    }
});
