use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{PublicKey, ScriptBuf, Witness, ecdsa};

use miniscript_core::interpreter::{self, ExecOutcome};
use miniscript_core::{
    Assets, CompileOptions, Context, ContextError, LimitsError, NodeIndex, SatisfyError,
    SatisfyOutcome, TimeContext, TreeBuilder, compile_tree,
};

fn secret_key(i: u8) -> SecretKey {
    SecretKey::from_slice(&[i; 32]).unwrap()
}

fn key(i: u8) -> PublicKey {
    PublicKey::new(secret_key(i).public_key(&Secp256k1::signing_only()))
}

fn signature(i: u8) -> ecdsa::Signature {
    let msg = Message::from_digest([0xab; 32]);
    ecdsa::Signature::sighash_all(Secp256k1::signing_only().sign_ecdsa(&msg, &secret_key(i)))
}

fn assets(signers: &[u8]) -> Assets {
    let mut assets = Assets::new();
    for &i in signers {
        assets.add_signature(key(i), signature(i));
    }
    assets
}

fn compile(b: TreeBuilder) -> (Context, ScriptBuf) {
    compile_tree(b.build().unwrap()).unwrap()
}

/// The witness must be accepted by the script with and without verify collapsing.
fn assert_spends(ctx: &Context, witness: &Witness, assets: &Assets) {
    for collapse_verify in [true, false] {
        let script = ctx
            .build_script_with(&CompileOptions { collapse_verify }, &Default::default())
            .unwrap();
        assert_eq!(
            interpreter::execute(&script, witness, assets),
            Ok(ExecOutcome::Accepted),
            "{} (collapse_verify: {})",
            ctx.tree(),
            collapse_verify
        );
    }
}

#[test]
fn two_of_two() {
    let mut b = TreeBuilder::new();
    let x = b.pk(key(1));
    let x = b.v(x);
    let y = b.pk(key(2));
    b.and_v(x, y);
    let (ctx, script) = compile(b);

    assert_eq!(
        ctx.tree().to_string(),
        format!("and_v(vc:pk_k({}),c:pk_k({}))", key(1), key(2))
    );
    assert_eq!(
        script.to_asm_string(),
        format!(
            "OP_PUSHBYTES_33 {} OP_CHECKSIGVERIFY OP_PUSHBYTES_33 {} OP_CHECKSIG",
            key(1),
            key(2)
        )
    );
    assert!(ctx.is_sane());

    let both = assets(&[1, 2]);
    let outcome = ctx.satisfy(&both).unwrap();
    let expected = Witness::from_slice(&[signature(2).to_vec(), signature(1).to_vec()]);
    assert_eq!(outcome, SatisfyOutcome::Satisfied(expected));
    assert_spends(&ctx, outcome.witness(), &both);

    assert_eq!(ctx.satisfy(&assets(&[2])), Err(SatisfyError::Unsatisfiable));
}

#[test]
fn script_too_large() {
    // thresh(6,multi(1,K1..K20),a:multi(1,K1..K20),...)
    let keys: Vec<PublicKey> = (1..=20).map(key).collect();
    let mut b = TreeBuilder::new();
    let mut subs: Vec<NodeIndex> = Vec::new();
    for i in 0..6 {
        let multi = b.multi(1, keys.clone());
        subs.push(if i == 0 { multi } else { b.a(multi) });
    }
    b.thresh(6, subs);

    match compile_tree(b.build().unwrap()) {
        Err(ContextError::NonStandard { script, error }) => {
            assert!(script.len() > 3600);
            assert_eq!(
                error,
                LimitsError::ScriptTooLarge {
                    size: script.len(),
                    max_size: 3600
                }
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn too_many_multisig_keys() {
    let mut b = TreeBuilder::new();
    b.multi(2, (1..=21).map(key).collect());
    let err = compile_tree(b.build().unwrap()).unwrap_err();
    assert!(matches!(
        err,
        ContextError::NonStandard {
            error: LimitsError::TooManyMultisigKeys { keys: 21, .. },
            ..
        }
    ));
}

#[test]
fn type_error_is_reported() {
    // and_v(pk(K1),pk(K2)): the left side must be V
    let mut b = TreeBuilder::new();
    let x = b.pk(key(1));
    let y = b.pk(key(2));
    b.and_v(x, y);
    let err = compile_tree(b.build().unwrap()).unwrap_err();
    assert!(matches!(err, ContextError::Type(_)));
}

#[test]
fn recovery_path_with_timelock() {
    // or_d(multi(2,K1,K2,K3),and_v(v:pkh(K4),older(1008)))
    let mut b = TreeBuilder::new();
    let x = b.multi(2, vec![key(1), key(2), key(3)]);
    let recovery = b.pkh(key(4));
    let recovery = b.v(recovery);
    let delay = b.older(1008);
    let z = b.and_v(recovery, delay);
    b.or_d(x, z);
    let (ctx, _) = compile(b);
    assert!(ctx.is_sane());

    let cosigners = assets(&[1, 3]);
    let outcome = ctx.satisfy(&cosigners).unwrap();
    assert!(outcome.is_satisfied());
    assert_spends(&ctx, outcome.witness(), &cosigners);

    let mut recovery = assets(&[4]);
    assert_eq!(ctx.satisfy(&recovery), Err(SatisfyError::Unsatisfiable));
    recovery.set_time(TimeContext::new(1008, 0));
    let outcome = ctx.satisfy(&recovery).unwrap();
    assert!(outcome.is_satisfied());
    assert_spends(&ctx, outcome.witness(), &recovery);
}

#[test]
fn dissatisfaction_is_rejected_cleanly() {
    // andor(pk(K1),or_i(pk(K2),pk(K3)),thresh(1,pk(K4),s:pk(K5)))
    let mut b = TreeBuilder::new();
    let x = b.pk(key(1));
    let y1 = b.pk(key(2));
    let y2 = b.pk(key(3));
    let y = b.or_i(y1, y2);
    let z1 = b.pk(key(4));
    let z2 = b.pk(key(5));
    let z2 = b.s(z2);
    let z = b.thresh(1, vec![z1, z2]);
    b.and_or(x, y, z);
    let (ctx, script) = compile(b);

    let nobody = Assets::new();
    let outcome = ctx.satisfy(&nobody).unwrap();
    assert!(!outcome.is_satisfied());
    assert_eq!(
        interpreter::execute(&script, outcome.witness(), &nobody),
        Ok(ExecOutcome::Rejected)
    );

    for signers in [&[1, 3][..], &[5][..], &[1, 2, 4][..]] {
        let assets = assets(signers);
        let outcome = ctx.satisfy(&assets).unwrap();
        assert!(outcome.is_satisfied(), "signers {:?}", signers);
        assert_spends(&ctx, outcome.witness(), &assets);
    }
}

#[test]
fn wrong_witness_fails() {
    let mut b = TreeBuilder::new();
    let x = b.pk(key(1));
    let x = b.v(x);
    let y = b.pk(key(2));
    b.and_v(x, y);
    let (_, script) = compile(b);

    // signatures swapped
    let witness = Witness::from_slice(&[signature(1).to_vec(), signature(2).to_vec()]);
    assert!(interpreter::execute(&script, &witness, &assets(&[1, 2])).is_err());
}
