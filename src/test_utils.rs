use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{PublicKey, ecdsa};

fn secret_key(i: u8) -> SecretKey {
    SecretKey::from_slice(&[i; 32]).unwrap()
}

/// Deterministic compressed test key number `i`. `i` must not be zero.
pub fn key(i: u8) -> PublicKey {
    PublicKey::new(secret_key(i).public_key(&Secp256k1::signing_only()))
}

/// Deterministic SIGHASH_ALL signature of a fixed message with key `i`.
#[cfg(feature = "satisfy")]
pub fn signature(i: u8) -> ecdsa::Signature {
    let msg = Message::from_digest([0x42; 32]);
    let signature = Secp256k1::signing_only().sign_ecdsa(&msg, &secret_key(i));
    ecdsa::Signature::sighash_all(signature)
}

/// Assets able to sign for every key in `signers`.
#[cfg(feature = "satisfy")]
pub fn assets(signers: &[u8]) -> crate::satisfy::Assets {
    let mut assets = crate::satisfy::Assets::new();
    for &i in signers {
        assets.add_signature(key(i), signature(i));
    }
    assets
}
