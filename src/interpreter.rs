//! A small P2WSH script interpreter.
//!
//! Executes exactly the opcodes miniscript compiles to, under the standard
//! segwit v0 policy rules (MINIMALIF, NULLFAIL, NULLDUMMY and CLEANSTACK).
//! Signatures are not verified cryptographically: a non-empty signature is
//! valid when it equals what the [`Satisfier`] produces for the key.

use alloc::vec::Vec;

use bitcoin::opcodes::Opcode;
use bitcoin::opcodes::all::*;
use bitcoin::script::Instruction;
use bitcoin::{PublicKey, Script, Witness};

use crate::bitcoin_definition_link;
use crate::limits::MAX_PUBKEYS_PER_MULTISIG;
use crate::satisfy::{HashFunc, Satisfier};
use crate::stack::Stack;

const MAX_SCRIPTNUM_LEN: usize = 4;
const MAX_LOCKTIME_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The script finished with a true value on the stack.
    Accepted,
    /// The script finished cleanly with a false value on the stack.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("malformed script")]
    MalformedScript,
    #[error("stack underflow at {0}")]
    StackUnderflow(Opcode),
    #[error("unbalanced conditional")]
    UnbalancedConditional,
    #[error("conditional argument is not minimal")]
    MinimalIf,
    #[error("{0} failed")]
    VerifyFailed(Opcode),
    #[error("non-empty signature failed")]
    NullFail,
    #[error("non-empty CHECKMULTISIG dummy")]
    NullDummy,
    #[error("invalid script number")]
    InvalidNumber,
    #[error("timelock {0} is not satisfied")]
    UnsatisfiedTimelock(u32),
    #[error("negative locktime")]
    NegativeLockTime,
    #[error("invalid public key")]
    InvalidKey,
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(Opcode),
    #[error("{0} elements left on the stack")]
    CleanStack(usize),
    #[error("invalid CHECKMULTISIG key or signature count")]
    InvalidMultisigCount,
}

/// Run `script` with `witness` as the initial stack, the last witness element
/// on top.
pub fn execute(
    script: &Script,
    witness: &Witness,
    satisfier: &dyn Satisfier,
) -> Result<ExecOutcome, ExecError> {
    let mut machine = Machine {
        stack: witness.iter().map(<[u8]>::to_vec).collect(),
        alt_stack: Stack::new(),
        satisfier,
    };
    let mut exec: Vec<bool> = Vec::new();

    for instruction in script.instructions() {
        let instruction = instruction.map_err(|_| ExecError::MalformedScript)?;
        let executing = !exec.contains(&false);

        match instruction {
            Instruction::PushBytes(bytes) => {
                if executing {
                    machine.stack.push(bytes.as_bytes().to_vec());
                }
            }
            Instruction::Op(op @ (OP_IF | OP_NOTIF)) => {
                let mut branch = false;
                if executing {
                    branch = match machine.pop(op)?.as_slice() {
                        [] => false,
                        [1] => true,
                        _ => return Err(ExecError::MinimalIf),
                    };
                    if op == OP_NOTIF {
                        branch = !branch;
                    }
                }
                exec.push(branch);
            }
            Instruction::Op(OP_ELSE) => {
                let branch = exec.last_mut().ok_or(ExecError::UnbalancedConditional)?;
                *branch = !*branch;
            }
            Instruction::Op(OP_ENDIF) => {
                exec.pop().ok_or(ExecError::UnbalancedConditional)?;
            }
            Instruction::Op(op) => {
                if executing {
                    machine.step(op)?;
                }
            }
        }
    }

    if !exec.is_empty() {
        return Err(ExecError::UnbalancedConditional);
    }
    if machine.stack.len() != 1 {
        return Err(ExecError::CleanStack(machine.stack.len()));
    }
    match machine.stack.top() {
        Some(top) if cast_to_bool(top) => Ok(ExecOutcome::Accepted),
        _ => Ok(ExecOutcome::Rejected),
    }
}

struct Machine<'s> {
    stack: Stack<Vec<u8>>,
    alt_stack: Stack<Vec<u8>>,
    satisfier: &'s dyn Satisfier,
}

impl Machine<'_> {
    fn pop(&mut self, op: Opcode) -> Result<Vec<u8>, ExecError> {
        self.stack.pop().ok_or(ExecError::StackUnderflow(op))
    }

    fn top(&self, op: Opcode) -> Result<&Vec<u8>, ExecError> {
        self.stack.top().ok_or(ExecError::StackUnderflow(op))
    }

    fn pop_num(&mut self, op: Opcode) -> Result<i64, ExecError> {
        decode_num(&self.pop(op)?, MAX_SCRIPTNUM_LEN)
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { alloc::vec![1] } else { Vec::new() });
    }

    /// Push the result, or check it for the VERIFY variant of the opcode.
    fn conclude(&mut self, op: Opcode, verify_op: Opcode, ok: bool) -> Result<(), ExecError> {
        if op != verify_op {
            self.push_bool(ok);
        } else if !ok {
            return Err(ExecError::VerifyFailed(op));
        }
        Ok(())
    }

    fn step(&mut self, op: Opcode) -> Result<(), ExecError> {
        let code = op.to_u8();
        if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&code) {
            let n = code - OP_PUSHNUM_1.to_u8() + 1;
            self.stack.push(encode_num(i64::from(n)));
            return Ok(());
        }

        match op {
            OP_PUSHNUM_NEG1 => self.stack.push(encode_num(-1)),
            OP_DUP => {
                let top = self.top(op)?.clone();
                self.stack.push(top);
            }
            OP_IFDUP => {
                let top = self.top(op)?;
                if cast_to_bool(top) {
                    let top = top.clone();
                    self.stack.push(top);
                }
            }
            OP_SIZE => {
                let len = self.top(op)?.len();
                self.stack.push(encode_num(len as i64));
            }
            OP_SWAP => {
                let a = self.pop(op)?;
                let b = self.pop(op)?;
                self.stack.push(a);
                self.stack.push(b);
            }
            OP_TOALTSTACK => {
                let top = self.pop(op)?;
                self.alt_stack.push(top);
            }
            OP_FROMALTSTACK => {
                let top = self.alt_stack.pop().ok_or(ExecError::StackUnderflow(op))?;
                self.stack.push(top);
            }
            OP_VERIFY => {
                let top = self.pop(op)?;
                if !cast_to_bool(&top) {
                    return Err(ExecError::VerifyFailed(op));
                }
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = self.pop(op)?;
                let a = self.pop(op)?;
                self.conclude(op, OP_EQUALVERIFY, a == b)?;
            }
            OP_0NOTEQUAL => {
                let n = self.pop_num(op)?;
                self.push_bool(n != 0);
            }
            OP_ADD => {
                let b = self.pop_num(op)?;
                let a = self.pop_num(op)?;
                self.stack.push(encode_num(a + b));
            }
            OP_BOOLAND | OP_BOOLOR => {
                let b = self.pop_num(op)?;
                let a = self.pop_num(op)?;
                self.push_bool(if op == OP_BOOLAND {
                    a != 0 && b != 0
                } else {
                    a != 0 || b != 0
                });
            }
            OP_SHA256 | OP_HASH256 | OP_RIPEMD160 | OP_HASH160 => {
                let hash_func = match op {
                    OP_SHA256 => HashFunc::Sha256,
                    OP_HASH256 => HashFunc::Hash256,
                    OP_RIPEMD160 => HashFunc::Ripemd160,
                    _ => HashFunc::Hash160,
                };
                let data = self.pop(op)?;
                self.stack.push(hash_func.digest(&data));
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let key = self.pop(op)?;
                let signature = self.pop(op)?;
                let ok = self.signature_matches(&signature, &key)?;
                if !ok && !signature.is_empty() {
                    return Err(ExecError::NullFail);
                }
                self.conclude(op, OP_CHECKSIGVERIFY, ok)?;
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => self.check_multisig(op)?,
            OP_CSV => {
                let n = self.lock_time(op)?;
                if !self.satisfier.check_older(n) {
                    return Err(ExecError::UnsatisfiedTimelock(n));
                }
            }
            OP_CLTV => {
                let n = self.lock_time(op)?;
                if !self.satisfier.check_after(n) {
                    return Err(ExecError::UnsatisfiedTimelock(n));
                }
            }
            _ => return Err(ExecError::UnsupportedOpcode(op)),
        }
        Ok(())
    }

    fn signature_matches(&self, signature: &[u8], key: &[u8]) -> Result<bool, ExecError> {
        if signature.is_empty() {
            return Ok(false);
        }
        let key = PublicKey::from_slice(key).map_err(|_| ExecError::InvalidKey)?;
        Ok(self
            .satisfier
            .sign(&key)
            .is_some_and(|expected| expected.to_vec() == signature))
    }

    /// The locktime operand is left on the stack.
    fn lock_time(&self, op: Opcode) -> Result<u32, ExecError> {
        let n = decode_num(self.top(op)?, MAX_LOCKTIME_LEN)?;
        if n < 0 {
            return Err(ExecError::NegativeLockTime);
        }
        u32::try_from(n).map_err(|_| ExecError::InvalidNumber)
    }

    #[doc = bitcoin_definition_link!("script/interpreter.cpp", 1093..=1183)]
    fn check_multisig(&mut self, op: Opcode) -> Result<(), ExecError> {
        let key_count = self.pop_num(op)?;
        let key_count = usize::try_from(key_count)
            .ok()
            .filter(|&n| n <= MAX_PUBKEYS_PER_MULTISIG)
            .ok_or(ExecError::InvalidMultisigCount)?;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(self.pop(op)?);
        }

        let sig_count = self.pop_num(op)?;
        let sig_count = usize::try_from(sig_count)
            .ok()
            .filter(|&n| n <= key_count)
            .ok_or(ExecError::InvalidMultisigCount)?;
        let mut signatures = Vec::with_capacity(sig_count);
        for _ in 0..sig_count {
            signatures.push(self.pop(op)?);
        }

        // off-by-one element, must be empty
        if !self.pop(op)?.is_empty() {
            return Err(ExecError::NullDummy);
        }

        // Both vectors hold the topmost element first. Signatures must match
        // keys in the same order.
        let (mut isig, mut ikey) = (0, 0);
        let mut success = true;
        while success && isig < sig_count {
            if self.signature_matches(&signatures[isig], &keys[ikey])? {
                isig += 1;
            }
            ikey += 1;
            if sig_count - isig > key_count - ikey {
                success = false;
            }
        }

        if !success && signatures.iter().any(|signature| !signature.is_empty()) {
            return Err(ExecError::NullFail);
        }
        self.conclude(op, OP_CHECKMULTISIGVERIFY, success)
    }
}

/// Script truthiness: any non-zero byte, except a lone sign bit in the last
/// byte (negative zero).
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, byte) in data.iter().enumerate() {
        if *byte != 0 {
            return !(i == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

/// Decode a little-endian sign-magnitude script number of at most `max_len`
/// bytes.
pub fn decode_num(data: &[u8], max_len: usize) -> Result<i64, ExecError> {
    if data.len() > max_len {
        return Err(ExecError::InvalidNumber);
    }
    let Some(&last) = data.last() else {
        return Ok(0);
    };

    let mut result = 0i64;
    for (i, byte) in data.iter().enumerate() {
        result |= i64::from(*byte) << (8 * i);
    }
    if last & 0x80 != 0 {
        let sign_bit = 0x80i64 << (8 * (data.len() - 1));
        return Ok(-(result & !sign_bit));
    }
    Ok(result)
}

/// Minimal script number encoding of `value`.
pub fn encode_num(value: i64) -> Vec<u8> {
    let mut result = Vec::new();
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();

    while magnitude > 0 {
        result.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    if let Some(&last) = result.last() {
        if last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0 });
        } else if negative {
            let len = result.len();
            result[len - 1] |= 0x80;
        }
    }
    result
}
