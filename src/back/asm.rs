//! x86 (IA-32) register and mnemonic vocabulary.
//!
//! This is deliberately thin: the interesting work (descriptors, spill
//! selection, per-instruction emission) lives in [`super::codegen`]. This
//! module only names the registers we allocate from and the handful of
//! mnemonics that depend on an operator rather than being hardcoded at the
//! call site.

use derive_more::Display;

use crate::common::RelOp;

/// A general-purpose 32-bit register available to the allocator.
///
/// `eax` is deliberately first (and is therefore always tried first for an
/// otherwise-unconstrained load): it is not among the callee-saved
/// registers, so preferring it avoids unnecessary `pushl`/`popl` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Register {
    #[display("%eax")]
    Eax,
    #[display("%ebx")]
    Ebx,
    #[display("%ecx")]
    Ecx,
    #[display("%edx")]
    Edx,
    #[display("%esi")]
    Esi,
    #[display("%edi")]
    Edi,
}

impl Register {
    /// `true` for the registers the calling convention requires a function
    /// to restore before returning (`ebx`, `esi`, `edi`). The allocator must
    /// `pushl` any of these it actually uses in the prologue and `popl`
    /// them, in reverse order, in the epilogue.
    pub fn is_preserved(self) -> bool {
        matches!(self, Register::Ebx | Register::Esi | Register::Edi)
    }
}

/// The pool the allocator draws from, in the fixed order that both the
/// "pick any free register" step and spill-cost tie-breaking scan it in.
pub const REGISTER_POOL: [Register; 6] = [
    Register::Eax,
    Register::Ebx,
    Register::Ecx,
    Register::Edx,
    Register::Esi,
    Register::Edi,
];

/// Size in bytes of a stack slot (every value in this language is a 32-bit
/// `int`).
pub const WORD_SIZE: i32 = 4;

/// The conditional jump mnemonic that tests whether a preceding `cmpl`
/// satisfied `relop`.
pub fn relop_mnemonic(relop: RelOp) -> &'static str {
    match relop {
        RelOp::Lt => "jl",
        RelOp::Le => "jle",
        RelOp::Gt => "jg",
        RelOp::Ge => "jge",
        RelOp::Eq => "jz",
        RelOp::Ne => "jnz",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserved_registers_are_exactly_the_callee_saved_set() {
        let preserved: Vec<Register> = REGISTER_POOL.iter().copied().filter(|r| r.is_preserved()).collect();
        assert_eq!(preserved, vec![Register::Ebx, Register::Esi, Register::Edi]);
    }

    #[test]
    fn relop_mnemonics_match_x86_condition_codes() {
        assert_eq!(relop_mnemonic(RelOp::Lt), "jl");
        assert_eq!(relop_mnemonic(RelOp::Ge), "jge");
        assert_eq!(relop_mnemonic(RelOp::Eq), "jz");
    }

    #[test]
    fn register_display_is_att_syntax() {
        assert_eq!(Register::Eax.to_string(), "%eax");
        assert_eq!(Register::Edi.to_string(), "%edi");
    }
}
