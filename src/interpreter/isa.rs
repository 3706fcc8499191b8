//! Instruction set definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode table and hands it to a callback macro, so the table is
//! written once and expanded wherever instruction metadata is needed.
//!
//! This module generates:
//! - The [`Opcode`] enum
//! - Mnemonic and addressing-mode lookups per opcode
//! - Mnemonic + arity resolution ([`resolve`])
//!
//! Several opcodes may share a mnemonic and differ by operand count (`inc`,
//! `dec`). Resolution picks the variant whose arity matches the operands
//! supplied at the call site.

use crate::interpreter::errors::InterpreterErrorKind;
use crate::interpreter::operand::Mode;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // General
            // =========================
            /// nop ; does nothing
            Nop = 0, "nop" => [],
            /// cmp a b ; compares a with b and stores the ordering in the comparison flag
            Cmp = 1, "cmp" => [lhs: RVal, rhs: RVal],
            /// cpy [d] v ; copies v into d
            Cpy = 2, "cpy" => [dst: LVal, src: RVal],
            /// typ [d] "name" ; stores the type name of variable `name` into d
            Typ = 3, "typ" => [dst: LVal, name: Val],
            /// prt v ; prints a literal
            Prt = 4, "prt" => [value: Val],
            /// prv "name" ; prints the value of variable `name`
            Prv = 5, "prv" => [name: Val],
            /// spr [d] c ; spreads the elements of compound c over d, d+1, ...
            Spr = 6, "spr" => [dst: LVal, src: RVal],
            /// psh v ; pushes v on the data stack
            Psh = 7, "psh" => [src: RVal],
            /// pop [d] ; pops the top of the data stack into d
            Pop = 8, "pop" => [dst: LVal],
            // =========================
            // Functions
            // =========================
            /// run args f ; calls f (function or label) with args
            Run = 9, "run" => [args: RVal, callee: RVar],
            /// get [d] ; copies the last returned value into d
            Get = 10, "get" => [dst: LVar],
            /// ret v ; returns v to the caller
            Ret = 11, "ret" => [value: RVar],
            /// fun [name] (params) ; declares a function, execution skips its body
            Fun = 12, "fun" => [slot: LVal, params: LVar],
            // =========================
            // Heap
            // =========================
            /// all [p] n ; allocates n heap slots and stores the base address in p
            All = 13, "all" => [dst: LVal, size: RVal],
            /// del a ; frees the allocation starting at a
            Del = 14, "del" => [addr: RVal],
            // =========================
            // Termination and errors
            // =========================
            /// die ; halts the program
            Die = 15, "die" => [],
            /// err ; raises a recoverable error
            Err = 16, "err" => [],
            /// rea [d] (c i) | (c i j) ; reads element i, or the slice [i, j), of c
            Rea = 17, "rea" => [dst: LVal, src: RVal],
            // =========================
            // Jumps
            // =========================
            /// jmp l ; unconditional jump
            Jmp = 18, "jmp" => [target: RVal],
            /// jeq l ; jumps if the last comparison was equal
            Jeq = 19, "jeq" => [target: RVal],
            /// jne l ; jumps if the last comparison was not equal
            Jne = 20, "jne" => [target: RVal],
            /// jgt l ; jumps if the last comparison was greater
            Jgt = 21, "jgt" => [target: RVal],
            /// jlt l ; jumps if the last comparison was less
            Jlt = 22, "jlt" => [target: RVal],
            /// jge l ; jumps if the last comparison was greater or equal
            Jge = 23, "jge" => [target: RVal],
            /// jle l ; jumps if the last comparison was less or equal
            Jle = 24, "jle" => [target: RVal],
            /// jer l ; jumps and clears the error flag if it is set
            Jer = 25, "jer" => [target: RVal],
            /// jnr l ; jumps if the error flag is clear, otherwise marks the error as seen
            Jnr = 26, "jnr" => [target: RVal],
            // =========================
            // Arithmetic
            // =========================
            /// add [d] a b ; d = a + b (also concatenates strings and compounds)
            Add = 27, "add" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// sub [d] a b ; d = a - b
            Sub = 28, "sub" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// mul [d] a b ; d = a * b
            Mul = 29, "mul" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// div [d] a b ; d = a / b
            Div = 30, "div" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// mod [d] a b ; d = a % b
            Mod = 31, "mod" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// inc [d] ; d = d + 1
            Inc1 = 32, "inc" => [dst: LVal],
            /// inc [d] n ; d = d + n
            Inc2 = 33, "inc" => [dst: LVal, amount: RVal],
            /// dec [d] ; d = d - 1
            Dec1 = 34, "dec" => [dst: LVal],
            /// dec [d] n ; d = d - n
            Dec2 = 35, "dec" => [dst: LVal, amount: RVal],
            // =========================
            // Bitwise
            // =========================
            /// bor [d] a b ; d = a | b
            Bor = 36, "bor" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// and [d] a b ; d = a & b
            And = 37, "and" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// xor [d] a b ; d = a ^ b
            Xor = 38, "xor" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// inv [d] a m ; d = !a & m
            Inv = 39, "inv" => [dst: LVal, lhs: RVal, mask: RVal],
            /// shl [d] a n ; d = a << n
            Shl = 40, "shl" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// shr [d] a n ; d = a >> n (arithmetic)
            Shr = 41, "shr" => [dst: LVal, lhs: RVal, rhs: RVal],
            /// usr [d] a n ; d = a >> n (logical)
            Usr = 42, "usr" => [dst: LVal, lhs: RVal, rhs: RVal],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl Opcode {
            /// Every opcode, in table order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the addressing mode of each operand, in order.
            pub const fn modes(&self) -> &'static [Mode] {
                match self {
                    $( Opcode::$name => &[ $( Mode::$kind ),* ], )*
                }
            }

            /// Number of operands this opcode takes.
            pub const fn arity(&self) -> usize {
                self.modes().len()
            }
        }
    };
}

for_each_instruction!(define_instructions);

/// Returns true if `text` is the mnemonic of at least one opcode.
pub fn is_mnemonic(text: &str) -> bool {
    Opcode::ALL.iter().any(|op| op.mnemonic() == text)
}

/// Resolves a mnemonic and an operand count to a concrete opcode.
pub fn resolve(mnemonic: &str, supplied: usize) -> Result<Opcode, InterpreterErrorKind> {
    let mut tried = Vec::new();
    for op in Opcode::ALL.iter().filter(|op| op.mnemonic() == mnemonic) {
        if op.arity() == supplied {
            return Ok(*op);
        }
        tried.push(op.arity().to_string());
    }

    if tried.is_empty() {
        return Err(InterpreterErrorKind::UnknownInstruction {
            name: mnemonic.to_string(),
        });
    }
    Err(InterpreterErrorKind::ArityMismatch {
        mnemonic: mnemonic.to_string(),
        expected: tried.join(" or "),
        supplied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_arity() {
        assert_eq!(resolve("inc", 1), Ok(Opcode::Inc1));
        assert_eq!(resolve("inc", 2), Ok(Opcode::Inc2));
        assert_eq!(resolve("dec", 1), Ok(Opcode::Dec1));
        assert_eq!(resolve("dec", 2), Ok(Opcode::Dec2));
        assert_eq!(resolve("nop", 0), Ok(Opcode::Nop));
        assert_eq!(resolve("and", 3), Ok(Opcode::And));
    }

    #[test]
    fn arity_mismatch_lists_candidates() {
        assert_eq!(
            resolve("inc", 3),
            Err(InterpreterErrorKind::ArityMismatch {
                mnemonic: "inc".to_string(),
                expected: "1 or 2".to_string(),
                supplied: 3,
            })
        );
        assert!(matches!(
            resolve("cpy", 1),
            Err(InterpreterErrorKind::ArityMismatch { supplied: 1, .. })
        ));
    }

    #[test]
    fn unknown_mnemonic() {
        assert_eq!(
            resolve("foo", 0),
            Err(InterpreterErrorKind::UnknownInstruction {
                name: "foo".to_string()
            })
        );
        assert!(!is_mnemonic("foo"));
        assert!(is_mnemonic("usr"));
    }

    #[test]
    fn opcodes_are_dense_and_ordered() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
    }

    #[test]
    fn modes_match_table() {
        assert_eq!(Opcode::Cpy.modes(), &[Mode::LVal, Mode::RVal]);
        assert_eq!(Opcode::Fun.modes(), &[Mode::LVal, Mode::LVar]);
        assert_eq!(Opcode::Run.modes(), &[Mode::RVal, Mode::RVar]);
        assert_eq!(Opcode::Prt.arity(), 1);
        assert_eq!(Opcode::Die.arity(), 0);
    }
}
