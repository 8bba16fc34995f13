// =============================================================================
// OPCODE - Bytecode instruction set
// =============================================================================
//
// Each instruction is one opcode byte, followed by an unsigned LEB128 operand
// when the opcode is at or above `OPCODE_ARG_MIN`. Stack effects below are
// written as `( before -- after )`, top of stack on the right.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0, // - NOP -

    // stack shuffles
    Dup,  //   x DUP x x
    Dup2, // x y DUP2 x y x y
    Pop,  //   x POP -
    Exch, // x y EXCH y x

    // binary comparisons
    Lt,
    Gt,
    Ge,
    Le,
    Eql,
    Neq,

    // binary arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Amp,
    Pipe,
    Circumflex,
    LtLt,
    GtGt,

    In,

    // unary operators
    UPlus,  // x UPLUS x
    UMinus, // x UMINUS -x
    Tilde,  // x TILDE ~x

    None,      // - NONE None
    True,      // - TRUE True
    False,     // - FALSE False
    Mandatory, // - MANDATORY Mandatory      [sentinel value for required kwonly args]

    IterPush,    //       iterable ITERPUSH -     [pushes the iterator stack]
    IterPop,     //              - ITERPOP -      [pops the iterator stack]
    Not,         //          value NOT bool
    Return,      //          value RETURN -
    SetIndex,    //        a i new SETINDEX -
    Index,       //            a i INDEX elem
    SetDict,     // dict key value SETDICT -
    SetDictUniq, // dict key value SETDICTUNIQ -
    Append,      //      list elem APPEND -
    Slice,       //   x lo hi step SLICE slice
    InplaceAdd,  //            x y INPLACE_ADD z      where z is x+y or x.extend(y)
    InplacePipe, //            x y INPLACE_PIPE z     where z is x|y
    MakeDict,    //              - MAKEDICT dict

    // --- opcodes with an argument must go below this line ---

    // control flow
    Jmp,     //            - JMP<addr>     -
    Cjmp,    //         cond CJMP<addr>    -
    IterJmp, //            - ITERJMP<addr> elem   (and fall through) [acts on topmost iterator]
    //                                   or:   -      (and jump)

    Constant,     //                    - CONSTANT<constant>  value
    MakeTuple,    //            x1 ... xn MAKETUPLE<n>        tuple
    MakeList,     //            x1 ... xn MAKELIST<n>         list
    MakeFunc,     // defaults+freevars MAKEFUNC<func>      fn
    Load,         //  from1 ... fromN module LOAD<n>       v1 ... vN
    SetLocal,     //                value SETLOCAL<local>     -
    SetGlobal,    //                value SETGLOBAL<global>   -
    Local,        //                    - LOCAL<local>        value
    Free,         //                    - FREE<freevar>       cell
    FreeCell,     //                    - FREECELL<freevar>   value       (content of FREE cell)
    LocalCell,    //                    - LOCALCELL<local>    value       (content of LOCAL cell)
    SetLocalCell, //                value SETLOCALCELL<local> -           (set content of LOCAL cell)
    Global,       //                    - GLOBAL<global>      value
    Predeclared,  //                    - PREDECLARED<name>   value
    Universal,    //                    - UNIVERSAL<name>     value
    Attr,         //                    x ATTR<name>          y           y = x.name
    SetField,     //                  x y SETFIELD<name>      -           x.name = y
    Unpack,       //             iterable UNPACK<n>           vn ... v1

    // n>>8 is #positional args and n&0xff is #named args (pairs).
    Call,      // fn positional named                CALL<n>        result
    CallVar,   // fn positional named *args          CALL_VAR<n>    result
    CallKw,    // fn positional named       **kwargs CALL_KW<n>     result
    CallVarKw, // fn positional named *args **kwargs CALL_VAR_KW<n> result
}

/// First opcode that carries an operand.
pub const OPCODE_ARG_MIN: Opcode = Opcode::Jmp;

/// Largest opcode value; bytes above it are not valid opcodes.
pub const OPCODE_MAX: Opcode = Opcode::CallVarKw;

/// Every opcode, indexed by its byte value.
const ALL: [Opcode; OPCODE_MAX as usize + 1] = [
    Opcode::Nop,
    Opcode::Dup,
    Opcode::Dup2,
    Opcode::Pop,
    Opcode::Exch,
    Opcode::Lt,
    Opcode::Gt,
    Opcode::Ge,
    Opcode::Le,
    Opcode::Eql,
    Opcode::Neq,
    Opcode::Plus,
    Opcode::Minus,
    Opcode::Star,
    Opcode::Slash,
    Opcode::SlashSlash,
    Opcode::Percent,
    Opcode::Amp,
    Opcode::Pipe,
    Opcode::Circumflex,
    Opcode::LtLt,
    Opcode::GtGt,
    Opcode::In,
    Opcode::UPlus,
    Opcode::UMinus,
    Opcode::Tilde,
    Opcode::None,
    Opcode::True,
    Opcode::False,
    Opcode::Mandatory,
    Opcode::IterPush,
    Opcode::IterPop,
    Opcode::Not,
    Opcode::Return,
    Opcode::SetIndex,
    Opcode::Index,
    Opcode::SetDict,
    Opcode::SetDictUniq,
    Opcode::Append,
    Opcode::Slice,
    Opcode::InplaceAdd,
    Opcode::InplacePipe,
    Opcode::MakeDict,
    Opcode::Jmp,
    Opcode::Cjmp,
    Opcode::IterJmp,
    Opcode::Constant,
    Opcode::MakeTuple,
    Opcode::MakeList,
    Opcode::MakeFunc,
    Opcode::Load,
    Opcode::SetLocal,
    Opcode::SetGlobal,
    Opcode::Local,
    Opcode::Free,
    Opcode::FreeCell,
    Opcode::LocalCell,
    Opcode::SetLocalCell,
    Opcode::Global,
    Opcode::Predeclared,
    Opcode::Universal,
    Opcode::Attr,
    Opcode::SetField,
    Opcode::Unpack,
    Opcode::Call,
    Opcode::CallVar,
    Opcode::CallKw,
    Opcode::CallVarKw,
];

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        ALL.get(byte as usize).copied()
    }

    /// Whether this opcode is followed by an operand.
    pub fn has_arg(self) -> bool {
        self >= OPCODE_ARG_MIN
    }

    /// Conditional jumps carry a fixed-width (4 byte) address operand so that
    /// it can be patched in place.
    pub fn is_cond_jump(self) -> bool {
        matches!(self, Opcode::Cjmp | Opcode::IterJmp)
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw
        )
    }

    /// Net change in operand-stack depth caused by one execution of this
    /// opcode with operand `arg`.
    ///
    /// `ITERJMP` reports 0 here: it pushes an element only on the
    /// fall-through edge, which the linearizer accounts for separately.
    pub fn stack_effect(self, arg: u32) -> i32 {
        match self {
            Opcode::Nop | Opcode::Exch => 0,
            Opcode::Dup => 1,
            Opcode::Dup2 => 2,
            Opcode::Pop => -1,

            Opcode::Lt
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Le
            | Opcode::Eql
            | Opcode::Neq
            | Opcode::Plus
            | Opcode::Minus
            | Opcode::Star
            | Opcode::Slash
            | Opcode::SlashSlash
            | Opcode::Percent
            | Opcode::Amp
            | Opcode::Pipe
            | Opcode::Circumflex
            | Opcode::LtLt
            | Opcode::GtGt
            | Opcode::In => -1,

            Opcode::UPlus | Opcode::UMinus | Opcode::Tilde | Opcode::Not => 0,

            Opcode::None | Opcode::True | Opcode::False | Opcode::Mandatory => 1,

            Opcode::IterPush => -1,
            Opcode::IterPop => 0,
            Opcode::Return => -1,
            Opcode::SetIndex => -3,
            Opcode::Index => -1,
            Opcode::SetDict | Opcode::SetDictUniq => -3,
            Opcode::Append => -2,
            Opcode::Slice => -3,
            Opcode::InplaceAdd | Opcode::InplacePipe => -1,
            Opcode::MakeDict => 1,

            Opcode::Jmp => 0,
            Opcode::Cjmp => -1,
            Opcode::IterJmp => 0,

            Opcode::Constant => 1,
            Opcode::MakeTuple | Opcode::MakeList => 1 - arg as i32,
            Opcode::MakeFunc => 0,
            Opcode::Load => -1,
            Opcode::SetLocal | Opcode::SetGlobal | Opcode::SetLocalCell => -1,
            Opcode::Local
            | Opcode::Free
            | Opcode::FreeCell
            | Opcode::LocalCell
            | Opcode::Global
            | Opcode::Predeclared
            | Opcode::Universal => 1,
            Opcode::Attr => 0,
            Opcode::SetField => -2,
            Opcode::Unpack => arg as i32 - 1,

            Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw => {
                let named = (arg & 0xff) as i32;
                let positional = (arg >> 8) as i32;
                let mut effect = -(2 * named + positional);
                if self != Opcode::Call {
                    effect -= 1;
                }
                if self == Opcode::CallVarKw {
                    effect -= 1;
                }
                effect
            }
        }
    }

    /// Upper-case mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Dup => "DUP",
            Opcode::Dup2 => "DUP2",
            Opcode::Pop => "POP",
            Opcode::Exch => "EXCH",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::Le => "LE",
            Opcode::Eql => "EQL",
            Opcode::Neq => "NEQ",
            Opcode::Plus => "PLUS",
            Opcode::Minus => "MINUS",
            Opcode::Star => "STAR",
            Opcode::Slash => "SLASH",
            Opcode::SlashSlash => "SLASHSLASH",
            Opcode::Percent => "PERCENT",
            Opcode::Amp => "AMP",
            Opcode::Pipe => "PIPE",
            Opcode::Circumflex => "CIRCUMFLEX",
            Opcode::LtLt => "LTLT",
            Opcode::GtGt => "GTGT",
            Opcode::In => "IN",
            Opcode::UPlus => "UPLUS",
            Opcode::UMinus => "UMINUS",
            Opcode::Tilde => "TILDE",
            Opcode::None => "NONE",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Mandatory => "MANDATORY",
            Opcode::IterPush => "ITERPUSH",
            Opcode::IterPop => "ITERPOP",
            Opcode::Not => "NOT",
            Opcode::Return => "RETURN",
            Opcode::SetIndex => "SETINDEX",
            Opcode::Index => "INDEX",
            Opcode::SetDict => "SETDICT",
            Opcode::SetDictUniq => "SETDICTUNIQ",
            Opcode::Append => "APPEND",
            Opcode::Slice => "SLICE",
            Opcode::InplaceAdd => "INPLACE_ADD",
            Opcode::InplacePipe => "INPLACE_PIPE",
            Opcode::MakeDict => "MAKEDICT",
            Opcode::Jmp => "JMP",
            Opcode::Cjmp => "CJMP",
            Opcode::IterJmp => "ITERJMP",
            Opcode::Constant => "CONSTANT",
            Opcode::MakeTuple => "MAKETUPLE",
            Opcode::MakeList => "MAKELIST",
            Opcode::MakeFunc => "MAKEFUNC",
            Opcode::Load => "LOAD",
            Opcode::SetLocal => "SETLOCAL",
            Opcode::SetGlobal => "SETGLOBAL",
            Opcode::Local => "LOCAL",
            Opcode::Free => "FREE",
            Opcode::FreeCell => "FREECELL",
            Opcode::LocalCell => "LOCALCELL",
            Opcode::SetLocalCell => "SETLOCALCELL",
            Opcode::Global => "GLOBAL",
            Opcode::Predeclared => "PREDECLARED",
            Opcode::Universal => "UNIVERSAL",
            Opcode::Attr => "ATTR",
            Opcode::SetField => "SETFIELD",
            Opcode::Unpack => "UNPACK",
            Opcode::Call => "CALL",
            Opcode::CallVar => "CALL_VAR",
            Opcode::CallKw => "CALL_KW",
            Opcode::CallVarKw => "CALL_VAR_KW",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_round_trips_every_opcode() {
        for (i, op) in ALL.iter().enumerate() {
            assert_eq!(*op as usize, i, "table out of order at {}", op);
            assert_eq!(Opcode::from_byte(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_byte(OPCODE_MAX as u8 + 1), None);
    }

    #[test]
    fn test_operand_threshold() {
        assert!(!Opcode::MakeDict.has_arg());
        assert!(Opcode::Jmp.has_arg());
        assert!(Opcode::CallVarKw.has_arg());
        assert!(!Opcode::Nop.has_arg());
    }

    #[test]
    fn test_fixed_stack_effects() {
        assert_eq!(Opcode::Dup.stack_effect(0), 1);
        assert_eq!(Opcode::Dup2.stack_effect(0), 2);
        assert_eq!(Opcode::Plus.stack_effect(0), -1);
        assert_eq!(Opcode::SetIndex.stack_effect(0), -3);
        assert_eq!(Opcode::Append.stack_effect(0), -2);
        assert_eq!(Opcode::Load.stack_effect(3), -1);
    }

    #[test]
    fn test_variable_stack_effects() {
        assert_eq!(Opcode::MakeTuple.stack_effect(0), 1);
        assert_eq!(Opcode::MakeList.stack_effect(3), -2);
        assert_eq!(Opcode::Unpack.stack_effect(3), 2);
        assert_eq!(Opcode::IterJmp.stack_effect(0), 0);
    }

    #[test]
    fn test_call_stack_effects() {
        // f(a, b, k=v): pops fn, a, b, "k", v and pushes the result
        let arg = (2 << 8) | 1;
        assert_eq!(Opcode::Call.stack_effect(arg), -4);
        assert_eq!(Opcode::CallVar.stack_effect(arg), -5);
        assert_eq!(Opcode::CallKw.stack_effect(arg), -5);
        assert_eq!(Opcode::CallVarKw.stack_effect(arg), -6);
        assert_eq!(Opcode::Call.stack_effect(0), 0);
    }
}
