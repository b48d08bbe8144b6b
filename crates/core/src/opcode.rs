//! The FLW0 instruction set.
//!
//! Raw opcodes 0x00-0x22 appear in script files. FUNC, SEND, and COND are
//! synthetic: they are introduced during flow abstraction (a COMM split by
//! whether its result is read, and a conditional jump with both branch
//! targets made explicit) and never appear on the wire.

/// Opcodes of the FLW0 virtual machine, plus the three synthetic forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Push a 32-bit integer (wide)
    PushI = 0x00,
    /// Push a 32-bit float (wide)
    PushF = 0x01,
    /// Push indexed integer (wide)
    PushIx = 0x02,
    /// Push indexed float (wide)
    PushIf = 0x03,
    /// Push the native-call result register
    PushReg = 0x04,
    PopIx = 0x05,
    PopFx = 0x06,
    /// Procedure prologue marker
    Proc = 0x07,
    /// Native function call
    Comm = 0x08,
    /// End of procedure
    End = 0x09,
    /// Tail jump to another procedure
    Jump = 0x0A,
    Call = 0x0B,
    Run = 0x0C,
    Goto = 0x0D,
    Add = 0x0E,
    Sub = 0x0F,
    Mul = 0x10,
    Div = 0x11,
    /// Arithmetic negation
    Minus = 0x12,
    /// Bitwise not
    Not = 0x13,
    Or = 0x14,
    And = 0x15,
    Eq = 0x16,
    Neq = 0x17,
    Lt = 0x18,
    Gt = 0x19,
    Lte = 0x1A,
    Gte = 0x1B,
    /// Conditional jump, pops the condition
    If = 0x1C,
    /// Push a 16-bit immediate
    PushIs = 0x1D,
    /// Push local integer register
    PushLix = 0x1E,
    /// Push local float register
    PushLfx = 0x1F,
    /// Pop into local integer register
    PopLix = 0x20,
    /// Pop into local float register
    PopLfx = 0x21,
    PushStr = 0x22,
    /// Synthetic: native call with a return value
    Func = 0x23,
    /// Synthetic: native call without a return value
    Send = 0x24,
    /// Synthetic: two-way conditional branch
    Cond = 0x25,
}

impl Opcode {
    /// Decode a raw opcode from the instruction stream.
    ///
    /// Synthetic opcodes are rejected here: they never appear on the wire.
    pub fn from_raw(raw: u32) -> Option<Opcode> {
        if raw > 0x22 {
            return None;
        }
        // Discriminants are contiguous from 0x00 to 0x25.
        // SAFETY: raw is within the declared discriminant range.
        Some(unsafe { std::mem::transmute::<u8, Opcode>(raw as u8) })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::PushI => "PUSHI",
            Opcode::PushF => "PUSHF",
            Opcode::PushIx => "PUSHIX",
            Opcode::PushIf => "PUSHIF",
            Opcode::PushReg => "PUSHREG",
            Opcode::PopIx => "POPIX",
            Opcode::PopFx => "POPFX",
            Opcode::Proc => "PROC",
            Opcode::Comm => "COMM",
            Opcode::End => "END",
            Opcode::Jump => "JUMP",
            Opcode::Call => "CALL",
            Opcode::Run => "RUN",
            Opcode::Goto => "GOTO",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Minus => "MINUS",
            Opcode::Not => "NOT",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Lte => "LTE",
            Opcode::Gte => "GTE",
            Opcode::If => "IF",
            Opcode::PushIs => "PUSHIS",
            Opcode::PushLix => "PUSHLIX",
            Opcode::PushLfx => "PUSHLFX",
            Opcode::PopLix => "POPLIX",
            Opcode::PopLfx => "POPLFX",
            Opcode::PushStr => "PUSHSTR",
            Opcode::Func => "FUNC",
            Opcode::Send => "SEND",
            Opcode::Cond => "COND",
        }
    }

    /// Wide instructions take a second 4-byte slot for their operand.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            Opcode::PushI | Opcode::PushF | Opcode::PushIx | Opcode::PushIf
        )
    }

    /// Wide instructions whose operand is an IEEE-754 single.
    pub fn has_float_operand(self) -> bool {
        matches!(self, Opcode::PushF | Opcode::PushIf)
    }

    /// Opcodes whose operand is a jump-label index.
    pub fn is_jumper(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::If)
    }

    /// Opcodes whose operand is a procedure-label index.
    pub fn is_caller(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Call)
    }

    /// Opcodes that take no operand; a non-zero operand on these is
    /// reported as a warning by the decoder.
    pub fn has_operand(self) -> bool {
        !matches!(
            self,
            Opcode::PushReg
                | Opcode::PopIx
                | Opcode::PopFx
                | Opcode::End
                | Opcode::Run
                | Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Minus
                | Opcode::Not
                | Opcode::Or
                | Opcode::And
                | Opcode::Eq
                | Opcode::Neq
                | Opcode::Lt
                | Opcode::Gt
                | Opcode::Lte
                | Opcode::Gte
        )
    }

    /// Opcodes that unconditionally end a block; anything after them in the
    /// same block is dead.
    pub fn is_block_ender(self) -> bool {
        matches!(self, Opcode::End | Opcode::Jump | Opcode::Goto)
    }

    /// Static (pushes, pops) for opcodes whose stack effect does not depend
    /// on context. `None` for COMM/JUMP/CALL and the synthetic FUNC/SEND,
    /// which are resolved during flow abstraction.
    pub fn stack_effect(self) -> Option<(u32, u32)> {
        match self {
            Opcode::PushI
            | Opcode::PushF
            | Opcode::PushIx
            | Opcode::PushIf
            | Opcode::PushReg
            | Opcode::PushIs
            | Opcode::PushLix
            | Opcode::PushLfx
            | Opcode::PushStr => Some((1, 0)),
            Opcode::PopIx
            | Opcode::PopFx
            | Opcode::PopLix
            | Opcode::PopLfx
            | Opcode::If
            | Opcode::Cond => Some((0, 1)),
            Opcode::Proc | Opcode::End | Opcode::Run | Opcode::Goto => Some((0, 0)),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Or
            | Opcode::And
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Lte
            | Opcode::Gte => Some((1, 2)),
            Opcode::Minus | Opcode::Not => Some((1, 1)),
            Opcode::Comm | Opcode::Jump | Opcode::Call | Opcode::Func | Opcode::Send => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
