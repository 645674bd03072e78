//! Walk state for a single control method (or table load), plus the
//! byte-stream decoding primitives the execution loop is built from. A
//! `MethodContext` owns a stack of `Block`s tracking where we are in the
//! encoding, and a stack of `OpInFlight`s tracking operations that are still
//! gathering arguments.

use crate::{
    namespace::{AmlName, NameComponent, NameSeg, OwnerId},
    object::{Object, ObjectRef},
    opcode::{self, Opcode},
    AmlError,
};
use alloc::{sync::Arc, vec::Vec};
use bit_field::BitField;

/// AML methods take at most 7 arguments and have 8 locals.
pub const MAX_ARGS: usize = 7;
pub const MAX_LOCALS: usize = 8;

pub(crate) struct MethodContext {
    pub current_block: Block,
    pub block_stack: Vec<Block>,
    pub in_flight: Vec<OpInFlight>,
    pub args: [ObjectRef; MAX_ARGS],
    pub locals: [ObjectRef; MAX_LOCALS],
    pub current_scope: AmlName,
    /// Namespace nodes created while this context runs are tagged with this
    /// owner, so they can be torn down in bulk when the context terminates
    /// (method invocation) or the table is unloaded.
    pub owner: OwnerId,
    /// Identifies the chain of nested invocations this context belongs to.
    /// All contexts pushed by one top-level `evaluate` or `load_table` share
    /// a chain id; it is what makes mutex acquisition re-entrant.
    pub chain: u64,
    /// `Some` for method invocations - the resolved name of the method, used
    /// for serialization claims and diagnostics.
    pub method_name: Option<AmlName>,
    pub serialized: bool,
    pub return_value: Option<ObjectRef>,
}

impl MethodContext {
    pub fn new_table_load(stream: Arc<[u8]>, scope: AmlName, owner: OwnerId, chain: u64) -> MethodContext {
        let end = stream.len();
        MethodContext {
            current_block: Block { stream, pc: 0, end, kind: BlockKind::Table },
            block_stack: Vec::new(),
            in_flight: Vec::new(),
            args: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            locals: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            current_scope: scope,
            owner,
            chain,
            method_name: None,
            serialized: false,
            return_value: None,
        }
    }

    pub fn new_method_invocation(
        code: Arc<[u8]>,
        name: AmlName,
        owner: OwnerId,
        chain: u64,
        call_args: Vec<ObjectRef>,
        serialized: bool,
    ) -> MethodContext {
        let end = code.len();
        let mut args: [ObjectRef; MAX_ARGS] = core::array::from_fn(|_| Object::Uninitialized.wrap());
        for (slot, arg) in args.iter_mut().zip(call_args) {
            *slot = arg;
        }
        MethodContext {
            current_block: Block { stream: code, pc: 0, end, kind: BlockKind::Method },
            block_stack: Vec::new(),
            in_flight: Vec::new(),
            args,
            locals: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            current_scope: name.clone(),
            owner,
            chain,
            method_name: Some(name),
            serialized,
            return_value: None,
        }
    }

    pub fn start_in_flight_op(&mut self, op: OpInFlight) {
        log::trace!(
            "Starting in-flight op of type: {:?} (args: {:?}, expected: {})",
            op.op,
            op.arguments,
            op.expected_arguments
        );
        self.in_flight.push(op);
    }

    /// Pop the top in-flight op if it has gathered all the arguments it
    /// expects and is therefore ready to be retired.
    pub fn completed_op(&mut self) -> Option<OpInFlight> {
        match self.in_flight.last() {
            Some(op) if op.arguments.len() == op.expected_arguments => self.in_flight.pop(),
            _ => None,
        }
    }

    /// Offer a produced value to the top in-flight op. Returns `true` if the
    /// op consumed it, `false` if no op is waiting for an argument (the value
    /// was produced in a void context and should be dropped).
    ///
    /// A few opcodes interleave raw data between their term arguments
    /// (`DefMatch`'s match-opcode bytes, `DefAcquire`'s timeout word); those
    /// bytes are consumed from the stream here, as the preceding argument
    /// arrives.
    pub fn contribute_arg(&mut self, arg: Argument) -> Result<bool, AmlError> {
        let (op, num_args) = {
            let Some(op) = self.in_flight.last_mut() else { return Ok(false) };
            if op.arguments.len() >= op.expected_arguments {
                return Ok(false);
            }
            op.arguments.push(arg);
            (op.op, op.arguments.len())
        };

        match (op, num_args) {
            (Opcode::Match, 1) | (Opcode::Match, 3) => {
                let match_opcode = self.next()?;
                if let Some(op) = self.in_flight.last_mut() {
                    op.arguments.push(Argument::ByteData(match_opcode));
                }
            }
            (Opcode::Acquire, 1) => {
                let timeout = self.next_u16()?;
                if let Some(op) = self.in_flight.last_mut() {
                    op.arguments.push(Argument::WordData(timeout));
                }
            }
            _ => (),
        }
        Ok(true)
    }

    /// Enter a new block covering `[pc, end)` of the current stream. The
    /// current block's `pc` is advanced past the new block's extent, so
    /// execution resumes after it when the new block is popped.
    pub fn start_block(&mut self, kind: BlockKind, end: usize) {
        let new_block = Block { stream: self.current_block.stream.clone(), pc: self.current_block.pc, end, kind };
        self.current_block.pc = end;
        self.block_stack.push(core::mem::replace(&mut self.current_block, new_block));
    }

    pub fn local(&self, index: u8) -> Result<&ObjectRef, AmlError> {
        self.locals.get(index as usize).ok_or(AmlError::InvalidLocal(index))
    }

    pub fn arg(&self, index: u8) -> Result<&ObjectRef, AmlError> {
        self.args.get(index as usize).ok_or(AmlError::InvalidArg(index))
    }

    pub fn peek(&self) -> Result<u8, AmlError> {
        if self.current_block.pc >= self.current_block.end {
            return Err(AmlError::RunOutOfStream);
        }
        Ok(self.current_block.stream[self.current_block.pc])
    }

    pub fn next(&mut self) -> Result<u8, AmlError> {
        let byte = self.peek()?;
        self.current_block.pc += 1;
        Ok(byte)
    }

    pub fn next_u16(&mut self) -> Result<u16, AmlError> {
        Ok(u16::from_le_bytes([self.next()?, self.next()?]))
    }

    pub fn next_u32(&mut self) -> Result<u32, AmlError> {
        Ok(u32::from_le_bytes([self.next()?, self.next()?, self.next()?, self.next()?]))
    }

    pub fn next_u64(&mut self) -> Result<u64, AmlError> {
        Ok(u64::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    /// Decode the next opcode. The `0x92` byte is a fused comparison when
    /// followed by `LEqual`/`LGreater`/`LLess`, and `LNot` otherwise.
    pub fn opcode(&mut self) -> Result<Opcode, AmlError> {
        let first = self.next()?;
        if first == opcode::EXT_OPCODE_PREFIX {
            return opcode::decode(first, Some(self.next()?));
        }
        if first == 0x92 {
            match self.peek() {
                Ok(0x93) => {
                    self.current_block.pc += 1;
                    return Ok(Opcode::LNotEqual);
                }
                Ok(0x94) => {
                    self.current_block.pc += 1;
                    return Ok(Opcode::LLessEqual);
                }
                Ok(0x95) => {
                    self.current_block.pc += 1;
                    return Ok(Opcode::LGreaterEqual);
                }
                _ => return Ok(Opcode::LNot),
            }
        }
        opcode::decode(first, None)
    }

    /// Decode a PkgLength, returning the **absolute** offset of the first
    /// byte past the package. The encoded length counts from the PkgLength's
    /// own lead byte.
    pub fn pkglength(&mut self) -> Result<usize, AmlError> {
        let start = self.current_block.pc;
        let raw_length = self.pkglength_raw()?;
        let end = start + raw_length;
        if raw_length == 0 || end > self.current_block.end {
            return Err(AmlError::InvalidPkgLength);
        }
        Ok(end)
    }

    /// Decode the PkgLength encoding as a bare number, without treating it
    /// as a stream extent. Field lists use this encoding for bit counts.
    pub fn pkglength_raw(&mut self) -> Result<usize, AmlError> {
        let lead = self.next()?;
        let byte_count = lead.get_bits(6..8);

        let raw_length = if byte_count == 0 {
            lead.get_bits(0..6) as u32
        } else {
            let mut length = lead.get_bits(0..4) as u32;
            for i in 0..byte_count {
                length |= (self.next()? as u32) << (4 + i * 8);
            }
            length
        };
        Ok(raw_length as usize)
    }

    /// Decode a NameString. `\` on its own (RootChar + NullName) is valid and
    /// produces the root name; an entirely empty path is not.
    pub fn namestring(&mut self) -> Result<AmlName, AmlError> {
        let mut components = Vec::new();
        match self.peek()? {
            opcode::ROOT_CHAR => {
                self.current_block.pc += 1;
                components.push(NameComponent::Root);
            }
            opcode::PREFIX_CHAR => {
                while self.peek()? == opcode::PREFIX_CHAR {
                    self.current_block.pc += 1;
                    components.push(NameComponent::Prefix);
                }
            }
            _ => (),
        }

        match self.peek()? {
            opcode::NULL_NAME => {
                self.current_block.pc += 1;
            }
            opcode::DUAL_NAME_PREFIX => {
                self.current_block.pc += 1;
                components.push(NameComponent::Segment(self.nameseg()?));
                components.push(NameComponent::Segment(self.nameseg()?));
            }
            opcode::MULTI_NAME_PREFIX => {
                self.current_block.pc += 1;
                let count = self.next()?;
                for _ in 0..count {
                    components.push(NameComponent::Segment(self.nameseg()?));
                }
            }
            _ => components.push(NameComponent::Segment(self.nameseg()?)),
        }

        if components.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }
        Ok(AmlName::from_components(components))
    }

    pub fn nameseg(&mut self) -> Result<NameSeg, AmlError> {
        let bytes = [self.next()?, self.next()?, self.next()?, self.next()?];
        NameSeg::from_bytes(bytes)
    }
}

#[derive(Debug)]
pub(crate) struct Block {
    pub stream: Arc<[u8]>,
    /// Absolute offset of the next byte to consume.
    pub pc: usize,
    /// Absolute offset of the first byte past this block.
    pub end: usize,
    pub kind: BlockKind,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BlockKind {
    /// The top-level TermList of a table.
    Table,
    /// The body of an invoked control method.
    Method,
    Scope {
        old_scope: AmlName,
    },
    Package,
    /// The taken branch of a `DefIfElse`. When it completes, a trailing
    /// `DefElse` in the outer block must be skipped over.
    IfThenBranch,
    /// Covers a `DefWhile`'s predicate and body. When the block runs out, the
    /// `pc` is rewound to `predicate_pc` to re-test the predicate.
    While {
        predicate_pc: usize,
    },
}

pub(crate) struct OpInFlight {
    pub op: Opcode,
    pub expected_arguments: usize,
    pub arguments: Vec<Argument>,
}

impl OpInFlight {
    pub fn new(op: Opcode, expected_arguments: usize) -> OpInFlight {
        OpInFlight { op, expected_arguments, arguments: Vec::new() }
    }

    /// For ops that already know some of their arguments when they start
    /// (e.g. a name parsed out of the stream synchronously). `expected` is
    /// the number of arguments *left* to gather.
    pub fn new_with(op: Opcode, arguments: Vec<Argument>, expected: usize) -> OpInFlight {
        let expected_arguments = arguments.len() + expected;
        OpInFlight { op, expected_arguments, arguments }
    }

    /// Package-building ops collect elements until their block runs out,
    /// rather than a known count up-front.
    pub fn new_unbounded(op: Opcode) -> OpInFlight {
        OpInFlight { op, expected_arguments: usize::MAX, arguments: Vec::new() }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Argument {
    Object(ObjectRef),
    Namestring(AmlName),
    ByteData(u8),
    WordData(u16),
    /// A stream offset recorded when the op started, e.g. the end of a
    /// `DefBuffer`'s package so the byte list can be sliced out at retire
    /// time.
    TrackedPc(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use core::str::FromStr;

    fn context_over(stream: &[u8]) -> MethodContext {
        MethodContext::new_table_load(Arc::from(stream), AmlName::root(), OwnerId(1), 0)
    }

    #[test]
    fn pkglength_one_byte() {
        let mut context = context_over(&[0x05, 0, 0, 0, 0]);
        assert_eq!(context.pkglength(), Ok(5));
        assert_eq!(context.current_block.pc, 1);
    }

    #[test]
    fn pkglength_multi_byte() {
        // Lead byte with 1 extra byte: length = 0x5 | (0x14 << 4) = 325
        let stream: Vec<u8> = [0b01000101, 0x14].iter().copied().chain(core::iter::repeat(0xff).take(323)).collect();
        let mut context = context_over(&stream);
        assert_eq!(context.pkglength(), Ok(325));

        let stream: Vec<u8> =
            [0b10000111, 0x40, 0x50].iter().copied().chain(core::iter::repeat(0xff).take(0x50407 - 3)).collect();
        let mut context = context_over(&stream);
        assert_eq!(context.pkglength(), Ok(0x50407));
    }

    #[test]
    fn pkglength_overruns_block() {
        let mut context = context_over(&[0x3f, 0, 0]);
        assert_eq!(context.pkglength(), Err(AmlError::InvalidPkgLength));
    }

    #[test]
    fn namestrings() {
        let mut context = context_over(&[b'\\', b'A', b'B', b'C', b'D']);
        assert_eq!(context.namestring(), Ok(AmlName::from_str("\\ABCD").unwrap()));

        let mut context = context_over(&[b'\\', 0x2e, b'A', b'B', b'C', b'D', b'E', b'_', b'F', b'G']);
        assert_eq!(context.namestring(), Ok(AmlName::from_str("\\ABCD.E_FG").unwrap()));

        let mut context = context_over(&[b'^', b'^', b'F', b'O', b'O', b'_']);
        assert_eq!(context.namestring(), Ok(AmlName::from_str("^^FOO_").unwrap()));

        // `\` by itself - RootChar followed by NullName
        let mut context = context_over(&[b'\\', 0x00]);
        assert_eq!(context.namestring(), Ok(AmlName::root()));

        let mut context = context_over(&[0x2f, 0x03, b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'J', b'K', b'L']);
        assert_eq!(context.namestring(), Ok(AmlName::from_str("ABCD.EFGH.IJKL").unwrap()));

        let mut context = context_over(&[0x00]);
        assert_eq!(context.namestring(), Err(AmlError::EmptyNamesAreInvalid));

        let mut context = context_over(&[0xff, b'A', b'B', b'C']);
        assert!(context.namestring().is_err());
    }

    #[test]
    fn fused_comparison_opcodes() {
        let mut context = context_over(&[0x92, 0x93, 0x92, 0x94, 0x92, 0x95, 0x92, 0x0a]);
        assert_eq!(context.opcode(), Ok(Opcode::LNotEqual));
        assert_eq!(context.opcode(), Ok(Opcode::LLessEqual));
        assert_eq!(context.opcode(), Ok(Opcode::LGreaterEqual));
        assert_eq!(context.opcode(), Ok(Opcode::LNot));
        assert_eq!(context.opcode(), Ok(Opcode::BytePrefix));
    }

    #[test]
    fn in_flight_retirement() {
        let mut context = context_over(&[0x00]);
        context.start_in_flight_op(OpInFlight::new(Opcode::Add, 3));
        assert!(context.completed_op().is_none());

        for _ in 0..3 {
            assert_eq!(context.contribute_arg(Argument::Object(Object::Integer(1).wrap())), Ok(true));
        }
        let op = context.completed_op().unwrap();
        assert_eq!(op.op, Opcode::Add);
        assert_eq!(op.arguments.len(), 3);

        // With nothing in flight, produced values go nowhere
        assert_eq!(context.contribute_arg(Argument::Object(Object::Integer(1).wrap())), Ok(false));
    }

    #[test]
    fn match_interleaved_bytes() {
        // After the search package (arg 1) and the first operand (arg 3), a
        // raw match-opcode byte follows in the stream.
        let mut context = context_over(&[0x01, 0x04, 0xff]);
        context.start_in_flight_op(OpInFlight::new(Opcode::Match, 6));
        context.contribute_arg(Argument::Object(Object::Integer(0).wrap())).unwrap();
        {
            let op = context.in_flight.last().unwrap();
            assert_eq!(op.arguments.len(), 2);
            assert!(matches!(op.arguments[1], Argument::ByteData(0x01)));
        }
        context.contribute_arg(Argument::Object(Object::Integer(0).wrap())).unwrap();
        {
            let op = context.in_flight.last().unwrap();
            assert_eq!(op.arguments.len(), 4);
            assert!(matches!(op.arguments[3], Argument::ByteData(0x04)));
        }
        context.contribute_arg(Argument::Object(Object::Integer(0).wrap())).unwrap();
        assert!(context.completed_op().is_some());
    }

    #[test]
    fn block_nesting() {
        let mut context = context_over(&vec![0u8; 32]);
        context.current_block.pc = 4;
        context.start_block(BlockKind::IfThenBranch, 16);
        assert_eq!(context.current_block.pc, 4);
        assert_eq!(context.current_block.end, 16);

        let parent = context.block_stack.pop().unwrap();
        assert_eq!(parent.pc, 16);
        assert_eq!(parent.end, 32);
    }
}
