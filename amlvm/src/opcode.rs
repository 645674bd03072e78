//! The opcode table: metadata about every AML opcode the interpreter
//! recognizes. Everything else in the crate routes through `Opcode::info` to
//! find out how an opcode is classified and how many in-flight arguments it
//! expects before it can be retired.

use crate::AmlError;

pub const NULL_NAME: u8 = 0x00;
pub const DUAL_NAME_PREFIX: u8 = 0x2e;
pub const MULTI_NAME_PREFIX: u8 = 0x2f;
pub const ROOT_CHAR: u8 = b'\\';
pub const PREFIX_CHAR: u8 = b'^';

pub const RESERVED_FIELD: u8 = 0x00;
pub const ACCESS_FIELD: u8 = 0x01;
pub const CONNECT_FIELD: u8 = 0x02;
pub const EXTENDED_ACCESS_FIELD: u8 = 0x03;

pub const DEF_ELSE_OP: u8 = 0xa1;
pub const DEF_BUFFER_OP: u8 = 0x11;
pub const EXT_OPCODE_PREFIX: u8 = 0x5b;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Zero,
    One,
    Alias,
    Name,
    BytePrefix,
    WordPrefix,
    DWordPrefix,
    StringPrefix,
    QWordPrefix,
    Scope,
    Buffer,
    Package,
    VarPackage,
    Method,
    External,
    DualNamePrefix,
    MultiNamePrefix,
    NameChar(u8),
    Mutex,
    Event,
    CondRefOf,
    CreateField,
    LoadTable,
    Load,
    Stall,
    Sleep,
    Acquire,
    Signal,
    Wait,
    Reset,
    Release,
    FromBCD,
    ToBCD,
    Revision,
    Debug,
    Fatal,
    Timer,
    OpRegion,
    Field,
    Device,
    Processor,
    PowerRes,
    ThermalZone,
    IndexField,
    BankField,
    DataRegion,
    RootChar,
    ParentPrefixChar,
    Local(u8),
    Arg(u8),
    Store,
    RefOf,
    Add,
    Concat,
    Subtract,
    Increment,
    Decrement,
    Multiply,
    Divide,
    ShiftLeft,
    ShiftRight,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Not,
    FindSetLeftBit,
    FindSetRightBit,
    DerefOf,
    ConcatRes,
    Mod,
    Notify,
    SizeOf,
    Index,
    Match,
    CreateDWordField,
    CreateWordField,
    CreateByteField,
    CreateBitField,
    ObjectType,
    CreateQWordField,
    LAnd,
    LOr,
    LNot,
    LNotEqual,
    LLessEqual,
    LGreaterEqual,
    LEqual,
    LGreater,
    LLess,
    ToBuffer,
    ToDecimalString,
    ToHexString,
    ToInteger,
    ToString,
    CopyObject,
    Mid,
    Continue,
    If,
    Else,
    While,
    Noop,
    Return,
    Break,
    Breakpoint,
    Ones,

    /// Not a real AML opcode - used for the in-flight operation that gathers
    /// the arguments of a method invocation.
    InternalMethodCall,
}

/// How the main loop treats an opcode once decoded. `Expression` opcodes are
/// started generically from the arity in their `OpcodeInfo`; the other
/// classes have dedicated handling.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpcodeClass {
    /// Literals and constants - producing a value directly.
    DataObject,
    /// Bytes that begin a name string (including `\` and `^`).
    Name,
    LocalObj,
    ArgObj,
    /// Type 2 opcodes - gather operands via the in-flight stack, then execute.
    Expression,
    /// Type 1 opcodes and control flow.
    Statement,
    /// Opcodes that declare something in the namespace.
    NamedObject,
    /// Only produced internally, never decoded from the stream.
    Internal,
}

#[derive(Clone, Copy, Debug)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub class: OpcodeClass,
    /// The number of in-flight arguments this opcode gathers before it can be
    /// retired (including any targets), for opcodes driven through the
    /// in-flight machinery. Zero for opcodes handled synchronously.
    pub args: usize,
}

const fn info(name: &'static str, class: OpcodeClass, args: usize) -> OpcodeInfo {
    OpcodeInfo { name, class, args }
}

impl Opcode {
    pub fn info(&self) -> OpcodeInfo {
        use OpcodeClass::*;
        match self {
            Opcode::Zero => info("ZeroOp", DataObject, 0),
            Opcode::One => info("OneOp", DataObject, 0),
            Opcode::Ones => info("OnesOp", DataObject, 0),
            Opcode::BytePrefix => info("ByteConst", DataObject, 0),
            Opcode::WordPrefix => info("WordConst", DataObject, 0),
            Opcode::DWordPrefix => info("DWordConst", DataObject, 0),
            Opcode::QWordPrefix => info("QWordConst", DataObject, 0),
            Opcode::StringPrefix => info("String", DataObject, 0),
            Opcode::Revision => info("RevisionOp", DataObject, 0),
            Opcode::Debug => info("DebugObj", DataObject, 0),
            Opcode::Timer => info("TimerOp", DataObject, 0),

            Opcode::RootChar
            | Opcode::ParentPrefixChar
            | Opcode::DualNamePrefix
            | Opcode::MultiNamePrefix
            | Opcode::NameChar(_) => info("NameString", Name, 0),

            Opcode::Local(_) => info("LocalObj", LocalObj, 0),
            Opcode::Arg(_) => info("ArgObj", ArgObj, 0),

            Opcode::Store => info("DefStore", Expression, 2),
            Opcode::RefOf => info("DefRefOf", Expression, 1),
            Opcode::Add => info("DefAdd", Expression, 3),
            Opcode::Subtract => info("DefSubtract", Expression, 3),
            Opcode::Multiply => info("DefMultiply", Expression, 3),
            Opcode::Divide => info("DefDivide", Expression, 4),
            Opcode::ShiftLeft => info("DefShiftLeft", Expression, 3),
            Opcode::ShiftRight => info("DefShiftRight", Expression, 3),
            Opcode::And => info("DefAnd", Expression, 3),
            Opcode::Nand => info("DefNAnd", Expression, 3),
            Opcode::Or => info("DefOr", Expression, 3),
            Opcode::Nor => info("DefNOr", Expression, 3),
            Opcode::Xor => info("DefXOr", Expression, 3),
            Opcode::Not => info("DefNot", Expression, 2),
            Opcode::Mod => info("DefMod", Expression, 3),
            Opcode::Concat => info("DefConcat", Expression, 3),
            Opcode::ConcatRes => info("DefConcatRes", Expression, 3),
            Opcode::FindSetLeftBit => info("DefFindSetLeftBit", Expression, 2),
            Opcode::FindSetRightBit => info("DefFindSetRightBit", Expression, 2),
            Opcode::Increment => info("DefIncrement", Expression, 1),
            Opcode::Decrement => info("DefDecrement", Expression, 1),
            Opcode::LAnd => info("DefLAnd", Expression, 2),
            Opcode::LOr => info("DefLOr", Expression, 2),
            Opcode::LNot => info("DefLNot", Expression, 1),
            Opcode::LEqual => info("DefLEqual", Expression, 2),
            Opcode::LGreater => info("DefLGreater", Expression, 2),
            Opcode::LLess => info("DefLLess", Expression, 2),
            Opcode::LNotEqual => info("DefLNotEqual", Expression, 2),
            Opcode::LLessEqual => info("DefLLessEqual", Expression, 2),
            Opcode::LGreaterEqual => info("DefLGreaterEqual", Expression, 2),
            Opcode::DerefOf => info("DefDerefOf", Expression, 1),
            Opcode::SizeOf => info("DefSizeOf", Expression, 1),
            Opcode::ObjectType => info("DefObjectType", Expression, 1),
            Opcode::Index => info("DefIndex", Expression, 3),
            // SearchPkg, MatchOpcode, Operand, MatchOpcode, Operand, StartIndex.
            // The two match-opcode bytes are consumed as the preceding
            // argument is contributed.
            Opcode::Match => info("DefMatch", Expression, 6),
            Opcode::Mid => info("DefMid", Expression, 4),
            Opcode::ToBuffer => info("DefToBuffer", Expression, 2),
            Opcode::ToInteger => info("DefToInteger", Expression, 2),
            Opcode::ToDecimalString => info("DefToDecimalString", Expression, 2),
            Opcode::ToHexString => info("DefToHexString", Expression, 2),
            Opcode::ToString => info("DefToString", Expression, 3),
            Opcode::CopyObject => info("DefCopyObject", Expression, 2),
            Opcode::FromBCD => info("DefFromBCD", Expression, 2),
            Opcode::ToBCD => info("DefToBCD", Expression, 2),
            // MutexObject, then a trailing WordData timeout consumed when the
            // mutex argument is contributed.
            Opcode::Acquire => info("DefAcquire", Expression, 2),
            Opcode::Wait => info("DefWait", Expression, 2),
            Opcode::CondRefOf => info("DefCondRefOf", Expression, 1),
            Opcode::Load => info("DefLoad", Expression, 2),
            Opcode::LoadTable => info("DefLoadTable", Expression, 6),

            Opcode::Release => info("DefRelease", Statement, 1),
            Opcode::Signal => info("DefSignal", Statement, 1),
            Opcode::Reset => info("DefReset", Statement, 1),
            Opcode::Sleep => info("DefSleep", Statement, 1),
            Opcode::Stall => info("DefStall", Statement, 1),
            Opcode::Notify => info("DefNotify", Statement, 2),
            Opcode::Fatal => info("DefFatal", Statement, 1),
            Opcode::If => info("DefIfElse", Statement, 1),
            Opcode::Else => info("DefElse", Statement, 0),
            Opcode::While => info("DefWhile", Statement, 1),
            Opcode::Break => info("DefBreak", Statement, 0),
            Opcode::Continue => info("DefContinue", Statement, 0),
            Opcode::Return => info("DefReturn", Statement, 1),
            Opcode::Noop => info("DefNoop", Statement, 0),
            Opcode::Breakpoint => info("DefBreakPoint", Statement, 0),

            Opcode::Alias => info("DefAlias", NamedObject, 0),
            Opcode::Name => info("DefName", NamedObject, 1),
            Opcode::Scope => info("DefScope", NamedObject, 0),
            Opcode::Buffer => info("DefBuffer", DataObject, 1),
            Opcode::Package => info("DefPackage", DataObject, 0),
            Opcode::VarPackage => info("DefVarPackage", DataObject, 1),
            Opcode::Method => info("DefMethod", NamedObject, 0),
            Opcode::External => info("DefExternal", NamedObject, 0),
            Opcode::Mutex => info("DefMutex", NamedObject, 0),
            Opcode::Event => info("DefEvent", NamedObject, 0),
            Opcode::OpRegion => info("DefOpRegion", NamedObject, 2),
            Opcode::Field => info("DefField", NamedObject, 0),
            Opcode::IndexField => info("DefIndexField", NamedObject, 0),
            Opcode::BankField => info("DefBankField", NamedObject, 1),
            Opcode::DataRegion => info("DefDataRegion", NamedObject, 3),
            Opcode::Device => info("DefDevice", NamedObject, 0),
            Opcode::Processor => info("DefProcessor", NamedObject, 0),
            Opcode::PowerRes => info("DefPowerRes", NamedObject, 0),
            Opcode::ThermalZone => info("DefThermalZone", NamedObject, 0),
            Opcode::CreateBitField => info("DefCreateBitField", NamedObject, 2),
            Opcode::CreateByteField => info("DefCreateByteField", NamedObject, 2),
            Opcode::CreateWordField => info("DefCreateWordField", NamedObject, 2),
            Opcode::CreateDWordField => info("DefCreateDWordField", NamedObject, 2),
            Opcode::CreateQWordField => info("DefCreateQWordField", NamedObject, 2),
            Opcode::CreateField => info("DefCreateField", NamedObject, 3),

            Opcode::InternalMethodCall => info("MethodInvocation", Internal, 0),
        }
    }
}

/// Decode one opcode from its raw encoding. `ext` must be `Some` when `first`
/// is the extended-opcode prefix (0x5b). The `0x92` fused comparison prefixes
/// are handled by the caller, which has peek access to the stream.
pub fn decode(first: u8, ext: Option<u8>) -> Result<Opcode, AmlError> {
    let opcode: u16 = match ext {
        Some(ext) => (EXT_OPCODE_PREFIX as u16) << 8 | ext as u16,
        None => first as u16,
    };

    Ok(match opcode {
        0x00 => Opcode::Zero,
        0x01 => Opcode::One,
        0x06 => Opcode::Alias,
        0x08 => Opcode::Name,
        0x0a => Opcode::BytePrefix,
        0x0b => Opcode::WordPrefix,
        0x0c => Opcode::DWordPrefix,
        0x0d => Opcode::StringPrefix,
        0x0e => Opcode::QWordPrefix,
        0x10 => Opcode::Scope,
        0x11 => Opcode::Buffer,
        0x12 => Opcode::Package,
        0x13 => Opcode::VarPackage,
        0x14 => Opcode::Method,
        0x15 => Opcode::External,
        0x2e => Opcode::DualNamePrefix,
        0x2f => Opcode::MultiNamePrefix,
        0x41..=0x5a => Opcode::NameChar(opcode as u8), // b'A'..=b'Z'
        0x5b01 => Opcode::Mutex,
        0x5b02 => Opcode::Event,
        0x5b12 => Opcode::CondRefOf,
        0x5b13 => Opcode::CreateField,
        0x5b1f => Opcode::LoadTable,
        0x5b20 => Opcode::Load,
        0x5b21 => Opcode::Stall,
        0x5b22 => Opcode::Sleep,
        0x5b23 => Opcode::Acquire,
        0x5b24 => Opcode::Signal,
        0x5b25 => Opcode::Wait,
        0x5b26 => Opcode::Reset,
        0x5b27 => Opcode::Release,
        0x5b28 => Opcode::FromBCD,
        0x5b29 => Opcode::ToBCD,
        0x5b30 => Opcode::Revision,
        0x5b31 => Opcode::Debug,
        0x5b32 => Opcode::Fatal,
        0x5b33 => Opcode::Timer,
        0x5b80 => Opcode::OpRegion,
        0x5b81 => Opcode::Field,
        0x5b82 => Opcode::Device,
        0x5b83 => Opcode::Processor,
        0x5b84 => Opcode::PowerRes,
        0x5b85 => Opcode::ThermalZone,
        0x5b86 => Opcode::IndexField,
        0x5b87 => Opcode::BankField,
        0x5b88 => Opcode::DataRegion,
        0x5c => Opcode::RootChar,
        0x5e => Opcode::ParentPrefixChar,
        0x5f => Opcode::NameChar(b'_'),
        0x60..=0x67 => Opcode::Local(opcode as u8 - 0x60),
        0x68..=0x6e => Opcode::Arg(opcode as u8 - 0x68),
        0x70 => Opcode::Store,
        0x71 => Opcode::RefOf,
        0x72 => Opcode::Add,
        0x73 => Opcode::Concat,
        0x74 => Opcode::Subtract,
        0x75 => Opcode::Increment,
        0x76 => Opcode::Decrement,
        0x77 => Opcode::Multiply,
        0x78 => Opcode::Divide,
        0x79 => Opcode::ShiftLeft,
        0x7a => Opcode::ShiftRight,
        0x7b => Opcode::And,
        0x7c => Opcode::Nand,
        0x7d => Opcode::Or,
        0x7e => Opcode::Nor,
        0x7f => Opcode::Xor,
        0x80 => Opcode::Not,
        0x81 => Opcode::FindSetLeftBit,
        0x82 => Opcode::FindSetRightBit,
        0x83 => Opcode::DerefOf,
        0x84 => Opcode::ConcatRes,
        0x85 => Opcode::Mod,
        0x86 => Opcode::Notify,
        0x87 => Opcode::SizeOf,
        0x88 => Opcode::Index,
        0x89 => Opcode::Match,
        0x8a => Opcode::CreateDWordField,
        0x8b => Opcode::CreateWordField,
        0x8c => Opcode::CreateByteField,
        0x8d => Opcode::CreateBitField,
        0x8e => Opcode::ObjectType,
        0x8f => Opcode::CreateQWordField,
        0x90 => Opcode::LAnd,
        0x91 => Opcode::LOr,
        0x92 => Opcode::LNot,
        0x93 => Opcode::LEqual,
        0x94 => Opcode::LGreater,
        0x95 => Opcode::LLess,
        0x96 => Opcode::ToBuffer,
        0x97 => Opcode::ToDecimalString,
        0x98 => Opcode::ToHexString,
        0x99 => Opcode::ToInteger,
        0x9c => Opcode::ToString,
        0x9d => Opcode::CopyObject,
        0x9e => Opcode::Mid,
        0x9f => Opcode::Continue,
        0xa0 => Opcode::If,
        0xa1 => Opcode::Else,
        0xa2 => Opcode::While,
        0xa3 => Opcode::Noop,
        0xa4 => Opcode::Return,
        0xa5 => Opcode::Break,
        0xcc => Opcode::Breakpoint,
        0xff => Opcode::Ones,

        _ => return Err(AmlError::IllegalOpcode(opcode)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_opcodes() {
        assert_eq!(decode(0x00, None), Ok(Opcode::Zero));
        assert_eq!(decode(0x72, None), Ok(Opcode::Add));
        assert_eq!(decode(0xa2, None), Ok(Opcode::While));
        assert_eq!(decode(0xff, None), Ok(Opcode::Ones));
        assert_eq!(decode(0x64, None), Ok(Opcode::Local(4)));
        assert_eq!(decode(0x6a, None), Ok(Opcode::Arg(2)));
    }

    #[test]
    fn extended_opcodes() {
        assert_eq!(decode(0x5b, Some(0x01)), Ok(Opcode::Mutex));
        assert_eq!(decode(0x5b, Some(0x80)), Ok(Opcode::OpRegion));
        assert_eq!(decode(0x5b, Some(0x23)), Ok(Opcode::Acquire));
        assert_eq!(decode(0x5b, Some(0x33)), Ok(Opcode::Timer));
    }

    #[test]
    fn name_lead_bytes_are_name_class() {
        for byte in [0x5c, 0x5e, 0x2e, 0x2f, 0x41, 0x5a, 0x5f] {
            let opcode = decode(byte, None).unwrap();
            assert_eq!(opcode.info().class, OpcodeClass::Name);
        }
    }

    #[test]
    fn unknown_opcodes() {
        assert_eq!(decode(0xa6, None), Err(AmlError::IllegalOpcode(0xa6)));
        assert_eq!(decode(0x5b, Some(0x7f)), Err(AmlError::IllegalOpcode(0x5b7f)));
        // Digits cannot lead a name segment, so they decode as unknown
        assert_eq!(decode(0x30, None), Err(AmlError::IllegalOpcode(0x30)));
    }

    #[test]
    fn expression_arities() {
        assert_eq!(Opcode::Add.info().args, 3);
        assert_eq!(Opcode::Divide.info().args, 4);
        assert_eq!(Opcode::LNot.info().args, 1);
        assert_eq!(Opcode::Mid.info().args, 4);
        assert_eq!(Opcode::Store.info().args, 2);
    }
}
