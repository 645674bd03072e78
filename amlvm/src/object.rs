//! The AML object model. Every value the interpreter manipulates is an
//! `Object` behind an `ObjectRef` - a reference-counted, lock-protected
//! handle. Shared ownership is what makes `Index` references, aliases, and
//! store-through-reference work: everyone holding the handle sees mutations.

use crate::{
    op_region::{FieldUnit, OpRegion},
    AmlError,
};
use alloc::{string::String, sync::Arc, vec, vec::Vec};
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use spinning_top::Spinlock;

pub type ObjectRef = Arc<Spinlock<Object>>;

#[derive(Clone, Debug)]
pub enum Object {
    Uninitialized,
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<ObjectRef>),
    Method { code: Arc<[u8]>, flags: MethodFlags },
    Device,
    Processor { proc_id: u8, pblk_address: u32, pblk_length: u8 },
    PowerResource { system_level: u8, resource_order: u16 },
    ThermalZone,
    Event(Arc<EventGuts>),
    Mutex { mutex: Arc<MutexGuts>, sync_level: u8 },
    OpRegion(OpRegion),
    FieldUnit(FieldUnit),
    /// A view of `bit_length` bits starting at `bit_index` into a `Buffer`
    /// (or `String`) object. Reads and writes go through to the underlying
    /// object.
    BufferField { buffer: ObjectRef, bit_index: usize, bit_length: usize },
    Reference { kind: ReferenceKind, inner: ObjectRef },
    Debug,
}

/// References differ in how the interpreter treats them when they turn up as
/// operands: `LocalOrArg` and `Named` references are transparent (operands
/// see through them; stores go through them), while a `RefOf` reference is a
/// first-class value that only `DerefOf` sees through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReferenceKind {
    RefOf,
    LocalOrArg,
    Named,
    /// Produced by `DefIndex` - points at a package element or a byte of a
    /// buffer.
    Index,
}

impl Object {
    pub fn wrap(self) -> ObjectRef {
        Arc::new(Spinlock::new(self))
    }

    pub fn typ(&self) -> ObjectType {
        match self {
            Object::Uninitialized => ObjectType::Uninitialized,
            Object::Integer(_) => ObjectType::Integer,
            Object::String(_) => ObjectType::String,
            Object::Buffer(_) => ObjectType::Buffer,
            Object::Package(_) => ObjectType::Package,
            Object::Method { .. } => ObjectType::Method,
            Object::Device => ObjectType::Device,
            Object::Processor { .. } => ObjectType::Processor,
            Object::PowerResource { .. } => ObjectType::PowerResource,
            Object::ThermalZone => ObjectType::ThermalZone,
            Object::Event(_) => ObjectType::Event,
            Object::Mutex { .. } => ObjectType::Mutex,
            Object::OpRegion(_) => ObjectType::OpRegion,
            Object::FieldUnit(_) => ObjectType::FieldUnit,
            Object::BufferField { .. } => ObjectType::BufferField,
            Object::Reference { .. } => ObjectType::Reference,
            Object::Debug => ObjectType::Debug,
        }
    }

    /// The implicit conversion to `Integer` (§19.3.5 of the ACPI spec):
    /// buffers are read little-endian (up to 8 bytes), strings are parsed as
    /// hex with a `0x` prefix and decimal otherwise.
    pub fn as_integer(&self) -> Result<u64, AmlError> {
        match self {
            Object::Integer(value) => Ok(*value),
            Object::Buffer(bytes) => {
                if bytes.is_empty() {
                    return Ok(0);
                }
                Ok(LittleEndian::read_uint(bytes, usize::min(bytes.len(), 8)))
            }
            Object::String(string) => {
                let trimmed = string.trim();
                let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => trimmed.parse(),
                };
                parsed.map_err(|_| AmlError::IncompatibleValueConversion {
                    current: ObjectType::String,
                    target: ObjectType::Integer,
                })
            }
            other => Err(AmlError::IncompatibleValueConversion {
                current: other.typ(),
                target: ObjectType::Integer,
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, AmlError> {
        Ok(self.as_integer()? != 0)
    }

    /// The implicit conversion to `Buffer`. `integer_bytes` is the revision-
    /// dependent integer size (4 or 8).
    pub fn as_buffer(&self, integer_bytes: usize) -> Result<Vec<u8>, AmlError> {
        match self {
            Object::Buffer(bytes) => Ok(bytes.clone()),
            Object::Integer(value) => {
                let mut bytes = vec![0; integer_bytes];
                LittleEndian::write_uint(&mut bytes, *value, integer_bytes);
                Ok(bytes)
            }
            Object::String(string) => {
                // The trailing NUL is included
                let mut bytes = string.as_bytes().to_vec();
                bytes.push(0);
                Ok(bytes)
            }
            other => Err(AmlError::IncompatibleValueConversion {
                current: other.typ(),
                target: ObjectType::Buffer,
            }),
        }
    }

    /// The byte view comparison operators use: the raw contents for strings
    /// and buffers.
    pub fn comparison_bytes(&self) -> Result<Vec<u8>, AmlError> {
        match self {
            Object::String(string) => Ok(string.as_bytes().to_vec()),
            Object::Buffer(bytes) => Ok(bytes.clone()),
            other => Err(AmlError::IncompatibleValueConversion {
                current: other.typ(),
                target: ObjectType::Buffer,
            }),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectType {
    Uninitialized,
    Integer,
    String,
    Buffer,
    Package,
    FieldUnit,
    Device,
    Event,
    Method,
    Mutex,
    OpRegion,
    PowerResource,
    Processor,
    ThermalZone,
    BufferField,
    Reference,
    Debug,
}

impl ObjectType {
    /// The numeric code `DefObjectType` produces (§19.6.99 of the ACPI spec).
    pub fn code(&self) -> u64 {
        match self {
            ObjectType::Uninitialized => 0,
            ObjectType::Integer => 1,
            ObjectType::String => 2,
            ObjectType::Buffer => 3,
            ObjectType::Package => 4,
            ObjectType::FieldUnit => 5,
            ObjectType::Device => 6,
            ObjectType::Event => 7,
            ObjectType::Method => 8,
            ObjectType::Mutex => 9,
            ObjectType::OpRegion => 10,
            ObjectType::PowerResource => 11,
            ObjectType::Processor => 12,
            ObjectType::ThermalZone => 13,
            ObjectType::BufferField => 14,
            // Not representable in ASL - references are seen through before
            // the type is taken
            ObjectType::Reference => 0,
            ObjectType::Debug => 16,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MethodFlags(pub u8);

impl MethodFlags {
    pub fn arg_count(&self) -> usize {
        self.0.get_bits(0..3) as usize
    }

    pub fn serialized(&self) -> bool {
        self.0.get_bit(3)
    }

    pub fn sync_level(&self) -> u8 {
        self.0.get_bits(4..8)
    }
}

/// The shared state behind an `Object::Mutex`. AML mutexes are re-entrant
/// with respect to a single chain of nested method invocations, so the lock
/// records which chain holds it and at what depth.
#[derive(Debug)]
pub struct MutexGuts {
    state: Spinlock<MutexState>,
}

#[derive(Debug)]
struct MutexState {
    holder: Option<u64>,
    depth: u32,
}

impl MutexGuts {
    pub fn new() -> MutexGuts {
        MutexGuts { state: Spinlock::new(MutexState { holder: None, depth: 0 }) }
    }

    /// Try to take the mutex for `chain`. Re-acquisition by the holding
    /// chain succeeds and bumps the depth.
    pub fn try_acquire(&self, chain: u64) -> bool {
        let mut state = self.state.lock();
        match state.holder {
            None => {
                state.holder = Some(chain);
                state.depth = 1;
                true
            }
            Some(holder) if holder == chain => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    pub fn release(&self, chain: u64) -> Result<(), AmlError> {
        let mut state = self.state.lock();
        if state.holder != Some(chain) {
            return Err(AmlError::MutexNotAcquired);
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
        }
        Ok(())
    }

    /// Drop every level of acquisition `chain` holds. Used when a chain
    /// terminates (normally or with an error) without releasing.
    pub fn force_release(&self, chain: u64) {
        let mut state = self.state.lock();
        if state.holder == Some(chain) {
            state.holder = None;
            state.depth = 0;
        }
    }

    pub fn held_by(&self, chain: u64) -> bool {
        self.state.lock().holder == Some(chain)
    }
}

/// The shared state behind an `Object::Event` - a counting semaphore.
#[derive(Debug)]
pub struct EventGuts {
    count: Spinlock<u64>,
}

impl EventGuts {
    pub fn new() -> EventGuts {
        EventGuts { count: Spinlock::new(0) }
    }

    pub fn signal(&self) {
        *self.count.lock() += 1;
    }

    pub fn reset(&self) {
        *self.count.lock() = 0;
    }

    /// Consume one pending signal if there is one.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions() {
        assert_eq!(Object::Integer(42).as_integer(), Ok(42));
        assert_eq!(Object::Buffer(vec![0x34, 0x12]).as_integer(), Ok(0x1234));
        assert_eq!(
            Object::Buffer(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09]).as_integer(),
            Ok(0x0807060504030201)
        );
        assert_eq!(Object::Buffer(vec![]).as_integer(), Ok(0));
        assert_eq!(Object::String("0x1A".into()).as_integer(), Ok(0x1a));
        assert_eq!(Object::String("123".into()).as_integer(), Ok(123));
        assert!(Object::String("banana".into()).as_integer().is_err());
        assert!(Object::Device.as_integer().is_err());
    }

    #[test]
    fn buffer_conversions() {
        assert_eq!(Object::Integer(0x1234).as_buffer(4), Ok(vec![0x34, 0x12, 0x00, 0x00]));
        assert_eq!(
            Object::Integer(0x1234).as_buffer(8),
            Ok(vec![0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
        );
        assert_eq!(Object::String("AB".into()).as_buffer(8), Ok(vec![b'A', b'B', 0x00]));
    }

    #[test]
    fn method_flags() {
        let flags = MethodFlags(0b0010_1101);
        assert_eq!(flags.arg_count(), 5);
        assert!(flags.serialized());
        assert_eq!(flags.sync_level(), 2);

        let flags = MethodFlags(0x00);
        assert_eq!(flags.arg_count(), 0);
        assert!(!flags.serialized());
    }

    #[test]
    fn mutex_chains() {
        let mutex = MutexGuts::new();
        assert!(mutex.try_acquire(1));
        assert!(mutex.try_acquire(1)); // re-entrant for the same chain
        assert!(!mutex.try_acquire(2));

        assert_eq!(mutex.release(2), Err(AmlError::MutexNotAcquired));
        assert_eq!(mutex.release(1), Ok(()));
        assert!(!mutex.try_acquire(2)); // still held once by chain 1
        assert_eq!(mutex.release(1), Ok(()));
        assert!(mutex.try_acquire(2));
    }

    #[test]
    fn event_counting() {
        let event = EventGuts::new();
        assert!(!event.try_wait());
        event.signal();
        event.signal();
        assert!(event.try_wait());
        assert!(event.try_wait());
        assert!(!event.try_wait());
        event.signal();
        event.reset();
        assert!(!event.try_wait());
    }
}
