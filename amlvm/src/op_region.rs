//! Operation regions and the field units that window into them. Field reads
//! and writes are decomposed into aligned, power-of-two accesses of the
//! region's address space, honoring the field's declared access width and
//! update rule.

use crate::{
    namespace::AmlName,
    object::{Object, ObjectRef},
    AmlError,
    Interpreter,
    Operation,
};
use alloc::{string::String, vec, vec::Vec};
use bit_field::BitField;
use bitvec::{field::BitField as BitSliceField, order::Lsb0, view::BitView};
use byteorder::{ByteOrder, LittleEndian};
use core::str::FromStr;

#[derive(Clone, Debug)]
pub struct OpRegion {
    pub space: RegionSpace,
    pub base: u64,
    /// Length of the region, in bytes.
    pub length: u64,
    /// The enclosing device, used to find `_SEG`/`_BBN`/`_ADR` for PCI
    /// config regions.
    pub parent_device: Option<AmlName>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegionSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedControl,
    SMBus,
    SystemCmos,
    PciBarTarget,
    IPMI,
    GeneralPurposeIo,
    GenericSerialBus,
    OemDefined(u8),
}

impl From<u8> for RegionSpace {
    fn from(byte: u8) -> RegionSpace {
        match byte {
            0x00 => RegionSpace::SystemMemory,
            0x01 => RegionSpace::SystemIo,
            0x02 => RegionSpace::PciConfig,
            0x03 => RegionSpace::EmbeddedControl,
            0x04 => RegionSpace::SMBus,
            0x05 => RegionSpace::SystemCmos,
            0x06 => RegionSpace::PciBarTarget,
            0x07 => RegionSpace::IPMI,
            0x08 => RegionSpace::GeneralPurposeIo,
            0x09 => RegionSpace::GenericSerialBus,
            other => RegionSpace::OemDefined(other),
        }
    }
}

/// Users of the interpreter install these to service accesses to address
/// spaces the interpreter can't handle natively (embedded controllers,
/// SMBus, OEM-defined spaces). `width` is the access size in bits.
pub trait RegionHandler: Send + Sync {
    fn read(&self, region: &OpRegion, offset: u64, width: u64) -> Result<u64, AmlError>;
    fn write(&self, region: &OpRegion, offset: u64, width: u64, value: u64) -> Result<(), AmlError>;
}

#[derive(Clone, Debug)]
pub enum FieldUnit {
    Normal {
        region: ObjectRef,
        bit_index: usize,
        bit_length: usize,
        flags: FieldFlags,
    },
    Bank {
        region: ObjectRef,
        /// The bank-selection field, written with `bank_value` before each
        /// access.
        bank: ObjectRef,
        bank_value: u64,
        bit_index: usize,
        bit_length: usize,
        flags: FieldFlags,
    },
    Index {
        /// The index field, written with the byte offset before each access
        /// of the data field.
        index: ObjectRef,
        data: ObjectRef,
        bit_index: usize,
        bit_length: usize,
        flags: FieldFlags,
    },
}

impl FieldUnit {
    pub fn bit_length(&self) -> usize {
        match self {
            FieldUnit::Normal { bit_length, .. }
            | FieldUnit::Bank { bit_length, .. }
            | FieldUnit::Index { bit_length, .. } => *bit_length,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FieldFlags(pub u8);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldAccessType {
    Any,
    Byte,
    Word,
    DWord,
    QWord,
    Buffer,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldUpdateRule {
    Preserve,
    WriteAsOnes,
    WriteAsZeros,
}

impl FieldFlags {
    pub fn access_type(&self) -> Result<FieldAccessType, AmlError> {
        match self.0.get_bits(0..4) {
            0 => Ok(FieldAccessType::Any),
            1 => Ok(FieldAccessType::Byte),
            2 => Ok(FieldAccessType::Word),
            3 => Ok(FieldAccessType::DWord),
            4 => Ok(FieldAccessType::QWord),
            5 => Ok(FieldAccessType::Buffer),
            _ => Err(AmlError::InvalidFieldFlags),
        }
    }

    pub fn lock_rule(&self) -> bool {
        self.0.get_bit(4)
    }

    pub fn update_rule(&self) -> Result<FieldUpdateRule, AmlError> {
        match self.0.get_bits(5..7) {
            0 => Ok(FieldUpdateRule::Preserve),
            1 => Ok(FieldUpdateRule::WriteAsOnes),
            2 => Ok(FieldUpdateRule::WriteAsZeros),
            _ => Err(AmlError::InvalidFieldFlags),
        }
    }
}

/// The geometry of one field access: which aligned window of the region is
/// touched, with what access width, and where the field's bits sit inside
/// that window.
struct AccessGeometry {
    access_bits: usize,
    aligned_byte: usize,
    bit_in_window: usize,
    num_units: usize,
}

fn access_geometry(
    space: RegionSpace,
    bit_index: usize,
    bit_length: usize,
    flags: FieldFlags,
) -> Result<AccessGeometry, AmlError> {
    let minimum = match flags.access_type()? {
        FieldAccessType::Any | FieldAccessType::Byte | FieldAccessType::Buffer => 8,
        FieldAccessType::Word => 16,
        FieldAccessType::DWord => 32,
        FieldAccessType::QWord => 64,
    };
    let maximum = match space {
        RegionSpace::SystemIo | RegionSpace::PciConfig => 32,
        _ => 64,
    };
    /*
     * Use the field length rounded up to the next power-of-two where that
     * lets us do fewer accesses, bounded by what the field declares and the
     * region supports.
     */
    let access_bits = (bit_length.next_power_of_two() as u64).clamp(minimum, maximum) as usize;

    let access_bytes = access_bits / 8;
    let aligned_byte = (bit_index / 8) / access_bytes * access_bytes;
    let bit_in_window = bit_index - aligned_byte * 8;
    let num_units = (bit_in_window + bit_length + access_bits - 1) / access_bits;
    Ok(AccessGeometry { access_bits, aligned_byte, bit_in_window, num_units })
}

impl Interpreter {
    pub(crate) fn read_field_unit(&self, field: &FieldUnit) -> Result<Object, AmlError> {
        match field {
            FieldUnit::Normal { region, bit_index, bit_length, flags } => {
                self.read_normal_field(region, *bit_index, *bit_length, *flags)
            }
            FieldUnit::Bank { region, bank, bank_value, bit_index, bit_length, flags } => {
                self.select_bank(bank, *bank_value)?;
                self.read_normal_field(region, *bit_index, *bit_length, *flags)
            }
            FieldUnit::Index { index, data, bit_index, bit_length, flags: _ } => {
                let (index_field, data_field) = (field_unit_of(index)?, field_unit_of(data)?);
                self.write_field_unit(&index_field, &Object::Integer((bit_index / 8) as u64))?;
                let datum = self.read_field_unit(&data_field)?.as_integer()?;
                let bit_in_datum = bit_index % 8;
                if bit_in_datum + bit_length > 64 {
                    return Err(AmlError::FieldInvalidAccessSize);
                }
                Ok(Object::Integer(datum.get_bits(bit_in_datum..(bit_in_datum + bit_length))))
            }
        }
    }

    pub(crate) fn write_field_unit(&self, field: &FieldUnit, value: &Object) -> Result<(), AmlError> {
        match field {
            FieldUnit::Normal { region, bit_index, bit_length, flags } => {
                self.write_normal_field(region, *bit_index, *bit_length, *flags, value)
            }
            FieldUnit::Bank { region, bank, bank_value, bit_index, bit_length, flags } => {
                self.select_bank(bank, *bank_value)?;
                self.write_normal_field(region, *bit_index, *bit_length, *flags, value)
            }
            FieldUnit::Index { index, data, bit_index, bit_length, flags } => {
                let (index_field, data_field) = (field_unit_of(index)?, field_unit_of(data)?);
                self.write_field_unit(&index_field, &Object::Integer((bit_index / 8) as u64))?;

                let bit_in_datum = bit_index % 8;
                if bit_in_datum + bit_length > 64 {
                    return Err(AmlError::FieldInvalidAccessSize);
                }
                let mut datum = match flags.update_rule()? {
                    FieldUpdateRule::Preserve => self.read_field_unit(&data_field)?.as_integer()?,
                    FieldUpdateRule::WriteAsOnes => u64::MAX,
                    FieldUpdateRule::WriteAsZeros => 0,
                };
                datum.set_bits(bit_in_datum..(bit_in_datum + bit_length), value.as_integer()? & low_bits(*bit_length));
                self.write_field_unit(&data_field, &Object::Integer(datum))
            }
        }
    }

    fn select_bank(&self, bank: &ObjectRef, bank_value: u64) -> Result<(), AmlError> {
        let bank_field = field_unit_of(bank)?;
        self.write_field_unit(&bank_field, &Object::Integer(bank_value))
    }

    fn read_normal_field(
        &self,
        region_ref: &ObjectRef,
        bit_index: usize,
        bit_length: usize,
        flags: FieldFlags,
    ) -> Result<Object, AmlError> {
        if bit_length == 0 {
            return Ok(Object::Integer(0));
        }
        let region = op_region_of(region_ref)?;
        let geometry = access_geometry(region.space, bit_index, bit_length, flags)?;
        let raw = self.read_units(&region, &geometry)?;

        let bits = raw.view_bits::<Lsb0>();
        let field_bits = &bits[geometry.bit_in_window..(geometry.bit_in_window + bit_length)];
        if bit_length <= 64 {
            Ok(Object::Integer(field_bits.load_le::<u64>()))
        } else {
            let mut bytes = vec![0; (bit_length + 7) / 8];
            bytes.view_bits_mut::<Lsb0>()[..bit_length].clone_from_bitslice(field_bits);
            Ok(Object::Buffer(bytes))
        }
    }

    fn write_normal_field(
        &self,
        region_ref: &ObjectRef,
        bit_index: usize,
        bit_length: usize,
        flags: FieldFlags,
        value: &Object,
    ) -> Result<(), AmlError> {
        if bit_length == 0 {
            return Ok(());
        }
        let region = op_region_of(region_ref)?;
        let geometry = access_geometry(region.space, bit_index, bit_length, flags)?;
        let access_bytes = geometry.access_bits / 8;

        let mut raw = match flags.update_rule()? {
            FieldUpdateRule::Preserve => self.read_units(&region, &geometry)?,
            FieldUpdateRule::WriteAsOnes => vec![0xff; geometry.num_units * access_bytes],
            FieldUpdateRule::WriteAsZeros => vec![0; geometry.num_units * access_bytes],
        };

        {
            let bits = raw.view_bits_mut::<Lsb0>();
            let field_bits = &mut bits[geometry.bit_in_window..(geometry.bit_in_window + bit_length)];
            match value {
                Object::Buffer(_) | Object::String(_) => {
                    let source = value.comparison_bytes()?;
                    let source_bits = source.view_bits::<Lsb0>();
                    let copied = usize::min(source_bits.len(), bit_length);
                    field_bits[..copied].clone_from_bitslice(&source_bits[..copied]);
                    // A short source zeroes the remainder of the field
                    field_bits[copied..].fill(false);
                }
                value => {
                    let integer_bits = usize::min(bit_length, 64);
                    field_bits[..integer_bits].store_le(value.as_integer()? & low_bits(bit_length));
                    field_bits[integer_bits..].fill(false);
                }
            }
        }

        for i in 0..geometry.num_units {
            let unit = LittleEndian::read_uint(&raw[(i * access_bytes)..((i + 1) * access_bytes)], access_bytes);
            self.write_region_unit(
                &region,
                (geometry.aligned_byte + i * access_bytes) as u64,
                geometry.access_bits as u64,
                unit,
            )?;
        }
        Ok(())
    }

    fn read_units(&self, region: &OpRegion, geometry: &AccessGeometry) -> Result<Vec<u8>, AmlError> {
        let access_bytes = geometry.access_bits / 8;
        let mut raw = vec![0; geometry.num_units * access_bytes];
        for i in 0..geometry.num_units {
            let unit = self.read_region_unit(
                region,
                (geometry.aligned_byte + i * access_bytes) as u64,
                geometry.access_bits as u64,
            )?;
            LittleEndian::write_uint(&mut raw[(i * access_bytes)..((i + 1) * access_bytes)], unit, access_bytes);
        }
        Ok(raw)
    }

    /// Perform one standard-size read of a region. `width` must be a
    /// supported power-of-2, and `offset` aligned to it.
    fn read_region_unit(&self, region: &OpRegion, offset: u64, width: u64) -> Result<u64, AmlError> {
        if offset + width / 8 > region.length {
            return Err(AmlError::FieldInvalidAddress);
        }
        match region.space {
            RegionSpace::SystemMemory => {
                let address =
                    (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.read_u8(address) as u64),
                    16 => Ok(self.handler.read_u16(address) as u64),
                    32 => Ok(self.handler.read_u32(address) as u64),
                    64 => Ok(self.handler.read_u64(address)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::SystemIo => {
                let port = (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.read_io_u8(port) as u64),
                    16 => Ok(self.handler.read_io_u16(port) as u64),
                    32 => Ok(self.handler.read_io_u32(port) as u64),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::PciConfig => {
                let (segment, bus, device, function) = self.pci_route(region)?;
                let offset = (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.read_pci_u8(segment, bus, device, function, offset) as u64),
                    16 => Ok(self.handler.read_pci_u16(segment, bus, device, function, offset) as u64),
                    32 => Ok(self.handler.read_pci_u32(segment, bus, device, function, offset) as u64),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            space => {
                let handlers = self.region_handlers.lock();
                match handlers.get(&space) {
                    Some(handler) => handler.read(region, offset, width),
                    None => Err(AmlError::NoHandlerForRegionSpace(space)),
                }
            }
        }
    }

    fn write_region_unit(&self, region: &OpRegion, offset: u64, width: u64, value: u64) -> Result<(), AmlError> {
        if offset + width / 8 > region.length {
            return Err(AmlError::FieldInvalidAddress);
        }
        match region.space {
            RegionSpace::SystemMemory => {
                let address =
                    (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.write_u8(address, value as u8)),
                    16 => Ok(self.handler.write_u16(address, value as u16)),
                    32 => Ok(self.handler.write_u32(address, value as u32)),
                    64 => Ok(self.handler.write_u64(address, value)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::SystemIo => {
                let port = (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.write_io_u8(port, value as u8)),
                    16 => Ok(self.handler.write_io_u16(port, value as u16)),
                    32 => Ok(self.handler.write_io_u32(port, value as u32)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::PciConfig => {
                let (segment, bus, device, function) = self.pci_route(region)?;
                let offset = (region.base + offset).try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(self.handler.write_pci_u8(segment, bus, device, function, offset, value as u8)),
                    16 => Ok(self.handler.write_pci_u16(segment, bus, device, function, offset, value as u16)),
                    32 => Ok(self.handler.write_pci_u32(segment, bus, device, function, offset, value as u32)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            space => {
                let handlers = self.region_handlers.lock();
                match handlers.get(&space) {
                    Some(handler) => handler.write(region, offset, width, value),
                    None => Err(AmlError::NoHandlerForRegionSpace(space)),
                }
            }
        }
    }

    /// Work out the PCI address a config region belongs to, from `_SEG`,
    /// `_BBN`, and `_ADR` on the enclosing device. `_SEG` and `_BBN` are
    /// optional, defaulting to values that fit legacy single-root systems.
    fn pci_route(&self, region: &OpRegion) -> Result<(u16, u8, u8, u8), AmlError> {
        let parent_device = region.parent_device.as_ref().ok_or(AmlError::FieldInvalidAddress)?;

        let optional_integer = |leaf: &str, default: u64| -> Result<u64, AmlError> {
            let name = AmlName::from_str(leaf)?.resolve(parent_device)?;
            match self.evaluate(&name, Vec::new()) {
                Ok(object) => {
                    let value = object.lock().as_integer()?;
                    Ok(value)
                }
                Err(AmlError::ObjectDoesNotExist(_)) => Ok(default),
                Err(err) => Err(err),
            }
        };

        let segment = optional_integer("_SEG", 0)?.try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
        let bus = optional_integer("_BBN", 0)?.try_into().map_err(|_| AmlError::FieldInvalidAddress)?;
        let adr = optional_integer("_ADR", 0)?;
        let device = adr.get_bits(16..24) as u8;
        let function = adr.get_bits(0..8) as u8;
        Ok((segment, bus, device, function))
    }
}

fn op_region_of(object: &ObjectRef) -> Result<OpRegion, AmlError> {
    let object = object.lock();
    match &*object {
        Object::OpRegion(region) => Ok(region.clone()),
        other => Err(AmlError::InvalidOperationOnObject { op: Operation::ReadField, typ: other.typ() }),
    }
}

fn field_unit_of(object: &ObjectRef) -> Result<FieldUnit, AmlError> {
    let object = object.lock();
    match &*object {
        Object::FieldUnit(field) => Ok(field.clone()),
        other => Err(AmlError::InvalidOperationOnObject { op: Operation::ReadField, typ: other.typ() }),
    }
}

pub(crate) fn low_bits(length: usize) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1 << length) - 1
    }
}

/// Read `bit_length` bits starting at `bit_index` of a buffer (or string)
/// object, producing an `Integer` for fields of 64 bits or fewer and a
/// `Buffer` otherwise.
pub(crate) fn read_buffer_field(buffer: &Object, bit_index: usize, bit_length: usize) -> Result<Object, AmlError> {
    let bytes = match buffer {
        Object::Buffer(bytes) => bytes.as_slice(),
        Object::String(string) => string.as_bytes(),
        other => {
            return Err(AmlError::InvalidOperationOnObject { op: Operation::ReadBufferField, typ: other.typ() })
        }
    };
    if bit_index + bit_length > bytes.len() * 8 {
        return Err(AmlError::FieldInvalidAddress);
    }

    let bits = &bytes.view_bits::<Lsb0>()[bit_index..(bit_index + bit_length)];
    if bit_length <= 64 {
        Ok(Object::Integer(bits.load_le::<u64>()))
    } else {
        let mut out = vec![0; (bit_length + 7) / 8];
        out.view_bits_mut::<Lsb0>()[..bit_length].clone_from_bitslice(bits);
        Ok(Object::Buffer(out))
    }
}

pub(crate) fn write_buffer_field(
    buffer: &mut Object,
    bit_index: usize,
    bit_length: usize,
    value: &Object,
) -> Result<(), AmlError> {
    match buffer {
        Object::Buffer(bytes) => write_bits(bytes, bit_index, bit_length, value),
        Object::String(string) => {
            // Indexing into a String writes the underlying byte; the result
            // must still be UTF-8 to live in a String
            let mut bytes = core::mem::take(string).into_bytes();
            let result = write_bits(&mut bytes, bit_index, bit_length, value);
            *string = String::from_utf8(bytes).map_err(|_| AmlError::InvalidString)?;
            result
        }
        other => {
            Err(AmlError::InvalidOperationOnObject { op: Operation::WriteBufferField, typ: other.typ() })
        }
    }
}

fn write_bits(
    bytes: &mut [u8],
    bit_index: usize,
    bit_length: usize,
    value: &Object,
) -> Result<(), AmlError> {
    if bit_index + bit_length > bytes.len() * 8 {
        return Err(AmlError::FieldInvalidAddress);
    }

    let field_bits = &mut bytes.view_bits_mut::<Lsb0>()[bit_index..(bit_index + bit_length)];
    match value {
        Object::Buffer(_) | Object::String(_) => {
            let source = value.comparison_bytes()?;
            let source_bits = source.view_bits::<Lsb0>();
            let copied = usize::min(source_bits.len(), bit_length);
            field_bits[..copied].clone_from_bitslice(&source_bits[..copied]);
            field_bits[copied..].fill(false);
        }
        value => {
            let integer_bits = usize::min(bit_length, 64);
            field_bits[..integer_bits].store_le(value.as_integer()? & low_bits(bit_length));
            field_bits[integer_bits..].fill(false);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_flags() {
        // ByteAcc, NoLock, WriteAsZeros
        let flags = FieldFlags(0b0100_0001);
        assert_eq!(flags.access_type(), Ok(FieldAccessType::Byte));
        assert!(!flags.lock_rule());
        assert_eq!(flags.update_rule(), Ok(FieldUpdateRule::WriteAsZeros));

        // DWordAcc, Lock, Preserve
        let flags = FieldFlags(0b0001_0011);
        assert_eq!(flags.access_type(), Ok(FieldAccessType::DWord));
        assert!(flags.lock_rule());
        assert_eq!(flags.update_rule(), Ok(FieldUpdateRule::Preserve));

        assert!(FieldFlags(0x0f).access_type().is_err());
    }

    #[test]
    fn geometry() {
        // A 3-bit field at bit 13 of a byte-access region touches bytes 1-2
        let geometry =
            access_geometry(RegionSpace::SystemMemory, 13, 3, FieldFlags(0b0000_0001)).unwrap();
        assert_eq!(geometry.access_bits, 8);
        assert_eq!(geometry.aligned_byte, 1);
        assert_eq!(geometry.bit_in_window, 5);
        assert_eq!(geometry.num_units, 1);

        // A 16-bit field at bit 4 straddles two word accesses
        let geometry =
            access_geometry(RegionSpace::SystemMemory, 4, 16, FieldFlags(0b0000_0010)).unwrap();
        assert_eq!(geometry.access_bits, 16);
        assert_eq!(geometry.aligned_byte, 0);
        assert_eq!(geometry.bit_in_window, 4);
        assert_eq!(geometry.num_units, 2);

        // IO regions cap the access width at 32 bits
        let geometry =
            access_geometry(RegionSpace::SystemIo, 0, 64, FieldFlags(0b0000_0000)).unwrap();
        assert_eq!(geometry.access_bits, 32);
        assert_eq!(geometry.num_units, 2);
    }

    #[test]
    fn buffer_fields() {
        let mut buffer = Object::Buffer(vec![0; 4]);
        write_buffer_field(&mut buffer, 3, 5, &Object::Integer(0b10110)).unwrap();
        assert!(matches!(&buffer, Object::Buffer(bytes) if bytes[0] == 0b1011_0000));

        let read = read_buffer_field(&buffer, 3, 5).unwrap();
        assert!(matches!(read, Object::Integer(0b10110)));

        // Values wider than the field are truncated
        write_buffer_field(&mut buffer, 8, 4, &Object::Integer(0xff)).unwrap();
        assert!(matches!(&buffer, Object::Buffer(bytes) if bytes[1] == 0x0f));

        // Out-of-bounds accesses are refused
        assert_eq!(read_buffer_field(&buffer, 30, 4).unwrap_err(), AmlError::FieldInvalidAddress);
    }

    #[test]
    fn wide_buffer_fields() {
        let mut buffer = Object::Buffer(vec![0; 16]);
        let value = Object::Buffer(vec![0xab; 10]);
        write_buffer_field(&mut buffer, 0, 80, &value).unwrap();

        match read_buffer_field(&buffer, 0, 80).unwrap() {
            Object::Buffer(bytes) => assert_eq!(bytes, vec![0xab; 10]),
            other => panic!("expected buffer, got {:?}", other),
        }
    }
}
