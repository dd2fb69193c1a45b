use crate::cursor::Cursor;
use crate::Error;

/// A tagged device or firmware identifier carried in a package's device
/// records. Each variant's payload layout is fixed-width little-endian
/// except `VendorDefined`, whose title/data split is recovered from its
/// own length-prefixed sub-fields; see [`Descriptor::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    PciVendorId(u16),
    IanaEnterpriseId(u32),
    Uuid([u8; 16]),
    PnpVendorId([u8; 3]),
    // TODO(upstream quirk): the upstream C++ source questions whether this
    // field should be ASCII rather than a little-endian u32. Kept as u32
    // for compatibility; see DESIGN.md.
    AcpiVendorId(u32),
    PciDeviceId(u16),
    PciSubsystemVendorId(u16),
    PciSubsystemId(u16),
    PciRevisionId(u8),
    PnpProductId(u32),
    AcpiProductId(u32),
    VendorDefined { title: String, data: Vec<u8> },
}

const TAG_PCI_VENDOR_ID: u16 = 0x0000;
const TAG_IANA_ENTERPRISE_ID: u16 = 0x0001;
const TAG_UUID: u16 = 0x0002;
const TAG_PNP_VENDOR_ID: u16 = 0x0003;
const TAG_ACPI_VENDOR_ID: u16 = 0x0004;
const TAG_PCI_DEVICE_ID: u16 = 0x0100;
const TAG_PCI_SUBSYSTEM_VENDOR_ID: u16 = 0x0101;
const TAG_PCI_SUBSYSTEM_ID: u16 = 0x0102;
const TAG_PCI_REVISION_ID: u16 = 0x0103;
const TAG_PNP_PRODUCT_ID: u16 = 0x0104;
const TAG_ACPI_PRODUCT_ID: u16 = 0x0105;
const TAG_VENDOR_DEFINED: u16 = 0xFFFF;

impl Descriptor {
    /// The wire tag this descriptor would encode as.
    pub fn tag(&self) -> u16 {
        match self {
            Descriptor::PciVendorId(_) => TAG_PCI_VENDOR_ID,
            Descriptor::IanaEnterpriseId(_) => TAG_IANA_ENTERPRISE_ID,
            Descriptor::Uuid(_) => TAG_UUID,
            Descriptor::PnpVendorId(_) => TAG_PNP_VENDOR_ID,
            Descriptor::AcpiVendorId(_) => TAG_ACPI_VENDOR_ID,
            Descriptor::PciDeviceId(_) => TAG_PCI_DEVICE_ID,
            Descriptor::PciSubsystemVendorId(_) => TAG_PCI_SUBSYSTEM_VENDOR_ID,
            Descriptor::PciSubsystemId(_) => TAG_PCI_SUBSYSTEM_ID,
            Descriptor::PciRevisionId(_) => TAG_PCI_REVISION_ID,
            Descriptor::PnpProductId(_) => TAG_PNP_PRODUCT_ID,
            Descriptor::AcpiProductId(_) => TAG_ACPI_PRODUCT_ID,
            Descriptor::VendorDefined { .. } => TAG_VENDOR_DEFINED,
        }
    }

    /// The payload bytes this descriptor would encode as, little-endian.
    /// Used only to derive a total order; not a public wire operation.
    fn payload_bytes(&self) -> Vec<u8> {
        match self {
            Descriptor::PciVendorId(v) => v.to_le_bytes().to_vec(),
            Descriptor::IanaEnterpriseId(v) => v.to_le_bytes().to_vec(),
            Descriptor::Uuid(v) => v.to_vec(),
            Descriptor::PnpVendorId(v) => v.to_vec(),
            Descriptor::AcpiVendorId(v) => v.to_le_bytes().to_vec(),
            Descriptor::PciDeviceId(v) => v.to_le_bytes().to_vec(),
            Descriptor::PciSubsystemVendorId(v) => v.to_le_bytes().to_vec(),
            Descriptor::PciSubsystemId(v) => v.to_le_bytes().to_vec(),
            Descriptor::PciRevisionId(v) => vec![*v],
            Descriptor::PnpProductId(v) => v.to_le_bytes().to_vec(),
            Descriptor::AcpiProductId(v) => v.to_le_bytes().to_vec(),
            Descriptor::VendorDefined { title, data } => {
                let mut bytes = title.as_bytes().to_vec();
                bytes.extend_from_slice(data);
                bytes
            }
        }
    }

    /// Decodes one `{type:u16, length:u16, payload[length]}` record from the
    /// front of `bytes`, returning the descriptor and the number of bytes
    /// consumed (`4 + length`).
    pub fn decode(bytes: &[u8]) -> Result<(Descriptor, usize), Error> {
        let mut cursor = Cursor::new(bytes);
        let tag = cursor.take_u16()?;
        let length = cursor.take_u16()? as usize;

        let descriptor = match tag {
            TAG_PCI_VENDOR_ID => Descriptor::PciVendorId(fixed_u16(&mut cursor, length)?),
            TAG_IANA_ENTERPRISE_ID => {
                Descriptor::IanaEnterpriseId(fixed_u32(&mut cursor, length)?)
            }
            TAG_UUID => Descriptor::Uuid(fixed_array::<16>(&mut cursor, length)?),
            TAG_PNP_VENDOR_ID => Descriptor::PnpVendorId(fixed_array::<3>(&mut cursor, length)?),
            TAG_ACPI_VENDOR_ID => Descriptor::AcpiVendorId(fixed_u32(&mut cursor, length)?),
            TAG_PCI_DEVICE_ID => Descriptor::PciDeviceId(fixed_u16(&mut cursor, length)?),
            TAG_PCI_SUBSYSTEM_VENDOR_ID => {
                Descriptor::PciSubsystemVendorId(fixed_u16(&mut cursor, length)?)
            }
            TAG_PCI_SUBSYSTEM_ID => Descriptor::PciSubsystemId(fixed_u16(&mut cursor, length)?),
            TAG_PCI_REVISION_ID => Descriptor::PciRevisionId(fixed_u8(&mut cursor, length)?),
            TAG_PNP_PRODUCT_ID => Descriptor::PnpProductId(fixed_u32(&mut cursor, length)?),
            TAG_ACPI_PRODUCT_ID => Descriptor::AcpiProductId(fixed_u32(&mut cursor, length)?),
            TAG_VENDOR_DEFINED => decode_vendor_defined(&mut cursor, length)?,
            other => {
                log::warn!("unhandled descriptor type 0x{:x}", other);
                return Err(Error::UnknownDescriptorType(other));
            }
        };

        Ok((descriptor, 4 + length))
    }
}

fn fixed_u8(cursor: &mut Cursor<'_>, length: usize) -> Result<u8, Error> {
    if length != 1 {
        return Err(Error::Truncated);
    }
    cursor.take_u8()
}

fn fixed_u16(cursor: &mut Cursor<'_>, length: usize) -> Result<u16, Error> {
    if length != 2 {
        return Err(Error::Truncated);
    }
    cursor.take_u16()
}

fn fixed_u32(cursor: &mut Cursor<'_>, length: usize) -> Result<u32, Error> {
    if length != 4 {
        return Err(Error::Truncated);
    }
    cursor.take_u32()
}

fn fixed_array<const N: usize>(cursor: &mut Cursor<'_>, length: usize) -> Result<[u8; N], Error> {
    if length != N {
        return Err(Error::Truncated);
    }
    cursor.take_array::<N>()
}

fn decode_vendor_defined(cursor: &mut Cursor<'_>, length: usize) -> Result<Descriptor, Error> {
    if length < 2 {
        return Err(Error::Truncated);
    }
    let payload = cursor.take_bytes(length)?;
    let mut sub = Cursor::new(&payload);
    sub.skip(1)?; // reserved
    let title_len = sub.take_u8()? as usize;
    let title = sub.take_string(title_len)?;
    let data = sub.take_bytes(sub.remaining())?;
    Ok(Descriptor::VendorDefined { title, data })
}

impl PartialOrd for Descriptor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Descriptor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.tag()
            .cmp(&other.tag())
            .then_with(|| self.payload_bytes().cmp(&other.payload_bytes()))
    }
}

/// Whether `subset`, sorted per [`Descriptor`]'s total order, is a
/// sorted-multiset subset of `superset`.
pub fn is_sorted_subset(subset: &[Descriptor], superset: &[Descriptor]) -> bool {
    let mut rest = superset.iter();
    for item in subset {
        loop {
            match rest.next() {
                Some(candidate) if candidate == item => break,
                Some(candidate) if candidate < item => continue,
                _ => return false,
            }
        }
    }
    true
}
