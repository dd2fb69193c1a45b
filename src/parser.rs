//! The streaming package parser: state machine, header decoding, consumer
//! registry, and image-to-consumer dispatch.

use crate::cursor::Cursor;
use crate::descriptor::{is_sorted_subset, Descriptor};
use crate::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

const MAGIC_UUID: [u8; 16] = [
    0xF0, 0x18, 0x87, 0x8C, 0xCB, 0x7D, 0x49, 0x43, 0x98, 0x00, 0xA0, 0x2F, 0x05, 0x9A, 0xCA, 0x02,
];

/// The only protocol version this parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1_0_0,
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.0.0" => Ok(ProtocolVersion::V1_0_0),
            _ => Err(Error::UnsupportedVersion),
        }
    }
}

/// Status passed to a consumer callback alongside each delivered slice. The
/// parser itself only ever calls back with `Success`; the other variant
/// exists so a driver can route its own transport-layer errors through the
/// same callback without a second channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    TransportError(String),
}

type Callback = Rc<RefCell<dyn FnMut(CallbackStatus, &[u8])>>;

/// A registered route: a sorted descriptor set plus the callback that
/// should receive bytes for any component image whose device-record
/// descriptor set is a superset of it.
struct Caller {
    descriptors: Vec<Descriptor>,
    callback: Callback,
}

/// Parsed from one device record: the bitmap of component images it
/// applies to, plus its sorted descriptor set.
struct DescriptorMatcher {
    applicable_components: Vec<u8>,
    descriptors: Vec<Descriptor>,
}

impl DescriptorMatcher {
    fn applies_to(&self, component_index: usize) -> bool {
        let byte_offset = component_index / 8;
        let bit_offset = component_index % 8;
        match self.applicable_components.get(byte_offset) {
            Some(byte) => byte & (1 << bit_offset) != 0,
            None => false,
        }
    }
}

/// One entry of the image-to-consumer plan produced by header parsing: the
/// byte range `[offset, offset + length)` and the consumer it belongs to.
/// Images with no matching consumer are never recorded here; their byte
/// range is simply skipped as a gap between the neighboring plan entries.
struct ImagePlanEntry {
    offset: u32,
    length: u32,
    consumer: Callback,
}

/// The streaming state machine's five states, in the order the parse
/// progresses through them. Ordered so `state()` can be asserted monotone
/// with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    WaitingForUuid,
    WaitingForLength,
    WaitingForHeader,
    ParsingOutComponents,
    Done,
}

/// Owns the streaming state machine, the header scratch buffer, the
/// consumer registry, and the per-component image plan.
///
/// Not thread-safe: a single driver thread is expected to own an instance
/// and call [`Self::process_bytes`] serially. Callbacks run synchronously,
/// on the caller's thread, inside that call.
pub struct PackageParser {
    state: ParseState,
    header_bytes: Vec<u8>,
    header_size: u16,
    bytes_received: u64,
    total_bytes_to_receive: u64,
    current_image: usize,
    images: Vec<ImagePlanEntry>,
    registered_components: Vec<Caller>,
}

impl PackageParser {
    pub fn new(version: ProtocolVersion) -> Result<Self> {
        match version {
            ProtocolVersion::V1_0_0 => {}
        }
        Ok(Self {
            state: ParseState::WaitingForUuid,
            header_bytes: Vec::new(),
            header_size: 0,
            bytes_received: 0,
            total_bytes_to_receive: 0,
            current_image: 0,
            images: Vec::new(),
            registered_components: Vec::new(),
        })
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// `None` until the header has been parsed.
    pub fn total_bytes_to_receive(&self) -> Option<u64> {
        if self.state >= ParseState::ParsingOutComponents {
            Some(self.total_bytes_to_receive)
        } else {
            None
        }
    }

    /// Registers a consumer for every component image whose device-record
    /// descriptor set is a superset of `descriptors`. `descriptors` is
    /// sorted in place. Duplicate registrations are permitted; the first
    /// one registered wins ties during matching.
    pub fn register_component_route(
        &mut self,
        mut descriptors: Vec<Descriptor>,
        callback: impl FnMut(CallbackStatus, &[u8]) + 'static,
    ) {
        descriptors.sort();
        self.registered_components.push(Caller {
            descriptors,
            callback: Rc::new(RefCell::new(callback)),
        });
    }

    /// Feeds the next chunk of package bytes. Returns `Ok(())` as long as
    /// no fatal parse error has occurred; once `Err` is returned the
    /// instance is poisoned and further calls are unsupported.
    pub fn process_bytes(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() && self.state != ParseState::Done {
            let consumed = self.update_state_machine(bytes)?;
            bytes = &bytes[consumed..];
            self.bytes_received += consumed as u64;
        }
        Ok(())
    }

    fn update_state_machine(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.state {
            ParseState::WaitingForUuid => self.wait_for_uuid(bytes),
            ParseState::WaitingForLength => self.wait_for_length(bytes),
            ParseState::WaitingForHeader => self.wait_for_header(bytes),
            ParseState::ParsingOutComponents => {
                let handled = self.handout_firmware_image(bytes);
                if self.bytes_received + handled as u64 >= self.total_bytes_to_receive {
                    self.state = ParseState::Done;
                }
                Ok(handled)
            }
            ParseState::Done => Ok(bytes.len()),
        }
    }

    fn wait_for_uuid(&mut self, bytes: &[u8]) -> Result<usize> {
        const UUID_LEN: usize = 16;
        if bytes.len() + self.bytes_received as usize >= UUID_LEN {
            let needed = UUID_LEN - self.bytes_received as usize;
            self.header_bytes.extend_from_slice(&bytes[..needed]);
            if self.header_bytes[..UUID_LEN] != MAGIC_UUID {
                log::error!("package magic UUID mismatch");
                return Err(Error::InvalidMagic);
            }
            self.state = ParseState::WaitingForLength;
            return Ok(needed);
        }
        self.header_bytes.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn wait_for_length(&mut self, bytes: &[u8]) -> Result<usize> {
        const HEADER_LENGTH_OFFSET: usize = 17;
        const HEADER_LENGTH_BYTES_NEEDED: usize = 19;
        if bytes.len() + self.bytes_received as usize >= HEADER_LENGTH_OFFSET + 2 {
            let needed = HEADER_LENGTH_BYTES_NEEDED - self.bytes_received as usize;
            self.header_bytes.extend_from_slice(&bytes[..needed]);
            let size_bytes = [
                self.header_bytes[HEADER_LENGTH_OFFSET],
                self.header_bytes[HEADER_LENGTH_OFFSET + 1],
            ];
            self.header_size = u16::from_le_bytes(size_bytes);
            self.state = ParseState::WaitingForHeader;
            return Ok(needed);
        }
        self.header_bytes.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn wait_for_header(&mut self, bytes: &[u8]) -> Result<usize> {
        let header_size = self.header_size as usize;
        if bytes.len() + self.bytes_received as usize >= header_size {
            let needed = header_size - self.bytes_received as usize;
            self.header_bytes.extend_from_slice(&bytes[..needed]);
            self.state = ParseState::ParsingOutComponents;
            self.parse_header()?;
            return Ok(needed);
        }
        self.header_bytes.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Consumes a prefix of `bytes` accounting for delivery, a gap, or the
    /// tail past the last planned image. Returns the number of bytes
    /// accounted for; the outer loop re-enters with the remainder.
    fn handout_firmware_image(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }

        while self.current_image < self.images.len()
            && self.images[self.current_image].length == 0
        {
            self.current_image += 1;
        }

        if self.current_image >= self.images.len() {
            return bytes.len();
        }

        let image = &self.images[self.current_image];
        let left_image = image.offset as u64;
        let right_image = left_image + image.length as u64;

        let left_buffer = self.bytes_received;
        let right_buffer = left_buffer + bytes.len() as u64;

        if right_buffer <= left_image {
            return bytes.len();
        }

        if left_buffer >= right_image {
            self.current_image += 1;
            return 0;
        }

        let intersection_start = left_buffer.max(left_image);
        let offset_into_buffer = intersection_start - left_buffer;
        if offset_into_buffer != 0 {
            return offset_into_buffer as usize;
        }

        let remaining_in_image = right_image - intersection_start;
        let to_deliver = remaining_in_image.min(bytes.len() as u64) as usize;

        {
            let mut cb = image.callback.borrow_mut();
            cb(CallbackStatus::Success, &bytes[..to_deliver]);
        }

        if to_deliver as u64 == remaining_in_image {
            self.current_image += 1;
        }

        to_deliver
    }

    fn parse_header(&mut self) -> Result<()> {
        let header_bytes = std::mem::take(&mut self.header_bytes);
        let mut cursor = Cursor::new(&header_bytes);
        cursor.skip(32)?; // magic(16) + reserved(1) + header size(2) + reserved(13)

        let bitmap_length_bits = cursor.take_u16()?;
        if bitmap_length_bits % 8 != 0 {
            log::error!("component bitmap length {bitmap_length_bits} is not a multiple of 8");
            return Err(Error::MalformedRecord);
        }
        let bitmap_length_bytes = (bitmap_length_bits / 8) as usize;

        cursor.skip(1)?; // version-string type
        let version_string_length = cursor.take_u8()? as usize;
        cursor.skip(version_string_length)?;

        let record_count = cursor.take_u8()?;
        let matchers = self.parse_device_records(&mut cursor, record_count, bitmap_length_bytes)?;

        let component_image_count = cursor.take_u16()?;
        self.total_bytes_to_receive = self.header_size as u64;
        self.parse_component_images(&mut cursor, &matchers, component_image_count)?;

        cursor.take_u32()?; // header CRC, presence checked, value not validated

        if cursor.remaining() != 0 {
            log::error!("header left {} stray trailing bytes", cursor.remaining());
            return Err(Error::MalformedRecord);
        }

        Ok(())
    }

    fn parse_device_records(
        &self,
        cursor: &mut Cursor<'_>,
        record_count: u8,
        bitmap_length_bytes: usize,
    ) -> Result<Vec<DescriptorMatcher>> {
        let mut matchers = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let record_start = cursor.remaining();

            let record_length = cursor.take_u16()? as usize;
            let descriptor_count = cursor.take_u8()?;
            cursor.skip(5)?;
            let version_string_length = cursor.take_u8()? as usize;
            let firmware_device_package_length = cursor.take_u16()? as usize;

            let applicable_components = cursor.take_bytes(bitmap_length_bytes)?;
            cursor.skip(version_string_length)?;

            let mut descriptors = Vec::with_capacity(descriptor_count as usize);
            for _ in 0..descriptor_count {
                let (descriptor, consumed) = Descriptor::decode(cursor.remaining_slice())?;
                cursor.skip(consumed)?;
                descriptors.push(descriptor);
            }
            descriptors.sort();

            cursor.skip(firmware_device_package_length)?;

            let consumed = record_start - cursor.remaining();
            if consumed != record_length {
                log::error!(
                    "device record consumed {consumed} bytes, declared record_length {record_length}"
                );
                return Err(Error::MalformedRecord);
            }

            matchers.push(DescriptorMatcher {
                applicable_components,
                descriptors,
            });
        }
        Ok(matchers)
    }

    fn parse_component_images(
        &mut self,
        cursor: &mut Cursor<'_>,
        matchers: &[DescriptorMatcher],
        image_count: u16,
    ) -> Result<()> {
        let mut match_found = false;

        for image_index in 0..image_count as usize {
            cursor.skip(12)?;
            let offset = cursor.take_u32()?;
            let length = cursor.take_u32()?;
            cursor.skip(1)?; // version-string type
            let version_string_length = cursor.take_u8()? as usize;
            cursor.skip(version_string_length)?;

            self.total_bytes_to_receive += length as u64;

            let matcher = matchers
                .iter()
                .find(|m| m.applies_to(image_index))
                .ok_or_else(|| {
                    log::error!("no device record applies to component image {image_index}");
                    Error::MalformedRecord
                })?;

            let registered = self
                .registered_components
                .iter()
                .find(|c| is_sorted_subset(&c.descriptors, &matcher.descriptors));

            let Some(registered) = registered else {
                continue;
            };

            match_found = true;
            self.images.push(ImagePlanEntry {
                offset,
                length,
                consumer: registered.callback.clone(),
            });
        }

        if !match_found {
            log::error!("no registered consumer matched any component image");
            return Err(Error::NoMatchingConsumer);
        }

        Ok(())
    }
}
