// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Slot heap images.
//!
//! A [`SlotArena`] holds everything one slot needs as typed records. Only when
//! the image is about to be handed to a slot is it laid out as bytes with
//! [`SlotArena::serialize`]. The slot side reads it back through an
//! [`ImageReader`], which checks every embedded pointer against the image.
//!
//! Layout, each region starting on a line boundary:
//!
//! | region            | contents                                        |
//! |-------------------|-------------------------------------------------|
//! | header            | [`ImageHeader`]                                 |
//! | device records    | one [`DeviceRecord`] per device                 |
//! | states            | one block of `state_size` bytes per device      |
//! | pin tables        | `table_pins` [`PinEntry`] records per device    |
//! | neighbour arrays  | one array of [`Neighbour`] per non-empty entry  |
//! | incoming edges    | `edge_size` bytes of label per incoming edge    |
//!
//! Next-step message buffers of synchronized slots follow the image but are
//! not part of it.

use mesh_config::settings::Discipline;
use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_graph::address::SlotAddress;

use crate::layout::{
    DeviceRecord, ImageHeader, LINE_BYTES, MAX_MSG_BYTES, Neighbour, PinEntry, align_line,
    get_words, put_words,
};

/// A fully resolved image ready to be loaded at `heap_base` in a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapImage {
    pub slot: SlotAddress,
    pub heap_base: u32,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ArenaPin {
    pub neighbours: Vec<Neighbour>,
    pub route_key: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ArenaDevice {
    pub global_id: u32,
    pub state: Vec<u8>,
    pub pins: Vec<ArenaPin>,
    pub num_in: u32,
    pub fan_out: u32,
}

/// The typed contents of one slot's heap.
#[derive(Clone, Debug)]
pub struct SlotArena {
    pub slot: SlotAddress,
    pub discipline: Discipline,
    pub table_pins: u32,
    pub state_size: u32,
    pub edge_size: u32,
    pub message_bytes: u32,
    pub devices: Vec<ArenaDevice>,

    /// Serialized edge labels, indexed by incoming edge key.
    pub in_edges: Vec<Vec<u8>>,
}

impl SlotArena {
    /// Lay the arena out as bytes.
    ///
    /// `max_bytes` bounds the image plus any buffers that follow it.
    pub fn serialize(&self, heap_base: u32, max_bytes: u32) -> Result<HeapImage, SimError> {
        let num_devices = self.devices.len() as u32;
        let entry_bytes = 4 * PinEntry::WORDS as u32;
        let neighbour_bytes = 4 * Neighbour::WORDS as u32;

        let devices_off = LINE_BYTES;
        let mut offset = devices_off + num_devices * 4 * DeviceRecord::WORDS as u32;

        let mut state_offs = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if device.state.len() != self.state_size as usize {
                return sim_error!(format!(
                    "{}: state of device {} is {} bytes, expected {}",
                    self.slot,
                    device.global_id,
                    device.state.len(),
                    self.state_size
                ));
            }
            offset = align_line(offset);
            state_offs.push(offset);
            offset += self.state_size;
        }

        let mut pins_offs = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if device.pins.len() != self.table_pins as usize {
                return sim_error!(format!(
                    "{}: device {} has {} pin entries, expected {}",
                    self.slot,
                    device.global_id,
                    device.pins.len(),
                    self.table_pins
                ));
            }
            offset = align_line(offset);
            pins_offs.push(offset);
            offset += self.table_pins * entry_bytes;
        }

        let mut neighbour_offs = Vec::new();
        for device in &self.devices {
            for pin in &device.pins {
                offset = align_line(offset);
                neighbour_offs.push(offset);
                offset += pin.neighbours.len() as u32 * neighbour_bytes;
            }
        }

        offset = align_line(offset);
        let in_edges_off = offset;
        for label in &self.in_edges {
            if label.len() != self.edge_size as usize {
                return sim_error!(format!(
                    "{}: edge label is {} bytes, expected {}",
                    self.slot,
                    label.len(),
                    self.edge_size
                ));
            }
            offset += self.edge_size;
        }
        let image_bytes = align_line(offset);

        // Next-step buffers hold up to one message per incoming edge.
        let mut buffer_offs = Vec::with_capacity(self.devices.len());
        let mut total = image_bytes;
        for device in &self.devices {
            buffer_offs.push(total);
            if self.discipline == Discipline::Sync {
                total += align_line(device.num_in * MAX_MSG_BYTES);
            }
        }

        if u64::from(total) > u64::from(max_bytes) {
            return sim_error!(format!(
                "{}: heap image of {total} bytes exceeds the {max_bytes} bytes available",
                self.slot
            ));
        }

        let mut bytes = vec![0; image_bytes as usize];
        let header = ImageHeader {
            num_devices,
            state_size: self.state_size,
            edge_size: self.edge_size,
            devices_ptr: heap_base + devices_off,
            in_edges_ptr: heap_base + in_edges_off,
            num_in_edges: self.in_edges.len() as u32,
            discipline: self.discipline,
            table_pins: self.table_pins,
            message_bytes: self.message_bytes,
        };
        put_words(&mut bytes, 0, &header.to_words());

        let mut neighbour_off = neighbour_offs.iter();
        for (i, device) in self.devices.iter().enumerate() {
            let record = DeviceRecord {
                global_id: device.global_id,
                state_ptr: heap_base + state_offs[i],
                pins_ptr: heap_base + pins_offs[i],
                table_pins: self.table_pins,
                num_in: device.num_in,
                fan_out: device.fan_out,
                next_buf_ptr: match self.discipline {
                    Discipline::Sync => heap_base + buffer_offs[i],
                    Discipline::Async => 0,
                },
            };
            let record_off = devices_off as usize + i * 4 * DeviceRecord::WORDS;
            put_words(&mut bytes, record_off, &record.to_words());

            let state_off = state_offs[i] as usize;
            bytes[state_off..state_off + device.state.len()].copy_from_slice(&device.state);

            for (entry, pin) in device.pins.iter().enumerate() {
                let array_off = neighbour_off.next().copied().unwrap_or(image_bytes);
                let pin_entry = PinEntry {
                    neighbours_ptr: heap_base + array_off,
                    count: pin.neighbours.len() as u32,
                    route_key: pin.route_key,
                };
                let entry_off = (pins_offs[i] + entry as u32 * entry_bytes) as usize;
                put_words(&mut bytes, entry_off, &pin_entry.to_words());
                for (n, neighbour) in pin.neighbours.iter().enumerate() {
                    let at = array_off as usize + n * neighbour_bytes as usize;
                    put_words(&mut bytes, at, &neighbour.to_words());
                }
            }
        }

        for (key, label) in self.in_edges.iter().enumerate() {
            let at = (in_edges_off + key as u32 * self.edge_size) as usize;
            bytes[at..at + label.len()].copy_from_slice(label);
        }

        Ok(HeapImage {
            slot: self.slot,
            heap_base,
            bytes,
        })
    }
}

/// Checked access to the records of a [`HeapImage`].
pub struct ImageReader<'a> {
    image: &'a HeapImage,
    header: ImageHeader,
}

impl<'a> ImageReader<'a> {
    pub fn new(image: &'a HeapImage) -> Result<Self, SimError> {
        if image.heap_base % LINE_BYTES != 0 {
            return sim_error!(format!(
                "{}: heap base 0x{:08x} is not line aligned",
                image.slot, image.heap_base
            ));
        }
        let header = ImageHeader::from_words(get_words(&image.bytes, 0)?)?;
        let reader = Self { image, header };
        let records = header.num_devices as usize * 4 * DeviceRecord::WORDS;
        reader.region(header.devices_ptr, records, "device records")?;
        let labels = header.num_in_edges as usize * header.edge_size as usize;
        reader.region(header.in_edges_ptr, labels, "incoming edges")?;
        Ok(reader)
    }

    #[must_use]
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Offset of a line-aligned region of `len` bytes at `ptr`.
    fn region(&self, ptr: u32, len: usize, what: &str) -> Result<usize, SimError> {
        let Some(offset) = ptr.checked_sub(self.image.heap_base) else {
            return sim_error!(format!(
                "{}: {what} pointer 0x{ptr:08x} below heap base",
                self.image.slot
            ));
        };
        if offset % LINE_BYTES != 0 {
            return sim_error!(format!(
                "{}: {what} at 0x{ptr:08x} is not line aligned",
                self.image.slot
            ));
        }
        let offset = offset as usize;
        if offset + len > self.image.bytes.len() {
            return sim_error!(format!(
                "{}: {what} at 0x{ptr:08x} overruns the image",
                self.image.slot
            ));
        }
        Ok(offset)
    }

    pub fn device(&self, local: u32) -> Result<DeviceRecord, SimError> {
        if local >= self.header.num_devices {
            return sim_error!(format!(
                "{}: no local device {local}",
                self.image.slot
            ));
        }
        let base = self.region(self.header.devices_ptr, 0, "device records")?;
        let offset = base + local as usize * 4 * DeviceRecord::WORDS;
        Ok(DeviceRecord::from_words(get_words(&self.image.bytes, offset)?))
    }

    pub fn state(&self, record: &DeviceRecord) -> Result<&'a [u8], SimError> {
        let len = self.header.state_size as usize;
        let offset = self.region(record.state_ptr, len, "device state")?;
        Ok(&self.image.bytes[offset..offset + len])
    }

    pub fn pin(&self, record: &DeviceRecord, entry: u32) -> Result<PinEntry, SimError> {
        if entry >= record.table_pins {
            return sim_error!(format!(
                "{}: pin entry {entry} out of range for device {}",
                self.image.slot, record.global_id
            ));
        }
        let table = 4 * PinEntry::WORDS * record.table_pins as usize;
        let base = self.region(record.pins_ptr, table, "pin table")?;
        let offset = base + entry as usize * 4 * PinEntry::WORDS;
        Ok(PinEntry::from_words(get_words(&self.image.bytes, offset)?))
    }

    pub fn neighbours(&self, pin: &PinEntry) -> Result<Vec<Neighbour>, SimError> {
        let len = pin.count as usize * 4 * Neighbour::WORDS;
        let base = self.region(pin.neighbours_ptr, len, "neighbour array")?;
        (0..pin.count as usize)
            .map(|n| {
                let words = get_words(&self.image.bytes, base + n * 4 * Neighbour::WORDS)?;
                Ok(Neighbour::from_words(words))
            })
            .collect()
    }

    pub fn in_edge_label(&self, key: u32) -> Result<&'a [u8], SimError> {
        if key >= self.header.num_in_edges {
            return sim_error!(format!(
                "{}: incoming edge key {key} out of range",
                self.image.slot
            ));
        }
        let size = self.header.edge_size as usize;
        let base = self.region(self.header.in_edges_ptr, 0, "incoming edges")?;
        let offset = base + key as usize * size;
        Ok(&self.image.bytes[offset..offset + size])
    }
}
