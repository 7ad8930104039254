// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Loading a heap image into typed per-slot state.

use mesh_config::settings::Discipline;
use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_graph::address::SlotAddress;
use mesh_mapper::image::{HeapImage, ImageReader};
use mesh_mapper::layout::{DeviceRecord, Neighbour};

use crate::device::Device;
use crate::message::{decode_payload, encode_payload};

pub struct LoadedDevice<D: Device> {
    pub global_id: u32,
    pub state: D,

    /// Neighbours of every pin table entry, entry 0 being the sync entry.
    pub entries: Vec<Vec<Neighbour>>,

    /// Incoming edges, sync edges included.
    pub num_in: u32,

    pub fan_out: u32,
}

/// Everything a slot runs, restored from its heap image.
pub struct SlotProgram<D: Device> {
    pub slot: SlotAddress,
    pub discipline: Discipline,
    pub message_bytes: u32,
    pub devices: Vec<LoadedDevice<D>>,

    /// Label of every incoming edge, indexed by edge key.
    pub in_edges: Vec<D::Edge>,
}

impl<D: Device> SlotProgram<D> {
    pub fn load(image: &HeapImage) -> Result<Self, SimError> {
        let slot = image.slot;
        let reader = ImageReader::new(image)?;
        let header = *reader.header();

        let state_size = encode_payload(&D::default())?.len() as u32;
        if state_size != header.state_size {
            return sim_error!(format!(
                "{slot}: image holds {} byte states, got {state_size}",
                header.state_size
            ));
        }
        let message_bytes = encode_payload(&D::Message::default())?.len() as u32;
        if message_bytes != header.message_bytes {
            return sim_error!(format!(
                "{slot}: image expects {} byte messages, got {message_bytes}",
                header.message_bytes
            ));
        }

        let mut devices = Vec::with_capacity(header.num_devices as usize);
        for local in 0..header.num_devices {
            let record = reader.device(local)?;
            devices.push(Self::load_device(&reader, &record)?);
        }

        let mut in_edges = Vec::with_capacity(header.num_in_edges as usize);
        for key in 0..header.num_in_edges {
            let label = reader.in_edge_label(key)?;
            in_edges.push(
                decode_payload(label)
                    .map_err(|e| SimError(format!("{slot}: incoming edge {key}: {}", e.0)))?,
            );
        }

        let program = Self {
            slot,
            discipline: header.discipline,
            message_bytes,
            devices,
            in_edges,
        };
        program.check_local_neighbours()?;
        Ok(program)
    }

    fn load_device(
        reader: &ImageReader,
        record: &DeviceRecord,
    ) -> Result<LoadedDevice<D>, SimError> {
        let state = decode_payload(reader.state(record)?)
            .map_err(|e| SimError(format!("device {}: {}", record.global_id, e.0)))?;
        let mut entries = Vec::with_capacity(record.table_pins as usize);
        for entry in 0..record.table_pins {
            let pin = reader.pin(record, entry)?;
            entries.push(reader.neighbours(&pin)?);
        }
        Ok(LoadedDevice {
            global_id: record.global_id,
            state,
            entries,
            num_in: record.num_in,
            fan_out: record.fan_out,
        })
    }

    /// Neighbours on this slot are delivered without leaving it, so they must
    /// name a device and edge of this image.
    fn check_local_neighbours(&self) -> Result<(), SimError> {
        let here = self.slot.encode()?;
        for device in &self.devices {
            for neighbour in device.entries.iter().flatten() {
                if neighbour.slot != here {
                    continue;
                }
                if usize::from(neighbour.local) >= self.devices.len()
                    || usize::from(neighbour.key) >= self.in_edges.len()
                {
                    return sim_error!(format!(
                        "{}: device {} has a neighbour at local {} key {} outside the image",
                        self.slot, device.global_id, neighbour.local, neighbour.key
                    ));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }
}
