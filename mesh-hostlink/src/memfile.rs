// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Memory images in the "verilog" hex format produced by `objcopy`:
//!
//! ```text
//! @00000200
//! 6F 00 40 00 13 01
//!
//! @00100000
//! 48 65 6C 6C 6F
//! ```
//!
//! Each `@` line starts a new run of bytes at the given address.

use std::fs;
use std::path::Path;

use mesh_engine::sim_error;
use mesh_engine::types::SimError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    pub addr: u32,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemFile {
    pub segments: Vec<Segment>,
}

impl MemFile {
    pub fn read(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)
            .map_err(|e| SimError(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| SimError(format!("{}: {}", path.display(), e.0)))
    }

    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut segments: Vec<Segment> = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            for token in line.split_whitespace() {
                if let Some(addr) = token.strip_prefix('@') {
                    let addr = u32::from_str_radix(addr, 16).map_err(|e| {
                        SimError(format!("line {}: bad address '{token}': {e}", line_no + 1))
                    })?;
                    segments.push(Segment {
                        addr,
                        bytes: Vec::new(),
                    });
                    continue;
                }
                let byte = u8::from_str_radix(token, 16).map_err(|e| {
                    SimError(format!("line {}: bad byte '{token}': {e}", line_no + 1))
                })?;
                match segments.last_mut() {
                    Some(segment) => segment.bytes.push(byte),
                    None => {
                        segments.push(Segment {
                            addr: 0,
                            bytes: vec![byte],
                        });
                    }
                }
            }
        }
        segments.retain(|s| !s.bytes.is_empty());
        Ok(Self { segments })
    }

    /// Little-endian words with their addresses. A trailing partial word is
    /// padded with zeros.
    #[must_use]
    pub fn words(&self) -> Vec<(u32, u32)> {
        let mut words = Vec::new();
        for segment in &self.segments {
            for (i, chunk) in segment.bytes.chunks(4).enumerate() {
                let mut le = [0; 4];
                le[..chunk.len()].copy_from_slice(chunk);
                words.push((segment.addr + 4 * i as u32, u32::from_le_bytes(le)));
            }
        }
        words
    }

    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.bytes.len()).sum()
    }

    pub fn check_aligned(&self) -> Result<(), SimError> {
        match self.segments.iter().find(|s| s.addr % 4 != 0) {
            Some(segment) => sim_error!(format!(
                "segment at 0x{:x} is not word aligned",
                segment.addr
            )),
            None => Ok(()),
        }
    }
}
