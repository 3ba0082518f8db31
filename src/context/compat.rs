//! Fixed-function compatibility block.
//!
//! Holds the shader programs that emulate the fixed-function pipeline on the
//! programmable units. Programs are rebuilt by the API layer and uploaded on
//! the next context flush when marked dirty.

use crate::error::{DriverError, Result};

/// Vertex shader instruction memory.
pub const VS_INSTRUCTION_BASE: u32 = 0x1_0000;
/// Vertex shader program counter range (start in the low half, end in the high half).
pub const VS_PC_RANGE: u32 = 0x2_0000;
/// Pixel shader instruction memory.
pub const PS_INSTRUCTION_BASE: u32 = 0x4_0000;
pub const PS_PC_START: u32 = 0x4_c000;
pub const PS_PC_END: u32 = 0x4_c004;

/// Words per shader instruction.
pub const INSTRUCTION_WORDS: usize = 4;
/// Instruction slots of each shader unit.
pub const MAX_INSTRUCTIONS: usize = 512;

/// Scratch buffers and dirty tracking for the compatibility programs.
#[derive(Debug, Default)]
pub struct CompatState {
    vshader: Vec<u32>,
    pshader: Vec<u32>,
    dirty: bool,
}

impl CompatState {
    pub fn new() -> Self {
        log::trace!("Compatibility block initialized");
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn vertex_program(&self) -> &[u32] {
        &self.vshader
    }

    pub fn pixel_program(&self) -> &[u32] {
        &self.pshader
    }

    /// Replace the vertex program. Uploaded on the next flush.
    pub fn set_vertex_program(&mut self, words: &[u32]) -> Result<()> {
        Self::load(&mut self.vshader, words)?;
        self.dirty = true;
        Ok(())
    }

    /// Replace the pixel program. Uploaded on the next flush.
    pub fn set_pixel_program(&mut self, words: &[u32]) -> Result<()> {
        Self::load(&mut self.pshader, words)?;
        self.dirty = true;
        Ok(())
    }

    fn load(buffer: &mut Vec<u32>, words: &[u32]) -> Result<()> {
        if words.len() % INSTRUCTION_WORDS != 0 {
            return Err(DriverError::InvalidParameter(format!(
                "program of {} words is not a whole number of instructions",
                words.len()
            )));
        }
        if words.len() / INSTRUCTION_WORDS > MAX_INSTRUCTIONS {
            return Err(DriverError::InvalidParameter(format!(
                "program of {} instructions exceeds {}",
                words.len() / INSTRUCTION_WORDS,
                MAX_INSTRUCTIONS
            )));
        }
        buffer.clear();
        buffer
            .try_reserve_exact(words.len())
            .map_err(|_| DriverError::OutOfMemory)?;
        buffer.extend_from_slice(words);
        Ok(())
    }

    /// Register writes uploading the dirty programs, then clears the dirty flag.
    /// Empty when nothing changed.
    pub fn take_upload(&mut self) -> Vec<(u32, u32)> {
        if !self.dirty {
            return Vec::new();
        }
        self.dirty = false;

        let mut writes = Vec::with_capacity(self.vshader.len() + self.pshader.len() + 3);
        writes.extend(program_writes(VS_INSTRUCTION_BASE, &self.vshader));
        if let Some(end) = last_instruction(&self.vshader) {
            writes.push((VS_PC_RANGE, end << 16));
        }
        writes.extend(program_writes(PS_INSTRUCTION_BASE, &self.pshader));
        if let Some(end) = last_instruction(&self.pshader) {
            writes.push((PS_PC_START, 0));
            writes.push((PS_PC_END, end));
        }
        writes
    }
}

fn program_writes(base: u32, words: &[u32]) -> impl Iterator<Item = (u32, u32)> + '_ {
    words
        .iter()
        .enumerate()
        .map(move |(i, &word)| (base + 4 * i as u32, word))
}

fn last_instruction(words: &[u32]) -> Option<u32> {
    (words.len() / INSTRUCTION_WORDS).checked_sub(1).map(|n| n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_block_uploads_nothing() {
        let mut compat = CompatState::new();
        assert!(compat.take_upload().is_empty());
    }

    #[test]
    fn test_upload_clears_dirty() {
        let mut compat = CompatState::new();
        compat.set_vertex_program(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(compat.is_dirty());

        let writes = compat.take_upload();
        assert_eq!(writes[0], (VS_INSTRUCTION_BASE, 1));
        assert_eq!(writes[7], (VS_INSTRUCTION_BASE + 28, 8));
        assert_eq!(writes[8], (VS_PC_RANGE, 1 << 16));
        assert_eq!(writes.len(), 9);

        assert!(!compat.is_dirty());
        assert!(compat.take_upload().is_empty());
    }

    #[test]
    fn test_partial_instruction_rejected() {
        let mut compat = CompatState::new();
        assert!(compat.set_pixel_program(&[1, 2, 3]).is_err());
        assert!(!compat.is_dirty());
    }
}
