//! Compute engine instruction programs
//!
//! The inference program is assembled once at startup:
//!
//! 1. a DRAM0 offset configure instruction holding a placeholder, patched
//!    in place before each run to point at the region being inferred;
//! 2. the DRAM1 offset configure instruction for the model constants;
//! 3. the compiled model program copied from flash;
//! 4. two data moves copying the probe source vector over the probe target
//!    through local memory;
//! 5. NoOp padding up to the engine's instruction data width.

pub mod architecture;
pub mod buffer;
pub mod instruction;

pub use architecture::{Architecture, DataType};
pub use buffer::{InstructionBuffer, PatchSlot};
pub use instruction::{
    dram_offset, ConfigRegister, Instruction, InstructionLayout, Opcode, DATA_MOVE_DRAM0_TO_LOCAL,
    DATA_MOVE_DRAM1_TO_LOCAL, DATA_MOVE_LOCAL_TO_DRAM0, DATA_MOVE_LOCAL_TO_DRAM1,
    PLACEHOLDER_OFFSET,
};

use crate::error::ProgramError;

/// Built inference program plus the slot that selects its DRAM0 region
#[derive(Debug, Clone)]
pub struct InferenceProgram {
    pub buffer: InstructionBuffer,
    pub dram0_slot: PatchSlot,
}

/// DRAM0 vector indices of the completion probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeVectors {
    pub source: usize,
    pub target: usize,
}

impl ProbeVectors {
    /// Last vector is the source, second to last the target
    pub fn for_depth(dram0_depth: usize) -> Self {
        Self {
            source: dram0_depth - 1,
            target: dram0_depth - 2,
        }
    }
}

/// Assemble the inference program around the compiled model image
pub fn assemble(
    arch: &Architecture,
    capacity: usize,
    dram1_address: usize,
    image: &[u8],
    probes: ProbeVectors,
    data_width: usize,
) -> Result<InferenceProgram, ProgramError> {
    let mut buffer = InstructionBuffer::new(InstructionLayout::new(arch), capacity);
    buffer.reset();

    let dram0_slot = buffer.append_config(ConfigRegister::Dram0Offset, PLACEHOLDER_OFFSET)?;
    buffer.append_config(ConfigRegister::Dram1Offset, dram_offset(dram1_address))?;

    buffer.append_program(image)?;

    buffer.append_instruction(&Instruction::data_move(
        DATA_MOVE_DRAM0_TO_LOCAL,
        0,
        probes.source as u64,
        0,
    ))?;
    buffer.append_instruction(&Instruction::data_move(
        DATA_MOVE_LOCAL_TO_DRAM0,
        0,
        probes.target as u64,
        0,
    ))?;

    buffer.pad_to_alignment(data_width)?;

    Ok(InferenceProgram { buffer, dram0_slot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_layout() {
        let arch = Architecture::default();
        let layout = InstructionLayout::new(&arch);
        let image: Vec<u8> = (0..4)
            .flat_map(|_| layout.encode(&Instruction::no_op()).unwrap())
            .collect();

        let program = assemble(
            &arch,
            0x1000,
            0x8040_0000,
            &image,
            ProbeVectors::for_depth(arch.dram0_depth),
            64,
        )
        .unwrap();
        let buffer = &program.buffer;

        assert_eq!(program.dram0_slot.offset(), 0);
        assert_eq!(
            buffer.instruction_at(0).unwrap(),
            Instruction::configure(ConfigRegister::Dram0Offset, PLACEHOLDER_OFFSET)
        );
        assert_eq!(
            buffer.instruction_at(8).unwrap(),
            Instruction::configure(ConfigRegister::Dram1Offset, 0x8040)
        );
        // 2 configs + 4 image + 2 probe moves = 64 bytes, already aligned
        assert_eq!(buffer.len(), 64);
        assert_eq!(
            buffer.instruction_at(48).unwrap(),
            Instruction::data_move(DATA_MOVE_DRAM0_TO_LOCAL, 0, 32767, 0)
        );
        assert_eq!(
            buffer.instruction_at(56).unwrap(),
            Instruction::data_move(DATA_MOVE_LOCAL_TO_DRAM0, 0, 32766, 0)
        );
    }

    #[test]
    fn test_assemble_pads_to_data_width() {
        let arch = Architecture::default();
        let program = assemble(&arch, 0x1000, 0x8040_0000, &[], ProbeVectors::for_depth(8), 64).unwrap();
        assert_eq!(program.buffer.len(), 64);
        assert_eq!(
            program.buffer.instruction_at(32).unwrap().opcode,
            Opcode::NoOp
        );
    }

    #[test]
    fn test_assemble_overflow() {
        let arch = Architecture::default();
        let result = assemble(&arch, 16, 0x8040_0000, &[0u8; 8], ProbeVectors::for_depth(8), 8);
        assert!(matches!(result, Err(ProgramError::BufferOverflow { .. })));
    }
}
