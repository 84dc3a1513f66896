//! Append-only instruction buffer with a single patchable slot

use crate::error::ProgramError;
use crate::program::instruction::{ConfigRegister, Instruction, InstructionLayout};

/// Instruction program under construction
///
/// Instructions are appended at the write offset. After the program is
/// built, the only supported mutation is [`InstructionBuffer::overwrite_at`],
/// which rewrites one already-written instruction without moving the
/// write offset.
#[derive(Debug, Clone)]
pub struct InstructionBuffer {
    layout: InstructionLayout,
    bytes: Vec<u8>,
    capacity: usize,
}

impl InstructionBuffer {
    pub fn new(layout: InstructionLayout, capacity: usize) -> Self {
        Self {
            layout,
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn layout(&self) -> &InstructionLayout {
        &self.layout
    }

    /// Bytes written so far (the program length)
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    fn reserve(&self, len: usize) -> Result<(), ProgramError> {
        let requested = self.bytes.len() + len;
        if requested > self.capacity {
            return Err(ProgramError::BufferOverflow {
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Append one instruction, returning the offset it was written at
    pub fn append_instruction(&mut self, instruction: &Instruction) -> Result<usize, ProgramError> {
        let size = self.layout.size_bytes();
        self.reserve(size)?;

        let offset = self.bytes.len();
        let encoded = self.layout.encode(instruction)?;
        self.bytes.extend_from_slice(&encoded);
        Ok(offset)
    }

    /// Append a configuration write and return its patch slot
    pub fn append_config(
        &mut self,
        register: ConfigRegister,
        value: u64,
    ) -> Result<PatchSlot, ProgramError> {
        let offset = self.append_instruction(&Instruction::configure(register, value))?;
        Ok(PatchSlot { offset, register })
    }

    /// Append pre-encoded instructions copied from the program image
    pub fn append_program(&mut self, program: &[u8]) -> Result<(), ProgramError> {
        let size = self.layout.size_bytes();
        if program.len() % size != 0 {
            return Err(ProgramError::Misaligned {
                offset: self.bytes.len() + program.len(),
                alignment: size,
            });
        }
        self.reserve(program.len())?;
        self.bytes.extend_from_slice(program);
        Ok(())
    }

    /// Append NoOps until the length is a multiple of `alignment`
    pub fn pad_to_alignment(&mut self, alignment: usize) -> Result<(), ProgramError> {
        let size = self.layout.size_bytes();
        if alignment == 0 || alignment % size != 0 {
            return Err(ProgramError::Misaligned {
                offset: self.bytes.len(),
                alignment,
            });
        }

        let no_op = Instruction::no_op();
        while self.bytes.len() % alignment != 0 {
            self.append_instruction(&no_op)?;
        }
        Ok(())
    }

    /// Rewrite the instruction at `offset` in place
    pub fn overwrite_at(&mut self, offset: usize, instruction: &Instruction) -> Result<(), ProgramError> {
        let size = self.layout.size_bytes();
        if offset % size != 0 || offset + size > self.bytes.len() {
            return Err(ProgramError::InvalidPatch {
                offset,
                len: self.bytes.len(),
            });
        }
        self.layout
            .encode_into(instruction, &mut self.bytes[offset..offset + size])
    }

    /// Decode the instruction at `offset`
    pub fn instruction_at(&self, offset: usize) -> Result<Instruction, ProgramError> {
        let size = self.layout.size_bytes();
        if offset % size != 0 || offset + size > self.bytes.len() {
            return Err(ProgramError::InvalidPatch {
                offset,
                len: self.bytes.len(),
            });
        }
        self.layout.decode(&self.bytes[offset..], offset)
    }
}

/// A configuration instruction that is rewritten before every run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSlot {
    offset: usize,
    register: ConfigRegister,
}

impl PatchSlot {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn register(&self) -> ConfigRegister {
        self.register
    }

    /// Overwrite the slot with a new register value
    pub fn patch(&self, buffer: &mut InstructionBuffer, value: u64) -> Result<(), ProgramError> {
        buffer.overwrite_at(self.offset, &Instruction::configure(self.register, value))
    }
}
