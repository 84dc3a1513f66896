//! Compute engine instruction encoding
//!
//! An instruction is a little-endian word of `size_bytes` bytes. The top
//! byte is the header (opcode in the high nibble, flags in the low nibble)
//! and the three operands are packed from the least significant bit up,
//! each with a width derived from the architecture.

use crate::error::ProgramError;
use crate::program::Architecture;

/// Widest instruction the encoder supports
pub const MAX_INSTRUCTION_BYTES: usize = 16;

const HEADER_BITS: u32 = 8;

/// Minimum width of operand 1, so configuration values always fit 16 bits
const MIN_OPERAND1_BITS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    NoOp = 0x0,
    MatMul = 0x1,
    DataMove = 0x2,
    LoadWeights = 0x3,
    Simd = 0x4,
    Configure = 0xF,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::NoOp),
            0x1 => Some(Opcode::MatMul),
            0x2 => Some(Opcode::DataMove),
            0x3 => Some(Opcode::LoadWeights),
            0x4 => Some(Opcode::Simd),
            0xF => Some(Opcode::Configure),
            _ => None,
        }
    }
}

// Data move directions (flags nibble of a DataMove instruction)
pub const DATA_MOVE_DRAM0_TO_LOCAL: u8 = 0x0;
pub const DATA_MOVE_LOCAL_TO_DRAM0: u8 = 0x1;
pub const DATA_MOVE_DRAM1_TO_LOCAL: u8 = 0x2;
pub const DATA_MOVE_LOCAL_TO_DRAM1: u8 = 0x3;

/// Configuration registers addressed by operand 0 of a Configure instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigRegister {
    Dram0Offset = 0x0,
    Dram1Offset = 0x2,
    Timeout = 0x4,
}

impl ConfigRegister {
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0x0 => Some(ConfigRegister::Dram0Offset),
            0x2 => Some(ConfigRegister::Dram1Offset),
            0x4 => Some(ConfigRegister::Timeout),
            _ => None,
        }
    }
}

/// Value placed in the DRAM0 offset slot until the first patch
pub const PLACEHOLDER_OFFSET: u64 = 0xffff;

/// DRAM offset register value for an absolute address (64 KiB units)
pub fn dram_offset(address: usize) -> u64 {
    (address >> 16) as u64
}

/// Decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub flags: u8,
    pub operands: [u64; 3],
}

impl Instruction {
    pub fn new(opcode: Opcode, flags: u8, op0: u64, op1: u64, op2: u64) -> Self {
        Self {
            opcode,
            flags,
            operands: [op0, op1, op2],
        }
    }

    pub fn no_op() -> Self {
        Self::new(Opcode::NoOp, 0, 0, 0, 0)
    }

    pub fn configure(register: ConfigRegister, value: u64) -> Self {
        Self::new(Opcode::Configure, 0, register as u64, value, 0)
    }

    /// Move `size + 1` vectors between local memory and DRAM
    pub fn data_move(flags: u8, local: u64, dram: u64, size: u64) -> Self {
        Self::new(Opcode::DataMove, flags, local, dram, size)
    }

    pub fn simd() -> Self {
        Self::new(Opcode::Simd, 0, 0, 0, 0)
    }

    /// Register written by a Configure instruction
    pub fn config_register(&self) -> Option<ConfigRegister> {
        match self.opcode {
            Opcode::Configure => ConfigRegister::from_bits(self.operands[0]),
            _ => None,
        }
    }

    fn header(&self) -> u8 {
        ((self.opcode as u8) << 4) | (self.flags & 0x0f)
    }
}

/// Bits needed to address `n` entries
fn bits_for(n: usize) -> u32 {
    if n <= 1 {
        1
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Operand widths and instruction size for one architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionLayout {
    operand_bits: [u32; 3],
    size_bytes: usize,
}

impl InstructionLayout {
    pub fn new(arch: &Architecture) -> Self {
        let local_bits = bits_for(arch.local_depth.max(arch.accumulator_depth));
        let dram_bits = bits_for(arch.dram0_depth.max(arch.dram1_depth));

        let operand_bits = [
            local_bits + bits_for(arch.stride0_depth),
            (dram_bits + bits_for(arch.stride1_depth)).max(MIN_OPERAND1_BITS),
            local_bits,
        ];

        let total = HEADER_BITS + operand_bits.iter().sum::<u32>();
        let size_bytes = (total as usize).div_ceil(8).next_power_of_two();

        Self {
            operand_bits,
            size_bytes,
        }
    }

    pub fn operand_bits(&self) -> [u32; 3] {
        self.operand_bits
    }

    pub fn total_bits(&self) -> u32 {
        HEADER_BITS + self.operand_bits.iter().sum::<u32>()
    }

    /// Encoded instruction size in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn encode(&self, instruction: &Instruction) -> Result<Vec<u8>, ProgramError> {
        let mut bytes = vec![0u8; self.size_bytes];
        self.encode_into(instruction, &mut bytes)?;
        Ok(bytes)
    }

    /// Encode into the first `size_bytes` bytes of `out`
    pub fn encode_into(&self, instruction: &Instruction, out: &mut [u8]) -> Result<(), ProgramError> {
        if out.len() < self.size_bytes {
            return Err(ProgramError::BufferOverflow {
                requested: self.size_bytes,
                capacity: out.len(),
            });
        }

        let mut word: u128 = 0;
        let mut shift = 0;
        for (index, (&value, &bits)) in instruction
            .operands
            .iter()
            .zip(self.operand_bits.iter())
            .enumerate()
        {
            if bits < 64 && value >> bits != 0 {
                return Err(ProgramError::OperandOverflow {
                    operand: index,
                    value,
                    bits,
                });
            }
            word |= (value as u128) << shift;
            shift += bits;
        }
        word |= (instruction.header() as u128) << (self.size_bytes * 8 - HEADER_BITS as usize);

        out[..self.size_bytes].copy_from_slice(&word.to_le_bytes()[..self.size_bytes]);
        Ok(())
    }

    /// Decode the instruction at the start of `bytes`; `offset` is used for errors only
    pub fn decode(&self, bytes: &[u8], offset: usize) -> Result<Instruction, ProgramError> {
        if bytes.len() < self.size_bytes {
            return Err(ProgramError::Misaligned {
                offset,
                alignment: self.size_bytes,
            });
        }

        let mut raw = [0u8; MAX_INSTRUCTION_BYTES];
        raw[..self.size_bytes].copy_from_slice(&bytes[..self.size_bytes]);
        let word = u128::from_le_bytes(raw);

        let header = (word >> (self.size_bytes * 8 - HEADER_BITS as usize)) as u8;
        let opcode = Opcode::from_bits(header >> 4)
            .ok_or(ProgramError::InvalidInstruction { offset, header })?;

        let mut operands = [0u64; 3];
        let mut shift = 0;
        for (operand, &bits) in operands.iter_mut().zip(self.operand_bits.iter()) {
            let mask = (1u128 << bits) - 1;
            *operand = ((word >> shift) & mask) as u64;
            shift += bits;
        }

        Ok(Instruction {
            opcode,
            flags: header & 0x0f,
            operands,
        })
    }
}
