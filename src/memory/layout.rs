//! Placement of every pipeline buffer in DRAM

use serde::Serialize;

use crate::config::PipelineGeometry;
use crate::memory::{DramArena, Region};

/// Bytes reserved per scatter-gather descriptor
pub const DESCRIPTOR_SIZE: usize = 0x40;

/// Scatter (transform input) descriptors per iteration
pub const TX_DESCRIPTORS: usize = 2;

/// Gather (transform output) descriptors per iteration
pub const RX_DESCRIPTORS: usize = 1;

/// Planned DRAM regions, in allocation order
#[derive(Debug, Clone, Serialize)]
pub struct MemoryLayout {
    pub rx_descriptors: Region,
    pub tx_descriptors: Region,
    /// Ping-pong acquisition buffer (two packets)
    pub acquisition: Region,
    /// Transform input packet (two packets)
    pub transform_input: Region,
    pub spectrogram: Region,
    pub model_inputs: Vec<Region>,
    pub dram1: Region,
    pub program: Region,
    pub exp_tx: Region,
    pub exp_rx: Region,
    /// Bytes from the base to the end of the last span
    pub total_span: usize,
}

impl MemoryLayout {
    pub fn plan(geometry: &PipelineGeometry) -> Self {
        let mut arena = DramArena::new(geometry.memory_base, geometry.buffer_alignment);

        let rx_descriptors = arena.allocate("rx_descriptors", RX_DESCRIPTORS * DESCRIPTOR_SIZE);
        let tx_descriptors = arena.allocate("tx_descriptors", TX_DESCRIPTORS * DESCRIPTOR_SIZE);
        let acquisition = arena.allocate("acquisition", 2 * geometry.acq_packet_size);
        let transform_input = arena.allocate("transform_input", 2 * geometry.acq_packet_size);
        let spectrogram = arena.allocate(
            "spectrogram",
            geometry.frame_height * geometry.frame_line_size,
        );
        let model_inputs = (0..geometry.model_input_buffers)
            .map(|index| arena.allocate(format!("model_input_{}", index), geometry.dram0_size))
            .collect();
        let dram1 = arena.allocate("dram1", geometry.dram1_size);
        let program = arena.allocate("program", geometry.instruction_buffer_size);
        let exp_tx = arena.allocate("exp_tx", geometry.output_length * 2);
        let exp_rx = arena.allocate("exp_rx", geometry.output_length * 8);

        Self {
            rx_descriptors,
            tx_descriptors,
            acquisition,
            transform_input,
            spectrogram,
            model_inputs,
            dram1,
            program,
            exp_tx,
            exp_rx,
            total_span: arena.used(),
        }
    }

    /// All regions in allocation order
    pub fn regions(&self) -> Vec<&Region> {
        let mut regions = vec![
            &self.rx_descriptors,
            &self.tx_descriptors,
            &self.acquisition,
            &self.transform_input,
            &self.spectrogram,
        ];
        regions.extend(self.model_inputs.iter());
        regions.extend([&self.dram1, &self.program, &self.exp_tx, &self.exp_rx]);
        regions
    }
}
