//! SpeechPipeline: startup sequence and the per-packet control loop.

use serde::Serialize;

use crate::config::{AppConfig, PipelineGeometry};
use crate::error::{
    log_hardware_error, log_pipeline_error, log_program_error, ErrorCode, PipelineError,
};
use crate::hal::{Board, DescriptorRing, Devices, PlatformGuard};
use crate::memory::layout::{RX_DESCRIPTORS, TX_DESCRIPTORS};
use crate::memory::{Dram, MemoryLayout};
use crate::pipeline::acquisition::AcquisitionPipeline;
use crate::pipeline::actuation::{CommandState, CommandTable};
use crate::pipeline::classify::{ClassificationDispatcher, ClassificationResult};
use crate::pipeline::scheduler::{InferenceScheduler, ProbeLayout, StartedRun};
use crate::pipeline::spectrogram::SpectrogramRing;
use crate::pipeline::window::{RegionRoles, WindowBuilder};
use crate::program::{assemble, ProbeVectors};
use crate::telemetry::{PipelineEvent, TelemetryCollector, TelemetrySnapshot};

#[cfg(test)]
mod tests;

/// Everything observable about one iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub line: usize,
    pub roles: RegionRoles,
    pub started: Option<StartedRun>,
    pub classification: Option<ClassificationResult>,
    pub command_changed: bool,
    pub slack_cycles: u32,
    pub timing_warning: bool,
}

/// Outcome of a bounded run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u64,
    /// Label of the command driven at the end of the run
    pub active_command: Option<String>,
    pub telemetry: TelemetrySnapshot,
}

/// Owns the DRAM, the devices and every pipeline stage
pub struct SpeechPipeline {
    config: AppConfig,
    geometry: PipelineGeometry,
    layout: MemoryLayout,
    dram: Dram,
    devices: Devices,
    acquisition: AcquisitionPipeline,
    spectrogram: SpectrogramRing,
    window: WindowBuilder,
    scheduler: InferenceScheduler,
    dispatcher: ClassificationDispatcher,
    commands: Option<CommandTable>,
    command_state: CommandState,
    telemetry: TelemetryCollector,
    line: usize,
    iteration: u64,
}

impl SpeechPipeline {
    /// Validate the configuration, lay out DRAM and bring up every engine
    pub fn new(config: AppConfig, mut devices: Devices) -> Result<Self, PipelineError> {
        let geometry = config.validate()?;
        let layout = MemoryLayout::plan(&geometry);
        let mut dram = Dram::new(geometry.memory_base, layout.total_span);

        tracing::info!(
            "[Startup] {} regions planned, {:#x} bytes from {:#x}",
            layout.regions().len(),
            layout.total_span,
            geometry.memory_base
        );

        devices.gpio.release_microphone_reset();

        devices
            .transform
            .start_rings(
                &DescriptorRing {
                    space: layout.tx_descriptors.clone(),
                    count: TX_DESCRIPTORS,
                },
                &DescriptorRing {
                    space: layout.rx_descriptors.clone(),
                    count: RX_DESCRIPTORS,
                },
            )
            .map_err(|err| PipelineError::init("descriptor rings", &err))?;

        devices
            .compute
            .init()
            .map_err(|err| PipelineError::init("compute engine", &err))?;

        let data_width = devices.compute.instructions_data_width();
        let image = devices
            .flash
            .read(config.model.program_flash_offset, config.model.program_size)
            .map_err(|err| PipelineError::init("program image", &err))?;
        let probes = ProbeVectors::for_depth(geometry.dram0_depth);
        let program = assemble(
            &config.architecture,
            geometry.instruction_buffer_size,
            layout.dram1.address,
            image,
            probes,
            data_width,
        )
        .map_err(|err| {
            log_program_error(&err, "program build");
            PipelineError::init("program build", &err)
        })?;

        let consts = devices
            .flash
            .read(config.model.consts_flash_offset, geometry.consts_size)
            .map_err(|err| PipelineError::init("constants image", &err))?;
        dram.write(layout.dram1.address, consts).map_err(|err| {
            log_hardware_error(&err, "constants copy");
            PipelineError::init("constants copy", &err)
        })?;

        tracing::info!(
            "[Startup] Program assembled: {} bytes, {} byte instructions",
            program.buffer.len(),
            program.buffer.layout().size_bytes()
        );

        let scheduler = InferenceScheduler::new(
            program,
            &layout.program,
            layout.model_inputs.clone(),
            ProbeLayout::new(probes, geometry.vector_size),
            geometry.window_step,
        );
        scheduler.load_program(&mut dram).map_err(|err| {
            log_hardware_error(&err, "program load");
            PipelineError::init("program load", &err)
        })?;
        let commands = config
            .actuation
            .enabled
            .then(|| CommandTable::from_config(&config));

        tracing::info!("[Startup] Ready");

        Ok(Self {
            acquisition: AcquisitionPipeline::new(&layout, &geometry, &config.timing),
            spectrogram: SpectrogramRing::new(layout.spectrogram.clone(), &geometry),
            window: WindowBuilder::new(&geometry),
            dispatcher: ClassificationDispatcher::new(&config, &layout),
            command_state: CommandState::new(config.debounce_ticks()),
            commands,
            scheduler,
            telemetry: TelemetryCollector::default(),
            line: 0,
            iteration: 0,
            config,
            geometry,
            layout,
            dram,
            devices,
        })
    }

    pub fn geometry(&self) -> &PipelineGeometry {
        &self.geometry
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn dram(&self) -> &Dram {
        &self.dram
    }

    pub fn scheduler(&self) -> &InferenceScheduler {
        &self.scheduler
    }

    pub fn spectrogram(&self) -> &SpectrogramRing {
        &self.spectrogram
    }

    pub fn command_state(&self) -> &CommandState {
        &self.command_state
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Spectrogram line written by the next iteration
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Run one iteration of the control loop
    pub fn step(&mut self) -> Result<IterationReport, PipelineError> {
        let line = self.line;
        let iteration = self.iteration;

        self.acquisition
            .trigger(&mut self.dram, self.devices.acquisition.as_mut())?;
        let target = self.spectrogram.line_region(line);
        self.acquisition
            .transform(&mut self.dram, self.devices.transform.as_mut(), &target)?;

        // A run still going at a boundary owns the region this line would
        // be folded into
        self.scheduler.check_boundary(line)?;

        let roles = self.scheduler.roles(line);
        self.window
            .fold_line(
                &mut self.dram,
                &self.spectrogram,
                line,
                &self.layout.model_inputs[roles.prepare],
            )
            .map_err(|err| PipelineError::transfer("window fold", &err))?;

        let step = self
            .scheduler
            .on_line(line, &mut self.dram, self.devices.compute.as_mut())?;
        if let Some(started) = step.started {
            self.telemetry.publish(PipelineEvent::InferenceStarted {
                line: started.line,
                region: started.region,
                accepted_bytes: started.accepted_bytes,
            });
        }

        let mut command_changed = false;
        let classification = match step.completed {
            Some(region) => {
                let result = self.dispatcher.classify(
                    &mut self.dram,
                    &self.layout.model_inputs[region],
                    self.devices.exp.as_mut(),
                )?;
                self.telemetry.publish(PipelineEvent::Classification {
                    iteration,
                    class_index: result.class_index,
                    label: result.label.clone(),
                    confidence: result.confidence,
                    accepted: result.accepted,
                });

                if result.accepted {
                    if let Some(table) = &self.commands {
                        command_changed = self.command_state.handle_event(
                            &result,
                            table,
                            self.devices.gpio.as_mut(),
                        );
                        match table.get(result.class_index) {
                            Some(action) if command_changed => {
                                self.telemetry.publish(PipelineEvent::CommandChanged {
                                    iteration,
                                    label: action.label.clone(),
                                    direction: action.direction,
                                    leds: action.leds,
                                });
                            }
                            _ => {}
                        }
                    }
                }
                Some(result)
            }
            None => None,
        };
        self.command_state.tick();

        self.line = (line + 1) % self.geometry.frame_height;

        let slack_cycles = self.acquisition.wait_acquisition(
            &mut self.dram,
            self.devices.acquisition.as_mut(),
            self.devices.timer.as_mut(),
        )?;
        self.telemetry.observe_slack(slack_cycles);

        let timing_warning = slack_cycles < self.config.timing.slack_warning_cycles;
        if timing_warning {
            tracing::warn!(
                "[Acquisition] iteration {} slack {} cycles, below {}",
                iteration,
                slack_cycles,
                self.config.timing.slack_warning_cycles
            );
            self.telemetry.publish(PipelineEvent::TimingWarning {
                iteration,
                slack_cycles,
            });
        }

        self.iteration += 1;

        Ok(IterationReport {
            iteration,
            line,
            roles,
            started: step.started,
            classification,
            command_changed,
            slack_cycles,
            timing_warning,
        })
    }

    /// Loop until `iterations` have run (forever when `None`) or a fault occurs
    pub fn run(
        &mut self,
        iterations: Option<u64>,
        observer: &mut dyn FnMut(&IterationReport),
    ) -> Result<RunSummary, PipelineError> {
        let mut done = 0u64;
        while iterations.map_or(true, |limit| done < limit) {
            match self.step() {
                Ok(report) => observer(&report),
                Err(err) => {
                    self.telemetry.publish(PipelineEvent::Fault {
                        code: err.code(),
                        message: err.message(),
                    });
                    return Err(err);
                }
            }
            done += 1;
        }

        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            iterations: self.iteration,
            active_command: self
                .command_state
                .active()
                .and_then(|class| self.dispatcher.labels().get(class).cloned()),
            telemetry: self.telemetry.snapshot(),
        }
    }
}

/// Bring up the platform, run the pipeline, and always clean up
///
/// The platform guard releases the platform on every path out of this
/// function, including startup failures and faults in the loop.
pub fn run_firmware(
    config: &AppConfig,
    board: Board,
    iterations: Option<u64>,
    observer: &mut dyn FnMut(&IterationReport),
) -> Result<RunSummary, PipelineError> {
    let Board { platform, devices } = board;
    let mut guard = PlatformGuard::new(platform);

    let result = guard
        .init()
        .map_err(|err| PipelineError::init("platform", &err))
        .and_then(|_| SpeechPipeline::new(config.clone(), devices))
        .and_then(|mut pipeline| pipeline.run(iterations, observer));

    if let Err(err) = &result {
        log_pipeline_error(err, "run_firmware");
    }
    result
}
