use super::*;
use crate::config::ScoreMode;
use crate::hal::sim::{
    compact_compute, compact_config, FixedScores, GpioWrite, Ramp, SimBoard, SimCycleCounter,
    SimHandles, DEFAULT_SLACK_CYCLES,
};
use crate::hal::MotorDirection;
use crate::pipeline::scheduler::SchedulerState;
use crate::program::{ConfigRegister, Instruction, PLACEHOLDER_OFFSET};

fn stop_scores() -> Vec<i16> {
    let mut scores = vec![0i16; 12];
    scores[7] = 1368;
    scores
}

fn pipeline_with(config: &AppConfig, board: SimBoard) -> (SpeechPipeline, SimHandles) {
    let (board, handles) = board.with_compute(compact_compute()).build().unwrap();
    (SpeechPipeline::new(config.clone(), board.devices).unwrap(), handles)
}

fn pipeline() -> (SpeechPipeline, SimHandles) {
    let config = compact_config();
    let board = SimBoard::new(&config).with_model(FixedScores(stop_scores()));
    pipeline_with(&config, board)
}

#[test]
fn test_startup_sequence() {
    let (pipeline, handles) = pipeline();

    assert_eq!(handles.gpio.writes(), vec![GpioWrite::MicrophoneReset]);
    assert_eq!(pipeline.line(), 0);
    assert_eq!(pipeline.scheduler().state(), SchedulerState::Idle);

    // 2 configs + 8 image instructions + 2 probe moves
    let program = &pipeline.scheduler().program().buffer;
    assert_eq!(program.len(), 96);
    assert_eq!(
        program.instruction_at(0).unwrap(),
        Instruction::configure(ConfigRegister::Dram0Offset, PLACEHOLDER_OFFSET)
    );
    assert_eq!(
        program.instruction_at(8).unwrap(),
        Instruction::configure(
            ConfigRegister::Dram1Offset,
            (pipeline.layout().dram1.address >> 16) as u64
        )
    );

    // constants copied from flash into DRAM1
    let dram1 = pipeline.layout().dram1.address;
    assert_eq!(pipeline.dram().read(dram1, 4).unwrap(), &[0, 1, 2, 3]);
}

#[test]
fn test_program_is_resident_in_dram() {
    let (mut pipeline, _) = pipeline();
    let program = pipeline.layout().program.address;
    let bytes = pipeline.scheduler().program().buffer.as_bytes().to_vec();
    assert_eq!(pipeline.dram().read(program, bytes.len()).unwrap(), &bytes[..]);

    // line 0 infers region 1; the engine sees the patch through DRAM
    pipeline.step().unwrap();
    let layout = pipeline.scheduler().program().buffer.layout().clone();
    let slot = pipeline.dram().read(program, layout.size_bytes()).unwrap();
    assert_eq!(
        layout.decode(slot, 0).unwrap(),
        Instruction::configure(
            ConfigRegister::Dram0Offset,
            (pipeline.layout().model_inputs[1].address >> 16) as u64
        )
    );
}

#[test]
fn test_program_larger_than_instruction_buffer() {
    let mut config = compact_config();
    config.model.instruction_buffer_size = 64;
    let (board, _) = SimBoard::new(&config)
        .with_compute(compact_compute())
        .build()
        .unwrap();

    let err = SpeechPipeline::new(config, board.devices).err().unwrap();
    assert_eq!(err.code(), 3001);
    assert!(matches!(err, PipelineError::HardwareInit { ref stage, .. } if stage == "program build"));
}

#[test]
fn test_invalid_config_is_rejected_before_hardware() {
    let mut config = compact_config();
    config.pipeline.window_count = 3;
    let (board, handles) = SimBoard::new(&compact_config()).build().unwrap();

    let err = SpeechPipeline::new(config, board.devices).err().unwrap();
    assert_eq!(err.code(), 3005);
    assert!(handles.gpio.writes().is_empty());
}

#[test]
fn test_first_iteration_classifies_and_actuates() {
    let (mut pipeline, handles) = pipeline();

    let report = pipeline.step().unwrap();
    assert_eq!(report.iteration, 0);
    assert_eq!(report.line, 0);
    assert_eq!(report.roles, RegionRoles { prepare: 0, infer: 1 });
    assert_eq!(report.started.unwrap().region, 1);
    assert_eq!(report.slack_cycles, DEFAULT_SLACK_CYCLES);
    assert!(!report.timing_warning);

    let result = report.classification.unwrap();
    assert_eq!(result.label, "stop");
    assert!(result.accepted);
    assert!(report.command_changed);

    assert_eq!(handles.gpio.directions(), vec![MotorDirection::Forward]);
    assert_eq!(handles.gpio.last_leds(), Some(0b1000));
    assert_eq!(pipeline.command_state().countdown(), 7);
    assert_eq!(pipeline.line(), 1);
    assert_eq!(pipeline.scheduler().state(), SchedulerState::Idle);
}

#[test]
fn test_classification_only_at_window_boundaries() {
    let (mut pipeline, _) = pipeline();

    let mut classified = Vec::new();
    for _ in 0..12 {
        let report = pipeline.step().unwrap();
        if report.classification.is_some() {
            classified.push(report.iteration);
        }
    }
    assert_eq!(classified, vec![0, 4, 8]);

    let counters = pipeline.telemetry().counters();
    assert_eq!(counters.inferences_started, 3);
    assert_eq!(counters.classifications, 3);
    assert_eq!(counters.command_changes, 1);
}

#[test]
fn test_regions_alternate() {
    let (mut pipeline, _) = pipeline();
    let regions: Vec<usize> = (0..16)
        .filter_map(|_| pipeline.step().unwrap().started)
        .map(|run| run.region)
        .collect();
    assert_eq!(regions, vec![1, 0, 1, 0]);
}

#[test]
fn test_line_wraps_at_frame_height() {
    let (mut pipeline, _) = pipeline();
    let lines: Vec<usize> = (0..10).map(|_| pipeline.step().unwrap().line).collect();
    assert_eq!(lines, vec![0, 1, 2, 3, 4, 5, 6, 7, 0, 1]);
    assert_eq!(pipeline.iteration(), 10);
}

#[test]
fn test_spectrogram_holds_latest_transforms() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(stop_scores()))
        .with_source(Ramp::new(1.0 / 64.0, 1.0 / 64.0, 8));
    let (mut pipeline, _) = pipeline_with(&config, board);

    for _ in 0..20 {
        pipeline.step().unwrap();
    }

    // iteration n transforms packets n-2 and n-1: DC (2n - 1) / 64
    for n in 12..20usize {
        let line = pipeline
            .spectrogram()
            .read(pipeline.dram(), n % 8)
            .unwrap();
        assert_eq!(line[0] as usize, (2 * n - 1) * 4, "line for iteration {}", n);
    }
}

#[test]
fn test_slack_warning_is_not_fatal() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(stop_scores()))
        .with_cycle_counter(SimCycleCounter::scripted(vec![99_999, 100_000], 200_000));
    let (mut pipeline, _) = pipeline_with(&config, board);

    let warnings: Vec<bool> = (0..3).map(|_| pipeline.step().unwrap().timing_warning).collect();
    assert_eq!(warnings, vec![true, false, false]);

    let snapshot = pipeline.telemetry().snapshot();
    assert_eq!(snapshot.counters.timing_warnings, 1);
    assert_eq!(snapshot.slack.min_cycles, 99_999);
}

#[test]
fn test_actuation_disabled() {
    let mut config = compact_config();
    config.actuation.enabled = false;
    let board = SimBoard::new(&config).with_model(FixedScores(stop_scores()));
    let (mut pipeline, handles) = pipeline_with(&config, board);

    let report = pipeline.step().unwrap();
    assert!(report.classification.unwrap().accepted);
    assert!(!report.command_changed);
    assert!(handles.gpio.directions().is_empty());
}

#[test]
fn test_raw_mode_below_threshold() {
    let mut config = compact_config();
    config.classification.mode = ScoreMode::Raw;
    let board = SimBoard::new(&config).with_model(FixedScores(stop_scores()));
    let (mut pipeline, handles) = pipeline_with(&config, board);

    let result = pipeline.step().unwrap().classification.unwrap();
    assert_eq!(result.class_index, 7);
    assert_eq!(result.confidence, 1368.0 / 256.0);
    assert!(!result.accepted);
    assert!(handles.gpio.directions().is_empty());
}

#[test]
fn test_run_records_fault() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(stop_scores()))
        .stuck_compute();
    let (mut pipeline, _) = pipeline_with(&config, board);

    let mut seen = 0;
    let err = pipeline.run(Some(10), &mut |_: &IterationReport| seen += 1).unwrap_err();
    assert!(matches!(err, PipelineError::DeadlineViolation { line: 4, .. }));
    assert_eq!(seen, 4);

    let snapshot = pipeline.telemetry().snapshot();
    assert_eq!(snapshot.counters.faults, 1);
    assert!(matches!(
        snapshot.recent.last(),
        Some(PipelineEvent::Fault { code: 3003, .. })
    ));
}

#[test]
fn test_run_summary() {
    let (mut pipeline, _) = pipeline();
    let summary = pipeline.run(Some(6), &mut |_: &IterationReport| {}).unwrap();
    assert_eq!(summary.iterations, 6);
    assert_eq!(summary.active_command.as_deref(), Some("stop"));
    assert_eq!(summary.telemetry.counters.accepted, 2);
}
