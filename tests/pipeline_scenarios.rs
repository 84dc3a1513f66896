//! End-to-end scenarios on the simulated board
//!
//! These drive the public API only: a `SimBoard` built from the compact
//! eight-line geometry, run either through `run_firmware` or stepped one
//! iteration at a time with `SpeechPipeline`.

use speech_robot::config::AppConfig;
use speech_robot::error::{ErrorCode, PipelineError};
use speech_robot::hal::sim::{
    compact_compute, compact_config, FixedScores, FnModel, ModelInput, Noise, Ramp, SimBoard,
    SimHandles,
};
use speech_robot::hal::{Board, MotorDirection};
use speech_robot::pipeline::{run_firmware, IterationReport, SpeechPipeline, WindowBuilder};

const STOP: usize = 7;
const GO: usize = 1;

fn scores_for(class: usize) -> Vec<i16> {
    // 1368/256 ahead of eleven zeros: softmax confidence 0.95
    let mut scores = vec![0i16; 12];
    scores[class] = 1368;
    scores
}

fn build(board: SimBoard) -> (Board, SimHandles) {
    board.with_compute(compact_compute()).build().unwrap()
}

type Reports = Result<Vec<IterationReport>, PipelineError>;

fn run(config: &AppConfig, board: SimBoard, iterations: u64) -> (Reports, SimHandles) {
    let (board, handles) = build(board);
    let mut reports = Vec::new();
    let result = run_firmware(config, board, Some(iterations), &mut |report: &IterationReport| {
        reports.push(report.clone())
    });
    (result.map(|_| reports), handles)
}

#[test]
fn stop_keyword_changes_command_once() {
    let config = compact_config();
    let board = SimBoard::new(&config).with_model(FixedScores(scores_for(STOP)));
    let (reports, handles) = run(&config, board, 24);
    let reports = reports.unwrap();

    let changes: Vec<u64> = reports
        .iter()
        .filter(|r| r.command_changed)
        .map(|r| r.iteration)
        .collect();
    assert_eq!(changes, vec![0]);

    let first = reports[0].classification.as_ref().unwrap();
    assert_eq!(first.class_index, STOP);
    assert!((first.confidence - 0.95).abs() < 0.005);

    assert_eq!(handles.gpio.directions(), vec![MotorDirection::Forward]);
    assert_eq!(handles.gpio.last_leds(), Some(0b1000));
}

#[test]
fn debounce_spaces_command_changes() {
    let config = compact_config();
    let mut evaluations = 0usize;
    let model = FnModel(move |_input: &ModelInput<'_>| {
        let class = if evaluations % 2 == 0 { GO } else { STOP };
        evaluations += 1;
        scores_for(class)
    });
    let board = SimBoard::new(&config).with_model(model);
    let (reports, handles) = run(&config, board, 28);

    let changes: Vec<u64> = reports
        .unwrap()
        .iter()
        .filter(|r| r.command_changed)
        .map(|r| r.iteration)
        .collect();
    // inferences every 4 iterations, debounce of 8
    assert_eq!(changes, vec![0, 12, 24]);
    assert!(changes
        .windows(2)
        .all(|pair| pair[1] - pair[0] >= config.debounce_ticks() as u64));
    assert_eq!(
        handles.gpio.last_leds(),
        Some(0b0001),
        "go is active after the third change"
    );
}

#[test]
fn stuck_accelerator_misses_second_boundary() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(scores_for(STOP)))
        .stuck_compute();
    let (result, handles) = run(&config, board, 20);

    let err = result.unwrap_err();
    assert_eq!(err.code(), 3003);
    match err {
        PipelineError::DeadlineViolation {
            line,
            run_offset,
            program_len,
        } => {
            assert_eq!(line, 4);
            assert_eq!(run_offset, program_len);
        }
        other => panic!("expected deadline violation, got {other:?}"),
    }
    assert_eq!(handles.platform.inits(), 1);
    assert_eq!(handles.platform.cleanups(), 1);
    assert!(handles.gpio.directions().is_empty());
}

#[test]
fn extra_transform_completion_is_transfer_fault() {
    let config = compact_config();
    let board = SimBoard::new(&config).with_extra_transform_completion();
    let (result, handles) = run(&config, board, 4);

    let err = result.unwrap_err();
    assert_eq!(err.code(), 3002);
    assert!(err.message().contains("transform completion"));
    assert_eq!(handles.platform.cleanups(), 1);
}

#[test]
fn failed_platform_init_still_cleans_up() {
    let config = compact_config();
    let board = SimBoard::new(&config).with_failing_platform();
    let (result, handles) = run(&config, board, 4);

    assert!(matches!(
        result.unwrap_err(),
        PipelineError::HardwareInit { ref stage, .. } if stage == "platform"
    ));
    assert_eq!(handles.platform.inits(), 1);
    assert_eq!(handles.platform.cleanups(), 1);
    assert!(handles.gpio.writes().is_empty());
}

#[test]
fn inferring_region_is_never_folded_into() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(scores_for(STOP)))
        .with_source(Noise::new(11, 0.5));
    let (board, _) = build(board);
    let mut pipeline = SpeechPipeline::new(config, board.devices).unwrap();

    let vector_size = pipeline.geometry().vector_size;
    // scores at the front and probe vectors at the back belong to the engine
    let folded = 24..(pipeline.geometry().dram0_depth - 2) * vector_size;

    for _ in 0..24 {
        let line = pipeline.line();
        let roles = pipeline.scheduler().roles(line);
        let region = pipeline.layout().model_inputs[roles.infer].clone();
        let before = pipeline.dram().region(&region).unwrap()[folded.clone()].to_vec();

        pipeline.step().unwrap();

        let after = &pipeline.dram().region(&region).unwrap()[folded.clone()];
        assert_eq!(before, after, "region {} changed at line {}", roles.infer, line);
    }
}

#[test]
fn missed_deadline_leaves_running_region_untouched() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(scores_for(STOP)))
        .with_source(Noise::new(7, 0.5))
        .stuck_compute();
    let (board, _) = build(board);
    let mut pipeline = SpeechPipeline::new(config, board.devices).unwrap();

    // line 0 starts a run on region 1 that never finishes
    for _ in 0..4 {
        pipeline.step().unwrap();
    }
    let running = pipeline.layout().model_inputs[1].clone();
    let before = pipeline.dram().region(&running).unwrap().to_vec();

    // line 4 would prepare region 1 again
    assert_eq!(pipeline.scheduler().roles(4).prepare, 1);
    let err = pipeline.step().unwrap_err();
    assert!(matches!(err, PipelineError::DeadlineViolation { line: 4, .. }));

    let after = pipeline.dram().region(&running).unwrap();
    let changed = before.iter().zip(after).filter(|(a, b)| a != b).count();
    assert_eq!(changed, 0);
}

#[test]
fn preparing_region_is_rebuilt_every_step() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(scores_for(STOP)))
        .with_source(Noise::new(3, 0.5));
    let (board, _) = build(board);
    let mut pipeline = SpeechPipeline::new(config, board.devices).unwrap();

    // lines 4..7 prepare region 1
    for _ in 0..8 {
        pipeline.step().unwrap();
    }

    let geometry = pipeline.geometry().clone();
    let builder = WindowBuilder::new(&geometry);
    let region = &pipeline.layout().model_inputs[1];
    let mut rows_seen = Vec::new();

    for line in 4..8 {
        for placement in builder.placements(line) {
            let source = pipeline
                .spectrogram()
                .read(pipeline.dram(), placement.source_line)
                .unwrap();
            let address = region.address + placement.dest_row * geometry.model_input_line_size;
            let row = pipeline
                .dram()
                .read_i16s(address, geometry.model_input_width * geometry.array_size)
                .unwrap();

            for (j, vector) in row.chunks(geometry.array_size).enumerate() {
                assert_eq!(vector[0], source[geometry.frame_width - 1 - j]);
                assert!(vector[1..].iter().all(|&v| v == 0));
            }
            rows_seen.push(placement.dest_row);
        }
    }

    rows_seen.sort_unstable();
    assert_eq!(rows_seen, (0..geometry.model_input_height).collect::<Vec<_>>());
}

#[test]
fn band_energy_model_yields_normalized_scores() {
    let config = compact_config();
    let board = SimBoard::new(&config).with_source(Noise::new(5, 0.8));
    let (reports, _) = run(&config, board, 16);

    let results: Vec<_> = reports
        .unwrap()
        .into_iter()
        .filter_map(|r| r.classification)
        .collect();
    assert_eq!(results.len(), 4);
    for result in results {
        let sum: f64 = result.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(result.scores.iter().all(|&p| p >= 0.0));
        assert_eq!(result.scores[result.class_index], result.confidence);
    }
}

#[test]
fn ramp_lines_land_in_order() {
    let config = compact_config();
    let board = SimBoard::new(&config)
        .with_model(FixedScores(scores_for(STOP)))
        .with_source(Ramp::new(1.0 / 64.0, 1.0 / 64.0, config.pipeline.acq_packet_length));
    let (board, _) = build(board);
    let mut pipeline = SpeechPipeline::new(config, board.devices).unwrap();

    for n in 0..12usize {
        pipeline.step().unwrap();
        let line = pipeline.spectrogram().read(pipeline.dram(), n % 8).unwrap();
        // packets n-2 and n-1 (zeros before the first) summed at DC
        let expected = if n == 0 { 0 } else { (2 * n - 1) * 4 };
        assert_eq!(line[0] as usize, expected);
    }
}
