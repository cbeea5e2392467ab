mod support;

use std::time::Duration;

use cycler_core::experiment::{Experiment, ExperimentError, Progress};
use cycler_core::operation::{CompletionReason, CompletionVerdict, OperationRequest};
use cycler_core::sequences::{
    Phase, ProtocolKind, PseudoOcvParams, Step, StepProgram, pseudo_ocv_program,
};
use cycler_core::telemetry::{FrameError, OperatingMode};

use support::{Bench, BenchFault, MockInstant, issued, run_to_finish};

fn rest_then_finish(seconds: u64) -> StepProgram {
    let mut program = StepProgram::new(ProtocolKind::PseudoOcv);
    program
        .push(Step::issue(
            Phase::Resting,
            OperationRequest::rest(Duration::from_secs(seconds)),
        ))
        .expect("push rest");
    program.push(Step::finish()).expect("push finish");
    program
}

fn discharge_then_finish() -> StepProgram {
    let mut program = StepProgram::new(ProtocolKind::StaticCapacity);
    program
        .push(Step::issue(
            Phase::Discharging,
            OperationRequest::regulated(-0.5, Duration::from_secs(3)),
        ))
        .expect("push discharge");
    program.push(Step::finish()).expect("push finish");
    program
}

#[test]
fn nothing_is_sent_before_the_first_sample() {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let mut experiment: Experiment<Bench, MockInstant> =
        Experiment::new(bench.clone(), rest_then_finish(5)).expect("experiment");
    assert!(bench.commands().is_empty());

    let progress = experiment.advance(&clock).expect("advance");
    assert_eq!(progress.step(), 0);
    assert_eq!(bench.commands().len(), 1);
    assert_eq!(experiment.session().last_line(), "0,1000,3.7000,0.0000");
}

#[test]
fn malformed_lines_are_skipped_without_side_effects() {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let mut experiment = Experiment::new(bench.clone(), rest_then_finish(5)).expect("experiment");
    experiment.advance(&clock).expect("first sample");

    bench.configure(|state| {
        state.injected.push_back("0,12,3.7\r\n".to_owned());
        state.injected.push_back("9,12,3.7,0.0\r\n".to_owned());
    });

    let first = experiment.advance(&clock).expect("skip");
    assert_eq!(
        first,
        Progress::Skipped {
            step: 0,
            error: FrameError::FieldCount(3)
        }
    );
    assert_eq!(experiment.session().last_line(), "0,12,3.7");

    let second = experiment.advance(&clock).expect("skip");
    assert_eq!(
        second,
        Progress::Skipped {
            step: 0,
            error: FrameError::UnknownMode(9)
        }
    );

    assert_eq!(bench.commands().len(), 1);
    assert_eq!(experiment.sequencer().cursor(), 0);

    let history = run_to_finish(&mut experiment, &clock, 100);
    assert_eq!(issued(&history).len(), 1);
    assert_eq!(bench.commands().len(), 2);
}

#[test]
fn channel_fault_attempts_idle_once_and_surfaces() {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let mut experiment =
        Experiment::new(bench.clone(), discharge_then_finish()).expect("experiment");
    experiment.advance(&clock).expect("first sample");
    assert_eq!(
        bench.commands()[0].mode,
        OperatingMode::RegulatedCurrent
    );

    bench.configure(|state| state.fail_reads_after = Some(state.samples));
    let err = experiment.advance(&clock).expect_err("channel fault");
    assert_eq!(err, ExperimentError::ChannelFault(BenchFault));

    let commands = bench.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1].mode, OperatingMode::Idle);
    assert!(experiment.session().is_closed());

    drop(experiment);
    assert_eq!(bench.commands().len(), 2, "drop must not retry idle");
}

#[test]
fn write_fault_during_issue_is_a_channel_fault() {
    let bench = Bench::new(3.7);
    bench.configure(|state| state.fail_writes = true);
    let clock = bench.clock();
    let mut experiment = Experiment::new(bench.clone(), rest_then_finish(5)).expect("experiment");

    let err = experiment.advance(&clock).expect_err("write fault");
    assert_eq!(err, ExperimentError::ChannelFault(BenchFault));
    assert!(bench.commands().is_empty());
}

#[test]
fn operator_abort_commands_idle() {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let mut experiment =
        Experiment::new(bench.clone(), discharge_then_finish()).expect("experiment");
    experiment.advance(&clock).expect("first sample");
    experiment.advance(&clock).expect("second sample");

    experiment.abort().expect("abort");
    let commands = bench.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1].mode, OperatingMode::Idle);
    assert_eq!(experiment.advance(&clock), Err(ExperimentError::Closed));
}

#[test]
fn lagging_mode_switch_holds_the_step() {
    let bench = Bench::new(3.7);
    bench.configure(|state| state.mode_lag = 5);
    let clock = bench.clock();
    let mut experiment =
        Experiment::new(bench.clone(), discharge_then_finish()).expect("experiment");
    experiment.advance(&clock).expect("first sample");

    // The deadline passes while the instrument still reports idle.
    for _ in 0..5 {
        let Progress::Sample(outcome) = experiment.advance(&clock).expect("sample") else {
            panic!("unexpected skip");
        };
        assert_eq!(outcome.verdict, Some(CompletionVerdict::mode_mismatch()));
        assert!(outcome.issued.is_none());
    }

    let Progress::Sample(outcome) = experiment.advance(&clock).expect("sample") else {
        panic!("unexpected skip");
    };
    assert_eq!(
        outcome.verdict,
        Some(CompletionVerdict::terminal(CompletionReason::TimedOut))
    );
    assert!(outcome.finished);
}

#[test]
fn pseudo_ocv_sweeps_down_then_up() {
    let bench = Bench::new(3.7);
    bench.configure(|state| state.gain = 0.05);
    let clock = bench.clock();
    let program = pseudo_ocv_program(&PseudoOcvParams::default()).expect("program");
    let mut experiment = Experiment::new(bench.clone(), program).expect("experiment");

    let history = run_to_finish(&mut experiment, &clock, 200_000);
    let phases: Vec<Phase> = issued(&history).iter().map(|op| op.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Charging,
            Phase::Resting,
            Phase::Discharging,
            Phase::SweepCharge,
            Phase::Finished,
        ]
    );
    assert_eq!(bench.commands().len(), 5);
}

#[test]
fn log_step_is_cursor_at_arrival() {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let mut experiment = Experiment::new(bench.clone(), rest_then_finish(2)).expect("experiment");

    let history = run_to_finish(&mut experiment, &clock, 10);
    let steps: Vec<usize> = history.iter().map(Progress::step).collect();
    assert_eq!(steps, vec![0, 0, 0]);
    assert_eq!(experiment.sequencer().cursor(), 1);
}
