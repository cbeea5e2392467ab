mod support;

use cycler_core::experiment::{Experiment, Progress};
use cycler_core::operation::{CompletionReason, OperationKind};
use cycler_core::sequences::hppc::{CYCLES, PULSE_WINDOW, SUB_CYCLE_OPERATIONS};
use cycler_core::sequences::{HppcParams, Phase, hppc_program};
use cycler_core::telemetry::OperatingMode;

use support::{Bench, issued, run_to_finish, settled_reasons};

const SAMPLE_LIMIT: usize = 120_000;

fn run_default() -> (Bench, Vec<Progress<support::MockInstant>>, u16) {
    let bench = Bench::new(3.7);
    let clock = bench.clock();
    let program = hppc_program(&HppcParams::default()).expect("program");
    let mut experiment = Experiment::new(bench.clone(), program).expect("experiment");
    let history = run_to_finish(&mut experiment, &clock, SAMPLE_LIMIT);
    let cycles = experiment.sequencer().variables().counter(CYCLES);
    (bench, history, cycles)
}

#[test]
fn hppc_issues_sixty_pulse_operations_before_final_charge() {
    let (bench, history, cycles) = run_default();
    let ops = issued(&history);

    assert_eq!(cycles, 10);
    assert_eq!(ops.len(), 2 + 10 * SUB_CYCLE_OPERATIONS + 2);
    assert_eq!(bench.commands().len(), ops.len());

    let final_charge = ops
        .iter()
        .position(|op| op.phase == Phase::FinalCharge)
        .expect("final charge issued");
    let after_rest = 2;
    assert_eq!(final_charge - after_rest, 60);

    let expected_cycle = [
        Phase::PulseDischarge,
        Phase::PulseRest,
        Phase::PulseCharge,
        Phase::PulseRest,
        Phase::StepDischarge,
        Phase::StepRest,
    ];
    for (index, chunk) in ops[after_rest..final_charge]
        .chunks(SUB_CYCLE_OPERATIONS)
        .enumerate()
    {
        let phases: Vec<Phase> = chunk.iter().map(|op| op.phase).collect();
        assert_eq!(phases, expected_cycle, "sub-cycle {index} out of order");
    }

    assert_eq!(ops[final_charge + 1].phase, Phase::Finished);
    assert_eq!(
        bench.commands().last().map(|c| c.mode),
        Some(OperatingMode::Idle)
    );
}

#[test]
fn cursor_advances_once_per_terminal_verdict() {
    let (_bench, history, _) = run_default();

    let mut terminal = 0;
    let mut previous_step = 0;
    for (index, progress) in history.iter().enumerate() {
        let Progress::Sample(outcome) = progress else {
            panic!("bench never emits malformed lines");
        };
        let settled = outcome.verdict.is_some_and(|verdict| verdict.complete);

        if index == 0 {
            assert!(outcome.issued.is_some(), "first sample issues step 0");
            continue;
        }
        assert_eq!(
            settled,
            outcome.issued.is_some(),
            "only a terminal verdict may issue, sample {index}"
        );
        assert_eq!(outcome.step, previous_step, "cursor moved without a verdict");
        if let Some(op) = outcome.issued {
            terminal += 1;
            previous_step = op.step;
        }
    }

    assert_eq!(terminal + 1, issued(&history).len());
}

#[test]
fn pulses_and_steps_end_on_their_timers() {
    let (_bench, history, _) = run_default();
    let ops = issued(&history);
    let reasons = settled_reasons(&history);

    assert_eq!(reasons[0], CompletionReason::CutoffCurrentReached);
    assert!(
        reasons[1..].iter().all(|reason| *reason == CompletionReason::TimedOut
            || *reason == CompletionReason::CutoffCurrentReached),
        "unexpected voltage excursion: {reasons:?}"
    );

    let pulse = ops[2].spec;
    assert_eq!(pulse.kind, OperationKind::CurrentPulse { current: -3.0 });
    assert_eq!(pulse.limits, PULSE_WINDOW);
    assert_eq!(
        pulse.deadline.value() - pulse.issued_at.value(),
        10_000_000
    );

    // Pauses inherit the pulse window.
    assert_eq!(ops[3].spec.limits, PULSE_WINDOW);
    assert_eq!(ops[3].spec.kind, OperationKind::Idle);
}
