//! Integration tests for the per-tick scheduler.

use cb_core::{BlockId, WireId};
use cb_diagram::{
    BlockKind, Diagram, IntegratorType, NoVariables, SimOptions, SimState, Signal,
};
use proptest::prelude::*;

fn connect(d: &mut Diagram, from: BlockId, out: usize, to: BlockId, input: usize) -> WireId {
    let a = d.block(from).unwrap().output_port_id(out).unwrap();
    let b = d.block(to).unwrap().input_port_id(input).unwrap();
    d.add_wire(a, b).unwrap()
}

fn is_ready(d: &Diagram, id: BlockId) -> bool {
    d.block(id).unwrap().is_ready(d.ports())
}

#[test]
fn constant_gain_display_chain() {
    // Constant(3) -> Gain(2) -> Display
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(3.0)).unwrap();
    let g = d.add_block_kind(BlockKind::gain(2.0)).unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    connect(&mut d, c, 0, g, 0);
    connect(&mut d, g, 0, disp, 0);

    d.start(&NoVariables).unwrap();
    let report = d.step().unwrap().unwrap();

    assert_eq!(report.executed, vec![c, g, disp]);
    assert!(report.is_complete());
    assert_eq!(d.display_value(disp).unwrap(), &Signal::from_vec(vec![6.0]));

    // Inputs were consumed; only the source stays ready.
    assert!(is_ready(&d, c));
    assert!(!is_ready(&d, g));
    assert!(!is_ready(&d, disp));
}

#[test]
fn registration_order_does_not_matter() {
    // Constant(3) -> Sum -> Display, registered sink first.
    let mut d = Diagram::new();
    let disp = d.add_block("DisplayBlock").unwrap();
    let sum = d.add_block("SumBlock").unwrap();
    let c = d.add_block_kind(BlockKind::constant(3.0)).unwrap();
    connect(&mut d, c, 0, sum, 0);
    connect(&mut d, sum, 0, disp, 0);

    d.start(&NoVariables).unwrap();
    let report = d.compute(0.0).unwrap();

    assert_eq!(report.executed, vec![c, sum, disp]);
    assert_eq!(d.display_value(disp).unwrap()[0], 3.0);
}

#[test]
fn sum_pads_shorter_input() {
    // Mux(1, 2) + Constant(5) -> [6, 2]
    let mut d = Diagram::new();
    let one = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let two = d.add_block_kind(BlockKind::constant(2.0)).unwrap();
    let five = d.add_block_kind(BlockKind::constant(5.0)).unwrap();
    let mux = d.add_block("MuxBlock").unwrap();
    let sum = d.add_block("SumBlock").unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    connect(&mut d, one, 0, mux, 0);
    connect(&mut d, two, 0, mux, 1);
    connect(&mut d, mux, 0, sum, 0);
    connect(&mut d, five, 0, sum, 1);
    connect(&mut d, sum, 0, disp, 0);

    d.start(&NoVariables).unwrap();
    d.step().unwrap();

    assert_eq!(
        d.display_value(disp).unwrap(),
        &Signal::from_vec(vec![6.0, 2.0])
    );
}

#[test]
fn unconnected_optional_inputs_do_not_block() {
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(4.0)).unwrap();
    let mux = d.add_block("MuxBlock").unwrap();
    d.set_mux_inputs(mux, 3).unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    connect(&mut d, c, 0, mux, 1);
    connect(&mut d, mux, 0, disp, 0);

    d.start(&NoVariables).unwrap();
    let report = d.step().unwrap().unwrap();

    assert!(report.is_complete());
    assert_eq!(d.display_value(disp).unwrap(), &Signal::from_vec(vec![4.0]));
}

#[test]
fn unconnected_display_is_reported_stalled() {
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();

    d.start(&NoVariables).unwrap();
    let report = d.step().unwrap().unwrap();

    assert_eq!(report.executed, vec![c]);
    assert_eq!(report.stalled, vec![disp]);
    assert_eq!(d.last_pass(), &report);
    // Not an error: the simulation keeps running.
    assert_eq!(d.sim_state(), SimState::Running);
}

#[test]
fn gain_initial_condition_seeds_a_loop() {
    // Gain(0.5) feeds itself through a Sum with Constant(1):
    // y[k+1] = 0.5 * (1 + y[k]), y[0] = 3
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let sum = d.add_block("SumBlock").unwrap();
    let g = d.add_block_kind(BlockKind::gain(0.5)).unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    connect(&mut d, c, 0, sum, 0);
    connect(&mut d, g, 0, sum, 1);
    connect(&mut d, sum, 0, g, 0);
    connect(&mut d, g, 0, disp, 0);
    d.set_gain_initial(g, Signal::from_vec(vec![3.0])).unwrap();

    d.set_options(SimOptions {
        dt: 1.0,
        t_end: 3.0,
        integrator: IntegratorType::ForwardEuler,
    })
    .unwrap();
    d.start(&NoVariables).unwrap();

    let mut seen = Vec::new();
    while let Some(report) = d.step().unwrap() {
        assert!(report.is_complete());
        seen.push(d.display_value(disp).unwrap()[0]);
    }
    assert_eq!(seen, vec![2.0, 1.5, 1.25]);
    assert_eq!(d.sim_state(), SimState::Stopped);
}

#[test]
fn paused_diagram_does_not_tick() {
    let mut d = Diagram::new();
    d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    d.start(&NoVariables).unwrap();
    d.step().unwrap();
    let t = d.time();

    d.pause();
    assert_eq!(d.step().unwrap(), None);
    assert_eq!(d.time(), t);

    // Resume keeps the clock.
    d.start(&NoVariables).unwrap();
    d.step().unwrap();
    assert!(d.time() > t);

    // Stop then start reinitializes.
    d.stop();
    d.start(&NoVariables).unwrap();
    assert_eq!(d.time(), 0.0);
}

#[test]
fn run_reaches_stop_time() {
    let mut d = Diagram::new();
    d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let ticks = d.run(&NoVariables).unwrap();
    assert_eq!(ticks, 100);
    assert_eq!(d.sim_state(), SimState::Stopped);
}

/// Random DAG: node 0 is a constant, every other node is a Sum whose first
/// input comes from an earlier node and whose second input optionally does.
fn dag() -> impl Strategy<Value = (Vec<usize>, Vec<(usize, Option<usize>)>)> {
    (2usize..12).prop_flat_map(|n| {
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        let links = prop::collection::vec((0usize..1000, prop::option::of(0usize..1000)), n);
        (order, links)
    })
}

proptest! {
    #[test]
    fn every_block_of_an_acyclic_graph_runs_once((order, links) in dag()) {
        let n = order.len();
        let mut d = Diagram::new();
        let mut ids = vec![None; n];
        for &node in &order {
            let kind = if node == 0 { BlockKind::constant(1.0) } else { BlockKind::Sum };
            ids[node] = Some(d.add_block_kind(kind).unwrap());
        }
        let ids: Vec<BlockId> = ids.into_iter().map(Option::unwrap).collect();

        for node in 1..n {
            let (first, second) = links[node];
            connect(&mut d, ids[first % node], 0, ids[node], 0);
            if let Some(second) = second {
                connect(&mut d, ids[second % node], 0, ids[node], 1);
            }
        }

        d.start(&NoVariables).unwrap();
        let report = d.compute(0.0).unwrap();

        prop_assert!(report.stalled.is_empty());
        let mut executed = report.executed.clone();
        executed.sort();
        let mut expected = ids.clone();
        expected.sort();
        prop_assert_eq!(executed, expected);

        // Upstream blocks always run before the blocks they feed.
        let position = |id: BlockId| report.executed.iter().position(|&e| e == id).unwrap();
        for node in 1..n {
            let (first, _) = links[node];
            prop_assert!(position(ids[first % node]) < position(ids[node]));
        }
    }
}
