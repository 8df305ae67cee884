//! Integration tests for structural edits: wires, removal and mux resizing.

use std::collections::HashSet;

use cb_core::{IdPolicy, PortId};
use cb_diagram::{
    BlockKind, Diagram, DiagramConfig, DiagramError, NoVariables, PortDirection, Position, Signal,
};

fn output(d: &Diagram, block: cb_core::BlockId, index: usize) -> PortId {
    d.block(block).unwrap().output_port_id(index).unwrap()
}

fn input(d: &Diagram, block: cb_core::BlockId, index: usize) -> PortId {
    d.block(block).unwrap().input_port_id(index).unwrap()
}

#[test]
fn second_upstream_is_refused() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let b = d.add_block_kind(BlockKind::constant(2.0)).unwrap();
    let g = d.add_block("GainBlock").unwrap();

    d.add_wire(output(&d, a, 0), input(&d, g, 0)).unwrap();
    let err = d.add_wire(output(&d, b, 0), input(&d, g, 0)).unwrap_err();

    assert!(matches!(err, DiagramError::InvalidConnection { .. }));
    assert_eq!(d.wires().len(), 1);
    let port = d.port(input(&d, g, 0)).unwrap();
    assert_eq!(port.upstream(), Some(output(&d, a, 0)));
    assert!(d.port(output(&d, b, 0)).unwrap().downstream().is_empty());
}

#[test]
fn same_direction_is_refused_without_side_effects() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let b = d.add_block_kind(BlockKind::constant(2.0)).unwrap();
    let s = d.add_block("SumBlock").unwrap();

    let outs = d.add_wire(output(&d, a, 0), output(&d, b, 0));
    let ins = d.add_wire(input(&d, s, 0), input(&d, s, 1));

    assert!(matches!(outs, Err(DiagramError::InvalidConnection { .. })));
    assert!(matches!(ins, Err(DiagramError::InvalidConnection { .. })));
    assert!(d.wires().is_empty());
    assert!(d.ports().iter().all(|p| !p.is_connected()));
}

#[test]
fn wire_endpoints_are_canonical() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let g = d.add_block("GainBlock").unwrap();

    let id = d.add_wire(input(&d, g, 0), output(&d, a, 0)).unwrap();
    let wire = d.wire(id).unwrap();
    assert_eq!(d.port(wire.from).unwrap().direction(), PortDirection::Output);
    assert_eq!(d.port(wire.to).unwrap().direction(), PortDirection::Input);
}

#[test]
fn unknown_port_is_not_found() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let missing = PortId::from_raw(999);
    let err = d.add_wire(output(&d, a, 0), missing).unwrap_err();
    assert!(matches!(err, DiagramError::NotFound { .. }));
}

#[test]
fn port_index_out_of_range() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let err = d.block(a).unwrap().input_port_id(0).unwrap_err();
    assert_eq!(
        err,
        DiagramError::PortIndex {
            block: a,
            index: 0,
            len: 0
        }
    );
}

#[test]
fn one_output_fans_out() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let g1 = d.add_block("GainBlock").unwrap();
    let g2 = d.add_block("GainBlock").unwrap();
    d.add_wire(output(&d, a, 0), input(&d, g1, 0)).unwrap();
    d.add_wire(output(&d, a, 0), input(&d, g2, 0)).unwrap();

    let port = d.port(output(&d, a, 0)).unwrap();
    assert_eq!(port.downstream(), &[input(&d, g1, 0), input(&d, g2, 0)]);
}

#[test]
fn remove_wire_severs_both_sides() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let g = d.add_block("GainBlock").unwrap();
    let id = d.add_wire(output(&d, a, 0), input(&d, g, 0)).unwrap();

    d.remove_wire(id).unwrap();

    assert!(d.wires().is_empty());
    assert!(!d.port(output(&d, a, 0)).unwrap().is_connected());
    assert!(!d.port(input(&d, g, 0)).unwrap().is_connected());
    assert!(matches!(
        d.remove_wire(id),
        Err(DiagramError::NotFound { .. })
    ));

    // The input is free again.
    d.add_wire(output(&d, a, 0), input(&d, g, 0)).unwrap();
}

#[test]
fn remove_block_disconnects_neighbours() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let g = d.add_block("GainBlock").unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    let a_out = output(&d, a, 0);
    let g_in = input(&d, g, 0);
    let g_out = output(&d, g, 0);
    let disp_in = input(&d, disp, 0);
    d.add_wire(a_out, g_in).unwrap();
    d.add_wire(g_out, disp_in).unwrap();

    d.remove_block(g).unwrap();

    assert!(d.block(g).is_none());
    assert!(d.port(g_in).is_none());
    assert!(d.port(g_out).is_none());
    assert!(d.wires().is_empty());
    assert!(d.port(a_out).unwrap().downstream().is_empty());
    assert_eq!(d.port(disp_in).unwrap().upstream(), None);
}

#[test]
fn freed_ids_are_not_reused_by_default() {
    let mut d = Diagram::new();
    let a = d.add_block("GainBlock").unwrap();
    let dead: HashSet<_> = d.block(a).unwrap().port_ids().chain([a]).collect();
    d.remove_block(a).unwrap();

    let b = d.add_block("GainBlock").unwrap();
    let fresh: HashSet<_> = d.block(b).unwrap().port_ids().chain([b]).collect();
    assert!(dead.is_disjoint(&fresh));
}

#[test]
fn recycling_policy_reuses_freed_ids() {
    let mut d = Diagram::with_config(DiagramConfig {
        ids: IdPolicy { recycle: true },
        ..DiagramConfig::default()
    });
    let a = d.add_block("ConstantBlock").unwrap();
    d.remove_block(a).unwrap();
    let b = d.add_block("ConstantBlock").unwrap();
    assert_eq!(a, b);
}

#[test]
fn mux_grows_with_fresh_unconnected_inputs() {
    let mut d = Diagram::new();
    let mux = d.add_block("MuxBlock").unwrap();
    let before: HashSet<PortId> = d.ports().iter().map(|p| p.id()).collect();

    d.set_mux_inputs(mux, 5).unwrap();

    let block = d.block(mux).unwrap();
    assert_eq!(block.num_input_ports(), 5);
    for &id in &block.inputs()[2..] {
        assert!(!before.contains(&id));
        let port = d.port(id).unwrap();
        assert!(port.is_optional());
        assert!(!port.is_connected());
        assert_eq!(port.parent(), mux);
    }
    assert_eq!(d.port(block.inputs()[4]).unwrap().name(), "in5");
}

#[test]
fn mux_shrinks_from_the_end() {
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let mux = d.add_block("MuxBlock").unwrap();
    d.set_mux_inputs(mux, 4).unwrap();
    let kept = input(&d, mux, 0);
    let dropped = input(&d, mux, 3);
    d.add_wire(output(&d, c, 0), kept).unwrap();
    d.add_wire(output(&d, c, 0), dropped).unwrap();

    d.set_mux_inputs(mux, 2).unwrap();

    assert_eq!(d.block(mux).unwrap().num_input_ports(), 2);
    assert!(d.port(dropped).is_none());
    assert_eq!(d.wires().len(), 1);
    assert_eq!(d.port(output(&d, c, 0)).unwrap().downstream(), &[kept]);
    assert!(d.set_mux_inputs(mux, 0).is_err());
}

#[test]
fn structural_edits_are_refused_while_running() {
    let mut d = Diagram::new();
    let a = d.add_block_kind(BlockKind::constant(1.0)).unwrap();
    let g = d.add_block("GainBlock").unwrap();
    let mux = d.add_block("MuxBlock").unwrap();
    d.start(&NoVariables).unwrap();

    let refused = |r: Result<(), DiagramError>| matches!(r, Err(DiagramError::InvalidState { .. }));
    assert!(refused(d.add_block("SumBlock").map(|_| ())));
    assert!(refused(d.remove_block(a)));
    assert!(refused(
        d.add_wire(output(&d, a, 0), input(&d, g, 0)).map(|_| ())
    ));
    assert!(refused(d.set_mux_inputs(mux, 3)));
    assert!(refused(d.set_gain(g, 4.0)));

    // Metadata stays editable.
    d.set_block_name(g, "amplifier").unwrap();
    d.set_block_position(g, Position::new(10.0, 20.0)).unwrap();
    assert_eq!(d.block(g).unwrap().name(), "amplifier");

    d.pause();
    d.set_gain(g, 4.0).unwrap();
    d.add_wire(output(&d, a, 0), input(&d, g, 0)).unwrap();
}

#[test]
fn removed_wire_stops_feeding_the_old_value() {
    // Constant(3) -> Gain(2) -> Display
    let mut d = Diagram::new();
    let c = d.add_block_kind(BlockKind::constant(3.0)).unwrap();
    let g = d.add_block_kind(BlockKind::gain(2.0)).unwrap();
    let disp = d.add_block("DisplayBlock").unwrap();
    let source = d.add_wire(output(&d, c, 0), input(&d, g, 0)).unwrap();
    d.add_wire(output(&d, g, 0), input(&d, disp, 0)).unwrap();

    d.start(&NoVariables).unwrap();
    d.step().unwrap();
    assert_eq!(d.display_value(disp).unwrap(), &Signal::from_vec(vec![6.0]));

    d.pause();
    d.remove_wire(source).unwrap();
    assert!(d.port(input(&d, g, 0)).unwrap().peek_value().is_empty());
    d.start(&NoVariables).unwrap();
    d.step().unwrap();

    // The gain now sees the empty default of an unconnected input.
    assert!(d.display_value(disp).unwrap().is_empty());
}
