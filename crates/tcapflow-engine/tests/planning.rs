//! Compilation and planning of whole programs.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use tcapflow_adapters::tcap::parse_tcap;
use tcapflow_common::types::{SetIdentifier, Value};
use tcapflow_core::execution::FnLambda;
use tcapflow_core::execution::stages::StageKind;
use tcapflow_engine::computation::{
    AggregationComp, Computation, JoinComp, ScanUserSet, SelectionComp, WriteUserSet,
    computation_name,
};
use tcapflow_engine::physical::{JobStage, PipelineSink};
use tcapflow_engine::{
    Config, PhysicalPlanner, QueryGraphAnalyzer, Statistics, describe_pipeline,
};

fn identity() -> FnLambda {
    FnLambda::unary(|v: &Value| Ok(v.clone()))
}

fn left() -> FnLambda {
    FnLambda::binary(|l: &Value, _: &Value| Ok(l.clone()))
}

fn scan(set: &str) -> Arc<dyn Computation> {
    Arc::new(ScanUserSet::new("db", set))
}

fn join(l: Arc<dyn Computation>, r: Arc<dyn Computation>) -> Arc<dyn Computation> {
    Arc::new(JoinComp::new(l, r, identity(), identity(), left()))
}

/// `(a join b) join c`, labelled a=0, b=1, j=2, c=3, j=4, out=5.
fn three_way() -> String {
    let ab = join(scan("a"), scan("b"));
    let abc = join(ab, scan("c"));
    let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(abc, "db", "out"));
    QueryGraphAnalyzer::new(vec![out]).parse_tcap_string().unwrap()
}

#[test]
fn test_single_apply_pipeline() {
    let program = parse_tcap(
        "A(a) <= SCAN('input', 'db', 'ScanUserSet_0')
         B(a, b) <= APPLY(A(a), A(a), 'SelectionComp_1', 'f')
         OUT() <= OUTPUT(B(b), 'output', 'db', 'Output_2')",
    )
    .unwrap();
    assert_eq!(program.len(), 3);
    assert_eq!(program.consumers("A")[0].output_name(), "B");
    assert_eq!(program.consumers("B")[0].output_name(), "OUT");

    let shape = describe_pipeline(&program, &["A", "B"], "Output_2").unwrap();
    assert_eq!(shape.source, "Scan A");
    assert_eq!(shape.stages, vec![StageKind::Apply]);
    assert_eq!(shape.sink, "Output OUT");
    assert!(!shape.right_side);
}

#[test]
fn test_three_way_broadcast_builds_before_probe() {
    let program = parse_tcap(&three_way()).unwrap();
    let stats = Statistics::new()
        .with_set(SetIdentifier::new("db", "a"), 1 << 30, 1024)
        .with_set(SetIdentifier::new("db", "b"), 1024, 1)
        .with_set(SetIdentifier::new("db", "c"), 2048, 2);
    let config = Config::default()
        .with_num_partitions(4)
        .with_broadcast_join_threshold(1 << 20);
    let plan = PhysicalPlanner::new(&config)
        .plan(&program, &stats, "job")
        .unwrap();

    let kinds: Vec<&str> = plan.stages.iter().map(JobStage::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "TupleSetJobStage",
            "BroadcastJoinBuildHtJobStage",
            "TupleSetJobStage",
            "BroadcastJoinBuildHtJobStage",
            "TupleSetJobStage",
        ]
    );
    assert_eq!(plan.stages.iter().filter(|s| s.is_join_build()).count(), 2);

    let Some(JobStage::TupleSet(probe)) = plan.stages.last() else {
        panic!("expected a final tuple-set stage");
    };
    assert_eq!(probe.path[0], "inputDataForScanUserSet_0");
    assert_eq!(probe.target_computation, "Output_5");
    assert!(matches!(probe.sink, PipelineSink::Set { .. }));
    let probed: Vec<&str> = probe.probes.iter().map(|p| p.hash_set.as_str()).collect();
    assert_eq!(probed, vec!["JoinComp_2_joined", "JoinComp_4_joined"]);

    assert_eq!(probe.path.len(), 17);

    let shape = describe_pipeline(&program, &probe.path, "Output_5").unwrap();
    assert_eq!(shape.source, "Scan inputDataForScanUserSet_0");
    assert_eq!(shape.stages.len(), probe.path.len() - 1);
    assert_eq!(
        shape.stages.iter().filter(|k| **k == StageKind::Join).count(),
        2
    );
}

#[test]
fn test_three_way_partitioned_repartitions_probe_side() {
    let program = parse_tcap(&three_way()).unwrap();
    let stats = Statistics::new()
        .with_set(SetIdentifier::new("db", "a"), 3000, 3)
        .with_set(SetIdentifier::new("db", "b"), 1000, 1)
        .with_set(SetIdentifier::new("db", "c"), 2000, 2);
    let config = Config::default()
        .with_num_partitions(2)
        .with_broadcast_join_threshold(0);
    let plan = PhysicalPlanner::new(&config)
        .plan(&program, &stats, "job")
        .unwrap();

    let kinds: Vec<&str> = plan.stages.iter().map(JobStage::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "TupleSetJobStage",
            "HashPartitionedJoinBuildHtJobStage",
            "TupleSetJobStage",
            "HashPartitionedJoinBuildHtJobStage",
            "TupleSetJobStage",
            "TupleSetJobStage",
            "TupleSetJobStage",
        ]
    );
    assert!(
        plan.intermediate_sets
            .iter()
            .any(|s| s.set == "JoinComp_2_lhashed_repartitionData")
    );
}

#[test]
fn test_build_pipeline_is_deterministic() {
    let keep = FnLambda::unary(|v: &Value| Ok(Value::Bool(v.as_int64().unwrap_or(0) > 2)));
    let selection: Arc<dyn Computation> =
        Arc::new(SelectionComp::new(scan("in"), keep, identity()));
    let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(selection, "db", "out"));
    let plan = tcapflow_engine::ComputePlan::from_sinks(vec![out]).unwrap();
    let path = [
        "inputDataForScanUserSet_0",
        "SelectionComp_1_withSel",
        "SelectionComp_1_filtered",
        "SelectionComp_1_out",
    ];

    let build = || {
        let ctx = tcapflow_common::memory::RuntimeContext::new(1 << 20, 4096);
        plan.build_pipeline(
            &path[..],
            "Output_2",
            Box::new(move || ctx.allocate_block()),
            Box::new(|_| {}),
            Box::new(|_| Ok(())),
            Default::default(),
        )
    };
    // No pages were given, so building the source fails the same way twice.
    let first = build().err().map(|e| e.to_string());
    assert!(first.is_some());
    assert_eq!(first, build().err().map(|e| e.to_string()));

    let logical = plan.get_plan().unwrap();
    let first = describe_pipeline(logical.computations(), &path, "Output_2").unwrap();
    let second = describe_pipeline(logical.computations(), &path, "Output_2").unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.stages,
        vec![StageKind::Apply, StageKind::Filter, StageKind::Apply]
    );
}

#[test]
fn test_aggregate_with_downstream_selection_is_materialized() {
    let agg: Arc<dyn Computation> = Arc::new(AggregationComp::new(
        scan("in"),
        identity(),
        identity(),
        |a: &Value, _: &Value| Ok(a.clone()),
        |k: &Value, _: &Value| Ok(k.clone()),
    ));
    let keep = FnLambda::unary(|_: &Value| Ok(Value::Bool(true)));
    let selection: Arc<dyn Computation> = Arc::new(SelectionComp::new(agg, keep, identity()));
    let out: Arc<dyn Computation> = Arc::new(WriteUserSet::new(selection, "db", "out"));
    let tcap = QueryGraphAnalyzer::new(vec![out]).parse_tcap_string().unwrap();
    let program = parse_tcap(&tcap).unwrap();

    let plan = PhysicalPlanner::new(&Config::default().with_num_partitions(3))
        .plan(&program, &Statistics::new(), "job")
        .unwrap();
    let kinds: Vec<&str> = plan.stages.iter().map(JobStage::kind).collect();
    assert_eq!(
        kinds,
        vec!["TupleSetJobStage", "AggregationJobStage", "TupleSetJobStage"]
    );
    let JobStage::TupleSet(downstream) = &plan.stages[2] else {
        panic!("expected a tuple-set stage");
    };
    assert_eq!(downstream.path[0], "AggregationComp_1_out");
    assert_eq!(downstream.path.len(), 4);
}

/// One step of a generated computation graph.
#[derive(Debug, Clone)]
enum Step {
    Select(prop::sample::Index),
    Join(prop::sample::Index, prop::sample::Index),
    Aggregate(prop::sample::Index),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<prop::sample::Index>().prop_map(Step::Select),
        (any::<prop::sample::Index>(), any::<prop::sample::Index>())
            .prop_map(|(l, r)| Step::Join(l, r)),
        any::<prop::sample::Index>().prop_map(Step::Aggregate),
    ]
}

/// Builds a graph and returns its sinks.
fn build_graph(scans: usize, steps: &[Step]) -> Vec<Arc<dyn Computation>> {
    let mut nodes: Vec<Arc<dyn Computation>> =
        (0..scans).map(|i| scan(&format!("s{i}"))).collect();
    let mut consumed = vec![false; nodes.len()];
    for step in steps {
        let node: Arc<dyn Computation> = match step {
            Step::Select(i) => {
                let i = i.index(nodes.len());
                consumed[i] = true;
                Arc::new(SelectionComp::new(
                    Arc::clone(&nodes[i]),
                    FnLambda::unary(|_: &Value| Ok(Value::Bool(true))),
                    identity(),
                ))
            }
            Step::Join(l, r) => {
                let (l, r) = (l.index(nodes.len()), r.index(nodes.len()));
                if l == r {
                    continue;
                }
                consumed[l] = true;
                consumed[r] = true;
                join(Arc::clone(&nodes[l]), Arc::clone(&nodes[r]))
            }
            Step::Aggregate(i) => {
                let i = i.index(nodes.len());
                consumed[i] = true;
                Arc::new(AggregationComp::new(
                    Arc::clone(&nodes[i]),
                    identity(),
                    identity(),
                    |a: &Value, _: &Value| Ok(a.clone()),
                    |k: &Value, _: &Value| Ok(k.clone()),
                ))
            }
        };
        nodes.push(node);
        consumed.push(false);
    }
    nodes
        .iter()
        .zip(&consumed)
        .enumerate()
        .filter(|(_, (_, used))| !**used)
        .map(|(i, (node, _))| {
            Arc::new(WriteUserSet::new(Arc::clone(node), "db", format!("out{i}")))
                as Arc<dyn Computation>
        })
        .collect()
}

proptest! {
    #[test]
    fn test_tcap_round_trip_mirrors_graph(
        scans in 1_usize..4,
        steps in prop::collection::vec(step(), 0..8),
    ) {
        let sinks = build_graph(scans, &steps);
        let graph = QueryGraphAnalyzer::new(sinks).analyze().unwrap();
        let program = parse_tcap(&graph.tcap).unwrap();

        let names: Vec<String> = graph
            .computations
            .iter()
            .enumerate()
            .map(|(i, c)| computation_name(c.as_ref(), i))
            .collect();
        prop_assert_eq!(program.computation_names(), names.iter().map(String::as_str).collect::<Vec<_>>());

        let mut expected = BTreeSet::new();
        for (i, node) in graph.computations.iter().enumerate() {
            for input in node.inputs() {
                let j = graph
                    .computations
                    .iter()
                    .position(|c| Arc::ptr_eq(c, input))
                    .unwrap();
                expected.insert((names[j].clone(), names[i].clone()));
            }
        }

        let mut actual = BTreeSet::new();
        for statement in program.iter() {
            for input in statement.input_names() {
                let producer = &program.require_producer(input).unwrap().computation_name;
                if producer != &statement.computation_name {
                    actual.insert((producer.clone(), statement.computation_name.clone()));
                }
            }
        }
        prop_assert_eq!(actual, expected);
    }
}
