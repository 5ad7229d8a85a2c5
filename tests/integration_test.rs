//! 集成測試

use indexmap::IndexMap;
use quibs::*;

fn numbers() -> Value {
    Value::from(vec![1.0, 2.0, 3.0])
}

#[test]
fn test_assign_on_source() {
    // 場景 1：直接指派到可覆寫的來源
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());

    graph.assign(a, Path::at(1), 10.0).unwrap();

    assert_eq!(graph.get_value(a).unwrap(), Value::from(vec![1.0, 10.0, 3.0]));
}

#[test]
fn test_assign_inverts_through_add() {
    // 場景 2：B = A + 5，對 B[0] 指派 12 反推到 A
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let b = graph.call("add", vec![a.into(), 5.0.into()]).unwrap();

    let outcome = graph.assign(b, Path::at(0), 12.0).unwrap();

    assert_eq!(outcome.targets(), &[(a, Path::at(0))]);
    assert_eq!(graph.get_value(a).unwrap(), Value::from(vec![7.0, 2.0, 3.0]));
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![12.0, 7.0, 8.0]));
}

#[test]
fn test_assign_into_literal_is_not_allowed() {
    // 場景 3：指派落在 concatenate 的字面值參數上
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let c = graph
        .call(
            "concatenate",
            vec![Arg::List(vec![a.into(), Value::from(vec![8.0, 9.0]).into()])],
        )
        .unwrap();
    assert_eq!(
        graph.get_value(c).unwrap(),
        Value::from(vec![1.0, 2.0, 3.0, 8.0, 9.0])
    );

    let result = graph.assign(c, Path::at(4), 99.0);

    assert!(matches!(result, Err(QuibError::OverrideNotAllowed(_))));
    assert!(graph.overrides(a).unwrap().is_empty());
    assert_eq!(graph.get_value(a).unwrap(), numbers());
}

#[test]
fn test_slice_invalidation() {
    // 場景 4：D = A[0:2]
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let d = graph.item(a, PathStep::range(0, 2)).unwrap();
    graph.get_value(d).unwrap();
    assert_eq!(graph.cache_status(d).unwrap(), Some(CacheStatus::AllValid));

    graph.invalidate(a, &Path::at(2)).unwrap();
    assert_eq!(graph.cache_status(d).unwrap(), Some(CacheStatus::AllValid));

    graph.invalidate(a, &Path::at(0)).unwrap();
    assert_eq!(graph.cache_status(d).unwrap(), Some(CacheStatus::Partial));
}

#[test]
fn test_override_source_propagates_through_slice() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let d = graph.item(a, PathStep::range(0, 2)).unwrap();
    assert_eq!(graph.get_value(d).unwrap(), Value::from(vec![1.0, 2.0]));

    // 不在切片內的編輯不觸發重算
    graph.assign(a, Path::at(2), 30.0).unwrap();
    assert_eq!(graph.get_value(d).unwrap(), Value::from(vec![1.0, 2.0]));
    assert_eq!(graph.evaluations(d).unwrap(), 1);

    graph.assign(a, Path::at(1), 20.0).unwrap();
    assert_eq!(graph.get_value(d).unwrap(), Value::from(vec![1.0, 20.0]));
    assert_eq!(graph.evaluations(d).unwrap(), 2);
}

#[test]
fn test_assign_through_slice_and_function_chain() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let b = graph.call("multiply", vec![a.into(), 10.0.into()]).unwrap();
    let d = graph.item(b, PathStep::range(1, 3)).unwrap();

    graph.assign(d, Path::at(1), 50.0).unwrap();

    assert_eq!(graph.get_value(a).unwrap(), Value::from(vec![1.0, 2.0, 5.0]));
    assert_eq!(graph.get_value(d).unwrap(), Value::from(vec![20.0, 50.0]));
}

#[test]
fn test_divergence_writes_every_branch() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let b = graph.source(Value::from(vec![4.0, 5.0]));
    let c = graph
        .call("concatenate", vec![Arg::List(vec![a.into(), b.into()])])
        .unwrap();

    let path = Path::new(vec![PathStep::range(2, 4)]);
    let outcome = graph.assign(c, path, Value::from(vec![30.0, 40.0])).unwrap();

    assert_eq!(outcome.targets().len(), 2);
    assert_eq!(graph.get_value(a).unwrap(), Value::from(vec![1.0, 2.0, 30.0]));
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![40.0, 5.0]));
    assert_eq!(
        graph.get_value(c).unwrap(),
        Value::from(vec![1.0, 2.0, 30.0, 40.0, 5.0])
    );
}

#[test]
fn test_divergence_is_all_or_nothing() {
    // 一個分支落在字面值上時，另一個分支也不能寫入
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let c = graph
        .call(
            "concatenate",
            vec![Arg::List(vec![a.into(), Value::from(vec![8.0, 9.0]).into()])],
        )
        .unwrap();

    let path = Path::new(vec![PathStep::range(2, 4)]);
    let result = graph.assign(c, path, Value::from(vec![0.0, 0.0]));

    assert!(matches!(result, Err(QuibError::OverrideNotAllowed(_))));
    assert!(graph.overrides(a).unwrap().is_empty());
}

#[test]
fn test_chooser_cancel_and_choice_caching() {
    let config = GraphConfig::new().with_allow_overriding_functions(true);
    let mut graph = Graph::new(config, FunctionRegistry::with_builtins()).unwrap();
    let a = graph.source(numbers());
    let b = graph.call("negative", vec![a.into()]).unwrap();

    // 預設選擇器放棄：沒有任何寫入
    assert_eq!(graph.assign(b, Path::at(0), -10.0).unwrap(), AssignOutcome::Cancelled);
    assert!(graph.overrides(a).unwrap().is_empty());
    assert!(graph.overrides(b).unwrap().is_empty());

    graph.set_chooser(ScriptedChooser::new([OverrideChoice::Override(a)]));
    graph.assign(b, Path::at(0), -10.0).unwrap();
    // 劇本已用完，第二次必須重用記住的選擇
    graph.assign(b, Path::at(1), -20.0).unwrap();

    assert_eq!(graph.chooser_prompts(), 2);
    assert_eq!(graph.get_value(a).unwrap(), Value::from(vec![10.0, 20.0, 3.0]));
    assert!(graph.overrides(b).unwrap().is_empty());
}

#[test]
fn test_ambiguous_inversion_is_surfaced() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let b = graph.call("add", vec![a.into(), a.into()]).unwrap();

    let result = graph.assign(b, Path::at(0), 10.0);

    assert!(matches!(result, Err(QuibError::AmbiguousInversion(_))));
    assert!(graph.overrides(a).unwrap().is_empty());
}

#[test]
fn test_reduction_round_trip() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(Value::array(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap());
    let mut kwargs = IndexMap::new();
    kwargs.insert("axis".to_string(), Arg::Value(Value::Int(1)));
    let rows = graph.call_with("sum", vec![a.into()], kwargs).unwrap();
    assert_eq!(graph.get_value(rows).unwrap(), Value::from(vec![3.0, 7.0]));

    graph.assign(rows, Path::at(1), 9.0).unwrap();

    assert_eq!(graph.get_value(rows).unwrap(), Value::from(vec![3.0, 9.0]));
    assert_eq!(
        graph.get_value(a).unwrap(),
        Value::array(vec![2, 2], vec![1.0, 2.0, 4.0, 5.0]).unwrap()
    );
}

#[test]
fn test_trig_inversion_picks_nearest_branch() {
    let mut graph = Graph::with_builtins();
    let angle = graph.source(2.5);
    let y = graph.call("sin", vec![angle.into()]).unwrap();

    graph.assign(y, Path::root(), 0.5).unwrap();

    // sin(x) = 0.5 在 2.5 附近的解是 5π/6
    let solved = graph.get_value(angle).unwrap().as_f64().unwrap();
    assert!((solved - 5.0 * std::f64::consts::PI / 6.0).abs() < 1e-9);
    let value = graph.get_value(y).unwrap().as_f64().unwrap();
    assert!((value - 0.5).abs() < 1e-9);
}

#[test]
fn test_partial_reads_are_lazy() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(Value::from(vec![1.0, 2.0, 3.0, 4.0]));
    let b = graph.call("exp", vec![a.into()]).unwrap();
    let c = graph.call("concatenate", vec![Arg::List(vec![b.into(), a.into()])]).unwrap();
    graph.get_value(c).unwrap();
    assert_eq!(graph.evaluations(b).unwrap(), 1);

    // 只讀取 c 中來自 a 的部分不會重算 b
    graph.invalidate(a, &Path::at(0)).unwrap();
    graph.get_value_valid_at_path(c, &Path::at(4)).unwrap();
    assert_eq!(graph.evaluations(b).unwrap(), 1);

    graph.get_value(c).unwrap();
    assert_eq!(graph.evaluations(b).unwrap(), 2);
    assert_eq!(graph.cache_status(c).unwrap(), Some(CacheStatus::AllValid));
}

#[test]
fn test_uncached_paths_narrow_to_changed_region() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let b = graph.source(Value::from(vec![4.0, 5.0]));
    let c = graph
        .call("concatenate", vec![Arg::List(vec![a.into(), b.into()])])
        .unwrap();
    let doubled = graph.call("multiply", vec![c.into(), 2.0.into()]).unwrap();
    graph.get_value(doubled).unwrap();

    graph.assign(b, Path::at(0), 40.0).unwrap();

    assert_eq!(graph.cache_status(c).unwrap(), Some(CacheStatus::Partial));
    assert_eq!(graph.cache_status(doubled).unwrap(), Some(CacheStatus::Partial));
    assert_eq!(
        graph.get_value(doubled).unwrap(),
        Value::from(vec![2.0, 4.0, 6.0, 80.0, 10.0])
    );
}

#[test]
fn test_persistence_round_trip() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let total = graph.call("sum", vec![a.into()]).unwrap();
    graph.assign(a, Path::at(0), 10.0).unwrap();
    graph.remove_override(a, Path::at(0)).unwrap();
    graph.assign(a, Path::at(2), 30.0).unwrap();
    assert_eq!(graph.get_value(total).unwrap(), Value::Float(33.0));

    let saved = Overrider::from_entries(graph.overrides(a).unwrap()).to_json().unwrap();

    let mut restored = Graph::with_builtins();
    let a2 = restored.source(numbers());
    let total2 = restored.call("sum", vec![a2.into()]).unwrap();
    assert_eq!(restored.get_value(total2).unwrap(), Value::Float(6.0));
    let entries = Overrider::from_json(&saved).unwrap().entries().cloned().collect();
    restored.replace_overrides(a2, entries).unwrap();

    assert_eq!(restored.overrides(a2).unwrap(), graph.overrides(a).unwrap());
    assert_eq!(restored.get_value(total2).unwrap(), Value::Float(33.0));
}

#[test]
fn test_undo_redo_whole_assignment() {
    let config = GraphConfig::new().with_allow_overriding_functions(true);
    let mut graph = Graph::new(config, FunctionRegistry::with_builtins()).unwrap();
    let a = graph.source(numbers());
    let b = graph.call("add", vec![a.into(), 1.0.into()]).unwrap();
    graph.override_at(b, Path::at(0), 100.0).unwrap();

    graph.set_chooser(ScriptedChooser::new([OverrideChoice::Override(a)]));
    graph.assign(b, Path::at(0), 50.0).unwrap();
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![50.0, 3.0, 4.0]));

    // 復原同時還原 A 的新覆寫與 B 被移除的舊覆寫
    graph.undo().unwrap();
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![100.0, 3.0, 4.0]));
    assert_eq!(graph.get_value(a).unwrap(), numbers());

    graph.undo().unwrap();
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![2.0, 3.0, 4.0]));

    graph.redo().unwrap();
    graph.redo().unwrap();
    assert_eq!(graph.get_value(b).unwrap(), Value::from(vec![50.0, 3.0, 4.0]));
    assert!(!graph.can_redo());
}

#[test]
fn test_redraws_after_assignment() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let plot = graph.call("multiply", vec![a.into(), 2.0.into()]).unwrap();
    let other = graph.item(a, PathStep::at(2)).unwrap();
    graph.set_graphics(plot, true).unwrap();
    graph.set_graphics(other, true).unwrap();
    graph.get_value(plot).unwrap();
    graph.get_value(other).unwrap();

    graph.assign(a, Path::at(0), 5.0).unwrap();

    assert_eq!(graph.take_pending_redraws(), vec![plot]);
}

#[test]
fn test_record_field_assignment() {
    let mut graph = Graph::with_builtins();
    let record = RecordArray::new(vec![
        ("x".to_string(), NdArray::from_vec(vec![1.0, 2.0])),
        ("y".to_string(), NdArray::from_vec(vec![3.0, 4.0])),
    ])
    .unwrap();
    let r = graph.source(Value::Record(record));
    let x = graph.item(r, PathStep::field("x")).unwrap();
    let y = graph.item(r, PathStep::field("y")).unwrap();
    graph.get_value(x).unwrap();
    graph.get_value(y).unwrap();

    graph.assign(x, Path::at(1), 20.0).unwrap();

    assert_eq!(graph.get_value(x).unwrap(), Value::from(vec![1.0, 20.0]));
    assert_eq!(graph.evaluations(y).unwrap(), 1);
}

#[test]
fn test_collect_garbage_keeps_reachable_nodes() {
    let mut graph = Graph::with_builtins();
    let a = graph.source(numbers());
    let keep = graph.call("negative", vec![a.into()]).unwrap();
    let drop = graph.call("exp", vec![a.into()]).unwrap();

    assert_eq!(graph.collect_garbage(&[keep]).unwrap(), 1);
    assert_eq!(graph.len(), 2);
    assert!(matches!(graph.get_value(drop), Err(QuibError::UnknownNode(_))));
    assert_eq!(graph.get_value(keep).unwrap(), Value::from(vec![-1.0, -2.0, -3.0]));
}

#[test]
fn test_list_slice_stays_list_after_invalidation() {
    // 列表的列表經過切片，局部失效後仍是列表，且只重算失效的位置
    let mut graph = Graph::with_builtins();
    let rows = Value::List(vec![
        Value::float_list(&[1.0, 2.0]),
        Value::float_list(&[3.0, 4.0]),
        Value::float_list(&[5.0, 6.0]),
    ]);
    let a = graph.source(rows);
    let d = graph.item(a, PathStep::range(0, 2)).unwrap();
    assert_eq!(graph.get_value(d).unwrap().kind_name(), "list");

    graph.invalidate(a, &Path::at(0)).unwrap();
    assert_eq!(graph.cache_status(d).unwrap(), Some(CacheStatus::Partial));

    // 第 1 列仍有效：不重算，種類不變
    let value = graph.get_value_valid_at_path(d, &Path::at(1)).unwrap();
    assert_eq!(value.kind_name(), "list");
    assert_eq!(graph.evaluations(d).unwrap(), 1);

    let value = graph.get_value(d).unwrap();
    assert_eq!(
        value,
        Value::List(vec![Value::float_list(&[1.0, 2.0]), Value::float_list(&[3.0, 4.0])])
    );
    assert_eq!(graph.evaluations(d).unwrap(), 2);
}

#[test]
fn test_list_cache_addressed_by_multi_axis_path_stays_list() {
    // 以多軸索引讀取列表節點，緩存改建後取回的仍是列表
    let mut graph = Graph::with_builtins();
    let rows = Value::List(vec![Value::float_list(&[1.0, 2.0]), Value::float_list(&[3.0, 4.0])]);
    let a = graph.source(rows.clone());
    let d = graph.item(a, PathStep::range(0, 2)).unwrap();
    graph.get_value(d).unwrap();

    let cell = Path::new(vec![PathStep::multi(vec![Indexer::At(1), Indexer::At(0)])]);
    let value = graph.get_value_valid_at_path(d, &cell).unwrap();

    assert_eq!(value, rows);
    assert_eq!(graph.evaluations(d).unwrap(), 1);
    graph.get_value(d).unwrap();
    assert_eq!(graph.evaluations(d).unwrap(), 1);
}

#[test]
fn test_deep_read_into_mapping_is_cached() {
    // 對映射節點的深層讀取：重算一次整個鍵之後就不再重算
    let mut inner = IndexMap::new();
    inner.insert("k".to_string(), Value::float_list(&[1.0, 2.0]));
    let mut outer = IndexMap::new();
    outer.insert("o".to_string(), Value::Map(inner));

    let mut graph = Graph::with_builtins();
    let s = graph.source(Value::Map(outer));
    let d = graph.item(s, PathStep::field("o")).unwrap();
    graph.get_value(d).unwrap();

    graph.invalidate(s, &Path::field("o").with(PathStep::field("k"))).unwrap();
    let deep = Path::field("k").with(PathStep::at(0));
    for _ in 0..5 {
        assert_eq!(graph.get_value_at(d, &deep).unwrap(), Value::Float(1.0));
    }

    assert_eq!(graph.evaluations(d).unwrap(), 2);
    assert_eq!(graph.cache_status(d).unwrap(), Some(CacheStatus::AllValid));
}

#[test]
fn test_deep_read_into_nested_list_is_cached() {
    // 列表元素內部的深層讀取同樣只重算一次
    let mut graph = Graph::with_builtins();
    let rows = Value::List(vec![Value::float_list(&[1.0, 2.0]), Value::float_list(&[3.0, 4.0])]);
    let a = graph.source(rows);
    let d = graph.item(a, PathStep::range(0, 2)).unwrap();
    graph.get_value(d).unwrap();

    graph.invalidate(a, &Path::at(1)).unwrap();
    let deep = Path::at(1).with(PathStep::at(0));
    for _ in 0..3 {
        assert_eq!(graph.get_value_at(d, &deep).unwrap(), Value::Float(3.0));
    }

    assert_eq!(graph.evaluations(d).unwrap(), 2);
}
