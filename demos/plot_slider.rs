//! # 滑桿與圖形範例
//!
//! 模擬互動介面：滑桿節點帶有指派範本，圖形節點在上游改變時登記重繪，
//! 拖動圖形上的點則反推回滑桿。

use anyhow::Result;
use indexmap::IndexMap;
use quibs::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    println!("===== 滑桿與圖形範例 =====");
    println!();

    let config = GraphConfig::from_json(r#"{ "cache_choices": true, "track_redraws": true }"#)?;
    let mut graph = Graph::new(config, FunctionRegistry::with_builtins())?;

    println!("步驟 1: 建立滑桿與曲線");
    let amplitude = graph.source(1.0);
    graph.set_name(amplitude, "amplitude")?;
    graph.set_assignment_template(amplitude, Some(AssignmentTemplate::range(0.0, 5.0, 0.5)?))?;

    let xs = graph.source(Value::from(vec![0.0, 0.5, 1.0, 1.5, 2.0]));
    graph.set_name(xs, "xs")?;
    let wave = graph.call("sin", vec![xs.into()])?;
    let curve = graph.call("multiply", vec![amplitude.into(), wave.into()])?;
    graph.set_name(curve, "curve")?;
    graph.set_graphics(curve, true)?;

    let mut kwargs = IndexMap::new();
    kwargs.insert("axis".to_string(), Arg::Value(Value::Int(0)));
    let peak = graph.call_with("max", vec![curve.into()], kwargs)?;
    graph.set_name(peak, "peak")?;
    graph.set_graphics(peak, true)?;

    println!("   curve = {:?}", graph.get_value(curve)?);
    println!("   peak  = {:?}", graph.get_value(peak)?);
    println!();

    println!("步驟 2: 拖動滑桿到 2.3（對齊 0.5 格點）");
    graph.assign(amplitude, Path::root(), 2.3)?;
    println!("   amplitude = {:?}", graph.get_value(amplitude)?);
    println!("   待重繪: {:?}", graph.take_pending_redraws());
    println!("   curve = {:?}", graph.get_value(curve)?);
    println!();

    println!("步驟 3: 拖動曲線上的第 3 個點");
    match graph.assign(curve, Path::at(2), 1.0) {
        Ok(outcome) => println!("   覆寫: {:?}", outcome.targets()),
        Err(err) => println!("   無法指派: {}", err),
    }
    println!("   amplitude = {:?}", graph.get_value(amplitude)?);
    println!("   xs        = {:?}", graph.get_value(xs)?);
    println!("   待重繪: {:?}", graph.take_pending_redraws());
    println!();

    println!("步驟 4: 清理未使用的節點");
    let removed = graph.collect_garbage(&[curve, peak])?;
    println!("   移除 {} 個節點，剩餘 {} 個", removed, graph.len());

    Ok(())
}
