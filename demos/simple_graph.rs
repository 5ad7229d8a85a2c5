//! # 簡單依賴圖範例
//!
//! 這個範例展示：
//! - 建立輸入節點與函數節點
//! - 惰性計算與部分重算
//! - 對函數結果的指派反推到輸入

use anyhow::Result;
use quibs::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    println!("===== 簡單依賴圖範例 =====");
    println!();

    println!("步驟 1: 建立節點");
    let mut graph = Graph::with_builtins();
    let a = graph.source(Value::from(vec![1.0, 2.0, 3.0]));
    graph.set_name(a, "a")?;
    let b = graph.call("add", vec![a.into(), 5.0.into()])?;
    graph.set_name(b, "b")?;
    let head = graph.item(b, PathStep::range(0, 2))?;
    graph.set_name(head, "head")?;
    println!("   a = [1, 2, 3]");
    println!("   b = a + 5");
    println!("   head = b[0:2]");
    println!();

    println!("步驟 2: 讀取");
    println!("   b    = {:?}", graph.get_value(b)?);
    println!("   head = {:?}", graph.get_value(head)?);
    println!();

    println!("步驟 3: 修改 a[2]（不影響 head）");
    graph.assign(a, Path::at(2), 30.0)?;
    println!("   head = {:?}", graph.get_value(head)?);
    println!("   head 計算次數: {}", graph.evaluations(head)?);
    println!();

    println!("步驟 4: 對 b[0] 指派 12，反推回 a");
    let outcome = graph.assign(b, Path::at(0), 12.0)?;
    for (node, path) in outcome.targets() {
        println!("   覆寫節點 {} 於 {}", node, path);
    }
    println!("   a    = {:?}", graph.get_value(a)?);
    println!("   b    = {:?}", graph.get_value(b)?);
    println!("   head = {:?}", graph.get_value(head)?);
    println!();

    println!("步驟 5: 復原");
    graph.undo()?;
    println!("   a = {:?}", graph.get_value(a)?);
    println!();

    println!("步驟 6: 保存覆寫");
    let saved = Overrider::from_entries(graph.overrides(a)?).to_json()?;
    println!("   {}", saved);

    Ok(())
}
