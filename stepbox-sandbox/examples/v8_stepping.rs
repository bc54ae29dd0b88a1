//! Step through a small program with the V8 runtime

#[cfg(feature = "v8")]
use stepbox_common::ExecutionRequest;
#[cfg(feature = "v8")]
use stepbox_sandbox::{HostBridge, SandboxConfig};

#[cfg(feature = "v8")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let code = r#"
function total(items) {
  let sum = 0;
  for (const item of items) {
    sum += item.price;
  }
  console.log("total", sum);
  return sum;
}
"#;

    let bridge = HostBridge::v8(SandboxConfig::default());

    println!("=== Auto mode ===");
    let request = ExecutionRequest::new(code, "total")
        .with_arguments(vec![serde_json::json!([{ "price": 3 }, { "price": 4 }])]);
    let value = bridge.run(request.clone()).await?;
    println!("   Result: {}", value);

    println!("\n=== Manual mode ===");
    let mut controller = bridge.start_manual(request).await;
    while let Some(snapshot) = controller.next_snapshot().await {
        let vars: Vec<String> = snapshot
            .variables
            .iter()
            .map(|var| format!("{}={}", var.name, var.serialized_value))
            .collect();
        println!("   line {:>2}  {}", snapshot.line, vars.join(" "));
        controller.step();
    }
    println!("   Outcome: {:?}", controller.outcome());

    Ok(())
}

#[cfg(not(feature = "v8"))]
fn main() {
    println!("This example requires the 'v8' feature to be enabled.");
}
