use std::sync::Arc;

use agent_conductor::runner::inference::ToolSchema;
use agent_conductor::runner::tools::{Tool, ToolFuture, ToolRegistry};
use agent_conductor::AppError;
use serde_json::{json, Value};

struct Echo;

impl Tool for Echo {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".into(),
            description: "Echo arguments back".into(),
            parameters: json!({ "type": "object" }),
        }
    }

    fn invoke(&self, arguments: Value) -> ToolFuture {
        Box::pin(async move { Ok(arguments) })
    }
}

#[tokio::test]
async fn registered_tools_are_invocable_by_name() {
    let mut tools = ToolRegistry::new();
    assert!(tools.is_empty());
    tools.register(Arc::new(Echo));
    tools.register_fn("fail", "Always fails", json!({}), |_| async {
        Err::<Value, _>(AppError::Tool("nope".into()))
    });
    assert_eq!(tools.len(), 2);

    let echoed = tools
        .get("echo")
        .unwrap()
        .invoke(json!({ "x": 1 }))
        .await
        .unwrap();
    assert_eq!(echoed, json!({ "x": 1 }));

    let failed = tools.get("fail").unwrap().invoke(Value::Null).await;
    assert!(matches!(failed, Err(AppError::Tool(_))));
    assert!(tools.get("missing").is_none());
}

#[test]
fn schemas_are_sorted_and_reregistration_replaces() {
    let mut tools = ToolRegistry::new();
    tools.register_fn("zeta", "z", json!({}), |_| async { Ok(Value::Null) });
    tools.register_fn("alpha", "a", json!({}), |_| async { Ok(Value::Null) });
    tools.register_fn("zeta", "z2", json!({}), |_| async { Ok(Value::Null) });

    let schemas = tools.schemas();
    let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
    assert_eq!(schemas[1].description, "z2");
}
