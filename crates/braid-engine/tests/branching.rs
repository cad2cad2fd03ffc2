//! Conditional branches, parallel groups, and transforms.

mod common;

use std::sync::Arc;
use std::time::Duration;

use braid_engine::{ErrorKind, ExecutionEvent, ManualClock, StepStatus, Strategy, ToolError, WorkflowStatus};
use braid_workflow::{SchemaType, Step, TransformDef, WorkflowDefinition};
use common::{MockAgent, MockTool, drain, engine};
use serde_json::{Value, json};

/// score -> check -> {approve -> notify, reject -> apologise}, with `merge`
/// joining both branches.
fn review(score: i64) -> (WorkflowDefinition, Arc<MockTool>) {
  let tool = Arc::new(
    MockTool::new()
      .method("score", move |_| Ok(json!(score)))
      .method("ok", |_| Ok(json!("ok"))),
  );
  let definition = WorkflowDefinition::builder("review", "Review")
    .step(Step::tool("score", "score"))
    .step(
      Step::condition("check", "steps.score.result > 5", Some("approve"), Some("reject")).depends_on(["score"]),
    )
    .step(Step::tool("approve", "ok").depends_on(["check"]))
    .step(Step::tool("notify", "ok").depends_on(["approve"]))
    .step(Step::tool("reject", "ok").depends_on(["check"]))
    .step(Step::tool("apologise", "ok").depends_on(["reject"]))
    .step(Step::tool("merge", "ok").depends_on(["approve", "reject"]))
    .step(
      Step::tool("strict_merge", "ok")
        .depends_on(["approve", "reject"])
        .skip_on_skipped_dependency(),
    )
    .build();
  (definition, tool)
}

#[tokio::test]
async fn test_true_branch_skips_the_false_side() {
  let (definition, tool) = review(8);
  let (engine, mut rx) = engine(tool.clone(), Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));

  let result = engine
    .execute(&definition, Value::Null, Strategy::BoundedParallel { max_concurrency: 4 })
    .await
    .unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(result.step("check").unwrap().result, json!("approve"));
  for id in ["score", "check", "approve", "notify", "merge"] {
    assert_eq!(result.status_of(id), Some(StepStatus::Completed), "{id}");
  }
  for id in ["reject", "apologise", "strict_merge"] {
    assert_eq!(result.status_of(id), Some(StepStatus::Skipped), "{id}");
  }
  assert_eq!(tool.calls("ok"), 3);

  let skipped: Vec<_> = drain(&mut rx)
    .into_iter()
    .filter_map(|e| match e {
      ExecutionEvent::StepSkipped { step_id, reason, .. } => Some((step_id, reason)),
      _ => None,
    })
    .collect();
  assert_eq!(skipped.len(), 3);
  assert!(skipped[0].1.contains("branch 'reject' not taken"));
}

#[tokio::test]
async fn test_false_branch_skips_the_true_side() {
  let (definition, tool) = review(2);
  let (engine, _rx) = engine(tool, Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));

  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(result.step("check").unwrap().result, json!("reject"));
  for id in ["reject", "apologise", "merge"] {
    assert_eq!(result.status_of(id), Some(StepStatus::Completed), "{id}");
  }
  for id in ["approve", "notify", "strict_merge"] {
    assert_eq!(result.status_of(id), Some(StepStatus::Skipped), "{id}");
  }
}

#[tokio::test]
async fn test_condition_with_a_single_target() {
  let tool = Arc::new(MockTool::new().method("ok", |_| Ok(json!("ok"))));
  let (engine, _rx) = engine(tool.clone(), Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("gate", "Gate")
    .variable("enabled", json!(false))
    .step(Step::condition("gate", "{{ variables.enabled }}", Some("work"), None))
    .step(Step::tool("work", "ok").depends_on(["gate"]))
    .step(Step::tool("always", "ok").depends_on(["gate"]))
    .build();

  let result = engine
    .execute(&definition, json!({ "enabled": true }), Strategy::Sequential)
    .await
    .unwrap();

  assert_eq!(result.step("gate").unwrap().result, json!("work"));
  assert_eq!(result.status_of("work"), Some(StepStatus::Completed));
  assert_eq!(result.status_of("always"), Some(StepStatus::Completed));

  let result = engine.execute(&definition, json!({}), Strategy::Sequential).await.unwrap();

  assert_eq!(result.step("gate").unwrap().result, Value::Null);
  assert_eq!(result.status_of("work"), Some(StepStatus::Skipped));
  assert_eq!(result.status_of("always"), Some(StepStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_group_keeps_declaration_order() {
  let tool = Arc::new(
    MockTool::new()
      .method("slowest", |_| Ok(json!("s")))
      .delay("slowest", Duration::from_millis(300))
      .method("middle", |_| Ok(json!("m")))
      .delay("middle", Duration::from_millis(200))
      .method("fast", |_| Ok(json!("f")))
      .delay("fast", Duration::from_millis(100))
      .method("echo", |params| Ok(Value::Object(params.clone()))),
  );
  let (engine, _rx) = engine(tool.clone(), Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("group", "Group")
    .step(Step::parallel(
      "fetch",
      vec![
        Step::tool("slowest", "slowest"),
        Step::tool("middle", "middle"),
        Step::tool("fast", "fast"),
      ],
    ))
    .step(
      Step::tool("use", "echo")
        .depends_on(["fetch"])
        .input(json!({ "fast": "{{ steps.fetch.result.fast }}" })),
    )
    .build();

  let started = tokio::time::Instant::now();
  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert!(started.elapsed() < Duration::from_millis(600));
  assert_eq!(result.status, WorkflowStatus::Completed);
  let fetch = &result.step("fetch").unwrap().result;
  let keys: Vec<_> = fetch.as_object().unwrap().keys().cloned().collect();
  assert_eq!(keys, vec!["slowest", "middle", "fast"]);
  assert_eq!(fetch, &json!({ "slowest": "s", "middle": "m", "fast": "f" }));
  assert_eq!(result.status_of("fast"), Some(StepStatus::Completed));
  assert_eq!(result.step("use").unwrap().result, json!({ "fast": "f" }));
  assert_eq!(tool.max_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_group_cancels_remaining_sub_steps() {
  let tool = Arc::new(
    MockTool::new()
      .method("bad", |_| Err(ToolError::new("boom")))
      .method("slow", |_| Ok(json!("done")))
      .delay("slow", Duration::from_secs(10)),
  );
  let (engine, _rx) = engine(tool, Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("group", "Group")
    .step(Step::parallel("fan", vec![Step::tool("slow", "slow"), Step::tool("bad", "bad")]).fail_fast())
    .build();

  let started = tokio::time::Instant::now();
  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(result.status, WorkflowStatus::Failed);
  assert_eq!(result.status_of("fan"), Some(StepStatus::Failed));
  assert_eq!(result.status_of("bad"), Some(StepStatus::Failed));
  assert_eq!(result.status_of("slow"), Some(StepStatus::Cancelled));
  let error = result.step("fan").unwrap().error.clone().unwrap();
  assert_eq!(error.kind, ErrorKind::StepExecution);
  assert!(error.message.contains("sub-step 'bad'"));
}

#[tokio::test(start_paused = true)]
async fn test_group_timeout_keeps_finished_sub_steps() {
  let tool = Arc::new(
    MockTool::new()
      .method("quick", |_| Ok(json!("fast")))
      .method("slow", |_| Ok(json!("late")))
      .delay("slow", Duration::from_secs(5)),
  );
  let (engine, mut rx) = engine(tool.clone(), Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("group", "Group")
    .step(
      Step::parallel("g", vec![Step::tool("x", "quick"), Step::tool("y", "slow")])
        .timeout(Duration::from_secs(1))
        .retries(0),
    )
    .build();

  let started = tokio::time::Instant::now();
  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert!(started.elapsed() < Duration::from_secs(5));
  assert_eq!(result.status, WorkflowStatus::Failed);
  let group = result.step("g").unwrap();
  assert_eq!(group.status, StepStatus::Failed);
  assert_eq!(group.error.as_ref().unwrap().kind, ErrorKind::Timeout);

  let x = result.step("x").unwrap();
  assert_eq!(x.status, StepStatus::Completed);
  assert_eq!(x.attempt_count, 1);
  assert_eq!(x.result, json!("fast"));
  let y = result.step("y").unwrap();
  assert_eq!(y.status, StepStatus::Cancelled);
  assert_eq!(y.attempt_count, 1);
  assert_eq!(tool.calls("quick"), 1);

  let events = drain(&mut rx);
  assert!(events.iter().any(|e| matches!(e, ExecutionEvent::StepCancelled { step_id, .. } if step_id == "y")));
}

#[tokio::test(start_paused = true)]
async fn test_group_without_fail_fast_lets_siblings_finish() {
  let tool = Arc::new(
    MockTool::new()
      .method("bad", |_| Err(ToolError::new("boom")))
      .method("slow", |_| Ok(json!("done")))
      .delay("slow", Duration::from_secs(1)),
  );
  let (engine, _rx) = engine(tool, Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("group", "Group")
    .step(Step::parallel("fan", vec![Step::tool("slow", "slow"), Step::tool("bad", "bad")]))
    .build();

  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Failed);
  assert_eq!(result.status_of("fan"), Some(StepStatus::Failed));
  assert_eq!(result.status_of("slow"), Some(StepStatus::Completed));
  assert_eq!(result.step("slow").unwrap().result, json!("done"));
}

#[tokio::test]
async fn test_skipped_dependency_cascades_when_requested() {
  let tool = Arc::new(
    MockTool::new()
      .method("flaky", |_| Err(ToolError::new("down")))
      .method("ok", |_| Ok(json!("ok"))),
  );
  let (engine, _rx) = engine(tool.clone(), Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("cascade", "Cascade")
    .step(Step::tool("flaky", "flaky").on_failure(braid_engine::FailurePolicy::Skip))
    .step(Step::tool("strict", "ok").depends_on(["flaky"]).skip_on_skipped_dependency())
    .step(Step::tool("stricter", "ok").depends_on(["strict"]).skip_on_skipped_dependency())
    .step(Step::tool("lenient", "ok").depends_on(["flaky"]))
    .build();

  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(result.status_of("strict"), Some(StepStatus::Skipped));
  assert_eq!(result.status_of("stricter"), Some(StepStatus::Skipped));
  assert_eq!(result.status_of("lenient"), Some(StepStatus::Completed));
  assert_eq!(tool.calls("ok"), 1);
}

#[tokio::test]
async fn test_expression_and_render_transforms() {
  let tool = Arc::new(MockTool::new().method("stats", |_| Ok(json!({ "count": 4, "name": "ada", "a": 2, "b": 3 }))));
  let (engine, _rx) = engine(tool, Arc::new(MockAgent::echo()), Arc::new(ManualClock::default()));
  let definition = WorkflowDefinition::builder("transforms", "Transforms")
    .step(Step::tool("stats", "stats"))
    .step(
      Step::transform(
        "enough",
        TransformDef::Expression {
          expression: "value.count >= 3 and input.enabled".into(),
        },
      )
      .depends_on(["stats"])
      .input(json!("{{ steps.stats.result }}")),
    )
    .step(
      Step::transform(
        "greeting",
        TransformDef::Render {
          template: "Hello {{ value.name | title }}".into(),
          output: SchemaType::String,
        },
      )
      .depends_on(["stats"])
      .input(json!("{{ steps.stats.result }}")),
    )
    .step(
      Step::transform(
        "total",
        TransformDef::Render {
          template: "{{ value.a + value.b }}".into(),
          output: SchemaType::Integer,
        },
      )
      .depends_on(["stats"])
      .input(json!("{{ steps.stats.result }}")),
    )
    .step(
      Step::transform("copy", TransformDef::Identity)
        .depends_on(["stats"])
        .input(json!({ "n": "{{ steps.stats.result.count }}" })),
    )
    .build();

  let result = engine
    .execute(&definition, json!({ "enabled": true }), Strategy::Sequential)
    .await
    .unwrap();

  assert_eq!(result.status, WorkflowStatus::Completed);
  assert_eq!(result.step("enough").unwrap().result, json!(true));
  assert_eq!(result.step("greeting").unwrap().result, json!("Hello Ada"));
  assert_eq!(result.step("total").unwrap().result, json!(5));
  assert_eq!(result.step("copy").unwrap().result, json!({ "n": 4 }));
}

#[tokio::test]
async fn test_render_output_type_mismatch_fails_the_step() {
  let (engine, _rx) = engine(
    Arc::new(MockTool::new()),
    Arc::new(MockAgent::echo()),
    Arc::new(ManualClock::default()),
  );
  let definition = WorkflowDefinition::builder("render", "Render")
    .step(
      Step::transform(
        "count",
        TransformDef::Render {
          template: "many".into(),
          output: SchemaType::Integer,
        },
      )
      .retries(2),
    )
    .build();

  let result = engine.execute(&definition, Value::Null, Strategy::Sequential).await.unwrap();

  let count = result.step("count").unwrap();
  assert_eq!(count.status, StepStatus::Failed);
  assert_eq!(count.attempt_count, 1);
  assert_eq!(count.error.as_ref().unwrap().kind, ErrorKind::Expression);
}
