use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde_json::json;
use weave::config::Config;
use weave::logging::init_logging;
use weave::prelude::*;

fn sales_tool() -> Tool {
    Tool::new(
        "show_sales",
        "Fetch sales figures for a quarter",
        json!({
            "type": "object",
            "properties": {
                "quarter": { "type": "string" },
                "region": { "type": "string" }
            },
            "required": ["quarter"]
        }),
    )
}

/// Two turns: a tool call, then a component answer streamed after the tool response
fn scripted_backend() -> ScriptedBackend {
    let tool_call = ToolCallRequest::new("show_sales")
        .with_parameter("quarter", json!("Q3"))
        .with_parameter("region", serde_json::Value::Null);

    ScriptedBackend::new()
        .with_turn(vec![
            Decision::new("m1", "Let me"),
            Decision::new("m1", "Let me pull the Q3 numbers").with_tool_call(tool_call, "call-1"),
        ])
        .with_turn(vec![
            Decision::new("m2", "Q3 revenue"),
            Decision::new("m2", "Q3 revenue was 42k")
                .with_component("SalesChart", json!({ "quarter": "Q3", "total": 42000 })),
            Decision::new("m2", "Q3 revenue was 42k, up 8%")
                .with_component("SalesChart", json!({ "quarter": "Q3", "total": 42000 })),
        ])
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    init_logging(&config.logging)?;

    println!("Weave - Scripted Turns");
    println!("======================\n");

    let weave = WeaveBuilder::from_config(&config)?
        .backend(Arc::new(scripted_backend()))
        .registry(Arc::new(StaticRegistry::new(vec![sales_tool()])))
        .build()
        .await?;

    // 1. Thread + user message
    let thread = weave
        .create_thread(NewThread::new("demo-project").with_name("Sales review"))
        .await?;
    println!("1. Thread created: {}", thread.id);

    weave.add_user_message(&thread.id, "How did Q3 go?").await?;
    println!("2. User message added\n");

    // 2. First turn resolves to a tool call
    let first = weave.process(TurnInput::new(&thread.id)).await?;
    println!("3. Assistant: {}", first.message.text());
    if let Some(call) = &first.message.tool_call_request {
        println!("   Tool call: {} {}", call.tool_name, call.arguments());
    }
    println!(
        "   Stage: {} ({})\n",
        first.resulting_generation_stage, first.resulting_status_message
    );

    // 3. Client runs the tool and reports back
    let call_id = first
        .message
        .tool_call_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("first turn should end in a tool call"))?;
    weave
        .coordinator()
        .add_user_message(
            &thread.id,
            NewMessage::tool_response(call_id, r#"{"total": 42000, "growth": 0.08}"#),
        )
        .await?;
    println!("4. Tool response added");

    // 4. Second turn streams a component
    println!("5. Streaming answer:");
    let mut stream = weave.stream(TurnInput::new(&thread.id));
    while let Some(view) = stream.next().await {
        let view = view?;
        let marker = if view.in_progress { "..." } else { "done" };
        println!("   [{}] {}", marker, view.text());
    }

    let thread = weave
        .get_thread(&thread.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("thread disappeared"))?;
    let messages = weave.get_messages(&thread.id).await?;
    println!(
        "\n6. Final stage: {} ({} messages stored)",
        thread.generation_stage,
        messages.len()
    );

    tracing::info!(thread_id = %thread.id, "Demo finished");
    Ok(())
}
