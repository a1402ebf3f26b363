//! Function calling and streaming through the chat driver.
//!
//! The provider is picked from the environment (`CHAT_DRIVER_PROVIDER`, or
//! whichever credentials are set):
//!
//! ```bash
//! export OPENAI_API_KEY=your_api_key_here
//! RUST_LOG=chat_driver=debug cargo run --example tool_calling
//! ```

use chat_driver::{ChatRequest, Error, FunctionDescriptor, FunctionError, ProviderFactory, Verbosity};
use futures_util::StreamExt;
use serde_json::json;
use std::io::Write;
use tracing_subscriber::EnvFilter;

fn order_lookup() -> FunctionDescriptor {
    FunctionDescriptor::new(
        "lookup_order",
        "Look up the shipping status of an order by its id",
        json!({
            "type": "object",
            "properties": {
                "order_id": {"type": "string", "description": "Order id, e.g. A-1001"}
            },
            "required": ["order_id"]
        }),
        |args| async move {
            match args["order_id"].as_str() {
                Some("A-1001") => Ok(json!({"order_id": "A-1001", "status": "shipped", "eta_days": 2})),
                Some(other) => Err(FunctionError::new(format!("no order with id {other}"))),
                None => Err(FunctionError::new("order_id missing")),
            }
        },
    )
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_driver=info")))
        .init();

    let driver = ProviderFactory::from_env().await?;
    println!("Using {} ({})", driver.provider_name(), driver.model());

    let request = ChatRequest::new("Where is my order A-1001?")
        .system_prompt("You are a support assistant. Use the tools to answer order questions.")
        .verbosity(Verbosity::Low)
        .function(order_lookup());

    let answer = driver.get_model_response_with_forced_tools(&request).await?;
    println!("Answer: {answer}");

    println!("Streamed:");
    let mut stream = driver.get_streamed_model_response(&request).await?;
    while let Some(fragment) = stream.next().await {
        print!("{fragment}");
        std::io::stdout().flush().ok();
    }
    println!();

    if stream.was_interrupted() {
        println!("(stream was interrupted)");
    }

    Ok(())
}
