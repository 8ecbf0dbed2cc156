//! Mock downstream MCP server for integration testing. Speaks line-delimited
//! JSON-RPC over stdio, understanding `initialize`, `tools/list`, and
//! `tools/call` for a small fixed tool set, plus a few special argument
//! values used to exercise the aggregator's failure and tolerance paths.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let noisy = std::env::var("ECHO_DOWNSTREAM_NOISY").is_ok();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Value>(&line) else { continue };
        if noisy {
            eprintln!("[INFO] handling {}", msg.get("method").and_then(|m| m.as_str()).unwrap_or("?"));
        }
        handle_message(&mut stdout, msg, noisy);
    }
}

fn handle_message(writer: &mut impl Write, msg: Value, noisy: bool) {
    let id = msg.get("id").cloned();
    match msg.get("method").and_then(|m| m.as_str()) {
        Some("initialize") => {
            let resp = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "latest",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "echo-downstream", "version": "1.0.0" }
                }
            });
            write_msg(writer, &resp, noisy);
        }

        Some("tools/list") => {
            let resp = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [
                        {
                            "name": "echo",
                            "description": "Echo the given text back",
                            "inputSchema": { "type": "object", "properties": { "text": {"type": "string"} } }
                        },
                        {
                            "name": "reflect",
                            "description": "Return the call arguments as JSON text",
                            "inputSchema": { "type": "object", "properties": {} }
                        },
                        {
                            "name": "slow",
                            "description": "Sleep before responding, for timeout tests",
                            "inputSchema": { "type": "object", "properties": {} }
                        },
                        {
                            "name": "crash",
                            "description": "Exit without responding, for crash-detection tests",
                            "inputSchema": { "type": "object", "properties": {} }
                        }
                    ]
                }
            });
            write_msg(writer, &resp, noisy);
        }

        Some("tools/call") => {
            let tool_name = msg.pointer("/params/name").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = msg.pointer("/params/arguments").cloned().unwrap_or(json!({}));

            if tool_name == "crash" {
                std::process::exit(1);
            }
            if tool_name == "slow" {
                std::thread::sleep(std::time::Duration::from_secs(2));
            }

            let text = match tool_name {
                "reflect" => arguments.to_string(),
                _ => arguments.get("text").and_then(|v| v.as_str()).unwrap_or("echo").to_string(),
            };

            let resp = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{ "type": "text", "text": text }] }
            });
            write_msg(writer, &resp, noisy);
        }

        Some("notifications/initialized") | Some("notifications/cancelled") => {}

        Some(unknown) => {
            if let Some(req_id) = id {
                let resp = json!({
                    "jsonrpc": "2.0",
                    "id": req_id,
                    "error": { "code": -32601, "message": format!("Method not found: {unknown}") }
                });
                write_msg(writer, &resp, noisy);
            }
        }

        None => {}
    }
}

fn write_msg(writer: &mut impl Write, msg: &Value, noisy: bool) {
    if noisy {
        // Interleave a diagnostic line the aggregator's framing must skip.
        let _ = writeln!(io::stderr(), "[DEBUG] writing response");
        let _ = writeln!(writer, "[INFO] about to respond");
    }
    let s = serde_json::to_string(msg).expect("serialize JSON");
    writeln!(writer, "{s}").expect("write to stdout");
    writer.flush().expect("flush stdout");
}
