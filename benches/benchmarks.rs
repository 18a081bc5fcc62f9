//! Performance benchmarks for finmcp.
//!
//! This module contains benchmarks for:
//! - Wire message encoding and decoding
//! - Catalog lookups across many servers
//! - Argument binding against tool definitions
//! - Registry dispatch without a network
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map, Value};

use finmcp::mcp::{bind_arguments, Catalog, Message, Parameter, ParameterType, Tool, ToolRegistry};

// ============================================================================
// Mock Data Fixtures
// ============================================================================

mod fixtures {
    use super::*;

    /// A realistic market-data tool.
    pub fn quote_tool() -> Tool {
        Tool::new("get_quote", "Latest quote for a ticker")
            .param(Parameter::required("symbol", ParameterType::String).describe("Ticker symbol"))
            .param(
                Parameter::optional("interval", ParameterType::String)
                    .one_of(["1d", "1wk", "1mo"])
                    .with_default("1d"),
            )
            .param(Parameter::optional("limit", ParameterType::Number).with_default(30))
            .in_category("financial_data")
    }

    /// Generate `count` tools for one server.
    pub fn generate_tools(server: usize, count: usize) -> Vec<Tool> {
        (0..count)
            .map(|i| {
                Tool::new(format!("tool_{}_{}", server, i), "Generated tool")
                    .param(Parameter::required("symbol", ParameterType::String))
            })
            .collect()
    }

    /// A tool list response as it would arrive from a server.
    pub fn tool_list_json(count: usize) -> String {
        let tools: Vec<Value> = generate_tools(0, count).iter().map(|t| serde_json::to_value(t).unwrap()).collect();
        json!({
            "type": "tool_list_response",
            "id": "bench",
            "timestamp": "2024-01-01T00:00:00Z",
            "tools": tools,
        })
        .to_string()
    }

    pub fn quote_args() -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("symbol".to_string(), json!("AAPL"));
        args
    }
}

// ============================================================================
// Protocol Benchmarks
// ============================================================================

fn bench_message_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_codec");

    let request = Message::tool_request("bench", "get_quote", fixtures::quote_args());
    group.bench_function("encode_tool_request", |b| {
        b.iter(|| black_box(request.to_json().unwrap()));
    });

    let encoded = request.to_json().unwrap();
    group.bench_function("decode_tool_request", |b| {
        b.iter(|| black_box(Message::from_json(black_box(&encoded)).unwrap()));
    });

    for count in [10, 100, 500] {
        let json = fixtures::tool_list_json(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("decode_tool_list", count), &json, |b, json| {
            b.iter(|| black_box(Message::from_json(black_box(json)).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Catalog Benchmarks
// ============================================================================

fn bench_catalog_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_resolve");

    for servers in [1, 4, 16] {
        let mut catalog = Catalog::new();
        for s in 0..servers {
            catalog.set_server_tools(&format!("ws://bench:{}", 8000 + s), s, None, fixtures::generate_tools(s, 50));
        }
        let last = format!("tool_{}_49", servers - 1);

        group.bench_with_input(BenchmarkId::new("resolve_last", servers), &last, |b, id| {
            b.iter(|| black_box(catalog.resolve(black_box(id))));
        });
        group.bench_with_input(BenchmarkId::new("entries", servers), &servers, |b, _| {
            b.iter(|| black_box(catalog.entries()));
        });
    }

    group.finish();
}

// ============================================================================
// Dispatch Benchmarks
// ============================================================================

fn bench_bind_arguments(c: &mut Criterion) {
    let tool = fixtures::quote_tool();
    let args = fixtures::quote_args();

    c.bench_function("bind_arguments", |b| {
        b.iter(|| black_box(bind_arguments(&tool, black_box(args.clone())).unwrap()));
    });
}

fn bench_registry_invoke(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut registry = ToolRegistry::new();
    registry.register_sync(fixtures::quote_tool(), |args| Ok(json!({ "symbol": args["symbol"], "price": 1.0 })));
    let args = fixtures::quote_args();

    c.bench_function("registry_invoke", |b| {
        b.iter(|| black_box(rt.block_on(registry.invoke("get_quote", args.clone()))));
    });
}

criterion_group!(protocol_benches, bench_message_codec);

criterion_group!(dispatch_benches, bench_catalog_resolve, bench_bind_arguments, bench_registry_invoke);

criterion_main!(protocol_benches, dispatch_benches);
