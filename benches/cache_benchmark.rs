//! Rendered-cell cache benchmark: hit-path and miss-path lookup cost.
//!
//! The hit path runs for every visible cell of every frame, so it has to
//! stay cheap relative to a full compile.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use panelforge::render::{cache_key, CellCache, CellCompiler};
use panelforge::{PanelId, RenderContext, ViewerId};
use panelforge::panel::CellTemplate;
use std::sync::Arc;
use std::time::Duration;

fn template(index: usize) -> CellTemplate {
    CellTemplate::new(format!("item{index}"), "crate")
        .with_title(format!("Item {index}: {{price}} coins"))
        .with_body(vec!["Stock: {stock}".to_string()])
}

fn context() -> RenderContext {
    let mut ctx = RenderContext::new();
    ctx.set_value("price", "120");
    ctx.set_value("stock", "64");
    ctx
}

fn cache_hit_path(c: &mut Criterion) {
    let compiler = CellCompiler::new(Arc::new(CellCache::new(4096, Duration::from_secs(300))));
    let panel = PanelId::new("shop");
    let ctx = context();
    let templates: Vec<CellTemplate> = (0..54).map(template).collect();
    // Warm every entry.
    for t in &templates {
        compiler.compile(&panel, t, ViewerId(1), &ctx);
    }

    c.bench_function("cache_hit_54_cells", |b| {
        b.iter(|| {
            for t in &templates {
                black_box(compiler.compile(black_box(&panel), t, ViewerId(2), &ctx));
            }
        })
    });
}

fn cache_miss_path(c: &mut Criterion) {
    let panel = PanelId::new("shop");
    let ctx = context();
    let templates: Vec<CellTemplate> = (0..54).map(template).collect();

    c.bench_function("cache_miss_54_cells", |b| {
        b.iter(|| {
            let compiler =
                CellCompiler::new(Arc::new(CellCache::new(4096, Duration::from_secs(300))));
            for t in &templates {
                black_box(compiler.compile(black_box(&panel), t, ViewerId(1), &ctx));
            }
        })
    });
}

fn key_computation(c: &mut Criterion) {
    let panel = PanelId::new("shop");
    let ctx = context();
    let t = template(0);

    c.bench_function("cache_key_single", |b| {
        b.iter(|| black_box(cache_key(black_box(&panel), black_box(&t), black_box(&ctx))))
    });
}

criterion_group!(benches, cache_hit_path, cache_miss_path, key_computation);
criterion_main!(benches);
