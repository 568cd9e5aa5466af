use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flowline::{ContextData, FlowError, Pipeline, PipelineControl, Registry, SkipCondition};
use tokio::runtime::Runtime;

#[derive(Clone, Debug, Default)]
struct BenchContext {
  counter: u64,
}

fn build_pipeline(num_steps: usize) -> Pipeline<BenchContext, FlowError> {
  let names: Vec<&'static str> = (0..num_steps)
    .map(|i| &*Box::leak(format!("step_{}", i).into_boxed_str()))
    .collect();
  let defs: Vec<(&str, bool, Option<SkipCondition<BenchContext>>)> = names.iter().map(|n| (*n, false, None)).collect();
  let mut pipeline = Pipeline::<BenchContext, FlowError>::new(&defs);
  for name in names {
    pipeline.on_root(name, |ctx: ContextData<BenchContext>| async move {
      ctx.write().counter += 1;
      Ok::<_, FlowError>(PipelineControl::Continue)
    });
  }
  pipeline
}

fn bench_pipeline_run(c: &mut Criterion) {
  let mut group = c.benchmark_group("PipelineRun");
  let rt = Runtime::new().expect("tokio runtime");

  for num_steps in [1usize, 5, 10] {
    let pipeline = build_pipeline(num_steps);
    group.bench_with_input(BenchmarkId::from_parameter(num_steps), &num_steps, |b, _| {
      b.to_async(&rt).iter(|| async {
        let ctx = ContextData::new(BenchContext::default());
        pipeline.run(ctx).await.expect("pipeline run");
      })
    });
  }
  group.finish();
}

fn bench_registry_dispatch(c: &mut Criterion) {
  let rt = Runtime::new().expect("tokio runtime");
  let registry = Registry::<FlowError>::new();
  registry.register_pipeline(build_pipeline(5));

  c.bench_function("RegistryDispatch/5", |b| {
    b.to_async(&rt).iter(|| async {
      registry
        .run(ContextData::new(BenchContext::default()))
        .await
        .expect("registry run");
    })
  });
}

criterion_group!(benches, bench_pipeline_run, bench_registry_dispatch);
criterion_main!(benches);
