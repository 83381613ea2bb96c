use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::Utc;
use profhub_core::{SystemClock, WorkspaceId};
use profhub_events::{
    EventProducer, InstanceCreatedContent, ProjectCreatedContent, RepositoryType, WorkspaceEvent,
    WorkspaceEventType,
};
use profhub_infra::jobs::{EventDispatcher, ProjectsSynchronizerJob};
use profhub_infra::queue::{ConsumerId, InMemoryPersistentQueue, PersistentQueue, Topic};
use profhub_infra::repository::InMemoryPlatformRepository;
use profhub_infra::workspace::{StaticWorkspaceResolver, WorkspaceInfo};

const WS: &str = "ws-bench";

fn project_event(origin: &str) -> WorkspaceEvent {
    WorkspaceEvent::with_content(
        origin,
        origin,
        WorkspaceId::new(WS),
        WorkspaceEventType::ProjectCreated,
        &ProjectCreatedContent {
            project_name: origin.to_string(),
            project_label: None,
            repository_type: Some(RepositoryType::AsyncProfiler),
            attributes: Default::default(),
        },
        Utc::now(),
        Utc::now(),
        EventProducer::WorkspaceEventsReplicator,
    )
    .unwrap()
}

fn instance_event(project: &str, instance: &str) -> WorkspaceEvent {
    WorkspaceEvent::with_content(
        instance,
        project,
        WorkspaceId::new(WS),
        WorkspaceEventType::ProjectInstanceCreated,
        &InstanceCreatedContent {
            relative_instance_path: instance.to_string(),
        },
        Utc::now(),
        Utc::now(),
        EventProducer::WorkspaceEventsReplicator,
    )
    .unwrap()
}

fn sweep(projects: usize) -> Vec<WorkspaceEvent> {
    (0..projects)
        .flat_map(|p| {
            let project = format!("p-{p}");
            let instance = format!("{project}-i");
            [project_event(&project), instance_event(&project, &instance)]
        })
        .collect()
}

fn bench_append_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_batch");
    let topic = Topic::new(WS);

    for projects in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements((*projects * 2) as u64));

        group.bench_with_input(BenchmarkId::new("fresh", projects), projects, |b, &n| {
            b.iter_batched(
                || (InMemoryPersistentQueue::new(), sweep(n)),
                |(queue, events)| {
                    black_box(queue.append_batch(&topic, events, &|e| e.dedup_key()).unwrap())
                },
                criterion::BatchSize::SmallInput,
            );
        });

        // steady state of a periodic sweep: everything is already recorded
        group.bench_with_input(BenchmarkId::new("all_duplicates", projects), projects, |b, &n| {
            let queue = InMemoryPersistentQueue::new();
            queue.append_batch(&topic, sweep(n), &|e| e.dedup_key()).unwrap();
            b.iter_batched(
                || sweep(n),
                |events| black_box(queue.append_batch(&topic, events, &|e| e.dedup_key()).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");
    let topic = Topic::new(WS);
    let consumer = ConsumerId::synchronizer();

    for backlog in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*backlog as u64));
        group.bench_with_input(BenchmarkId::new("backlog", backlog), backlog, |b, &n| {
            let queue = InMemoryPersistentQueue::new();
            for i in 0..n {
                queue.append(&topic, project_event(&format!("p-{i}"))).unwrap();
            }
            b.iter(|| black_box(queue.poll(&topic, &consumer).unwrap().len()));
        });
    }

    group.finish();
}

fn bench_synchronize(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize_workspace");
    let workspace = WorkspaceId::new(WS);

    for projects in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements((*projects * 2) as u64));
        group.bench_with_input(BenchmarkId::new("drain", projects), projects, |b, &n| {
            b.iter_batched(
                || {
                    let queue = Arc::new(InMemoryPersistentQueue::new());
                    queue
                        .append_batch(&Topic::new(WS), sweep(n), &|e| e.dedup_key())
                        .unwrap();
                    let repository = Arc::new(InMemoryPlatformRepository::new());
                    let dispatcher =
                        Arc::new(EventDispatcher::standard(repository, Arc::new(SystemClock)));
                    let resolver = Arc::new(StaticWorkspaceResolver::with_workspaces([
                        WorkspaceInfo::remote(WS),
                    ]));
                    ProjectsSynchronizerJob::new(queue, resolver, dispatcher)
                },
                |job| black_box(job.synchronize_workspace(&workspace).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append_batch, bench_poll, bench_synchronize);
criterion_main!(benches);
