//! Performance benchmarks for tasksync-engine

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tasksync_engine::{
    overlay, temporary_id, FailureKind, Filter, PendingOperation, PendingQueue, ReplayBatch,
    Snapshot, Task, TaskDraft, TaskStore, Timestamp,
};

fn ts() -> Timestamp {
    Utc.timestamp_opt(1_706_745_600, 0).unwrap()
}

fn tasks(range: std::ops::Range<usize>) -> Vec<Task> {
    range
        .map(|i| Task {
            id: i.to_string(),
            title: format!("Task {}", i),
            status: i % 3 == 0,
            user_id: format!("user_{}", i % 10),
            created_at: ts(),
            updated_at: None,
        })
        .collect()
}

fn filled_queue(size: usize) -> PendingQueue {
    let mut queue = PendingQueue::new();
    for i in 0..size {
        let operation = match i % 3 {
            0 => PendingOperation::Add {
                draft: TaskDraft::new(format!("Draft {}", i), "user_1"),
                temp_id: temporary_id(i),
                created_at: ts(),
            },
            1 => PendingOperation::Update {
                task: tasks(i..i + 1).remove(0),
            },
            _ => PendingOperation::Delete {
                task_id: i.to_string(),
            },
        };
        queue.enqueue(operation);
    }
    queue
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("append_page", size), size, |b, &size| {
            let first = tasks(0..size);
            // Half of the second page overlaps the first
            let second = tasks(size / 2..size + size / 2);

            b.iter(|| {
                let mut store = TaskStore::new(size as u32);
                store.replace_page(first.clone());
                store.append_page(black_box(second.clone()))
            })
        });
    }

    group.bench_function("filtered_view", |b| {
        let mut store = TaskStore::new(1000);
        store.replace_page(tasks(0..1000));
        let filter = Filter::all()
            .with_status(true)
            .with_user("user_1")
            .with_user("user_2");

        b.iter(|| store.filtered_view(black_box(&filter)).len())
    });

    group.bench_function("upsert_placeholder", |b| {
        let mut store = TaskStore::new(1000);
        store.replace_page(tasks(0..1000));
        let draft = TaskDraft::new("New task", "user_1");
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            store.upsert(Task::placeholder(temporary_id(id), black_box(&draft), ts()))
        })
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    group.bench_function("enqueue", |b| {
        let mut queue = PendingQueue::new();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            queue.enqueue(black_box(PendingOperation::Delete {
                task_id: id.to_string(),
            }))
        })
    });

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("replay_pass", size), size, |b, &size| {
            let queue = filled_queue(size);

            b.iter(|| {
                let mut queue = queue.clone();
                let mut batch = ReplayBatch::new(queue.drain(), 3);
                while let Some(entry) = batch.next() {
                    // Every fifth entry fails and holds back its id
                    if entry.seq % 5 == 0 {
                        batch.fail(entry.seq, FailureKind::Unavailable, "busy".into());
                    } else {
                        batch.complete(entry.seq);
                    }
                }
                let report = batch.finish();
                queue.restore(report.deferred);
                queue.len()
            })
        });

        group.bench_with_input(BenchmarkId::new("overlay", size), size, |b, &size| {
            let queue = filled_queue(size);
            let fetched = tasks(0..size);

            b.iter(|| {
                let mut store = TaskStore::new(size as u32);
                store.replace_page(fetched.clone());
                overlay(&mut store, black_box(queue.iter()));
                store.len()
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 500, 1000].iter() {
        let mut store = TaskStore::new(20);
        store.replace_page(tasks(0..*size));
        let queue = filled_queue(size / 10);

        group.bench_with_input(BenchmarkId::new("to_json", size), size, |b, _| {
            b.iter(|| Snapshot::capture(black_box(&store), black_box(&queue), None).to_json())
        });

        let json = Snapshot::capture(&store, &queue, None).to_json().unwrap();
        group.bench_with_input(BenchmarkId::new("from_json", size), size, |b, _| {
            b.iter(|| Snapshot::from_json(black_box(&json)).map(|s| s.restore(20)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_queue, bench_snapshot);
criterion_main!(benches);
