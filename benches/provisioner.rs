//! Benchmark for the provisioning engine against the in-memory repository

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use cosi_controller_manager::crd::{BucketClassSpec, BucketRequestSpec};
use cosi_controller_manager::{
    BucketClass, BucketDefaults, BucketFlow, BucketRequest, InMemoryRepository, Provisioner,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn repo() -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    repo.insert_bucket_class(BucketClass::new(
        "gold",
        BucketClassSpec {
            provisioner: "s3.example.io".to_string(),
            parameters: Some(BTreeMap::from([("tier".to_string(), "hot".to_string())])),
            ..Default::default()
        },
    ));
    Arc::new(repo)
}

fn request(name: &str) -> BucketRequest {
    let mut request = BucketRequest::new(
        name,
        BucketRequestSpec {
            bucket_class_name: Some("gold".to_string()),
            ..Default::default()
        },
    );
    request.metadata.namespace = Some("bench".to_string());
    request
}

fn bench_provision_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioner");
    group.throughput(Throughput::Elements(1));
    let runtime = Runtime::new().unwrap();

    group.bench_function("provision_new_request", |b| {
        let repo = repo();
        let provisioner = Provisioner::new(BucketFlow::new(repo.clone(), BucketDefaults::default()));
        let cancel = CancellationToken::new();
        let mut counter = 0u64;

        b.to_async(&runtime).iter(|| {
            counter += 1;
            let request = request(&format!("request-{}", counter));
            repo.insert_bucket_request(request.clone());
            let provisioner = &provisioner;
            let cancel = &cancel;
            async move {
                let _ = provisioner.provision(cancel, black_box(&request)).await;
            }
        });
    });

    group.finish();
}

fn bench_provision_existing(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioner");
    group.throughput(Throughput::Elements(1));
    let runtime = Runtime::new().unwrap();

    let repo = repo();
    let provisioner = Provisioner::new(BucketFlow::new(repo.clone(), BucketDefaults::default()));
    let cancel = CancellationToken::new();
    let existing = request("existing");
    repo.insert_bucket_request(existing.clone());
    runtime.block_on(async {
        let _ = provisioner.provision(&cancel, &existing).await;
    });

    group.bench_function("provision_existing_request", |b| {
        b.to_async(&runtime).iter(|| async {
            let _ = provisioner.provision(&cancel, black_box(&existing)).await;
        });
    });

    group.finish();
}

fn bench_concurrent_same_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioner");
    group.throughput(Throughput::Elements(16));
    let runtime = Runtime::new().unwrap();

    group.bench_function("concurrent_same_request", |b| {
        let repo = repo();
        let provisioner = Arc::new(Provisioner::new(BucketFlow::new(
            repo.clone(),
            BucketDefaults::default(),
        )));
        let mut counter = 0u64;

        b.to_async(&runtime).iter(|| {
            counter += 1;
            let request = request(&format!("shared-{}", counter));
            repo.insert_bucket_request(request.clone());
            let provisioner = provisioner.clone();
            async move {
                let cancel = CancellationToken::new();
                let attempts = (0..16).map(|_| provisioner.provision(&cancel, &request));
                futures::future::join_all(attempts).await;
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_provision_new,
    bench_provision_existing,
    bench_concurrent_same_request
);
criterion_main!(benches);
