use conformist::calibration::cvap::{CvapConfig, CvapPredictor};
use conformist::conformal::{AcpConfig, AcpClassifier, AcpRegressor, TcpClassifier};
use conformist::context::Context;
use conformist::data::FeatureVector;
use conformist::models::{KNearestNeighbors, NearestCentroid};
use conformist::ncm::{ClassificationNcmKind, ClassifierNcm, ResidualNcm};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

mod utils;
use utils::{classification_data, regression_data};

pub fn conformal_benchmarks(c: &mut Criterion) {
    let n_samples = 1_000usize;
    let n_features = 5usize;
    let regression = regression_data(n_samples, n_features);
    let classification = classification_data(n_samples, n_features);
    let ctx = Context::default();
    let x = FeatureVector::dense(vec![0.5; n_features]);

    let mut group = c.benchmark_group("conformal");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("acp_regressor_train", |b| {
        b.iter(|| {
            let ncm = ResidualNcm::abs_diff(KNearestNeighbors::new(10).unwrap());
            let mut acp = AcpRegressor::new(ncm, AcpConfig::default()).unwrap();
            acp.train(black_box(&regression), &ctx).unwrap();
        })
    });

    let ncm = ResidualNcm::abs_diff(KNearestNeighbors::new(10).unwrap());
    let mut acp = AcpRegressor::new(ncm, AcpConfig::default()).unwrap();
    acp.train(&regression, &ctx).unwrap();
    group.bench_function("acp_regressor_predict", |b| {
        b.iter(|| acp.predict(black_box(&x), black_box(&[0.8, 0.9, 0.95])).unwrap())
    });

    let ncm = ClassifierNcm::new(NearestCentroid::new(), ClassificationNcmKind::NegativeDistanceToHyperplane).unwrap();
    let mut acp = AcpClassifier::new(ncm, AcpConfig::default()).unwrap();
    acp.train(&classification, &ctx).unwrap();
    group.bench_function("acp_classifier_predict", |b| b.iter(|| acp.predict(black_box(&x)).unwrap()));

    let ncm = ClassifierNcm::new(NearestCentroid::new(), ClassificationNcmKind::NegativeDistanceToHyperplane).unwrap();
    let mut tcp = TcpClassifier::new(ncm);
    tcp.train(&classification).unwrap();
    group.bench_function("tcp_classifier_predict", |b| {
        b.iter(|| tcp.predict(black_box(&x), &ctx).unwrap())
    });

    let mut cvap = CvapPredictor::new(NearestCentroid::new(), CvapConfig::default()).unwrap();
    cvap.train(&classification, &ctx).unwrap();
    group.bench_function("cvap_predict", |b| b.iter(|| cvap.predict(black_box(&x)).unwrap()));

    group.finish();
}

criterion_group!(benches, conformal_benchmarks);
criterion_main!(benches);
