#![allow(dead_code)]
use conformist::data::{DataRecord, Dataset, FeatureVector};
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// Linear target with noise growing along the first feature.
pub(crate) fn regression_data(n_samples: usize, n_features: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(1903);
    let feature_distribution = Uniform::new(0.0, 1.0);
    let noise_distribution = Uniform::new(-1.0, 1.0);
    let weights: Vec<f64> = (0..n_features)
        .map(|_| rng.sample(Uniform::new(-1.0, 1.0)))
        .collect();

    let records = (0..n_samples)
        .map(|_| {
            let x: Vec<f64> = (0..n_features).map(|_| rng.sample(feature_distribution)).collect();
            let linear: f64 = x.iter().zip(weights.iter()).map(|(xi, wi)| xi * wi).sum();
            let y = linear + x[0] * rng.sample(noise_distribution);
            DataRecord::new(y, FeatureVector::dense(x))
        })
        .collect();
    Dataset::new(records)
}

// Two classes separated along every feature.
pub(crate) fn classification_data(n_samples: usize, n_features: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(1903);
    let noise_distribution = Uniform::new(-1.0, 1.0);
    let records = (0..n_samples)
        .map(|i| {
            let label = (i % 2) as f64;
            let x: Vec<f64> = (0..n_features)
                .map(|_| label * 0.8 + rng.sample(noise_distribution))
                .collect();
            DataRecord::new(label, FeatureVector::dense(x))
        })
        .collect();
    Dataset::new(records)
}
