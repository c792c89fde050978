use crate::calibration::cvap::{CvapConfig, CvapPredictor};
use crate::calibration::venn_abers::VennAbersCalibrator;
use crate::context::Context;
use crate::data::{read_csv_dataset, Dataset};
use crate::metrics::evaluation::EvaluationMetric;
use crate::metrics::probabilistic::{Brier, LogLoss};
use crate::model::{Classifier, ScoringModel};
use crate::models::NearestCentroid;

fn blobs() -> (Dataset, Dataset) {
    let mut records = read_csv_dataset("resources/blobs.csv", "label").records;
    let test = records.split_off(300);
    (Dataset::new(records), Dataset::new(test))
}

#[test]
fn test_venn_abers_on_centroid_scores() {
    let (train, test) = blobs();
    let (proper, calibration) = train.records.split_at(200);
    let mut model = NearestCentroid::new();
    model.fit(proper).unwrap();

    let score = |r: &crate::data::DataRecord| {
        let scores = model.predict_scores(&r.features).unwrap();
        scores[&1] - scores[&0]
    };
    let scores: Vec<f64> = calibration.iter().map(score).collect();
    let labels: Vec<bool> = calibration.iter().map(|r| r.label == 1.0).collect();
    let calibrator = VennAbersCalibrator::fit_labels(&scores, &labels).unwrap();

    let mut previous: Option<(f64, f64)> = None;
    let mut test_scores: Vec<f64> = test.records.iter().map(score).collect();
    test_scores.sort_by(f64::total_cmp);
    for s in test_scores {
        let interval = calibrator.predict(s).unwrap();
        assert!(interval.p0 <= interval.p1);
        assert!((0.0..=1.0).contains(&interval.p0) && (0.0..=1.0).contains(&interval.p1));
        if let Some((p0, p1)) = previous {
            assert!(interval.p0 >= p0 - 1e-12 && interval.p1 >= p1 - 1e-12);
        }
        previous = Some((interval.p0, interval.p1));
    }
}

#[test]
fn test_cvap_beats_uninformed_forecast() {
    let (train, test) = blobs();
    let mut cvap = CvapPredictor::new(NearestCentroid::new(), CvapConfig::default()).unwrap();
    cvap.train(&train, &Context::new(5)).unwrap();
    assert!(cvap.is_trained());

    let mut log_loss = LogLoss::new();
    let mut brier = Brier::new();
    for r in &test.records {
        let prediction = cvap.predict(&r.features).unwrap();
        let total: f64 = prediction.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        log_loss.add_prediction(r.label, &prediction).unwrap();
        brier.add_prediction(r.label, &prediction).unwrap();
    }
    // a constant forecast of one half scores ln 2 and 0.5
    assert!(log_loss.value().unwrap() < 2f64.ln());
    assert!(brier.value().unwrap() < 0.5);
}
