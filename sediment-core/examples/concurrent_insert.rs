//! Parallel ingestion: many writer threads share one storage handle.

use sediment_core::{DataPoint, Row, Storage, StorageConfig};
use std::sync::Arc;

fn main() {
    let storage = Arc::new(Storage::new(StorageConfig::default()).expect("failed to build storage"));

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let storage = storage.clone();
            scope.spawn(move || {
                for i in 0..1000 {
                    let ts = 1600000000 + worker * 1000 + i;
                    storage
                        .insert_rows(&[Row::new("metric1", DataPoint::new(ts, i as f64))])
                        .expect("failed to insert rows");
                }
            });
        }
    });

    let points = storage
        .select_data_points("metric1", &[], 1600000000, 1600008000)
        .expect("failed to select data points");
    println!("stored {} data points", points.len());

    storage.close().expect("failed to close storage");
}
