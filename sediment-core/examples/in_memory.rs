//! Ephemeral usage: everything lives in process memory, no WAL, no files.

use sediment_core::{DataPoint, Label, Row, Storage, StorageConfig};

fn main() {
    let storage = Storage::new(StorageConfig::default()).expect("failed to build storage");

    let labels = vec![Label::new("host", "host-1")];
    storage
        .insert_rows(&[Row::with_labels(
            "metric1",
            labels.clone(),
            DataPoint::new(1600000000, 0.1),
        )])
        .expect("failed to insert rows");

    let points = storage
        .select_data_points("metric1", &labels, 1600000000, 1600000001)
        .expect("failed to select data points");
    for point in points {
        println!("timestamp: {}, value: {}", point.timestamp, point.value);
    }

    storage.close().expect("failed to close storage");
}
