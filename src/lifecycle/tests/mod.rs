//! Unit tests for the lifecycle policies.

mod connect;

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::Driver;
use crate::reference::{ImageSpec, MachineSpec, ReferenceMap};
use crate::test_support::{RecordingProgress, ScriptedCompute};

const DRIVER_URL: &str = "openstack:https://keystone.example.test:5000/v3";

struct Harness {
    compute: ScriptedCompute,
    progress: RecordingProgress,
    cancel: CancellationToken,
    driver: Driver,
}

fn harness() -> Harness {
    let compute = ScriptedCompute::new();
    let progress = RecordingProgress::new();
    let cancel = CancellationToken::new();
    let driver = Driver::new(Arc::new(compute.clone()), DRIVER_URL)
        .with_progress(Arc::new(progress.clone()))
        .with_cancellation(cancel.clone());
    Harness {
        compute,
        progress,
        cancel,
        driver,
    }
}

fn reference(entries: &[(&str, Value)]) -> ReferenceMap {
    entries
        .iter()
        .map(|(key, value)| (*key, value.clone()))
        .collect()
}

fn machine(entries: &[(&str, Value)]) -> MachineSpec {
    MachineSpec::new("win-builder", reference(entries))
}

fn image_spec(entries: &[(&str, Value)]) -> ImageSpec {
    let mut spec = ImageSpec::new("web");
    spec.reference = reference(entries);
    spec
}
