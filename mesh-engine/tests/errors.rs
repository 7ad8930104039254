// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use mesh_engine::test_helpers::start_test;
use mesh_engine::types::SimResult;
use mesh_engine::{run_simulation, sim_error};

fn check_value(value: u32) -> SimResult {
    if value > 3 {
        return sim_error!(format!("value {value} out of range"));
    }
    Ok(())
}

#[test]
fn task_error_stops_run() {
    let mut engine = start_test(file!());
    let clock = engine.clock();

    engine.spawn(async move {
        for i in 0..10 {
            clock.wait_ticks(1).await;
            check_value(i)?;
        }
        Ok(())
    });

    run_simulation!(engine, "Error: value 4 out of range");
    assert_eq!(engine.now().tick(), 5);
}

#[test]
#[should_panic(expected = "Expected an error!")]
fn missing_error_panics() {
    let mut engine = start_test(file!());
    engine.spawn(async move { check_value(1) });
    run_simulation!(engine, "Error: never");
}
