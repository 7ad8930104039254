// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Map an actor graph onto a compute mesh and run it.
//!
//! See `lib.rs` for details.

use mesh_config::run_config::RunConfig;
use mesh_engine::types::SimError;
use mesh_run::{runner, trackers};
use mesh_track::entity::toplevel;
use mesh_track::{error, info};

fn main() -> Result<(), SimError> {
    let config = RunConfig::parse_all_sources().map_err(|e| SimError(e.to_string()))?;
    let log = config.log();
    let tracker = trackers::setup(&log).map_err(|e| SimError(e.to_string()))?;
    let top = toplevel(&tracker, "top");

    info!(top ; "{:?} discipline on the {:?} backend", config.discipline(), config.backend());
    let stats = match runner::run(&top, &config, trackers::worker_factory(&log)) {
        Ok(stats) => stats,
        Err(e) => {
            error!(top ; "{e}");
            tracker.shutdown();
            return Err(e);
        }
    };
    tracker.shutdown();

    for stat in stats {
        println!("{stat}");
    }
    Ok(())
}
