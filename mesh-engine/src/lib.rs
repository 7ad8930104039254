// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! The discrete-event engine underneath the mesh emulators.
//!
//! The [engine](crate::engine::Engine) owns a single-threaded
//! [executor](crate::executor) and the [clock](crate::time::clock) that models
//! the passing of time. Tasks are plain `async` blocks returning a
//! [`SimResult`](crate::types::SimResult); the first task to return an error
//! stops the run and the error is handed back to the caller.
//!
//! # Simple Application
//!
//! ```rust
//! use mesh_engine::engine::Engine;
//! use mesh_engine::run_simulation;
//! use mesh_track::tracker::dev_null_tracker;
//!
//! let mut engine = Engine::new(&dev_null_tracker());
//! let clock = engine.clock();
//! engine.spawn(async move {
//!     clock.wait_ticks(10).await;
//!     Ok(())
//! });
//! run_simulation!(engine);
//! assert_eq!(engine.now().tick(), 10);
//! ```

pub mod engine;
pub mod events;
pub mod executor;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;

#[macro_export]
/// Run the simulation to completion.
///
/// The second form expects the run to fail with the given error text.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}
