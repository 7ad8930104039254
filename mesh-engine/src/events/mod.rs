// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Events used to wake tasks that are not waiting on a clock.

pub mod repeated;
