// Copyright 2025 Offload Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Offload CLI
//!
//! Command-line front end for the offload worker pool.
//!
//! A run is described by a JSON manifest: the pool configuration plus the
//! functions to register. The binary loads it, builds a pool and then:
//!
//! - `offload call`: runs one function and prints its JSON result
//! - `offload watch`: submits a batch of tasks and prints pool stats as they drain
//! - `offload program`: prints the script every worker would evaluate

pub mod manifest;
pub mod report;

pub use manifest::Manifest;
