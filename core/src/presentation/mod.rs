// SPDX-License-Identifier: Apache-2.0

//! Presentation layer: the REST surface over the Controller Facade.

pub mod api;

pub use api::{router, AppState};
