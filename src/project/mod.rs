// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Project persistence: model definitions, agents and project settings

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteProject;
pub use store::{Agent, ApiSummary, ModelSummary, ProjectStore};
