// Copyright 2025 Laptrace (https://github.com/laptrace)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Laptrace Query
//!
//! Per-data-type processors over the cache-through read path, the
//! run-index codec, and the [`DataEngine`] facade tying them together.
//! Every processor follows the same contract: fetch the serialized
//! payloads (cache first, files on miss), reshape them into the
//! canonical columnar [`laptrace_core::Table`], then either encode run
//! identifiers to request-positional indices or fold across runs with
//! the requested aggregation.

pub mod cdc;
pub mod channel;
pub mod codec;
pub mod engine;
pub mod fetch;
pub mod histogram;
pub mod histogram2d;
pub mod histogram_lap;
pub mod lap;
mod process;
pub mod scalar;
pub mod series;

pub use cdc::CdcOutcome;
pub use codec::{encode_run_index, LAP_COUNT, RUN_UID, RUN_UID_INDEX};
pub use engine::{DataEngine, DataResponse};
pub use fetch::PayloadSource;
