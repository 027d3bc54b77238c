// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core types for roborec.

pub mod error;

pub use error::{RecorderError, Result};
